//! Pluggable map/reduce applications.
//!
//! The user map/reduce functions are normally an external, dynamically
//! loaded collaborator, but dynamic loading is out of scope here, so
//! instead of a `.so` plugin ABI this ships a tiny built-in registry of
//! native function pairs, selected by name at worker startup. Adding a
//! third application is one function pair and one registry entry.

/// A user map function: `(document name, contents) -> emitted pairs`.
pub type MapFn = fn(&str, &str) -> Vec<(String, String)>;
/// A user reduce function: `(key, values for that key) -> result`.
pub type ReduceFn = fn(&str, &[String]) -> String;

#[derive(Debug, Clone, Copy)]
pub struct Application {
    pub name: &'static str,
    pub map: MapFn,
    pub reduce: ReduceFn,
}

pub const WORD_COUNT: Application = Application {
    name: "wc",
    map: wc::map,
    reduce: wc::reduce,
};

pub const INDEXER: Application = Application {
    name: "indexer",
    map: indexer::map,
    reduce: indexer::reduce,
};

const REGISTRY: &[Application] = &[WORD_COUNT, INDEXER];

/// Look up an application by its registered name.
pub fn lookup(name: &str) -> Option<Application> {
    REGISTRY.iter().find(|a| a.name == name).copied()
}

/// Word Count: emit `(word, "1")` per token, reduce by counting.
pub mod wc {
    pub fn map(_document: &str, contents: &str) -> Vec<(String, String)> {
        contents
            .split_whitespace()
            .map(|word| (word.to_string(), "1".to_string()))
            .collect()
    }

    pub fn reduce(_key: &str, values: &[String]) -> String {
        values.len().to_string()
    }
}

/// Inverted index: emit `(word, document)` per token, reduce by collecting
/// the sorted, deduplicated list of documents containing that word.
pub mod indexer {
    pub fn map(document: &str, contents: &str) -> Vec<(String, String)> {
        contents
            .split_whitespace()
            .map(|raw| {
                let word: String = raw
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                (word, document.to_string())
            })
            .filter(|(word, _)| !word.is_empty())
            .collect()
    }

    pub fn reduce(_key: &str, values: &[String]) -> String {
        let mut docs: Vec<&str> = values.iter().map(String::as_str).collect();
        docs.sort_unstable();
        docs.dedup();
        format!("{} {}", docs.len(), docs.join(","))
    }
}
