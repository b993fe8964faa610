//! End-to-end scenarios driven directly against the coordinator's public
//! API and the file-naming/hash/apps building blocks a real worker would
//! use. Real OS worker processes are out of scope for this harness; these
//! tests play the worker's role in-process instead.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskmr::mr::apps::{Application, WORD_COUNT};
use taskmr::mr::config::Config;
use taskmr::mr::coordinator::Coordinator;
use taskmr::mr::hash;
use taskmr::mr::rpc::{self, TaskType, WorkerCmd};

fn config(dir: &Path, timeout_secs: i64) -> Config {
    Config {
        bind_addr: taskmr::mr::config::default_bind_addr(),
        working_dir: dir.to_path_buf(),
        timeout_secs,
    }
}

/// Plays the map worker's role for one task: read input, partition by hash,
/// write temp shards. Mirrors (but doesn't call) `worker::map_blocking`.
fn do_map(app: Application, dir: &Path, pid: u32, index: i64, n_reduce: usize, file: &str) {
    let contents = std::fs::read_to_string(dir.join(file)).unwrap();
    let pairs = (app.map)(file, &contents);
    let mut shards: Vec<std::fs::File> = (0..n_reduce)
        .map(|r| std::fs::File::create(rpc::tmp_intermediate_file(dir, index, r, pid)).unwrap())
        .collect();
    for (key, value) in pairs {
        let r = hash::partition(&key, n_reduce);
        #[derive(serde::Serialize)]
        struct Kv<'a> {
            key: &'a str,
            value: &'a str,
        }
        serde_json::to_writer(&mut shards[r], &Kv { key: &key, value: &value }).unwrap();
    }
}

/// Plays the reduce worker's role for one task.
fn do_reduce(app: Application, dir: &Path, pid: u32, index: i64, n_map: usize) {
    #[derive(serde::Deserialize)]
    struct Kv {
        key: String,
        value: String,
    }
    let mut buf: Vec<Kv> = Vec::new();
    for m in 0..n_map {
        let file = std::fs::File::open(rpc::intermediate_file(dir, m as i64, index as usize)).unwrap();
        for rec in serde_json::Deserializer::from_reader(file).into_iter::<Kv>() {
            buf.push(rec.unwrap());
        }
    }
    buf.sort_by(|a, b| a.key.cmp(&b.key));
    let mut out = std::fs::File::create(rpc::tmp_output_file(dir, index, pid)).unwrap();
    use std::io::Write;
    let mut i = 0;
    while i < buf.len() {
        let mut j = i;
        while j < buf.len() && buf[j].key == buf[i].key {
            j += 1;
        }
        let values: Vec<String> = buf[i..j].iter().map(|kv| kv.value.clone()).collect();
        let result = (app.reduce)(&buf[i].key, &values);
        writeln!(out, "{} {}", buf[i].key, result).unwrap();
        i = j;
    }
}

async fn wait_until(mut pred: impl FnMut() -> bool) {
    for _ in 0..200 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn single_worker_two_inputs_word_count() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "foo bar foo").unwrap();
    std::fs::write(dir.path().join("b.txt"), "baz foo").unwrap();

    let coord = Coordinator::new(
        vec!["a.txt".into(), "b.txt".into()],
        2,
        &config(dir.path(), 10),
    );
    let pid = 1001;

    loop {
        let reply = coord.get_task(pid);
        match reply.cmd {
            WorkerCmd::Done => break,
            WorkerCmd::Wait => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }
            WorkerCmd::Process => {}
        }
        match reply.task_type {
            TaskType::Map => {
                do_map(
                    WORD_COUNT,
                    dir.path(),
                    pid,
                    reply.task_index,
                    reply.n_reduce,
                    &reply.file_path.unwrap(),
                );
            }
            TaskType::Reduce => {
                do_reduce(WORD_COUNT, dir.path(), pid, reply.task_index, reply.n_map);
            }
            TaskType::None => unreachable!("Process never pairs with TaskType::None"),
        }
        coord.finish_task(pid, reply.task_type, reply.task_index);
    }

    wait_until(|| coord.done()).await;

    let mut lines: Vec<String> = Vec::new();
    for r in 0..2 {
        let content = std::fs::read_to_string(rpc::output_file(dir.path(), r)).unwrap();
        lines.extend(content.lines().map(str::to_string));
    }
    lines.sort();
    assert_eq!(lines, vec!["bar 1".to_string(), "baz 1".to_string(), "foo 3".to_string()]);
}

#[tokio::test]
async fn crashed_map_worker_is_superseded_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "foo bar").unwrap();

    let coord = Coordinator::new(vec!["a.txt".into()], 1, &config(dir.path(), 0));

    // Worker A pulls map task 0, writes a partial (wrong) shard, then "dies"
    // without ever calling FinishTask.
    let reply_a = coord.get_task(111);
    assert_eq!(reply_a.task_index, 0);
    std::fs::write(rpc::tmp_intermediate_file(dir.path(), 0, 0, 111), b"").unwrap();

    // Past the (zero-second, for the test) timeout, worker B is handed the
    // same index and completes it for real.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let reply_b = coord.get_task(222);
    assert_eq!(reply_b.task_index, 0);
    do_map(WORD_COUNT, dir.path(), 222, 0, 1, "a.txt");
    coord.finish_task(222, TaskType::Map, 0);

    wait_until(|| rpc::intermediate_file(dir.path(), 0, 0).exists()).await;

    // B's content published; A's abandoned temp file is untouched garbage.
    let file = std::fs::File::open(rpc::intermediate_file(dir.path(), 0, 0)).unwrap();
    #[derive(serde::Deserialize)]
    struct Kv {
        key: String,
        #[allow(dead_code)]
        value: String,
    }
    let records: Vec<Kv> = serde_json::Deserializer::from_reader(file)
        .into_iter::<Kv>()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(records.iter().any(|kv| kv.key == "foo" || kv.key == "bar"));
    assert!(rpc::tmp_intermediate_file(dir.path(), 0, 0, 111).exists());
}

#[tokio::test]
async fn racing_finish_task_has_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "x").unwrap();

    let coord = Coordinator::new(vec![], 1, &config(dir.path(), 0));
    // Bypass map phase entirely: directly drive the reduce TaskSet through
    // the coordinator's reduce dispatch by using a coordinator with zero
    // map tasks (done immediately), so GetTask goes straight to reduce.
    let reply = coord.get_task(1);
    assert_eq!(reply.task_type, TaskType::Reduce);
    assert_eq!(reply.task_index, 0);

    // Both "A" and "B" believe they own reduce task 0 and each write their
    // own temp output, then race FinishTask.
    std::fs::write(rpc::tmp_output_file(dir.path(), 0, 501), b"winner-a\n").unwrap();
    std::fs::write(rpc::tmp_output_file(dir.path(), 0, 502), b"winner-b\n").unwrap();

    coord.finish_task(501, TaskType::Reduce, 0);
    coord.finish_task(502, TaskType::Reduce, 0);

    wait_until(|| rpc::output_file(dir.path(), 0).exists()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let winner = std::fs::read_to_string(rpc::output_file(dir.path(), 0)).unwrap();
    assert!(winner == "winner-a\n" || winner == "winner-b\n");
    // The loser's temp file is orphaned, not retried or deleted.
    let loser_pid = if winner == "winner-a\n" { 502 } else { 501 };
    assert!(rpc::tmp_output_file(dir.path(), 0, loser_pid).exists());
}

#[tokio::test]
async fn reduce_publish_rolls_back_and_retries_on_rename_failure() {
    let dir = tempfile::tempdir().unwrap();
    let coord = Coordinator::new(vec![], 1, &config(dir.path(), 0));

    let reply = coord.get_task(1);
    assert_eq!(reply.task_type, TaskType::Reduce);

    // No temp file was ever written for pid 900: the rename the publish
    // step attempts will fail, so the task must roll back to Processing.
    coord.finish_task(900, TaskType::Reduce, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!rpc::output_file(dir.path(), 0).exists());

    // Past the timeout, the task is re-dispensed and a real worker
    // completes it.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let retry = coord.get_task(2);
    assert_eq!(retry.task_index, 0);
    std::fs::write(rpc::tmp_output_file(dir.path(), 0, 901), b"done\n").unwrap();
    coord.finish_task(901, TaskType::Reduce, 0);

    wait_until(|| rpc::output_file(dir.path(), 0).exists()).await;
    assert_eq!(
        std::fs::read_to_string(rpc::output_file(dir.path(), 0)).unwrap(),
        "done\n"
    );
}

#[tokio::test]
async fn reduce_never_dispatched_until_every_map_task_is_done() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "x").unwrap();
    std::fs::write(dir.path().join("b.txt"), "y").unwrap();

    let coord = Coordinator::new(
        vec!["a.txt".into(), "b.txt".into()],
        1,
        &config(dir.path(), 10),
    );

    let r1 = coord.get_task(1);
    assert_eq!(r1.task_type, TaskType::Map);
    do_map(WORD_COUNT, dir.path(), 1, r1.task_index, r1.n_reduce, "a.txt");
    coord.finish_task(1, TaskType::Map, r1.task_index);
    wait_until(|| rpc::intermediate_file(dir.path(), r1.task_index, 0).exists()).await;

    // The second map task is still outstanding: reduce must not appear yet.
    let r2 = coord.get_task(2);
    assert_eq!(r2.task_type, TaskType::Map);

    do_map(WORD_COUNT, dir.path(), 2, r2.task_index, r2.n_reduce, "b.txt");
    coord.finish_task(2, TaskType::Map, r2.task_index);
    wait_until(|| coord.n_map() > 0 && {
        // both map outputs published
        (0..coord.n_map()).all(|m| rpc::intermediate_file(dir.path(), m as i64, 0).exists())
    })
    .await;

    let r3 = coord.get_task(3);
    assert_eq!(r3.task_type, TaskType::Reduce);
}

#[tokio::test]
async fn job_count_property_holds_under_concurrent_live_workers() {
    // A pool of workers that never stalls must invoke the user map function
    // exactly once per input, no matter how many of them race the
    // coordinator for tasks. This is the property the disabled
    // speculative-dispatch path exists to protect: as long as nothing times
    // out, `TaskSet::get_idle_task` hands each index to exactly one asker.
    const N_MAP: usize = 12;
    const N_WORKERS: u32 = 6;

    let dir = tempfile::tempdir().unwrap();
    let files: Vec<String> = (0..N_MAP)
        .map(|i| {
            let name = format!("in-{i}.txt");
            std::fs::write(dir.path().join(&name), format!("word{i} word{i}")).unwrap();
            name
        })
        .collect();

    let coord = Coordinator::new(files, 2, &config(dir.path(), 10));
    let map_invocations: Arc<Vec<AtomicUsize>> =
        Arc::new((0..N_MAP).map(|_| AtomicUsize::new(0)).collect());

    let mut workers = Vec::new();
    for pid in 1..=N_WORKERS {
        let coord = coord.clone();
        let dir_path = dir.path().to_path_buf();
        let map_invocations = Arc::clone(&map_invocations);
        workers.push(tokio::spawn(async move {
            loop {
                let reply = coord.get_task(pid);
                match reply.cmd {
                    WorkerCmd::Wait => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        continue;
                    }
                    WorkerCmd::Done => break,
                    WorkerCmd::Process => {}
                }
                match reply.task_type {
                    TaskType::Map => {
                        map_invocations[reply.task_index as usize].fetch_add(1, Ordering::SeqCst);
                        do_map(
                            WORD_COUNT,
                            &dir_path,
                            pid,
                            reply.task_index,
                            reply.n_reduce,
                            &reply.file_path.unwrap(),
                        );
                    }
                    TaskType::Reduce => {
                        do_reduce(WORD_COUNT, &dir_path, pid, reply.task_index, reply.n_map);
                    }
                    TaskType::None => unreachable!("Process never pairs with TaskType::None"),
                }
                coord.finish_task(pid, reply.task_type, reply.task_index);
            }
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    wait_until(|| coord.done()).await;

    let total: usize = map_invocations.iter().map(|c| c.load(Ordering::SeqCst)).sum();
    assert_eq!(total, N_MAP, "each map input must be invoked exactly once in total");
    for (index, count) in map_invocations.iter().enumerate() {
        assert_eq!(
            count.load(Ordering::SeqCst),
            1,
            "map task {index} was invoked {} times, expected exactly 1",
            count.load(Ordering::SeqCst)
        );
    }
}
