//! Miniature MapReduce execution framework: a coordinator dispatches map and
//! reduce tasks to a pool of workers and guarantees exactly-once output
//! despite concurrent, racing, or crashed workers.

pub mod mr;
