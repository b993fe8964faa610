//! Ambient configuration shared by the coordinator and worker binaries.
//!
//! The timeout is fixed at 10s; transport addressing and working-directory
//! choice are left to the invoking collaborator. This module is the one
//! place both binaries go to resolve those values.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::mr::task::DEFAULT_TIMEOUT_SECS;

/// The base TCP port the default bind address offsets from. Distinct from
/// any well-known service port; chosen only to keep the default out of the
/// way of common local dev servers.
const BASE_PORT: u16 = 20_000;

/// Derives a default coordinator port from the invoking user's name, the
/// same spirit as the original lab's `/var/tmp/5840-mr-<uid>` socket name:
/// distinct users on a shared host land on distinct ports without any
/// coordination.
pub fn default_bind_addr() -> SocketAddr {
    let user = whoami::username();
    let offset = user.bytes().fold(0u32, |acc, b| acc.wrapping_add(b as u32));
    let port = BASE_PORT + (offset % 10_000) as u16;
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Resolved settings for one coordinator or worker process.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub working_dir: PathBuf,
    pub timeout_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            working_dir: PathBuf::from("."),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}
