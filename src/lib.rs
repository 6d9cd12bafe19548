pub mod beacon;
pub mod catalog;
pub mod client;
pub mod commands;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod phrase;
pub mod protocol;
pub mod rate_limit;
pub mod server;
pub mod sink;

pub use error::{Error, Result};

/// IPv4 group the discovery beacons are sent to.
pub const MULTICAST_GROUP: std::net::Ipv4Addr = std::net::Ipv4Addr::new(224, 0, 0, 167);
pub const MULTICAST_PORT: u16 = 53317;

/// Transfer server ports are probed in this range when none is given.
pub const PORT_RANGE_START: u16 = 53317;
pub const PORT_RANGE_END: u16 = 53417;

pub const BEACON_INTERVAL_MS: u64 = 500;
/// Grace period after the last file so in-flight network buffers drain.
pub const COMPLETION_GRACE_MS: u64 = 500;

/// Handshake timestamps older or newer than this are rejected.
pub const AUTH_WINDOW_MS: i64 = 5 * 60 * 1000;

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;
pub const RATE_LIMIT_MAX_REQUESTS: usize = 60;

pub const PROTOCOL_VERSION: &str = "2.1";
pub const DEVICE_MODEL: &str = "CLI";
pub const API_PREFIX: &str = "/api/localsend/v2";

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
