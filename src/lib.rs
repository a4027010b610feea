pub mod browser;
pub mod config;
pub mod eve;
pub mod ingest;
pub mod mikrotik;
pub mod server;
pub mod storage;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
