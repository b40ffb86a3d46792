pub mod api;
pub mod config;
pub mod ingest;
pub mod query;
pub mod server;
pub mod storage;
