pub mod cli;
pub mod core;
pub mod ingest;
pub mod network;
pub mod setup_logger;
pub mod storage;
