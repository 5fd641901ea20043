pub mod aggregator;
pub mod bucket;
pub mod normalizer;
pub mod packet_id;
pub mod queue;
pub mod worker;

pub use aggregator::{FileStats, RunSummary};
pub use worker::WorkerPool;
