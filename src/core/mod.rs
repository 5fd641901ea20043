pub mod config;
pub mod error;
pub mod pipeline;
pub mod shutdown;

pub use config::Configuration;
pub use error::{LoaderError, LoaderResult};
pub use pipeline::IngestPipeline;
