pub mod record;

pub use record::{LinkFields, NetworkFields, Record, RecordKey, TransportFields};
