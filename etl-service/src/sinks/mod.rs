pub mod metrics_log;
pub mod warehouse;

pub use warehouse::{UpsertRow, BATCH_SIZE};
