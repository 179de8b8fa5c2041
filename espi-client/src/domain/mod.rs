pub mod customer;
pub mod usage;

pub use customer::CustomerInfoRow;
pub use usage::UsageRow;
