pub mod atom;
pub mod customer_feed;
pub mod green_button;
pub mod links;
pub mod usage_feed;

pub use customer_feed::{parse_customer_feed, CustomerGraph};
pub use green_button::GreenButtonClient;
pub use usage_feed::{parse_usage_feed, RawReading};
