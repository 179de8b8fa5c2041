/// One flattened interval reading, as stored in the warehouse.
///
/// `usage_point` is the meter identifier resolved from the owning feed
/// entry's "up" link. `start` is epoch seconds; `start_time` is the same
/// instant rendered in the feed's local timezone (`YYYY-MM-DD HH:MM:SS`).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsageRow {
    pub usage_point: String,
    pub reading_quality: Option<String>,
    pub duration: Option<i64>,
    pub start: Option<i64>,
    pub value: Option<f64>,
    pub tou: Option<String>,
    pub start_time: Option<String>,
    pub unit: String,
}
