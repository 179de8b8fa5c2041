/// One row of the merged customer view: a service location left-joined with
/// its agreement (by `agreement_id`) and account (by `account_id`).
///
/// Missing joins leave the corresponding fields `None`; the row itself is
/// still emitted. `sign_date` is a UTC calendar date (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CustomerInfoRow {
    pub account_id: String,
    pub account_name: Option<String>,
    pub agreement_id: String,
    pub agreement_name: Option<String>,
    pub sign_date: Option<String>,
    pub address: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}
