//! Identifier extraction from Atom link URLs.
//!
//! ESPI feeds never carry entity identifiers in element text. The only place
//! an id exists is the URL path of a `self` or `up` link, as the segment
//! immediately following the entity-type marker
//! (`.../UsagePoint/<id>/MeterReading/...`). Everything that depends on this
//! positional contract goes through this module.

use thiserror::Error;

pub const USAGE_POINT: &str = "UsagePoint";
pub const CUSTOMER_ACCOUNT: &str = "CustomerAccount";
pub const CUSTOMER_AGREEMENT: &str = "CustomerAgreement";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkIdError {
    #[error("link '{href}' has no identifier after '{marker}' segment")]
    MarkerNotFound { marker: &'static str, href: String },
}

/// Return the path segment immediately following `marker` in `href`.
///
/// A missing marker, or a marker with nothing after it, is a hard error:
/// identifier extraction is positional and there is no fallback.
pub fn id_after_marker(href: &str, marker: &'static str) -> Result<String, LinkIdError> {
    let mut segments = href.split('/');
    segments
        .by_ref()
        .find(|s| *s == marker)
        .and_then(|_| segments.next())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| LinkIdError::MarkerNotFound {
            marker,
            href: href.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_segment_after_marker() {
        let href = "https://api.example.com/espi/1_1/resource/Subscription/5/UsagePoint/9202340/MeterReading/1";
        assert_eq!(id_after_marker(href, USAGE_POINT).unwrap(), "9202340");
    }

    #[test]
    fn extracts_both_ids_from_one_customer_link() {
        let href = "/espi/customer/CustomerAccount/A-100/CustomerAgreement/AG-7/ServiceLocation/3";
        assert_eq!(id_after_marker(href, CUSTOMER_ACCOUNT).unwrap(), "A-100");
        assert_eq!(id_after_marker(href, CUSTOMER_AGREEMENT).unwrap(), "AG-7");
    }

    #[test]
    fn missing_marker_is_an_error() {
        let err = id_after_marker("/espi/resource/MeterReading/1", USAGE_POINT).unwrap_err();
        assert_eq!(
            err,
            LinkIdError::MarkerNotFound {
                marker: USAGE_POINT,
                href: "/espi/resource/MeterReading/1".to_owned(),
            }
        );
    }

    #[test]
    fn trailing_marker_is_an_error() {
        assert!(id_after_marker("/espi/resource/UsagePoint/", USAGE_POINT).is_err());
        assert!(id_after_marker("/espi/resource/UsagePoint", USAGE_POINT).is_err());
    }
}
