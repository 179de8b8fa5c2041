//! Record projection: raw string-typed readings into the typed warehouse
//! schema, with local-time derivation and unit annotation.

use chrono_tz::Tz;

use espi_client::domain::UsageRow;

use crate::pipeline::EtlError;
use crate::sources::RawReading;

pub const USAGE_UNIT: &str = "kWh";
const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce parsed readings into [`UsageRow`]s.
///
/// Absent fields stay `None`; a field that is present but not numeric is a
/// parse error for the whole document. `start_time` renders the interval
/// start in `tz`.
pub fn project_usage(raw: Vec<RawReading>, tz: Tz) -> Result<Vec<UsageRow>, EtlError> {
    raw.into_iter().map(|r| project_reading(r, tz)).collect()
}

fn project_reading(r: RawReading, tz: Tz) -> Result<UsageRow, EtlError> {
    let duration = parse_opt::<i64>(&r.duration, "duration")?;
    let start = parse_opt::<i64>(&r.start, "start")?;
    let value = parse_opt::<f64>(&r.value, "value")?;
    let start_time = start.map(|epoch| local_start_time(epoch, tz)).transpose()?;
    Ok(UsageRow {
        usage_point: r.usage_point,
        reading_quality: r.reading_quality,
        duration,
        start,
        value,
        tou: r.tou,
        start_time,
        unit: USAGE_UNIT.to_owned(),
    })
}

fn parse_opt<T: std::str::FromStr>(
    field: &Option<String>,
    name: &str,
) -> Result<Option<T>, EtlError> {
    field
        .as_deref()
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|_| EtlError::Parse(format!("invalid {name} '{s}'")))
        })
        .transpose()
}

fn local_start_time(epoch: i64, tz: Tz) -> Result<String, EtlError> {
    let dt = chrono::DateTime::from_timestamp(epoch, 0)
        .ok_or_else(|| EtlError::Parse(format!("interval start epoch {epoch} out of range")))?;
    Ok(dt.with_timezone(&tz).format(START_TIME_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: Option<&str>, value: Option<&str>) -> RawReading {
        RawReading {
            usage_point: "9202340".to_owned(),
            reading_quality: Some("19".to_owned()),
            duration: Some("900".to_owned()),
            start: start.map(str::to_owned),
            value: value.map(str::to_owned),
            tou: None,
        }
    }

    #[test]
    fn types_fields_and_derives_local_start_time() {
        let rows = project_usage(
            vec![raw(Some("1700000000"), Some("1.2"))],
            chrono_tz::America::Los_Angeles,
        )
        .unwrap();
        let row = &rows[0];
        assert_eq!(row.duration, Some(900));
        assert_eq!(row.start, Some(1_700_000_000));
        assert_eq!(row.value, Some(1.2));
        assert_eq!(row.start_time.as_deref(), Some("2023-11-14 14:13:20"));
        assert_eq!(row.unit, "kWh");
    }

    #[test]
    fn epoch_zero_renders_utc_midnight_in_utc() {
        let rows = project_usage(vec![raw(Some("0"), None)], chrono_tz::UTC).unwrap();
        assert_eq!(rows[0].start_time.as_deref(), Some("1970-01-01 00:00:00"));
    }

    #[test]
    fn missing_start_leaves_start_time_none() {
        let rows = project_usage(vec![raw(None, Some("0.5"))], chrono_tz::UTC).unwrap();
        assert_eq!(rows[0].start, None);
        assert_eq!(rows[0].start_time, None);
    }

    #[test]
    fn non_numeric_value_is_a_parse_error() {
        let err = project_usage(vec![raw(Some("0"), Some("n/a"))], chrono_tz::UTC).unwrap_err();
        assert!(matches!(err, EtlError::Parse(_)));
    }
}
