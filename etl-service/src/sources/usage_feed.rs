//! Interval-reading variant of the ESPI feed parser.
//!
//! Walks `feed/entry` elements of an Atom+ESPI document. Entries whose
//! content carries an `IntervalBlock` produce one [`RawReading`] per nested
//! `IntervalReading`; all other entries (usage-point metadata, meter
//! readings, reading types) contribute nothing. The owning meter is resolved
//! from the entry's `rel="up"` link, since ESPI puts identifiers only in
//! link paths.

use quick_xml::events::Event;
use quick_xml::NsReader;

use crate::pipeline::EtlError;
use crate::sources::atom::{is_bound_to, read_link, Link, ATOM_NS, ESPI_NS};
use crate::sources::links::{id_after_marker, USAGE_POINT};

/// One `IntervalReading`, still string-typed, with its owning usage point
/// resolved. Numeric typing happens downstream in the projection step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReading {
    pub usage_point: String,
    pub reading_quality: Option<String>,
    pub duration: Option<String>,
    pub start: Option<String>,
    pub value: Option<String>,
    pub tou: Option<String>,
}

#[derive(Default)]
struct PendingReading {
    reading_quality: Option<String>,
    duration: Option<String>,
    start: Option<String>,
    value: Option<String>,
    tou: Option<String>,
}

#[derive(Default)]
struct EntryState {
    links: Vec<Link>,
    /// Local-name path of open elements inside the entry.
    path: Vec<String>,
    current: Option<PendingReading>,
    readings: Vec<PendingReading>,
}

impl EntryState {
    fn capture_text(&mut self, text: &str) {
        let Some(cur) = self.current.as_mut() else {
            return;
        };
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        match path.as_slice() {
            [.., "IntervalReading", "ReadingQuality", "quality"] => {
                cur.reading_quality = Some(text.to_owned());
            }
            [.., "IntervalReading", "timePeriod", "duration"] => {
                cur.duration = Some(text.to_owned());
            }
            [.., "IntervalReading", "timePeriod", "start"] => cur.start = Some(text.to_owned()),
            [.., "IntervalReading", "value"] => cur.value = Some(text.to_owned()),
            [.., "IntervalReading", "tou"] => cur.tou = Some(text.to_owned()),
            _ => {}
        }
    }
}

/// Parse an Atom+ESPI usage feed into flat readings, in document order.
///
/// Entries carrying readings but no "up" link are dropped with a warning; an
/// "up" link without the `UsagePoint` path marker is a hard parse error.
/// Malformed XML fails fast with no partial output.
pub fn parse_usage_feed(xml: &str) -> Result<Vec<RawReading>, EtlError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut entry: Option<EntryState> = None;

    loop {
        match reader.read_resolved_event() {
            Err(e) => {
                return Err(EtlError::Parse(format!(
                    "malformed usage feed at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            Ok((ns, Event::Start(e))) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match entry.as_mut() {
                    None => {
                        if is_bound_to(&ns, ATOM_NS) && local == "entry" {
                            entry = Some(EntryState::default());
                        }
                    }
                    Some(state) => {
                        if is_bound_to(&ns, ATOM_NS) && local == "link" {
                            if let Some(link) = read_link(&e)? {
                                state.links.push(link);
                            }
                        } else if is_bound_to(&ns, ESPI_NS) && local == "IntervalReading" {
                            state.current = Some(PendingReading::default());
                        }
                        state.path.push(local);
                    }
                }
            }
            Ok((ns, Event::Empty(e))) => {
                if let Some(state) = entry.as_mut() {
                    let local = e.local_name();
                    if is_bound_to(&ns, ATOM_NS) && local.as_ref() == b"link" {
                        if let Some(link) = read_link(&e)? {
                            state.links.push(link);
                        }
                    }
                }
            }
            Ok((_, Event::Text(t))) => {
                if let Some(state) = entry.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| EtlError::Parse(format!("bad text node: {e}")))?;
                    state.capture_text(text.as_ref());
                }
            }
            Ok((ns, Event::End(e))) => {
                if let Some(state) = entry.as_mut() {
                    let local = e.local_name();
                    if state.path.is_empty() {
                        if is_bound_to(&ns, ATOM_NS) && local.as_ref() == b"entry" {
                            let finished = entry.take().unwrap_or_default();
                            finalize_entry(finished, &mut out)?;
                        }
                    } else {
                        if is_bound_to(&ns, ESPI_NS) && local.as_ref() == b"IntervalReading" {
                            if let Some(done) = state.current.take() {
                                state.readings.push(done);
                            }
                        }
                        state.path.pop();
                    }
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
        }
    }

    Ok(out)
}

fn finalize_entry(state: EntryState, out: &mut Vec<RawReading>) -> Result<(), EtlError> {
    if state.readings.is_empty() {
        return Ok(());
    }

    let Some(up) = state.links.iter().find(|l| l.rel == "up") else {
        metrics::counter!("usage_feed_dropped_readings_total")
            .increment(state.readings.len() as u64);
        tracing::warn!(
            readings = state.readings.len(),
            "entry carries an IntervalBlock but no 'up' link; dropping its readings"
        );
        return Ok(());
    };

    let usage_point = id_after_marker(&up.href, USAGE_POINT)?;
    for r in state.readings {
        out.push(RawReading {
            usage_point: usage_point.clone(),
            reading_quality: r.reading_quality,
            duration: r.duration,
            start: r.start,
            value: r.value,
            tou: r.tou,
        });
    }
    Ok(())
}
