//! Customer-graph variant of the ESPI feed parser.
//!
//! A customer feed interleaves three entity types as sibling entries
//! (accounts, agreements, and service locations) joined only through
//! identifiers embedded in each entry's `rel="self"` link. Parsing is a
//! classification pass into three maps; [`CustomerGraph::merge`] then
//! left-joins locations with agreements and accounts into flat rows.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::NsReader;

use espi_client::domain::CustomerInfoRow;

use crate::pipeline::EtlError;
use crate::sources::atom::{is_bound_to, read_link, Link, ATOM_NS, ESPI_CUSTOMER_NS};
use crate::sources::links::{id_after_marker, CUSTOMER_ACCOUNT, CUSTOMER_AGREEMENT};

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAccount {
    pub account_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAgreement {
    pub agreement_id: String,
    pub account_id: String,
    pub name: Option<String>,
    /// UTC calendar date (`YYYY-MM-DD`) derived from the `signDate` epoch.
    pub sign_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLocation {
    pub agreement_id: String,
    pub account_id: String,
    pub address: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

/// Accumulated entities of one customer feed, keyed by their link-derived
/// identifiers.
#[derive(Debug, Default)]
pub struct CustomerGraph {
    pub accounts: BTreeMap<String, CustomerAccount>,
    pub agreements: BTreeMap<String, CustomerAgreement>,
    pub locations: BTreeMap<String, ServiceLocation>,
}

impl CustomerGraph {
    /// Left-join locations with agreements (by agreement id) and accounts
    /// (by account id) into one row per known service location.
    ///
    /// Agreements without a location are not emitted; the gap is counted
    /// and logged so it stays visible.
    pub fn merge(&self) -> Vec<CustomerInfoRow> {
        let unlocated = self
            .agreements
            .keys()
            .filter(|id| !self.locations.contains_key(*id))
            .count();
        if unlocated > 0 {
            metrics::counter!("customer_feed_unlocated_agreements_total")
                .increment(unlocated as u64);
            tracing::warn!(
                agreements = unlocated,
                "agreements without a service location are not emitted"
            );
        }

        self.locations
            .values()
            .map(|loc| {
                let agreement = self.agreements.get(&loc.agreement_id);
                let account = self.accounts.get(&loc.account_id);
                CustomerInfoRow {
                    account_id: loc.account_id.clone(),
                    account_name: account.and_then(|a| a.name.clone()),
                    agreement_id: loc.agreement_id.clone(),
                    agreement_name: agreement.and_then(|a| a.name.clone()),
                    sign_date: agreement.and_then(|a| a.sign_date.clone()),
                    address: loc.address.clone(),
                    address2: loc.address2.clone(),
                    city: loc.city.clone(),
                    state: loc.state.clone(),
                    zip: loc.zip.clone(),
                }
            })
            .collect()
    }
}

#[derive(Default)]
struct AccountFields {
    name: Option<String>,
}

#[derive(Default)]
struct AgreementFields {
    name: Option<String>,
    sign_epoch: Option<String>,
}

#[derive(Default)]
struct LocationFields {
    address: Option<String>,
    address2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
}

/// Which of the three entity types an entry's content turned out to hold.
#[derive(Default)]
enum EntryKind {
    #[default]
    Unknown,
    Account(AccountFields),
    Agreement(AgreementFields),
    Location(LocationFields),
}

#[derive(Default)]
struct EntryState {
    links: Vec<Link>,
    path: Vec<String>,
    kind: EntryKind,
}

impl EntryState {
    fn classify(&mut self, local: &str) {
        if !matches!(self.kind, EntryKind::Unknown) {
            return;
        }
        // Only a direct child of <content> names the entity type.
        if self.path != ["content"] {
            return;
        }
        self.kind = match local {
            "CustomerAccount" => EntryKind::Account(AccountFields::default()),
            "CustomerAgreement" => EntryKind::Agreement(AgreementFields::default()),
            "ServiceLocation" => EntryKind::Location(LocationFields::default()),
            _ => EntryKind::Unknown,
        };
    }

    fn capture_text(&mut self, text: &str) {
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        match (&mut self.kind, path.as_slice()) {
            (EntryKind::Account(f), [.., "CustomerAccount", "name"]) => {
                f.name = Some(text.to_owned());
            }
            (EntryKind::Agreement(f), [.., "CustomerAgreement", "name"]) => {
                f.name = Some(text.to_owned());
            }
            (EntryKind::Agreement(f), [.., "CustomerAgreement", "signDate"]) => {
                f.sign_epoch = Some(text.to_owned());
            }
            (EntryKind::Location(f), [.., "mainAddress", "streetDetail", "addressGeneral"]) => {
                f.address = Some(text.to_owned());
            }
            (EntryKind::Location(f), [.., "mainAddress", "streetDetail", "addressGeneral2"]) => {
                f.address2 = Some(text.to_owned());
            }
            (EntryKind::Location(f), [.., "mainAddress", "townDetail", "name"]) => {
                f.city = Some(text.to_owned());
            }
            (EntryKind::Location(f), [.., "mainAddress", "townDetail", "stateOrProvince"]) => {
                f.state = Some(text.to_owned());
            }
            (EntryKind::Location(f), [.., "mainAddress", "townDetail", "code"]) => {
                f.zip = Some(text.to_owned());
            }
            _ => {}
        }
    }
}

/// Parse an Atom+ESPI-customer feed into its entity maps.
pub fn parse_customer_feed(xml: &str) -> Result<CustomerGraph, EtlError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut graph = CustomerGraph::default();
    let mut entry: Option<EntryState> = None;

    loop {
        match reader.read_resolved_event() {
            Err(e) => {
                return Err(EtlError::Parse(format!(
                    "malformed customer feed at byte {}: {e}",
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
                        } else if is_bound_to(&ns, ESPI_CUSTOMER_NS) {
                            state.classify(&local);
                        }
                        state.path.push(local);
                    }
                }
            }
            Ok((ns, Event::Empty(e))) => {
                if let Some(state) = entry.as_mut() {
                    if is_bound_to(&ns, ATOM_NS) && e.local_name().as_ref() == b"link" {
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
                    if state.path.is_empty() {
                        if is_bound_to(&ns, ATOM_NS) && e.local_name().as_ref() == b"entry" {
                            let finished = entry.take().unwrap_or_default();
                            finalize_entry(finished, &mut graph)?;
                        }
                    } else {
                        state.path.pop();
                    }
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
        }
    }

    Ok(graph)
}

fn finalize_entry(state: EntryState, graph: &mut CustomerGraph) -> Result<(), EtlError> {
    if matches!(state.kind, EntryKind::Unknown) {
        return Ok(());
    }

    // Identifier-dependent steps need a self link; entries without one are
    // skipped rather than failed.
    let Some(self_link) = state.links.iter().find(|l| l.rel == "self") else {
        metrics::counter!("customer_feed_entries_without_self_link_total").increment(1);
        tracing::warn!("customer entry has no 'self' link; skipping");
        return Ok(());
    };
    let href = self_link.href.as_str();

    match state.kind {
        EntryKind::Account(f) => {
            let account_id = id_after_marker(href, CUSTOMER_ACCOUNT)?;
            graph.accounts.insert(
                account_id.clone(),
                CustomerAccount {
                    account_id,
                    name: f.name,
                },
            );
        }
        EntryKind::Agreement(f) => {
            let agreement_id = id_after_marker(href, CUSTOMER_AGREEMENT)?;
            let account_id = id_after_marker(href, CUSTOMER_ACCOUNT)?;
            let sign_date = f.sign_epoch.as_deref().map(format_sign_date).transpose()?;
            graph.agreements.insert(
                agreement_id.clone(),
                CustomerAgreement {
                    agreement_id,
                    account_id,
                    name: f.name,
                    sign_date,
                },
            );
        }
        EntryKind::Location(f) => {
            let agreement_id = id_after_marker(href, CUSTOMER_AGREEMENT)?;
            let account_id = id_after_marker(href, CUSTOMER_ACCOUNT)?;
            graph.locations.insert(
                agreement_id.clone(),
                ServiceLocation {
                    agreement_id,
                    account_id,
                    address: f.address,
                    address2: f.address2,
                    city: f.city,
                    state: f.state,
                    zip: f.zip,
                },
            );
        }
        EntryKind::Unknown => unreachable!("filtered above"),
    }
    Ok(())
}

fn format_sign_date(epoch: &str) -> Result<String, EtlError> {
    let secs: i64 = epoch
        .trim()
        .parse()
        .map_err(|_| EtlError::Parse(format!("invalid signDate epoch '{epoch}'")))?;
    let dt = chrono::DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| EtlError::Parse(format!("signDate epoch '{epoch}' out of range")))?;
    Ok(dt.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:cust="http://naesb.org/espi/customer">"#;

    fn account_entry(id: &str, name: &str) -> String {
        format!(
            r#"<entry>
    <link rel="self" href="/espi/customer/CustomerAccount/{id}"/>
    <content><cust:CustomerAccount><cust:name>{name}</cust:name></cust:CustomerAccount></content>
  </entry>"#
        )
    }

    fn agreement_entry(account: &str, agreement: &str, name: &str, epoch: i64) -> String {
        format!(
            r#"<entry>
    <link rel="self" href="/espi/customer/CustomerAccount/{account}/CustomerAgreement/{agreement}"/>
    <content><cust:CustomerAgreement><cust:name>{name}</cust:name><cust:signDate>{epoch}</cust:signDate></cust:CustomerAgreement></content>
  </entry>"#
        )
    }

    fn location_entry(account: &str, agreement: &str) -> String {
        format!(
            r#"<entry>
    <link rel="self" href="/espi/customer/CustomerAccount/{account}/CustomerAgreement/{agreement}/ServiceLocation/1"/>
    <content>
      <cust:ServiceLocation>
        <cust:mainAddress>
          <cust:streetDetail>
            <cust:addressGeneral>123 Grid St</cust:addressGeneral>
            <cust:addressGeneral2>Unit 4</cust:addressGeneral2>
          </cust:streetDetail>
          <cust:townDetail>
            <cust:name>Oakland</cust:name>
            <cust:stateOrProvince>CA</cust:stateOrProvince>
            <cust:code>94607</cust:code>
          </cust:townDetail>
        </cust:mainAddress>
      </cust:ServiceLocation>
    </content>
  </entry>"#
        )
    }

    #[test]
    fn three_entry_feed_merges_to_one_full_row() {
        let xml = format!(
            "{FEED_HEADER}\n  {}\n  {}\n  {}\n</feed>",
            account_entry("A-100", "Beacon Foods"),
            agreement_entry("A-100", "AG-7", "Retail service", 1_577_836_800),
            location_entry("A-100", "AG-7"),
        );
        let rows = parse_customer_feed(&xml).unwrap().merge();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.account_id, "A-100");
        assert_eq!(row.account_name.as_deref(), Some("Beacon Foods"));
        assert_eq!(row.agreement_id, "AG-7");
        assert_eq!(row.agreement_name.as_deref(), Some("Retail service"));
        assert_eq!(row.sign_date.as_deref(), Some("2020-01-01"));
        assert_eq!(row.address.as_deref(), Some("123 Grid St"));
        assert_eq!(row.address2.as_deref(), Some("Unit 4"));
        assert_eq!(row.city.as_deref(), Some("Oakland"));
        assert_eq!(row.state.as_deref(), Some("CA"));
        assert_eq!(row.zip.as_deref(), Some("94607"));
    }

    #[test]
    fn location_without_agreement_left_joins_to_none() {
        let xml = format!(
            "{FEED_HEADER}\n  {}\n</feed>",
            location_entry("A-200", "AG-9"),
        );
        let rows = parse_customer_feed(&xml).unwrap().merge();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].account_id, "A-200");
        assert_eq!(rows[0].agreement_id, "AG-9");
        assert_eq!(rows[0].account_name, None);
        assert_eq!(rows[0].agreement_name, None);
        assert_eq!(rows[0].sign_date, None);
    }

    #[test]
    fn agreement_without_location_is_not_emitted() {
        let xml = format!(
            "{FEED_HEADER}\n  {}\n  {}\n</feed>",
            account_entry("A-100", "Beacon Foods"),
            agreement_entry("A-100", "AG-7", "Retail service", 0),
        );
        let graph = parse_customer_feed(&xml).unwrap();
        assert_eq!(graph.agreements.len(), 1);
        assert_eq!(graph.merge(), vec![]);
    }

    #[test]
    fn sign_date_epoch_zero_is_unix_epoch_day_utc() {
        let xml = format!(
            "{FEED_HEADER}\n  {}\n</feed>",
            agreement_entry("A-1", "AG-1", "x", 0),
        );
        let graph = parse_customer_feed(&xml).unwrap();
        assert_eq!(
            graph.agreements["AG-1"].sign_date.as_deref(),
            Some("1970-01-01")
        );
    }

    #[test]
    fn entry_without_self_link_is_skipped() {
        let xml = format!(
            r#"{FEED_HEADER}
  <entry>
    <content><cust:CustomerAccount><cust:name>No Link Inc</cust:name></cust:CustomerAccount></content>
  </entry>
</feed>"#
        );
        let graph = parse_customer_feed(&xml).unwrap();
        assert!(graph.accounts.is_empty());
    }

    #[test]
    fn self_link_missing_account_marker_is_a_hard_error() {
        let xml = format!(
            r#"{FEED_HEADER}
  <entry>
    <link rel="self" href="/espi/customer/Customer/1"/>
    <content><cust:CustomerAccount><cust:name>Broken</cust:name></cust:CustomerAccount></content>
  </entry>
</feed>"#
        );
        assert!(parse_customer_feed(&xml).is_err());
    }

    #[test]
    fn absent_address_fields_default_to_none() {
        let xml = format!(
            r#"{FEED_HEADER}
  <entry>
    <link rel="self" href="/espi/customer/CustomerAccount/A-1/CustomerAgreement/AG-1/ServiceLocation/1"/>
    <content>
      <cust:ServiceLocation>
        <cust:mainAddress>
          <cust:townDetail><cust:name>Fresno</cust:name></cust:townDetail>
        </cust:mainAddress>
      </cust:ServiceLocation>
    </content>
  </entry>
</feed>"#
        );
        let graph = parse_customer_feed(&xml).unwrap();
        let loc = &graph.locations["AG-1"];
        assert_eq!(loc.city.as_deref(), Some("Fresno"));
        assert_eq!(loc.address, None);
        assert_eq!(loc.address2, None);
        assert_eq!(loc.state, None);
        assert_eq!(loc.zip, None);
    }
}
