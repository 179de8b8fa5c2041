//! Shared pieces of the Atom feed envelope: namespace constants, link
//! collection, and attribute access helpers for the namespace-aware reader.

use quick_xml::events::BytesStart;
use quick_xml::name::{Namespace, ResolveResult};

use crate::pipeline::EtlError;

pub const ATOM_NS: Namespace<'static> = Namespace(b"http://www.w3.org/2005/Atom");
pub const ESPI_NS: Namespace<'static> = Namespace(b"http://naesb.org/espi");
pub const ESPI_CUSTOMER_NS: Namespace<'static> = Namespace(b"http://naesb.org/espi/customer");

/// An Atom `link` element's relation and target.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

pub fn is_bound_to(resolve: &ResolveResult<'_>, ns: Namespace<'_>) -> bool {
    matches!(resolve, ResolveResult::Bound(bound) if *bound == ns)
}

pub fn attr_value(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, EtlError> {
    match e.try_get_attribute(name) {
        Ok(Some(attr)) => attr
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|err| EtlError::Parse(format!("bad '{name}' attribute: {err}"))),
        Ok(None) => Ok(None),
        Err(err) => Err(EtlError::Parse(format!("malformed attributes: {err}"))),
    }
}

/// Read a `link` element into a [`Link`]; links without both `rel` and
/// `href` carry no information we use and are ignored.
pub fn read_link(e: &BytesStart<'_>) -> Result<Option<Link>, EtlError> {
    let rel = attr_value(e, "rel")?;
    let href = attr_value(e, "href")?;
    Ok(match (rel, href) {
        (Some(rel), Some(href)) => Some(Link { rel, href }),
        _ => None,
    })
}
