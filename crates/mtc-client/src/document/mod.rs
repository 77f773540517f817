//! MTConnect response documents
//!
//! Only the parts of the documents the collector uses are modelled. Element
//! names are matched on their local name so any MTConnect schema namespace
//! version is accepted.

mod assets;
mod devices;
mod streams;

pub use assets::*;
pub use devices::*;
pub use streams::*;

use chrono::{DateTime, NaiveDateTime, Utc};
use roxmltree::{Document, Node};

use crate::error::{AgentClientError, Result};

/// The `Header` element common to every response document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub instance_id: u64,
    pub sender: String,
    pub version: String,
    pub buffer_size: u64,
    pub creation_time: DateTime<Utc>,
    pub test_indicator: bool,
    /// Streams documents only
    pub next_sequence: Option<u64>,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
}

impl Header {
    fn parse(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            instance_id: required_attr(node, "instanceId")?
                .parse()
                .map_err(|_| parse_error("Header instanceId is not a number"))?,
            sender: node.attribute("sender").unwrap_or_default().to_string(),
            version: node.attribute("version").unwrap_or_default().to_string(),
            buffer_size: numeric_attr(node, "bufferSize").unwrap_or(0),
            creation_time: node
                .attribute("creationTime")
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            test_indicator: node.attribute("testIndicator") == Some("true"),
            next_sequence: numeric_attr(node, "nextSequence"),
            first_sequence: numeric_attr(node, "firstSequence"),
            last_sequence: numeric_attr(node, "lastSequence"),
        })
    }
}

/// Parse an MTConnect timestamp.
///
/// Agents send RFC 3339 with a `Z` suffix, but some older adapters omit the
/// offset; those are read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse the XML text and check the root element.
///
/// An `MTConnectError` root is turned into [`AgentClientError::AgentError`].
pub(crate) fn parse_root<'a>(xml: &'a str, expected: &str) -> Result<Document<'a>> {
    let doc = Document::parse(xml).map_err(|e| parse_error(e.to_string()))?;
    let root = doc.root_element();

    match root.tag_name().name() {
        name if name == expected => Ok(doc),
        "MTConnectError" => Err(agent_error(root)),
        other => Err(parse_error(format!(
            "expected {} document, got {}",
            expected, other
        ))),
    }
}

/// Find the document header below the root element
pub(crate) fn header_of(root: Node<'_, '_>) -> Result<Header> {
    child(root, "Header")
        .ok_or_else(|| parse_error("document has no Header"))
        .and_then(Header::parse)
}

fn agent_error(root: Node<'_, '_>) -> AgentClientError {
    let error = root
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Error");

    match error {
        Some(e) => AgentClientError::AgentError {
            code: e.attribute("errorCode").unwrap_or("UNKNOWN").to_string(),
            message: e.text().unwrap_or_default().trim().to_string(),
        },
        None => AgentClientError::AgentError {
            code: "UNKNOWN".into(),
            message: "MTConnectError without Error element".into(),
        },
    }
}

pub(crate) fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

pub(crate) fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

pub(crate) fn attr(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

pub(crate) fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        parse_error(format!(
            "{} element is missing attribute {}",
            node.tag_name().name(),
            name
        ))
    })
}

fn numeric_attr(node: Node<'_, '_>, name: &str) -> Option<u64> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

pub(crate) fn parse_error(msg: impl Into<String>) -> AgentClientError {
    AgentClientError::ParseError(msg.into())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2017, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(parse_timestamp("2017-03-01T12:00:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2017-03-01T12:00:05"), Some(expected));
        assert_eq!(
            parse_timestamp("2017-03-01T12:00:05.250000Z").map(|t| t.timestamp_subsec_millis()),
            Some(250)
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_error_document_is_reported() {
        let xml = r#"<?xml version="1.0"?>
<MTConnectError xmlns="urn:mtconnect.org:MTConnectError:1.3">
  <Header creationTime="2017-03-01T12:00:05Z" sender="agent" instanceId="1" version="1.3.0.17" bufferSize="131072"/>
  <Errors>
    <Error errorCode="OUT_OF_RANGE">'from' must be greater than 10</Error>
  </Errors>
</MTConnectError>"#;
        let err = parse_root(xml, "MTConnectStreams").unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[test]
    fn test_wrong_root_is_parse_error() {
        let err = parse_root("<html><body/></html>", "MTConnectDevices").unwrap_err();
        assert!(matches!(err, AgentClientError::ParseError(_)));
    }
}
