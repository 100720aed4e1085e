//! Error types for deadlock-graph parsing.

use thiserror::Error;

/// A deadlock document that could not be turned into a graph.
///
/// Every variant keeps the document it failed on so the caller can log it
/// once; the `Display` output never includes it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {reason}")]
    Malformed { reason: String, raw_xml: String },

    /// A required element is absent.
    #[error("missing element <{element}>")]
    MissingElement {
        element: &'static str,
        raw_xml: String,
    },

    /// A required attribute is absent or does not parse.
    #[error("invalid attribute {attribute} on <{element}>: {value:?}")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
        raw_xml: String,
    },
}

impl ParseError {
    pub(crate) fn malformed(err: roxmltree::Error, raw_xml: &str) -> Self {
        ParseError::Malformed {
            reason: err.to_string(),
            raw_xml: raw_xml.to_string(),
        }
    }

    pub(crate) fn missing(element: &'static str, raw_xml: &str) -> Self {
        ParseError::MissingElement {
            element,
            raw_xml: raw_xml.to_string(),
        }
    }

    /// The document that failed to parse.
    pub fn raw_xml(&self) -> &str {
        match self {
            ParseError::Malformed { raw_xml, .. }
            | ParseError::MissingElement { raw_xml, .. }
            | ParseError::InvalidAttribute { raw_xml, .. } => raw_xml,
        }
    }
}
