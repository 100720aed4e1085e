//! Redacted query signatures.

/// The redacted form of one session's captured SQL.
///
/// `normalized_hash` is computed over `redacted_text`, so two statements that
/// differ only in literal values share a hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuerySignature {
    /// Session the statement was captured from.
    pub session_id: i32,

    /// Hex-encoded hash of the redacted statement shape.
    pub normalized_hash: String,

    /// Statement text with literals replaced by `?`.
    pub redacted_text: String,

    /// Statement verbs seen in the text, in order (e.g. `UPDATE`).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub commands: Vec<String>,

    /// Tables referenced by the statement.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub tables: Vec<String>,

    /// Set when the text could not be tokenized and was hashed as one opaque token.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "is_false"))]
    pub opaque: bool,
}

#[cfg(feature = "serde")]
fn is_false(v: &bool) -> bool {
    !*v
}

impl QuerySignature {
    /// Whether the signature was produced by the opaque fallback path.
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }
}
