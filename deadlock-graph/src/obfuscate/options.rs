use serde::Deserialize;

/// Knobs for SQL obfuscation.
///
/// Deserializes from the `[obfuscation]` table of the collector config; any
/// field left out takes its default.
///
/// ```toml
/// [obfuscation]
/// replace_digits = true
/// keep_null = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObfuscationOptions {
    /// Replace digit runs inside identifiers (`orders_2024` → `orders_?`).
    pub replace_digits: bool,

    /// Collapse `IN (?, ?, ?)` to `IN (?)` so list length does not change the hash.
    pub collapse_lists: bool,

    /// Keep the `NULL` keyword instead of treating it as a literal.
    pub keep_null: bool,

    /// Keep `TRUE` / `FALSE` instead of treating them as literals.
    pub keep_boolean: bool,

    /// Collect statement verbs and table names alongside the redacted text.
    pub extract_metadata: bool,
}

impl Default for ObfuscationOptions {
    fn default() -> Self {
        Self {
            replace_digits: false,
            collapse_lists: true,
            keep_null: false,
            keep_boolean: false,
            extract_metadata: true,
        }
    }
}
