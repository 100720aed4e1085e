//! Statement verbs and table names pulled from redacted tokens.

use super::lexer::TokenKind;
use super::Piece;

const COMMANDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "EXEC", "EXECUTE", "CREATE", "ALTER", "DROP",
    "TRUNCATE", "GRANT", "REVOKE", "COMMIT", "ROLLBACK",
];

/// Keywords whose next identifier names a table.
const TABLE_INTRODUCERS: &[&str] = &["FROM", "JOIN", "UPDATE", "INTO", "TABLE", "MERGE"];

/// Keywords that can follow an introducer without being a table name.
const NOT_A_TABLE: &[&str] = &[
    "SELECT", "INTO", "TOP", "IF", "EXISTS", "WITH", "SET", "WHERE", "ON", "AS", "VALUES",
    "DEFAULT", "OPENJSON", "OPENQUERY", "OPENROWSET",
];

/// Returns `(commands, tables)`, each deduplicated in first-seen order.
pub(super) fn extract(pieces: &[Piece<'_>]) -> (Vec<String>, Vec<String>) {
    let mut commands = Vec::new();
    let mut tables = Vec::new();

    for (i, piece) in pieces.iter().enumerate() {
        if piece.kind != TokenKind::Word {
            continue;
        }
        let upper = piece.text.to_ascii_uppercase();

        if COMMANDS.contains(&upper.as_str()) {
            push_unique(&mut commands, upper.clone());
        }
        if TABLE_INTRODUCERS.contains(&upper.as_str()) {
            if let Some(name) = table_name(&pieces[i + 1..]) {
                push_unique(&mut tables, name);
            }
        }
    }

    (commands, tables)
}

/// Read a possibly dotted name (`db.dbo.t`, `[dbo].[t]`) from the front of `rest`.
fn table_name(rest: &[Piece<'_>]) -> Option<String> {
    let first = rest.first()?;
    if !is_name(first) {
        return None;
    }
    if first.kind == TokenKind::Word
        && NOT_A_TABLE.contains(&first.text.to_ascii_uppercase().as_str())
    {
        return None;
    }

    let mut name = first.text.to_string();
    let mut i = 1;
    while let (Some(dot), Some(part)) = (rest.get(i), rest.get(i + 1)) {
        let joined = dot.text == "." && !dot.space_before && !part.space_before;
        if !joined || !is_name(part) {
            break;
        }
        name.push('.');
        name.push_str(&part.text);
        i += 2;
    }
    Some(name)
}

fn is_name(piece: &Piece<'_>) -> bool {
    matches!(piece.kind, TokenKind::Word | TokenKind::QuotedIdent)
}

fn push_unique(into: &mut Vec<String>, value: String) {
    if !into.contains(&value) {
        into.push(value);
    }
}
