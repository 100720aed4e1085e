//! Deadlock-graph XML parsing.
//!
//! The engine reports a deadlock as an XML document. The ring buffer wraps
//! it in an extended-event envelope:
//!
//! ```xml
//! <event name="xml_deadlock_report" timestamp="2024-03-01T12:00:05.123Z">
//!   <data name="xml_report"><value>
//!     <deadlock>
//!       <victim-list><victimProcess id="process2"/></victim-list>
//!       <process-list>
//!         <process id="process1" spid="52" waittime="3000" lockMode="U" ...>
//!           <executionStack><frame procname="adhoc" line="1">...</frame></executionStack>
//!           <inputbuf>UPDATE t SET b=b+10 WHERE a=1;</inputbuf>
//!         </process>
//!         ...
//!       </process-list>
//!       <resource-list>
//!         <keylock objectname="db.dbo.t" indexname="PK_t" mode="X" ...>
//!           <owner-list><owner id="process2"/></owner-list>
//!           <waiter-list><waiter id="process1"/></waiter-list>
//!         </keylock>
//!       </resource-list>
//!     </deadlock>
//!   </value></data>
//! </event>
//! ```
//!
//! [`parse`] finds the first `<deadlock>` wherever it sits and returns a
//! [`ParsedGraph`]. [`redact_document`] rewrites the captured SQL inside the
//! document so it can be shipped without literal values.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::str::FromStr;

use deadlock_types::{ExecutionFrame, ParsedGraph, ProcessEntry, ResourceEntry};
use roxmltree::{Document, Node};

use crate::obfuscate::Obfuscator;
use crate::ParseError;

/// Parse one deadlock-graph document.
///
/// # Errors
///
/// - [`ParseError::Malformed`] if the text is not well-formed XML.
/// - [`ParseError::MissingElement`] if there is no `<deadlock>`, or it lacks
///   `<process-list>` or `<resource-list>`.
/// - [`ParseError::InvalidAttribute`] if a process has no numeric `spid`.
pub fn parse(raw_xml: &str) -> Result<ParsedGraph, ParseError> {
    let doc = Document::parse(raw_xml).map_err(|e| ParseError::malformed(e, raw_xml))?;
    graph_from(&doc, raw_xml)
}

/// Replace the text of every `<inputbuf>` and execution-stack `<frame>` with
/// its obfuscated form. All other bytes of the document are kept.
pub fn redact_document(raw_xml: &str, obfuscator: &Obfuscator) -> Result<String, ParseError> {
    let doc = Document::parse(raw_xml).map_err(|e| ParseError::malformed(e, raw_xml))?;
    let deadlock = find_deadlock(&doc, raw_xml)?;
    Ok(redact(deadlock, raw_xml, obfuscator))
}

/// [`parse`] and [`redact_document`] over a single XML parse.
pub fn parse_redacted(
    raw_xml: &str,
    obfuscator: &Obfuscator,
) -> Result<(ParsedGraph, String), ParseError> {
    let doc = Document::parse(raw_xml).map_err(|e| ParseError::malformed(e, raw_xml))?;
    let graph = graph_from(&doc, raw_xml)?;
    let deadlock = find_deadlock(&doc, raw_xml)?;
    Ok((graph, redact(deadlock, raw_xml, obfuscator)))
}

fn find_deadlock<'a, 'input>(
    doc: &'a Document<'input>,
    raw_xml: &str,
) -> Result<Node<'a, 'input>, ParseError> {
    doc.descendants()
        .find(|n| n.has_tag_name("deadlock"))
        .ok_or_else(|| ParseError::missing("deadlock", raw_xml))
}

fn graph_from(doc: &Document<'_>, raw_xml: &str) -> Result<ParsedGraph, ParseError> {
    let deadlock = find_deadlock(doc, raw_xml)?;
    let process_list =
        child(deadlock, "process-list").ok_or_else(|| ParseError::missing("process-list", raw_xml))?;
    let resource_list = child(deadlock, "resource-list")
        .ok_or_else(|| ParseError::missing("resource-list", raw_xml))?;

    let processes = process_list
        .children()
        .filter(|n| n.has_tag_name("process"))
        .map(|n| parse_process(n, raw_xml))
        .collect::<Result<Vec<_>, _>>()?;

    let sessions: HashMap<&str, i32> = processes
        .iter()
        .map(|p| (p.process_id.as_str(), p.session_id))
        .collect();

    let resources = resource_list
        .children()
        .filter(Node::is_element)
        .map(|n| parse_resource(n, &sessions))
        .collect();

    let mut victim_session_ids: BTreeSet<i32> = child(deadlock, "victim-list")
        .map(|list| {
            list.children()
                .filter(|n| n.has_tag_name("victimProcess"))
                .filter_map(|n| n.attribute("id"))
                .filter_map(|id| sessions.get(id).copied())
                .collect()
        })
        .unwrap_or_default();

    // Older reports name the victim on the root element instead.
    if let Some(id) = deadlock.attribute("victim") {
        victim_session_ids.extend(sessions.get(id).copied());
    }

    Ok(ParsedGraph {
        processes,
        resources,
        victim_session_ids,
    })
}

fn parse_process(node: Node<'_, '_>, raw_xml: &str) -> Result<ProcessEntry, ParseError> {
    let spid = node.attribute("spid").unwrap_or_default();
    let session_id = spid
        .trim()
        .parse::<i32>()
        .map_err(|_| ParseError::InvalidAttribute {
            element: "process",
            attribute: "spid",
            value: spid.to_string(),
            raw_xml: raw_xml.to_string(),
        })?;

    let execution_frames = child(node, "executionStack")
        .map(|stack| {
            stack
                .children()
                .filter(|n| n.has_tag_name("frame"))
                .map(|frame| ExecutionFrame {
                    procname: attr(frame, "procname"),
                    line: number(frame, "line"),
                    sql_handle: attr(frame, "sqlhandle"),
                    text: text_content(frame),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ProcessEntry {
        process_id: attr(node, "id"),
        session_id,
        wait_time_ms: number(node, "waittime"),
        lock_mode: attr(node, "lockMode"),
        isolation_level: attr(node, "isolationlevel"),
        input_buffer_text: child(node, "inputbuf").map(text_content).unwrap_or_default(),
        wait_resource: attr(node, "waitresource"),
        database_id: number(node, "currentdb"),
        transaction_name: attr(node, "transactionname"),
        execution_frames,
    })
}

fn parse_resource(node: Node<'_, '_>, sessions: &HashMap<&str, i32>) -> ResourceEntry {
    ResourceEntry {
        resource_type: node.tag_name().name().to_string(),
        object_name: attr(node, "objectname"),
        index_name: attr(node, "indexname"),
        database_id: number(node, "dbid"),
        mode: attr(node, "mode"),
        owner_session_ids: party(node, "owner-list", "owner", sessions),
        waiter_session_ids: party(node, "waiter-list", "waiter", sessions),
    }
}

/// Session ids referenced from `<list><item id="process..."/></list>`.
/// References to processes that are not in the process list are skipped.
fn party(
    node: Node<'_, '_>,
    list: &str,
    item: &str,
    sessions: &HashMap<&str, i32>,
) -> BTreeSet<i32> {
    child(node, list)
        .map(|list| {
            list.children()
                .filter(|n| n.has_tag_name(item))
                .filter_map(|n| n.attribute("id"))
                .filter_map(|id| sessions.get(id).copied())
                .collect()
        })
        .unwrap_or_default()
}

fn redact(deadlock: Node<'_, '_>, raw_xml: &str, obfuscator: &Obfuscator) -> String {
    let mut edits: Vec<(Range<usize>, String)> = deadlock
        .descendants()
        .filter(|n| is_sql_text_element(*n))
        .filter_map(|n| {
            let text = text_content(n);
            if text.is_empty() {
                return None;
            }
            let range = content_range(n, raw_xml)?;
            Some((range, escape_text(&obfuscator.normalize(&text).redacted_text)))
        })
        .collect();
    edits.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(raw_xml.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        out.push_str(&raw_xml[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&raw_xml[cursor..]);
    out
}

fn is_sql_text_element(node: Node<'_, '_>) -> bool {
    node.has_tag_name("inputbuf")
        || (node.has_tag_name("frame")
            && node
                .parent_element()
                .is_some_and(|p| p.has_tag_name("executionStack")))
}

/// Byte range of an element's content, between its start and end tags.
fn content_range(node: Node<'_, '_>, raw_xml: &str) -> Option<Range<usize>> {
    let first = node.first_child()?;
    let outer = node.range();
    let close = raw_xml.get(outer.clone())?.rfind("</")?;
    let start = first.range().start;
    let end = outer.start + close;
    (start <= end).then_some(start..end)
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn attr(node: Node<'_, '_>, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

fn number<T: FromStr + Default>(node: Node<'_, '_>, name: &str) -> T {
    node.attribute(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}

/// All text below `node`, trimmed. Whitespace-only content is empty.
fn text_content(node: Node<'_, '_>) -> String {
    let text: String = node
        .descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    text.trim().to_string()
}
