//! Turning polled events into a size-bounded batch of output rows.

use std::collections::HashSet;
use std::io;

use chrono::{DateTime, Utc};
use deadlock_types::{DeadlockEvent, OutputRow, ParsedGraph, QuerySignature};
use tracing::{debug, warn};

use crate::obfuscate::{Normalized, Obfuscator};
use crate::parse::{parse, parse_redacted};

/// Bytes taken by the enclosing `[` `]` of the batch array.
const ARRAY_OVERHEAD: usize = 2;

/// The rows accepted for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    /// Accepted rows, in input order.
    pub rows: Vec<OutputRow>,

    /// Events left out because the batch was full. Always a suffix of the input.
    pub deferred: usize,

    /// Accepted rows that carry a parse error marker.
    pub parse_errors: usize,

    /// Serialized size of `rows` as a JSON array.
    pub total_bytes: usize,
}

impl Assembly {
    /// Timestamp of the last accepted row.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.last().map(|row| row.timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds output rows from raw events.
///
/// ```rust
/// use chrono::Utc;
/// use deadlock_graph::Assembler;
/// use deadlock_types::DeadlockEvent;
///
/// let assembler = Assembler::default();
/// let events = vec![DeadlockEvent::new(
///     Utc::now(),
///     "<deadlock><process-list/><resource-list/></deadlock>",
/// )];
///
/// let assembly = assembler.assemble(&events, 19_000_000);
/// assert_eq!(assembly.rows.len(), 1);
/// assert_eq!(assembly.deferred, 0);
/// ```
#[derive(Debug, Clone)]
pub struct Assembler {
    obfuscator: Obfuscator,
    redact_xml: bool,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(Obfuscator::default())
    }
}

impl Assembler {
    /// An assembler that redacts SQL text in emitted documents.
    pub fn new(obfuscator: Obfuscator) -> Self {
        Self {
            obfuscator,
            redact_xml: true,
        }
    }

    /// Emit documents as captured instead of redacting the SQL inside them.
    /// Query signatures are redacted either way.
    pub fn with_redaction(mut self, redact_xml: bool) -> Self {
        self.redact_xml = redact_xml;
        self
    }

    /// Build rows for `events` until the serialized batch would exceed
    /// `max_bytes`.
    ///
    /// The batch is measured as a JSON array: two bytes of brackets, each
    /// row, and one comma between rows. The row that would overflow the
    /// bound and every row after it are deferred, never truncated. The first
    /// row is always accepted so a single oversized deadlock cannot stall
    /// collection.
    pub fn assemble(&self, events: &[DeadlockEvent], max_bytes: usize) -> Assembly {
        let mut assembly = Assembly {
            total_bytes: ARRAY_OVERHEAD,
            ..Default::default()
        };

        for (i, event) in events.iter().enumerate() {
            let row = self.build_row(event);
            let size = serialized_size(&row);
            let separator = usize::from(!assembly.rows.is_empty());
            let after = assembly.total_bytes + separator + size;

            if !assembly.rows.is_empty() && after > max_bytes {
                assembly.deferred = events.len() - i;
                warn!(
                    accepted = assembly.rows.len(),
                    deferred = assembly.deferred,
                    bytes = assembly.total_bytes,
                    max_bytes,
                    first_deferred = %event.event_timestamp,
                    "Payload size limit reached, deferring remaining deadlocks"
                );
                break;
            }

            if after > max_bytes {
                warn!(
                    bytes = size,
                    max_bytes,
                    timestamp = %event.event_timestamp,
                    "Single deadlock exceeds payload limit, emitting alone"
                );
            }

            assembly.total_bytes = after;
            if row.is_error() {
                assembly.parse_errors += 1;
            }
            assembly.rows.push(row);
        }

        debug!(
            rows = assembly.rows.len(),
            deferred = assembly.deferred,
            parse_errors = assembly.parse_errors,
            bytes = assembly.total_bytes,
            "Assembled deadlock batch"
        );
        assembly
    }

    /// Build the row for a single event. A document that fails to parse
    /// becomes an error row; its raw text is logged here and nowhere else.
    pub fn build_row(&self, event: &DeadlockEvent) -> OutputRow {
        let result = if self.redact_xml {
            parse_redacted(&event.raw_xml, &self.obfuscator)
        } else {
            parse(&event.raw_xml).map(|graph| (graph, event.raw_xml.clone()))
        };

        match result {
            Ok((graph, xml)) => {
                OutputRow::parsed(event.event_timestamp, xml, self.signatures(&graph))
            }
            Err(err) => {
                warn!(
                    timestamp = %event.event_timestamp,
                    error = %err,
                    raw_xml = %err.raw_xml(),
                    "Failed to parse deadlock graph"
                );
                OutputRow::failed(event.event_timestamp, err.to_string())
            }
        }
    }

    /// One signature per distinct session, first process wins.
    pub fn signatures(&self, graph: &ParsedGraph) -> Vec<QuerySignature> {
        let mut seen = HashSet::new();
        graph
            .processes
            .iter()
            .filter(|p| seen.insert(p.session_id))
            .map(|p| {
                if p.has_input_buffer() {
                    self.obfuscator.signature(p.session_id, &p.input_buffer_text)
                } else {
                    Normalized::empty().into_signature(p.session_id)
                }
            })
            .collect()
    }
}

/// Length of a row's JSON encoding.
pub fn serialized_size(row: &OutputRow) -> usize {
    let mut counter = ByteCounter(0);
    if let Err(err) = serde_json::to_writer(&mut counter, row) {
        debug!(error = %err, "Failed to measure row size");
    }
    counter.0
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
