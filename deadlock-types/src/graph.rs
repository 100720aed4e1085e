//! Structured view of a deadlock graph.
//!
//! A graph has two halves: the sessions (processes) that took part in the
//! deadlock cycle, and the resources they were fighting over. The two are
//! related by session id: a resource lists which sessions own it and which
//! are waiting on it.

use std::collections::BTreeSet;

/// One session that took part in a deadlock.
///
/// Optional attributes that are missing from the document are represented
/// by their sentinel defaults (`0` or the empty string), never by a panic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessEntry {
    /// The engine's internal process id (e.g. `process1a2b3c`), used by the
    /// resource list to reference this process.
    pub process_id: String,

    /// Server process id of the session (`spid`).
    pub session_id: i32,

    /// How long the session had been waiting, in milliseconds.
    pub wait_time_ms: u64,

    /// Lock mode the session was requesting (e.g. `U`, `X`, `S`).
    pub lock_mode: String,

    /// Transaction isolation level, as reported (e.g. `read committed (2)`).
    pub isolation_level: String,

    /// The captured input buffer. Empty when absent or whitespace-only.
    pub input_buffer_text: String,

    /// The resource the session was waiting on (e.g. `KEY: 5:72057594043039744 (8194443284a0)`).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub wait_resource: String,

    /// Database id the session was using.
    #[cfg_attr(feature = "serde", serde(default))]
    pub database_id: u32,

    /// Name of the open transaction, if reported.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub transaction_name: String,

    /// Frames from the session's execution stack, innermost first.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub execution_frames: Vec<ExecutionFrame>,
}

impl ProcessEntry {
    /// Whether the session has any captured statement text.
    pub fn has_input_buffer(&self) -> bool {
        !self.input_buffer_text.is_empty()
    }
}

/// A single frame of a session's execution stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionFrame {
    /// Procedure name, or `adhoc` / `unknown` for ad-hoc batches.
    pub procname: String,

    /// Line number within the batch or procedure.
    pub line: u32,

    /// Hex handle of the cached SQL text.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub sql_handle: String,

    /// Statement text captured for the frame (trimmed, may be empty).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub text: String,
}

/// A contended resource and the sessions on either side of it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceEntry {
    /// Element name of the resource: `keylock`, `pagelock`, `objectlock`,
    /// `ridlock`, `exchangeEvent`, etc.
    pub resource_type: String,

    /// Fully qualified object name, when the resource has one.
    pub object_name: String,

    /// Index name for key and page locks.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub index_name: String,

    /// Database id the resource lives in.
    #[cfg_attr(feature = "serde", serde(default))]
    pub database_id: u32,

    /// Mode the resource is held in.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub mode: String,

    /// Sessions holding the resource.
    pub owner_session_ids: BTreeSet<i32>,

    /// Sessions blocked waiting for the resource.
    pub waiter_session_ids: BTreeSet<i32>,
}

impl ResourceEntry {
    /// Whether the given session owns or waits on this resource.
    pub fn involves(&self, session_id: i32) -> bool {
        self.owner_session_ids.contains(&session_id)
            || self.waiter_session_ids.contains(&session_id)
    }
}

/// The structured result of parsing one deadlock-graph document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedGraph {
    /// Processes in document order.
    pub processes: Vec<ProcessEntry>,

    /// Resources in document order.
    pub resources: Vec<ResourceEntry>,

    /// Sessions the engine chose as deadlock victims.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "BTreeSet::is_empty"))]
    pub victim_session_ids: BTreeSet<i32>,
}

impl ParsedGraph {
    /// Find the first process for a session.
    pub fn process(&self, session_id: i32) -> Option<&ProcessEntry> {
        self.processes.iter().find(|p| p.session_id == session_id)
    }

    /// Distinct session ids, in the order they first appear.
    pub fn session_ids(&self) -> Vec<i32> {
        let mut seen = BTreeSet::new();
        self.processes
            .iter()
            .map(|p| p.session_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Resources that the given session owns or waits on.
    pub fn resources_for(&self, session_id: i32) -> impl Iterator<Item = &ResourceEntry> {
        self.resources.iter().filter(move |r| r.involves(session_id))
    }

    /// Whether the graph is empty (no processes and no resources).
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty() && self.resources.is_empty()
    }
}
