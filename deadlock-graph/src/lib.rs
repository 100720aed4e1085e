//! # deadlock-graph
//!
//! The pure stages of deadlock collection: parsing deadlock-graph XML,
//! redacting the SQL captured inside it, and assembling a size-bounded batch
//! of output rows.
//!
//! Nothing in this crate performs I/O. Every function takes its input by
//! reference and returns owned output, so the stages can be tested and
//! benchmarked in isolation.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use deadlock_graph::{parse, Assembler};
//! use deadlock_types::DeadlockEvent;
//!
//! let xml = r#"<deadlock>
//!   <process-list>
//!     <process id="p1" spid="52"><inputbuf>UPDATE t SET b=b+10 WHERE a=1;</inputbuf></process>
//!     <process id="p2" spid="53"><inputbuf>UPDATE t SET b=b+10 WHERE a=2;</inputbuf></process>
//!   </process-list>
//!   <resource-list/>
//! </deadlock>"#;
//!
//! let graph = parse(xml).unwrap();
//! assert_eq!(graph.session_ids(), vec![52, 53]);
//!
//! let assembly = Assembler::default().assemble(&[DeadlockEvent::new(Utc::now(), xml)], 19_000_000);
//! let sigs = &assembly.rows[0].query_signatures;
//! assert_eq!(sigs[0].redacted_text, "UPDATE t SET b=b+? WHERE a=?;");
//! assert_eq!(sigs[0].normalized_hash, sigs[1].normalized_hash);
//! ```

pub mod assemble;
pub mod error;
pub mod obfuscate;
pub mod parse;

pub use assemble::{serialized_size, Assembler, Assembly};
pub use error::ParseError;
pub use obfuscate::{ObfuscationOptions, Obfuscator};
pub use parse::{parse, parse_redacted, redact_document};
