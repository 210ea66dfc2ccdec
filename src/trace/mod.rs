//! Execution traces: decoding, pruning and parsing.
//!
//! - `types`: the trace tree and its wire format.
//! - `filter`: pruning by watched address set, with the root policy chosen by trace schema.
//! - `source`: retrieval of raw trace documents by height.
//! - `parser`: conversion of filtered traces into transactions and multisig events.

pub mod filter;
pub mod parser;
pub mod source;
pub mod types;

pub use filter::{NV20_UPGRADE_HEIGHT, RootPolicy, TraceSchema, filter_trace};
pub use parser::{InvocationParser, TraceParser};
pub use source::{DirectoryTraceSource, TraceSource};
pub use types::*;
