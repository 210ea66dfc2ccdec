//! Types for compute-state trace documents

use crate::address::AddressSet;
use serde::{Deserialize, Serialize};

/// Message endpoints and call data of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceMessage {
	pub from: String,
	pub to: String,
	/// Attached value in atto units, as a decimal string.
	#[serde(default)]
	pub value: Option<String>,
	#[serde(default)]
	pub method: u64,
	/// Base64-encoded CBOR parameters.
	#[serde(default)]
	pub params: Option<String>,
}

/// Receipt of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceReceipt {
	pub exit_code: i64,
}

/// Gas accounting of a top-level message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GasCost {
	/// Total paid by the sender, as a decimal string.
	#[serde(default)]
	pub total_cost: Option<String>,
}

/// One node of an execution trace tree.
///
/// Roots correspond to top-level messages and are the only nodes carrying a gas cost.
/// Children are owned and ordered as executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTraceNode {
	pub message: Option<TraceMessage>,
	pub receipt: Option<TraceReceipt>,
	pub gas_cost: Option<GasCost>,
	pub children: Vec<ExecutionTraceNode>,
}

impl ExecutionTraceNode {
	/// A node without a receipt is not considered failed.
	pub fn is_error(&self) -> bool {
		self.receipt.as_ref().is_some_and(|r| r.exit_code != 0)
	}

	/// Whether the node's own sender or receiver is in the watched set.
	pub fn touches(&self, watched: &AddressSet) -> bool {
		self.message
			.as_ref()
			.is_some_and(|m| watched.contains(&m.from) || watched.contains(&m.to))
	}

	/// Total number of nodes in this subtree, including itself.
	pub fn size(&self) -> usize {
		1 + self.children.iter().map(ExecutionTraceNode::size).sum::<usize>()
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawExecutionTrace {
	#[serde(default)]
	msg: Option<TraceMessage>,
	#[serde(default)]
	msg_rct: Option<TraceReceipt>,
	#[serde(default)]
	subcalls: Option<Vec<RawExecutionTrace>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInvocResult {
	#[serde(default)]
	msg: Option<TraceMessage>,
	#[serde(default)]
	msg_rct: Option<TraceReceipt>,
	#[serde(default)]
	gas_cost: Option<GasCost>,
	#[serde(default)]
	execution_trace: Option<RawExecutionTrace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComputeStateOutput {
	#[serde(default)]
	trace: Option<Vec<RawInvocResult>>,
}

impl From<RawExecutionTrace> for ExecutionTraceNode {
	fn from(raw: RawExecutionTrace) -> Self {
		Self {
			message: raw.msg,
			receipt: raw.msg_rct,
			gas_cost: None,
			children: raw
				.subcalls
				.unwrap_or_default()
				.into_iter()
				.map(ExecutionTraceNode::from)
				.collect(),
		}
	}
}

impl From<RawInvocResult> for ExecutionTraceNode {
	fn from(raw: RawInvocResult) -> Self {
		let children = raw
			.execution_trace
			.and_then(|t| t.subcalls)
			.unwrap_or_default()
			.into_iter()
			.map(ExecutionTraceNode::from)
			.collect();
		Self {
			message: raw.msg,
			receipt: raw.msg_rct,
			gas_cost: raw.gas_cost,
			children,
		}
	}
}

/// Decode a compute-state document into its root invocations.
///
/// Both trace schemas share the field names read here. A `null` trace list decodes to no roots.
pub fn decode_trace(bytes: &[u8]) -> Result<Vec<ExecutionTraceNode>, TraceError> {
	let output: ComputeStateOutput = serde_json::from_slice(bytes)
		.map_err(|e| TraceError::DecodeError(format!("Failed to decode trace: {}", e)))?;
	Ok(output
		.trace
		.unwrap_or_default()
		.into_iter()
		.map(ExecutionTraceNode::from)
		.collect())
}

/// Trace retrieval and parsing errors
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
	#[error("Trace not found for height {0}")]
	NotFound(i64),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Trace decode error: {0}")]
	DecodeError(String),

	#[error("Trace parse error: {0}")]
	ParseError(String),
}
