use crate::address::ResolveError;
use crate::chain::ChainError;
use crate::checkpoint::{CheckpointError, ProgressRecord, address_height_key};
use crate::ledger::LedgerError;
use crate::provider::ProviderError;
use crate::trace::TraceError;
use num_bigint::BigInt;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

/// One unit of audit work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckUnit {
	Height(i64),
	AddressHeight { address: String, height: i64 },
}

impl CheckUnit {
	pub fn height(&self) -> i64 {
		match self {
			CheckUnit::Height(height) => *height,
			CheckUnit::AddressHeight { height, .. } => *height,
		}
	}

	/// Key under which the unit's own verdict is recorded.
	pub fn progress_key(&self) -> String {
		match self {
			CheckUnit::Height(height) => height.to_string(),
			CheckUnit::AddressHeight { address, height } => address_height_key(address, *height),
		}
	}
}

impl fmt::Display for CheckUnit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CheckUnit::Height(height) => write!(f, "height {}", height),
			CheckUnit::AddressHeight { address, height } => write!(f, "{} at height {}", address, height),
		}
	}
}

/// Verdicts and snapshots produced by one unit, persisted by the driver once the unit is done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitReport {
	pub records: Vec<(String, ProgressRecord)>,
	pub snapshots: Vec<(String, Value)>,
}

impl UnitReport {
	/// A unit with nothing to check; nothing is recorded.
	pub fn skipped() -> Self {
		Self::default()
	}

	pub fn is_skipped(&self) -> bool {
		self.records.is_empty() && self.snapshots.is_empty()
	}

	pub fn record(&mut self, key: String, outcome: Result<(), CheckError>) {
		let record = match outcome {
			Ok(()) => ProgressRecord::ok(),
			Err(e) => ProgressRecord::failed(e.to_string()),
		};
		self.records.push((key, record));
	}

	pub fn snapshot<S: Serialize>(&mut self, address: &str, state: &S) -> Result<(), CheckError> {
		let value = serde_json::to_value(state).map_err(CheckpointError::from)?;
		self.snapshots.push((address.to_string(), value));
		Ok(())
	}

	pub fn failures(&self) -> usize {
		self.records.iter().filter(|(_, r)| !r.success).count()
	}
}

/// Replayed state disagreeing with the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mismatch {
	#[error("negative balance for {address}: parsed={parsed}")]
	NegativeBalance { address: String, parsed: BigInt },

	#[error("balance mismatch for {address}: onchain={on_chain}, parsed={parsed}")]
	BalanceMismatch {
		address: String,
		on_chain: BigInt,
		parsed: BigInt,
	},

	#[error("multisig signers mismatch for {address} at height: {height}: onchain={on_chain}, parsed={parsed}")]
	SignerCountMismatch {
		address: String,
		height: i64,
		on_chain: usize,
		parsed: usize,
	},

	#[error("multisig signer mismatch for {address} at height: {height}: onchain={on_chain}, parsed={parsed}")]
	SignerMismatch {
		address: String,
		height: i64,
		on_chain: String,
		parsed: String,
	},

	#[error("multisig locked balance mismatch for {address} at height: {height}: onchain={on_chain}, parsed={parsed}")]
	LockedBalanceMismatch {
		address: String,
		height: i64,
		on_chain: String,
		parsed: String,
	},

	#[error("multisig unlock duration mismatch for {address} at height: {height}: onchain={on_chain}, parsed={parsed}")]
	UnlockDurationMismatch {
		address: String,
		height: i64,
		on_chain: i64,
		parsed: i64,
	},

	#[error("miner mismatch at height {height}: {detail}")]
	MinerMismatch { height: i64, detail: String },

	#[error("null block mismatch at height {height}: trace null={trace_null}, tipset null={tipset_null}")]
	NullBlockMismatch {
		height: i64,
		trace_null: bool,
		tipset_null: bool,
	},
}

/// Errors of a check unit or run
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
	#[error("Invalid input: {0}")]
	InputError(String),

	#[error("Chain error: {0}")]
	ChainError(#[from] ChainError),

	#[error("Trace error: {0}")]
	TraceError(#[from] TraceError),

	#[error("Resolution error: {0}")]
	ResolveError(#[from] ResolveError),

	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Provider error: {0}")]
	ProviderError(#[from] ProviderError),

	#[error("Checkpoint error: {0}")]
	CheckpointError(#[from] CheckpointError),

	#[error(transparent)]
	Mismatch(#[from] Mismatch),

	#[error("{call} timed out after {timeout:?}")]
	Timeout { call: &'static str, timeout: Duration },

	#[error("Run cancelled")]
	Cancelled,
}

impl CheckError {
	/// Errors that end the run instead of failing a single unit.
	pub fn is_fatal(&self) -> bool {
		matches!(self, CheckError::Cancelled | CheckError::CheckpointError(_))
	}
}

/// Inclusive height range of a sequential scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightRange {
	pub start: i64,
	pub end: i64,
}

impl HeightRange {
	pub fn new(start: i64, end: i64) -> Result<Self, CheckError> {
		if end < start {
			return Err(CheckError::InputError(format!(
				"end height {} is less than start height {}",
				end, start
			)));
		}
		Ok(Self { start, end })
	}

	/// Height units from `from` (clamped to the range start) through the range end.
	pub fn units_from(&self, from: i64) -> UnitPlan {
		UnitPlan::Heights {
			start: from.max(self.start),
			end: self.end,
		}
	}
}

/// Units a check visits, in processing order.
///
/// Height scans stay a pair of bounds and are expanded lazily; only provider-driven
/// address units are materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitPlan {
	/// Every height from `start` through `end`; empty when `start > end`.
	Heights { start: i64, end: i64 },
	Units(Vec<CheckUnit>),
}

impl UnitPlan {
	pub fn len(&self) -> usize {
		match self {
			UnitPlan::Heights { start, end } if start <= end => (end - start) as usize + 1,
			UnitPlan::Heights { .. } => 0,
			UnitPlan::Units(units) => units.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn first(&self) -> Option<CheckUnit> {
		match self {
			UnitPlan::Heights { start, end } if start <= end => Some(CheckUnit::Height(*start)),
			UnitPlan::Heights { .. } => None,
			UnitPlan::Units(units) => units.first().cloned(),
		}
	}
}

impl IntoIterator for UnitPlan {
	type Item = CheckUnit;
	type IntoIter = UnitIter;

	fn into_iter(self) -> UnitIter {
		match self {
			UnitPlan::Heights { start, end } => UnitIter::Heights(start..=end),
			UnitPlan::Units(units) => UnitIter::Units(units.into_iter()),
		}
	}
}

pub enum UnitIter {
	Heights(RangeInclusive<i64>),
	Units(std::vec::IntoIter<CheckUnit>),
}

impl Iterator for UnitIter {
	type Item = CheckUnit;

	fn next(&mut self) -> Option<CheckUnit> {
		match self {
			UnitIter::Heights(heights) => heights.next().map(CheckUnit::Height),
			UnitIter::Units(units) => units.next(),
		}
	}
}
