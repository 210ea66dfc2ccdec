//! Types shared by the ledger state machines

use crate::address::ResolveError;
use crate::utils::decimal;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Transaction status that ledgers replay; anything else is ignored.
pub const STATUS_OK: &str = "Ok";

/// A value movement extracted from a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTransaction {
	pub tx_from: String,
	pub tx_to: String,
	/// `None` when the invocation carried no value field.
	#[serde(with = "decimal::option")]
	pub amount: Option<BigInt>,
	pub status: String,
	pub tipset_cid: String,
	/// Method name, or `Fee` for gas paid by a top-level message.
	pub tx_type: String,
	pub method: u64,
	/// Raw CBOR parameters, when present.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Vec<u8>>,
}

impl ParsedTransaction {
	pub fn is_ok(&self) -> bool {
		self.status == STATUS_OK
	}
}

/// Multisig operations replayed by the multisig ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultisigActionType {
	Constructor,
	AddSigner,
	SwapSigner,
	RemoveSigner,
	LockBalance,
}

/// A multisig state change with its JSON-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigEvent {
	/// Address of the multisig actor the event belongs to, as it appeared in the trace.
	pub multisig_address: String,
	pub action_type: MultisigActionType,
	pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConstructorPayload {
	pub signers: Vec<String>,
	pub num_approvals_threshold: u64,
	pub locked_balance: String,
	pub unlock_duration: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddSignerPayload {
	pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwapSignerPayload {
	pub from: String,
	pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoveSignerPayload {
	pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockBalancePayload {
	pub amount: String,
	pub start_epoch: i64,
	pub unlock_duration: i64,
}

/// Ledger replay errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Failed to parse {action:?}({payload}): {message}")]
	PayloadError {
		action: MultisigActionType,
		payload: String,
		message: String,
	},

	#[error("Failed to get equivalent addresses for {signer}: {source}")]
	ResolutionError {
		signer: String,
		#[source]
		source: ResolveError,
	},
}
