//! Extraction of transactions and multisig events from filtered traces.
//!
//! `TraceParser` is the seam between trace retrieval and the ledgers. `InvocationParser` is the
//! built-in implementation: one transaction per invocation, one `Fee` transaction per top-level
//! message that paid gas, and multisig events decoded from the CBOR parameters of multisig
//! methods.

use super::types::{ExecutionTraceNode, TraceError};
use crate::chain::{TipSet, TipSetKey};
use crate::ledger::types::*;
use base64::{Engine, engine::general_purpose::STANDARD as B64};
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use num_bigint::BigInt;
use num_traits::Zero;
use serde::Serialize;
use tracing::debug;

/// Receiver of gas fees in `Fee` transactions.
pub const BURNT_FUNDS_ACTOR: &str = "f099";
/// Init actor; the only legitimate caller of a multisig constructor.
pub const INIT_ACTOR: &str = "f01";

const METHOD_SEND: u64 = 0;
const METHOD_CONSTRUCTOR: u64 = 1;
const METHOD_ADD_SIGNER: u64 = 5;
const METHOD_REMOVE_SIGNER: u64 = 6;
const METHOD_SWAP_SIGNER: u64 = 7;
const METHOD_LOCK_BALANCE: u64 = 9;

/// Turns filtered traces into ledger input.
#[async_trait::async_trait]
pub trait TraceParser: Send + Sync {
	async fn parse_transactions(
		&self,
		traces: &[ExecutionTraceNode],
		tipset: &TipSet,
	) -> Result<Vec<ParsedTransaction>, TraceError>;

	async fn parse_multisig_events(
		&self,
		transactions: &[ParsedTransaction],
		tipset_id: &str,
		tipset_key: &TipSetKey,
	) -> Result<Vec<MultisigEvent>, TraceError>;
}

/// Built-in parser working directly on trace nodes.
#[derive(Debug, Default, Clone)]
pub struct InvocationParser;

impl InvocationParser {
	pub fn new() -> Self {
		Self
	}

	fn invocation_tx(node: &ExecutionTraceNode, tipset_cid: &str) -> Result<Option<ParsedTransaction>, TraceError> {
		let Some(msg) = &node.message else {
			return Ok(None);
		};

		let amount = msg.value.as_deref().map(parse_amount).transpose()?;
		let params = msg
			.params
			.as_deref()
			.filter(|p| !p.is_empty())
			.map(|p| {
				B64.decode(p)
					.map_err(|e| TraceError::ParseError(format!("Failed to decode params: {}", e)))
			})
			.transpose()?;

		Ok(Some(ParsedTransaction {
			tx_from: msg.from.clone(),
			tx_to: msg.to.clone(),
			amount,
			status: if node.is_error() { "Error" } else { STATUS_OK }.to_string(),
			tipset_cid: tipset_cid.to_string(),
			tx_type: if msg.method == METHOD_SEND { "Send" } else { "Invoke" }.to_string(),
			method: msg.method,
			params,
		}))
	}

	fn fee_tx(root: &ExecutionTraceNode, tipset_cid: &str) -> Result<Option<ParsedTransaction>, TraceError> {
		let (Some(msg), Some(cost)) = (
			&root.message,
			root.gas_cost.as_ref().and_then(|g| g.total_cost.as_deref()),
		) else {
			return Ok(None);
		};

		let fee = parse_amount(cost)?;
		if fee.is_zero() {
			return Ok(None);
		}

		Ok(Some(ParsedTransaction {
			tx_from: msg.from.clone(),
			tx_to: BURNT_FUNDS_ACTOR.to_string(),
			amount: Some(fee),
			status: STATUS_OK.to_string(),
			tipset_cid: tipset_cid.to_string(),
			tx_type: "Fee".to_string(),
			method: METHOD_SEND,
			params: None,
		}))
	}

	/// Decode the multisig event carried by a transaction, if any.
	fn multisig_event(tx: &ParsedTransaction) -> Result<Option<MultisigEvent>, String> {
		let Some(params) = tx.params.as_deref() else {
			return Ok(None);
		};

		let (action_type, value) = match tx.method {
			METHOD_CONSTRUCTOR if tx.tx_from == INIT_ACTOR => {
				let (signers, threshold, unlock_duration) = decode_constructor(params)?;
				let locked_balance = if unlock_duration > 0 {
					tx.amount.clone().unwrap_or_default()
				} else {
					BigInt::zero()
				};
				(
					MultisigActionType::Constructor,
					encode(&ConstructorPayload {
						signers: signers.iter().map(Address::to_string).collect(),
						num_approvals_threshold: threshold,
						locked_balance: locked_balance.to_string(),
						unlock_duration,
					})?,
				)
			}
			METHOD_ADD_SIGNER => {
				let (signer, _increase): (Address, bool) = decode(params)?;
				(
					MultisigActionType::AddSigner,
					encode(&AddSignerPayload {
						signer: signer.to_string(),
					})?,
				)
			}
			METHOD_REMOVE_SIGNER => {
				let (signer, _decrease): (Address, bool) = decode(params)?;
				(
					MultisigActionType::RemoveSigner,
					encode(&RemoveSignerPayload {
						signer: signer.to_string(),
					})?,
				)
			}
			METHOD_SWAP_SIGNER => {
				let (from, to): (Address, Address) = decode(params)?;
				(
					MultisigActionType::SwapSigner,
					encode(&SwapSignerPayload {
						from: from.to_string(),
						to: to.to_string(),
					})?,
				)
			}
			METHOD_LOCK_BALANCE => {
				let (start_epoch, unlock_duration, amount): (ChainEpoch, ChainEpoch, TokenAmount) =
					decode(params)?;
				(
					MultisigActionType::LockBalance,
					encode(&LockBalancePayload {
						amount: amount.atto().to_string(),
						start_epoch,
						unlock_duration,
					})?,
				)
			}
			_ => return Ok(None),
		};

		Ok(Some(MultisigEvent {
			multisig_address: tx.tx_to.clone(),
			action_type,
			value,
		}))
	}
}

#[async_trait::async_trait]
impl TraceParser for InvocationParser {
	async fn parse_transactions(
		&self,
		traces: &[ExecutionTraceNode],
		tipset: &TipSet,
	) -> Result<Vec<ParsedTransaction>, TraceError> {
		let tipset_cid = tipset.key().tipset_id();
		let mut transactions = Vec::new();

		for root in traces {
			if let Some(fee) = Self::fee_tx(root, &tipset_cid)? {
				transactions.push(fee);
			}

			// pre-order, children in execution order
			let mut stack = vec![root];
			while let Some(node) = stack.pop() {
				if let Some(tx) = Self::invocation_tx(node, &tipset_cid)? {
					transactions.push(tx);
				}
				stack.extend(node.children.iter().rev());
			}
		}

		debug!(
			"Parsed {} transactions at height {}",
			transactions.len(),
			tipset.height
		);
		Ok(transactions)
	}

	async fn parse_multisig_events(
		&self,
		transactions: &[ParsedTransaction],
		tipset_id: &str,
		_tipset_key: &TipSetKey,
	) -> Result<Vec<MultisigEvent>, TraceError> {
		let mut events = Vec::new();
		for tx in transactions.iter().filter(|tx| tx.is_ok()) {
			match Self::multisig_event(tx) {
				Ok(Some(event)) => events.push(event),
				Ok(None) => {}
				// other actors reuse these method numbers
				Err(e) => debug!(
					"Skipping method {} call to {} in {}: {}",
					tx.method, tx.tx_to, tipset_id, e
				),
			}
		}
		Ok(events)
	}
}

fn parse_amount(raw: &str) -> Result<BigInt, TraceError> {
	raw.parse::<BigInt>()
		.map_err(|e| TraceError::ParseError(format!("Invalid amount {:?}: {}", raw, e)))
}

fn decode<'a, T: serde::Deserialize<'a>>(params: &'a [u8]) -> Result<T, String> {
	fvm_ipld_encoding::from_slice(params).map_err(|e| e.to_string())
}

/// Constructor parameters; actors before v3 omit the start epoch.
fn decode_constructor(params: &[u8]) -> Result<(Vec<Address>, u64, ChainEpoch), String> {
	if let Ok((signers, threshold, unlock_duration, _start_epoch)) =
		decode::<(Vec<Address>, u64, ChainEpoch, ChainEpoch)>(params)
	{
		return Ok((signers, threshold, unlock_duration));
	}
	decode::<(Vec<Address>, u64, ChainEpoch)>(params)
}

fn encode<T: Serialize>(payload: &T) -> Result<String, String> {
	serde_json::to_string(payload).map_err(|e| e.to_string())
}
