//! Diffs replayed ledger state against the node.
//!
//! Authoritative state is read at the tipset following the replayed height, since a height's
//! messages are only reflected in the state of the next tipset.

use super::context::AuditContext;
use super::types::{CheckError, Mismatch};
use crate::address::{AddressSet, EquivalenceLookup};
use crate::chain::{ChainError, TipSet};
use crate::ledger::{BalanceLedgerState, MultisigEvent, MultisigLedgerState, ParsedTransaction};
use fvm_shared::address::Address;
use num_bigint::BigInt;
use num_traits::Signed;
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

/// A watched actor together with its replayed state.
#[derive(Debug, Clone)]
pub struct WatchedAccount<S> {
	/// Address as configured.
	pub address: String,
	pub parsed: Address,
	/// Equivalence set of `address`.
	pub watched: AddressSet,
	pub state: S,
}

/// Ledger input for one height.
#[derive(Debug, Clone)]
pub struct HeightData {
	pub height: i64,
	pub tipset: TipSet,
	pub next_tipset: TipSet,
	pub transactions: Vec<ParsedTransaction>,
	pub events: Vec<MultisigEvent>,
}

/// Multisig fields read back from `StateReadState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainMultisig {
	pub signers: Vec<String>,
	pub locked_balance: BigInt,
	pub unlock_duration: i64,
}

pub struct ReconciliationComparator<'a> {
	ctx: &'a AuditContext,
}

impl<'a> ReconciliationComparator<'a> {
	pub fn new(ctx: &'a AuditContext) -> Self {
		Self { ctx }
	}

	/// Replay `data` into the balance ledger and compare with the actor balance.
	///
	/// A negative replayed balance fails before the node is queried.
	pub async fn reconcile_balance(
		&self,
		account: &mut WatchedAccount<BalanceLedgerState>,
		data: &HeightData,
	) -> Result<(), CheckError> {
		account.state.apply(data.height, &account.watched, &data.transactions);

		let parsed = account.state.parsed_balance();
		if parsed.is_negative() {
			return Err(Mismatch::NegativeBalance {
				address: account.parsed.to_string(),
				parsed,
			}
			.into());
		}

		let key = data.next_tipset.key();
		let actor = self
			.ctx
			.call("get_actor", self.ctx.chain.get_actor(&account.parsed, &key))
			.await?;

		if actor.balance != parsed {
			return Err(Mismatch::BalanceMismatch {
				address: account.parsed.to_string(),
				on_chain: actor.balance,
				parsed,
			}
			.into());
		}

		debug!(address = %account.address, height = data.height, balance = %parsed, "Balance matches");
		Ok(())
	}

	/// Replay the events addressed to this multisig and compare with its on-chain state.
	pub async fn reconcile_multisig(
		&self,
		account: &mut WatchedAccount<MultisigLedgerState>,
		data: &HeightData,
	) -> Result<(), CheckError> {
		let events: Vec<MultisigEvent> = data
			.events
			.iter()
			.filter(|e| account.watched.contains(&e.multisig_address))
			.cloned()
			.collect();

		let resolver = &self.ctx.resolver;
		self.ctx
			.call("apply_multisig_events", account.state.apply(data.height, &events, resolver))
			.await?;

		let key = data.next_tipset.key();
		let actor_state = self
			.ctx
			.call("read_state", self.ctx.chain.read_state(&account.parsed, &key))
			.await?;
		let on_chain = decode_multisig_state(&actor_state.state)?;

		let height = data.next_tipset.height;
		let local = &account.state;

		if local.signers.len() != on_chain.signers.len() {
			return Err(Mismatch::SignerCountMismatch {
				address: account.address.clone(),
				height,
				on_chain: on_chain.signers.len(),
				parsed: local.signers.len(),
			}
			.into());
		}

		let mut known = AddressSet::new();
		for signer in &on_chain.signers {
			known.insert(signer.clone());
			let equivalents = self.ctx.call("resolve_signer", resolver.equivalents(signer)).await?;
			known.extend(equivalents);
		}

		if local.signers.iter().any(|s| !known.contains(s)) {
			let on_chain_forms: BTreeSet<&String> = known.iter().collect();
			return Err(Mismatch::SignerMismatch {
				address: account.address.clone(),
				height,
				on_chain: format!("{:?}", on_chain_forms),
				parsed: format!("{:?}", local.signers),
			}
			.into());
		}

		let local_locked = if local.locked_balance.is_empty() {
			"0"
		} else {
			local.locked_balance.as_str()
		};
		let on_chain_locked = on_chain.locked_balance.to_string();
		if local_locked != on_chain_locked {
			return Err(Mismatch::LockedBalanceMismatch {
				address: account.address.clone(),
				height,
				on_chain: on_chain_locked,
				parsed: local_locked.to_string(),
			}
			.into());
		}

		if local.unlock_duration != on_chain.unlock_duration {
			return Err(Mismatch::UnlockDurationMismatch {
				address: account.address.clone(),
				height,
				on_chain: on_chain.unlock_duration,
				parsed: local.unlock_duration,
			}
			.into());
		}

		debug!(address = %account.address, height = data.height, "Multisig state matches");
		Ok(())
	}
}

/// Read `Signers`, `InitialBalance` and `UnlockDuration` from a multisig state document.
pub fn decode_multisig_state(state: &Value) -> Result<OnChainMultisig, CheckError> {
	let invalid = |field: &'static str| {
		CheckError::ChainError(ChainError::InvalidResponse {
			field,
			value: state.get(field).map(Value::to_string).unwrap_or_default(),
		})
	};

	let unlock_duration = state
		.get("UnlockDuration")
		.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
		.ok_or_else(|| invalid("UnlockDuration"))?;

	let signers = state
		.get("Signers")
		.and_then(Value::as_array)
		.ok_or_else(|| invalid("Signers"))?
		.iter()
		.map(|s| s.as_str().map(str::to_string))
		.collect::<Option<Vec<_>>>()
		.ok_or_else(|| invalid("Signers"))?;

	let locked_balance = state
		.get("InitialBalance")
		.and_then(Value::as_str)
		.and_then(|s| BigInt::from_str(s).ok())
		.ok_or_else(|| invalid("InitialBalance"))?;

	Ok(OnChainMultisig {
		signers,
		locked_balance,
		unlock_duration,
	})
}
