//! Replayed configuration of one multisig actor.
//!
//! Signer removal and swaps compare signers through the address-equivalence lookup, since the
//! event may name a signer by a different address form than the one stored.

use super::types::*;
use crate::address::EquivalenceLookup;
use crate::checkpoint::Checkpointed;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultisigLedgerState {
	#[serde(default)]
	pub height: i64,
	/// Ordered signer list; duplicates are kept.
	#[serde(default)]
	pub signers: Vec<String>,
	/// Decimal string; empty until a constructor or lock event sets it.
	#[serde(default)]
	pub locked_balance: String,
	#[serde(default)]
	pub unlock_duration: i64,
}

impl MultisigLedgerState {
	/// Replay the events of one height, in order.
	///
	/// The batch is applied to a copy and committed only when every event succeeded, so a
	/// failure leaves the state exactly as it was. The height is set even for an empty batch.
	pub async fn apply<L>(&mut self, height: i64, events: &[MultisigEvent], lookup: &L) -> Result<(), LedgerError>
	where
		L: EquivalenceLookup + ?Sized,
	{
		let mut next = self.clone();
		for event in events {
			next.apply_event(event, lookup).await?;
		}
		next.height = height;
		*self = next;
		Ok(())
	}

	async fn apply_event<L>(&mut self, event: &MultisigEvent, lookup: &L) -> Result<(), LedgerError>
	where
		L: EquivalenceLookup + ?Sized,
	{
		debug!(
			multisig = %event.multisig_address,
			action = ?event.action_type,
			"Applying multisig event"
		);

		match event.action_type {
			MultisigActionType::Constructor => {
				let payload: ConstructorPayload = decode(event)?;
				self.signers = payload.signers;
				self.locked_balance = payload.locked_balance;
				self.unlock_duration = payload.unlock_duration;
			}
			MultisigActionType::AddSigner => {
				let payload: AddSignerPayload = decode(event)?;
				self.signers.push(payload.signer);
			}
			MultisigActionType::SwapSigner => {
				let payload: SwapSignerPayload = decode(event)?;
				let replaced = resolve(lookup, &payload.from).await?;
				let mut signers = vec![payload.to];
				signers.extend(self.signers.drain(..).filter(|s| !replaced.contains(s)));
				self.signers = signers;
			}
			MultisigActionType::RemoveSigner => {
				let payload: RemoveSignerPayload = decode(event)?;
				let removed = resolve(lookup, &payload.signer).await?;
				self.signers.retain(|s| !removed.contains(s));
			}
			MultisigActionType::LockBalance => {
				let payload: LockBalancePayload = decode(event)?;
				self.locked_balance = payload.amount;
				self.unlock_duration = payload.unlock_duration;
			}
		}
		Ok(())
	}
}

fn decode<T: DeserializeOwned>(event: &MultisigEvent) -> Result<T, LedgerError> {
	serde_json::from_str(&event.value).map_err(|e| LedgerError::PayloadError {
		action: event.action_type,
		payload: event.value.clone(),
		message: e.to_string(),
	})
}

async fn resolve<L>(lookup: &L, signer: &str) -> Result<crate::address::AddressSet, LedgerError>
where
	L: EquivalenceLookup + ?Sized,
{
	lookup
		.equivalents(signer)
		.await
		.map_err(|source| LedgerError::ResolutionError {
			signer: signer.to_string(),
			source,
		})
}

impl Checkpointed for MultisigLedgerState {
	fn height(&self) -> i64 {
		self.height
	}
}
