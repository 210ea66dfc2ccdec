//! Running balance of one watched actor.
//!
//! Received and sent totals are tracked separately and stay `None` until the first transfer in
//! that direction, so a snapshot distinguishes "never received" from "received zero".

use super::types::ParsedTransaction;
use crate::address::AddressSet;
use crate::checkpoint::Checkpointed;
use crate::utils::decimal;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceLedgerState {
	/// Last height at which a transaction touched the actor.
	pub height: i64,
	#[serde(default, with = "decimal::option")]
	pub received: Option<BigInt>,
	#[serde(default, with = "decimal::option")]
	pub sent: Option<BigInt>,
}

impl BalanceLedgerState {
	/// Replay the transactions of one height.
	///
	/// Only `Ok` transactions count. A transfer into the watched set without an amount does not
	/// create the received total; a transfer out of it counts a missing amount as zero.
	pub fn apply(&mut self, height: i64, watched: &AddressSet, transactions: &[ParsedTransaction]) {
		for tx in transactions.iter().filter(|tx| tx.is_ok()) {
			let to_watched = watched.contains(&tx.tx_to);
			let from_watched = watched.contains(&tx.tx_from);
			if to_watched || from_watched {
				self.height = height;
			}

			if to_watched {
				if let Some(amount) = &tx.amount {
					add_to(&mut self.received, amount.clone());
				}
			}

			if from_watched {
				let total = tx.amount.clone().unwrap_or_default();
				add_to(&mut self.sent, total);
			}
		}
	}

	/// `received − sent`, with unset totals read as zero.
	pub fn parsed_balance(&self) -> BigInt {
		let received = self.received.clone().unwrap_or_default();
		let sent = self.sent.clone().unwrap_or_default();
		received - sent
	}
}

fn add_to(total: &mut Option<BigInt>, amount: BigInt) {
	*total = Some(match total.take() {
		Some(current) => current + amount,
		None => amount,
	});
}

impl Checkpointed for BalanceLedgerState {
	fn height(&self) -> i64 {
		self.height
	}
}
