//! Equivalent-address resolution.
//!
//! One actor can be named by several addresses: its numeric ID (`f0…`), a robust key or actor
//! address (`f1…`/`f2…`/`f3…`) and, for EVM-addressable actors, a delegated form (`f4…`).
//! Traces and parsed transactions use whichever form the sender chose, so every membership test
//! against a watched actor goes through the full set returned by `EquivalentAddressResolver`.

use crate::chain::{ChainError, ChainStateReader, TipSetKey};
use fvm_shared::address::{Address, Protocol};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Every string form known to denote one actor.
pub type AddressSet = HashSet<String>;

/// Address resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
	#[error("Invalid address {0:?}: {1}")]
	InvalidAddress(String, String),

	#[error("Failed to resolve {address}: {source}")]
	ChainError {
		address: String,
		#[source]
		source: ChainError,
	},
}

/// Parse an address string, accepting both network prefixes.
///
/// Addresses are normalized to the mainnet prefix so that `t0…` and `f0…` inputs compare equal.
pub fn parse_address(raw: &str) -> Result<Address, ResolveError> {
	let normalized = match raw.strip_prefix('t') {
		Some(rest) => format!("f{}", rest),
		None => raw.to_string(),
	};
	Address::from_str(&normalized).map_err(|e| ResolveError::InvalidAddress(raw.to_string(), e.to_string()))
}

/// Lookup of the equivalence set for an address given in string form.
///
/// The multisig ledger depends on this seam rather than on the resolver directly so that its
/// replay logic stays independent of the node.
#[async_trait::async_trait]
pub trait EquivalenceLookup: Send + Sync {
	async fn equivalents(&self, address: &str) -> Result<AddressSet, ResolveError>;
}

/// Resolves an address to all equivalent string forms using the node's current head.
#[derive(Clone)]
pub struct EquivalentAddressResolver {
	chain: Arc<dyn ChainStateReader>,
}

impl EquivalentAddressResolver {
	pub fn new(chain: Arc<dyn ChainStateReader>) -> Self {
		Self { chain }
	}

	/// Resolve `address` to every equivalent form.
	///
	/// The set always holds the address itself and its delegated form when the actor has one.
	/// Robust addresses add their ID address; ID addresses add the account key, or the robust
	/// address when the actor is not an account.
	pub async fn resolve(&self, address: &Address) -> Result<AddressSet, ResolveError> {
		let head = TipSetKey::empty();
		let chain_err = |source: ChainError| ResolveError::ChainError {
			address: address.to_string(),
			source,
		};

		let mut set = AddressSet::new();
		set.insert(address.to_string());

		let actor = self.chain.get_actor(address, &head).await.map_err(chain_err)?;
		if let Some(delegated) = actor.delegated_address {
			set.insert(delegated);
		}

		if is_robust(address.protocol()) {
			let id = self.chain.lookup_id(address, &head).await.map_err(chain_err)?;
			set.insert(id.to_string());
		} else {
			match self.chain.account_key(address, &head).await {
				Ok(key) => {
					set.insert(key.to_string());
				}
				Err(e) if e.is_not_account_actor() => {
					let robust = self
						.chain
						.lookup_robust_address(address, &head)
						.await
						.map_err(chain_err)?;
					set.insert(robust.to_string());
				}
				Err(e) => return Err(chain_err(e)),
			}
		}

		debug!(address = %address, equivalents = ?set, "Resolved equivalent addresses");
		Ok(set)
	}
}

#[async_trait::async_trait]
impl EquivalenceLookup for EquivalentAddressResolver {
	async fn equivalents(&self, address: &str) -> Result<AddressSet, ResolveError> {
		let parsed = parse_address(address)?;
		let mut set = self.resolve(&parsed).await?;
		set.insert(address.to_string());
		Ok(set)
	}
}

/// Every protocol except the numeric ID is treated as robust.
fn is_robust(protocol: Protocol) -> bool {
	!matches!(protocol, Protocol::ID)
}
