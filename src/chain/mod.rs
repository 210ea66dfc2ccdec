//! Read-only access to authoritative chain state.
//!
//! This module defines the `ChainStateReader` seam used by the resolver and the comparator,
//! and `LotusClient`, its JSON-RPC implementation against a Lotus full node.

pub mod client;
pub mod types;

pub use client::*;
pub use types::*;

use fvm_shared::address::Address;

/// Authoritative chain state as served by a full node.
#[async_trait::async_trait]
pub trait ChainStateReader: Send + Sync {
	/// Actor record at the given tipset.
	async fn get_actor(&self, address: &Address, tipset: &TipSetKey) -> Result<ActorInfo, ChainError>;

	/// Numeric ID address for an address.
	async fn lookup_id(&self, address: &Address, tipset: &TipSetKey) -> Result<Address, ChainError>;

	/// Robust (non-ID) address for an actor.
	async fn lookup_robust_address(
		&self,
		address: &Address,
		tipset: &TipSetKey,
	) -> Result<Address, ChainError>;

	/// Public-key address of an account actor.
	async fn account_key(&self, address: &Address, tipset: &TipSetKey) -> Result<Address, ChainError>;

	/// Tipset at a height; null rounds yield the previous non-null tipset.
	async fn get_tipset_by_height(&self, height: i64) -> Result<TipSet, ChainError>;

	/// Decoded actor state at the given tipset.
	async fn read_state(&self, address: &Address, tipset: &TipSetKey) -> Result<ActorState, ChainError>;
}
