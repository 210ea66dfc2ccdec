//! Reconciliation auditor for a Filecoin chain indexer.
//!
//! Traces recorded by the indexer are pruned to the watched addresses, replayed through ledger
//! state machines and compared with the state served by a full node. Verdicts and ledger
//! snapshots go to a resumable checkpoint store.

pub mod address;
pub mod audit;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod ledger;
pub mod provider;
pub mod trace;
pub mod utils;

#[cfg(test)]
mod testing;
