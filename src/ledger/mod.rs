//! Incremental ledger state machines.
//!
//! - `balance`: received/sent totals of a watched actor, replayed from parsed transactions.
//! - `multisig`: signer set and vesting parameters of a multisig, replayed from multisig events.
//!
//! Both states are snapshotted to the checkpoint store after every processed unit.

pub mod balance;
pub mod multisig;
pub mod types;

pub use balance::BalanceLedgerState;
pub use multisig::MultisigLedgerState;
pub use types::*;
