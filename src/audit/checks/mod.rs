//! The check catalogue.

pub mod chain;
pub mod ledger;

pub use chain::{CanonicalChainCheck, NullBlockCheck, ValidJsonCheck};
pub use ledger::{BalanceAudit, EventLedgerCheck, LedgerAudit, MultisigAudit, SequentialLedgerCheck};

use super::orchestrator::UnitCheck;
use super::types::{CheckError, HeightRange};
use crate::config::{AuditConfig, CheckConfig, CheckKind};
use crate::provider::{EventHeightProvider, new_event_provider};
use crate::utils::read_address_file;

/// Addresses of the address file followed by the inline ones.
pub async fn load_addresses(check: &CheckConfig) -> Result<Vec<String>, CheckError> {
	let mut addresses = match &check.address_file {
		Some(path) => read_address_file(path)
			.await
			.map_err(|e| CheckError::InputError(format!("Failed to read address file {:?}: {}", path, e)))?,
		None => Vec::new(),
	};
	addresses.extend(check.addresses.iter().cloned());
	Ok(addresses)
}

/// Build the check selected in `config`.
pub fn build_check(config: &AuditConfig, addresses: Vec<String>) -> Result<Box<dyn UnitCheck>, CheckError> {
	let check = &config.check;
	let name = check.kind.as_str();
	let range = || HeightRange::new(check.start_height, check.end_height);
	let provider = || -> Result<Box<dyn EventHeightProvider>, CheckError> {
		Ok(new_event_provider(
			&check.event_provider,
			check.event_provider_token.clone(),
			config.call_timeout(),
		)?)
	};

	let built: Box<dyn UnitCheck> = match check.kind {
		CheckKind::ValidJson => Box::new(ValidJsonCheck::new(range()?)),
		CheckKind::NullBlocks => Box::new(NullBlockCheck::new(range()?)),
		CheckKind::CanonicalChain => Box::new(CanonicalChainCheck::new(range()?)),
		CheckKind::AddressBalanceSequential => {
			Box::new(SequentialLedgerCheck::new(name, BalanceAudit, addresses, range()?))
		}
		CheckKind::MultisigStateSequential => {
			Box::new(SequentialLedgerCheck::new(name, MultisigAudit, addresses, range()?))
		}
		CheckKind::AddressBalance => Box::new(EventLedgerCheck::new(name, BalanceAudit, addresses, provider()?)),
		CheckKind::MultisigState => Box::new(EventLedgerCheck::new(name, MultisigAudit, addresses, provider()?)),
	};
	Ok(built)
}
