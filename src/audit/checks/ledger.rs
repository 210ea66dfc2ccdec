//! Ledger checks.
//!
//! Watched addresses are replayed through a ledger and reconciled against the node, either over
//! a contiguous height range (`SequentialLedgerCheck`, all addresses per height) or at the
//! heights an event provider reports for each address (`EventLedgerCheck`).

use crate::address::{AddressSet, parse_address};
use crate::audit::comparator::{HeightData, ReconciliationComparator, WatchedAccount};
use crate::audit::context::AuditContext;
use crate::audit::orchestrator::UnitCheck;
use crate::audit::types::{CheckError, CheckUnit, HeightRange, UnitPlan, UnitReport};
use crate::checkpoint::{CheckpointStore, Checkpointed, ProgressRecord, address_height_key, pending_heights};
use crate::ledger::{BalanceLedgerState, MultisigLedgerState};
use crate::provider::EventHeightProvider;
use crate::trace::{ExecutionTraceNode, decode_trace, filter_trace};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The ledger-specific half of a ledger check.
#[async_trait::async_trait]
pub trait LedgerAudit: Send + Sync {
	type State: Checkpointed + Serialize + DeserializeOwned + Default + Clone + Send + Sync;

	/// Whether reconciliation consumes multisig events.
	const NEEDS_EVENTS: bool;

	async fn reconcile(
		&self,
		ctx: &AuditContext,
		account: &mut WatchedAccount<Self::State>,
		data: &HeightData,
	) -> Result<(), CheckError>;
}

/// Received/sent replay against the actor balance.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalanceAudit;

#[async_trait::async_trait]
impl LedgerAudit for BalanceAudit {
	type State = BalanceLedgerState;
	const NEEDS_EVENTS: bool = false;

	async fn reconcile(
		&self,
		ctx: &AuditContext,
		account: &mut WatchedAccount<BalanceLedgerState>,
		data: &HeightData,
	) -> Result<(), CheckError> {
		ReconciliationComparator::new(ctx).reconcile_balance(account, data).await
	}
}

/// Signer and vesting replay against the multisig actor state.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultisigAudit;

#[async_trait::async_trait]
impl LedgerAudit for MultisigAudit {
	type State = MultisigLedgerState;
	const NEEDS_EVENTS: bool = true;

	async fn reconcile(
		&self,
		ctx: &AuditContext,
		account: &mut WatchedAccount<MultisigLedgerState>,
		data: &HeightData,
	) -> Result<(), CheckError> {
		ReconciliationComparator::new(ctx).reconcile_multisig(account, data).await
	}
}

/// Fetch, filter and parse everything a ledger needs for `height`.
///
/// Returns `None` when the filtered trace yields no transactions.
pub async fn fetch_height_data(
	ctx: &AuditContext,
	height: i64,
	watched: &AddressSet,
	with_events: bool,
) -> Result<Option<HeightData>, CheckError> {
	let bytes = ctx.call("get_trace", ctx.traces.get_trace(height)).await?;
	let roots = filter_trace(height, watched, decode_trace(&bytes)?);
	debug!(
		height,
		roots = roots.len(),
		nodes = roots.iter().map(ExecutionTraceNode::size).sum::<usize>(),
		"Filtered trace"
	);

	let tipset = ctx.call("get_tipset", ctx.chain.get_tipset_by_height(height)).await?;
	let next_tipset = ctx
		.call("get_next_tipset", ctx.chain.get_tipset_by_height(height + 1))
		.await?;

	let transactions = ctx
		.call("parse_transactions", ctx.parser.parse_transactions(&roots, &tipset))
		.await?;
	let Some(first) = transactions.first() else {
		debug!(height, "No transactions for watched addresses");
		return Ok(None);
	};

	let events = if with_events {
		let key = tipset.key();
		ctx.call(
			"parse_multisig_events",
			ctx.parser.parse_multisig_events(&transactions, &first.tipset_cid, &key),
		)
		.await?
	} else {
		Vec::new()
	};

	Ok(Some(HeightData {
		height,
		tipset,
		next_tipset,
		transactions,
		events,
	}))
}

/// Reconcile one account and add its verdict and snapshot to `report`.
async fn reconcile_into<A: LedgerAudit>(
	audit: &A,
	ctx: &AuditContext,
	account: &mut WatchedAccount<A::State>,
	data: &HeightData,
	report: &mut UnitReport,
) -> Result<(), CheckError> {
	let key = address_height_key(&account.address, data.height);
	match audit.reconcile(ctx, account, data).await {
		Err(e) if e.is_fatal() => return Err(e),
		Err(e) => {
			warn!(address = %account.address, height = data.height, error = %e, "Reconciliation failed");
			report.record(key, Err(e));
		}
		Ok(()) => report.record(key, Ok(())),
	}
	report.snapshot(&account.address, &account.state)
}

/// Every height of a range, all addresses per height.
pub struct SequentialLedgerCheck<A: LedgerAudit> {
	name: String,
	audit: A,
	addresses: Vec<String>,
	range: HeightRange,
	accounts: Vec<WatchedAccount<A::State>>,
	/// Union of the equivalence sets of all accounts.
	watched: AddressSet,
}

impl<A: LedgerAudit> SequentialLedgerCheck<A> {
	pub fn new(name: &str, audit: A, addresses: Vec<String>, range: HeightRange) -> Self {
		Self {
			name: name.to_string(),
			audit,
			addresses,
			range,
			accounts: Vec::new(),
			watched: AddressSet::new(),
		}
	}
}

#[async_trait::async_trait]
impl<A: LedgerAudit> UnitCheck for SequentialLedgerCheck<A> {
	fn name(&self) -> &str {
		&self.name
	}

	/// Resolve all addresses and pick one start height for all of them.
	///
	/// Any discarded snapshot resets every account and restarts the range, since all accounts
	/// share the height records.
	async fn plan(&mut self, ctx: &AuditContext, store: &CheckpointStore) -> Result<UnitPlan, CheckError> {
		if self.addresses.is_empty() {
			return Err(CheckError::InputError("no addresses to check".into()));
		}

		let latest = ctx.call("get_latest_height", store.get_latest_height()).await?;
		let mut start = self.range.start;
		let mut restarted = false;

		self.accounts.clear();
		self.watched.clear();
		for address in &self.addresses {
			let parsed = match parse_address(address) {
				Ok(parsed) => parsed,
				Err(e) => {
					let record = ProgressRecord::failed(e.to_string());
					store.update_progress_address(address, 0, &record).await?;
					return Err(CheckError::InputError(e.to_string()));
				}
			};

			let watched = ctx.call("resolve_address", ctx.resolver.resolve(&parsed)).await?;
			self.watched.extend(watched.iter().cloned());

			let resume = ctx
				.call("resume", store.resume::<A::State>(address, latest, self.range.start))
				.await?;
			restarted |= resume.restarted;
			start = resume.start_height;

			self.accounts.push(WatchedAccount {
				address: address.clone(),
				parsed,
				watched,
				state: resume.state,
			});
		}

		if restarted {
			info!(check = %self.name, start_height = self.range.start, "Restarting all addresses from start height");
			for account in &mut self.accounts {
				account.state = A::State::default();
			}
			start = self.range.start;
		} else if start > self.range.start {
			info!(check = %self.name, latest_height = latest, "Resuming from latest height");
		}

		Ok(self.range.units_from(start))
	}

	async fn check_unit(&mut self, ctx: &AuditContext, unit: &CheckUnit) -> Result<UnitReport, CheckError> {
		let height = unit.height();
		let Some(data) = fetch_height_data(ctx, height, &self.watched, A::NEEDS_EVENTS).await? else {
			return Ok(UnitReport::skipped());
		};

		let mut report = UnitReport::default();
		for account in &mut self.accounts {
			debug!(address = %account.address, height, "Processing address");
			reconcile_into(&self.audit, ctx, account, &data, &mut report).await?;
		}
		report.record(unit.progress_key(), Ok(()));
		Ok(report)
	}
}

/// Provider heights per address.
pub struct EventLedgerCheck<A: LedgerAudit> {
	name: String,
	audit: A,
	addresses: Vec<String>,
	provider: Box<dyn EventHeightProvider>,
	accounts: HashMap<String, WatchedAccount<A::State>>,
}

impl<A: LedgerAudit> EventLedgerCheck<A> {
	pub fn new(name: &str, audit: A, addresses: Vec<String>, provider: Box<dyn EventHeightProvider>) -> Self {
		Self {
			name: name.to_string(),
			audit,
			addresses,
			provider,
			accounts: HashMap::new(),
		}
	}
}

/// Resolve one address and load its snapshot; returns the heights still to check.
async fn prepare_account<S>(
	ctx: &AuditContext,
	store: &CheckpointStore,
	provider: &dyn EventHeightProvider,
	address: &str,
) -> Result<(WatchedAccount<S>, Vec<i64>), CheckError>
where
	S: Checkpointed + DeserializeOwned + Default,
{
	let parsed = parse_address(address).map_err(|e| CheckError::InputError(e.to_string()))?;
	let heights = ctx
		.call("get_address_event_heights", provider.get_address_event_heights(address))
		.await?;
	let watched = ctx.call("resolve_address", ctx.resolver.resolve(&parsed)).await?;
	let state: S = ctx.call("load_state", store.load_state(address)).await?;

	let pending = pending_heights(&heights, state.height());
	debug!(
		address,
		event_heights = heights.len(),
		pending = pending.len(),
		state_height = state.height(),
		"Prepared address"
	);

	let account = WatchedAccount {
		address: address.to_string(),
		parsed,
		watched,
		state,
	};
	Ok((account, pending))
}

#[async_trait::async_trait]
impl<A: LedgerAudit> UnitCheck for EventLedgerCheck<A> {
	fn name(&self) -> &str {
		&self.name
	}

	/// Addresses that cannot be prepared are recorded at height 0 and left out of the run.
	async fn plan(&mut self, ctx: &AuditContext, store: &CheckpointStore) -> Result<UnitPlan, CheckError> {
		let mut units = Vec::new();
		self.accounts.clear();

		for address in &self.addresses {
			match prepare_account::<A::State>(ctx, store, self.provider.as_ref(), address).await {
				Ok((account, heights)) => {
					units.extend(heights.into_iter().map(|height| CheckUnit::AddressHeight {
						address: address.clone(),
						height,
					}));
					self.accounts.insert(address.clone(), account);
				}
				Err(e) if e.is_fatal() => return Err(e),
				Err(e) => {
					warn!(check = %self.name, address = %address, error = %e, "Failed to prepare address");
					let record = ProgressRecord::failed(e.to_string());
					store.update_progress_address(address, 0, &record).await?;
				}
			}
		}

		Ok(UnitPlan::Units(units))
	}

	async fn check_unit(&mut self, ctx: &AuditContext, unit: &CheckUnit) -> Result<UnitReport, CheckError> {
		let CheckUnit::AddressHeight { address, height } = unit else {
			return Err(CheckError::InputError(format!("{} is not an address unit", unit)));
		};
		let account = self
			.accounts
			.get_mut(address)
			.ok_or_else(|| CheckError::InputError(format!("address {} was not prepared", address)))?;

		let Some(data) = fetch_height_data(ctx, *height, &account.watched, A::NEEDS_EVENTS).await? else {
			return Ok(UnitReport::skipped());
		};

		let mut report = UnitReport::default();
		reconcile_into(&self.audit, ctx, account, &data, &mut report).await?;
		Ok(report)
	}
}
