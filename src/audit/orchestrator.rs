//! Check driver and integration point for all audit components.
//!
//! The `CheckDriver` runs any `UnitCheck` the same way: the check plans its units (resolving
//! resume points against the checkpoint store), then every unit is checked in order and its
//! snapshots and verdicts are persisted before the next unit starts.
//!
//! A failing unit is recorded under its own key and the run continues. Only fatal errors
//! (cancellation, checkpoint failures) and planning failures end the run early.

use super::context::AuditContext;
use super::progress_tracker::{RunProgressTracker, RunStats};
use super::types::{CheckError, CheckUnit, UnitPlan, UnitReport};
use crate::checkpoint::CheckpointStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A check expressed as an ordered sequence of independent units.
#[async_trait::async_trait]
pub trait UnitCheck: Send {
	fn name(&self) -> &str;

	/// Units still to check, in processing order.
	async fn plan(&mut self, ctx: &AuditContext, store: &CheckpointStore) -> Result<UnitPlan, CheckError>;

	/// Check one unit. An empty report means there was nothing to check.
	async fn check_unit(&mut self, ctx: &AuditContext, unit: &CheckUnit) -> Result<UnitReport, CheckError>;
}

/// Runs checks against one checkpoint store.
pub struct CheckDriver {
	ctx: Arc<AuditContext>,
	store: CheckpointStore,
}

impl CheckDriver {
	pub fn new(ctx: Arc<AuditContext>, store: CheckpointStore) -> Self {
		Self { ctx, store }
	}

	pub fn store(&self) -> &CheckpointStore {
		&self.store
	}

	/// Run `check` to completion.
	pub async fn run<C>(&self, check: &mut C) -> Result<RunStats, CheckError>
	where
		C: UnitCheck + ?Sized,
	{
		let name = check.name().to_string();
		info!(check = %name, store = self.store.name(), "Starting check");

		let plan = check.plan(&self.ctx, &self.store).await.inspect_err(|e| {
			error!(check = %name, error = %e, "Failed to plan check");
		})?;
		info!(check = %name, units = plan.len(), "Planned check units");

		let mut tracker = RunProgressTracker::new(&name);
		for unit in plan {
			if self.ctx.is_cancelled() {
				warn!(check = %name, unit = %unit, "Deadline reached, stopping");
				return Err(CheckError::Cancelled);
			}

			let report = match check.check_unit(&self.ctx, &unit).await {
				Ok(report) => report,
				Err(e) if e.is_fatal() => {
					error!(check = %name, unit = %unit, error = %e, "Aborting check");
					return Err(e);
				}
				Err(e) => {
					error!(check = %name, unit = %unit, error = %e, "Unit check failed");
					let mut report = UnitReport::default();
					report.record(unit.progress_key(), Err(e));
					report
				}
			};

			if report.is_skipped() {
				debug!(check = %name, unit = %unit, "Nothing to check");
				tracker.record_skipped(unit.height());
				continue;
			}

			self.persist(&report).await?;

			let failed = report.failures();
			tracker.record_unit(unit.height(), report.records.len() - failed, failed);
			tracker.log_progress(false);
		}

		tracker.log_progress(true);
		let stats = tracker.get_stats();
		info!(check = %name, "{}", stats.summary());
		Ok(stats)
	}

	/// Snapshots first, so a recorded verdict always has its state behind it.
	async fn persist(&self, report: &UnitReport) -> Result<(), CheckError> {
		for (address, snapshot) in &report.snapshots {
			self.ctx
				.call("save_snapshot", self.store.save_snapshot(address, snapshot.clone()))
				.await?;
		}
		for (key, record) in &report.records {
			self.ctx.call("insert_progress", self.store.insert(key, record)).await?;
		}
		Ok(())
	}
}
