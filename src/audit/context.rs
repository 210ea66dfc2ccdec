//! Collaborators and limits shared by every unit of a run.

use super::types::CheckError;
use crate::address::EquivalentAddressResolver;
use crate::chain::ChainStateReader;
use crate::trace::{TraceParser, TraceSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Explicit run context handed to checks.
#[derive(Clone)]
pub struct AuditContext {
	pub chain: Arc<dyn ChainStateReader>,
	pub traces: Arc<dyn TraceSource>,
	pub parser: Arc<dyn TraceParser>,
	pub resolver: EquivalentAddressResolver,
	call_timeout: Duration,
	deadline: Option<Instant>,
}

impl AuditContext {
	pub fn new(
		chain: Arc<dyn ChainStateReader>,
		traces: Arc<dyn TraceSource>,
		parser: Arc<dyn TraceParser>,
		call_timeout: Duration,
	) -> Self {
		Self {
			resolver: EquivalentAddressResolver::new(chain.clone()),
			chain,
			traces,
			parser,
			call_timeout,
			deadline: None,
		}
	}

	/// Cancel the run once `deadline` passes.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);
		self
	}

	pub fn is_cancelled(&self) -> bool {
		self.deadline.is_some_and(|d| Instant::now() >= d)
	}

	/// Run one blocking call under the per-call timeout and the run deadline.
	///
	/// A timeout fails the call; reaching the deadline cancels the run.
	pub async fn call<T, E, F>(&self, name: &'static str, fut: F) -> Result<T, CheckError>
	where
		F: Future<Output = Result<T, E>>,
		CheckError: From<E>,
	{
		if self.is_cancelled() {
			return Err(CheckError::Cancelled);
		}

		let bounded = tokio::time::timeout(self.call_timeout, fut);
		let outcome = match self.deadline {
			Some(deadline) => tokio::select! {
				outcome = bounded => outcome,
				_ = tokio::time::sleep_until(deadline) => return Err(CheckError::Cancelled),
			},
			None => bounded.await,
		};

		match outcome {
			Ok(result) => result.map_err(CheckError::from),
			Err(_) => Err(CheckError::Timeout {
				call: name,
				timeout: self.call_timeout,
			}),
		}
	}
}
