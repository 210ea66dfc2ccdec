use super::repositories::{FileRepository, KeyValueRepository, MemoryRepository};
use super::{CheckpointError, Checkpointed};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Message stored with successful progress records.
pub const PROGRESS_OK: &str = "ok";
/// Separator between address and height in address-scoped progress keys.
pub const ADDRESS_HEIGHT_SEPARATOR: &str = "_";

/// Outcome of one processed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
	pub success: bool,
	pub message: String,
}

impl ProgressRecord {
	pub fn ok() -> Self {
		Self {
			success: true,
			message: PROGRESS_OK.to_string(),
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			success: false,
			message: message.into(),
		}
	}
}

/// Progress key of an address-scoped unit.
pub fn address_height_key(address: &str, height: i64) -> String {
	format!("{}{}{}", address, ADDRESS_HEIGHT_SEPARATOR, height)
}

/// Where a ledger check continues for one address, and with which state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint<S> {
	pub start_height: i64,
	pub state: S,
	/// True when a stored snapshot was discarded.
	pub restarted: bool,
}

/// Progress and state persistence for one check.
pub struct CheckpointStore {
	name: String,
	progress: Box<dyn KeyValueRepository>,
	state: Box<dyn KeyValueRepository>,
}

impl CheckpointStore {
	/// Open `<name>.jsonl` and `<name>.state.jsonl` under `dir`.
	pub async fn open(dir: &Path, name: &str) -> Result<Self, CheckpointError> {
		let progress = FileRepository::open(dir.join(format!("{}.jsonl", name))).await?;
		let state = FileRepository::open(dir.join(format!("{}.state.jsonl", name))).await?;
		info!(
			"Opened checkpoint store for {}: {:?}, {:?}",
			name,
			progress.path(),
			state.path()
		);
		Ok(Self::with_repositories(name, Box::new(progress), Box::new(state)))
	}

	/// Open an existing store for inspection while a run may still be writing it.
	pub async fn open_read_only(dir: &Path, name: &str) -> Result<Self, CheckpointError> {
		let progress = FileRepository::open_read_only(dir.join(format!("{}.jsonl", name))).await?;
		let state = FileRepository::open_read_only(dir.join(format!("{}.state.jsonl", name))).await?;
		Ok(Self::with_repositories(name, Box::new(progress), Box::new(state)))
	}

	pub fn in_memory(name: &str) -> Self {
		Self::with_repositories(
			name,
			Box::new(MemoryRepository::default()),
			Box::new(MemoryRepository::default()),
		)
	}

	pub fn with_repositories(
		name: &str,
		progress: Box<dyn KeyValueRepository>,
		state: Box<dyn KeyValueRepository>,
	) -> Self {
		Self {
			name: name.to_string(),
			progress,
			state,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Write a progress record; later writes to the same key overwrite.
	pub async fn insert(&self, key: &str, record: &ProgressRecord) -> Result<(), CheckpointError> {
		if key.is_empty() {
			return Err(CheckpointError::InvalidKey);
		}
		self.progress.put(key, serde_json::to_value(record)?).await
	}

	pub async fn update_progress_height(&self, height: i64, record: &ProgressRecord) -> Result<(), CheckpointError> {
		self.insert(&height.to_string(), record).await
	}

	pub async fn update_progress_address(
		&self,
		address: &str,
		height: i64,
		record: &ProgressRecord,
	) -> Result<(), CheckpointError> {
		if address.is_empty() {
			return Err(CheckpointError::InvalidKey);
		}
		self.insert(&address_height_key(address, height), record).await
	}

	pub async fn get_progress(&self, key: &str) -> Result<Option<ProgressRecord>, CheckpointError> {
		self.progress
			.get(key)
			.await?
			.map(serde_json::from_value)
			.transpose()
			.map_err(CheckpointError::from)
	}

	/// Every progress record, in key byte order.
	pub async fn dump_progress(&self) -> Result<BTreeMap<String, ProgressRecord>, CheckpointError> {
		self.progress
			.dump_all()
			.await?
			.into_iter()
			.map(|(k, v)| -> Result<_, CheckpointError> { Ok((k, serde_json::from_value(v)?)) })
			.collect()
	}

	/// Height of the last height-scoped record in key byte order; 0 when there is none.
	///
	/// This is a byte-order scan, not a numeric maximum: with keys `100`, `200` and `50` the
	/// result is 50.
	pub async fn get_latest_height(&self) -> Result<i64, CheckpointError> {
		let entries = self.progress.dump_all().await?;
		Ok(latest_height(entries.keys()))
	}

	/// Snapshot for `address`, or the empty state when none was stored.
	pub async fn load_state<S: DeserializeOwned + Default>(&self, address: &str) -> Result<S, CheckpointError> {
		match self.state.get(address).await? {
			Some(value) => Ok(serde_json::from_value(value)?),
			None => Ok(S::default()),
		}
	}

	pub async fn save_state<S: Serialize>(&self, address: &str, state: &S) -> Result<(), CheckpointError> {
		self.save_snapshot(address, serde_json::to_value(state)?).await
	}

	pub async fn save_snapshot(&self, address: &str, snapshot: Value) -> Result<(), CheckpointError> {
		if address.is_empty() {
			return Err(CheckpointError::InvalidKey);
		}
		self.state.put(address, snapshot).await
	}

	/// Decide where a sequential ledger check continues for `address`.
	///
	/// A snapshot that was advanced (height above 0) to a height other than `global_latest` is
	/// discarded and the check restarts from `configured_start`. An untouched snapshot at 0 never
	/// forces a restart. Otherwise the snapshot is kept and the check continues after the
	/// latest recorded height, when that lies past `configured_start`.
	pub async fn resume<S>(
		&self,
		address: &str,
		global_latest: i64,
		configured_start: i64,
	) -> Result<ResumePoint<S>, CheckpointError>
	where
		S: Checkpointed + DeserializeOwned + Default,
	{
		let state: S = self.load_state(address).await?;

		if state.height() > 0 && state.height() != global_latest {
			info!(
				address,
				state_height = state.height(),
				latest_height = global_latest,
				"Snapshot does not match latest height, restarting from {}",
				configured_start
			);
			return Ok(ResumePoint {
				start_height: configured_start,
				state: S::default(),
				restarted: true,
			});
		}

		let start_height = if global_latest > configured_start {
			global_latest + 1
		} else {
			configured_start
		};
		debug!(address, start_height, "Resuming from snapshot");
		Ok(ResumePoint {
			start_height,
			state,
			restarted: false,
		})
	}
}

/// Byte-order-last key without the address separator that parses as a height.
pub fn latest_height<'a, I>(keys: I) -> i64
where
	I: DoubleEndedIterator<Item = &'a String>,
{
	keys.rev()
		.filter(|k| !k.contains(ADDRESS_HEIGHT_SEPARATOR))
		.find_map(|k| k.parse::<i64>().ok())
		.unwrap_or(0)
}

/// Start of a height-scoped check: the latest recorded height is processed again.
pub fn resume_height_check(latest: i64, configured_start: i64) -> i64 {
	if latest > 0 && latest > configured_start {
		latest
	} else {
		configured_start
	}
}

/// Event heights still to process once a snapshot at `state_height` is loaded.
pub fn pending_heights(heights: &[i64], state_height: i64) -> Vec<i64> {
	heights
		.iter()
		.copied()
		.filter(|h| state_height <= 0 || *h > state_height)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::BalanceLedgerState;
	use num_bigint::BigInt;

	#[tokio::test]
	async fn latest_height_is_a_byte_order_scan() {
		let store = CheckpointStore::in_memory("validate-address-balance");
		for key in ["100", "200", "f0014_130"] {
			store.insert(key, &ProgressRecord::ok()).await.unwrap();
		}
		assert_eq!(store.get_latest_height().await.unwrap(), 200);

		store.insert("50", &ProgressRecord::ok()).await.unwrap();
		assert_eq!(store.get_latest_height().await.unwrap(), 50);
	}

	#[tokio::test]
	async fn latest_height_of_empty_store_is_zero() {
		let store = CheckpointStore::in_memory("c");
		assert_eq!(store.get_latest_height().await.unwrap(), 0);
		store.update_progress_address("f01", 9, &ProgressRecord::ok()).await.unwrap();
		assert_eq!(store.get_latest_height().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn empty_keys_are_rejected() {
		let store = CheckpointStore::in_memory("c");
		assert!(matches!(
			store.insert("", &ProgressRecord::ok()).await,
			Err(CheckpointError::InvalidKey)
		));
		assert!(matches!(
			store.save_state("", &BalanceLedgerState::default()).await,
			Err(CheckpointError::InvalidKey)
		));
	}

	#[tokio::test]
	async fn later_records_overwrite() {
		let store = CheckpointStore::in_memory("c");
		store.update_progress_height(7, &ProgressRecord::failed("boom")).await.unwrap();
		store.update_progress_height(7, &ProgressRecord::ok()).await.unwrap();
		assert_eq!(store.get_progress("7").await.unwrap(), Some(ProgressRecord::ok()));
		assert_eq!(
			serde_json::to_value(ProgressRecord::ok()).unwrap(),
			serde_json::json!({"success": true, "message": "ok"})
		);
	}

	#[tokio::test]
	async fn resume_keeps_matching_snapshot() {
		let store = CheckpointStore::in_memory("c");
		let state = BalanceLedgerState {
			height: 120,
			received: Some(BigInt::from(5)),
			sent: None,
		};
		store.save_state("f01000", &state).await.unwrap();

		let point: ResumePoint<BalanceLedgerState> = store.resume("f01000", 120, 100).await.unwrap();
		assert_eq!(point.start_height, 121);
		assert_eq!(point.state, state);
		assert!(!point.restarted);
	}

	#[tokio::test]
	async fn resume_discards_stale_snapshot() {
		let store = CheckpointStore::in_memory("c");
		let state = BalanceLedgerState {
			height: 110,
			received: Some(BigInt::from(5)),
			sent: None,
		};
		store.save_state("f01000", &state).await.unwrap();

		let point: ResumePoint<BalanceLedgerState> = store.resume("f01000", 120, 100).await.unwrap();
		assert_eq!(point.start_height, 100);
		assert_eq!(point.state, BalanceLedgerState::default());
		assert!(point.restarted);
	}

	#[tokio::test]
	async fn fresh_store_starts_at_configured_height() {
		let store = CheckpointStore::in_memory("c");
		let point: ResumePoint<BalanceLedgerState> = store.resume("f01000", 0, 100).await.unwrap();
		assert_eq!(point.start_height, 100);
		assert!(!point.restarted);
	}

	#[tokio::test]
	async fn untouched_snapshot_follows_latest_height() {
		let store = CheckpointStore::in_memory("c");
		let point: ResumePoint<BalanceLedgerState> = store.resume("f01000", 120, 100).await.unwrap();
		assert_eq!(point.start_height, 121);
		assert_eq!(point.state, BalanceLedgerState::default());
		assert!(!point.restarted);
	}

	#[tokio::test]
	async fn read_only_store_sees_writer_records() {
		let dir = tempfile::tempdir().unwrap();
		let writer = CheckpointStore::open(dir.path(), "validate-json").await.unwrap();
		writer.update_progress_height(7, &ProgressRecord::ok()).await.unwrap();

		let reader = CheckpointStore::open_read_only(dir.path(), "validate-json").await.unwrap();
		assert_eq!(reader.get_latest_height().await.unwrap(), 7);
		assert!(matches!(
			reader.update_progress_height(8, &ProgressRecord::ok()).await,
			Err(CheckpointError::ReadOnly(_))
		));
		assert!(matches!(
			CheckpointStore::open(dir.path(), "validate-json").await,
			Err(CheckpointError::Locked(_))
		));
	}

	#[test]
	fn height_checks_repeat_latest_height() {
		assert_eq!(resume_height_check(0, 10), 10);
		assert_eq!(resume_height_check(5, 10), 10);
		assert_eq!(resume_height_check(15, 10), 15);
	}

	#[test]
	fn event_heights_at_or_below_snapshot_are_skipped() {
		assert_eq!(pending_heights(&[10, 20, 30], 20), vec![30]);
		assert_eq!(pending_heights(&[10, 20, 30], 0), vec![10, 20, 30]);
	}

	#[tokio::test]
	async fn file_store_reopens_with_progress_and_state() {
		let dir = tempfile::tempdir().unwrap();
		{
			let store = CheckpointStore::open(dir.path(), "validate-multisig-state").await.unwrap();
			store.update_progress_address("f02000", 42, &ProgressRecord::ok()).await.unwrap();
			store.update_progress_height(42, &ProgressRecord::ok()).await.unwrap();
			store
				.save_state("f02000", &crate::ledger::MultisigLedgerState {
					height: 42,
					signers: vec!["f0101".into()],
					locked_balance: "0".into(),
					unlock_duration: 0,
				})
				.await
				.unwrap();
		}

		let store = CheckpointStore::open(dir.path(), "validate-multisig-state").await.unwrap();
		assert_eq!(store.get_latest_height().await.unwrap(), 42);
		let state: crate::ledger::MultisigLedgerState = store.load_state("f02000").await.unwrap();
		assert_eq!(state.signers, vec!["f0101"]);
		assert!(dir.path().join("validate-multisig-state.state.jsonl").exists());
	}
}
