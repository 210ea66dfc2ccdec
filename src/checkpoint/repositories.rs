use super::CheckpointError;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Log lines tolerated before a writer compacts, regardless of the live key count.
const COMPACTION_FLOOR: usize = 1024;

/// Ordered key-value persistence for one namespace.
///
/// Keys iterate in byte order, which the latest-height scan relies on.
#[async_trait::async_trait]
pub trait KeyValueRepository: Send + Sync {
	async fn put(&self, key: &str, value: Value) -> Result<(), CheckpointError>;
	async fn get(&self, key: &str) -> Result<Option<Value>, CheckpointError>;
	async fn dump_all(&self) -> Result<BTreeMap<String, Value>, CheckpointError>;
}

#[derive(Serialize, Deserialize)]
struct LogEntry {
	key: String,
	value: Value,
}

struct LogState {
	entries: BTreeMap<String, Value>,
	/// Lines currently in the log file, live or overwritten.
	lines: usize,
}

impl LogState {
	fn needs_compaction(&self) -> bool {
		self.lines > self.entries.len().saturating_mul(2).max(COMPACTION_FLOOR)
	}
}

/// File-backed repository: an append-only JSON-lines log replayed into memory on open.
///
/// Each `put` appends one line, so a reader sees either the previous or the new value and
/// ignores a torn trailing line. Only a writer rewrites the file: `open` takes an exclusive
/// lock on a sibling `.lock` file and compaction (fresh file renamed over the log) happens
/// under that lock, on open and whenever overwritten lines dominate. `open_read_only` never
/// writes.
pub struct FileRepository {
	path: PathBuf,
	state: Mutex<LogState>,
	/// Held for the lifetime of a writer; `None` for read-only handles.
	lock: Option<std::fs::File>,
}

impl FileRepository {
	/// Open the log as its single writer.
	pub async fn open(path: PathBuf) -> Result<Self, CheckpointError> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| CheckpointError::io(parent, e))?;
		}
		let lock = acquire_writer_lock(&path)?;

		let (state, torn_tail) = replay(&path).await?;
		let repo = Self {
			path,
			state: Mutex::new(state),
			lock: Some(lock),
		};

		{
			let mut state = repo.state.lock().await;
			if torn_tail || state.needs_compaction() {
				repo.rewrite(&mut state).await?;
			}
		}

		Ok(repo)
	}

	/// Open the log for reading while another process may be writing it.
	///
	/// The file is never modified and `put` is rejected.
	pub async fn open_read_only(path: PathBuf) -> Result<Self, CheckpointError> {
		let (state, torn_tail) = replay(&path).await?;
		if torn_tail {
			debug!("Ignoring partial trailing line in {:?}", path);
		}
		Ok(Self {
			path,
			state: Mutex::new(state),
			lock: None,
		})
	}

	pub fn is_read_only(&self) -> bool {
		self.lock.is_none()
	}

	/// Rewrite the log with one line per live key.
	pub async fn compact(&self) -> Result<(), CheckpointError> {
		if self.is_read_only() {
			return Err(CheckpointError::ReadOnly(self.path.display().to_string()));
		}
		let mut state = self.state.lock().await;
		self.rewrite(&mut state).await
	}

	async fn rewrite(&self, state: &mut LogState) -> Result<(), CheckpointError> {
		let mut buffer = String::new();
		for (key, value) in state.entries.iter() {
			buffer.push_str(&encode_line(key, value)?);
		}

		let tmp = self.path.with_extension("jsonl.tmp");
		tokio::fs::write(&tmp, buffer.as_bytes())
			.await
			.map_err(|e| CheckpointError::io(&tmp, e))?;
		tokio::fs::rename(&tmp, &self.path)
			.await
			.map_err(|e| CheckpointError::io(&self.path, e))?;

		state.lines = state.entries.len();
		info!("Compacted {:?} to {} entries", self.path, state.lines);
		Ok(())
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

fn lock_path(path: &Path) -> PathBuf {
	path.with_extension("lock")
}

fn acquire_writer_lock(path: &Path) -> Result<std::fs::File, CheckpointError> {
	let lock_path = lock_path(path);
	let file = std::fs::OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.truncate(false)
		.open(&lock_path)
		.map_err(|e| CheckpointError::io(&lock_path, e))?;

	match file.try_lock_exclusive() {
		Ok(()) => Ok(file),
		Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
			Err(CheckpointError::Locked(path.display().to_string()))
		}
		Err(e) => Err(CheckpointError::io(&lock_path, e)),
	}
}

/// Replay the log; the flag reports a partial trailing line.
async fn replay(path: &Path) -> Result<(LogState, bool), CheckpointError> {
	let content = match tokio::fs::read(path).await {
		Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
		Err(e) => return Err(CheckpointError::io(path, e)),
	};

	let torn_tail = !content.is_empty() && !content.ends_with('\n');
	let mut entries = BTreeMap::new();
	let mut lines = 0usize;
	let mut complete = content.lines().enumerate().peekable();
	while let Some((number, line)) = complete.next() {
		if torn_tail && complete.peek().is_none() {
			break;
		}
		if line.trim().is_empty() {
			continue;
		}
		match serde_json::from_str::<LogEntry>(line) {
			Ok(entry) => {
				entries.insert(entry.key, entry.value);
				lines += 1;
			}
			Err(e) => warn!("Skipping unreadable line {} in {:?}: {}", number + 1, path, e),
		}
	}

	Ok((LogState { entries, lines }, torn_tail))
}

fn encode_line(key: &str, value: &Value) -> Result<String, CheckpointError> {
	let mut line = serde_json::to_string(&LogEntry {
		key: key.to_string(),
		value: value.clone(),
	})?;
	line.push('\n');
	Ok(line)
}

#[async_trait::async_trait]
impl KeyValueRepository for FileRepository {
	async fn put(&self, key: &str, value: Value) -> Result<(), CheckpointError> {
		if self.is_read_only() {
			return Err(CheckpointError::ReadOnly(self.path.display().to_string()));
		}
		let mut state = self.state.lock().await;
		let line = encode_line(key, &value)?;

		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await
			.map_err(|e| CheckpointError::io(&self.path, e))?;
		file.write_all(line.as_bytes())
			.await
			.map_err(|e| CheckpointError::io(&self.path, e))?;
		file.flush()
			.await
			.map_err(|e| CheckpointError::io(&self.path, e))?;

		state.entries.insert(key.to_string(), value);
		state.lines += 1;
		if state.needs_compaction() {
			self.rewrite(&mut state).await?;
		}
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Value>, CheckpointError> {
		Ok(self.state.lock().await.entries.get(key).cloned())
	}

	async fn dump_all(&self) -> Result<BTreeMap<String, Value>, CheckpointError> {
		Ok(self.state.lock().await.entries.clone())
	}
}

/// Volatile repository for tests and dry runs.
#[derive(Default)]
pub struct MemoryRepository {
	entries: Mutex<BTreeMap<String, Value>>,
}

#[async_trait::async_trait]
impl KeyValueRepository for MemoryRepository {
	async fn put(&self, key: &str, value: Value) -> Result<(), CheckpointError> {
		self.entries.lock().await.insert(key.to_string(), value);
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Value>, CheckpointError> {
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn dump_all(&self) -> Result<BTreeMap<String, Value>, CheckpointError> {
		Ok(self.entries.lock().await.clone())
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	#[tokio::test]
	async fn file_repository_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("progress.jsonl");

		let repo = FileRepository::open(path.clone()).await.unwrap();
		repo.put("100", json!({"success": true, "message": "ok"})).await.unwrap();
		repo.put("100", json!({"success": false, "message": "later"})).await.unwrap();
		repo.put("f01_100", json!({"success": true, "message": "ok"})).await.unwrap();
		drop(repo);

		let reopened = FileRepository::open(path).await.unwrap();
		assert_eq!(
			reopened.get("100").await.unwrap(),
			Some(json!({"success": false, "message": "later"}))
		);
		assert_eq!(reopened.dump_all().await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn torn_tail_is_dropped_and_rewritten() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.jsonl");
		tokio::fs::write(&path, "{\"key\":\"a\",\"value\":1}\n{\"key\":\"b\",\"val")
			.await
			.unwrap();

		let repo = FileRepository::open(path.clone()).await.unwrap();
		assert_eq!(repo.get("a").await.unwrap(), Some(json!(1)));
		assert_eq!(repo.get("b").await.unwrap(), None);

		repo.put("c", json!(3)).await.unwrap();
		let content = tokio::fs::read_to_string(&path).await.unwrap();
		assert_eq!(content.lines().count(), 2);
	}

	#[tokio::test]
	async fn read_only_open_leaves_torn_tail_in_place() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.jsonl");
		let original = "{\"key\":\"a\",\"value\":1}\n{\"key\":\"b\",\"val";
		tokio::fs::write(&path, original).await.unwrap();

		let repo = FileRepository::open_read_only(path.clone()).await.unwrap();
		assert_eq!(repo.dump_all().await.unwrap().len(), 1);
		assert!(matches!(
			repo.put("c", json!(3)).await,
			Err(CheckpointError::ReadOnly(_))
		));
		assert!(matches!(repo.compact().await, Err(CheckpointError::ReadOnly(_))));
		assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), original);
	}

	#[tokio::test]
	async fn second_writer_is_refused_until_first_closes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("progress.jsonl");

		let writer = FileRepository::open(path.clone()).await.unwrap();
		writer.put("10", json!({"success": true, "message": "ok"})).await.unwrap();
		assert!(matches!(
			FileRepository::open(path.clone()).await,
			Err(CheckpointError::Locked(_))
		));

		let reader = FileRepository::open_read_only(path.clone()).await.unwrap();
		assert_eq!(reader.dump_all().await.unwrap().len(), 1);

		drop(writer);
		let writer = FileRepository::open(path).await.unwrap();
		assert!(!writer.is_read_only());
	}

	#[tokio::test]
	async fn concurrent_reader_does_not_lose_writes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.jsonl");
		let writer = FileRepository::open(path.clone()).await.unwrap();

		let done = Arc::new(AtomicBool::new(false));
		let reader = {
			let path = path.clone();
			let done = done.clone();
			tokio::spawn(async move {
				let mut opened = 0usize;
				while !done.load(Ordering::Relaxed) {
					let repo = FileRepository::open_read_only(path.clone()).await.unwrap();
					assert!(repo.is_read_only());
					opened += 1;
					tokio::task::yield_now().await;
				}
				opened
			})
		};

		for height in 0..1100 {
			writer.put("f01000", json!({"height": height})).await.unwrap();
		}
		for n in 0..3000 {
			writer.put(&format!("f0{}", 2000 + n), json!(n)).await.unwrap();
		}
		done.store(true, Ordering::Relaxed);
		assert!(reader.await.unwrap() > 0);

		let expected = writer.dump_all().await.unwrap();
		assert_eq!(expected.len(), 3001);
		drop(writer);

		let content = tokio::fs::read_to_string(&path).await.unwrap();
		assert!(content.lines().count() < 4100, "overwrites were compacted during the run");
		let reopened = FileRepository::open_read_only(path).await.unwrap();
		assert_eq!(reopened.dump_all().await.unwrap(), expected);
		assert_eq!(reopened.get("f01000").await.unwrap(), Some(json!({"height": 1099})));
	}

	#[tokio::test]
	async fn keys_iterate_in_byte_order() {
		let repo = MemoryRepository::default();
		for key in ["50", "100", "f0014_130", "200"] {
			repo.put(key, json!(null)).await.unwrap();
		}
		let keys: Vec<String> = repo.dump_all().await.unwrap().into_keys().collect();
		assert_eq!(keys, vec!["100", "200", "50", "f0014_130"]);
	}
}
