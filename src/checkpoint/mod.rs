//! Resumable progress and ledger-state persistence.
//!
//! Every check owns two namespaces: progress records keyed by height or `address_height`, and
//! ledger snapshots keyed by address. The `repositories` submodule provides the ordered
//! key-value backends, `store` the check-level operations and the resume rules.

pub mod repositories;
pub mod store;

pub use repositories::{FileRepository, KeyValueRepository, MemoryRepository};
pub use store::*;

use std::path::Path;

/// Checkpoint persistence errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
	#[error("Invalid key: key must not be empty")]
	InvalidKey,

	#[error("Checkpoint {0} is locked by another writer")]
	Locked(String),

	#[error("Checkpoint {0} was opened read-only")]
	ReadOnly(String),

	#[error("IO error on {path}: {source}")]
	IoError {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),
}

impl CheckpointError {
	fn io(path: &Path, source: std::io::Error) -> Self {
		CheckpointError::IoError {
			path: path.display().to_string(),
			source,
		}
	}
}

/// Ledger state that records the last height it was advanced to.
pub trait Checkpointed {
	fn height(&self) -> i64;
}
