use super::types::TraceError;
use std::path::PathBuf;
use tracing::debug;

/// Retrieval of the raw compute-state document recorded for a height.
#[async_trait::async_trait]
pub trait TraceSource: Send + Sync {
	async fn get_trace(&self, height: i64) -> Result<Vec<u8>, TraceError>;
}

/// Object name of the trace document for a height.
pub fn trace_object_name(height: i64) -> String {
	format!("traces_{:012}.json", height)
}

/// Trace source reading already-decompressed documents from a local directory.
pub struct DirectoryTraceSource {
	root: PathBuf,
}

impl DirectoryTraceSource {
	pub fn new(root: PathBuf) -> Self {
		Self { root }
	}
}

#[async_trait::async_trait]
impl TraceSource for DirectoryTraceSource {
	async fn get_trace(&self, height: i64) -> Result<Vec<u8>, TraceError> {
		let path = self.root.join(trace_object_name(height));
		debug!("Reading trace from {:?}", path);
		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TraceError::NotFound(height)),
			Err(e) => Err(TraceError::IoError(e)),
		}
	}
}
