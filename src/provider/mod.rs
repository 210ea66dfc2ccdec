//! Sources of the heights at which a watched address had activity.
//!
//! Event-driven checks only visit these heights instead of scanning a whole range.

pub mod beryx;

pub use beryx::BeryxProvider;

use std::time::Duration;

/// Name of the Beryx provider in configuration.
pub const EVENT_PROVIDER_BERYX: &str = "beryx";

/// Heights at which an address was involved in a canonical transaction.
#[async_trait::async_trait]
pub trait EventHeightProvider: Send + Sync {
	/// Ascending, duplicate-free heights.
	async fn get_address_event_heights(&self, address: &str) -> Result<Vec<i64>, ProviderError>;
}

/// Event provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
	#[error("Unknown event provider: {0}")]
	UnknownProvider(String),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("API request failed with status {status}: {body}")]
	StatusError { status: u16, body: String },

	#[error("Failed to parse JSON response: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Request failed: {0}")]
	RequestFailed(String),
}

/// Build the provider named in configuration.
pub fn new_event_provider(
	name: &str,
	token: Option<String>,
	timeout: Duration,
) -> Result<Box<dyn EventHeightProvider>, ProviderError> {
	match name {
		EVENT_PROVIDER_BERYX => Ok(Box::new(BeryxProvider::new(
			beryx::BERYX_URL.to_string(),
			token,
			timeout,
		)?)),
		other => Err(ProviderError::UnknownProvider(other.to_string())),
	}
}

/// Sort ascending and drop duplicates.
pub(crate) fn normalize_heights(mut heights: Vec<i64>) -> Vec<i64> {
	heights.sort_unstable();
	heights.dedup();
	heights
}
