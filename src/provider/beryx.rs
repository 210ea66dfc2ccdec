//!
//! Client for the Beryx transaction index.

use super::{EventHeightProvider, ProviderError, normalize_heights};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Mainnet base URL of the Beryx data API.
pub const BERYX_URL: &str = "https://api.zondax.ch/fil/data/v4/mainnet";

#[derive(Debug, Deserialize)]
struct BeryxTransaction {
	height: i64,
	#[serde(default)]
	canonical: bool,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
	#[serde(default)]
	transactions: Vec<BeryxTransaction>,
}

/// Beryx-backed event height provider
#[derive(Clone)]
pub struct BeryxProvider {
	http_client: Client,
	base_url: String,
	token: Option<String>,
}

impl BeryxProvider {
	pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			base_url,
			token,
		})
	}
}

/// Canonical heights of a transactions response, ascending and unique.
fn canonical_heights(body: &str) -> Result<Vec<i64>, ProviderError> {
	let response: TransactionsResponse = serde_json::from_str(body)?;
	Ok(normalize_heights(
		response
			.transactions
			.into_iter()
			.filter(|tx| tx.canonical)
			.map(|tx| tx.height)
			.collect(),
	))
}

#[async_trait::async_trait]
impl EventHeightProvider for BeryxProvider {
	async fn get_address_event_heights(&self, address: &str) -> Result<Vec<i64>, ProviderError> {
		let url = format!("{}/transactions/address/{}", self.base_url, address);
		debug!("Fetching event heights from {}", url);

		let mut request = self.http_client.get(&url);
		if let Some(token) = &self.token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await?;
		let status = response.status();
		let body = response.text().await?;
		if !status.is_success() {
			return Err(ProviderError::StatusError {
				status: status.as_u16(),
				body,
			});
		}

		canonical_heights(&body)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keeps_only_canonical_heights() {
		let body = r#"{
			"transactions": [
				{"height": 300, "canonical": true, "tx_hash": "a"},
				{"height": 100, "canonical": true},
				{"height": 200, "canonical": false},
				{"height": 100, "canonical": true}
			],
			"next_cursor": "",
			"total_items": 4
		}"#;
		assert_eq!(canonical_heights(body).unwrap(), vec![100, 300]);
	}

	#[test]
	fn malformed_body_is_an_error() {
		assert!(matches!(
			canonical_heights("<html>"),
			Err(ProviderError::JsonError(_))
		));
	}
}
