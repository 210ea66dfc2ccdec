//! JSON-RPC client for a Lotus full node.
//!
//! Every call is a single HTTP POST with a per-request timeout. Failures are returned to the
//! caller as `ChainError` and never retried here; the check driver records them as failed units.

use super::types::*;
use super::ChainStateReader;
use crate::address::parse_address;
use fvm_shared::address::Address;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default per-request timeout when none is configured.
pub const DEFAULT_REQ_TIMEOUT: Duration = Duration::from_secs(60);

/// Lotus JSON-RPC client
#[derive(Clone)]
pub struct LotusClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// The node's RPC endpoint, e.g. `http://127.0.0.1:1234/rpc/v1`.
	url: Url,
	/// Optional bearer token for authenticated nodes.
	bearer_token: Option<String>,
}

impl LotusClient {
	/// Create a new client.
	///
	/// # Arguments
	/// * `url` - The node's JSON-RPC endpoint.
	/// * `bearer_token` - Optional API token.
	/// * `timeout` - Timeout applied to every request.
	pub fn new(url: Url, bearer_token: Option<String>, timeout: Duration) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			url,
			bearer_token,
		})
	}

	/// Issue a JSON-RPC call and deserialize its `result` into `T`.
	pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"method": method,
			"params": params,
			"id": 1
		});

		debug!("{} request: {}", method, request_body);

		let mut builder = self.http_client.post(self.url.as_str()).json(&request_body);
		if let Some(token) = &self.bearer_token {
			builder = builder.bearer_auth(token);
		}

		let response_body = builder.send().await?.text().await?;
		debug!("{} raw response: {}", method, response_body);

		let value: Value = serde_json::from_str(&response_body)?;
		if let Some(error) = value.get("error") {
			let message = error
				.get("message")
				.and_then(|v| v.as_str())
				.unwrap_or("Unknown error")
				.to_string();
			return Err(ChainError::RpcError {
				method: method.to_string(),
				message,
			});
		}

		match value.get("result") {
			Some(result) => Ok(serde_json::from_value(result.clone())?),
			None => Err(ChainError::EmptyResponse(method.to_string())),
		}
	}

	async fn request_address(&self, method: &str, params: Value) -> Result<Address, ChainError> {
		let raw: String = self.request(method, params).await?;
		parse_address(&raw).map_err(|_| ChainError::InvalidResponse {
			field: "address",
			value: raw,
		})
	}
}

#[async_trait::async_trait]
impl ChainStateReader for LotusClient {
	async fn get_actor(&self, address: &Address, tipset: &TipSetKey) -> Result<ActorInfo, ChainError> {
		self.request(
			"Filecoin.StateGetActor",
			json!([address.to_string(), tipset.to_param()]),
		)
		.await
	}

	async fn lookup_id(&self, address: &Address, tipset: &TipSetKey) -> Result<Address, ChainError> {
		self.request_address(
			"Filecoin.StateLookupID",
			json!([address.to_string(), tipset.to_param()]),
		)
		.await
	}

	async fn lookup_robust_address(
		&self,
		address: &Address,
		tipset: &TipSetKey,
	) -> Result<Address, ChainError> {
		self.request_address(
			"Filecoin.StateLookupRobustAddress",
			json!([address.to_string(), tipset.to_param()]),
		)
		.await
	}

	async fn account_key(&self, address: &Address, tipset: &TipSetKey) -> Result<Address, ChainError> {
		self.request_address(
			"Filecoin.StateAccountKey",
			json!([address.to_string(), tipset.to_param()]),
		)
		.await
	}

	async fn get_tipset_by_height(&self, height: i64) -> Result<TipSet, ChainError> {
		self.request(
			"Filecoin.ChainGetTipSetByHeight",
			json!([height, TipSetKey::empty().to_param()]),
		)
		.await
	}

	async fn read_state(&self, address: &Address, tipset: &TipSetKey) -> Result<ActorState, ChainError> {
		self.request(
			"Filecoin.StateReadState",
			json!([address.to_string(), tipset.to_param()]),
		)
		.await
	}
}
