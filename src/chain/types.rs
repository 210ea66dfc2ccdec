//! Types for Lotus JSON-RPC integration

use crate::utils::decimal;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A CID in the node's JSON form: `{"/": "bafy..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidJson {
	#[serde(rename = "/")]
	pub cid: String,
}

/// Ordered set of block CIDs identifying a tipset.
///
/// The empty key addresses the node's current head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TipSetKey(pub Vec<String>);

impl TipSetKey {
	pub fn empty() -> Self {
		Self(Vec::new())
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Human-readable identifier used as the tipset id of parsed transactions.
	pub fn tipset_id(&self) -> String {
		self.0.join(",")
	}

	/// JSON-RPC parameter encoding; the empty key is sent as `null`.
	pub fn to_param(&self) -> Value {
		if self.is_empty() {
			Value::Null
		} else {
			json!(
				self.0
					.iter()
					.map(|cid| CidJson { cid: cid.clone() })
					.collect::<Vec<_>>()
			)
		}
	}
}

/// Block header fields the auditor reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockHeader {
	pub miner: String,
}

/// Tipset as returned by `Filecoin.ChainGetTipSetByHeight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TipSet {
	pub cids: Vec<CidJson>,
	#[serde(default)]
	pub blocks: Vec<BlockHeader>,
	pub height: i64,
}

impl TipSet {
	pub fn key(&self) -> TipSetKey {
		TipSetKey(self.cids.iter().map(|c| c.cid.clone()).collect())
	}

	/// Miner addresses of every block in the tipset, in block order.
	pub fn miners(&self) -> Vec<String> {
		self.blocks.iter().map(|b| b.miner.clone()).collect()
	}
}

/// Actor record from `Filecoin.StateGetActor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorInfo {
	pub code: CidJson,
	#[serde(default)]
	pub nonce: u64,
	#[serde(with = "decimal")]
	pub balance: BigInt,
	/// Delegated (f4) form, present for EVM-addressable actors.
	#[serde(default)]
	pub delegated_address: Option<String>,
}

/// Decoded actor state from `Filecoin.StateReadState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorState {
	#[serde(with = "decimal")]
	pub balance: BigInt,
	pub code: CidJson,
	pub state: Value,
}

/// Lotus client errors
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("{method} RPC error: {message}")]
	RpcError { method: String, message: String },

	#[error("{0} response has neither result nor error")]
	EmptyResponse(String),

	#[error("Invalid {field} in node response: {value}")]
	InvalidResponse { field: &'static str, value: String },
}

impl ChainError {
	/// True when the node refused an account-key lookup because the actor is not an account.
	pub fn is_not_account_actor(&self) -> bool {
		matches!(self, ChainError::RpcError { message, .. } if message.contains("actor code is not account"))
	}
}
