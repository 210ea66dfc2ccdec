//! In-memory collaborators shared by the unit tests.

use crate::address::{AddressSet, EquivalenceLookup, ResolveError};
use crate::chain::{ActorInfo, ActorState, BlockHeader, ChainError, ChainStateReader, CidJson, TipSet, TipSetKey};
use crate::ledger::{MultisigEvent, ParsedTransaction};
use crate::provider::{EventHeightProvider, ProviderError};
use crate::trace::{ExecutionTraceNode, InvocationParser, TraceError, TraceParser, TraceSource};
use base64::{Engine, engine::general_purpose::STANDARD as B64};
use fvm_shared::address::Address;
use num_bigint::BigInt;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic actor-protocol (`f2…`) address for tests.
pub fn actor_address(seed: &str) -> Address {
	Address::new_actor(seed.as_bytes())
}

/// Tipset at `height` whose single CID encodes the height.
pub fn tipset(height: i64, miners: &[&str]) -> TipSet {
	TipSet {
		cids: vec![CidJson {
			cid: format!("bafy-ts-{}", height),
		}],
		blocks: miners
			.iter()
			.map(|m| BlockHeader { miner: m.to_string() })
			.collect(),
		height,
	}
}

/// Top-level message of a compute-state document, without subcalls.
pub fn root_call(from: &str, to: &str, value: &str, method: u64, params: Option<&[u8]>) -> Value {
	let msg = json!({
		"From": from,
		"To": to,
		"Value": value,
		"Method": method,
		"Params": params.map(|p| B64.encode(p)),
	});
	json!({
		"Msg": msg,
		"MsgRct": {"ExitCode": 0},
		"GasCost": {"TotalCost": "0"},
		"ExecutionTrace": {"Msg": msg, "MsgRct": {"ExitCode": 0}, "Subcalls": null},
	})
}

/// Compute-state document with the given roots.
pub fn trace_doc(roots: Vec<Value>) -> Vec<u8> {
	json!({"Root": null, "Trace": roots}).to_string().into_bytes()
}

fn key_height(key: &TipSetKey) -> Option<i64> {
	key.0.first()?.strip_prefix("bafy-ts-")?.parse().ok()
}

/// Scriptable `ChainStateReader`.
///
/// Balances and states are keyed by address string and tipset height; head lookups use the
/// remaining maps. Every call bumps `calls`.
#[derive(Default)]
pub struct FakeChain {
	pub delegated: HashMap<String, String>,
	pub ids: HashMap<String, String>,
	pub robust: HashMap<String, String>,
	pub account_keys: HashMap<String, Result<String, String>>,
	pub balances: HashMap<(String, i64), BigInt>,
	pub states: HashMap<(String, i64), Value>,
	pub tipsets: HashMap<i64, TipSet>,
	pub failing_heights: HashSet<i64>,
	pub calls: AtomicUsize,
}

impl FakeChain {
	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn hit(&self) {
		self.calls.fetch_add(1, Ordering::SeqCst);
	}

	fn rpc_err(method: &str, message: &str) -> ChainError {
		ChainError::RpcError {
			method: method.to_string(),
			message: message.to_string(),
		}
	}

	fn parse(raw: &str) -> Result<Address, ChainError> {
		crate::address::parse_address(raw).map_err(|_| ChainError::InvalidResponse {
			field: "address",
			value: raw.to_string(),
		})
	}
}

#[async_trait::async_trait]
impl ChainStateReader for FakeChain {
	async fn get_actor(&self, address: &Address, tipset: &TipSetKey) -> Result<ActorInfo, ChainError> {
		self.hit();
		let key = address.to_string();
		let balance = match key_height(tipset) {
			Some(h) => self
				.balances
				.get(&(key.clone(), h))
				.cloned()
				.ok_or_else(|| Self::rpc_err("Filecoin.StateGetActor", "actor not found"))?,
			None => BigInt::from(0),
		};
		Ok(ActorInfo {
			code: CidJson { cid: "bafk-code".into() },
			nonce: 0,
			balance,
			delegated_address: self.delegated.get(&key).cloned(),
		})
	}

	async fn lookup_id(&self, address: &Address, _tipset: &TipSetKey) -> Result<Address, ChainError> {
		self.hit();
		match self.ids.get(&address.to_string()) {
			Some(id) => Self::parse(id),
			None => Err(Self::rpc_err("Filecoin.StateLookupID", "actor not found")),
		}
	}

	async fn lookup_robust_address(
		&self,
		address: &Address,
		_tipset: &TipSetKey,
	) -> Result<Address, ChainError> {
		self.hit();
		match self.robust.get(&address.to_string()) {
			Some(robust) => Self::parse(robust),
			None => Err(Self::rpc_err("Filecoin.StateLookupRobustAddress", "actor not found")),
		}
	}

	async fn account_key(&self, address: &Address, _tipset: &TipSetKey) -> Result<Address, ChainError> {
		self.hit();
		match self.account_keys.get(&address.to_string()) {
			Some(Ok(key)) => Self::parse(key),
			Some(Err(message)) => Err(Self::rpc_err("Filecoin.StateAccountKey", message)),
			None => Err(Self::rpc_err("Filecoin.StateAccountKey", "actor not found")),
		}
	}

	async fn get_tipset_by_height(&self, height: i64) -> Result<TipSet, ChainError> {
		self.hit();
		if self.failing_heights.contains(&height) {
			return Err(Self::rpc_err("Filecoin.ChainGetTipSetByHeight", "connection reset"));
		}
		Ok(self
			.tipsets
			.get(&height)
			.cloned()
			.unwrap_or_else(|| tipset(height, &[])))
	}

	async fn read_state(&self, address: &Address, tipset: &TipSetKey) -> Result<ActorState, ChainError> {
		self.hit();
		let height = key_height(tipset).unwrap_or_default();
		let state = self
			.states
			.get(&(address.to_string(), height))
			.cloned()
			.ok_or_else(|| Self::rpc_err("Filecoin.StateReadState", "actor not found"))?;
		Ok(ActorState {
			balance: BigInt::from(0),
			code: CidJson { cid: "bafk-msig".into() },
			state,
		})
	}
}

/// Equivalence lookup backed by a fixed table; unknown addresses map to themselves.
#[derive(Default)]
pub struct StaticLookup {
	pub sets: HashMap<String, AddressSet>,
	pub failing: HashSet<String>,
}

impl StaticLookup {
	pub fn with(mut self, members: &[&str]) -> Self {
		let set: AddressSet = members.iter().map(|m| m.to_string()).collect();
		for m in members {
			self.sets.insert(m.to_string(), set.clone());
		}
		self
	}
}

#[async_trait::async_trait]
impl EquivalenceLookup for StaticLookup {
	async fn equivalents(&self, address: &str) -> Result<AddressSet, ResolveError> {
		if self.failing.contains(address) {
			return Err(ResolveError::InvalidAddress(address.to_string(), "unresolvable".into()));
		}
		Ok(self
			.sets
			.get(address)
			.cloned()
			.unwrap_or_else(|| AddressSet::from([address.to_string()])))
	}
}

/// Trace source serving canned JSON documents per height.
#[derive(Default)]
pub struct FakeTraces {
	pub traces: HashMap<i64, Vec<u8>>,
}

#[async_trait::async_trait]
impl TraceSource for FakeTraces {
	async fn get_trace(&self, height: i64) -> Result<Vec<u8>, TraceError> {
		self.traces
			.get(&height)
			.cloned()
			.ok_or(TraceError::NotFound(height))
	}
}

/// `InvocationParser` that fails at chosen tipset heights.
#[derive(Default)]
pub struct ScriptedParser {
	pub failing_heights: HashSet<i64>,
}

#[async_trait::async_trait]
impl TraceParser for ScriptedParser {
	async fn parse_transactions(
		&self,
		traces: &[ExecutionTraceNode],
		tipset: &TipSet,
	) -> Result<Vec<ParsedTransaction>, TraceError> {
		if self.failing_heights.contains(&tipset.height) {
			return Err(TraceError::ParseError(format!("unsupported trace at {}", tipset.height)));
		}
		InvocationParser::new().parse_transactions(traces, tipset).await
	}

	async fn parse_multisig_events(
		&self,
		transactions: &[ParsedTransaction],
		tipset_id: &str,
		tipset_key: &TipSetKey,
	) -> Result<Vec<MultisigEvent>, TraceError> {
		InvocationParser::new()
			.parse_multisig_events(transactions, tipset_id, tipset_key)
			.await
	}
}

/// Event-height provider backed by a fixed table.
#[derive(Default)]
pub struct FakeProvider {
	pub heights: HashMap<String, Vec<i64>>,
}

#[async_trait::async_trait]
impl EventHeightProvider for FakeProvider {
	async fn get_address_event_heights(&self, address: &str) -> Result<Vec<i64>, ProviderError> {
		self.heights
			.get(address)
			.cloned()
			.ok_or_else(|| ProviderError::RequestFailed(format!("no data for {}", address)))
	}
}
