//! Height-scoped trace checks.
//!
//! These walk a height range without any ledger: the trace must decode, its null-ness must agree
//! with the tipset returned for the height, and block rewards in the trace must name exactly the
//! tipset's miners. They resume from the latest recorded height, which is checked again.

use crate::address::{AddressSet, EquivalenceLookup};
use crate::audit::context::AuditContext;
use crate::audit::orchestrator::UnitCheck;
use crate::audit::types::{CheckError, CheckUnit, HeightRange, Mismatch, UnitPlan, UnitReport};
use crate::checkpoint::{CheckpointStore, resume_height_check};
use crate::trace::{ExecutionTraceNode, decode_trace};
use base64::{Engine, engine::general_purpose::STANDARD as B64};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Reward actor; its `AwardBlockReward` calls name the block miners.
pub const REWARD_ACTOR: &str = "f02";
const METHOD_AWARD_BLOCK_REWARD: u64 = 2;

/// Units from the resume height through the end of `range`.
async fn plan_range(
	ctx: &AuditContext,
	store: &CheckpointStore,
	name: &str,
	range: HeightRange,
) -> Result<UnitPlan, CheckError> {
	let latest = ctx.call("get_latest_height", store.get_latest_height()).await?;
	let start = resume_height_check(latest, range.start);
	if start != range.start {
		info!(check = name, latest_height = latest, "Resuming from latest height");
	}
	Ok(range.units_from(start))
}

async fn fetch_roots(ctx: &AuditContext, height: i64) -> Result<Vec<ExecutionTraceNode>, CheckError> {
	let bytes = ctx.call("get_trace", ctx.traces.get_trace(height)).await?;
	Ok(decode_trace(&bytes)?)
}

fn verdict(unit: &CheckUnit, outcome: Result<(), CheckError>) -> UnitReport {
	let mut report = UnitReport::default();
	report.record(unit.progress_key(), outcome);
	report
}

/// Every trace in the range decodes as a compute-state document.
pub struct ValidJsonCheck {
	range: HeightRange,
}

impl ValidJsonCheck {
	pub fn new(range: HeightRange) -> Self {
		Self { range }
	}
}

#[async_trait::async_trait]
impl UnitCheck for ValidJsonCheck {
	fn name(&self) -> &str {
		"validate-json"
	}

	async fn plan(&mut self, ctx: &AuditContext, store: &CheckpointStore) -> Result<UnitPlan, CheckError> {
		plan_range(ctx, store, self.name(), self.range).await
	}

	async fn check_unit(&mut self, ctx: &AuditContext, unit: &CheckUnit) -> Result<UnitReport, CheckError> {
		let roots = fetch_roots(ctx, unit.height()).await?;
		debug!(height = unit.height(), roots = roots.len(), "Trace decoded");
		Ok(verdict(unit, Ok(())))
	}
}

/// A trace without invocations must belong to a null round and vice versa.
pub struct NullBlockCheck {
	range: HeightRange,
}

impl NullBlockCheck {
	pub fn new(range: HeightRange) -> Self {
		Self { range }
	}
}

#[async_trait::async_trait]
impl UnitCheck for NullBlockCheck {
	fn name(&self) -> &str {
		"validate-null-blocks"
	}

	async fn plan(&mut self, ctx: &AuditContext, store: &CheckpointStore) -> Result<UnitPlan, CheckError> {
		plan_range(ctx, store, self.name(), self.range).await
	}

	async fn check_unit(&mut self, ctx: &AuditContext, unit: &CheckUnit) -> Result<UnitReport, CheckError> {
		let height = unit.height();
		let trace_null = fetch_roots(ctx, height).await?.is_empty();

		// the node answers a null round with the next non-null tipset
		let tipset = ctx.call("get_tipset", ctx.chain.get_tipset_by_height(height)).await?;
		let tipset_null = tipset.height != height;

		let outcome = if trace_null == tipset_null {
			Ok(())
		} else {
			Err(Mismatch::NullBlockMismatch {
				height,
				trace_null,
				tipset_null,
			}
			.into())
		};
		Ok(verdict(unit, outcome))
	}
}

/// Block rewards paid in the trace match the tipset's block miners.
pub struct CanonicalChainCheck {
	range: HeightRange,
}

impl CanonicalChainCheck {
	pub fn new(range: HeightRange) -> Self {
		Self { range }
	}
}

/// Miners named by top-level reward calls. Undecodable parameters are skipped.
pub fn rewarded_miners(roots: &[ExecutionTraceNode]) -> BTreeSet<String> {
	roots
		.iter()
		.filter_map(|root| root.message.as_ref())
		.filter(|msg| msg.to == REWARD_ACTOR && msg.method == METHOD_AWARD_BLOCK_REWARD)
		.filter_map(|msg| {
			let params = msg.params.as_deref()?;
			match decode_reward_miner(params) {
				Ok(miner) => Some(miner),
				Err(e) => {
					warn!(from = %msg.from, error = %e, "Failed to parse block reward params");
					None
				}
			}
		})
		.collect()
}

fn decode_reward_miner(params: &str) -> Result<String, String> {
	let bytes = B64.decode(params).map_err(|e| e.to_string())?;
	let (miner, _penalty, _gas_reward, _win_count): (Address, TokenAmount, TokenAmount, i64) =
		fvm_ipld_encoding::from_slice(&bytes).map_err(|e| e.to_string())?;
	Ok(miner.to_string())
}

#[async_trait::async_trait]
impl UnitCheck for CanonicalChainCheck {
	fn name(&self) -> &str {
		"validate-canonical-chain"
	}

	async fn plan(&mut self, ctx: &AuditContext, store: &CheckpointStore) -> Result<UnitPlan, CheckError> {
		plan_range(ctx, store, self.name(), self.range).await
	}

	async fn check_unit(&mut self, ctx: &AuditContext, unit: &CheckUnit) -> Result<UnitReport, CheckError> {
		let height = unit.height();
		let trace_miners = rewarded_miners(&fetch_roots(ctx, height).await?);

		let tipset = ctx.call("get_tipset", ctx.chain.get_tipset_by_height(height)).await?;
		let chain_miners: BTreeSet<String> = tipset.miners().into_iter().collect();

		if trace_miners.len() != chain_miners.len() {
			let mismatch = Mismatch::MinerMismatch {
				height,
				detail: format!(
					"length of miners do not match: trace={}, onchain={}",
					trace_miners.len(),
					chain_miners.len()
				),
			};
			return Ok(verdict(unit, Err(mismatch.into())));
		}

		for miner in &trace_miners {
			let equivalents = match ctx.call("resolve_miner", ctx.resolver.equivalents(miner)).await {
				Ok(set) => set,
				Err(e) if e.is_fatal() => return Err(e),
				Err(e) => {
					warn!(height, miner = %miner, error = %e, "Failed to resolve miner, comparing as given");
					AddressSet::from([miner.clone()])
				}
			};

			if !equivalents.iter().any(|m| chain_miners.contains(m)) {
				let mismatch = Mismatch::MinerMismatch {
					height,
					detail: format!("miner {} not found", miner),
				};
				return Ok(verdict(unit, Err(mismatch.into())));
			}
		}

		Ok(verdict(unit, Ok(())))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::audit::CheckDriver;
	use crate::checkpoint::ProgressRecord;
	use crate::testing::{FakeChain, FakeTraces, actor_address, root_call, tipset, trace_doc};
	use crate::trace::InvocationParser;
	use std::sync::Arc;
	use std::time::Duration;

	fn driver(chain: FakeChain, traces: FakeTraces, name: &str) -> CheckDriver {
		let ctx = AuditContext::new(
			Arc::new(chain),
			Arc::new(traces),
			Arc::new(InvocationParser::new()),
			Duration::from_secs(5),
		);
		CheckDriver::new(Arc::new(ctx), CheckpointStore::in_memory(name))
	}

	fn reward_call(miner: Address) -> serde_json::Value {
		let params = fvm_ipld_encoding::to_vec(&(
			miner,
			TokenAmount::from_atto(0),
			TokenAmount::from_atto(10),
			1i64,
		))
		.unwrap();
		root_call("f00", REWARD_ACTOR, "0", METHOD_AWARD_BLOCK_REWARD, Some(params.as_slice()))
	}

	#[tokio::test]
	async fn valid_json_resumes_from_latest_height() {
		let mut traces = FakeTraces::default();
		traces.traces.insert(5, trace_doc(vec![]));
		traces.traces.insert(6, b"{\"Trace\": [".to_vec());
		let driver = driver(FakeChain::default(), traces, "validate-json");
		driver.store().update_progress_height(5, &ProgressRecord::failed("stale")).await.unwrap();

		let stats = driver.run(&mut ValidJsonCheck::new(HeightRange::new(1, 7).unwrap())).await.unwrap();
		assert_eq!(stats.first_height, Some(5));

		let progress = driver.store().dump_progress().await.unwrap();
		assert!(progress["5"].success);
		assert!(progress["6"].message.starts_with("Trace error: Trace decode error"));
		assert!(!progress["7"].success);
		assert!(!progress.contains_key("4"));
	}

	#[tokio::test]
	async fn null_rounds_must_agree() {
		let mut chain = FakeChain::default();
		// 11 and 12 are null rounds: the node returns tipset 13
		chain.tipsets.insert(11, tipset(13, &[]));
		chain.tipsets.insert(12, tipset(13, &[]));
		let mut traces = FakeTraces::default();
		traces.traces.insert(10, trace_doc(vec![root_call("f0100", "f0200", "1", 0, None)]));
		traces.traces.insert(11, trace_doc(vec![]));
		traces.traces.insert(12, trace_doc(vec![root_call("f0100", "f0200", "1", 0, None)]));
		traces.traces.insert(13, trace_doc(vec![]));
		let driver = driver(chain, traces, "validate-null-blocks");

		driver
			.run(&mut NullBlockCheck::new(HeightRange::new(10, 13).unwrap()))
			.await
			.unwrap();

		let progress = driver.store().dump_progress().await.unwrap();
		assert!(progress["10"].success);
		assert!(progress["11"].success);
		assert_eq!(
			progress["12"].message,
			"null block mismatch at height 12: trace null=false, tipset null=true"
		);
		assert_eq!(
			progress["13"].message,
			"null block mismatch at height 13: trace null=true, tipset null=false"
		);
	}

	#[tokio::test]
	async fn rewarded_miners_must_match_block_miners() {
		let worker = actor_address("miner-worker");
		let mut chain = FakeChain::default();
		chain.tipsets.insert(20, tipset(20, &["f01234", "f05678"]));
		chain.tipsets.insert(21, tipset(21, &["f01234", "f05678"]));
		chain.tipsets.insert(22, tipset(22, &["f01234"]));
		chain.ids.insert(worker.to_string(), "f05678".into());
		chain.account_keys.insert("f01234".into(), Err("actor code is not account".into()));
		chain.robust.insert("f01234".into(), actor_address("miner-1234").to_string());

		let mut traces = FakeTraces::default();
		traces.traces.insert(
			20,
			trace_doc(vec![reward_call(Address::new_id(1234)), reward_call(worker)]),
		);
		traces.traces.insert(
			21,
			trace_doc(vec![reward_call(Address::new_id(1234)), reward_call(Address::new_id(9999))]),
		);
		traces.traces.insert(22, trace_doc(vec![reward_call(Address::new_id(1234)), reward_call(worker)]));
		let driver = driver(chain, traces, "validate-canonical-chain");

		driver
			.run(&mut CanonicalChainCheck::new(HeightRange::new(20, 22).unwrap()))
			.await
			.unwrap();

		let progress = driver.store().dump_progress().await.unwrap();
		assert!(progress["20"].success);
		assert_eq!(progress["21"].message, "miner mismatch at height 21: miner f09999 not found");
		assert_eq!(
			progress["22"].message,
			"miner mismatch at height 22: length of miners do not match: trace=2, onchain=1"
		);
	}

	#[test]
	fn skips_undecodable_reward_params() {
		let root = ExecutionTraceNode {
			message: Some(crate::trace::TraceMessage {
				from: "f00".into(),
				to: REWARD_ACTOR.into(),
				value: None,
				method: METHOD_AWARD_BLOCK_REWARD,
				params: Some(B64.encode([0xff, 0x00])),
			}),
			..Default::default()
		};
		assert!(rewarded_miners(&[root]).is_empty());
	}
}
