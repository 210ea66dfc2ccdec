//! Pruning of execution traces down to invocations touching a watched address set.
//!
//! Descendants are searched level by level. Failed invocations are dropped together with
//! their subtree; every other descendant whose own sender or receiver is watched is emitted
//! as a leaf, and the search continues into the children of every surviving descendant,
//! matched or not. The result is a flat, level-ordered list of matches.
//!
//! Which roots survive depends on the trace schema of the height:
//! - `RootPolicy::KeepMatchedOrCarrier` (legacy schema): a root survives if it matches or if
//!   at least one of its descendants matched, and carries the flattened matches as children.
//! - `RootPolicy::KeepMatchedOnly` (current schema): a root survives only if it matches.
//!   Descendant matches are still attached to surviving roots.

use super::types::ExecutionTraceNode;
use crate::address::AddressSet;

/// Last height served by the legacy trace schema.
pub const NV20_UPGRADE_HEIGHT: i64 = 489_094;

/// Compute-state trace schema in effect at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSchema {
	Legacy,
	Current,
}

impl TraceSchema {
	pub fn for_height(height: i64) -> Self {
		if height <= NV20_UPGRADE_HEIGHT {
			TraceSchema::Legacy
		} else {
			TraceSchema::Current
		}
	}

	pub fn root_policy(self) -> RootPolicy {
		match self {
			TraceSchema::Legacy => RootPolicy::KeepMatchedOrCarrier,
			TraceSchema::Current => RootPolicy::KeepMatchedOnly,
		}
	}
}

/// Rule deciding which root invocations survive filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPolicy {
	/// Keep a root that matches, or that carries at least one matching descendant.
	KeepMatchedOrCarrier,
	/// Keep a root only when its own endpoints match.
	KeepMatchedOnly,
}

impl RootPolicy {
	/// Apply the policy to a list of root invocations.
	pub fn apply(self, watched: &AddressSet, roots: Vec<ExecutionTraceNode>) -> Vec<ExecutionTraceNode> {
		roots
			.into_iter()
			.filter_map(|mut root| {
				if root.is_error() {
					return None;
				}
				let children = std::mem::take(&mut root.children);
				root.children = flatten_matches(watched, children);

				let keep = match self {
					RootPolicy::KeepMatchedOrCarrier => root.touches(watched) || !root.children.is_empty(),
					RootPolicy::KeepMatchedOnly => root.touches(watched),
				};
				keep.then_some(root)
			})
			.collect()
	}
}

/// Filter the roots of the trace recorded at `height`.
pub fn filter_trace(
	height: i64,
	watched: &AddressSet,
	roots: Vec<ExecutionTraceNode>,
) -> Vec<ExecutionTraceNode> {
	TraceSchema::for_height(height).root_policy().apply(watched, roots)
}

/// Breadth-first search for matching descendants.
///
/// Matches are returned in level order with their children cleared.
pub fn flatten_matches(watched: &AddressSet, nodes: Vec<ExecutionTraceNode>) -> Vec<ExecutionTraceNode> {
	let mut matches = Vec::new();
	let mut level = nodes;

	while !level.is_empty() {
		let mut next_level = Vec::new();
		for mut node in level {
			if node.is_error() {
				continue;
			}
			next_level.append(&mut node.children);
			if node.touches(watched) {
				matches.push(node);
			}
		}
		level = next_level;
	}

	matches
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::trace::types::{TraceMessage, TraceReceipt};

	fn node(from: &str, to: &str, exit_code: i64, children: Vec<ExecutionTraceNode>) -> ExecutionTraceNode {
		ExecutionTraceNode {
			message: Some(TraceMessage {
				from: from.to_string(),
				to: to.to_string(),
				value: Some("0".into()),
				method: 0,
				params: None,
			}),
			receipt: Some(TraceReceipt { exit_code }),
			gas_cost: None,
			children,
		}
	}

	fn watched(addrs: &[&str]) -> AddressSet {
		addrs.iter().map(|a| a.to_string()).collect()
	}

	fn endpoints(nodes: &[ExecutionTraceNode]) -> Vec<(String, String)> {
		nodes
			.iter()
			.map(|n| {
				let m = n.message.as_ref().unwrap();
				(m.from.clone(), m.to.clone())
			})
			.collect()
	}

	#[test]
	fn schema_switches_after_upgrade_height() {
		assert_eq!(TraceSchema::for_height(NV20_UPGRADE_HEIGHT), TraceSchema::Legacy);
		assert_eq!(TraceSchema::for_height(NV20_UPGRADE_HEIGHT + 1), TraceSchema::Current);
	}

	#[test]
	fn descendants_are_flattened_in_level_order() {
		let tree = vec![
			node("a", "w", 0, vec![node("w", "x", 0, vec![])]),
			node("b", "c", 0, vec![node("c", "w", 0, vec![])]),
		];
		let flat = flatten_matches(&watched(&["w"]), tree);
		assert_eq!(
			endpoints(&flat),
			vec![
				("a".to_string(), "w".to_string()),
				("w".to_string(), "x".to_string()),
				("c".to_string(), "w".to_string()),
			]
		);
		assert!(flat.iter().all(|n| n.children.is_empty()));
	}

	#[test]
	fn failed_subtrees_are_pruned() {
		let tree = vec![node("a", "b", 33, vec![node("b", "w", 0, vec![])])];
		assert!(flatten_matches(&watched(&["w"]), tree).is_empty());
	}

	#[test]
	fn every_kept_node_touches_or_carries_and_no_match_is_lost() {
		let set = watched(&["w", "w-id"]);
		let roots = vec![
			node("x", "y", 0, vec![node("y", "w-id", 0, vec![node("w-id", "z", 0, vec![])])]),
			node("w", "q", 0, vec![]),
			node("p", "q", 0, vec![node("q", "r", 0, vec![])]),
			node("w", "q", 1, vec![node("q", "w", 0, vec![])]),
		];

		let kept = RootPolicy::KeepMatchedOrCarrier.apply(&set, roots);
		assert_eq!(kept.len(), 2);
		for root in &kept {
			assert!(root.touches(&set) || !root.children.is_empty());
			assert!(root.children.iter().all(|c| c.touches(&set) && c.children.is_empty()));
		}
		assert_eq!(
			endpoints(&kept[0].children),
			vec![
				("y".to_string(), "w-id".to_string()),
				("w-id".to_string(), "z".to_string())
			]
		);
	}

	#[test]
	fn current_schema_never_promotes_carriers() {
		let set = watched(&["w"]);
		let roots = vec![
			node("x", "y", 0, vec![node("y", "w", 0, vec![])]),
			node("w", "y", 0, vec![node("y", "w", 0, vec![]), node("y", "z", 0, vec![])]),
		];

		let legacy = filter_trace(NV20_UPGRADE_HEIGHT, &set, roots.clone());
		let current = filter_trace(NV20_UPGRADE_HEIGHT + 1, &set, roots);

		assert_eq!(legacy.len(), 2);
		assert_eq!(current.len(), 1);
		assert_eq!(endpoints(&current), vec![("w".to_string(), "y".to_string())]);
		assert_eq!(
			endpoints(&current[0].children),
			vec![("y".to_string(), "w".to_string())]
		);
	}

	#[test]
	fn nodes_without_receipt_or_message_are_searched_through() {
		let set = watched(&["w"]);
		let carrier = ExecutionTraceNode {
			message: None,
			receipt: None,
			gas_cost: None,
			children: vec![node("a", "w", 0, vec![])],
		};
		let flat = flatten_matches(&set, vec![carrier]);
		assert_eq!(endpoints(&flat), vec![("a".to_string(), "w".to_string())]);
	}
}
