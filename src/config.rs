//! Configuration for an audit run

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Audit run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
	/// Full node connection
	pub node: NodeConfig,

	/// Trace document location
	pub traces: TraceConfig,

	/// Checkpoint store location
	pub checkpoint: CheckpointConfig,

	/// What to check and over which units
	pub check: CheckConfig,
}

/// Full node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
	/// JSON-RPC endpoint
	pub url: String,

	/// API token
	pub token: Option<String>,

	/// Timeout for every node, provider and storage call (seconds)
	pub call_timeout_secs: u64,
}

/// Trace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
	/// Directory holding `traces_<height>.json` documents
	pub dir: PathBuf,
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
	/// Directory for progress and state logs
	pub dir: PathBuf,
}

/// Check selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
	pub kind: CheckKind,

	/// First height of range checks
	pub start_height: i64,

	/// Last height of range checks, inclusive
	pub end_height: i64,

	/// Newline-separated address list
	pub address_file: Option<PathBuf>,

	/// Addresses given inline, checked after those of `address_file`
	pub addresses: Vec<String>,

	/// Event provider for event-driven checks
	pub event_provider: String,

	pub event_provider_token: Option<String>,

	/// Wall-clock budget for the whole run (seconds)
	pub deadline_secs: Option<u64>,
}

/// Available checks; the name also names the check's store files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
	#[serde(rename = "validate-json")]
	ValidJson,
	#[serde(rename = "validate-null-blocks")]
	NullBlocks,
	#[serde(rename = "validate-canonical-chain")]
	CanonicalChain,
	#[serde(rename = "validate-address-balance")]
	AddressBalance,
	#[serde(rename = "validate-address-balance-sequential")]
	AddressBalanceSequential,
	#[serde(rename = "validate-multisig-state")]
	MultisigState,
	#[serde(rename = "validate-multisig-state-sequential")]
	MultisigStateSequential,
}

impl CheckKind {
	pub fn as_str(self) -> &'static str {
		match self {
			CheckKind::ValidJson => "validate-json",
			CheckKind::NullBlocks => "validate-null-blocks",
			CheckKind::CanonicalChain => "validate-canonical-chain",
			CheckKind::AddressBalance => "validate-address-balance",
			CheckKind::AddressBalanceSequential => "validate-address-balance-sequential",
			CheckKind::MultisigState => "validate-multisig-state",
			CheckKind::MultisigStateSequential => "validate-multisig-state-sequential",
		}
	}

	/// Checks that walk a height range rather than provider heights.
	pub fn uses_height_range(self) -> bool {
		!matches!(self, CheckKind::AddressBalance | CheckKind::MultisigState)
	}

	/// Checks that need a watched address list.
	pub fn needs_addresses(self) -> bool {
		matches!(
			self,
			CheckKind::AddressBalance
				| CheckKind::AddressBalanceSequential
				| CheckKind::MultisigState
				| CheckKind::MultisigStateSequential
		)
	}
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Failed to read config {path}: {source}")]
	ReadError {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse config: {0}")]
	ParseError(String),

	#[error("Invalid config: {0}")]
	Invalid(String),
}

impl Default for NodeConfig {
	fn default() -> Self {
		Self {
			url: "http://127.0.0.1:1234/rpc/v1".to_string(),
			token: None,
			call_timeout_secs: crate::chain::DEFAULT_REQ_TIMEOUT.as_secs(),
		}
	}
}

impl Default for TraceConfig {
	fn default() -> Self {
		Self {
			dir: PathBuf::from("./data/traces"),
		}
	}
}

impl Default for CheckpointConfig {
	fn default() -> Self {
		Self {
			dir: PathBuf::from("./data/checkpoints"),
		}
	}
}

impl Default for CheckConfig {
	fn default() -> Self {
		Self {
			kind: CheckKind::ValidJson,
			start_height: 1,
			end_height: 0,
			address_file: None,
			addresses: vec![],
			event_provider: crate::provider::EVENT_PROVIDER_BERYX.to_string(),
			event_provider_token: None,
			deadline_secs: None,
		}
	}
}

impl AuditConfig {
	/// Load from a TOML file
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
			path: path.display().to_string(),
			source,
		})?;
		Self::from_toml(&content)
	}

	pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
		toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	/// Load from an optional file, then apply `AUDIT_*` environment overrides and validate.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_overrides(|name| std::env::var(name).ok())?;
		config.validate()?;
		Ok(config)
	}

	/// Override fields from variables returned by `lookup`.
	pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(url) = lookup("AUDIT_NODE_URL") {
			self.node.url = url;
		}
		if let Some(token) = lookup("AUDIT_NODE_TOKEN") {
			self.node.token = Some(token);
		}
		if let Some(dir) = lookup("AUDIT_TRACE_DIR") {
			self.traces.dir = PathBuf::from(dir);
		}
		if let Some(dir) = lookup("AUDIT_CHECKPOINT_DIR") {
			self.checkpoint.dir = PathBuf::from(dir);
		}
		if let Some(kind) = lookup("AUDIT_CHECK") {
			self.check.kind = serde_json::from_value(serde_json::Value::String(kind.clone()))
				.map_err(|_| ConfigError::Invalid(format!("unknown check {:?}", kind)))?;
		}
		if let Some(start) = lookup("AUDIT_START_HEIGHT") {
			self.check.start_height = parse_height("AUDIT_START_HEIGHT", &start)?;
		}
		if let Some(end) = lookup("AUDIT_END_HEIGHT") {
			self.check.end_height = parse_height("AUDIT_END_HEIGHT", &end)?;
		}
		if let Some(file) = lookup("AUDIT_ADDRESS_FILE") {
			self.check.address_file = Some(PathBuf::from(file));
		}
		if let Some(token) = lookup("AUDIT_EVENT_PROVIDER_TOKEN") {
			self.check.event_provider_token = Some(token);
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.node.url.trim().is_empty() {
			return Err(ConfigError::Invalid("node url must not be empty".into()));
		}
		if self.node.call_timeout_secs == 0 {
			return Err(ConfigError::Invalid("call timeout must be positive".into()));
		}
		if self.check.kind.uses_height_range() && self.check.end_height < self.check.start_height {
			return Err(ConfigError::Invalid(format!(
				"end height {} is less than start height {}",
				self.check.end_height, self.check.start_height
			)));
		}
		if self.check.kind.needs_addresses()
			&& self.check.address_file.is_none()
			&& self.check.addresses.is_empty()
		{
			return Err(ConfigError::Invalid(format!(
				"{} needs an address file or inline addresses",
				self.check.kind.as_str()
			)));
		}
		Ok(())
	}

	pub fn call_timeout(&self) -> Duration {
		Duration::from_secs(self.node.call_timeout_secs)
	}

	pub fn deadline(&self) -> Option<Duration> {
		self.check.deadline_secs.map(Duration::from_secs)
	}
}

fn parse_height(name: &str, raw: &str) -> Result<i64, ConfigError> {
	raw.trim()
		.parse()
		.map_err(|_| ConfigError::Invalid(format!("{} is not a height: {:?}", name, raw)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	#[test]
	fn parses_toml_with_defaults() {
		let config = AuditConfig::from_toml(
			r#"
			[node]
			url = "https://node.example/rpc/v1"

			[check]
			kind = "validate-multisig-state-sequential"
			start_height = 100
			end_height = 200
			addresses = ["f02000"]
			"#,
		)
		.unwrap();

		assert_eq!(config.check.kind, CheckKind::MultisigStateSequential);
		assert_eq!(config.node.call_timeout_secs, 60);
		assert_eq!(config.check.event_provider, "beryx");
		config.validate().unwrap();
	}

	#[test]
	fn env_overrides_win() {
		let env: HashMap<&str, &str> = HashMap::from([
			("AUDIT_CHECK", "validate-null-blocks"),
			("AUDIT_START_HEIGHT", "10"),
			("AUDIT_END_HEIGHT", "20"),
		]);
		let mut config = AuditConfig::default();
		config
			.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
			.unwrap();

		assert_eq!(config.check.kind, CheckKind::NullBlocks);
		assert_eq!((config.check.start_height, config.check.end_height), (10, 20));
		config.validate().unwrap();
	}

	#[test]
	fn rejects_inverted_range_and_missing_addresses() {
		let mut config = AuditConfig::default();
		config.check.start_height = 20;
		config.check.end_height = 10;
		assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

		config.check.kind = CheckKind::AddressBalance;
		assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
		config.check.addresses = vec!["f01000".into()];
		// event-driven checks ignore the range
		config.validate().unwrap();
	}

	#[test]
	fn unknown_check_name_is_invalid() {
		let mut config = AuditConfig::default();
		let err = config
			.apply_overrides(|name| (name == "AUDIT_CHECK").then(|| "validate-everything".to_string()))
			.unwrap_err();
		assert!(matches!(err, ConfigError::Invalid(_)));
	}
}
