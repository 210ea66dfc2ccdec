//! Serde adapters that encode big integers as decimal strings.
//!
//! Node responses carry token amounts as JSON strings (`"Balance": "1000"`), and the ledger
//! snapshots persist them the same way so that a snapshot stays readable by hand.

use num_bigint::BigInt;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.collect_str(value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<BigInt, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;
	raw.parse::<BigInt>()
		.map_err(|e| serde::de::Error::custom(format!("invalid decimal amount {:?}: {}", raw, e)))
}

/// Same encoding for nullable amounts; `null` stays distinct from zero.
pub mod option {
	use num_bigint::BigInt;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &Option<BigInt>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match value {
			Some(v) => serializer.collect_str(v),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BigInt>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = Option::<String>::deserialize(deserializer)?;
		raw.map(|s| {
			s.parse::<BigInt>().map_err(|e| {
				serde::de::Error::custom(format!("invalid decimal amount {:?}: {}", s, e))
			})
		})
		.transpose()
	}
}
