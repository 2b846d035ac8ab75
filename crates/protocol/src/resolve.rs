use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Answer to a single `A` query made through the engine's local control client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResult {
	/// Raw DNS response message, base64 in JSON.
	#[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
	pub result: Vec<u8>,
	/// Addresses of the resolvers the query was sent to.
	pub resolvers: Vec<String>,
}

fn to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
	let s = String::deserialize(deserializer)?;
	STANDARD.decode(s).map_err(serde::de::Error::custom)
}
