//! Carries the ledger, the result accumulator, and caller state across the provider redirect.
//!
//! Before the browser leaves, [`RedirectBridge::persist`] writes three entries to a
//! [`RedirectStorage`] as base64-encoded JSON. After the provider redirects back,
//! [`RedirectBridge::resume`] reads them once and deletes them, so a second resume sees
//! an empty ledger. Providers that echo `state` carry the [`StateEnvelope`] in the URL
//! instead (see [`encode_state`] and [`decode_state`]).

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::percent_decode_str;
// self
use crate::{
	_prelude::*,
	error::BridgeError,
	ledger::{Ledger, ResultAccumulator},
	oauth1,
};

/// Storage key holding the ledger.
pub const LEDGER_KEY: &str = "fetch data before redirect: ";
/// Storage key holding the result accumulator.
pub const RESULTS_KEY: &str = "values to return: ";
/// Storage key holding the state envelope in local-storage mode.
pub const STATE_KEY: &str = "state";

/// Future returned by [`RedirectStorage`] operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + 'a + Send>>;

/// Key-value storage that survives the redirect (browser local storage, a file, memory).
pub trait RedirectStorage
where
	Self: Send + Sync,
{
	/// Reads a value.
	fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>>;

	/// Writes a value, replacing any previous one.
	fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()>;

	/// Deletes a value; deleting a missing key is not an error.
	fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

/// Error type produced by [`RedirectStorage`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StorageError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Provider name plus opaque caller state; lets the redirect handler pick the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
	/// Provider name from the configuration.
	pub provider: String,
	/// Caller state, passed back untouched.
	#[serde(default)]
	pub state: Value,
}
impl StateEnvelope {
	/// Wraps `state` for `provider`.
	pub fn new(provider: impl Into<String>, state: Value) -> Self {
		Self { provider: provider.into(), state }
	}
}

/// What [`RedirectBridge::resume`] recovered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resumed {
	/// Ledger from before the redirect; empty when nothing was stored.
	pub ledger: Ledger,
	/// Result accumulator from before the redirect; empty when nothing was stored.
	pub results: ResultAccumulator,
	/// State envelope stored in local-storage mode.
	pub state: Option<StateEnvelope>,
}

/// Persists and restores pipeline state around the redirect.
#[derive(Clone, Copy)]
pub struct RedirectBridge<'a> {
	storage: &'a dyn RedirectStorage,
}
impl<'a> RedirectBridge<'a> {
	/// Uses `storage` for all three entries.
	pub fn new(storage: &'a dyn RedirectStorage) -> Self {
		Self { storage }
	}

	/// Writes the ledger, the accumulator, and (in local-storage mode) the state envelope.
	pub async fn persist(
		&self,
		ledger: &Ledger,
		results: &ResultAccumulator,
		state: Option<&StateEnvelope>,
	) -> Result<()> {
		self.storage.set(LEDGER_KEY, encode_entry(LEDGER_KEY, ledger)?).await?;
		self.storage.set(RESULTS_KEY, encode_entry(RESULTS_KEY, results)?).await?;

		if let Some(state) = state {
			self.storage.set(STATE_KEY, encode_entry(STATE_KEY, state)?).await?;
		}

		Ok(())
	}

	/// Reads and clears every entry; missing entries decode to empty values.
	pub async fn resume(&self) -> Result<Resumed> {
		let ledger = self.take(LEDGER_KEY).await?;
		let results = self.take(RESULTS_KEY).await?;
		let state = self.take(STATE_KEY).await?;

		Ok(Resumed {
			ledger: ledger.map(|raw| decode_entry(LEDGER_KEY, &raw)).transpose()?.unwrap_or_default(),
			results: results
				.map(|raw| decode_entry(RESULTS_KEY, &raw))
				.transpose()?
				.unwrap_or_default(),
			state: state.map(|raw| decode_entry(STATE_KEY, &raw)).transpose()?,
		})
	}

	async fn take(&self, key: &'static str) -> Result<Option<String>> {
		let value = self.storage.get(key).await?;

		self.storage.remove(key).await?;

		Ok(value)
	}
}
impl Debug for RedirectBridge<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RedirectBridge(..)")
	}
}

/// Encodes a state envelope for the `state` URL parameter (JSON, then URI component).
pub fn encode_state(envelope: &StateEnvelope) -> Result<String, BridgeError> {
	let json = serde_json::to_string(envelope)
		.map_err(|source| BridgeError::Encode { key: STATE_KEY, source })?;

	Ok(oauth1::encode_component(&json))
}

/// Inverse of [`encode_state`], applied to the already query-decoded parameter.
pub fn decode_state(param: &str) -> Result<StateEnvelope, BridgeError> {
	let json = percent_decode_str(param)
		.decode_utf8()
		.map_err(|source| BridgeError::StateEncoding { source })?;
	let mut de = serde_json::Deserializer::from_str(&json);

	serde_path_to_error::deserialize(&mut de)
		.map_err(|source| BridgeError::Decode { key: STATE_KEY, source })
}

fn encode_entry<T>(key: &'static str, value: &T) -> Result<String, BridgeError>
where
	T: Serialize,
{
	let json = serde_json::to_vec(value).map_err(|source| BridgeError::Encode { key, source })?;

	Ok(STANDARD.encode(json))
}

fn decode_entry<T>(key: &'static str, raw: &str) -> Result<T, BridgeError>
where
	T: for<'de> Deserialize<'de>,
{
	let bytes = STANDARD.decode(raw).map_err(|source| BridgeError::Base64 { key, source })?;
	let mut de = serde_json::Deserializer::from_slice(&bytes);

	serde_path_to_error::deserialize(&mut de).map_err(|source| BridgeError::Decode { key, source })
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::ledger::{CapturedRequest, FetchRecord};

	fn ledger() -> Ledger {
		let mut ledger = Ledger::new();

		ledger
			.append(
				"request_token",
				FetchRecord {
					request: CapturedRequest::default(),
					response: json!({ "oauth_token": "t", "nested": [1, { "x": null }] }),
				},
			)
			.expect("Ledger fixture should accept the first record.");

		ledger
	}

	#[tokio::test]
	async fn round_trip_is_single_use() {
		let storage = MemoryStorage::default();
		let bridge = RedirectBridge::new(&storage);
		let mut results = ResultAccumulator::new();

		results.insert("token", json!("t"));

		let envelope = StateEnvelope::new("custom", json!({ "page": "/home" }));

		bridge.persist(&ledger(), &results, Some(&envelope)).await.expect("Persist should succeed.");

		assert_eq!(storage.len(), 3);

		let resumed = bridge.resume().await.expect("Resume should succeed.");

		assert_eq!(resumed.ledger, ledger());
		assert_eq!(resumed.results, results);
		assert_eq!(resumed.state, Some(envelope));
		assert!(storage.is_empty());

		let again = bridge.resume().await.expect("Second resume should succeed.");

		assert!(again.ledger.is_empty());
		assert!(again.results.is_empty());
		assert_eq!(again.state, None);
	}

	#[tokio::test]
	async fn corrupt_entries_report_their_key() {
		let storage = MemoryStorage::default();

		storage.set(LEDGER_KEY, STANDARD.encode(r#"{"a":{"request":42}}"#)).await.expect("Set should succeed.");

		let err = RedirectBridge::new(&storage).resume().await.expect_err("Bad ledger should fail.");

		assert!(matches!(err, Error::Bridge(BridgeError::Decode { key: LEDGER_KEY, .. })));
		assert!(storage.is_empty());
	}

	#[test]
	fn state_param_round_trip() {
		let envelope = StateEnvelope::new("github", json!("opaque & odd"));
		let encoded = encode_state(&envelope).expect("State should encode.");

		assert!(!encoded.contains('"'));
		assert_eq!(decode_state(&encoded).expect("State should decode."), envelope);
	}
}
