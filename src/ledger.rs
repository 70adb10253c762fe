//! Fetch records, the step ledger, and the result accumulator.
//!
//! The [`Ledger`] is the only channel through which later steps observe earlier
//! ones and the only step state carried across the redirect. It grows by exactly one
//! write-once [`FetchRecord`] per completed step and never forgets an entry. The
//! [`ResultAccumulator`] holds the caller-facing projection of those records.

// self
use crate::{_prelude::*, error::ConfigError, step::HttpMethod};

/// Literal response marker recorded when a step failed and its handler chose to continue.
pub const ERROR_MARKER: &str = "Error";

/// Outgoing request as captured for the ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
	/// HTTP method.
	pub method: HttpMethod,
	/// Final URL including encoded url params.
	pub url: String,
	/// Resolved url params.
	#[serde(rename = "urlParams")]
	pub url_params: IndexMap<String, String>,
	/// Resolved headers.
	pub headers: IndexMap<String, String>,
	/// Resolved body: an object of strings, a raw string, or `null`.
	pub body: Value,
}

/// Selects the request or response half of a [`FetchRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordHalf {
	/// The captured request.
	Request,
	/// The captured response.
	Response,
}
impl FromStr for RecordHalf {
	type Err = ();

	fn from_str(segment: &str) -> Result<Self, Self::Err> {
		match segment {
			"request" => Ok(Self::Request),
			"response" => Ok(Self::Response),
			_ => Err(()),
		}
	}
}

/// Result of executing one step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRecord {
	/// Captured outgoing request.
	pub request: CapturedRequest,
	/// Parsed response body, the exhausted-retries payload, `null` for a redirect
	/// step, or [`ERROR_MARKER`].
	pub response: Value,
}
impl FetchRecord {
	/// Creates a record for a request that has not been answered yet.
	pub fn pending(request: CapturedRequest) -> Self {
		Self { request, response: Value::Null }
	}

	/// Creates a record whose response is the error marker.
	pub fn failed(request: CapturedRequest) -> Self {
		Self { request, response: Value::String(ERROR_MARKER.into()) }
	}

	/// Returns true when the step failed and recorded the error marker.
	pub fn is_error(&self) -> bool {
		self.response.as_str() == Some(ERROR_MARKER)
	}

	/// Renders one half of the record as a value tree for path walking.
	pub fn half(&self, half: RecordHalf) -> Value {
		match half {
			RecordHalf::Request => serde_json::to_value(&self.request).unwrap_or(Value::Null),
			RecordHalf::Response => self.response.clone(),
		}
	}
}

/// Completed steps keyed by step name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger(BTreeMap<String, FetchRecord>);
impl Ledger {
	/// Creates an empty ledger.
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a record; a name can only be written once.
	pub fn append(&mut self, step: impl Into<String>, record: FetchRecord) -> Result<(), ConfigError> {
		let step = step.into();

		if self.0.contains_key(&step) {
			return Err(ConfigError::LedgerEntryExists { step });
		}

		self.0.insert(step, record);

		Ok(())
	}

	/// Looks up a record by step name.
	pub fn get(&self, step: &str) -> Option<&FetchRecord> {
		self.0.get(step)
	}

	/// Returns true when a record exists for `step`.
	pub fn contains(&self, step: &str) -> bool {
		self.0.contains_key(step)
	}

	/// Iterates records by step name.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &FetchRecord)> {
		self.0.iter().map(|(step, record)| (step.as_str(), record))
	}

	/// Number of records.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true when no step has completed.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Caller-facing values projected out of step responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultAccumulator(JsonMap<String, Value>);
impl ResultAccumulator {
	/// Creates an empty accumulator.
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts one value, overwriting an existing key.
	pub fn insert(&mut self, key: impl Into<String>, value: Value) {
		self.0.insert(key.into(), value);
	}

	/// Merges `other` into `self`; keys from `other` win.
	pub fn merge(&mut self, other: ResultAccumulator) {
		self.0.extend(other.0);
	}

	/// Looks up a value.
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	/// Number of keys.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true when nothing was projected.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Converts into a JSON object value.
	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}
}
impl From<JsonMap<String, Value>> for ResultAccumulator {
	fn from(map: JsonMap<String, Value>) -> Self {
		Self(map)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn record(response: Value) -> FetchRecord {
		FetchRecord {
			request: CapturedRequest {
				method: HttpMethod::Post,
				url: "https://api.example.com/token?x=1".into(),
				url_params: IndexMap::from([("x".to_owned(), "1".to_owned())]),
				headers: IndexMap::new(),
				body: json!({ "code": "abc" }),
			},
			response,
		}
	}

	#[test]
	fn ledger_entries_are_write_once() {
		let mut ledger = Ledger::new();

		ledger.append("token", record(json!({ "access_token": "A" }))).expect("First append should succeed.");

		let err = ledger
			.append("token", record(json!({})))
			.expect_err("Second append under the same name should fail.");

		assert!(matches!(err, ConfigError::LedgerEntryExists { step } if step == "token"));
		assert_eq!(ledger.len(), 1);
		assert_eq!(
			ledger.get("token").map(|r| r.response.clone()),
			Some(json!({ "access_token": "A" }))
		);
	}

	#[test]
	fn fetch_record_wire_shape_uses_url_params_key() {
		let value = serde_json::to_value(record(json!(ERROR_MARKER)))
			.expect("Fetch record should serialize.");

		assert_eq!(
			value,
			json!({
				"request": {
					"method": "POST",
					"url": "https://api.example.com/token?x=1",
					"urlParams": { "x": "1" },
					"headers": {},
					"body": { "code": "abc" }
				},
				"response": "Error"
			})
		);
		assert!(record(json!(ERROR_MARKER)).is_error());
	}

	#[test]
	fn accumulator_merge_overwrites_existing_keys() {
		let mut acc = ResultAccumulator::new();

		acc.insert("id", json!("old"));
		acc.insert("name", json!("kept"));

		let mut next = ResultAccumulator::new();

		next.insert("id", json!("new"));
		acc.merge(next);

		assert_eq!(acc.into_value(), json!({ "id": "new", "name": "kept" }));
	}

	#[test]
	fn record_halves_expose_request_and_response() {
		let record = record(json!({ "token": "T" }));

		assert_eq!(record.half(RecordHalf::Response), json!({ "token": "T" }));
		assert_eq!(record.half(RecordHalf::Request)["urlParams"]["x"], json!("1"));
		assert_eq!("request".parse::<RecordHalf>(), Ok(RecordHalf::Request));
		assert!("body".parse::<RecordHalf>().is_err());
	}
}
