//! Flow orchestrators: the browser-side [`Client`], the in-process [`Server`], and the
//! [`ServerLink`] seam between them.
//!
//! A login click runs the before-redirect stage on the client, persists the ledger
//! through the redirect bridge, and hands the browser a [`RedirectForm`]. When the
//! provider redirects back, the client resumes the ledger and asks the server to run the
//! after-redirect stage, where client secrets live. The server answers every call with an
//! [`Envelope`], so the same shapes travel in-process and over HTTP.
//!
//! [`RedirectForm`]: crate::pipeline::RedirectForm

pub mod client;
pub mod link;
pub mod server;

pub use client::*;
pub use link::*;
pub use server::*;

// self
use crate::{
	_prelude::*,
	ledger::{Ledger, ResultAccumulator},
	library::LibraryFunctionId,
};

/// Future returned by [`ServerLink`] calls.
pub type LinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Calls the browser makes into the server.
pub trait ServerLink
where
	Self: Send + Sync,
{
	/// Runs one server-only library function.
	fn helper<'a>(&'a self, function: LibraryFunctionId, args: Vec<Value>) -> LinkFuture<'a, Value>;

	/// Runs the after-redirect stage and returns the result accumulator.
	fn get_user<'a>(&'a self, request: GetUserRequest) -> LinkFuture<'a, Envelope>;
}

/// Outcome flag carried by every [`Envelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
	/// `data` holds the payload.
	Success,
	/// `data` holds an error message.
	Error,
}

/// `{status, data}` reply shared by the server surface and proxies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	/// Outcome flag.
	pub status: EnvelopeStatus,
	/// Payload or error message.
	#[serde(default)]
	pub data: Value,
}
impl Envelope {
	/// Successful reply.
	pub fn success(data: Value) -> Self {
		Self { status: EnvelopeStatus::Success, data }
	}

	/// Failed reply carrying `error`'s message.
	pub fn error(error: impl Display) -> Self {
		Self { status: EnvelopeStatus::Error, data: Value::String(error.to_string()) }
	}

	/// Returns true for successful replies.
	pub fn is_success(&self) -> bool {
		self.status == EnvelopeStatus::Success
	}

	/// Payload on success, message on failure.
	pub fn into_data(self) -> Result<Value, String> {
		match self.status {
			EnvelopeStatus::Success => Ok(self.data),
			EnvelopeStatus::Error =>
				Err(self.data.as_str().map_or_else(|| self.data.to_string(), str::to_owned)),
		}
	}
}
impl<E> From<Result<Value, E>> for Envelope
where
	E: Display,
{
	fn from(result: Result<Value, E>) -> Self {
		match result {
			Ok(data) => Self::success(data),
			Err(e) => Self::error(e),
		}
	}
}

/// Everything the server needs to finish a flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetUserRequest {
	/// Provider name from the state envelope.
	pub provider: String,
	/// Ledger carried across the redirect.
	#[serde(default)]
	pub ledger: Ledger,
	/// Result accumulator carried across the redirect.
	#[serde(default)]
	pub results: ResultAccumulator,
	/// Parameters the provider appended to the redirect URL.
	#[serde(default)]
	pub redirect: JsonMap<String, Value>,
}

/// `{name, args}` body of a helper call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelperRequest {
	/// Library function.
	pub name: LibraryFunctionId,
	/// Positional arguments.
	#[serde(default)]
	pub args: Vec<Value>,
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn envelope_wire_shape() {
		let ok = Envelope::from(Ok::<_, String>(json!({ "id": 1 })));
		let failed: Envelope =
			serde_json::from_value(json!({ "status": "error", "data": "denied" }))
				.expect("Error envelope should deserialize.");

		assert_eq!(
			serde_json::to_value(&ok).expect("Envelope should serialize."),
			json!({ "status": "success", "data": { "id": 1 } })
		);
		assert!(!failed.is_success());
		assert_eq!(failed.into_data(), Err("denied".to_owned()));
	}

	#[test]
	fn helper_requests_reject_unknown_functions() {
		let parsed: HelperRequest =
			serde_json::from_value(json!({ "name": "hmacSha1", "args": ["k", "d"] }))
				.expect("Known helper should deserialize.");

		assert_eq!(parsed.name, LibraryFunctionId::HmacSha1);
		assert!(serde_json::from_value::<HelperRequest>(json!({ "name": "eval" })).is_err());
	}
}
