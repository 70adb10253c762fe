//! Network seam for step requests.
//!
//! Steps, proxies, and server round trips all leave the process through a
//! [`PipelineHttpClient`]. Each attempt gets a fresh [`ResponseMetadataSlot`]; the handle
//! fills it with the status and `Retry-After` hint so retry predicates and backoff
//! functions see them even when the body never parses.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderValue, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;

/// Transport shared by clients, servers, and server links.
pub trait PipelineHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Error raised by the underlying stack.
	type TransportError: 'static + Send + Sync + StdError;

	/// Per-attempt handle; its futures must be `Send` so attempts can run under a timeout.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Returns a handle reporting into `slot`.
	///
	/// The handle clears `slot` before sending and stores metadata as soon as a status
	/// line arrives, whether or not the status is a success.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// What the executor learns about an attempt besides its body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// Status code, once a response arrived.
	pub status: Option<u16>,
	/// Server-requested delay before the next attempt.
	pub retry_after: Option<Duration>,
}

/// One attempt's metadata, written by the handle and read by the executor.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Replaces the stored metadata.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Removes and returns the stored metadata.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// [`PipelineHttpClient`] over a shared [`ReqwestClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient {
	client: ReqwestClient,
}
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Uses a preconfigured client (proxies, TLS roots, default headers).
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client }
	}

	/// Underlying reqwest client.
	pub fn client(&self) -> &ReqwestClient {
		&self.client
	}
}
#[cfg(feature = "reqwest")]
impl PipelineHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ReqwestHandle { client: self.client.clone(), slot }
	}
}

/// Attempt handle produced by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHandle {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let request = request.try_into().map_err(Box::new)?;
			let response = self.client.execute(request).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().clone();

			self.slot.store(ResponseMetadata {
				status: Some(status.as_u16()),
				retry_after: headers.get(RETRY_AFTER).and_then(retry_after),
			});

			let body = response.bytes().await.map_err(Box::new)?;
			let mut out = HttpResponse::new(body.to_vec());

			*out.status_mut() = status;
			*out.headers_mut() = headers;

			Ok(out)
		})
	}
}

/// Delta-seconds or an HTTP date; dates in the past yield nothing.
#[cfg(feature = "reqwest")]
fn retry_after(value: &HeaderValue) -> Option<Duration> {
	let raw = value.to_str().ok()?.trim();

	match raw.parse::<u32>() {
		Ok(secs) => Some(Duration::seconds(secs.into())),
		Err(_) => {
			let wait = OffsetDateTime::parse(raw, &Rfc2822).ok()? - OffsetDateTime::now_utc();

			wait.is_positive().then_some(wait)
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[cfg(feature = "reqwest")]
	#[test]
	fn retry_after_reads_seconds_and_ignores_past_dates() {
		assert_eq!(retry_after(&HeaderValue::from_static(" 7 ")), Some(Duration::seconds(7)));
		assert_eq!(retry_after(&HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT")), None);
		assert_eq!(retry_after(&HeaderValue::from_static("soon")), None);
	}

	#[test]
	fn slot_hands_metadata_over_once() {
		let slot = ResponseMetadataSlot::default();
		let meta = ResponseMetadata { status: Some(429), retry_after: Some(Duration::seconds(3)) };

		slot.clone().store(meta.clone());

		assert_eq!(slot.take(), Some(meta));
		assert_eq!(slot.take(), None);
	}
}
