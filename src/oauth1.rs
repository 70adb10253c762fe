//! OAuth 1.0a request signing (RFC 5849).
//!
//! Everything here is a pure function of its inputs except [`nonce`] and
//! [`timestamp`]. [`sign_remote`] hashes through the library registry, so a browser
//! registry computes the base string locally and delegates the keyed hash to the server.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::{Rng, distr::Alphanumeric};
use sha1::Sha1;
// self
use crate::{
	_prelude::*,
	error::ResolutionError,
	library::{LibraryFunctionId, LibraryFunctions},
	step::HttpMethod,
};

/// Unreserved characters of RFC 3986; everything else is escaped, including `! * ' ( )`.
pub const RFC3986: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');
/// The set left alone by `encodeURIComponent`.
pub const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
	.remove(b'-')
	.remove(b'_')
	.remove(b'.')
	.remove(b'!')
	.remove(b'~')
	.remove(b'*')
	.remove(b'\'')
	.remove(b'(')
	.remove(b')');

/// Value of `oauth_signature_method` for the built-in method.
pub const HMAC_SHA1: &str = "HMAC-SHA1";
/// Value of `oauth_version`.
pub const VERSION: &str = "1.0";

const NONCE_LEN: usize = 32;

type HmacSha1 = Hmac<Sha1>;

/// Custom hashing function taking `(base_string, signing_key)` and returning the base64 digest.
pub type CustomSignature = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Strict RFC 3986 percent-encoding.
pub fn percent_encode(text: &str) -> String {
	utf8_percent_encode(text, RFC3986).to_string()
}

/// `encodeURIComponent`-equivalent percent-encoding.
pub fn encode_component(text: &str) -> String {
	utf8_percent_encode(text, URI_COMPONENT).to_string()
}

/// Random alphanumeric nonce.
pub fn nonce() -> String {
	rand::rng().sample_iter(Alphanumeric).take(NONCE_LEN).map(char::from).collect()
}

/// Current Unix time in whole seconds.
pub fn timestamp() -> String {
	OffsetDateTime::now_utc().unix_timestamp().to_string()
}

/// HMAC-SHA1 of `data` keyed by `key`, base64-encoded.
pub fn hmac_sha1(key: &str, data: &str) -> Result<String, ResolutionError> {
	let mut mac = HmacSha1::new_from_slice(key.as_bytes()).map_err(|e| {
		ResolutionError::Library {
			function: LibraryFunctionId::HmacSha1.as_str(),
			reason: e.to_string(),
		}
	})?;

	mac.update(data.as_bytes());

	Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Signing key `enc(consumer_secret)&enc(token_secret)`.
pub fn signing_key(consumer_secret: &str, token_secret: Option<&str>) -> String {
	format!("{}&{}", percent_encode(consumer_secret), percent_encode(token_secret.unwrap_or_default()))
}

/// Merges `params` with the query already on `url`, encodes, sorts, and joins them.
pub fn parameter_string<'a, I>(url: &Url, params: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let mut pairs = url
		.query_pairs()
		.map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
		.chain(params.into_iter().map(|(k, v)| (percent_encode(k), percent_encode(v))))
		.collect::<Vec<_>>();

	pairs.sort();

	pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

/// `METHOD&enc(base URL)&enc(parameter string)`.
pub fn base_string(method: HttpMethod, url: &Url, parameter_string: &str) -> String {
	let mut base = url.clone();

	base.set_query(None);
	base.set_fragment(None);

	format!("{}&{}&{}", method.as_str(), percent_encode(base.as_str()), percent_encode(parameter_string))
}

/// How the base string is hashed.
#[derive(Clone, Default)]
pub enum SignatureMethod {
	/// HMAC-SHA1.
	#[default]
	HmacSha1,
	/// Caller-supplied function.
	Custom(CustomSignature),
}
impl SignatureMethod {
	/// Computes the base64 signature.
	pub fn digest(&self, base_string: &str, signing_key: &str) -> Result<String, ResolutionError> {
		match self {
			Self::HmacSha1 => hmac_sha1(signing_key, base_string),
			Self::Custom(f) => Ok(f(base_string, signing_key)),
		}
	}
}
impl Debug for SignatureMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::HmacSha1 => f.write_str("HmacSha1"),
			Self::Custom(_) => f.write_str("Custom(..)"),
		}
	}
}

/// Signs `base_string`; the result is percent-encoded unless `encode` is false.
pub fn sign(
	method: &SignatureMethod,
	base_string: &str,
	signing_key: &str,
	encode: bool,
) -> Result<String, ResolutionError> {
	let digest = method.digest(base_string, signing_key)?;

	Ok(if encode { percent_encode(&digest) } else { digest })
}

/// Signs through the `hmacSha1` library function.
///
/// `functions` must declare `hmacSha1`; a browser registry forwards the call to the server.
pub async fn sign_remote(
	functions: &LibraryFunctions<'_>,
	base_string: &str,
	signing_key: &str,
	encode: bool,
) -> Result<String> {
	let value = functions
		.call(LibraryFunctionId::HmacSha1, vec![signing_key.into(), base_string.into()])
		.await?;
	let digest = value.as_str().ok_or_else(|| ResolutionError::Library {
		function: LibraryFunctionId::HmacSha1.as_str(),
		reason: "helper returned a non-string digest".into(),
	})?;

	Ok(if encode { percent_encode(digest) } else { digest.to_owned() })
}

/// The oauth parameters of one request, before signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuth1Request {
	/// HTTP method.
	pub method: HttpMethod,
	/// Target URL; its query joins the parameter string.
	pub url: Url,
	/// `oauth_consumer_key`.
	pub consumer_key: String,
	/// `oauth_nonce`.
	pub nonce: String,
	/// `oauth_timestamp`.
	pub timestamp: String,
	/// `oauth_callback`.
	pub callback: Option<String>,
	/// `oauth_token`.
	pub token: Option<String>,
	/// `oauth_verifier`.
	pub verifier: Option<String>,
	/// Additional signed parameters (body fields, flow extras).
	pub extra: BTreeMap<String, String>,
}
impl OAuth1Request {
	/// Creates a request with a fresh nonce and timestamp.
	pub fn new(method: HttpMethod, url: Url, consumer_key: impl Into<String>) -> Self {
		Self {
			method,
			url,
			consumer_key: consumer_key.into(),
			nonce: nonce(),
			timestamp: timestamp(),
			callback: None,
			token: None,
			verifier: None,
			extra: BTreeMap::new(),
		}
	}

	/// Sets `oauth_callback`.
	pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
		self.callback = Some(callback.into());

		self
	}

	/// Sets `oauth_token`.
	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());

		self
	}

	/// Sets `oauth_verifier`.
	pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
		self.verifier = Some(verifier.into());

		self
	}

	/// Adds a signed extra parameter.
	pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra.insert(key.into(), value.into());

		self
	}

	/// The canonical `oauth_*` set.
	pub fn oauth_params(&self) -> BTreeMap<&'static str, String> {
		let mut params = BTreeMap::from([
			("oauth_consumer_key", self.consumer_key.clone()),
			("oauth_nonce", self.nonce.clone()),
			("oauth_signature_method", HMAC_SHA1.to_owned()),
			("oauth_timestamp", self.timestamp.clone()),
			("oauth_version", VERSION.to_owned()),
		]);

		if let Some(callback) = &self.callback {
			params.insert("oauth_callback", callback.clone());
		}
		if let Some(token) = &self.token {
			params.insert("oauth_token", token.clone());
		}
		if let Some(verifier) = &self.verifier {
			params.insert("oauth_verifier", verifier.clone());
		}

		params
	}

	/// Parameter string over the oauth set, the extras, and the URL query.
	pub fn parameter_string(&self) -> String {
		let oauth = self.oauth_params();

		parameter_string(
			&self.url,
			oauth
				.iter()
				.map(|(k, v)| (*k, v.as_str()))
				.chain(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
		)
	}

	/// Signature base string.
	pub fn base_string(&self) -> String {
		base_string(self.method, &self.url, &self.parameter_string())
	}

	/// Signs locally and returns the `Authorization` header value.
	pub fn authorization_header(
		&self,
		method: &SignatureMethod,
		consumer_secret: &str,
		token_secret: Option<&str>,
	) -> Result<String, ResolutionError> {
		let key = signing_key(consumer_secret, token_secret);
		let signature = sign(method, &self.base_string(), &key, false)?;

		Ok(self.header_with_signature(&signature))
	}

	/// Renders `OAuth k="v", ...` around an unencoded base64 signature.
	pub fn header_with_signature(&self, signature: &str) -> String {
		let mut params = self.oauth_params();

		params.insert("oauth_signature", signature.to_owned());

		let fields = params
			.iter()
			.map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
			.collect::<Vec<_>>();

		format!("OAuth {}", fields.join(", "))
	}
}
