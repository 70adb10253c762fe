//! Closed catalog of helper functions available to library-call value specs.
//!
//! Functions are addressed by [`LibraryFunctionId`], which parses from its wire name
//! so unknown names are rejected while the configuration is built. The registry runs
//! in one of two modes: on the server every function executes locally; in the browser
//! the keyed-hash functions are forwarded to the server through a [`ServerLink`].

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ResolutionError},
	flows::ServerLink,
	oauth1::{self, SignatureMethod},
	step::HttpMethod,
	value,
};

const PKCE_VERIFIER_LEN: usize = 64;

/// Identifier of a library function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum LibraryFunctionId {
	/// `nonce()`: random alphanumeric string.
	Nonce,
	/// `timestamp()`: Unix seconds as a string.
	Timestamp,
	/// `hmacSha1(key, data)`: base64 digest.
	HmacSha1,
	/// `oauth1BaseString(method, url, params)`.
	Oauth1BaseString,
	/// `oauth1SigningKey(consumerSecret, tokenSecret?)`.
	Oauth1SigningKey,
	/// `oauth1Signature(method, url, params, consumerSecret, tokenSecret?, encode?)`.
	Oauth1Signature,
	/// `percentEncode(text)`: strict RFC 3986.
	PercentEncode,
	/// `uriEncode(text)`: `encodeURIComponent` semantics.
	UriEncode,
	/// `uriDecode(text)`.
	UriDecode,
	/// `base64Encode(text)`.
	Base64Encode,
	/// `base64Decode(text)`.
	Base64Decode,
	/// `jsonStringify(value)`.
	JsonStringify,
	/// `jsonParse(text)`.
	JsonParse,
	/// `objectKeys(object)`.
	ObjectKeys,
	/// `objectMerge(object, ...)`: later objects win.
	ObjectMerge,
	/// `pkceVerifier()`.
	PkceVerifier,
	/// `pkceChallenge(verifier)`: S256.
	PkceChallenge,
}
impl LibraryFunctionId {
	/// Every function, in catalog order.
	pub const ALL: [Self; 17] = [
		Self::Nonce,
		Self::Timestamp,
		Self::HmacSha1,
		Self::Oauth1BaseString,
		Self::Oauth1SigningKey,
		Self::Oauth1Signature,
		Self::PercentEncode,
		Self::UriEncode,
		Self::UriDecode,
		Self::Base64Encode,
		Self::Base64Decode,
		Self::JsonStringify,
		Self::JsonParse,
		Self::ObjectKeys,
		Self::ObjectMerge,
		Self::PkceVerifier,
		Self::PkceChallenge,
	];

	/// Wire name of the function.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Nonce => "nonce",
			Self::Timestamp => "timestamp",
			Self::HmacSha1 => "hmacSha1",
			Self::Oauth1BaseString => "oauth1BaseString",
			Self::Oauth1SigningKey => "oauth1SigningKey",
			Self::Oauth1Signature => "oauth1Signature",
			Self::PercentEncode => "percentEncode",
			Self::UriEncode => "uriEncode",
			Self::UriDecode => "uriDecode",
			Self::Base64Encode => "base64Encode",
			Self::Base64Decode => "base64Decode",
			Self::JsonStringify => "jsonStringify",
			Self::JsonParse => "jsonParse",
			Self::ObjectKeys => "objectKeys",
			Self::ObjectMerge => "objectMerge",
			Self::PkceVerifier => "pkceVerifier",
			Self::PkceChallenge => "pkceChallenge",
		}
	}

	/// Returns true for functions that need keyed-hash cryptography and therefore run on
	/// the server when called from the browser.
	pub const fn requires_server(self) -> bool {
		matches!(self, Self::HmacSha1 | Self::Oauth1Signature)
	}
}
impl Display for LibraryFunctionId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for LibraryFunctionId {
	type Err = ConfigError;

	fn from_str(name: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|id| id.as_str() == name)
			.ok_or_else(|| ConfigError::UnknownLibraryFunction { name: name.to_owned() })
	}
}
impl TryFrom<String> for LibraryFunctionId {
	type Error = ConfigError;

	fn try_from(name: String) -> Result<Self, Self::Error> {
		name.parse()
	}
}
impl From<LibraryFunctionId> for &'static str {
	fn from(id: LibraryFunctionId) -> Self {
		id.as_str()
	}
}

/// Executes library functions locally or through the server.
#[derive(Clone, Default)]
pub struct LibraryRegistry {
	remote: Option<Arc<dyn ServerLink>>,
}
impl LibraryRegistry {
	/// Full registry; every function runs in-process.
	pub fn server() -> Self {
		Self::default()
	}

	/// Browser registry; server-only functions are forwarded through `link`.
	pub fn browser(link: Arc<dyn ServerLink>) -> Self {
		Self { remote: Some(link) }
	}

	/// Returns true when server-only functions are forwarded.
	pub fn is_browser(&self) -> bool {
		self.remote.is_some()
	}

	/// Invokes `id` with positional arguments.
	pub async fn call(&self, id: LibraryFunctionId, args: Vec<Value>) -> Result<Value> {
		match &self.remote {
			Some(link) if id.requires_server() => link.helper(id, args).await,
			_ => Ok(invoke(id, &args)?),
		}
	}
}
impl Debug for LibraryRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LibraryRegistry").field("browser", &self.is_browser()).finish()
	}
}

/// View of the registry limited to the functions a library call declared.
#[derive(Clone, Copy, Debug)]
pub struct LibraryFunctions<'a> {
	registry: &'a LibraryRegistry,
	allowed: &'a [LibraryFunctionId],
}
impl<'a> LibraryFunctions<'a> {
	/// Restricts `registry` to `allowed`.
	pub fn new(registry: &'a LibraryRegistry, allowed: &'a [LibraryFunctionId]) -> Self {
		Self { registry, allowed }
	}

	/// Declared functions.
	pub fn declared(&self) -> &[LibraryFunctionId] {
		self.allowed
	}

	/// Invokes a declared function.
	pub async fn call(&self, id: LibraryFunctionId, args: Vec<Value>) -> Result<Value> {
		if !self.allowed.contains(&id) {
			return Err(ConfigError::LibraryFunctionNotRequired { function: id.as_str() }.into());
		}

		self.registry.call(id, args).await
	}
}

/// Runs one function in-process.
pub fn invoke(id: LibraryFunctionId, args: &[Value]) -> Result<Value, ResolutionError> {
	let args = Args { id, args };
	let value: Value = match id {
		LibraryFunctionId::Nonce => oauth1::nonce().into(),
		LibraryFunctionId::Timestamp => oauth1::timestamp().into(),
		LibraryFunctionId::HmacSha1 => oauth1::hmac_sha1(&args.text(0)?, &args.text(1)?)?.into(),
		LibraryFunctionId::Oauth1BaseString => base_string(&args)?.into(),
		LibraryFunctionId::Oauth1SigningKey =>
			oauth1::signing_key(&args.text(0)?, args.optional_text(1).as_deref()).into(),
		LibraryFunctionId::Oauth1Signature => {
			let base = base_string(&args)?;
			let key = oauth1::signing_key(&args.text(3)?, args.optional_text(4).as_deref());
			let encode = args.args.get(5).and_then(Value::as_bool).unwrap_or(true);

			oauth1::sign(&SignatureMethod::HmacSha1, &base, &key, encode)?.into()
		},
		LibraryFunctionId::PercentEncode => oauth1::percent_encode(&args.text(0)?).into(),
		LibraryFunctionId::UriEncode => oauth1::encode_component(&args.text(0)?).into(),
		LibraryFunctionId::UriDecode => percent_encoding::percent_decode_str(&args.text(0)?)
			.decode_utf8()
			.map_err(|e| args.fail(e.to_string()))?
			.into_owned()
			.into(),
		LibraryFunctionId::Base64Encode => STANDARD.encode(args.text(0)?).into(),
		LibraryFunctionId::Base64Decode => {
			let bytes = STANDARD.decode(args.text(0)?).map_err(|e| args.fail(e.to_string()))?;

			String::from_utf8_lossy(&bytes).into_owned().into()
		},
		LibraryFunctionId::JsonStringify =>
			serde_json::to_string(args.any(0)?).map_err(|e| args.fail(e.to_string()))?.into(),
		LibraryFunctionId::JsonParse =>
			serde_json::from_str(&args.text(0)?).map_err(|e| args.fail(e.to_string()))?,
		LibraryFunctionId::ObjectKeys =>
			args.object(0)?.keys().cloned().map(Value::String).collect::<Vec<_>>().into(),
		LibraryFunctionId::ObjectMerge => {
			let mut merged = JsonMap::new();

			for index in 0..args.args.len() {
				merged.extend(args.object(index)?.clone());
			}

			Value::Object(merged)
		},
		LibraryFunctionId::PkceVerifier => rand::rng()
			.sample_iter(Alphanumeric)
			.take(PKCE_VERIFIER_LEN)
			.map(char::from)
			.collect::<String>()
			.into(),
		LibraryFunctionId::PkceChallenge => {
			let mut hasher = Sha256::new();

			hasher.update(args.text(0)?.as_bytes());

			URL_SAFE_NO_PAD.encode(hasher.finalize()).into()
		},
	};

	Ok(value)
}

fn base_string(args: &Args) -> Result<String, ResolutionError> {
	let method = serde_json::from_value::<HttpMethod>(Value::String(args.text(0)?.to_uppercase()))
		.map_err(|e| args.fail(e.to_string()))?;
	let url = Url::parse(&args.text(1)?).map_err(|e| args.fail(e.to_string()))?;
	let params = match args.args.get(2) {
		Some(Value::Object(map)) => map
			.iter()
			.filter_map(|(k, v)| value::flatten(v).map(|v| (k.clone(), v)))
			.collect::<Vec<_>>(),
		_ => Vec::new(),
	};
	let parameter_string =
		oauth1::parameter_string(&url, params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

	Ok(oauth1::base_string(method, &url, &parameter_string))
}

struct Args<'a> {
	id: LibraryFunctionId,
	args: &'a [Value],
}
impl Args<'_> {
	fn fail(&self, reason: impl Into<String>) -> ResolutionError {
		ResolutionError::Library { function: self.id.as_str(), reason: reason.into() }
	}

	fn any(&self, index: usize) -> Result<&Value, ResolutionError> {
		self.args.get(index).ok_or_else(|| self.fail(format!("argument {index} is missing")))
	}

	fn text(&self, index: usize) -> Result<String, ResolutionError> {
		value::flatten(self.any(index)?)
			.ok_or_else(|| self.fail(format!("argument {index} must be a string")))
	}

	fn optional_text(&self, index: usize) -> Option<String> {
		self.args.get(index).and_then(value::flatten)
	}

	fn object(&self, index: usize) -> Result<&JsonMap<String, Value>, ResolutionError> {
		self.any(index)?
			.as_object()
			.ok_or_else(|| self.fail(format!("argument {index} must be an object")))
	}
}
