//! Value resolution for url params, headers, and bodies.
//!
//! Each parameter is described by a [`ValueSpec`], a closed set of four kinds:
//! literals, references into the ledger, resolver functions, and library calls.
//! [`Resolver::resolve_map`] resolves a whole [`ParamSpecMap`] in declaration order
//! (later keys can read earlier ones through [`ResolveContext::resolved`]) and then
//! flattens the result so only primitive values survive.

// self
use crate::{
	_prelude::*,
	error::ResolutionError,
	ledger::{FetchRecord, Ledger, RecordHalf},
	library::{LibraryFunctionId, LibraryFunctions, LibraryRegistry},
	params::ParamsList,
	step::ParamSpecMap,
	value,
};

/// Boxed future returned by resolver functions and library generators.
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Value>>> + 'a + Send>>;

/// Callback deciding whether a failed key is dropped (`Ok`) or aborts resolution (`Err`).
pub type FailureSink<'s> = dyn FnMut(Error, &str) -> Result<()> + Send + 's;

/// Asynchronous resolver function.
pub trait ValueFunction
where
	Self: Send + Sync,
{
	/// Computes the value; `None`, `null`, and `""` count as resolution failures.
	fn call<'a>(&'a self, ctx: &'a ResolveContext<'a>) -> ResolveFuture<'a>;
}

/// Generator invoked with the library functions a [`LibraryCall`] declared.
pub trait LibraryGenerator
where
	Self: Send + Sync,
{
	/// Computes the value using only the declared functions.
	fn generate<'a>(
		&'a self,
		ctx: &'a ResolveContext<'a>,
		functions: &'a LibraryFunctions<'a>,
	) -> ResolveFuture<'a>;
}

/// Everything a resolver function may look at.
#[derive(Clone, Copy, Debug)]
pub struct ResolveContext<'a> {
	/// Static params for the provider flow.
	pub params: &'a ParamsList,
	/// Values resolved so far in the map being resolved, before flattening.
	pub resolved: &'a IndexMap<String, Value>,
	/// Ledger entries visible to the step.
	pub ledger: &'a Ledger,
	/// Record of the step being prepared (request fields filled in so far).
	pub current: &'a FetchRecord,
	/// Parameters the provider sent back on the redirect, when in the after-redirect stage.
	pub redirect: Option<&'a JsonMap<String, Value>>,
}

/// Declares library functions and a generator that combines them.
#[derive(Clone)]
pub struct LibraryCall {
	/// Functions the generator may invoke.
	pub required: Vec<LibraryFunctionId>,
	/// Caller-supplied generator.
	pub generator: Arc<dyn LibraryGenerator>,
}
impl LibraryCall {
	/// Creates a call from a generator closure returning a boxed future.
	pub fn new<I, F>(required: I, generator: F) -> Self
	where
		I: IntoIterator<Item = LibraryFunctionId>,
		F: 'static
			+ Send
			+ Sync
			+ for<'a> Fn(&'a ResolveContext<'a>, &'a LibraryFunctions<'a>) -> ResolveFuture<'a>,
	{
		Self { required: required.into_iter().collect(), generator: Arc::new(GeneratorFn(generator)) }
	}
}
impl Debug for LibraryCall {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LibraryCall").field("required", &self.required).finish()
	}
}

/// How one parameter value is obtained.
#[derive(Clone)]
pub enum ValueSpec {
	/// Passed through unchanged.
	Literal(String),
	/// `[step, "request" | "response", ...path]` into the ledger.
	Reference(Vec<String>),
	/// Computed by a resolver function.
	Function(Arc<dyn ValueFunction>),
	/// Computed by a generator over declared library functions.
	Library(LibraryCall),
}
impl ValueSpec {
	/// Builds a reference from its segments.
	pub fn reference<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::Reference(segments.into_iter().map(Into::into).collect())
	}

	/// Wraps a synchronous resolver function.
	pub fn function<F>(f: F) -> Self
	where
		F: 'static + Send + Sync + Fn(&ResolveContext) -> Option<Value>,
	{
		Self::Function(Arc::new(SyncFn(f)))
	}

	/// Wraps an asynchronous resolver function returning a boxed future.
	pub fn async_function<F>(f: F) -> Self
	where
		F: 'static + Send + Sync + for<'a> Fn(&'a ResolveContext<'a>) -> ResolveFuture<'a>,
	{
		Self::Function(Arc::new(AsyncFn(f)))
	}
}
impl Debug for ValueSpec {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
			Self::Reference(path) => f.debug_tuple("Reference").field(path).finish(),
			Self::Function(_) => f.write_str("Function(..)"),
			Self::Library(call) => f.debug_tuple("Library").field(call).finish(),
		}
	}
}
impl From<&str> for ValueSpec {
	fn from(text: &str) -> Self {
		Self::Literal(text.to_owned())
	}
}
impl From<String> for ValueSpec {
	fn from(text: String) -> Self {
		Self::Literal(text)
	}
}
impl From<LibraryCall> for ValueSpec {
	fn from(call: LibraryCall) -> Self {
		Self::Library(call)
	}
}

struct SyncFn<F>(F);
impl<F> ValueFunction for SyncFn<F>
where
	F: Send + Sync + Fn(&ResolveContext) -> Option<Value>,
{
	fn call<'a>(&'a self, ctx: &'a ResolveContext<'a>) -> ResolveFuture<'a> {
		let value = (self.0)(ctx);

		Box::pin(std::future::ready(Ok(value)))
	}
}

struct AsyncFn<F>(F);
impl<F> ValueFunction for AsyncFn<F>
where
	F: Send + Sync + for<'a> Fn(&'a ResolveContext<'a>) -> ResolveFuture<'a>,
{
	fn call<'a>(&'a self, ctx: &'a ResolveContext<'a>) -> ResolveFuture<'a> {
		(self.0)(ctx)
	}
}

struct GeneratorFn<F>(F);
impl<F> LibraryGenerator for GeneratorFn<F>
where
	F: Send
		+ Sync
		+ for<'a> Fn(&'a ResolveContext<'a>, &'a LibraryFunctions<'a>) -> ResolveFuture<'a>,
{
	fn generate<'a>(
		&'a self,
		ctx: &'a ResolveContext<'a>,
		functions: &'a LibraryFunctions<'a>,
	) -> ResolveFuture<'a> {
		(self.0)(ctx, functions)
	}
}

/// Where reference paths are walked.
#[derive(Clone, Copy, Debug)]
pub enum ReferenceSource<'a> {
	/// `[step, half, ...path]` against the ledger.
	Ledger,
	/// `[...path]` directly against a caller-supplied map (fresh redirect parameters).
	Override(&'a JsonMap<String, Value>),
}

/// Resolves parameter maps for one step.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
	params: &'a ParamsList,
	ledger: &'a Ledger,
	registry: &'a LibraryRegistry,
	references: ReferenceSource<'a>,
	redirect: Option<&'a JsonMap<String, Value>>,
}
impl<'a> Resolver<'a> {
	/// Creates a resolver reading references from `ledger`.
	pub fn new(params: &'a ParamsList, ledger: &'a Ledger, registry: &'a LibraryRegistry) -> Self {
		Self { params, ledger, registry, references: ReferenceSource::Ledger, redirect: None }
	}

	/// Walks references against `source` instead of the ledger.
	pub fn with_references(mut self, source: ReferenceSource<'a>) -> Self {
		self.references = source;

		self
	}

	/// Exposes redirect parameters to resolver functions.
	pub fn with_redirect(mut self, redirect: Option<&'a JsonMap<String, Value>>) -> Self {
		self.redirect = redirect;

		self
	}

	/// Resolves every key of `specs` in declaration order and flattens the result.
	///
	/// A failing key is handed to `on_failure`; returning `Ok` drops the key and
	/// continues, returning `Err` aborts.
	pub async fn resolve_map(
		&self,
		specs: &ParamSpecMap,
		current: &FetchRecord,
		on_failure: &mut FailureSink<'_>,
	) -> Result<IndexMap<String, String>> {
		let mut resolved = IndexMap::with_capacity(specs.len());

		for (key, spec) in specs {
			match self.resolve_one(key, spec, &resolved, current).await {
				Ok(value) => {
					resolved.insert(key.clone(), value);
				},
				Err(err) => on_failure(err, key)?,
			}
		}

		Ok(flatten_map(resolved))
	}

	/// Resolves a single value.
	pub async fn resolve_one(
		&self,
		key: &str,
		spec: &ValueSpec,
		resolved: &IndexMap<String, Value>,
		current: &FetchRecord,
	) -> Result<Value> {
		let ctx = ResolveContext {
			params: self.params,
			resolved,
			ledger: self.ledger,
			current,
			redirect: self.redirect,
		};

		match spec {
			ValueSpec::Literal(text) => Ok(Value::String(text.clone())),
			ValueSpec::Reference(path) => Ok(self.resolve_reference(key, path)?),
			ValueSpec::Function(function) => non_empty(key, function.call(&ctx).await?),
			ValueSpec::Library(call) => {
				let functions = LibraryFunctions::new(self.registry, &call.required);

				non_empty(key, call.generator.generate(&ctx, &functions).await?)
			},
		}
	}

	/// Walks a reference path.
	///
	/// With an override map, a path whose first segment names a ledger entry still walks
	/// the ledger, so steps of the running stage stay reachable.
	pub fn resolve_reference(&self, key: &str, path: &[String]) -> Result<Value, ResolutionError> {
		match self.references {
			ReferenceSource::Override(map)
				if !path.first().is_some_and(|step| self.ledger.contains(step)) =>
			{
				let Some((head, rest)) = path.split_first() else {
					return Err(ResolutionError::ReferenceTooShort {
						key: key.to_owned(),
						len: 0,
						required: 1,
					});
				};

				map.get(head)
					.and_then(|root| value::walk(root, rest))
					.cloned()
					.ok_or_else(|| missing(key, path))
			},
			_ => self.walk_ledger(key, path),
		}
	}

	fn walk_ledger(&self, key: &str, path: &[String]) -> Result<Value, ResolutionError> {
		let [step, half, rest @ ..] = path else {
			return Err(ResolutionError::ReferenceTooShort {
				key: key.to_owned(),
				len: path.len(),
				required: 2,
			});
		};
		let record = self.ledger.get(step).ok_or_else(|| ResolutionError::UnknownLedgerEntry {
			key: key.to_owned(),
			step: step.clone(),
		})?;
		let half = half.parse::<RecordHalf>().map_err(|_| ResolutionError::InvalidRecordHalf {
			key: key.to_owned(),
			segment: half.clone(),
		})?;
		let tree = record.half(half);

		value::walk(&tree, rest).cloned().ok_or_else(|| missing(key, path))
	}
}

fn non_empty(key: &str, value: Option<Value>) -> Result<Value> {
	match value {
		Some(value) if !value::is_empty(&value) => Ok(value),
		_ => Err(ResolutionError::EmptyValue { key: key.to_owned() }.into()),
	}
}

fn missing(key: &str, path: &[String]) -> ResolutionError {
	ResolutionError::MissingProperty { key: key.to_owned(), path: value::dotted(path) }
}

fn flatten_map(resolved: IndexMap<String, Value>) -> IndexMap<String, String> {
	resolved
		.into_iter()
		.filter_map(|(key, value)| value::flatten(&value).map(|flat| (key, flat)))
		.collect()
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::ledger::CapturedRequest;

	fn ledger_with_step1() -> Ledger {
		let mut ledger = Ledger::new();

		ledger
			.append(
				"stepName",
				FetchRecord {
					request: CapturedRequest::default(),
					response: json!({ "field": "v", "nested": { "list": ["a", "b"] } }),
				},
			)
			.expect("Ledger fixture should accept the first record.");

		ledger
	}

	fn raise_all() -> impl FnMut(Error, &str) -> Result<()> + Send {
		|err, _| Err(err)
	}

	#[tokio::test]
	async fn reference_resolves_against_ledger() {
		let params = ParamsList::new();
		let ledger = ledger_with_step1();
		let registry = LibraryRegistry::server();
		let resolver = Resolver::new(&params, &ledger, &registry);
		let specs = ParamSpecMap::from([
			("a".to_owned(), ValueSpec::reference(["stepName", "response", "field"])),
			("b".to_owned(), ValueSpec::reference(["stepName", "response", "nested", "list", "1"])),
		]);
		let resolved = resolver
			.resolve_map(&specs, &FetchRecord::default(), &mut raise_all())
			.await
			.expect("References to existing entries should resolve.");

		assert_eq!(resolved.get("a").map(String::as_str), Some("v"));
		assert_eq!(resolved.get("b").map(String::as_str), Some("b"));
	}

	#[tokio::test]
	async fn missing_entry_is_routed_to_the_failure_sink() {
		let params = ParamsList::new();
		let ledger = Ledger::new();
		let registry = LibraryRegistry::server();
		let resolver = Resolver::new(&params, &ledger, &registry);
		let specs = ParamSpecMap::from([
			("a".to_owned(), ValueSpec::reference(["stepName", "response", "field"])),
			("b".to_owned(), ValueSpec::from("literal")),
		]);
		let mut failures = Vec::new();
		let resolved = resolver
			.resolve_map(&specs, &FetchRecord::default(), &mut |err, key| {
				failures.push((key.to_owned(), err.to_string()));

				Ok(())
			})
			.await
			.expect("A continuing sink should keep resolution going.");

		assert_eq!(resolved.len(), 1);
		assert_eq!(resolved.get("b").map(String::as_str), Some("literal"));
		assert_eq!(failures.len(), 1);
		assert_eq!(failures[0].0, "a");

		let err = resolver
			.resolve_map(&specs, &FetchRecord::default(), &mut raise_all())
			.await
			.expect_err("A raising sink should abort resolution.");

		assert!(matches!(err, Error::Resolution(ResolutionError::UnknownLedgerEntry { .. })));
	}

	#[test]
	fn reference_shape_is_checked() {
		let params = ParamsList::new();
		let ledger = ledger_with_step1();
		let registry = LibraryRegistry::server();
		let resolver = Resolver::new(&params, &ledger, &registry);

		assert!(matches!(
			resolver.resolve_reference("k", &["stepName".into()]),
			Err(ResolutionError::ReferenceTooShort { len: 1, required: 2, .. })
		));
		assert!(matches!(
			resolver.resolve_reference("k", &["stepName".into(), "body".into()]),
			Err(ResolutionError::InvalidRecordHalf { .. })
		));
		assert!(matches!(
			resolver.resolve_reference(
				"k",
				&["stepName".into(), "response".into(), "absent".into()]
			),
			Err(ResolutionError::MissingProperty { path, .. }) if path == "stepName.response.absent"
		));
	}

	#[test]
	fn override_map_is_walked_directly() {
		let params = ParamsList::new();
		let ledger = Ledger::new();
		let registry = LibraryRegistry::server();
		let overrides = json!({ "code": "C", "state": { "nonce": "n" } });
		let overrides = overrides.as_object().expect("Override fixture should be an object.");
		let resolver = Resolver::new(&params, &ledger, &registry)
			.with_references(ReferenceSource::Override(overrides));

		assert_eq!(resolver.resolve_reference("k", &["code".into()]).ok(), Some(json!("C")));
		assert_eq!(
			resolver.resolve_reference("k", &["state".into(), "nonce".into()]).ok(),
			Some(json!("n"))
		);
		assert!(resolver.resolve_reference("k", &["missing".into()]).is_err());
	}

	#[test]
	fn ledger_entries_win_over_the_override_map() {
		let params = ParamsList::new();
		let ledger = ledger_with_step1();
		let registry = LibraryRegistry::server();
		let overrides = json!({ "code": "C" });
		let overrides = overrides.as_object().expect("Override fixture should be an object.");
		let resolver = Resolver::new(&params, &ledger, &registry)
			.with_references(ReferenceSource::Override(overrides));

		assert_eq!(
			resolver.resolve_reference("k", &["stepName".into(), "response".into(), "field".into()]).ok(),
			Some(json!("v"))
		);
		assert_eq!(resolver.resolve_reference("k", &["code".into()]).ok(), Some(json!("C")));
	}

	#[tokio::test]
	async fn functions_see_earlier_keys_and_structured_values_are_dropped() {
		let params = ParamsList::new().with_client_id("client");
		let ledger = Ledger::new();
		let registry = LibraryRegistry::server();
		let resolver = Resolver::new(&params, &ledger, &registry);
		let specs = ParamSpecMap::from([
			("id".to_owned(), ValueSpec::function(|ctx| ctx.params.get("clientId"))),
			(
				"echo".to_owned(),
				ValueSpec::function(|ctx| {
					ctx.resolved
						.get("id")
						.and_then(Value::as_str)
						.map(|id| json!(format!("{id}-echo")))
				}),
			),
			("obj".to_owned(), ValueSpec::function(|_| Some(json!({ "nested": true })))),
			("num".to_owned(), ValueSpec::function(|_| Some(json!(7)))),
		]);
		let resolved = resolver
			.resolve_map(&specs, &FetchRecord::default(), &mut raise_all())
			.await
			.expect("Function specs should resolve.");

		assert_eq!(
			resolved.into_iter().collect::<Vec<_>>(),
			vec![
				("id".to_owned(), "client".to_owned()),
				("echo".to_owned(), "client-echo".to_owned()),
				("num".to_owned(), "7".to_owned()),
			]
		);
	}

	#[tokio::test]
	async fn empty_function_results_fail() {
		let params = ParamsList::new();
		let ledger = Ledger::new();
		let registry = LibraryRegistry::server();
		let resolver = Resolver::new(&params, &ledger, &registry);
		let err = resolver
			.resolve_one(
				"blank",
				&ValueSpec::function(|_| Some(json!(""))),
				&IndexMap::new(),
				&FetchRecord::default(),
			)
			.await
			.expect_err("Blank values should fail resolution.");

		assert!(matches!(err, Error::Resolution(ResolutionError::EmptyValue { key }) if key == "blank"));
	}

	#[tokio::test]
	async fn async_function_can_await() {
		let params = ParamsList::new();
		let ledger = ledger_with_step1();
		let registry = LibraryRegistry::server();
		let resolver = Resolver::new(&params, &ledger, &registry);
		let spec = ValueSpec::async_function(|ctx| {
			Box::pin(async move {
				tokio::task::yield_now().await;

				Ok(ctx.ledger.get("stepName").map(|record| record.response["field"].clone()))
			})
		});
		let value = resolver
			.resolve_one("k", &spec, &IndexMap::new(), &FetchRecord::default())
			.await
			.expect("Async resolver should resolve.");

		assert_eq!(value, json!("v"));
	}
}
