// self
use crate::{_prelude::*, error::RequestError, ledger::Ledger};

/// Default attempt budget when a step does not set one.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Computes the delay before the next attempt.
pub type Backoff = Arc<dyn Fn(u32, &RetryContext) -> Duration + Send + Sync>;
/// Decides whether a failure is retryable, given the error and the last HTTP status.
pub type RetryPredicate = Arc<dyn Fn(&RequestError, Option<u16>) -> bool + Send + Sync>;
/// Fires before the executor sleeps.
pub type RetryHook = Arc<dyn Fn(&RetryContext) + Send + Sync>;

/// Snapshot handed to backoff functions and retry hooks; rebuilt for every retry.
#[derive(Clone, Copy, Debug)]
pub struct RetryContext<'a> {
	/// Attempts made so far (1-based).
	pub attempt: u32,
	/// Failure of the last attempt.
	pub last_error: &'a RequestError,
	/// HTTP status of the last attempt, if any.
	pub last_status: Option<u16>,
	/// Retry-After hint from the last response, if any.
	pub retry_after: Option<Duration>,
	/// Time since the first attempt started.
	pub elapsed: Duration,
	/// When the last attempt started.
	pub last_attempt_at: OffsetDateTime,
	/// Delay used before the last attempt, if it was a retry.
	pub last_delay: Option<Duration>,
	/// Configured attempt budget.
	pub max_retries: u32,
	/// Effective per-attempt timeout.
	pub timeout: Duration,
	/// Ledger before this step.
	pub ledger: &'a Ledger,
}

/// Retry policy attached to a step; unset fields fall back to the defaults.
#[derive(Clone, Default)]
pub struct RetryPolicy {
	/// Total attempts allowed (`attempts < max_retries` gates another try).
	pub max_retries: Option<u32>,
	/// Backoff function; defaults to waiting the effective timeout.
	pub backoff: Option<Backoff>,
	/// Retry predicate; defaults to [`RetryPolicy::default_should_retry`].
	pub should_retry: Option<RetryPredicate>,
	/// Hook fired before each backoff sleep.
	pub on_retry: Option<RetryHook>,
}
impl RetryPolicy {
	/// Creates a policy that uses every default.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the attempt budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = Some(max_retries);

		self
	}

	/// Sets the backoff function.
	pub fn with_backoff<F>(mut self, backoff: F) -> Self
	where
		F: 'static + Fn(u32, &RetryContext) -> Duration + Send + Sync,
	{
		self.backoff = Some(Arc::new(backoff));

		self
	}

	/// Sets the retry predicate.
	pub fn with_should_retry<F>(mut self, predicate: F) -> Self
	where
		F: 'static + Fn(&RequestError, Option<u16>) -> bool + Send + Sync,
	{
		self.should_retry = Some(Arc::new(predicate));

		self
	}

	/// Sets the retry hook.
	pub fn with_on_retry<F>(mut self, hook: F) -> Self
	where
		F: 'static + Fn(&RetryContext) + Send + Sync,
	{
		self.on_retry = Some(Arc::new(hook));

		self
	}

	/// Effective attempt budget.
	pub fn max_retries(&self) -> u32 {
		self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
	}

	/// Applies the predicate (or the default one).
	pub fn should_retry(&self, error: &RequestError, status: Option<u16>) -> bool {
		match &self.should_retry {
			Some(predicate) => predicate(error, status),
			None => Self::default_should_retry(error, status),
		}
	}

	/// Retries on HTTP 429 or 503, and on timeouts.
	pub fn default_should_retry(error: &RequestError, status: Option<u16>) -> bool {
		matches!(status, Some(429 | 503)) || error.is_timeout()
	}

	/// Delay before the next attempt.
	pub fn delay(&self, attempt: u32, ctx: &RetryContext) -> Duration {
		match &self.backoff {
			Some(backoff) => backoff(attempt, ctx),
			None => ctx.timeout,
		}
	}
}
impl Debug for RetryPolicy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryPolicy")
			.field("max_retries", &self.max_retries())
			.field("custom_backoff", &self.backoff.is_some())
			.field("custom_should_retry", &self.should_retry.is_some())
			.field("on_retry", &self.on_retry.is_some())
			.finish()
	}
}
