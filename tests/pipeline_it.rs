#![cfg(feature = "reqwest")]

mod common;

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use httpmock::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use time::Duration;
// self
use common::*;
use oauth_pipeline::{
	error::{Error, RequestError, ResolutionError},
	executor::RetryPolicy,
	http::ReqwestHttpClient,
	ledger::{Ledger, ResultAccumulator},
	library::LibraryRegistry,
	params::ParamsList,
	pipeline::{PipelineRunner, RunMode, StageHooks, StageRun},
	resolve::ValueSpec,
	step::{
		BodyFormat, ErrorDisposition, ErrorHandler, ErrorSite, HttpMethod, ParseType, Projection,
		Stage, StageKind, StepDescriptor,
	},
};

fn step(server: &MockServer, path: &str, name: &str) -> StepDescriptor {
	StepDescriptor::from_url(mock_url(server, path)).named(name)
}

fn stage<I>(steps: I) -> Stage
where
	I: IntoIterator<Item = StepDescriptor>,
{
	Stage::try_from_steps(steps).expect("Stage fixture should build.")
}

async fn run(
	http: &ReqwestHttpClient,
	stage: &Stage,
	handler: Option<&ErrorHandler>,
) -> Result<StageRun, Error> {
	let registry = LibraryRegistry::server();
	let params = ParamsList::new();

	PipelineRunner::new("mock", http, &registry, &params)
		.with_error_handler(handler)
		.run(StageKind::AfterRedirect, stage, Ledger::new(), ResultAccumulator::new())
		.await
}

#[tokio::test]
async fn every_step_appends_one_named_record_and_fires_hooks() {
	let server = MockServer::start_async().await;
	let mut mocks = Vec::new();

	for path in ["/a", "/b", "/c"] {
		mocks.push(
			server
				.mock_async(|when, then| {
					when.method(GET).path(path);
					then.status(200).json_body(json!({ "path": path }));
				})
				.await,
		);
	}

	let started = Arc::new(AtomicUsize::new(0));
	let ended = Arc::new(AtomicUsize::new(0));
	let hooks = StageHooks::default()
		.on_request_start({
			let started = Arc::clone(&started);

			move |_, _| {
				started.fetch_add(1, Ordering::SeqCst);
			}
		})
		.on_request_end({
			let ended = Arc::clone(&ended);

			move |_, _| {
				ended.fetch_add(1, Ordering::SeqCst);
			}
		});
	let seen = Arc::new(Mutex::new(Vec::new()));
	let recorder = Arc::clone(&seen);
	let steps = stage([
		step(&server, "/a", "a").before_next(move |ledger, _| recorder.lock().push(ledger.len())),
		step(&server, "/b", "b"),
		step(&server, "/c", "c"),
	]);
	let http = test_reqwest_http_client();
	let registry = LibraryRegistry::server();
	let params = ParamsList::new();
	let run = PipelineRunner::new("mock", &http, &registry, &params)
		.with_hooks(&hooks)
		.run(StageKind::AfterRedirect, &steps, Ledger::new(), ResultAccumulator::new())
		.await
		.expect("Three-step stage should succeed.");

	assert_eq!(run.ledger.len(), 3);
	assert_eq!(run.ledger.iter().map(|(name, _)| name).collect::<Vec<_>>(), ["a", "b", "c"]);
	assert_eq!(
		run.ledger.get("b").map(|record| &record.response),
		Some(&json!({ "path": "/b" }))
	);
	assert_eq!(started.load(Ordering::SeqCst), 3);
	assert_eq!(ended.load(Ordering::SeqCst), 3);
	// The hook runs before the step's own record joins the ledger.
	assert_eq!(*seen.lock(), [0]);
	assert!(run.redirect.is_none());

	for mock in mocks {
		mock.assert_async().await;
	}
}

#[tokio::test]
async fn header_reference_reads_the_previous_response() {
	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST).path("/login").header("content-type", "application/json");
			then.status(200).json_body(json!({ "token": "T" }));
		})
		.await;
	let me = server
		.mock_async(|when, then| {
			when.method(GET).path("/me").header("authorization", "T");
			then.status(200).json_body(json!({ "id": 1 }));
		})
		.await;
	let steps = stage([
		step(&server, "/login", "login")
			.method(HttpMethod::Post)
			.body_param("user", "u")
			.body_format(BodyFormat::Json),
		step(&server, "/me", "me")
			.header("Authorization", ValueSpec::reference(["login", "response", "token"])),
	]);
	let run = run(&test_reqwest_http_client(), &steps, None)
		.await
		.expect("Referenced header should resolve.");

	login.assert_async().await;
	me.assert_async().await;

	let record = run.ledger.get("me").expect("Profile step should be recorded.");

	assert_eq!(record.request.headers.get("Authorization").map(String::as_str), Some("T"));
	assert_eq!(run.ledger.get("login").map(|record| &record.request.body), Some(&json!({ "user": "u" })));
}

#[tokio::test]
async fn missing_reference_is_routed_to_the_error_handler() {
	let server = MockServer::start_async().await;
	let me = server
		.mock_async(|when, then| {
			when.method(GET).path("/me");
			then.status(200).json_body(json!({ "id": 1 }));
		})
		.await;
	let steps = stage([step(&server, "/me", "me")
		.header("Authorization", ValueSpec::reference(["login", "response", "token"]))]);
	let http = test_reqwest_http_client();
	let err = run(&http, &steps, None).await.expect_err("Unhandled resolution failure should raise.");

	assert!(matches!(
		err,
		Error::Resolution(ResolutionError::UnknownLedgerEntry { ref step, .. }) if step == "login"
	));
	assert_eq!(me.hits_async().await, 0);

	let sites = Arc::new(Mutex::new(Vec::new()));
	let recorder = Arc::clone(&sites);
	let handler: ErrorHandler = Arc::new(move |_: &Error, site: &ErrorSite| {
		recorder.lock().push(site.clone());

		ErrorDisposition::Continue
	});
	let run = run(&http, &steps, Some(&handler)).await.expect("Handled failure should continue.");
	let sites = sites.lock();

	assert_eq!(sites.len(), 1);
	assert_eq!(sites[0].step, "me");
	assert_eq!(sites[0].key.as_deref(), Some("Authorization"));
	assert!(
		run.ledger.get("me").is_some_and(|record| !record.request.headers.contains_key("Authorization"))
	);
	assert_eq!(me.hits_async().await, 1);
}

#[tokio::test]
async fn exhausted_retries_record_the_marker_payload() {
	let server = MockServer::start_async().await;
	let flaky = server
		.mock_async(|when, then| {
			when.method(GET).path("/flaky");
			then.status(500).body("boom");
		})
		.await;
	let steps = stage([step(&server, "/flaky", "flaky")
		.retry(
			RetryPolicy::new()
				.with_max_retries(3)
				.with_backoff(|_, _| Duration::ZERO)
				.with_should_retry(|_, _| true),
		)
		.to_return("id", Projection::path(["id"]))]);
	let run = run(&test_reqwest_http_client(), &steps, None)
		.await
		.expect("Running out of retries should not raise.");

	assert_eq!(flaky.hits_async().await, 3);
	assert_eq!(
		run.ledger.get("flaky").map(|record| &record.response),
		Some(&json!({ "error": "Max Retries Reached" }))
	);
	assert!(run.results.get("id").is_none());
}

#[tokio::test]
async fn non_retryable_failure_is_fatal_after_one_attempt() {
	let server = MockServer::start_async().await;
	let broken = server
		.mock_async(|when, then| {
			when.method(GET).path("/broken");
			then.status(500).body("boom");
		})
		.await;
	let steps = stage([step(&server, "/broken", "broken")
		.retry(RetryPolicy::new().with_max_retries(3).with_should_retry(|_, _| false))]);
	let err = run(&test_reqwest_http_client(), &steps, None)
		.await
		.expect_err("Non-retryable failure should raise.");

	assert_eq!(broken.hits_async().await, 1);
	assert!(matches!(err, Error::Request(RequestError::Status { status: 500, .. })));
}

#[tokio::test]
async fn failed_validation_is_fatal_by_default() {
	let server = MockServer::start_async().await;
	let check = server
		.mock_async(|when, then| {
			when.method(GET).path("/check");
			then.status(200).json_body(json!({ "ok": false }));
		})
		.await;
	let steps = stage([step(&server, "/check", "check")
		.validator(|ctx| ctx.response.get("ok").is_some())
		.validator(|ctx| ctx.response.get("ok") == Some(&json!(true)))]);
	let err =
		run(&test_reqwest_http_client(), &steps, None).await.expect_err("Invalid response should raise.");

	assert_eq!(check.hits_async().await, 1);
	assert!(matches!(err, Error::Request(RequestError::Validation { index: 1 })));
}

#[tokio::test]
async fn projections_copy_paths_and_whole_payloads() {
	let server = MockServer::start_async().await;
	let body = json!({ "user": { "id": 7, "name": "Ada" } });

	server
		.mock_async(|when, then| {
			when.method(GET).path("/me");
			then.status(200).json_body(body.clone());
		})
		.await;

	let steps = stage([step(&server, "/me", "me")
		.to_return("id", Projection::path(["user", "id"]))
		.to_return("raw", Projection::All)]);
	let run = run(&test_reqwest_http_client(), &steps, None)
		.await
		.expect("Projection stage should succeed.");

	assert_eq!(run.results.get("id"), Some(&json!(7)));
	assert_eq!(run.results.get("raw"), Some(&body));
	assert_eq!(run.results.into_value(), json!({ "id": 7, "raw": body }));
}

#[tokio::test]
async fn strict_percent_encoding_reaches_the_wire() {
	let server = MockServer::start_async().await;
	let search = server
		.mock_async(|when, then| {
			when.method(GET).path("/search").query_param("q", "it's (ok)!");
			then.status(200).body("found");
		})
		.await;
	let steps = stage([step(&server, "/search", "search")
		.url_param("q", "it's (ok)!")
		.percent_encode(true)
		.parse(ParseType::Text)]);
	let run = run(&test_reqwest_http_client(), &steps, None)
		.await
		.expect("Encoded search should succeed.");
	let record = run.ledger.get("search").expect("Search step should be recorded.");

	search.assert_async().await;

	assert!(record.request.url.ends_with("/search?q=it%27s%20%28ok%29%21"));
	assert_eq!(record.response, json!("found"));
}

#[tokio::test]
async fn client_mode_turns_the_terminal_step_into_a_redirect() {
	let server = MockServer::start_async().await;
	let ticket = server
		.mock_async(|when, then| {
			when.method(POST).path("/ticket");
			then.status(200).json_body(json!({ "ticket": "X" }));
		})
		.await;
	let authorize = server
		.mock_async(|when, then| {
			when.method(GET).path("/authorize");
			then.status(200);
		})
		.await;
	let steps = stage([
		step(&server, "/ticket", "ticket").method(HttpMethod::Post),
		step(&server, "/authorize", "authorize")
			.url_param("ticket", ValueSpec::reference(["ticket", "response", "ticket"])),
	]);
	let http = test_reqwest_http_client();
	let registry = LibraryRegistry::server();
	let params = ParamsList::new();
	let run = PipelineRunner::new("mock", &http, &registry, &params)
		.with_mode(RunMode::Client)
		.run(StageKind::BeforeRedirect, &steps, Ledger::new(), ResultAccumulator::new())
		.await
		.expect("Before-redirect stage should succeed.");
	let form = run.redirect.expect("Terminal step should produce a redirect.");

	ticket.assert_async().await;

	assert_eq!(authorize.hits_async().await, 0);
	assert_eq!(form.method, HttpMethod::Get);
	assert_eq!(form.fields.get("ticket").map(String::as_str), Some("X"));
	assert_eq!(form.location().query(), Some("ticket=X"));
	assert_eq!(run.ledger.get("authorize").map(|record| &record.response), Some(&json!(null)));
}

#[tokio::test]
async fn attempts_are_cut_off_at_the_step_timeout() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/slow");
			then.status(200).delay(StdDuration::from_secs(5)).json_body(json!({ "late": true }));
		})
		.await;

	let timeout = Duration::milliseconds(200);
	let retries = Arc::new(Mutex::new(Vec::new()));
	let recorder = Arc::clone(&retries);
	let steps = stage([step(&server, "/slow", "slow").timeout(timeout).retry(
		RetryPolicy::new().with_backoff(|_, _| Duration::ZERO).with_on_retry(move |ctx| {
			recorder.lock().push((ctx.attempt, ctx.last_error.is_timeout(), ctx.timeout));
		}),
	)]);
	let http = test_reqwest_http_client();
	let exhausted =
		run(&http, &steps, None).await.expect("Timed-out attempts should exhaust, not raise.");

	// The default predicate retries timeouts until the default budget of two attempts.
	assert_eq!(*retries.lock(), [(1, true, timeout)]);
	assert_eq!(
		exhausted.ledger.get("slow").map(|record| &record.response),
		Some(&json!({ "error": "Max Retries Reached" }))
	);

	let steps = stage([step(&server, "/slow", "slow")
		.timeout(timeout)
		.retry(RetryPolicy::new().with_should_retry(|_, _| false))]);
	let err = run(&http, &steps, None).await.expect_err("A refused timeout should raise.");

	assert!(matches!(err, Error::Request(RequestError::Timeout { after }) if after == timeout));
}

#[tokio::test]
async fn proxy_rejection_is_fatal_without_retries() {
	let server = MockServer::start_async().await;
	let proxy = server
		.mock_async(|when, then| {
			when.method(POST).path("/proxy").header("content-type", "application/json");
			then.status(200).json_body(json!({ "status": "error", "data": "upstream down" }));
		})
		.await;
	let steps = stage([step(&server, "/data", "data")
		.proxy(mock_url(&server, "/proxy"))
		.to_return("data", Projection::All)]);
	let http = test_reqwest_http_client();
	let err = run(&http, &steps, None).await.expect_err("Proxy rejection should raise.");

	assert_eq!(proxy.hits_async().await, 1);
	assert!(matches!(
		err,
		Error::Request(RequestError::Proxy { ref message }) if message == "upstream down"
	));

	let sites = Arc::new(Mutex::new(Vec::new()));
	let recorder = Arc::clone(&sites);
	let handler: ErrorHandler = Arc::new(move |err: &Error, site: &ErrorSite| {
		let rejected = matches!(err, Error::Request(RequestError::Proxy { .. }));

		recorder.lock().push((site.step.clone(), rejected));

		ErrorDisposition::Continue
	});
	let run = run(&http, &steps, Some(&handler)).await.expect("Handled rejection should continue.");

	assert_eq!(proxy.hits_async().await, 2);
	assert_eq!(*sites.lock(), [("data".to_owned(), true)]);
	assert_eq!(run.ledger.get("data").map(|record| &record.response), Some(&json!("Error")));
	assert!(run.results.get("data").is_none());
}
