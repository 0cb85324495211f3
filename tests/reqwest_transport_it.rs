#![cfg(feature = "reqwest")]

// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use gateway_client::{
	auth::{Credential, TenantId, TokenSecret},
	client::GatewayClient,
	config::ClientConfig,
	error::Error,
	request::ApiRequest,
	retry::RetryPolicy,
	transport::ReqwestTransport,
	url::Url,
};

fn build_config(server: &MockServer, retry: RetryPolicy) -> ClientConfig {
	let base_url =
		Url::parse(&server.url("/")).expect("Mock server URL should parse successfully.");

	ClientConfig::builder(base_url)
		.allow_insecure_http()
		.default_tenant(TenantId::new("tenant-http").expect("Tenant identifier should be valid."))
		.retry(retry)
		.build()
		.expect("Configuration should build for the mock server.")
}

fn build_client(server: &MockServer, retry: RetryPolicy) -> GatewayClient<ReqwestTransport> {
	let client = GatewayClient::new(build_config(server, retry))
		.expect("Reqwest-backed client should build successfully.");

	client.set_credential(Credential::new(
		TokenSecret::new("old-access"),
		TokenSecret::new("renewal-token"),
		time::Duration::hours(1),
	));

	client
}

#[tokio::test]
async fn requests_carry_pipeline_headers_and_sanitized_bodies() {
	let server = MockServer::start_async().await;
	let client = build_client(&server, RetryPolicy::disabled());
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/guests")
				.header("authorization", "Bearer old-access")
				.header("x-tenant-id", "tenant-http")
				.header_exists("x-request-id")
				.header_exists("x-csrf-token")
				.json_body(json!({ "name": "Ada Lovelace", "email": "ada@example.com" }));
			then.status(201).header("content-type", "application/json").body("{\"id\":42}");
		})
		.await;
	let response = client
		.execute(ApiRequest::post("/guests").json(json!({
			"name": "<script>steal()</script>Ada <b>Lovelace</b>",
			"email": " ADA@example.com "
		})))
		.await
		.expect("Sanitized request should reach the backend.");

	assert_eq!(response.status, 201);
	assert_eq!(response.body, json!({ "id": 42 }));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn rejected_credentials_are_renewed_once_and_replayed() {
	let server = MockServer::start_async().await;
	let client = build_client(&server, RetryPolicy::disabled());
	let rejected = server
		.mock_async(|when, then| {
			when.method(GET).path("/profile").header("authorization", "Bearer old-access");
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"code\":\"token_expired\"}");
		})
		.await;
	let renewal = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/auth/refresh")
				.json_body(json!({ "refresh_token": "renewal-token" }));
			then.status(200).header("content-type", "application/json").body(
				"{\"accessToken\":\"new-access\",\"refreshToken\":\"renewal-2\",\"expiresIn\":900}",
			);
		})
		.await;
	let accepted = server
		.mock_async(|when, then| {
			when.method(GET).path("/profile").header("authorization", "Bearer new-access");
			then.status(200).header("content-type", "application/json").body("{\"name\":\"Ada\"}");
		})
		.await;
	let response =
		client.execute(ApiRequest::get("/profile")).await.expect("Replay should succeed.");

	assert_eq!(response.body, json!({ "name": "Ada" }));
	assert_eq!(
		client.credential().map(|credential| credential.renewal.expose().to_owned()),
		Some("renewal-2".into())
	);

	rejected.assert_calls_async(1).await;
	renewal.assert_calls_async(1).await;
	accepted.assert_calls_async(1).await;
}

#[tokio::test]
async fn retry_after_is_surfaced_on_backend_throttling() {
	let server = MockServer::start_async().await;
	let client = build_client(&server, RetryPolicy::disabled());
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/reports");
			then.status(429).header("retry-after", "2");
		})
		.await;
	let outcome = client.execute(ApiRequest::get("/reports")).await;

	assert_eq!(outcome, Err(Error::RateLimited { retry_after: StdDuration::from_secs(2) }));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn transient_failures_use_the_whole_retry_budget() {
	let server = MockServer::start_async().await;
	let retry = RetryPolicy::default()
		.with_max_attempts(3)
		.with_delays(StdDuration::from_millis(5), StdDuration::from_millis(20));
	let client = build_client(&server, retry);
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/availability");
			then.status(503);
		})
		.await;
	let outcome = client.execute(ApiRequest::get("/availability")).await;

	assert_eq!(outcome, Err(Error::ServerError { status: 503 }));

	mock.assert_calls_async(3).await;
}

#[tokio::test]
async fn unreachable_backend_maps_to_network_unavailable() {
	let config = ClientConfig::builder(
		Url::parse("http://127.0.0.1:9/").expect("Loopback URL should parse successfully."),
	)
	.allow_insecure_http()
	.retry(RetryPolicy::disabled())
	.build()
	.expect("Configuration should build.");
	let client = GatewayClient::new(config).expect("Reqwest-backed client should build.");
	let outcome = client.execute(ApiRequest::get("/rooms")).await;

	assert!(
		matches!(outcome, Err(Error::NetworkUnavailable | Error::Timeout)),
		"Unexpected outcome: {outcome:?}"
	);
}
