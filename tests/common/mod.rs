//! Shared fixtures for relay integration tests.

#![allow(dead_code)]

// std
use std::{collections::VecDeque, sync::Arc};
// crates.io
use oauth2_relay::{
	channel::{self, AuthorityEndpoint, ChannelPair, NotificationStream},
	classify::ResponseClassifier,
	gateway::InterceptionGateway,
	http::{self, HeaderMap, Method, header},
	inject::CredentialInjector,
	registry::ResourceServerRegistry,
	renewal::RenewalCoordinator,
	transport::{Dispatch, DispatchFuture, HttpRequest, HttpResponse},
};
#[cfg(feature = "reqwest")] use oauth2_relay::{reqwest, transport::ReqwestDispatcher};
use parking_lot::Mutex;
use time::Duration;

/// Gateway under test plus handles on its collaborators.
pub struct TestRelay<D>
where
	D: ?Sized + Dispatch,
{
	pub gateway: InterceptionGateway<D>,
	pub registry: Arc<ResourceServerRegistry>,
	pub coordinator: Arc<RenewalCoordinator>,
	pub authority: AuthorityEndpoint,
}

/// Wires a gateway around `dispatcher` with an in-process authority channel.
///
/// The notification pump is not spawned; tests spawn [`RenewalCoordinator::listen`] with the
/// returned stream or feed frames through [`RenewalCoordinator::handle_text`].
pub fn build_test_relay<D>(
	registry: ResourceServerRegistry,
	dispatcher: Arc<D>,
	renewal_timeout: Duration,
) -> (TestRelay<D>, NotificationStream)
where
	D: ?Sized + Dispatch,
{
	let ChannelPair { sink, notifications, authority } = channel::pair();
	let registry = Arc::new(registry);
	let coordinator = Arc::new(
		RenewalCoordinator::new(registry.clone(), Arc::new(sink))
			.with_timeout(renewal_timeout)
			.expect("Test renewal timeout should be positive."),
	);
	let gateway = InterceptionGateway::new(
		registry.clone(),
		CredentialInjector,
		ResponseClassifier,
		coordinator.clone(),
		dispatcher,
	);

	(TestRelay { gateway, registry, coordinator, authority }, notifications)
}

/// Request as observed by [`ScriptedDispatcher`].
#[derive(Clone, Debug)]
pub struct SeenRequest {
	pub method: Method,
	pub uri: String,
	pub headers: HeaderMap,
	pub body: Vec<u8>,
}
impl SeenRequest {
	/// Every `Authorization` header value, in order.
	pub fn authorization(&self) -> Vec<String> {
		self.headers
			.get_all(header::AUTHORIZATION)
			.iter()
			.map(|value| value.to_str().unwrap_or_default().to_owned())
			.collect()
	}
}

/// Transport that records every request and answers from a queue, falling back to `200 OK`.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
	responses: Mutex<VecDeque<Result<HttpResponse, std::io::Error>>>,
	seen: Mutex<Vec<SeenRequest>>,
}
impl ScriptedDispatcher {
	pub fn push_response(&self, response: HttpResponse) {
		self.responses.lock().push_back(Ok(response));
	}

	pub fn push_error(&self, error: std::io::Error) {
		self.responses.lock().push_back(Err(error));
	}

	pub fn requests(&self) -> Vec<SeenRequest> {
		self.seen.lock().clone()
	}
}
impl Dispatch for ScriptedDispatcher {
	type TransportError = std::io::Error;

	fn dispatch(&self, request: HttpRequest) -> DispatchFuture<'_, Self::TransportError> {
		let (parts, body) = request.into_parts();

		self.seen.lock().push(SeenRequest {
			method: parts.method,
			uri: parts.uri.to_string(),
			headers: parts.headers,
			body,
		});

		let scripted = self.responses.lock().pop_front().unwrap_or_else(|| Ok(response(200, None)));

		Box::pin(async move { scripted })
	}
}

/// Response with `status` and an optional `WWW-Authenticate` header.
pub fn response(status: u16, www_authenticate: Option<&str>) -> HttpResponse {
	let mut builder = http::Response::builder().status(status);

	if let Some(challenge) = www_authenticate {
		builder = builder.header(header::WWW_AUTHENTICATE, challenge);
	}

	builder.body(Vec::new()).expect("Test response should build.")
}

/// `401` carrying `Bearer error="invalid_token"`.
pub fn invalid_token() -> HttpResponse {
	response(401, Some("Bearer realm=\"api\", error=\"invalid_token\""))
}

/// Bodiless `GET` for `uri`.
pub fn get(uri: &str) -> HttpRequest {
	http::Request::builder()
		.method(Method::GET)
		.uri(uri)
		.body(Vec::new())
		.expect("Test request should build.")
}

/// Reqwest dispatcher that tolerates the self-signed certificates of `httpmock`.
#[cfg(feature = "reqwest")]
pub fn test_reqwest_dispatcher() -> ReqwestDispatcher {
	let client = reqwest::Client::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.");

	ReqwestDispatcher::with_client(client)
}
