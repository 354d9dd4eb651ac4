//! Runs the relay against an in-memory resource server that rotates its accepted token, with an
//! in-process credential authority answering renewal requests.
//!
//! 1. Implement [`Dispatch`] for a toy resource server that rejects stale tokens with
//!    `WWW-Authenticate: Bearer error="invalid_token"`.
//! 2. Build the registry and coordinator from a [`RelayConfig`] document.
//! 3. Spawn the authority task and the coordinator's notification pump.
//! 4. Fire concurrent requests after the server rotates its token and watch them share a single
//!    renewal.

// std
use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
};
// crates.io
use color_eyre::Result;
use parking_lot::Mutex;
// self
use oauth2_relay::{
	channel::{self, ChannelPair},
	classify::ResponseClassifier,
	config::RelayConfig,
	error::ConfigError,
	gateway::InterceptionGateway,
	http::{self, header},
	inject::CredentialInjector,
	transport::{Dispatch, DispatchFuture, HttpRequest},
};

const CONFIG: &str = r#"{
	"resourceServers": [{ "prefix": "https://api.example.com", "credential": "tok-1" }],
	"renewalTimeoutMs": 2000
}"#;

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let config = RelayConfig::from_json_str(CONFIG)?;
	let registry = Arc::new(config.build_registry()?);
	let ChannelPair { sink, notifications, mut authority } = channel::pair();
	let coordinator = Arc::new(config.build_coordinator(registry.clone(), Arc::new(sink))?);
	let server = Arc::new(ToyResourceServer::new("tok-1"));
	let gateway = Arc::new(InterceptionGateway::new(
		registry,
		CredentialInjector,
		ResponseClassifier,
		coordinator.clone(),
		server.clone(),
	));

	tokio::spawn({
		let coordinator = coordinator.clone();

		async move { coordinator.listen(notifications).await }
	});
	tokio::spawn({
		let server = server.clone();

		async move {
			while let Some(request) = authority.next_request().await {
				let credential = server.current();

				println!("Authority renewing {} with {credential}.", request.resource_server());

				let resource_server = request.resource_server().clone();

				if authority.tokens_updated(resource_server, credential).is_err() {
					break;
				}
			}
		}
	});

	let response = gateway.intercept(get("https://api.example.com/v1/me")?).await?;

	println!("Initial request answered with {}.", response.status());

	server.rotate();

	let mut handles = Vec::new();

	for idx in 0..3 {
		let gateway = gateway.clone();

		handles.push(tokio::spawn(async move {
			gateway.intercept(get(&format!("https://api.example.com/v1/items/{idx}"))?).await
		}));
	}

	for handle in handles {
		println!("Concurrent request answered with {}.", handle.await??.status());
	}

	println!(
		"Renewals started: {}, coalesced: {}.",
		coordinator.metrics().started(),
		coordinator.metrics().coalesced()
	);

	let response = gateway.intercept(get("https://other.example.com/health")?).await?;

	println!("Unregistered origin passed through with {}.", response.status());

	Ok(())
}

fn get(uri: &str) -> oauth2_relay::error::Result<HttpRequest> {
	Ok(http::Request::builder().uri(uri).body(Vec::new()).map_err(ConfigError::from)?)
}

#[derive(Debug)]
struct ToyError(http::Error);
impl Display for ToyError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "toy resource server failed to build a response: {}", self.0)
	}
}
impl std::error::Error for ToyError {}

struct ToyResourceServer {
	accepted: Mutex<String>,
	version: AtomicU32,
}
impl ToyResourceServer {
	fn new(token: &str) -> Self {
		Self { accepted: Mutex::new(token.into()), version: AtomicU32::new(1) }
	}

	fn current(&self) -> String {
		self.accepted.lock().clone()
	}

	fn rotate(&self) {
		let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

		*self.accepted.lock() = format!("tok-{version}");
	}
}
impl Dispatch for ToyResourceServer {
	type TransportError = ToyError;

	fn dispatch(&self, request: HttpRequest) -> DispatchFuture<'_, Self::TransportError> {
		let expected = format!("Bearer {}", self.current());
		let authorized = request
			.headers()
			.get(header::AUTHORIZATION)
			.is_some_and(|value| value.as_bytes() == expected.as_bytes());
		let public = request.uri().host() != Some("api.example.com");

		Box::pin(async move {
			let builder = if authorized || public {
				http::Response::builder().status(200)
			} else {
				http::Response::builder()
					.status(401)
					.header(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")
			};

			builder.body(Vec::new()).map_err(ToyError)
		})
	}
}
