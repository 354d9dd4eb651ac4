//! Interception gateway driving one request through match, inject, dispatch, classify, and (at
//! most once) renew + retry.
//!
//! Requests whose URL matches no registered prefix leave untouched. Matched requests follow
//!
//! ```text
//! Matched → Injected → Dispatched → Classified ─┬─ Delivered
//!                                               └─ Renewing ─┬─ Retried → …
//!                                                            └─ Failed
//! ```
//!
//! The retry bound lives in [`Attempt`]: a recoverable failure observed on
//! [`Attempt::Retry`] is delivered as-is instead of triggering another renewal.

// crates.io
use ::http::{HeaderMap, Method, Uri, Version};
// self
use crate::{
	_prelude::*,
	classify::{Classification, ResponseClassifier},
	error::{ConfigError, TransportError},
	inject::CredentialInjector,
	obs::{self, InterceptStage, RelaySpan},
	registry::{ResourceServer, ResourceServerRegistry},
	renewal::RenewalCoordinator,
	transport::{Dispatch, HttpRequest, HttpResponse},
};

/// Immutable snapshot of a request taken at the moment of interception.
#[derive(Clone, Debug)]
pub struct InterceptedRequest {
	method: Method,
	uri: Uri,
	version: Version,
	headers: HeaderMap,
	body: Vec<u8>,
}
impl InterceptedRequest {
	/// Captures `request`; extensions are not carried over.
	pub fn capture(request: HttpRequest) -> Self {
		let (parts, body) = request.into_parts();

		Self {
			method: parts.method,
			uri: parts.uri,
			version: parts.version,
			headers: parts.headers,
			body,
		}
	}

	/// Request method.
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Request URI.
	pub fn uri(&self) -> &Uri {
		&self.uri
	}

	/// Request headers as captured.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Request body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Parses the request URI as an absolute URL, if it is one.
	pub fn url(&self) -> Option<Url> {
		Url::parse(&self.uri.to_string()).ok()
	}

	/// Rebuilds a dispatchable request identical to the snapshot.
	pub fn to_http(&self) -> Result<HttpRequest, ConfigError> {
		let mut request = ::http::Request::builder()
			.method(self.method.clone())
			.uri(self.uri.clone())
			.version(self.version)
			.body(self.body.clone())?;

		*request.headers_mut() = self.headers.clone();

		Ok(request)
	}

	fn into_http(self) -> Result<HttpRequest, ConfigError> {
		let mut request = ::http::Request::builder()
			.method(self.method)
			.uri(self.uri)
			.version(self.version)
			.body(self.body)?;

		*request.headers_mut() = self.headers;

		Ok(request)
	}
}

/// Which dispatch of a matched request is in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
	/// First dispatch with the credential known at interception time.
	Initial,
	/// Single replay after a successful renewal.
	Retry,
}

/// Orchestrates the interception lifecycle for every outbound request.
pub struct InterceptionGateway<D>
where
	D: ?Sized + Dispatch,
{
	registry: Arc<ResourceServerRegistry>,
	injector: CredentialInjector,
	classifier: ResponseClassifier,
	coordinator: Arc<RenewalCoordinator>,
	dispatcher: Arc<D>,
}
impl<D> InterceptionGateway<D>
where
	D: ?Sized + Dispatch,
{
	/// Creates a gateway from its collaborators.
	///
	/// `coordinator` should install credentials into the same `registry`; otherwise renewed
	/// credentials for servers looked up here will not be seen by retries.
	pub fn new(
		registry: Arc<ResourceServerRegistry>,
		injector: CredentialInjector,
		classifier: ResponseClassifier,
		coordinator: Arc<RenewalCoordinator>,
		dispatcher: Arc<D>,
	) -> Self {
		Self { registry, injector, classifier, coordinator, dispatcher }
	}

	/// Returns the registry consulted for every request.
	pub fn registry(&self) -> &Arc<ResourceServerRegistry> {
		&self.registry
	}

	/// Returns the coordinator shared by all intercepted requests.
	pub fn coordinator(&self) -> &Arc<RenewalCoordinator> {
		&self.coordinator
	}

	/// Sends `request`, transparently handling bearer credentials for registered servers.
	///
	/// Unmatched requests are dispatched unmodified. Matched requests are delivered either the
	/// response of their final attempt or the error that ended them. Dropping the returned
	/// future aborts the dispatch in progress but never tears down a renewal shared with other
	/// requests.
	pub async fn intercept(&self, request: HttpRequest) -> Result<HttpResponse> {
		let snapshot = InterceptedRequest::capture(request);
		let Some(server) = snapshot.url().and_then(|url| self.registry.match_url(&url)) else {
			obs::record_stage(InterceptStage::PassThrough);

			return self.dispatch(snapshot.into_http()?).await;
		};
		let span = RelaySpan::intercept(snapshot.method().as_str(), server.id());

		span.instrument(async move {
			let result = self.drive(&snapshot, &server).await;
			let stage =
				if result.is_ok() { InterceptStage::Delivered } else { InterceptStage::Failed };

			advance(stage);

			result
		})
		.await
	}

	async fn drive(
		&self,
		snapshot: &InterceptedRequest,
		server: &Arc<ResourceServer>,
	) -> Result<HttpResponse> {
		let mut attempt = Attempt::Initial;

		advance(InterceptStage::Matched);

		loop {
			let (prepared, injected) = self.injector.inject_with_credential(snapshot, server)?;

			advance(InterceptStage::Injected);

			let response = self.dispatch(prepared).await?;

			advance(InterceptStage::Dispatched);

			let classification = self.classifier.classify(response);

			advance(InterceptStage::Classified);

			match (classification, attempt) {
				(Classification::RecoverableAuthFailure { .. }, Attempt::Initial) => {
					// A renewal that landed while this attempt was in flight already replaced
					// the rejected credential.
					if server.credential().is_none_or(|current| current == injected) {
						advance(InterceptStage::Renewing);
						self.coordinator.renew(server).await?;
					}

					advance(InterceptStage::Retried);

					attempt = Attempt::Retry;
				},
				(classification, _) => return Ok(classification.into_response()),
			}
		}
	}

	async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse> {
		self.dispatcher
			.dispatch(request)
			.await
			.map_err(|e| Error::Transport(TransportError::network(e)))
	}
}
impl<D> Debug for InterceptionGateway<D>
where
	D: ?Sized + Dispatch,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InterceptionGateway")
			.field("servers", &self.registry.len())
			.field("coordinator", &self.coordinator)
			.finish()
	}
}

fn advance(stage: InterceptStage) {
	obs::record_stage(stage);
	obs::emit_stage(stage);
}
