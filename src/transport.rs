//! Transport boundary for dispatching intercepted requests.
//!
//! The relay never performs network I/O itself. Callers supply a [`Dispatch`] implementation
//! (any asynchronous HTTP client) and the gateway hands it fully prepared requests. The
//! reqwest-backed [`ReqwestDispatcher`] is available behind the default `reqwest` feature.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::TransportError;

/// Outbound HTTP request handled by the relay.
pub type HttpRequest = ::http::Request<Vec<u8>>;
/// HTTP response produced by a [`Dispatch`] implementation.
pub type HttpResponse = ::http::Response<Vec<u8>>;

/// Boxed future returned by [`Dispatch::dispatch`].
pub type DispatchFuture<'a, E> = Pin<Box<dyn Future<Output = Result<HttpResponse, E>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing intercepted requests.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by every
/// gateway invocation in flight. Dropping the returned future must abort the request; the
/// gateway relies on this when a caller abandons an interception.
pub trait Dispatch
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Executes `request` and resolves with the complete response.
	fn dispatch(&self, request: HttpRequest) -> DispatchFuture<'_, Self::TransportError>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestDispatcher(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestDispatcher {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestDispatcher {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestDispatcher {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Dispatch for ReqwestDispatcher {
	type TransportError = TransportError;

	fn dispatch(&self, request: HttpRequest) -> DispatchFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let response = client.execute(request.try_into()?).await?;
			let status = response.status();
			let version = response.version();
			let headers = response.headers().to_owned();
			let mut response_new = HttpResponse::new(response.bytes().await?.to_vec());

			*response_new.status_mut() = status;
			*response_new.version_mut() = version;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
