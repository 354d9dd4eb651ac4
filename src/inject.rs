//! Bearer credential injection for matched requests.

// crates.io
use ::http::{HeaderValue, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	credential::TokenSecret,
	error::ConfigError,
	gateway::InterceptedRequest,
	registry::ResourceServer,
	transport::HttpRequest,
};

/// Attaches the current best-known credential of a resource server to a request.
#[derive(Clone, Copy, Debug, Default)]
pub struct CredentialInjector;
impl CredentialInjector {
	/// Builds a dispatchable request from `request` carrying exactly one
	/// `Authorization: Bearer <credential>` header.
	///
	/// Any `Authorization` header present on the snapshot is replaced. Fails with
	/// [`Error::NoCredentialAvailable`] when the server has no credential installed.
	pub fn inject(
		&self,
		request: &InterceptedRequest,
		server: &ResourceServer,
	) -> Result<HttpRequest> {
		self.inject_with_credential(request, server).map(|(prepared, _)| prepared)
	}

	/// Same as [`inject`](Self::inject), also returning the credential that was attached.
	pub fn inject_with_credential(
		&self,
		request: &InterceptedRequest,
		server: &ResourceServer,
	) -> Result<(HttpRequest, TokenSecret)> {
		let secret = server
			.credential()
			.ok_or_else(|| Error::NoCredentialAvailable { resource_server: server.id().clone() })?;
		let mut value = HeaderValue::try_from(format!("Bearer {}", secret.expose())).map_err(|_| {
			ConfigError::InvalidCredentialHeader { resource_server: server.id().clone() }
		})?;

		value.set_sensitive(true);

		let mut prepared = request.to_http()?;

		prepared.headers_mut().insert(AUTHORIZATION, value);

		Ok((prepared, secret))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::registry::ResourceServerRegistry;

	fn snapshot(authorization: Option<&str>) -> InterceptedRequest {
		let mut builder = ::http::Request::builder()
			.method(::http::Method::POST)
			.uri("https://api.example.com/v1/items")
			.header("x-trace", "abc");

		if let Some(value) = authorization {
			builder = builder.header(AUTHORIZATION, value);
		}

		let request = builder.body(b"payload".to_vec()).expect("Request fixture should build.");

		InterceptedRequest::capture(request)
	}

	fn registry(credential: Option<&str>) -> ResourceServerRegistry {
		ResourceServerRegistry::builder()
			.register("https://api.example.com", credential)
			.build()
			.expect("Registry fixture should build.")
	}

	#[test]
	fn inject_replaces_existing_authorization() {
		let registry = registry(Some("tok1"));
		let server = registry.get("https://api.example.com").expect("Server should exist.");
		let prepared = CredentialInjector
			.inject(&snapshot(Some("Basic dXNlcjpwYXNz")), &server)
			.expect("Injection should succeed with a credential.");
		let values = prepared.headers().get_all(AUTHORIZATION).iter().collect::<Vec<_>>();

		assert_eq!(values.len(), 1);
		assert_eq!(values[0], "Bearer tok1");
		assert!(values[0].is_sensitive());
		assert_eq!(prepared.headers().get("x-trace").map(|v| v.as_bytes()), Some(&b"abc"[..]));
		assert_eq!(prepared.method(), ::http::Method::POST);
		assert_eq!(prepared.body(), b"payload");
	}

	#[test]
	fn inject_without_credential_fails() {
		let registry = registry(None);
		let server = registry.get("https://api.example.com").expect("Server should exist.");
		let err = CredentialInjector
			.inject(&snapshot(None), &server)
			.expect_err("Injection must fail without a credential.");

		assert!(matches!(err, Error::NoCredentialAvailable { .. }));
	}

	#[test]
	fn inject_rejects_credentials_with_control_characters() {
		let registry = registry(Some("tok\n1"));
		let server = registry.get("https://api.example.com").expect("Server should exist.");
		let err = CredentialInjector
			.inject(&snapshot(None), &server)
			.expect_err("Credentials that are not header-safe must be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidCredentialHeader { .. })));
	}
}
