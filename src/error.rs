//! Relay-level error types shared across the registry, gateway, and renewal coordinator.

// self
use crate::{_prelude::*, credential::ResourceServerId};

/// Relay-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical relay error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure raised while dispatching the request; never retried.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Credential renewal did not complete.
	#[error(transparent)]
	Renewal(#[from] RenewalError),

	/// The matched resource server has no credential to inject.
	#[error("No credential is available for resource server `{resource_server}`.")]
	NoCredentialAvailable {
		/// Resource server the request was matched to.
		resource_server: ResourceServerId,
	},
}

/// Configuration and validation failures raised by the relay.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Outbound request could not be rebuilt.
	#[error(transparent)]
	HttpRequest(#[from] ::http::Error),
	/// Resource server prefix is not a valid identifier.
	#[error("Resource server prefix is invalid.")]
	InvalidIdentifier(#[from] crate::credential::IdentifierError),
	/// Resource server prefix is not an absolute URL.
	#[error("Resource server prefix `{prefix}` is not an absolute URL.")]
	InvalidPrefix {
		/// Prefix as configured.
		prefix: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Resource server prefix uses a scheme other than `http` or `https`.
	#[error("Resource server prefix `{prefix}` must use http or https.")]
	UnsupportedScheme {
		/// Prefix as configured.
		prefix: String,
	},
	/// The same prefix was registered twice.
	#[error("Resource server prefix `{prefix}` is registered more than once.")]
	DuplicatePrefix {
		/// Prefix as configured.
		prefix: String,
	},
	/// One registered prefix is itself a prefix of another.
	#[error("Resource server prefix `{inner}` overlaps `{outer}`.")]
	OverlappingPrefixes {
		/// Shorter prefix.
		outer: String,
		/// Longer prefix nested under `outer`.
		inner: String,
	},
	/// Credential contains bytes that cannot appear in an HTTP header.
	#[error("Credential for resource server `{resource_server}` is not a valid header value.")]
	InvalidCredentialHeader {
		/// Resource server the credential belongs to.
		resource_server: ResourceServerId,
	},
	/// Renewal timeout must be strictly positive.
	#[error("Renewal timeout must be positive.")]
	NonPositiveTimeout,
	/// Configuration document could not be parsed.
	#[error("Relay configuration is malformed at `{path}`.")]
	Parse {
		/// Path to the offending field.
		path: String,
		/// Structured parsing failure.
		#[source]
		source: serde_json::Error,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<serde_path_to_error::Error<serde_json::Error>> for ConfigError {
	fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
		let path = e.path().to_string();

		Self::Parse { path, source: e.into_inner() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO) surfaced verbatim from the dispatcher.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a failure.
	#[error("Network error occurred while dispatching the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while dispatching the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Renewal failures fanned out to every request waiting on the same resource server.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RenewalError {
	/// The credential authority did not answer before the deadline.
	#[error("Credential renewal for `{resource_server}` timed out after {timeout}.")]
	Timeout {
		/// Resource server whose renewal timed out.
		resource_server: ResourceServerId,
		/// Wait bound that elapsed.
		timeout: Duration,
	},
	/// The credential authority refused, or the renewal could not be requested.
	#[error("Credential renewal for `{resource_server}` was rejected: {reason}.")]
	Rejected {
		/// Resource server whose renewal failed.
		resource_server: ResourceServerId,
		/// Authority- or relay-supplied reason string.
		reason: String,
	},
}
impl RenewalError {
	/// Returns the resource server the failure belongs to.
	pub fn resource_server(&self) -> &ResourceServerId {
		match self {
			Self::Timeout { resource_server, .. } | Self::Rejected { resource_server, .. } =>
				resource_server,
		}
	}
}
