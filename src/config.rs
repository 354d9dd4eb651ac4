//! Startup configuration for the relay.
//!
//! ```json
//! {
//!   "resourceServers": [
//!     { "prefix": "https://api.example.com", "credential": "tok1" },
//!     { "prefix": "https://files.example.com/v2/" }
//!   ],
//!   "renewalTimeoutMs": 10000,
//!   "allowNestedPrefixes": false
//! }
//! ```

// self
use crate::{
	_prelude::*,
	channel::RenewalChannel,
	credential::TokenSecret,
	error::ConfigError,
	registry::ResourceServerRegistry,
	renewal::RenewalCoordinator,
};

const DEFAULT_RENEWAL_TIMEOUT_MS: u64 = 30_000;

/// One registered resource server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceServerEntry {
	/// URL prefix identifying the resource server.
	pub prefix: String,
	/// Credential to start with, if one is already known.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credential: Option<TokenSecret>,
}

/// Relay configuration deserialized from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelayConfig {
	/// Registered resource servers.
	#[serde(default)]
	pub resource_servers: Vec<ResourceServerEntry>,
	/// Upper bound on a renewal wait, in milliseconds.
	#[serde(default = "default_renewal_timeout_ms")]
	pub renewal_timeout_ms: u64,
	/// Permits overlapping prefixes, resolved by longest-prefix-match.
	#[serde(default)]
	pub allow_nested_prefixes: bool,
}
impl RelayConfig {
	/// Parses a JSON document; errors name the offending path.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);

		Ok(serde_path_to_error::deserialize(&mut de)?)
	}

	/// Returns the renewal timeout as a [`Duration`].
	pub fn renewal_timeout(&self) -> Duration {
		Duration::milliseconds(i64::try_from(self.renewal_timeout_ms).unwrap_or(i64::MAX))
	}

	/// Builds and validates the registry described by this configuration.
	pub fn build_registry(&self) -> Result<ResourceServerRegistry, ConfigError> {
		self.resource_servers
			.iter()
			.fold(
				ResourceServerRegistry::builder().allow_nested_prefixes(self.allow_nested_prefixes),
				|builder, entry| builder.register(&entry.prefix, entry.credential.clone()),
			)
			.build()
	}

	/// Builds a coordinator over `registry` that honours the configured timeout.
	pub fn build_coordinator(
		&self,
		registry: Arc<ResourceServerRegistry>,
		channel: Arc<dyn RenewalChannel>,
	) -> Result<RenewalCoordinator, ConfigError> {
		RenewalCoordinator::new(registry, channel).with_timeout(self.renewal_timeout())
	}
}
impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			resource_servers: Vec::new(),
			renewal_timeout_ms: DEFAULT_RENEWAL_TIMEOUT_MS,
			allow_nested_prefixes: false,
		}
	}
}
impl FromStr for RelayConfig {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_json_str(s)
	}
}

fn default_renewal_timeout_ms() -> u64 {
	DEFAULT_RENEWAL_TIMEOUT_MS
}
