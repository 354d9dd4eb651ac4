//! Resource-server registry mapping URL prefixes to interception state.
//!
//! The registry is built once at startup through [`RegistryBuilder`] and is read-only
//! afterwards, except for each server's current credential which only the renewal coordinator
//! replaces. Lookups pick the longest registered prefix that matches the request URL at a path
//! boundary, so `https://api.example.com` matches `https://api.example.com/v1` but never
//! `https://api.example.com.evil.test/`.

// self
use crate::{
	_prelude::*,
	credential::{ResourceServerId, TokenSecret},
	error::ConfigError,
};

/// Credential currently installed for a resource server.
#[derive(Clone, Debug)]
pub struct InstalledCredential {
	/// Bearer token value.
	pub secret: TokenSecret,
	/// Instant the credential was installed.
	pub installed_at: OffsetDateTime,
}

/// Interception state for one registered resource server.
#[derive(Debug)]
pub struct ResourceServer {
	id: ResourceServerId,
	credential: RwLock<Option<InstalledCredential>>,
}
impl ResourceServer {
	fn new(id: ResourceServerId, credential: Option<TokenSecret>) -> Self {
		let credential = credential
			.map(|secret| InstalledCredential { secret, installed_at: OffsetDateTime::now_utc() });

		Self { id, credential: RwLock::new(credential) }
	}

	/// Returns the prefix this server was registered under.
	pub fn id(&self) -> &ResourceServerId {
		&self.id
	}

	/// Returns the current best-known credential, if any.
	pub fn credential(&self) -> Option<TokenSecret> {
		self.credential.read().as_ref().map(|installed| installed.secret.clone())
	}

	/// Returns the current credential along with its install time.
	pub fn installed_credential(&self) -> Option<InstalledCredential> {
		self.credential.read().clone()
	}

	pub(crate) fn install(&self, secret: TokenSecret, installed_at: OffsetDateTime) {
		*self.credential.write() = Some(InstalledCredential { secret, installed_at });
	}

	fn matches(&self, url: &str) -> bool {
		let prefix = self.id.as_str();

		if !url.starts_with(prefix) {
			return false;
		}
		if prefix.ends_with('/') {
			return true;
		}

		matches!(url[prefix.len()..].chars().next(), None | Some('/' | '?' | '#'))
	}
}

/// Read-mostly mapping from URL prefix to [`ResourceServer`].
#[derive(Debug, Default)]
pub struct ResourceServerRegistry {
	// Sorted by descending prefix length so the first hit is the longest match.
	servers: Vec<Arc<ResourceServer>>,
	by_id: HashMap<ResourceServerId, Arc<ResourceServer>>,
}
impl ResourceServerRegistry {
	/// Creates a new builder.
	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::default()
	}

	/// Returns the resource server whose prefix matches `url`, preferring the longest prefix.
	pub fn match_url(&self, url: &Url) -> Option<Arc<ResourceServer>> {
		self.match_str(url.as_str())
	}

	/// String form of [`match_url`](Self::match_url).
	pub fn match_str(&self, url: &str) -> Option<Arc<ResourceServer>> {
		self.servers.iter().find(|server| server.matches(url)).cloned()
	}

	/// Exact lookup by registration prefix.
	///
	/// Prefixes spelled differently from their registered form (`HTTPS://API.example.com:443`)
	/// resolve to the same server.
	pub fn get(&self, id: &str) -> Option<Arc<ResourceServer>> {
		self.by_id
			.get(id)
			.or_else(|| canonical_prefix(id).ok().and_then(|canonical| self.by_id.get(&*canonical)))
			.cloned()
	}

	/// Iterates over every registered server, longest prefix first.
	pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceServer>> {
		self.servers.iter()
	}

	/// Returns the number of registered servers.
	pub fn len(&self) -> usize {
		self.servers.len()
	}

	/// Returns `true` when no servers are registered.
	pub fn is_empty(&self) -> bool {
		self.servers.is_empty()
	}
}

/// Builder that validates prefixes before producing a [`ResourceServerRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
	entries: Vec<(String, Option<TokenSecret>)>,
	allow_nested_prefixes: bool,
}
impl RegistryBuilder {
	/// Registers a resource server prefix with its initial credential.
	pub fn register(
		mut self,
		prefix: impl Into<String>,
		credential: Option<impl Into<TokenSecret>>,
	) -> Self {
		self.entries.push((prefix.into(), credential.map(Into::into)));

		self
	}

	/// Permits prefixes nested under other prefixes; the longest match then wins.
	pub fn allow_nested_prefixes(mut self, allow: bool) -> Self {
		self.allow_nested_prefixes = allow;

		self
	}

	/// Validates all entries and builds the registry.
	pub fn build(self) -> Result<ResourceServerRegistry, ConfigError> {
		let mut by_id = HashMap::with_capacity(self.entries.len());

		for (prefix, credential) in self.entries {
			let id = ResourceServerId::new(canonical_prefix(&prefix)?)?;

			if by_id.contains_key(&id) {
				return Err(ConfigError::DuplicatePrefix { prefix });
			}

			by_id.insert(id.clone(), Arc::new(ResourceServer::new(id, credential)));
		}

		let mut servers = by_id.values().cloned().collect::<Vec<_>>();

		servers.sort_by(|a, b| b.id.len().cmp(&a.id.len()).then_with(|| a.id.cmp(&b.id)));

		if !self.allow_nested_prefixes {
			for (idx, inner) in servers.iter().enumerate() {
				let outer = servers[idx + 1..].iter().find(|outer| outer.matches(&inner.id));

				if let Some(outer) = outer {
					return Err(ConfigError::OverlappingPrefixes {
						outer: outer.id.to_string(),
						inner: inner.id.to_string(),
					});
				}
			}
		}

		Ok(ResourceServerRegistry { servers, by_id })
	}
}

// Renders `prefix` the way `Url` serializes request URLs (lowercase scheme and host, default
// port dropped, path percent-encoded) so string comparison against requests is sound. A bare
// origin keeps its no-trailing-slash form.
fn canonical_prefix(prefix: &str) -> Result<String, ConfigError> {
	let url = Url::parse(prefix)
		.map_err(|source| ConfigError::InvalidPrefix { prefix: prefix.to_owned(), source })?;

	if !matches!(url.scheme(), "http" | "https") {
		return Err(ConfigError::UnsupportedScheme { prefix: prefix.to_owned() });
	}

	let mut canonical = String::from(url.as_str());
	let bare_origin = url.path() == "/" && url.query().is_none() && url.fragment().is_none();

	if bare_origin && !prefix.trim_end().ends_with('/') {
		canonical.pop();
	}

	Ok(canonical)
}
