//! Response classification for intercepted requests.
//!
//! Only a credential-specific failure warrants a renewal: a non-success response carrying a
//! `Bearer` challenge whose `error` auth-param is `invalid_token` (RFC 6750 §3.1). Any other
//! failure, including a bare 401 without a parseable challenge, is passed through verbatim.

// crates.io
use ::http::header::WWW_AUTHENTICATE;
// self
use crate::{_prelude::*, transport::HttpResponse};

/// RFC 6750 error code that marks an expired or otherwise invalid access token.
pub const INVALID_TOKEN: &str = "invalid_token";

/// Outcome of classifying a completed response.
#[derive(Debug)]
pub enum Classification {
	/// The response is a success (`2xx`).
	Success(HttpResponse),
	/// The resource server rejected the credential itself; renewal may help.
	RecoverableAuthFailure {
		/// `error` auth-param reported by the resource server.
		error_code: String,
		/// Response as received, delivered verbatim if a retry is not attempted.
		response: HttpResponse,
	},
	/// Any other failure; never triggers renewal.
	UnrecoverableFailure(HttpResponse),
}
impl Classification {
	/// Returns `true` for [`Classification::RecoverableAuthFailure`].
	pub fn is_recoverable(&self) -> bool {
		matches!(self, Self::RecoverableAuthFailure { .. })
	}

	/// Consumes the classification and returns the underlying response.
	pub fn into_response(self) -> HttpResponse {
		match self {
			Self::Success(response)
			| Self::UnrecoverableFailure(response)
			| Self::RecoverableAuthFailure { response, .. } => response,
		}
	}
}

/// Decides whether a response represents a recoverable credential failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseClassifier;
impl ResponseClassifier {
	/// Classifies `response`.
	pub fn classify(&self, response: HttpResponse) -> Classification {
		if response.status().is_success() {
			return Classification::Success(response);
		}

		let error_code = response
			.headers()
			.get_all(WWW_AUTHENTICATE)
			.iter()
			.filter_map(|value| value.to_str().ok())
			.filter_map(parse_bearer_challenge)
			.find_map(|challenge| challenge.error.filter(|code| code == INVALID_TOKEN));

		match error_code {
			Some(error_code) => Classification::RecoverableAuthFailure { error_code, response },
			None => Classification::UnrecoverableFailure(response),
		}
	}
}

/// Auth-params of a `Bearer` challenge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BearerChallenge {
	/// `realm` auth-param.
	pub realm: Option<String>,
	/// `error` auth-param.
	pub error: Option<String>,
	/// `error_description` auth-param.
	pub error_description: Option<String>,
	/// `scope` auth-param.
	pub scope: Option<String>,
}

/// Parses the first `Bearer` challenge found in a `WWW-Authenticate` header value.
///
/// Scheme and parameter names are matched case-insensitively; values may be tokens or quoted
/// strings with backslash escapes. Returns `None` when no `Bearer` challenge is present or the
/// value is malformed.
pub fn parse_bearer_challenge(value: &str) -> Option<BearerChallenge> {
	let mut cursor = Cursor::new(value);

	loop {
		cursor.skip_separators();

		let scheme = cursor.token()?;

		if scheme.eq_ignore_ascii_case("bearer") {
			return cursor.bearer_params();
		}

		cursor.skip_params()?;
	}
}

struct Cursor<'a> {
	src: &'a str,
	pos: usize,
}
impl<'a> Cursor<'a> {
	fn new(src: &'a str) -> Self {
		Self { src, pos: 0 }
	}

	fn rest(&self) -> &'a str {
		&self.src[self.pos..]
	}

	fn peek(&self) -> Option<char> {
		self.rest().chars().next()
	}

	fn skip_whitespace(&mut self) {
		let rest = self.rest();

		self.pos += rest.len() - rest.trim_start_matches([' ', '\t']).len();
	}

	fn skip_separators(&mut self) {
		let rest = self.rest();

		self.pos += rest.len() - rest.trim_start_matches([' ', '\t', ',']).len();
	}

	fn token(&mut self) -> Option<&'a str> {
		let rest = self.rest();
		let len = rest.find(|c: char| !is_tchar(c)).unwrap_or(rest.len());

		if len == 0 {
			return None;
		}

		self.pos += len;

		Some(&rest[..len])
	}

	fn quoted(&mut self) -> Option<String> {
		let mut out = String::new();
		let mut chars = self.rest().char_indices();

		chars.next().filter(|(_, c)| *c == '"')?;

		while let Some((idx, c)) = chars.next() {
			match c {
				'"' => {
					self.pos += idx + 1;

					return Some(out);
				},
				'\\' => out.push(chars.next()?.1),
				_ => out.push(c),
			}
		}

		None
	}

	// Parses `name = value` for the next auth-param. Returns `None` when the cursor is at the
	// start of another challenge (a token not followed by `=`) or at the end of input.
	fn param(&mut self) -> Option<Option<(String, String)>> {
		self.skip_separators();

		let checkpoint = self.pos;
		let Some(name) = self.token() else {
			return if self.rest().is_empty() { Some(None) } else { None };
		};

		self.skip_whitespace();

		if self.peek() != Some('=') {
			self.pos = checkpoint;

			return Some(None);
		}

		self.pos += 1;
		self.skip_whitespace();

		let value = match self.peek() {
			Some('"') => self.quoted()?,
			_ => self.token()?.to_owned(),
		};

		Some(Some((name.to_ascii_lowercase(), value)))
	}

	fn bearer_params(&mut self) -> Option<BearerChallenge> {
		let mut challenge = BearerChallenge::default();

		while let Some((name, value)) = self.param()? {
			match name.as_str() {
				"realm" => challenge.realm = Some(value),
				"error" => challenge.error = Some(value),
				"error_description" => challenge.error_description = Some(value),
				"scope" => challenge.scope = Some(value),
				_ => {},
			}
		}

		Some(challenge)
	}

	fn skip_params(&mut self) -> Option<()> {
		while self.param()?.is_some() {}

		Some(())
	}
}

fn is_tchar(c: char) -> bool {
	c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~/".contains(c)
}
