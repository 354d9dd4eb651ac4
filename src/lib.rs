//! Bearer-token interception layer for Rust HTTP clients. Injects credentials for registered
//! resource servers, coalesces concurrent renewals, and retries once on `invalid_token`.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod channel;
pub mod classify;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod inject;
pub mod obs;
pub mod registry;
pub mod renewal;
pub mod transport;
mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use ::http;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
