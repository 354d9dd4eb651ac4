//! Message channel between the relay and the external credential authority.
//!
//! The relay posts [`OutboundMessage::RenewTokens`] when a resource server reports an invalid
//! token and later consumes [`InboundMessage`] notifications. Messages travel as JSON text,
//! matching a cross-context transport where both sides only share serialized frames:
//!
//! ```json
//! { "type": "renewTokens", "resourceServer": "https://api.example.com" }
//! { "type": "tokensUpdated", "resourceServer": "https://api.example.com", "credential": "tok2" }
//! { "type": "renewalFailed", "resourceServer": "https://api.example.com", "reason": "denied" }
//! ```
//!
//! [`pair`] builds an in-process channel on top of `tokio::sync::mpsc`; other transports only
//! need to implement [`RenewalChannel`] and feed inbound text into
//! [`RenewalCoordinator::handle_text`](crate::renewal::RenewalCoordinator::handle_text).

// crates.io
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
// self
use crate::{
	_prelude::*,
	credential::{ResourceServerId, TokenSecret},
	obs,
};

/// Message sent from the relay to the credential authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
	/// Asks the authority to renew the credential of a resource server.
	RenewTokens {
		/// Registration prefix of the resource server.
		resource_server: ResourceServerId,
	},
}
impl OutboundMessage {
	/// Returns the resource server the message refers to.
	pub fn resource_server(&self) -> &ResourceServerId {
		match self {
			Self::RenewTokens { resource_server } => resource_server,
		}
	}

	/// Serializes the message as a JSON frame.
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_default()
	}
}

/// Message sent from the credential authority to the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
	/// A fresh credential is available for a resource server.
	TokensUpdated {
		/// Registration prefix of the resource server.
		resource_server: ResourceServerId,
		/// Renewed bearer credential.
		credential: TokenSecret,
	},
	/// The authority could not renew the credential of a resource server.
	RenewalFailed {
		/// Registration prefix of the resource server.
		resource_server: ResourceServerId,
		/// Optional human-readable reason.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		reason: Option<String>,
	},
}
impl InboundMessage {
	/// Parses a JSON frame, returning `None` for malformed or unrecognized messages.
	pub fn parse(text: &str) -> Option<Self> {
		let mut de = serde_json::Deserializer::from_str(text);

		match serde_path_to_error::deserialize(&mut de) {
			Ok(message) => Some(message),
			Err(e) => {
				obs::emit_ignored_message(&format!("malformed frame at `{}`", e.path()));

				None
			},
		}
	}

	/// Serializes the message as a JSON frame.
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_default()
	}

	/// Returns the resource server the message refers to.
	pub fn resource_server(&self) -> &ResourceServerId {
		match self {
			Self::TokensUpdated { resource_server, .. }
			| Self::RenewalFailed { resource_server, .. } => resource_server,
		}
	}
}

/// Error returned when a message cannot be posted.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ChannelError {
	/// The authority side of the channel is gone.
	#[error("Credential authority channel is closed.")]
	Closed,
}

/// Outbound half of the authority channel as seen by the relay.
///
/// Posting must not block or suspend: the coordinator calls it right after transitioning a
/// resource server to the in-flight state.
pub trait RenewalChannel
where
	Self: Send + Sync,
{
	/// Posts `message` to the credential authority.
	fn post(&self, message: OutboundMessage) -> Result<(), ChannelError>;
}

/// Relay-side sender created by [`pair`].
#[derive(Clone, Debug)]
pub struct ChannelSink(UnboundedSender<String>);
impl RenewalChannel for ChannelSink {
	fn post(&self, message: OutboundMessage) -> Result<(), ChannelError> {
		self.0.send(message.to_json()).map_err(|_| ChannelError::Closed)
	}
}

/// Relay-side stream of inbound frames created by [`pair`].
#[derive(Debug)]
pub struct NotificationStream(UnboundedReceiver<String>);
impl NotificationStream {
	/// Waits for the next inbound frame; `None` once the authority side is dropped.
	pub async fn recv(&mut self) -> Option<String> {
		self.0.recv().await
	}
}

/// Authority side of the in-process channel created by [`pair`].
#[derive(Debug)]
pub struct AuthorityEndpoint {
	requests: UnboundedReceiver<String>,
	notifications: UnboundedSender<String>,
}
impl AuthorityEndpoint {
	/// Waits for the next renewal request posted by the relay.
	///
	/// Frames that do not parse as [`OutboundMessage`] are skipped.
	pub async fn next_request(&mut self) -> Option<OutboundMessage> {
		while let Some(frame) = self.requests.recv().await {
			if let Ok(message) = serde_json::from_str(&frame) {
				return Some(message);
			}
		}

		None
	}

	/// Returns a renewal request if one is already queued.
	pub fn try_next_request(&mut self) -> Option<OutboundMessage> {
		while let Ok(frame) = self.requests.try_recv() {
			if let Ok(message) = serde_json::from_str(&frame) {
				return Some(message);
			}
		}

		None
	}

	/// Announces a renewed credential for `resource_server`.
	pub fn tokens_updated(
		&self,
		resource_server: ResourceServerId,
		credential: impl Into<TokenSecret>,
	) -> Result<(), ChannelError> {
		self.notify(&InboundMessage::TokensUpdated {
			resource_server,
			credential: credential.into(),
		})
	}

	/// Announces that renewal failed for `resource_server`.
	pub fn renewal_failed(
		&self,
		resource_server: ResourceServerId,
		reason: Option<String>,
	) -> Result<(), ChannelError> {
		self.notify(&InboundMessage::RenewalFailed { resource_server, reason })
	}

	/// Sends a typed notification.
	pub fn notify(&self, message: &InboundMessage) -> Result<(), ChannelError> {
		self.send_raw(message.to_json())
	}

	/// Sends a raw frame; useful for exercising malformed-message handling.
	pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), ChannelError> {
		self.notifications.send(frame.into()).map_err(|_| ChannelError::Closed)
	}
}

/// The three handles produced by [`pair`].
#[derive(Debug)]
pub struct ChannelPair {
	/// Relay-side outbound sink, handed to the coordinator.
	pub sink: ChannelSink,
	/// Relay-side inbound stream, pumped by
	/// [`RenewalCoordinator::listen`](crate::renewal::RenewalCoordinator::listen).
	pub notifications: NotificationStream,
	/// Authority-side endpoint.
	pub authority: AuthorityEndpoint,
}

/// Creates an in-process channel between the relay and a credential authority.
pub fn pair() -> ChannelPair {
	let (request_tx, request_rx) = mpsc::unbounded_channel();
	let (notification_tx, notification_rx) = mpsc::unbounded_channel();

	ChannelPair {
		sink: ChannelSink(request_tx),
		notifications: NotificationStream(notification_rx),
		authority: AuthorityEndpoint { requests: request_rx, notifications: notification_tx },
	}
}
