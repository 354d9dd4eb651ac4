//! Renewal coordination with per-server coalescing, FIFO fan-out, and bounded waits.
//!
//! [`RenewalCoordinator::renew`] is called by every request that observed an `invalid_token`
//! failure. The first caller for a resource server flips its state from idle to in-flight and
//! posts a single `renewTokens` message; every later caller joins the waiter list of that
//! renewal instead. The check-and-transition step runs under a synchronous lock with no
//! suspension point, so N concurrent triggers always yield exactly one outbound message.
//!
//! A renewal settles in one of three ways, releasing every waiter in arrival order:
//!
//! - a `tokensUpdated` notification installs the credential and resolves all waiters;
//! - a `renewalFailed` notification (or a channel error) rejects them;
//! - the shared deadline passes, and the first waiter to observe it rejects everyone with
//!   [`RenewalError::Timeout`] and resets the state, so a later trigger starts afresh.
//!
//! Waiters own nothing but their continuation. A caller that abandons its wait simply drops it;
//! the shared renewal keeps running for the remaining waiters.

mod metrics;

pub use metrics::RenewalMetrics;

// std
use std::{
	mem,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::{sync::oneshot, time::Instant};
// self
use crate::{
	_prelude::*,
	channel::{InboundMessage, NotificationStream, OutboundMessage, RenewalChannel},
	credential::ResourceServerId,
	error::{ConfigError, RenewalError},
	obs::{self, RelaySpan, RenewalOutcome},
	registry::{ResourceServer, ResourceServerRegistry},
};

type Waiter = oneshot::Sender<Result<(), RenewalError>>;

/// Observable renewal state of one resource server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewalStatus {
	/// No renewal is in flight.
	Idle,
	/// A renewal is in flight.
	InFlight {
		/// Callers still waiting on the renewal.
		waiters: usize,
	},
}

#[derive(Debug, Default)]
enum RenewalState {
	#[default]
	Idle,
	InFlight(InFlightRenewal),
}

#[derive(Debug)]
struct InFlightRenewal {
	generation: u64,
	deadline: Instant,
	server: Arc<ResourceServer>,
	waiters: Vec<Waiter>,
}

/// Coalesces renewal triggers per resource server and fans out the result.
pub struct RenewalCoordinator {
	registry: Arc<ResourceServerRegistry>,
	channel: Arc<dyn RenewalChannel>,
	timeout: Duration,
	states: Mutex<HashMap<ResourceServerId, RenewalState>>,
	generation: AtomicU64,
	metrics: RenewalMetrics,
}
impl RenewalCoordinator {
	/// Default bound on how long callers wait for the credential authority.
	pub const DEFAULT_TIMEOUT: Duration = Duration::seconds(30);

	/// Creates a coordinator that installs renewed credentials into `registry` and posts renewal
	/// requests on `channel`.
	pub fn new(registry: Arc<ResourceServerRegistry>, channel: Arc<dyn RenewalChannel>) -> Self {
		Self {
			registry,
			channel,
			timeout: Self::DEFAULT_TIMEOUT,
			states: Default::default(),
			generation: AtomicU64::new(0),
			metrics: Default::default(),
		}
	}

	/// Overrides the renewal wait bound; it must be strictly positive.
	pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
		if !timeout.is_positive() {
			return Err(ConfigError::NonPositiveTimeout);
		}

		self.timeout = timeout;

		Ok(self)
	}

	/// Returns the renewal wait bound.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Returns the coordinator's counters.
	pub fn metrics(&self) -> &RenewalMetrics {
		&self.metrics
	}

	/// Returns the registry renewed credentials are installed into.
	pub fn registry(&self) -> &Arc<ResourceServerRegistry> {
		&self.registry
	}

	/// Returns the renewal state of `id`.
	pub fn status(&self, id: &str) -> RenewalStatus {
		match self.states.lock().get(id) {
			Some(RenewalState::InFlight(flight)) => RenewalStatus::InFlight {
				waiters: flight.waiters.iter().filter(|waiter| !waiter.is_closed()).count(),
			},
			_ => RenewalStatus::Idle,
		}
	}

	/// Waits until a fresh credential for `server` is installed.
	///
	/// Posts a renewal request only if no renewal for the server is already in flight.
	pub async fn renew(&self, server: &Arc<ResourceServer>) -> Result<(), RenewalError> {
		let span = RelaySpan::renewal(server.id());

		span.instrument(async move {
			self.metrics.record_trigger();

			let (tx, rx) = oneshot::channel();
			let (generation, deadline, started) = self.enqueue(server, tx);
			let id = server.id();

			if started {
				self.metrics.record_started();
				obs::record_renewal_outcome(RenewalOutcome::Started);
				obs::emit_renewal(id, RenewalOutcome::Started);

				if let Err(e) =
					self.channel.post(OutboundMessage::RenewTokens { resource_server: id.clone() })
				{
					self.settle_rejected(id, Some(generation), e.to_string());
				}
			} else {
				self.metrics.record_coalesced();
				obs::record_renewal_outcome(RenewalOutcome::Coalesced);
				obs::emit_renewal(id, RenewalOutcome::Coalesced);
			}

			match tokio::time::timeout_at(deadline, rx).await {
				Ok(Ok(result)) => result,
				Ok(Err(_)) => Err(RenewalError::Rejected {
					resource_server: id.clone(),
					reason: "renewal was discarded before completing".into(),
				}),
				Err(_) => {
					self.expire(id, generation);

					Err(self.timeout_error(id))
				},
			}
		})
		.await
	}

	/// Applies an authority notification. Returns `false` if the message was ignored.
	pub fn handle_message(&self, message: InboundMessage) -> bool {
		match message {
			InboundMessage::TokensUpdated { resource_server, credential } => {
				let Some(server) = self
					.in_flight_server(&resource_server)
					.or_else(|| self.registry.get(&resource_server))
				else {
					obs::emit_ignored_message("tokens updated for an unknown resource server");

					return false;
				};

				server.install(credential, OffsetDateTime::now_utc());

				if self.settle(server.id(), None, Ok(())).is_some() {
					self.metrics.record_completed();
					obs::record_renewal_outcome(RenewalOutcome::Completed);
				}

				obs::emit_renewal(server.id(), RenewalOutcome::Completed);

				true
			},
			InboundMessage::RenewalFailed { resource_server, reason } => {
				let Some(server) = self.registry.get(&resource_server) else {
					obs::emit_ignored_message("renewal failure for an unknown resource server");

					return false;
				};

				self.settle_rejected(
					server.id(),
					None,
					reason.unwrap_or_else(|| "credential authority reported a failure".into()),
				);

				true
			},
		}
	}

	/// Parses and applies an authority frame; malformed frames are ignored.
	pub fn handle_text(&self, frame: &str) -> bool {
		InboundMessage::parse(frame).is_some_and(|message| self.handle_message(message))
	}

	/// Applies every frame from `stream` until the authority side closes.
	pub async fn listen(&self, mut stream: NotificationStream) {
		while let Some(frame) = stream.recv().await {
			self.handle_text(&frame);
		}
	}

	// Returns the caller's generation and deadline, and whether the caller started the renewal.
	fn enqueue(&self, server: &Arc<ResourceServer>, waiter: Waiter) -> (u64, Instant, bool) {
		let now = Instant::now();
		let mut states = self.states.lock();
		let state = states.entry(server.id().clone()).or_default();

		if let RenewalState::InFlight(flight) = &mut *state {
			if flight.deadline > now {
				flight.waiters.push(waiter);

				return (flight.generation, flight.deadline, false);
			}

			// Every waiter of this renewal gave up before the deadline fired.
			if let RenewalState::InFlight(stale) = mem::take(state) {
				let error = self.timeout_error(server.id());

				for waiter in stale.waiters {
					let _ = waiter.send(Err(error.clone()));
				}

				self.metrics.record_timed_out();
				obs::record_renewal_outcome(RenewalOutcome::TimedOut);
			}
		}

		let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
		let deadline = now + self.timeout.unsigned_abs();

		*state = RenewalState::InFlight(InFlightRenewal {
			generation,
			deadline,
			server: server.clone(),
			waiters: vec![waiter],
		});

		(generation, deadline, true)
	}

	fn in_flight_server(&self, id: &str) -> Option<Arc<ResourceServer>> {
		match self.states.lock().get(id) {
			Some(RenewalState::InFlight(flight)) => Some(flight.server.clone()),
			_ => None,
		}
	}

	// Resets `id` to idle and releases its waiters in FIFO order. When `generation` is given,
	// only that renewal is settled. Returns the number of waiters released, or `None` if no
	// matching renewal was in flight.
	fn settle(
		&self,
		id: &str,
		generation: Option<u64>,
		result: Result<(), RenewalError>,
	) -> Option<usize> {
		let waiters = {
			let mut states = self.states.lock();
			let state = states.get_mut(id)?;

			match &*state {
				RenewalState::InFlight(flight)
					if generation.is_none_or(|generation| generation == flight.generation) => {},
				_ => return None,
			}

			match mem::take(state) {
				RenewalState::InFlight(flight) => flight.waiters,
				RenewalState::Idle => return None,
			}
		};
		let released = waiters.len();

		for waiter in waiters {
			let _ = waiter.send(result.clone());
		}

		Some(released)
	}

	fn settle_rejected(&self, id: &ResourceServerId, generation: Option<u64>, reason: String) {
		let error = RenewalError::Rejected { resource_server: id.clone(), reason };

		if self.settle(id, generation, Err(error)).is_some() {
			self.metrics.record_rejected();
			obs::record_renewal_outcome(RenewalOutcome::Rejected);
			obs::emit_renewal(id, RenewalOutcome::Rejected);
		}
	}

	fn expire(&self, id: &ResourceServerId, generation: u64) {
		if self.settle(id, Some(generation), Err(self.timeout_error(id))).is_some() {
			self.metrics.record_timed_out();
			obs::record_renewal_outcome(RenewalOutcome::TimedOut);
			obs::emit_renewal(id, RenewalOutcome::TimedOut);
		}
	}

	fn timeout_error(&self, id: &ResourceServerId) -> RenewalError {
		RenewalError::Timeout { resource_server: id.clone(), timeout: self.timeout }
	}
}
impl Debug for RenewalCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RenewalCoordinator")
			.field("timeout", &self.timeout)
			.field("servers", &self.registry.len())
			.field("metrics", &self.metrics)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::channel::{self, AuthorityEndpoint, ChannelError, ChannelPair};

	const API: &str = "https://api.example.com";

	fn coordinator() -> (Arc<RenewalCoordinator>, AuthorityEndpoint, Arc<ResourceServer>) {
		let registry = Arc::new(
			ResourceServerRegistry::builder()
				.register(API, Some("tok1"))
				.build()
				.expect("Registry fixture should build."),
		);
		let ChannelPair { sink, authority, .. } = channel::pair();
		let coordinator = RenewalCoordinator::new(registry.clone(), Arc::new(sink))
			.with_timeout(Duration::seconds(5))
			.expect("Positive timeout should be accepted.");
		let server = registry.get(API).expect("Server should be registered.");

		(Arc::new(coordinator), authority, server)
	}

	fn id() -> ResourceServerId {
		ResourceServerId::new(API).expect("Fixture id should be valid.")
	}

	#[test]
	fn non_positive_timeouts_are_rejected() {
		let registry = Arc::new(ResourceServerRegistry::default());
		let ChannelPair { sink, .. } = channel::pair();
		let err = RenewalCoordinator::new(registry, Arc::new(sink))
			.with_timeout(Duration::ZERO)
			.expect_err("Zero timeout must be rejected.");

		assert!(matches!(err, ConfigError::NonPositiveTimeout));
	}

	#[tokio::test]
	async fn concurrent_triggers_post_a_single_request() {
		let (coordinator, mut authority, server) = coordinator();
		let complete = async {
			let request =
				authority.next_request().await.expect("Authority should receive a request.");

			// Let the remaining callers join before answering.
			tokio::task::yield_now().await;

			assert_eq!(coordinator.status(API), RenewalStatus::InFlight { waiters: 3 });
			assert!(coordinator.handle_message(InboundMessage::TokensUpdated {
				resource_server: request.resource_server().clone(),
				credential: "tok2".into(),
			}));
		};
		let (a, b, c, ()) = tokio::join!(
			coordinator.renew(&server),
			coordinator.renew(&server),
			coordinator.renew(&server),
			complete,
		);

		assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));
		assert!(authority.try_next_request().is_none(), "Exactly one request must be posted.");
		assert_eq!(server.credential().map(|s| s.expose().to_owned()), Some("tok2".into()));
		assert_eq!(coordinator.status(API), RenewalStatus::Idle);
		assert_eq!(coordinator.metrics().triggers(), 3);
		assert_eq!(coordinator.metrics().started(), 1);
		assert_eq!(coordinator.metrics().coalesced(), 2);
		assert_eq!(coordinator.metrics().completed(), 1);
	}

	#[tokio::test]
	async fn waiters_resume_in_the_order_they_joined() {
		let (coordinator, mut authority, server) = coordinator();
		let resumed = Arc::new(Mutex::new(Vec::new()));
		let mut handles = Vec::new();

		for idx in 0..5_usize {
			let task_coordinator = coordinator.clone();
			let server = server.clone();
			let resumed = resumed.clone();

			handles.push(tokio::spawn(async move {
				let result = task_coordinator.renew(&server).await;

				resumed.lock().push(idx);

				result
			}));

			while coordinator.status(API) != (RenewalStatus::InFlight { waiters: idx + 1 }) {
				tokio::task::yield_now().await;
			}
		}

		authority.next_request().await.expect("Authority should receive a request.");

		assert!(coordinator.handle_message(InboundMessage::TokensUpdated {
			resource_server: id(),
			credential: "tok2".into(),
		}));

		for handle in handles {
			assert_eq!(handle.await.expect("Waiter task should not panic."), Ok(()));
		}

		assert_eq!(*resumed.lock(), (0..5).collect::<Vec<_>>());
		assert!(authority.try_next_request().is_none());
	}

	#[tokio::test]
	async fn notifications_resolve_differently_spelled_servers() {
		let (coordinator, mut authority, server) = coordinator();
		let answer = async {
			authority.next_request().await.expect("Authority should receive a request.");
			assert!(coordinator.handle_text(
				r#"{"type":"tokensUpdated","resourceServer":"HTTPS://API.example.com:443","credential":"tok2"}"#,
			));
		};
		let (result, ()) = tokio::join!(coordinator.renew(&server), answer);

		assert_eq!(result, Ok(()));
		assert_eq!(coordinator.status(API), RenewalStatus::Idle);
		assert_eq!(server.credential().map(|s| s.expose().to_owned()), Some("tok2".into()));
	}

	#[tokio::test]
	async fn renewal_failure_rejects_every_waiter() {
		let (coordinator, mut authority, server) = coordinator();
		let fail = async {
			authority.next_request().await.expect("Authority should receive a request.");
			tokio::task::yield_now().await;
			assert!(coordinator.handle_text(
				r#"{"type":"renewalFailed","resourceServer":"https://api.example.com","reason":"consent revoked"}"#,
			));
		};
		let (a, b, ()) = tokio::join!(coordinator.renew(&server), coordinator.renew(&server), fail);
		let expected =
			RenewalError::Rejected { resource_server: id(), reason: "consent revoked".into() };

		assert_eq!(a, Err(expected.clone()));
		assert_eq!(b, Err(expected));
		assert_eq!(server.credential().map(|s| s.expose().to_owned()), Some("tok1".into()));
		assert_eq!(coordinator.metrics().rejected(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_resets_state_for_the_next_trigger() {
		let (coordinator, mut authority, server) = coordinator();
		let err = coordinator.renew(&server).await.expect_err("Unanswered renewal must time out.");

		assert_eq!(
			err,
			RenewalError::Timeout { resource_server: id(), timeout: Duration::seconds(5) }
		);
		assert_eq!(coordinator.status(API), RenewalStatus::Idle);
		assert_eq!(coordinator.metrics().timed_out(), 1);
		assert!(authority.try_next_request().is_some());

		let answer = async {
			authority.next_request().await.expect("A fresh renewal should be requested.");
			coordinator.handle_message(InboundMessage::TokensUpdated {
				resource_server: id(),
				credential: "tok3".into(),
			});
		};
		let (result, ()) = tokio::join!(coordinator.renew(&server), answer);

		assert_eq!(result, Ok(()));
		assert_eq!(coordinator.metrics().started(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_waiter_does_not_cancel_the_shared_renewal() {
		let (coordinator, mut authority, server) = coordinator();
		let abandoned = tokio::time::timeout(
			std::time::Duration::from_millis(10),
			coordinator.renew(&server),
		)
		.await;

		assert!(abandoned.is_err(), "Outer timeout should abandon the first waiter.");
		assert!(matches!(coordinator.status(API), RenewalStatus::InFlight { waiters: 0 }));

		let answer = async {
			tokio::task::yield_now().await;
			coordinator.handle_message(InboundMessage::TokensUpdated {
				resource_server: id(),
				credential: "tok2".into(),
			});
		};
		let (joined, ()) = tokio::join!(coordinator.renew(&server), answer);

		assert_eq!(joined, Ok(()));
		assert_eq!(coordinator.metrics().started(), 1, "Joining must not post a second request.");
		assert!(authority.try_next_request().is_some());
		assert!(authority.try_next_request().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn stale_renewal_is_replaced_after_its_deadline() {
		let (coordinator, mut authority, server) = coordinator();
		let abandoned = tokio::time::timeout(
			std::time::Duration::from_millis(10),
			coordinator.renew(&server),
		)
		.await;

		assert!(abandoned.is_err());

		tokio::time::advance(std::time::Duration::from_secs(6)).await;

		let answer = async {
			tokio::task::yield_now().await;
			coordinator.handle_message(InboundMessage::TokensUpdated {
				resource_server: id(),
				credential: "tok2".into(),
			});
		};
		let (result, ()) = tokio::join!(coordinator.renew(&server), answer);

		assert_eq!(result, Ok(()));
		assert_eq!(coordinator.metrics().started(), 2);
		assert_eq!(coordinator.metrics().timed_out(), 1);
		assert!(authority.try_next_request().is_some());
		assert!(authority.try_next_request().is_some());
	}

	#[tokio::test]
	async fn closed_channel_rejects_immediately() {
		let (coordinator, authority, server) = coordinator();

		drop(authority);

		let err = coordinator.renew(&server).await.expect_err("Closed channel must reject.");

		assert_eq!(
			err,
			RenewalError::Rejected {
				resource_server: id(),
				reason: ChannelError::Closed.to_string(),
			}
		);
		assert_eq!(coordinator.status(API), RenewalStatus::Idle);
	}

	#[test]
	fn unsolicited_updates_install_credentials() {
		let (coordinator, _authority, server) = coordinator();

		assert!(coordinator.handle_text(
			r#"{"type":"tokensUpdated","resourceServer":"https://api.example.com","credential":"pushed"}"#,
		));
		assert_eq!(server.credential().map(|s| s.expose().to_owned()), Some("pushed".into()));
		assert_eq!(coordinator.metrics().completed(), 0);
	}

	#[test]
	fn unknown_servers_and_malformed_frames_are_ignored() {
		let (coordinator, _authority, server) = coordinator();

		assert!(!coordinator.handle_text("{"));
		assert!(!coordinator.handle_text(
			r#"{"type":"tokensUpdated","resourceServer":"https://other.example.com","credential":"x"}"#,
		));
		assert!(!coordinator.handle_text(
			r#"{"type":"renewalFailed","resourceServer":"https://other.example.com"}"#,
		));
		assert_eq!(server.credential().map(|s| s.expose().to_owned()), Some("tok1".into()));
	}
}
