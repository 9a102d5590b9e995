use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use janus_auth::{Authenticator, ConnectionSession, ConnectionSessionRegistry};
use janus_db::Database;
use janus_types::events::{GatewayCommand, GatewayEvent};
use janus_types::models::{Delta, Principal};
use janus_types::{JanusError, JanusResult};

use crate::counter::EventCounter;
use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Upper bound on one storage round trip from the realtime path.
    pub storage_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(2),
        }
    }
}

/// Turns `Join` and `Update` commands from a connection into session
/// bindings, counter writes and group broadcasts.
///
/// Cheap to clone. Commands from one connection must be handled one at a time
/// and in arrival order; different connections may run concurrently.
#[derive(Clone)]
pub struct RealtimeFlow {
    inner: Arc<FlowInner>,
}

struct FlowInner {
    auth: Arc<Authenticator>,
    db: Arc<Database>,
    sessions: ConnectionSessionRegistry,
    counter: EventCounter,
    dispatcher: Dispatcher,
    config: FlowConfig,
}

impl RealtimeFlow {
    pub fn new(
        auth: Arc<Authenticator>,
        db: Arc<Database>,
        sessions: ConnectionSessionRegistry,
        dispatcher: Dispatcher,
        config: FlowConfig,
    ) -> Self {
        Self {
            inner: Arc::new(FlowInner {
                auth,
                counter: EventCounter::new(db.clone()),
                db,
                sessions,
                dispatcher,
                config,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn counter(&self) -> &EventCounter {
        &self.inner.counter
    }

    pub async fn handle_command(&self, conn_id: Uuid, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Join { token } => self.join(conn_id, &token).await,
            GatewayCommand::Update { delta } => self.update(conn_id, delta).await,
        }
    }

    /// Bind the connection to the participant behind `token` and subscribe it
    /// to the event's group. Replies `Joined` with the current total, or a bare
    /// `JoinFailed` without subscribing.
    pub async fn join(&self, conn_id: Uuid, token: &str) {
        let reply = match self.try_join(conn_id, token).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%conn_id, "Join rejected: {}", e);
                GatewayEvent::JoinFailed
            }
        };
        self.inner.dispatcher.send_to(conn_id, reply).await;
    }

    /// Apply `delta` for the participant this connection joined as and fan
    /// the new total out to the event's group. Failures reach the sender only.
    pub async fn update(&self, conn_id: Uuid, delta: i64) {
        if let Err(e) = self.try_update(conn_id, delta).await {
            if e.is_caller_error() {
                debug!(%conn_id, "Update refused: {}", e);
            } else {
                warn!(%conn_id, "Update failed: {}", e);
            }
            self.inner
                .dispatcher
                .send_to(conn_id, GatewayEvent::UpdateFailed)
                .await;
        }
    }

    /// Forget everything tied to a closed connection.
    pub async fn disconnect(&self, conn_id: Uuid) {
        self.inner.sessions.unbind(conn_id);
        self.inner.dispatcher.unregister_connection(conn_id).await;
    }

    async fn try_join(&self, conn_id: Uuid, token: &str) -> JanusResult<GatewayEvent> {
        let inner = self.inner.clone();
        let token = token.to_string();
        let (participant, event, total) = self
            .blocking(move || {
                let participant = match inner.auth.resolve(&token)? {
                    Principal::Participant(participant) => participant,
                    Principal::Owner(_) => return Err(JanusError::TokenNotFoundOrExpired),
                };
                let event = inner
                    .db
                    .get_event(participant.event_id)?
                    .ok_or(JanusError::EventNotFound)?;
                let total = inner.counter.compute_total(&event)?;
                Ok((participant, event, total))
            })
            .await?;

        self.inner.sessions.bind(
            conn_id,
            ConnectionSession {
                participant_username: participant.username.clone(),
                participant_id: participant.id,
                event_key: event.key.clone(),
                event_id: event.id,
            },
        );
        self.inner.dispatcher.join_group(conn_id, &event.key).await;

        info!(%conn_id, event = %event.key, participant = %participant.username, "Joined");
        Ok(GatewayEvent::Joined {
            event_key: event.key,
            event_name: event.name,
            username: participant.username,
            total,
            max_value: event.max_value,
        })
    }

    async fn try_update(&self, conn_id: Uuid, delta: i64) -> JanusResult<()> {
        let session = self
            .inner
            .sessions
            .lookup(conn_id)
            .ok_or(JanusError::TokenNotFoundOrExpired)?;
        let delta = Delta::try_from(delta)?;

        // The deadline is checked inside the transaction, right before
        // commit; a reported failure never leaves a committed update behind.
        let now = Utc::now();
        let deadline = Instant::now() + self.inner.config.storage_timeout;
        let inner = self.inner.clone();
        let (event_id, participant_id) = (session.event_id, session.participant_id);
        let total = tokio::task::spawn_blocking(move || {
            inner
                .counter
                .apply_update_before(event_id, participant_id, delta.value(), now, deadline)
        })
        .await
        .map_err(|e| {
            JanusError::StorageCommitFailure(anyhow::anyhow!("storage task failed: {}", e))
        })??;

        // Committed; only now may anyone hear about it.
        self.inner
            .dispatcher
            .emit(
                &session.event_key,
                GatewayEvent::Update {
                    timestamp: now,
                    username: session.participant_username,
                    total,
                    delta: delta.value(),
                },
            )
            .await;
        Ok(())
    }

    /// Run a read-only storage call off the async workers, bounded by the
    /// configured timeout. A timeout is reported as a storage failure; the
    /// abandoned call may still finish in the background, so writes must not
    /// go through here.
    async fn blocking<F, T>(&self, f: F) -> JanusResult<T>
    where
        F: FnOnce() -> JanusResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.inner.config.storage_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(JanusError::StorageCommitFailure(anyhow::anyhow!(
                "storage task failed: {}",
                e
            ))),
            Err(_) => Err(JanusError::StorageCommitFailure(anyhow::anyhow!(
                "storage call timed out after {:?}",
                timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use janus_auth::{AuthConfig, CredentialHasher, TokenStore, TokenStoreConfig};
    use janus_db::queries::NewEvent;
    use janus_types::models::{Event, EventWindow, PrincipalId};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct PlainHasher;

    impl CredentialHasher for PlainHasher {
        fn hash(&self, password: &str) -> anyhow::Result<String> {
            Ok(password.to_string())
        }

        fn verify(&self, password: &str, stored_hash: &str) -> bool {
            password == stored_hash
        }
    }

    struct Fixture {
        db: Arc<Database>,
        tokens: TokenStore,
        flow: RealtimeFlow,
        owner_id: i64,
    }

    fn fixture() -> Fixture {
        fixture_with(FlowConfig::default())
    }

    fn fixture_with(config: FlowConfig) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = db.create_owner("olivia", "pw").unwrap();
        let tokens = TokenStore::new(TokenStoreConfig::default());
        let auth = Arc::new(Authenticator::new(
            db.clone(),
            tokens.clone(),
            Arc::new(PlainHasher),
            AuthConfig::default(),
        ));
        let flow = RealtimeFlow::new(
            auth,
            db.clone(),
            ConnectionSessionRegistry::default(),
            Dispatcher::new(),
            config,
        );
        Fixture {
            db,
            tokens,
            flow,
            owner_id: owner.id,
        }
    }

    impl Fixture {
        fn event(&self, is_premium: bool, window: Option<EventWindow>) -> Event {
            self.db
                .create_event(
                    &NewEvent {
                        owner_id: self.owner_id,
                        name: "Clicker".into(),
                        window,
                        max_value: -1,
                        is_premium,
                    },
                    &mut |len: usize| "e".repeat(len),
                )
                .unwrap()
        }

        fn participant_token(&self, event: &Event, username: &str) -> String {
            let participant = self.db.create_participant(event.id, username, "pw").unwrap();
            self.tokens
                .issue(PrincipalId::participant(participant.id))
                .unwrap()
        }

        async fn connect(&self) -> (Uuid, UnboundedReceiver<GatewayEvent>) {
            self.flow.dispatcher().register_connection().await
        }
    }

    fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn totals(events: &[GatewayEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::Update { total, .. } => Some(*total),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn two_participants_converge_on_the_same_total() {
        let f = fixture();
        let event = f.event(false, None);
        let token_a = f.participant_token(&event, "alice");
        let token_b = f.participant_token(&event, "bob");
        let (a, mut rx_a) = f.connect().await;
        let (b, mut rx_b) = f.connect().await;

        f.flow.join(a, &token_a).await;
        f.flow.join(b, &token_b).await;
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [GatewayEvent::Joined { total: 0, username, .. }] if username == "alice"
        ));
        drain(&mut rx_b);

        f.flow.update(a, 1).await;
        f.flow.update(b, 1).await;
        f.flow.update(a, -1).await;

        let seen_a = drain(&mut rx_a);
        let seen_b = drain(&mut rx_b);
        assert_eq!(totals(&seen_a), vec![1, 2, 1]);
        assert_eq!(totals(&seen_b), vec![1, 2, 1]);
        assert!(matches!(
            &seen_b[1],
            GatewayEvent::Update { username, delta: 1, .. } if username == "bob"
        ));

        assert_eq!(f.flow.counter().compute_total(&event).unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_token_fails_join_without_subscribing() {
        let f = fixture();
        let event = f.event(false, None);
        let (a, mut rx_a) = f.connect().await;

        f.flow.join(a, "not-a-token").await;
        assert_eq!(drain(&mut rx_a), vec![GatewayEvent::JoinFailed]);
        assert_eq!(f.flow.dispatcher().group_size(&event.key).await, 0);

        // An owner token is not a participant token.
        let owner_token = f.tokens.issue(PrincipalId::owner(f.owner_id)).unwrap();
        f.flow.join(a, &owner_token).await;
        assert_eq!(drain(&mut rx_a), vec![GatewayEvent::JoinFailed]);
    }

    #[tokio::test]
    async fn join_fails_once_participant_is_gone() {
        let f = fixture();
        let event = f.event(false, None);
        let token = f.participant_token(&event, "alice");
        f.db.delete_event(event.id).unwrap();

        let (a, mut rx_a) = f.connect().await;
        f.flow.join(a, &token).await;
        assert_eq!(drain(&mut rx_a), vec![GatewayEvent::JoinFailed]);
    }

    #[tokio::test]
    async fn update_before_join_fails_for_sender_only() {
        let f = fixture();
        let event = f.event(false, None);
        let token = f.participant_token(&event, "alice");
        let (joined, mut rx_joined) = f.connect().await;
        let (stranger, mut rx_stranger) = f.connect().await;
        f.flow.join(joined, &token).await;
        drain(&mut rx_joined);

        f.flow.update(stranger, 1).await;

        assert_eq!(drain(&mut rx_stranger), vec![GatewayEvent::UpdateFailed]);
        assert!(drain(&mut rx_joined).is_empty());
        assert_eq!(f.flow.counter().compute_total(&event).unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_delta_is_not_broadcast() {
        let f = fixture();
        let event = f.event(false, None);
        let token = f.participant_token(&event, "alice");
        let (a, mut rx_a) = f.connect().await;
        f.flow.join(a, &token).await;
        drain(&mut rx_a);

        f.flow.update(a, 5).await;
        assert_eq!(drain(&mut rx_a), vec![GatewayEvent::UpdateFailed]);
        assert_eq!(f.flow.counter().compute_total(&event).unwrap(), 0);
    }

    #[tokio::test]
    async fn finished_premium_event_rejects_updates() {
        let f = fixture();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let window = EventWindow::new(start, start + ChronoDuration::seconds(3600)).unwrap();
        let event = f.event(true, Some(window));
        let token = f.participant_token(&event, "alice");
        let (a, mut rx_a) = f.connect().await;

        // Joining a finished event still works; it just cannot be counted.
        f.flow.join(a, &token).await;
        assert!(matches!(drain(&mut rx_a).as_slice(), [GatewayEvent::Joined { .. }]));

        f.flow.update(a, 1).await;
        assert_eq!(drain(&mut rx_a), vec![GatewayEvent::UpdateFailed]);
        assert!(f.flow.counter().ledger(&event).unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_stuck_past_storage_timeout_is_not_committed() {
        let f = fixture_with(FlowConfig {
            storage_timeout: Duration::from_millis(100),
        });
        let event = f.event(false, None);
        let token_a = f.participant_token(&event, "alice");
        let token_b = f.participant_token(&event, "bob");
        let (a, mut rx_a) = f.connect().await;
        let (b, mut rx_b) = f.connect().await;
        f.flow.join(a, &token_a).await;
        f.flow.join(b, &token_b).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        // Hold the database for well past the timeout.
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let db = f.db.clone();
        let holder = std::thread::spawn(move || {
            db.with_conn(|_| {
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(400));
                Ok(())
            })
            .unwrap();
        });
        locked_rx.recv().unwrap();

        f.flow.update(a, 1).await;
        holder.join().unwrap();

        assert_eq!(drain(&mut rx_a), vec![GatewayEvent::UpdateFailed]);
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(f.flow.counter().compute_total(&event).unwrap(), 0);

        // Storage is responsive again; the next update counts from zero.
        f.flow.update(a, 1).await;
        assert_eq!(totals(&drain(&mut rx_b)), vec![1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connections_lose_no_updates() {
        let f = fixture();
        let event = f.event(false, None);
        let (watcher, mut rx_watcher) = f.connect().await;
        let watcher_token = f.participant_token(&event, "watcher");
        f.flow.join(watcher, &watcher_token).await;
        drain(&mut rx_watcher);

        let mut handles = Vec::new();
        for i in 0..50 {
            let token = f.participant_token(&event, &format!("p{i}"));
            let (conn, rx) = f.connect().await;
            let flow = f.flow.clone();
            handles.push(tokio::spawn(async move {
                flow.join(conn, &token).await;
                flow.update(conn, 1).await;
                rx
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(f.flow.counter().compute_total(&event).unwrap(), 50);
        let mut seen = totals(&drain(&mut rx_watcher));
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn disconnect_stops_delivery() {
        let f = fixture();
        let event = f.event(false, None);
        let token_a = f.participant_token(&event, "alice");
        let token_b = f.participant_token(&event, "bob");
        let (a, _rx_a) = f.connect().await;
        let (b, mut rx_b) = f.connect().await;
        f.flow.join(a, &token_a).await;
        f.flow.join(b, &token_b).await;

        f.flow.disconnect(a).await;
        assert_eq!(f.flow.dispatcher().group_size(&event.key).await, 1);

        drain(&mut rx_b);
        f.flow.update(a, 1).await;
        assert!(drain(&mut rx_b).is_empty());
    }
}
