use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    db::MatchStore,
    error::AppResult,
    models::{ItemId, MatchEvent, RoomId, SharedItem, UserId, UserSummary},
    realtime::PresenceDirectory,
    services::catalog::CatalogProvider,
};

/// A committed state change that connected users should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A request that did not complete a match; only the target is told
    RequestReceived {
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    },
    /// A room now exists for the pair; both are told
    MutualMatch {
        user_a: UserId,
        user_b: UserId,
        item_id: ItemId,
        room_id: RoomId,
        matched_at: DateTime<Utc>,
    },
}

impl Dispatch {
    fn kind(&self) -> &'static str {
        match self {
            Dispatch::RequestReceived { .. } => "match_request_received",
            Dispatch::MutualMatch { .. } => "mutual_match",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No live session; the event is dropped
    Offline,
}

/// Pushes one event to the user's live session, if any
pub async fn notify_user(
    presence: &dyn PresenceDirectory,
    user_id: UserId,
    event: MatchEvent,
) -> AppResult<DeliveryOutcome> {
    match presence.try_get_session(user_id).await {
        Some(session) => {
            session.try_send(event)?;
            Ok(DeliveryOutcome::Delivered)
        }
        None => Ok(DeliveryOutcome::Offline),
    }
}

/// Everything the dispatch worker needs to turn a [`Dispatch`] into payloads
#[derive(Clone)]
pub struct DispatchContext {
    pub store: Arc<dyn MatchStore>,
    pub catalog: Arc<dyn CatalogProvider>,
    pub presence: Arc<dyn PresenceDirectory>,
    /// Bound on resolving and delivering a single dispatch
    pub timeout: Duration,
}

impl DispatchContext {
    /// Number of recipients the event reached
    async fn deliver(&self, dispatch: &Dispatch) -> usize {
        match dispatch {
            Dispatch::RequestReceived {
                requestor_id,
                target_user_id,
                item_id,
            } => {
                let (from_user, _) = self.summaries(*requestor_id, *target_user_id).await;
                let item = self.shared_item(*item_id).await;
                let event = MatchEvent::MatchRequestReceived { from_user, item };
                self.push(*target_user_id, event).await
            }
            Dispatch::MutualMatch {
                user_a,
                user_b,
                item_id,
                room_id,
                matched_at,
            } => {
                let (summary_a, summary_b) = self.summaries(*user_a, *user_b).await;
                let item = self.shared_item(*item_id).await;

                let to_a = MatchEvent::MutualMatch {
                    with_user: summary_b,
                    item: item.clone(),
                    room_id: *room_id,
                    matched_at: *matched_at,
                };
                let to_b = MatchEvent::MutualMatch {
                    with_user: summary_a,
                    item,
                    room_id: *room_id,
                    matched_at: *matched_at,
                };

                // Each side is pushed on its own; one dead session never costs the other
                let (delivered_a, delivered_b) =
                    tokio::join!(self.push(*user_a, to_a), self.push(*user_b, to_b));
                delivered_a + delivered_b
            }
        }
    }

    async fn push(&self, user_id: UserId, event: MatchEvent) -> usize {
        let kind = event.kind();
        match notify_user(self.presence.as_ref(), user_id, event).await {
            Ok(DeliveryOutcome::Delivered) => 1,
            Ok(DeliveryOutcome::Offline) => {
                tracing::debug!(user_id = %user_id, event = kind, "Recipient offline, event dropped");
                0
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, event = kind, error = %e, "Push to session failed");
                0
            }
        }
    }

    /// Display names degrade to `None` when the store read fails
    async fn summaries(&self, a: UserId, b: UserId) -> (UserSummary, UserSummary) {
        let mut names = match self.store.display_names(&[a, b]).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Display name lookup failed");
                Default::default()
            }
        };

        (
            UserSummary {
                id: a,
                display_name: names.remove(&a),
            },
            UserSummary {
                id: b,
                display_name: names.remove(&b),
            },
        )
    }

    async fn shared_item(&self, item_id: ItemId) -> SharedItem {
        let title = match self.catalog.get_item_details(&[item_id]).await {
            Ok(details) => details.into_iter().find(|d| d.id == item_id).map(|d| d.title),
            Err(e) => {
                tracing::warn!(error = %e, item_id, catalog = self.catalog.name(), "Item title lookup failed");
                None
            }
        };

        SharedItem { id: item_id, title }
    }
}

/// Fire-and-forget handoff to the dispatch worker
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Dispatch>,
}

/// Handle for draining and stopping the dispatch worker
pub struct NotifierHandle {
    shutdown_tx: mpsc::Sender<()>,
    worker: JoinHandle<()>,
}

impl NotifierHandle {
    /// Delivers everything already queued, then stops the worker
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Notification worker ended abnormally");
        }
    }
}

impl Notifier {
    /// Spawns the dispatch worker
    pub fn spawn(ctx: DispatchContext) -> (Self, NotifierHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = tokio::spawn(Self::dispatch_worker(ctx, rx, shutdown_rx));

        (Self { tx }, NotifierHandle { shutdown_tx, worker })
    }

    /// Queues a dispatch; never waits on delivery and never fails the caller
    pub fn notify(&self, dispatch: Dispatch) {
        let kind = dispatch.kind();
        if let Err(e) = self.tx.send(dispatch) {
            tracing::error!(error = %e, event = kind, "Notification queue closed, event dropped");
        }
    }

    async fn dispatch_worker(
        ctx: DispatchContext,
        mut rx: mpsc::UnboundedReceiver<Dispatch>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Notification worker started");

        loop {
            tokio::select! {
                Some(dispatch) = rx.recv() => {
                    Self::run_one(&ctx, dispatch).await;
                }
                _ = shutdown_rx.recv() => {
                    rx.close();
                    while let Some(dispatch) = rx.recv().await {
                        Self::run_one(&ctx, dispatch).await;
                    }
                    tracing::info!("Notification worker stopped");
                    break;
                }
            }
        }
    }

    async fn run_one(ctx: &DispatchContext, dispatch: Dispatch) {
        let kind = dispatch.kind();
        match tokio::time::timeout(ctx.timeout, ctx.deliver(&dispatch)).await {
            Ok(delivered) => {
                tracing::info!(event = kind, delivered, "Notification dispatched");
            }
            Err(_) => {
                tracing::warn!(
                    event = kind,
                    timeout_ms = ctx.timeout.as_millis() as u64,
                    "Notification delivery timed out"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::ItemDetails;
    use crate::realtime::{ConnectionHub, SessionHandle, SESSION_BUFFER};
    use crate::services::catalog::{MockCatalogProvider, StoreCatalog};
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(1);

    async fn setup() -> (Arc<MemoryStore>, Arc<ConnectionHub>, Notifier, NotifierHandle) {
        setup_with_timeout(Duration::from_millis(200)).await
    }

    async fn setup_with_timeout(
        timeout: Duration,
    ) -> (Arc<MemoryStore>, Arc<ConnectionHub>, Notifier, NotifierHandle) {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_item(&ItemDetails {
                id: 550,
                title: "Fight Club".to_string(),
                image_ref: None,
                year: Some(1999),
            })
            .await
            .unwrap();
        let hub = Arc::new(ConnectionHub::new());
        let (notifier, handle) = Notifier::spawn(DispatchContext {
            store: store.clone(),
            catalog: Arc::new(StoreCatalog::new(store.clone())),
            presence: hub.clone(),
            timeout,
        });
        (store, hub, notifier, handle)
    }

    #[tokio::test]
    async fn test_request_received_goes_to_target_only() {
        let (store, hub, notifier, _handle) = setup().await;
        let (requestor, target) = (Uuid::new_v4(), Uuid::new_v4());
        store.add_user(requestor, "Ana");
        let (_r, mut requestor_rx) = hub.connect(requestor).await;
        let (_t, mut target_rx) = hub.connect(target).await;

        notifier.notify(Dispatch::RequestReceived {
            requestor_id: requestor,
            target_user_id: target,
            item_id: 550,
        });

        let event = tokio::time::timeout(WAIT, target_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            MatchEvent::MatchRequestReceived { from_user, item } => {
                assert_eq!(from_user.id, requestor);
                assert_eq!(from_user.display_name.as_deref(), Some("Ana"));
                assert_eq!(item.title.as_deref(), Some("Fight Club"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(requestor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mutual_match_reaches_both_with_room() {
        let (_store, hub, notifier, _handle) = setup().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_ha, mut rx_a) = hub.connect(a).await;
        let (_hb, mut rx_b) = hub.connect(b).await;
        let room_id = Uuid::new_v4();

        notifier.notify(Dispatch::MutualMatch {
            user_a: a,
            user_b: b,
            item_id: 550,
            room_id,
            matched_at: Utc::now(),
        });

        for (rx, peer) in [(&mut rx_a, b), (&mut rx_b, a)] {
            let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            match event {
                MatchEvent::MutualMatch {
                    with_user,
                    room_id: got,
                    ..
                } => {
                    assert_eq!(with_user.id, peer);
                    assert_eq!(got, room_id);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    fn mutual_match(a: UserId, b: UserId) -> Dispatch {
        Dispatch::MutualMatch {
            user_a: a,
            user_b: b,
            item_id: 550,
            room_id: Uuid::new_v4(),
            matched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dead_session_does_not_cost_peer_its_event() {
        let (_store, hub, notifier, _handle) = setup().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        // a's connection went away before its disconnect ran
        let (_ha, rx_a) = hub.connect(a).await;
        drop(rx_a);
        let (_hb, mut rx_b) = hub.connect(b).await;

        notifier.notify(mutual_match(a, b));

        match tokio::time::timeout(WAIT, rx_b.recv()).await.unwrap().unwrap() {
            MatchEvent::MutualMatch { with_user, .. } => assert_eq!(with_user.id, a),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_session_does_not_stall_later_dispatches() {
        // A delivery bound far longer than the wait below
        let (_store, hub, notifier, _handle) = setup_with_timeout(Duration::from_secs(30)).await;
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (session_a, _rx_a) = hub.connect(a).await;
        for _ in 0..SESSION_BUFFER {
            session_a
                .try_send(MatchEvent::MatchRequestReceived {
                    from_user: UserSummary {
                        id: c,
                        display_name: None,
                    },
                    item: SharedItem { id: 550, title: None },
                })
                .unwrap();
        }
        let (_hb, mut rx_b) = hub.connect(b).await;
        let (_hc, mut rx_c) = hub.connect(c).await;

        notifier.notify(mutual_match(a, b));
        notifier.notify(Dispatch::RequestReceived {
            requestor_id: a,
            target_user_id: c,
            item_id: 550,
        });

        let quick = Duration::from_millis(500);
        assert_eq!(
            tokio::time::timeout(quick, rx_b.recv()).await.unwrap().unwrap().kind(),
            "mutual_match"
        );
        assert_eq!(
            tokio::time::timeout(quick, rx_c.recv()).await.unwrap().unwrap().kind(),
            "match_request_received"
        );
    }

    #[tokio::test]
    async fn test_offline_recipient_is_dropped_silently() {
        let hub = ConnectionHub::new();
        let event = MatchEvent::MatchRequestReceived {
            from_user: UserSummary {
                id: Uuid::new_v4(),
                display_name: None,
            },
            item: SharedItem { id: 550, title: None },
        };
        let outcome = notify_user(&hub, Uuid::new_v4(), event).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Offline);
    }

    #[tokio::test]
    async fn test_catalog_failure_degrades_to_untitled_item() {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(ConnectionHub::new());
        let mut catalog = MockCatalogProvider::new();
        catalog
            .expect_get_item_details()
            .returning(|_| Err(crate::error::AppError::ExternalApi("down".to_string())));
        catalog.expect_name().return_const("mock");

        let (notifier, _handle) = Notifier::spawn(DispatchContext {
            store,
            catalog: Arc::new(catalog),
            presence: hub.clone(),
            timeout: Duration::from_millis(200),
        });
        let target = Uuid::new_v4();
        let (_t, mut rx) = hub.connect(target).await;

        notifier.notify(Dispatch::RequestReceived {
            requestor_id: Uuid::new_v4(),
            target_user_id: target,
            item_id: 27205,
        });

        match tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
            MatchEvent::MatchRequestReceived { item, .. } => {
                assert_eq!(item.id, 27205);
                assert!(item.title.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Presence directory whose lookups never complete
    struct StuckPresence;

    #[async_trait::async_trait]
    impl PresenceDirectory for StuckPresence {
        async fn try_get_session(&self, _user_id: UserId) -> Option<SessionHandle> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stuck_transport_times_out_and_worker_moves_on() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, handle) = Notifier::spawn(DispatchContext {
            store: store.clone(),
            catalog: Arc::new(StoreCatalog::new(store)),
            presence: Arc::new(StuckPresence),
            timeout: Duration::from_millis(20),
        });

        for _ in 0..3 {
            notifier.notify(Dispatch::RequestReceived {
                requestor_id: Uuid::new_v4(),
                target_user_id: Uuid::new_v4(),
                item_id: 550,
            });
        }

        // Three timed-out deliveries drain well inside the bound
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("worker should drain despite a stuck transport");
    }
}
