//! Open-request scenarios against a simulated host UI, mostly under a paused
//! clock.

use super::*;
use crate::location_store::MemoryLocationStore;
use crate::sim::{PrimaryPlan, RecordingFactory, RecordingSurface, SimulatedHost, SurfaceFactory};
use crate::state_machine::SessionState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

struct Fixture {
    session: SessionManager,
    host: Arc<SimulatedHost>,
    factory: Arc<RecordingFactory>,
    store: Arc<MemoryLocationStore>,
    statuses: broadcast::Receiver<StatusEvent>,
}

impl Fixture {
    fn new(plans: Vec<PrimaryPlan>) -> Self {
        Self::with_config(plans, &ReaderConfig::default())
    }

    fn with_config(plans: Vec<PrimaryPlan>, config: &ReaderConfig) -> Self {
        let factory = RecordingFactory::new();
        let host = SimulatedHost::new(factory.clone(), plans);
        let store = Arc::new(MemoryLocationStore::new());
        let session = SessionManager::new(
            host.clone(),
            store.clone(),
            config,
            Arc::new(StructuredLogger::disabled()),
        );
        let hook = session.clone();
        host.on_resolve(move |surface| hook.register_primary(surface));
        let statuses = session.subscribe_status();
        Self {
            session,
            host,
            factory,
            store,
            statuses,
        }
    }

    fn primary(&self) -> Arc<RecordingSurface> {
        self.factory
            .get(SurfaceId::Primary)
            .expect("primary surface should exist")
    }

    fn secondary(&self, id: SurfaceId) -> Arc<RecordingSurface> {
        self.factory.get(id).expect("secondary surface should exist")
    }

    /// Status events received so far.
    fn drain(&mut self) -> Vec<(u64, RequestStatus)> {
        let mut events = Vec::new();
        while let Ok(event) = self.statuses.try_recv() {
            events.push((event.generation, event.status));
        }
        events
    }

    fn statuses(&mut self) -> Vec<RequestStatus> {
        self.drain().into_iter().map(|(_, status)| status).collect()
    }
}

fn doc(identity: &str) -> DocumentRef {
    DocumentRef::new(identity, format!("{}.epub", identity), b"PK\x03\x04".to_vec())
}

fn load_of(identity: &str, initial_position: Option<&str>) -> HostMessage {
    HostMessage::LoadDocument {
        identity: identity.to_string(),
        display_name: format!("{}.epub", identity),
        payload: b"PK\x03\x04".to_vec(),
        initial_position: initial_position.map(str::to_string),
    }
}

fn quick_config(reveal_attempts: u32, migration_attempts: u32) -> ReaderConfig {
    ReaderConfig {
        reveal: RetryPolicy::new(Duration::from_millis(1), reveal_attempts),
        migration: RetryPolicy::new(Duration::from_millis(1), migration_attempts),
        ..ReaderConfig::default()
    }
}

/// A primary surface that reads as disposed for its first `hidden_for`
/// liveness checks, then comes alive.
struct LateSurface {
    inner: Arc<RecordingSurface>,
    checks: AtomicUsize,
    hidden_for: usize,
}

impl LateSurface {
    fn new(hidden_for: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RecordingSurface::new(SurfaceId::Primary),
            checks: AtomicUsize::new(0),
            hidden_for,
        })
    }
}

impl Surface for LateSurface {
    fn id(&self) -> SurfaceId {
        self.inner.id()
    }

    fn show(&self) -> anyhow::Result<()> {
        self.inner.show()
    }

    fn post(&self, message: HostMessage) -> anyhow::Result<()> {
        self.inner.post(message)
    }

    fn dispose(&self) {
        self.inner.dispose()
    }

    fn is_disposed(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst) < self.hidden_for || self.inner.is_disposed()
    }
}

fn fallback_id(outcome: OpenOutcome) -> SurfaceId {
    match outcome {
        OpenOutcome::Fallback(id) => id,
        other => panic!("expected a fallback, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_primary_ready_at_third_attempt_delivers_without_position() {
    let mut fx = Fixture::new(vec![PrimaryPlan::After(Duration::from_millis(150))]);
    let start = Instant::now();

    let outcome = fx.session.open(doc("doc:A")).await;

    assert_eq!(outcome, OpenOutcome::Delivered);
    assert_eq!(start.elapsed(), Duration::from_millis(200));
    assert_eq!(
        fx.primary().posted(),
        vec![
            load_of("doc:A", None),
            HostMessage::Status {
                value: OpenStatus::Ready
            },
        ]
    );
    assert!(fx.factory.secondaries().is_empty());
    assert_eq!(
        fx.statuses(),
        vec![RequestStatus::Opening, RequestStatus::Ready]
    );
    assert_eq!(fx.session.snapshot().state, SessionState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_existing_primary_gets_status_and_document() {
    let mut fx = Fixture::new(vec![]);
    let primary = fx.factory.create(SurfaceId::Primary);
    fx.session.register_primary(primary);

    let outcome = fx.session.open(doc("doc:A")).await;

    assert_eq!(outcome, OpenOutcome::Delivered);
    assert_eq!(fx.host.activations(), 0);
    assert_eq!(
        fx.primary().posted(),
        vec![
            HostMessage::Status {
                value: OpenStatus::Opening
            },
            load_of("doc:A", None),
            HostMessage::Status {
                value: OpenStatus::Ready
            },
        ]
    );
    assert_eq!(fx.primary().show_count(), 1);
    assert_eq!(
        fx.statuses(),
        vec![RequestStatus::Opening, RequestStatus::Ready]
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_open_while_in_flight_is_a_no_op() {
    let mut fx = Fixture::new(vec![PrimaryPlan::After(Duration::from_millis(500))]);

    let first = {
        let session = fx.session.clone();
        tokio::spawn(async move { session.open(doc("doc:1")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(fx.session.snapshot().in_flight());

    assert_eq!(fx.session.open(doc("doc:2")).await, OpenOutcome::Rejected);
    assert_eq!(fx.session.open(doc("doc:1")).await, OpenOutcome::Rejected);

    assert_eq!(first.await.unwrap(), OpenOutcome::Delivered);
    assert_eq!(fx.primary().loads(), vec![load_of("doc:1", None)]);
    assert_eq!(fx.host.activations(), 1);
    assert_eq!(
        fx.drain(),
        vec![(1, RequestStatus::Opening), (1, RequestStatus::Ready)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_takes_exactly_the_reveal_budget() {
    let mut fx = Fixture::new(vec![PrimaryPlan::Never]);
    let start = Instant::now();

    let id = fallback_id(fx.session.open(doc("doc:B")).await);

    // 100 attempts, 99 sleeps of 100ms.
    assert_eq!(start.elapsed(), Duration::from_millis(9_900));
    assert_eq!(fx.host.activations(), 1);
    assert!(fx.factory.get(SurfaceId::Primary).is_none());
    assert_eq!(fx.secondary(id).loads(), vec![load_of("doc:B", None)]);
    assert_eq!(fx.host.secondary_titles(), vec!["EPUB: doc:B.epub".to_string()]);
    assert_eq!(fx.session.pending_identity().as_deref(), Some("doc:B"));
    assert!(!fx.session.snapshot().in_flight());

    // Ready waits for the fallback to resolve.
    assert_eq!(fx.statuses(), vec![RequestStatus::Opening]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_with_stored_position_then_migration() {
    let mut fx = Fixture::new(vec![
        PrimaryPlan::Never,
        PrimaryPlan::After(Duration::from_secs(1)),
    ]);
    fx.store.put("doc:B", "loc-42").unwrap();

    let id = fallback_id(fx.session.open(doc("doc:B")).await);
    let secondary = fx.secondary(id);
    assert_eq!(secondary.loads(), vec![load_of("doc:B", Some("loc-42"))]);

    let start = Instant::now();
    let result = fx.session.migrate(id).await.unwrap();

    assert_eq!(result, MigrationResult::Opened);
    assert!(start.elapsed() <= RetryPolicy::MIGRATION.ceiling());
    assert!(secondary.is_disposed());
    assert_eq!(
        secondary.posted().last(),
        Some(&HostMessage::MigrationStatus {
            value: MigrationResult::Opened
        })
    );
    // Delivered exactly once, even though the primary resolved with a
    // pending delivery outstanding.
    assert_eq!(fx.primary().loads(), vec![load_of("doc:B", Some("loc-42"))]);
    assert_eq!(fx.session.pending_identity(), None);
    assert!(fx.session.fallback().active().is_empty());
    assert_eq!(
        fx.statuses(),
        vec![
            RequestStatus::Opening,
            RequestStatus::Opened,
            RequestStatus::Ready
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_migration_timeout_leaves_secondary_open() {
    let mut fx = Fixture::new(vec![]);
    let id = fallback_id(fx.session.open(doc("doc:C")).await);

    let start = Instant::now();
    let result = fx.session.migrate(id).await.unwrap();

    assert_eq!(result, MigrationResult::Failed);
    assert_eq!(start.elapsed(), Duration::from_millis(2_900));
    let secondary = fx.secondary(id);
    assert!(!secondary.is_disposed());
    assert_eq!(
        secondary.posted().last(),
        Some(&HostMessage::MigrationStatus {
            value: MigrationResult::Failed
        })
    );
    assert_eq!(
        fx.statuses(),
        vec![
            RequestStatus::Opening,
            RequestStatus::Failed,
            RequestStatus::Ready
        ]
    );

    // The handshake is one-shot.
    let err = fx.session.migrate(id).await.unwrap_err();
    assert!(matches!(err, ProtocolViolation::OutOfState { .. }));
    assert!(fx.statuses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_migrate_from_primary_or_unknown_surface_is_a_violation() {
    let fx = Fixture::new(vec![]);
    assert!(matches!(
        fx.session.migrate(SurfaceId::Primary).await,
        Err(ProtocolViolation::OutOfState { .. })
    ));
    assert!(matches!(
        fx.session.migrate(SurfaceId::new_secondary()).await,
        Err(ProtocolViolation::OutOfState { .. })
    ));
    assert_eq!(fx.host.activations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_primary_receives_pending_delivery() {
    let mut fx = Fixture::new(vec![]);
    let id = fallback_id(fx.session.open(doc("doc:D")).await);
    // The fallback surface reported progress in the meantime.
    fx.session.report_position("doc:D", "loc-9").unwrap();

    let primary = fx.factory.create(SurfaceId::Primary);
    fx.session.register_primary(primary);

    assert_eq!(fx.primary().loads(), vec![load_of("doc:D", Some("loc-9"))]);
    let secondary = fx.secondary(id);
    assert!(secondary.is_disposed());
    assert_eq!(
        secondary.posted().last(),
        Some(&HostMessage::MigrationStatus {
            value: MigrationResult::Opened
        })
    );
    assert_eq!(fx.session.pending_identity(), None);
    assert_eq!(
        fx.statuses(),
        vec![
            RequestStatus::Opening,
            RequestStatus::Opened,
            RequestStatus::Ready
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_newer_open_supersedes_pending_delivery() {
    let mut fx = Fixture::new(vec![]);
    let first = fallback_id(fx.session.open(doc("doc:1")).await);
    let second = fallback_id(fx.session.open(doc("doc:2")).await);
    assert_eq!(fx.session.pending_identity().as_deref(), Some("doc:2"));

    let primary = fx.factory.create(SurfaceId::Primary);
    fx.session.register_primary(primary);

    assert_eq!(fx.primary().loads(), vec![load_of("doc:2", None)]);
    assert!(fx.secondary(second).is_disposed());
    assert!(!fx.secondary(first).is_disposed());
    assert_eq!(
        fx.drain(),
        vec![
            (1, RequestStatus::Opening),
            (2, RequestStatus::Opening),
            (2, RequestStatus::Opened),
            (2, RequestStatus::Ready),
        ]
    );

    // The superseded request finishes when its surface goes away.
    fx.session.secondary_closed(first);
    assert!(fx.secondary(first).is_disposed());
    assert_eq!(fx.drain(), vec![(1, RequestStatus::Ready)]);
    assert_eq!(fx.session.snapshot().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_closing_fallback_finishes_request() {
    let mut fx = Fixture::new(vec![]);
    let id = fallback_id(fx.session.open(doc("doc:E")).await);

    fx.session.secondary_closed(id);
    fx.session.secondary_closed(id);

    assert!(fx.session.fallback().active().is_empty());
    assert_eq!(
        fx.statuses(),
        vec![RequestStatus::Opening, RequestStatus::Ready]
    );
    assert_eq!(fx.session.snapshot().state, SessionState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_creation_failure_reports_failed_and_releases() {
    let mut fx = Fixture::new(vec![]);
    fx.host.set_fail_secondary(true);

    assert_eq!(fx.session.open(doc("doc:F")).await, OpenOutcome::Failed);
    assert_eq!(
        fx.statuses(),
        vec![
            RequestStatus::Opening,
            RequestStatus::Failed,
            RequestStatus::Ready
        ]
    );
    // Still owed to the primary surface.
    assert_eq!(fx.session.pending_identity().as_deref(), Some("doc:F"));

    fx.host.set_fail_secondary(false);
    let primary = fx.factory.create(SurfaceId::Primary);
    fx.session.register_primary(primary);
    assert_eq!(fx.primary().loads(), vec![load_of("doc:F", None)]);

    assert_eq!(fx.session.open(doc("doc:G")).await, OpenOutcome::Delivered);
}

#[tokio::test(start_paused = true)]
async fn test_post_failure_on_primary_escalates() {
    let mut fx = Fixture::new(vec![]);
    let primary = RecordingSurface::new(SurfaceId::Primary);
    primary.set_reject_posts(true);
    fx.session.register_primary(primary.clone());

    let id = fallback_id(fx.session.open(doc("doc:H")).await);

    assert!(primary.posted().is_empty());
    assert_eq!(fx.secondary(id).loads(), vec![load_of("doc:H", None)]);
    assert_eq!(fx.statuses(), vec![RequestStatus::Opening]);
}

#[tokio::test(start_paused = true)]
async fn test_status_events_carry_identity() {
    let mut fx = Fixture::new(vec![PrimaryPlan::After(Duration::ZERO)]);
    fx.session.open(doc("doc:I")).await;

    let event = fx.statuses.try_recv().unwrap();
    assert_eq!(
        event,
        StatusEvent {
            generation: 1,
            identity: "doc:I".to_string(),
            status: RequestStatus::Opening,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_primary_usable_right_after_last_poll_gets_the_document() {
    let mut fx = Fixture::with_config(vec![], &quick_config(3, 3));
    // Hidden from the Opening status post, the up-front check and all three
    // polls; the escalation's check is the first to see it.
    let late = LateSurface::new(5);
    fx.session.register_primary(late.clone());

    let outcome = fx.session.open(doc("doc:L")).await;

    assert_eq!(outcome, OpenOutcome::Delivered);
    assert_eq!(late.inner.loads(), vec![load_of("doc:L", None)]);
    assert!(fx.factory.secondaries().is_empty());
    assert_eq!(fx.session.pending_identity(), None);
    assert_eq!(
        fx.statuses(),
        vec![RequestStatus::Opening, RequestStatus::Ready]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_open_and_primary_registration_deliver_once() {
    for round in 0..40u64 {
        let fx = Fixture::with_config(vec![], &quick_config(3, 3));
        let primary = RecordingSurface::new(SurfaceId::Primary);

        let open = {
            let session = fx.session.clone();
            tokio::spawn(async move { session.open(doc("doc:R")).await })
        };
        let register = {
            let session = fx.session.clone();
            let primary = primary.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_micros(round * 100)).await;
                session.register_primary(primary);
            })
        };
        open.await.unwrap();
        register.await.unwrap();

        assert_eq!(
            primary.loads(),
            vec![load_of("doc:R", None)],
            "round {}",
            round
        );
        assert_eq!(fx.session.pending_identity(), None, "round {}", round);
        assert!(
            fx.factory.secondaries().iter().all(|s| s.is_disposed()),
            "round {}",
            round
        );
        assert!(fx.session.fallback().active().is_empty(), "round {}", round);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_migration_and_primary_registration_deliver_once() {
    for round in 0..40u64 {
        let fx = Fixture::with_config(vec![], &quick_config(1, 2_000));
        let id = fallback_id(fx.session.open(doc("doc:M")).await);
        let primary = RecordingSurface::new(SurfaceId::Primary);

        let migrate = {
            let session = fx.session.clone();
            tokio::spawn(async move { session.migrate(id).await })
        };
        let register = {
            let session = fx.session.clone();
            let primary = primary.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_micros(round * 50)).await;
                session.register_primary(primary);
            })
        };
        // Losing the race to the registration is a violation, not a second
        // delivery.
        let _ = migrate.await.unwrap();
        register.await.unwrap();

        assert_eq!(
            primary.loads(),
            vec![load_of("doc:M", None)],
            "round {}",
            round
        );
        assert_eq!(fx.session.pending_identity(), None, "round {}", round);
        assert!(fx.secondary(id).is_disposed(), "round {}", round);
    }
}
