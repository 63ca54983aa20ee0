//! Lifecycle manager integration tests over the in-memory transport:
//! pairing flow, reconnect budget, auth teardown, reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wagate::session::persist::{ERROR_FILE, PAIRING_FILE};
use wagate::session::{
    PairingOutcome, PairingWaiters, RetryPolicy, SessionDirs, SessionManager, SessionStatus,
    SessionStore,
};
use wagate::transport::memory::{MemoryConfig, MemoryTransport};
use wagate::transport::DisconnectReason;

const PHONE: &str = "919876543210";

struct Fixture {
    manager: Arc<SessionManager>,
    store: Arc<SessionStore>,
    waiters: Arc<PairingWaiters>,
    transport: Arc<MemoryTransport>,
    dirs: SessionDirs,
    _tmp: TempDir,
}

fn fixture(mem: MemoryConfig) -> Fixture {
    fixture_with_backoff(mem, Duration::from_millis(20))
}

fn fixture_with_backoff(mem: MemoryConfig, backoff: Duration) -> Fixture {
    let tmp = TempDir::new().expect("tempdir");
    let transport = Arc::new(MemoryTransport::with_config(mem));
    let store = Arc::new(SessionStore::new(50));
    let waiters = Arc::new(PairingWaiters::new());
    let dirs = SessionDirs::new(tmp.path());
    let manager = Arc::new(
        SessionManager::new(
            store.clone(),
            dirs.clone(),
            transport.clone(),
            waiters.clone(),
        )
        .with_retry_policy(RetryPolicy {
            max_retries: 3,
            backoff,
        })
        .with_pairing_delay(Duration::from_millis(10))
        .with_connect_notice(false),
    );
    Fixture {
        manager,
        store,
        waiters,
        transport,
        dirs,
        _tmp: tmp,
    }
}

/// Poll `check` until it returns true or the deadline passes.
async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn pairing_flow_reaches_awaiting_link_and_persists() {
    let fx = fixture(MemoryConfig {
        code: "ABCD1234".into(),
        ..Default::default()
    });

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    let rx = fx.waiters.register(&created.session_id).await;
    fx.manager.clone().spawn_start(&created);

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("code before timeout")
        .expect("waiter resolved");
    assert_eq!(outcome, PairingOutcome::Code("ABCD-1234".into()));

    let record = fx
        .store
        .get(&created.session_id)
        .await
        .expect("session tracked");
    assert_eq!(record.status, SessionStatus::AwaitingLink);
    assert_eq!(record.pairing_code.as_deref(), Some("ABCD-1234"));

    // pairing.json is present, error.json is not.
    let pairing = fx
        .dirs
        .read_pairing(&created.session_id)
        .expect("readable")
        .expect("pairing.json written");
    assert_eq!(pairing.code, "ABCD-1234");
    assert_eq!(pairing.status, SessionStatus::Pending);
    assert!(
        !fx.dirs
            .session_dir(&created.session_id)
            .join(ERROR_FILE)
            .exists()
    );

    // The user enters the code; the transport reports the link.
    assert!(fx.transport.open(PHONE));
    let sid = created.session_id.clone();
    let store = fx.store.clone();
    wait_for("status to reach connected", || {
        let store = store.clone();
        let sid = sid.clone();
        async move {
            store
                .get(&sid)
                .await
                .is_some_and(|r| r.status == SessionStatus::Connected)
        }
    })
    .await;

    let record = fx.store.get(&created.session_id).await.expect("tracked");
    assert!(record.connected_at.is_some());
    assert_eq!(record.retry_count, 0);

    // The status file flipped to connected but kept the original code.
    let sid = created.session_id.clone();
    let dirs = fx.dirs.clone();
    wait_for("pairing.json to flip to connected", || {
        let dirs = dirs.clone();
        let sid = sid.clone();
        async move {
            dirs.read_pairing(&sid)
                .ok()
                .flatten()
                .is_some_and(|f| f.status == SessionStatus::Connected)
        }
    })
    .await;
    let file = fx
        .dirs
        .read_pairing(&created.session_id)
        .expect("readable")
        .expect("still present");
    assert_eq!(file.code, "ABCD-1234");
    assert!(file.connected_at.is_some());
}

#[tokio::test]
async fn pairing_failure_writes_error_file() {
    let fx = fixture(MemoryConfig {
        fail_pairing: true,
        ..Default::default()
    });

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    let rx = fx.waiters.register(&created.session_id).await;
    fx.manager.clone().spawn_start(&created);

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("outcome before timeout")
        .expect("waiter resolved");
    assert!(matches!(outcome, PairingOutcome::Failed(_)));

    let record = fx.store.get(&created.session_id).await.expect("tracked");
    assert_eq!(record.status, SessionStatus::Error);
    assert!(record.last_error.is_some());

    // error.json is present, pairing.json is not.
    let error = fx
        .dirs
        .read_error(&created.session_id)
        .expect("readable")
        .expect("error.json written");
    assert_eq!(error.status, SessionStatus::Error);
    assert!(
        !fx.dirs
            .session_dir(&created.session_id)
            .join(PAIRING_FILE)
            .exists()
    );
}

#[tokio::test]
async fn transient_drops_exhaust_retry_budget_and_delete_session() {
    // Registered sessions connect without pairing. No auto-open: the
    // reconnect attempts all fail to reach `open`, so nothing resets the
    // retry counter between drops.
    let fx = fixture(MemoryConfig {
        registered: true,
        auto_open: false,
        ..Default::default()
    });

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    fx.manager.clone().spawn_start(&created);
    let sid = created.session_id.clone();

    // Initial connect, then one real open.
    let transport = fx.transport.clone();
    wait_for("initial connect", || {
        let transport = transport.clone();
        async move { transport.connect_count(PHONE) == 1 }
    })
    .await;
    assert!(fx.transport.open(PHONE));
    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("session to be connected", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move {
            store
                .get(&sid)
                .await
                .is_some_and(|r| r.status == SessionStatus::Connected)
        }
    })
    .await;

    // MAX_RETRIES + 1 consecutive transient disconnects.
    for round in 1..=4u32 {
        assert!(
            fx.transport
                .drop_connection(PHONE, DisconnectReason::Transient(format!("drop {round}"))),
            "round {round} should reach a live connection"
        );

        if round <= 3 {
            // Budget not exhausted yet: a reconnect lands a fresh handle.
            let store = fx.store.clone();
            let transport = fx.transport.clone();
            let sid2 = sid.clone();
            wait_for("reconnect to land", || {
                let store = store.clone();
                let transport = transport.clone();
                let sid = sid2.clone();
                async move {
                    transport.connect_count(PHONE) == (round + 1) as usize
                        && store.get(&sid).await.is_some_and(|r| {
                            r.retry_count == round && r.handle.is_some()
                        })
                }
            })
            .await;
        }
    }

    // Fourth drop exceeds the budget: session gone, credentials gone.
    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("session to be dropped", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move { !store.contains(&sid).await }
    })
    .await;
    assert!(!fx.dirs.exists(&sid), "credential directory must be deleted");
    assert!(fx.store.list().await.is_empty());
    // No further reconnect is ever scheduled.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.transport.connect_count(PHONE), 4);
}

#[tokio::test]
async fn successful_reconnect_resets_retry_budget() {
    let fx = fixture(MemoryConfig {
        registered: true,
        auto_open: true,
        ..Default::default()
    });

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    fx.manager.clone().spawn_start(&created);
    let sid = created.session_id.clone();

    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("initial connect", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move {
            store
                .get(&sid)
                .await
                .is_some_and(|r| r.status == SessionStatus::Connected)
        }
    })
    .await;

    fx.transport
        .drop_connection(PHONE, DisconnectReason::Transient("blip".into()));

    // auto_open reconnects us; the successful open clears the counter.
    let store = fx.store.clone();
    let transport = fx.transport.clone();
    let sid2 = sid.clone();
    wait_for("reconnect to clear retry count", || {
        let store = store.clone();
        let transport = transport.clone();
        let sid = sid2.clone();
        async move {
            transport.connect_count(PHONE) >= 2
                && store
                    .get(&sid)
                    .await
                    .is_some_and(|r| r.status == SessionStatus::Connected && r.retry_count == 0)
        }
    })
    .await;
}

#[tokio::test]
async fn auth_terminated_deletes_credentials_and_never_reconnects() {
    let fx = fixture(MemoryConfig {
        registered: true,
        auto_open: true,
        ..Default::default()
    });

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    fx.manager.clone().spawn_start(&created);
    let sid = created.session_id.clone();

    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("initial connect", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move {
            store
                .get(&sid)
                .await
                .is_some_and(|r| r.status == SessionStatus::Connected)
        }
    })
    .await;
    let connects_before = fx.transport.connect_count(PHONE);

    fx.transport
        .drop_connection(PHONE, DisconnectReason::AuthTerminated);

    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("session teardown", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move { !store.contains(&sid).await }
    })
    .await;
    assert!(!fx.dirs.exists(&sid));

    // Give a would-be reconnect several backoff windows to (not) fire.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.transport.connect_count(PHONE), connects_before);
}

#[tokio::test]
async fn deleting_session_cancels_pending_reconnect() {
    // Wide backoff so the deletion comfortably lands inside the window.
    let fx = fixture_with_backoff(
        MemoryConfig {
            registered: true,
            auto_open: true,
            ..Default::default()
        },
        Duration::from_millis(400),
    );

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    fx.manager.clone().spawn_start(&created);
    let sid = created.session_id.clone();

    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("initial connect", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move {
            store
                .get(&sid)
                .await
                .is_some_and(|r| r.status == SessionStatus::Connected)
        }
    })
    .await;
    let connects_before = fx.transport.connect_count(PHONE);

    // Drop the connection, then delete the session during the backoff.
    fx.transport
        .drop_connection(PHONE, DisconnectReason::Transient("blip".into()));
    let store = fx.store.clone();
    let sid2 = sid.clone();
    wait_for("retry to be recorded", || {
        let store = store.clone();
        let sid = sid2.clone();
        async move { store.get(&sid).await.is_some_and(|r| r.retry_count == 1) }
    })
    .await;
    fx.manager.close(&sid).await.expect("close succeeds");

    // The scheduled reconnect must observe the deletion and do nothing.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fx.transport.connect_count(PHONE), connects_before);
    assert!(!fx.store.contains(&sid).await);
}

#[tokio::test]
async fn connect_failures_burn_the_retry_budget() {
    let fx = fixture(MemoryConfig {
        fail_connect: true,
        ..Default::default()
    });

    let created = fx.manager.admit(PHONE).await.expect("admitted");
    let rx = fx.waiters.register(&created.session_id).await;
    fx.manager.clone().spawn_start(&created);

    // The first failed attempt reports back to the waiting caller.
    let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("outcome before timeout")
        .expect("waiter resolved");
    assert!(matches!(outcome, PairingOutcome::Failed(_)));

    // Open failures follow the same budget as dropped connections: initial
    // attempt plus max_retries reconnects, then the session is dropped.
    let store = fx.store.clone();
    let sid = created.session_id.clone();
    wait_for("session to be dropped", || {
        let store = store.clone();
        let sid = sid.clone();
        async move { !store.contains(&sid).await }
    })
    .await;
    assert_eq!(fx.transport.connect_count(PHONE), 4);
    assert!(!fx.dirs.exists(&sid));
}

#[tokio::test]
async fn close_is_not_found_for_unknown_session() {
    let fx = fixture(MemoryConfig::default());
    let err = fx
        .manager
        .close("session_000_0")
        .await
        .expect_err("unknown id");
    assert_eq!(err.to_string(), "Session not found");
}

#[tokio::test]
async fn reconcile_rebuilds_store_from_status_files() {
    let tmp = TempDir::new().expect("tempdir");
    let dirs = SessionDirs::new(tmp.path());

    // A previous process left one paired session and one failed one behind.
    dirs.write_pairing(
        "session_919876543210_1700000000000",
        &wagate::session::persist::PairingStatusFile {
            session_id: "session_919876543210_1700000000000".into(),
            phone_number: PHONE.into(),
            code: "ABCD-1234".into(),
            timestamp: 1_700_000_000_000,
            status: SessionStatus::Connected,
            connected_at: Some(1_700_000_060_000),
        },
    )
    .expect("seeded pairing.json");
    dirs.write_error(
        "session_15550104477_1700000000001",
        &wagate::session::persist::ErrorStatusFile {
            session_id: "session_15550104477_1700000000001".into(),
            phone_number: "15550104477".into(),
            error: "pairing rejected by server".into(),
            timestamp: 1_700_000_000_001,
            status: SessionStatus::Error,
        },
    )
    .expect("seeded error.json");

    let store = Arc::new(SessionStore::new(50));
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        dirs.clone(),
        Arc::new(MemoryTransport::new()),
        Arc::new(PairingWaiters::new()),
    ));

    let restored = manager.reconcile().await.expect("reconcile");
    assert_eq!(restored, 2);

    let paired = store
        .get("session_919876543210_1700000000000")
        .await
        .expect("restored");
    assert_eq!(paired.status, SessionStatus::Connected);
    assert_eq!(paired.pairing_code.as_deref(), Some("ABCD-1234"));
    assert!(paired.connected_at.is_some());

    let failed = store
        .get("session_15550104477_1700000000001")
        .await
        .expect("restored");
    assert_eq!(failed.status, SessionStatus::Error);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("pairing rejected by server")
    );

    // Reconciling again is a no-op; the store already has both.
    assert_eq!(manager.reconcile().await.expect("reconcile"), 0);
}
