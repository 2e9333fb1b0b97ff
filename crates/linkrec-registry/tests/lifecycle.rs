//! End-to-end attach → detach → reattach → reconcile flows against the
//! in-memory store, with tokio time paused.

use std::sync::Arc;
use std::time::Duration;

use linkrec_core::{
    DeliveryState, DeliveryTag, ExpirationPolicy, LifecycleEvent, LinkIdentifier,
    LinkRecoveryError, LinkScope, LinkSettings, Outcome, Role, UnsettledMap,
};
use linkrec_registry::{
    LocalLink, RecoverableLink, RegistryConfig, SuspendOutcome, TerminusEvent, TerminusPhase,
    TerminusRegistry, plan_recovery,
};
use linkrec_store::{DeliveryStore, InMemoryDeliveryStore};

const ACC: DeliveryState = DeliveryState::Terminal(Outcome::Accepted);

fn identifier(name: &str) -> LinkIdentifier {
    LinkIdentifier::new(name, Role::Sender, Some("broker".to_owned())).expect("valid")
}

fn link(name: &str) -> (Arc<LocalLink>, Arc<dyn RecoverableLink>) {
    let local = Arc::new(LocalLink::new(
        identifier(name),
        LinkSettings::new(name, Role::Sender),
        LinkScope::new(7, 1),
    ));
    let handle: Arc<dyn RecoverableLink> = local.clone();
    (local, handle)
}

fn registry(policy: ExpirationPolicy, timeout_ms: u64) -> Arc<TerminusRegistry> {
    TerminusRegistry::new(
        RegistryConfig {
            expiration_policy: policy,
            expiry_timeout_ms: timeout_ms,
            ..RegistryConfig::default()
        },
        Arc::new(InMemoryDeliveryStore::new()),
    )
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<TerminusEvent>) -> Vec<TerminusEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

// ── 1. reattach_before_timeout_keeps_terminus ─────────────────────────

#[tokio::test(start_paused = true)]
async fn reattach_before_timeout_keeps_terminus() {
    let registry = registry(ExpirationPolicy::LinkDetach, 1_000);
    let mut events = registry.subscribe();

    let (_, first) = link("orders");
    let terminus = registry.register(Arc::clone(&first)).expect("attach");
    terminus
        .record_delivery("t1".into(), DeliveryState::PendingAcknowledged)
        .expect("record");

    assert_eq!(
        registry.suspend(&first, LifecycleEvent::LinkDetach),
        SuspendOutcome::Suspended
    );
    tokio::time::sleep(Duration::from_millis(600)).await;

    let (_, second) = link("orders");
    let again = registry.register(second).expect("reattach");
    assert!(Arc::ptr_eq(&terminus, &again));

    // Well past the original deadline.
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    assert_eq!(again.phase(), TerminusPhase::Active);
    assert!(registry.try_get(&identifier("orders")).is_some());
    assert_eq!(again.deliveries().expect("store").len(), 1, "records intact");
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, TerminusEvent::Expired { .. })),
        "expired must not fire"
    );
}

// ── 2. untouched_terminus_expires_after_timeout ───────────────────────

#[tokio::test(start_paused = true)]
async fn untouched_terminus_expires_after_timeout() {
    let registry = registry(ExpirationPolicy::LinkDetach, 1_000);
    let (_, first) = link("orders");
    let terminus = registry.register(Arc::clone(&first)).expect("attach");
    terminus
        .record_delivery("t1".into(), DeliveryState::PendingUnknown)
        .expect("record");
    registry.suspend(&first, LifecycleEvent::LinkDetach);

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert!(registry.try_get(&identifier("orders")).is_some());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(registry.try_get(&identifier("orders")).is_none());
    assert_eq!(terminus.phase(), TerminusPhase::Expired);
    assert!(
        registry
            .store()
            .retrieve_all(&identifier("orders"))
            .expect("store")
            .is_empty()
    );
}

// ── 3. resuspension_restarts_the_clock ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn resuspension_restarts_the_clock() {
    let registry = registry(ExpirationPolicy::LinkDetach, 1_000);
    let (_, first) = link("orders");
    registry.register(Arc::clone(&first)).expect("attach");
    registry.suspend(&first, LifecycleEvent::LinkDetach);

    tokio::time::sleep(Duration::from_millis(800)).await;
    let (_, second) = link("orders");
    registry.register(Arc::clone(&second)).expect("reattach");
    registry.suspend(&second, LifecycleEvent::LinkDetach);

    // The first timer fires at t=1000 with a stale epoch.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(registry.is_suspended(&identifier("orders")));

    // Second deadline at t=1800.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(registry.try_get(&identifier("orders")).is_none());
}

// ── 4. steal_then_late_detach_is_ignored ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn steal_then_late_detach_is_ignored() {
    let registry = registry(ExpirationPolicy::LinkDetach, 0);
    let (first_local, first) = link("orders");
    registry.register(Arc::clone(&first)).expect("first");
    let (second_local, second) = link("Orders");
    registry.register(Arc::clone(&second)).expect("second");

    assert!(matches!(
        first_local.closed_error(),
        Some(LinkRecoveryError::LinkStolen { .. })
    ));
    assert!(
        first_local
            .closed_error()
            .map(|e| e.to_string())
            .is_some_and(|msg| msg.contains("link stealing"))
    );

    assert_eq!(
        registry.suspend(&first, LifecycleEvent::LinkDetach),
        SuspendOutcome::NotAssociated
    );
    assert!(second_local.is_open());
    assert!(registry.try_get(&identifier("orders")).is_some());
}

// ── 5. session_end_policy_outlives_detach ─────────────────────────────

#[tokio::test(start_paused = true)]
async fn session_end_policy_outlives_detach() {
    let registry = registry(ExpirationPolicy::SessionEnd, 100);
    let (local, first) = link("orders");
    registry.register(Arc::clone(&first)).expect("attach");

    local.close();
    assert_eq!(
        registry.suspend(&first, LifecycleEvent::LinkDetach),
        SuspendOutcome::Retained
    );
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(registry.try_get(&identifier("orders")).is_some());

    assert_eq!(registry.expire_for_session(LinkScope::new(7, 1).session), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(registry.try_get(&identifier("orders")).is_none());
}

// ── 6. full_recovery_round_trip ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn full_recovery_round_trip() {
    let registry = registry(ExpirationPolicy::LinkDetach, 5_000);
    let (_, first) = link("orders");
    let terminus = registry.register(Arc::clone(&first)).expect("attach");
    for (tag, state) in [
        ("settled-locally", ACC),
        ("in-flight", DeliveryState::PendingUnknown),
        ("both-received", DeliveryState::PendingAcknowledged),
        ("both-accepted", ACC),
    ] {
        terminus.record_delivery(tag.into(), state).expect("record");
    }
    registry.suspend(&first, LifecycleEvent::LinkDetach);

    // Outgoing attach carries our unsettled map.
    let ours = terminus.unsettled_map().expect("map");
    assert_eq!(ours.len(), 4);

    let (_, second) = link("orders");
    let terminus = registry.register(second).expect("reattach");
    let peer: UnsettledMap = [
        (DeliveryTag::from("both-received"), DeliveryState::PendingAcknowledged),
        (DeliveryTag::from("both-accepted"), ACC),
    ]
    .into_iter()
    .collect();

    let plan = plan_recovery(&terminus, &peer).expect("plan");
    let frames = plan.apply(&terminus).expect("apply");

    let by_tag = |tag: &str| frames.iter().find(|f| f.tag == DeliveryTag::from(tag));
    assert!(by_tag("settled-locally").is_none(), "T vs ABS is skipped");
    let fresh = by_tag("in-flight").expect("fresh resend");
    assert!(!fresh.resume && !fresh.aborted);
    let aborted = by_tag("both-received").expect("abort");
    assert!(aborted.resume && aborted.aborted);
    let settled = by_tag("both-accepted").expect("settle");
    assert!(settled.resume && settled.settled);

    let left = terminus.deliveries().expect("store");
    assert_eq!(
        left.keys().map(|t| t.to_string()).collect::<Vec<_>>(),
        vec![DeliveryTag::from("in-flight").to_string()]
    );
}
