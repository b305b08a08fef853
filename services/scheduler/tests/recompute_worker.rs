//! Recompute worker against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rota_core::{
    DirectionPolicy, MemoryDispatcher, MemoryStore, ReminderKind, Reservation, RotationConfig,
};
use rota_id::{OrgId, ReservationId};
use rota_scheduler::config::ReminderDefaults;
use rota_scheduler::planner::Planner;
use rota_scheduler::worker::{ChangeNotice, RecomputeWorker, WorkerConfig};
use tokio::sync::{mpsc, watch};

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 10, 9, 0, 0).unwrap()
}

fn config(order: &[&str]) -> RotationConfig {
    let order: Vec<String> = order.iter().map(|s| s.to_string()).collect();
    RotationConfig::from_legacy_order(
        OrgId::new(),
        2024,
        &order,
        DirectionPolicy::MoveFirstToLast,
        14,
        7,
        10,
        10,
    )
}

fn reservation(org_id: OrgId, check_in: &str) -> Reservation {
    Reservation {
        id: ReservationId::new(),
        org_id,
        group_name: "A".into(),
        recipient: "a@example.com".into(),
        check_in: check_in.into(),
        check_out: "2025-10-20".into(),
    }
}

fn worker(
    store: &Arc<MemoryStore>,
    dispatcher: &Arc<MemoryDispatcher>,
) -> RecomputeWorker<MemoryStore, MemoryDispatcher> {
    RecomputeWorker::new(
        Planner::new(store.clone(), ReminderDefaults::default()),
        dispatcher.clone(),
        WorkerConfig {
            resync_interval: Duration::from_secs(3600),
            ..WorkerConfig::default()
        },
    )
    .with_clock(fixed_now)
}

async fn wait_for_sent(dispatcher: &MemoryDispatcher, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.sent().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatcher never reached the expected count");
}

#[tokio::test]
async fn test_full_pass_dispatches_each_reminder_once() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(MemoryDispatcher::new());
    let cfg = config(&["A", "B", "C"]);
    let org_id = cfg.org_id;
    store.put_config(cfg);
    store.add_reservation(reservation(org_id, "2025-10-17"));

    let mut worker = worker(&store, &dispatcher);

    let first = worker.recompute_all().await.unwrap();
    assert_eq!(first.orgs_processed, 1);
    assert!(first.reminders_dispatched > 0);
    assert_eq!(first.reminders_dispatched, dispatcher.sent().len());
    assert_eq!(worker.ledger().len(), first.reminders_dispatched);

    let second = worker.recompute_all().await.unwrap();
    assert_eq!(second.orgs_processed, 1);
    assert_eq!(second.reminders_dispatched, 0);
    assert_eq!(store.insert_calls(), 1);

    // Check-in a week out: the 7-day reminder goes out today.
    let today = NaiveDate::from_ymd_opt(2025, 10, 10).unwrap();
    let week_before: Vec<_> = dispatcher
        .sent()
        .into_iter()
        .filter(|r| r.kind == ReminderKind::ReservationUpcoming { days_before: 7 })
        .collect();
    assert_eq!(week_before.len(), 1);
    assert_eq!(week_before[0].send_at.date_naive(), today);
}

#[tokio::test]
async fn test_bad_config_org_still_gets_event_reminders() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(MemoryDispatcher::new());
    store.put_config(config(&["A", "B"]));
    let bad = config(&["X", "X"]);
    let bad_org = bad.org_id;
    store.put_config(bad);
    store.add_reservation(reservation(bad_org, "2025-10-17"));

    let mut worker = worker(&store, &dispatcher);
    let stats = worker.recompute_all().await.unwrap();

    assert_eq!(stats.orgs_processed, 2);
    assert_eq!(stats.orgs_failed, 0);
    // Only the valid org gets periods written.
    assert_eq!(store.insert_calls(), 1);

    let sent = dispatcher.sent();
    let bad_org_kinds: Vec<_> = sent
        .iter()
        .filter(|r| r.source_id.starts_with("rsv_"))
        .map(|r| r.kind)
        .collect();
    assert_eq!(
        bad_org_kinds,
        vec![
            ReminderKind::ReservationUpcoming { days_before: 7 },
            ReminderKind::ReservationUpcoming { days_before: 3 },
            ReminderKind::ReservationUpcoming { days_before: 1 },
        ]
    );
}

#[tokio::test]
async fn test_change_notice_picks_up_new_reservation() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(MemoryDispatcher::new());
    let cfg = config(&["A", "B", "C"]);
    let org_id = cfg.org_id;
    store.put_config(cfg);

    let startup = Planner::new(store.clone(), ReminderDefaults::default())
        .plan(org_id, fixed_now())
        .await
        .unwrap()
        .unwrap()
        .reminders
        .len();

    let (notice_tx, notice_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker(&store, &dispatcher).run(notice_rx, shutdown_rx));

    wait_for_sent(&dispatcher, startup).await;

    // Default offsets are 7, 3 and 1 days; all three are still ahead.
    store.add_reservation(reservation(org_id, "2025-10-17"));
    notice_tx.send(ChangeNotice::Org(org_id)).await.unwrap();
    wait_for_sent(&dispatcher, startup + 3).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();

    let reservation_reminders = dispatcher
        .sent()
        .iter()
        .filter(|r| matches!(r.kind, ReminderKind::ReservationUpcoming { .. }))
        .count();
    assert_eq!(reservation_reminders, 3);
}
