use std::sync::Arc;

use super::*;
use crate::limits::*;

const H: Ms = 3_600_000;
const T0: Ms = 1_800_000_000_000;

fn reservation(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
    Reservation {
        id: Ulid::new(),
        item_id: Ulid::new(),
        booker_id: Ulid::new(),
        span: Span::new(start, end),
        status,
    }
}

fn ledger_with(rows: Vec<Reservation>) -> ItemLedger {
    let mut ledger = ItemLedger::new(Ulid::new(), Ulid::new());
    for r in rows {
        ledger.insert(r);
    }
    ledger
}

// ── Overlap predicate ────────────────────────────────────

#[test]
fn overlap_counts_only_approved() {
    let ledger = ledger_with(vec![
        reservation(10, 20, ReservationStatus::Approved),
        reservation(12, 18, ReservationStatus::Waiting),
        reservation(14, 16, ReservationStatus::Rejected),
    ]);
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(15, 25)), 1);
}

#[test]
fn overlap_bounds_are_inclusive() {
    let ledger = ledger_with(vec![reservation(10, 20, ReservationStatus::Approved)]);
    // request ends exactly where the approved one starts
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(0, 10)), 1);
    // request starts exactly where the approved one ends
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(20, 30)), 1);
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(21, 30)), 0);
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(0, 9)), 0);
}

#[test]
fn overlap_misses_request_strictly_inside_approved() {
    let ledger = ledger_with(vec![reservation(10, 100, ReservationStatus::Approved)]);
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(40, 60)), 0);
    assert!(check_no_conflict(&ledger, &Span::new(40, 60)).is_ok());
}

#[test]
fn overlap_catches_request_containing_approved() {
    let ledger = ledger_with(vec![reservation(40, 60, ReservationStatus::Approved)]);
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(10, 100)), 1);
    assert!(matches!(
        check_no_conflict(&ledger, &Span::new(10, 100)),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn intersections_see_nested_windows_both_ways() {
    let outer = ledger_with(vec![reservation(10, 100, ReservationStatus::Approved)]);
    assert_eq!(count_approved_intersections(&outer, &Span::new(40, 60)), 1);
    assert!(check_approvable(&outer, &Span::new(40, 60)).is_err());

    let inner = ledger_with(vec![reservation(40, 60, ReservationStatus::Approved)]);
    assert_eq!(count_approved_intersections(&inner, &Span::new(10, 100)), 1);
    assert!(check_approvable(&inner, &Span::new(10, 100)).is_err());
}

#[test]
fn intersections_are_half_open_and_approved_only() {
    let ledger = ledger_with(vec![
        reservation(10, 20, ReservationStatus::Approved),
        reservation(30, 40, ReservationStatus::Waiting),
    ]);
    assert_eq!(count_approved_intersections(&ledger, &Span::new(20, 25)), 0);
    assert_eq!(count_approved_intersections(&ledger, &Span::new(0, 10)), 0);
    assert_eq!(count_approved_intersections(&ledger, &Span::new(19, 21)), 1);
    assert_eq!(count_approved_intersections(&ledger, &Span::new(32, 35)), 0);
    assert!(check_approvable(&ledger, &Span::new(25, 29)).is_ok());
    // Touching still counts for approval, as it does for creation.
    assert!(check_approvable(&ledger, &Span::new(20, 25)).is_err());
}

#[test]
fn overlap_counts_every_match() {
    let ledger = ledger_with(vec![
        reservation(10, 20, ReservationStatus::Approved),
        reservation(25, 35, ReservationStatus::Approved),
        reservation(90, 95, ReservationStatus::Approved),
    ]);
    assert_eq!(count_approved_overlaps(&ledger, &Span::new(15, 30)), 2);
}

// ── Window validation ────────────────────────────────────

#[test]
fn window_validation() {
    let now = T0;
    assert_eq!(validate_window(Some(now), Some(now + 1), now).unwrap(), Span::new(now, now + 1));
    assert!(matches!(validate_window(None, Some(now + 1), now), Err(EngineError::Validation(_))));
    assert!(matches!(validate_window(Some(now + 1), None, now), Err(EngineError::Validation(_))));
    assert!(matches!(validate_window(Some(now + 2), Some(now + 1), now), Err(EngineError::Validation(_))));
    assert!(matches!(validate_window(Some(now + 1), Some(now + 1), now), Err(EngineError::Validation(_))));
    assert!(matches!(validate_window(Some(now - 1), Some(now + 1), now), Err(EngineError::Validation(_))));
    assert!(matches!(
        validate_window(Some(now), Some(MAX_VALID_TIMESTAMP_MS + 1), now),
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Summaries ────────────────────────────────────────────

#[test]
fn summary_ignores_status() {
    let rejected = reservation(100, 200, ReservationStatus::Rejected);
    let waiting = reservation(300, 400, ReservationStatus::Waiting);
    let ledger = ledger_with(vec![rejected.clone(), waiting.clone()]);

    let s = summarize(&ledger, 250);
    assert_eq!(s.last.map(|b| b.id), Some(rejected.id));
    assert_eq!(s.next.map(|b| b.id), Some(waiting.id));
    assert_eq!(s.next.map(|b| b.booker_id), Some(waiting.booker_id));
}

#[test]
fn summary_picks_closest_on_each_side() {
    let rows: Vec<Reservation> = [100, 200, 300, 400]
        .iter()
        .map(|&s| reservation(s, s + 50, ReservationStatus::Approved))
        .collect();
    let ledger = ledger_with(rows.clone());

    let s = summarize(&ledger, 250);
    assert_eq!(s.last.map(|b| b.id), Some(rows[1].id));
    assert_eq!(s.next.map(|b| b.id), Some(rows[2].id));

    let s = summarize(&ledger, 1_000);
    assert_eq!(s.last.map(|b| b.id), Some(rows[3].id));
    assert!(s.next.is_none());
}

#[test]
fn completed_requires_end_before_now() {
    let mut done = reservation(100, 200, ReservationStatus::Approved);
    let booker = done.booker_id;
    let ledger = ledger_with(vec![done.clone()]);
    assert!(!has_completed(&ledger, &booker, 200));
    assert!(has_completed(&ledger, &booker, 201));
    assert!(!has_completed(&ledger, &Ulid::new(), 201));

    done.status = ReservationStatus::Rejected;
    let ledger = ledger_with(vec![done]);
    assert!(!has_completed(&ledger, &booker, 1_000));
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("bookd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Seeded {
    engine: Engine,
    item: ItemRecord,
    booker: Ulid,
}

async fn seeded(name: &str) -> Seeded {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let (item_id, owner, booker) = (Ulid::new(), Ulid::new(), Ulid::new());
    engine.register_party(owner).await.unwrap();
    engine.register_party(booker).await.unwrap();
    engine.list_item(item_id, owner, true).await.unwrap();
    let item = engine.item(&item_id).unwrap();
    Seeded { engine, item, booker }
}

#[tokio::test]
async fn directory_upserts() {
    let s = seeded("directory_upserts.wal").await;
    assert!(s.engine.has_party(&s.booker));
    assert!(!s.engine.has_party(&Ulid::new()));

    // Registering twice is harmless.
    s.engine.register_party(s.booker).await.unwrap();
    assert_eq!(s.engine.party_count(), 2);

    s.engine.list_item(s.item.id, s.item.owner_id, false).await.unwrap();
    assert!(!s.engine.item(&s.item.id).unwrap().available);
    assert_eq!(s.engine.item_count(), 1);
}

#[tokio::test]
async fn create_and_fetch_reservation() {
    let s = seeded("create_fetch.wal").await;
    let r = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0, T0 + H))
        .await
        .unwrap();
    assert_eq!(r.status, ReservationStatus::Waiting);

    let owner = Some(s.item.owner_id);
    assert_eq!(s.engine.get_reservation(r.id, s.booker, owner).await.unwrap(), r);
    assert_eq!(s.engine.get_reservation(r.id, s.item.owner_id, owner).await.unwrap(), r);
    assert!(matches!(
        s.engine.get_reservation(r.id, Ulid::new(), owner).await,
        Err(EngineError::NotFound(_))
    ));
    // Without a known owner only the booker sees it.
    assert!(s.engine.get_reservation(r.id, s.booker, None).await.is_ok());
    assert!(s.engine.get_reservation(r.id, s.item.owner_id, None).await.is_err());
}

#[tokio::test]
async fn status_change_is_owner_only_and_final() {
    let s = seeded("status_owner_only.wal").await;
    let r = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0, T0 + H))
        .await
        .unwrap();

    let owner = s.item.owner_id;
    assert!(matches!(
        s.engine.set_status(r.id, s.booker, owner, true).await,
        Err(EngineError::NotFound(_))
    ));
    let approved = s.engine.set_status(r.id, owner, owner, true).await.unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);
    assert!(matches!(
        s.engine.set_status(r.id, owner, owner, false).await,
        Err(EngineError::InvalidTransition { status: ReservationStatus::Approved, .. })
    ));
}

#[tokio::test]
async fn replay_restores_reservations_and_directory() {
    let path = test_wal_path("replay.wal");
    let (item_id, owner, booker) = (Ulid::new(), Ulid::new(), Ulid::new());
    let (approved_id, waiting_id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.register_party(owner).await.unwrap();
        engine.register_party(booker).await.unwrap();
        engine.list_item(item_id, owner, true).await.unwrap();
        let item = engine.item(&item_id).unwrap();
        let a = engine.create_reservation(&item, booker, Span::new(T0, T0 + H)).await.unwrap();
        let w = engine
            .create_reservation(&item, booker, Span::new(T0 + 5 * H, T0 + 6 * H))
            .await
            .unwrap();
        engine.set_status(a.id, owner, owner, true).await.unwrap();
        approved_id = a.id;
        waiting_id = w.id;
    }

    let engine = Engine::new(path).unwrap();
    assert!(engine.has_party(&owner) && engine.has_party(&booker));
    assert_eq!(engine.item(&item_id).map(|i| i.owner_id), Some(owner));
    assert_eq!(
        engine.get_reservation(approved_id, booker, None).await.unwrap().status,
        ReservationStatus::Approved
    );
    assert_eq!(
        engine.get_reservation(waiting_id, owner, Some(owner)).await.unwrap().status,
        ReservationStatus::Waiting
    );
    let owned = engine
        .list_reservations(Role::Owner, owner, StateFilter::All, PageRequest::new(0, 10).unwrap(), T0)
        .await;
    assert_eq!(owned.len(), 2);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let (item_id, owner, booker) = (Ulid::new(), Ulid::new(), Ulid::new());
    let engine = Engine::new(path.clone()).unwrap();
    engine.register_party(owner).await.unwrap();
    engine.register_party(booker).await.unwrap();
    engine.list_item(item_id, owner, true).await.unwrap();
    let item = engine.item(&item_id).unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let r = engine
            .create_reservation(&item, booker, Span::new(T0 + i * H, T0 + i * H + 1))
            .await
            .unwrap();
        ids.push(r.id);
    }
    engine.set_status(ids[0], owner, owner, false).await.unwrap();
    engine.set_status(ids[1], owner, owner, true).await.unwrap();

    assert_eq!(engine.wal_appends_since_compact().await, 10);
    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    drop(engine);

    let events = crate::wal::Wal::replay(&path).unwrap();
    // 2 parties + 1 item + 5 reservations, decisions folded in.
    assert_eq!(events.len(), 8);
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::ReservationStatusChanged { .. })));

    let engine = Engine::new(path).unwrap();
    assert_eq!(
        engine.get_reservation(ids[0], booker, None).await.unwrap().status,
        ReservationStatus::Rejected
    );
    assert_eq!(
        engine.get_reservation(ids[1], booker, None).await.unwrap().status,
        ReservationStatus::Approved
    );
}

#[tokio::test]
async fn relisting_moves_ownership() {
    let s = seeded("relist_owner.wal").await;
    let r = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0, T0 + H))
        .await
        .unwrap();
    let new_owner = Ulid::new();
    s.engine.register_party(new_owner).await.unwrap();
    s.engine.list_item(s.item.id, new_owner, true).await.unwrap();

    let page = PageRequest::new(0, 10).unwrap();
    assert!(s
        .engine
        .list_reservations(Role::Owner, s.item.owner_id, StateFilter::All, page, T0)
        .await
        .is_empty());
    assert_eq!(
        s.engine
            .list_reservations(Role::Owner, new_owner, StateFilter::All, page, T0)
            .await
            .len(),
        1
    );
    // Decisions follow the owner the catalog reports.
    let current = s.engine.item(&s.item.id).unwrap().owner_id;
    assert_eq!(current, new_owner);
    assert!(s.engine.set_status(r.id, s.item.owner_id, current, true).await.is_err());
    assert!(s.engine.set_status(r.id, new_owner, current, true).await.is_ok());
}

#[tokio::test]
async fn decision_adopts_catalog_owner() {
    let s = seeded("adopt_owner.wal").await;
    let r = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0, T0 + H))
        .await
        .unwrap();
    let new_owner = Ulid::new();

    // The mirror still names the old owner; the caller-supplied owner wins.
    assert!(s.engine.set_status(r.id, s.item.owner_id, new_owner, true).await.is_err());
    assert_eq!(s.engine.owned_item_ids(&new_owner), vec![s.item.id]);
    assert!(s.engine.owned_item_ids(&s.item.owner_id).is_empty());
    assert!(s.engine.set_status(r.id, new_owner, new_owner, true).await.is_ok());
}

#[tokio::test]
async fn sync_owner_moves_owner_scope() {
    let s = seeded("sync_owner.wal").await;
    s.engine.create_reservation(&s.item, s.booker, Span::new(T0, T0 + H)).await.unwrap();
    let new_owner = Ulid::new();

    s.engine.sync_owner(s.item.id, new_owner).await;
    let page = PageRequest::new(0, 10).unwrap();
    assert!(s
        .engine
        .list_reservations(Role::Owner, s.item.owner_id, StateFilter::All, page, T0)
        .await
        .is_empty());
    assert_eq!(
        s.engine
            .list_reservations(Role::Owner, new_owner, StateFilter::All, page, T0)
            .await
            .len(),
        1
    );
    // Unknown items are ignored.
    s.engine.sync_owner(Ulid::new(), new_owner).await;
}

#[tokio::test]
async fn list_scopes_booker_rows_per_item() {
    let s = seeded("list_scope.wal").await;
    let other = Ulid::new();
    s.engine.register_party(other).await.unwrap();
    s.engine.create_reservation(&s.item, s.booker, Span::new(T0, T0 + H)).await.unwrap();
    s.engine.create_reservation(&s.item, other, Span::new(T0 + H, T0 + 2 * H)).await.unwrap();

    let page = PageRequest::new(0, 10).unwrap();
    let mine = s
        .engine
        .list_reservations(Role::Booker, s.booker, StateFilter::All, page, T0)
        .await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].booker_id, s.booker);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_never_double_book() {
    let s = seeded("concurrent.wal").await;
    let engine = Arc::new(s.engine);
    let item = s.item;

    // Requests first: once one is approved, later creates for the same
    // window are refused, which is not what this test races.
    let mut ids = Vec::new();
    for i in 0..16 {
        let booker = Ulid::new();
        engine.register_party(booker).await.unwrap();
        // Alternate identical and nested windows.
        let span = if i % 2 == 0 {
            Span::new(T0, T0 + H)
        } else {
            Span::new(T0 + H / 4, T0 + H / 2)
        };
        ids.push(engine.create_reservation(&item, booker, span).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.set_status(id, item.owner_id, item.owner_id, true).await.is_ok()
        }));
    }

    let mut approved = 0;
    for h in handles {
        if h.await.unwrap() {
            approved += 1;
        }
    }
    assert_eq!(approved, 1);

    let ledger = engine.ledger(&item.id).unwrap();
    let guard = ledger.read().await;
    assert_eq!(guard.reservations.len(), 16);
    assert_eq!(count_approved_intersections(&guard, &Span::new(T0, T0 + H)), 1);
}

// ── WAL failure ──────────────────────────────────────────

/// Swap in a WAL channel whose writer is gone, so every append fails.
fn break_wal(engine: &mut Engine) {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    drop(rx);
    engine.wal_tx = tx;
}

#[tokio::test]
async fn failed_wal_append_leaves_state_untouched() {
    let mut s = seeded("wal_failure.wal").await;
    let owner = s.item.owner_id;
    let waiting = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0, T0 + H))
        .await
        .unwrap();
    break_wal(&mut s.engine);

    let err = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0 + 2 * H, T0 + 3 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WalError(_)));

    let err = s.engine.set_status(waiting.id, owner, owner, true).await.unwrap_err();
    assert!(matches!(err, EngineError::WalError(_)));

    let ledger = s.engine.ledger(&s.item.id).unwrap();
    let guard = ledger.read().await;
    assert_eq!(guard.reservations, vec![waiting.clone()]);
    drop(guard);
    let page = PageRequest::new(0, 10).unwrap();
    let listed = s
        .engine
        .list_reservations(Role::Booker, s.booker, StateFilter::All, page, T0)
        .await;
    assert_eq!(listed, vec![waiting]);

    let err = s.engine.register_party(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::WalError(_)));
    assert_eq!(s.engine.party_count(), 2);
}

#[tokio::test]
async fn reservation_limit_per_item() {
    let s = seeded("limit_per_item.wal").await;
    {
        let ledger = s.engine.store.ledger_or_create(s.item.id, s.item.owner_id);
        let mut guard = ledger.write().await;
        for i in 0..MAX_RESERVATIONS_PER_ITEM as i64 {
            guard.insert(reservation(T0 + 10 * H + i, T0 + 10 * H + i + 1, ReservationStatus::Rejected));
        }
    }
    let err = s
        .engine
        .create_reservation(&s.item, s.booker, Span::new(T0, T0 + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}
