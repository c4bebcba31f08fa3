use super::*;
use super::guard::now_ms;
use crate::model::*;

use std::sync::Arc;

const H: Ms = 3_600_000; // 1 hour in ms
const D: Ms = 24 * H;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("itemshare_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Owner, renter, outsider and one available item owned by the owner.
struct Fixture {
    engine: Engine,
    owner: Id,
    renter: Id,
    outsider: Id,
    item: Id,
}

async fn fixture(wal: &str) -> Fixture {
    let engine = Engine::new(test_wal_path(wal)).unwrap();
    let owner = engine
        .create_user("Olga".into(), "olga@example.com".into())
        .await
        .unwrap()
        .id;
    let renter = engine
        .create_user("Rene".into(), "rene@example.com".into())
        .await
        .unwrap()
        .id;
    let outsider = engine
        .create_user("Xavi".into(), "xavi@example.com".into())
        .await
        .unwrap()
        .id;
    let item = engine
        .create_item(owner, "Ladder".into(), "aluminium, 3m".into(), true)
        .await
        .unwrap()
        .id;
    Fixture {
        engine,
        owner,
        renter,
        outsider,
        item,
    }
}

fn ids(views: &[BookingView]) -> Vec<Id> {
    views.iter().map(|v| v.id).collect()
}

// ── Directory ────────────────────────────────────────────

#[tokio::test]
async fn ids_are_assigned_by_the_store() {
    let f = fixture("ids_assigned.wal").await;
    assert_eq!((f.owner, f.renter, f.outsider), (1, 2, 3));
    assert_eq!(f.item, 1);

    let second = f
        .engine
        .create_item(f.owner, "Saw".into(), String::new(), true)
        .await
        .unwrap();
    assert_eq!(second.id, 2);
}

#[tokio::test]
async fn duplicate_email_rejected() {
    let f = fixture("duplicate_email.wal").await;
    let result = f
        .engine
        .create_user("Other Olga".into(), "olga@example.com".into())
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
    assert_eq!(f.engine.store().user_count(), 3);
}

#[tokio::test]
async fn blank_or_malformed_user_rejected() {
    let f = fixture("bad_user.wal").await;
    assert!(matches!(
        f.engine.create_user("  ".into(), "a@b.c".into()).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.create_user("Ann".into(), "no-at-sign".into()).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.create_user("x".repeat(300), "long@example.com".into()).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn create_item_for_unknown_owner() {
    let f = fixture("item_unknown_owner.wal").await;
    assert!(matches!(
        f.engine.create_item(99, "Tent".into(), String::new(), true).await,
        Err(EngineError::NotFound(Entity::User, 99))
    ));
}

#[tokio::test]
async fn only_owner_changes_availability() {
    let f = fixture("set_available.wal").await;
    assert!(matches!(
        f.engine.set_item_available(f.renter, f.item, false).await,
        Err(EngineError::Forbidden(_))
    ));
    let item = f
        .engine
        .set_item_available(f.owner, f.item, false)
        .await
        .unwrap();
    assert!(!item.available);
    assert!(!f.engine.find_item(f.item).await.unwrap().available);
    assert!(matches!(
        f.engine.set_item_available(f.owner, 42, true).await,
        Err(EngineError::NotFound(Entity::Item, 42))
    ));
}

// ── create_booking ───────────────────────────────────────

#[tokio::test]
async fn new_booking_is_waiting() {
    let f = fixture("new_waiting.wal").await;
    let now = now_ms();
    let view = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    assert_eq!(view.status, BookingStatus::Waiting);
    assert_eq!(view.booker.id, f.renter);
    assert_eq!(view.item.id, f.item);
    assert_eq!(view.item.owner_id, f.owner);
    assert_eq!((view.start, view.end), (now + D, now + 2 * D));
}

#[tokio::test]
async fn start_not_before_end_is_invalid() {
    let f = fixture("start_end.wal").await;
    let now = now_ms();
    assert!(matches!(
        f.engine.create_booking(f.renter, f.item, now + D, now + D).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.create_booking(f.renter, f.item, now + 2 * D, now + D).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn owner_cannot_book_own_item() {
    let f = fixture("owner_books.wal").await;
    let now = now_ms();
    assert!(matches!(
        f.engine.create_booking(f.owner, f.item, now + D, now + 2 * D).await,
        Err(EngineError::Forbidden(_))
    ));
}

#[tokio::test]
async fn unavailable_item_cannot_be_booked() {
    let f = fixture("unavailable.wal").await;
    f.engine
        .set_item_available(f.owner, f.item, false)
        .await
        .unwrap();
    let now = now_ms();
    assert!(matches!(
        f.engine.create_booking(f.renter, f.item, now + D, now + 2 * D).await,
        Err(EngineError::InvalidState(_))
    ));
}

#[tokio::test]
async fn create_booking_check_order() {
    let f = fixture("create_order.wal").await;
    let now = now_ms();
    // Unknown item wins over unknown renter.
    assert!(matches!(
        f.engine.create_booking(77, 88, now + D, now + 2 * D).await,
        Err(EngineError::NotFound(Entity::Item, 88))
    ));
    assert!(matches!(
        f.engine.create_booking(77, f.item, now + D, now + 2 * D).await,
        Err(EngineError::NotFound(Entity::User, 77))
    ));
    // Ownership is checked before the span.
    assert!(matches!(
        f.engine.create_booking(f.owner, f.item, now + D, now).await,
        Err(EngineError::Forbidden(_))
    ));
}

#[tokio::test]
async fn failed_create_leaves_no_booking() {
    let f = fixture("failed_create.wal").await;
    let now = now_ms();
    let _ = f.engine.create_booking(f.renter, f.item, now + D, now).await;
    let all = f
        .engine
        .list_bookings_for_renter(f.renter, "ALL", 0, 10)
        .await
        .unwrap();
    assert!(all.is_empty());
}

// ── decide_booking ───────────────────────────────────────

#[tokio::test]
async fn approve_then_approve_again() {
    let f = fixture("approve_twice.wal").await;
    let now = now_ms();
    let b = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    let approved = f.engine.decide_booking(f.owner, b.id, true).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);
    assert!(matches!(
        f.engine.decide_booking(f.owner, b.id, true).await,
        Err(EngineError::InvalidState(_))
    ));
}

#[tokio::test]
async fn reject_then_reject_again() {
    let f = fixture("reject_twice.wal").await;
    let now = now_ms();
    let b = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    let rejected = f.engine.decide_booking(f.owner, b.id, false).await.unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert!(matches!(
        f.engine.decide_booking(f.owner, b.id, false).await,
        Err(EngineError::InvalidState(_))
    ));
}

#[tokio::test]
async fn decided_booking_can_be_flipped() {
    let f = fixture("flip.wal").await;
    let now = now_ms();
    let b = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    f.engine.decide_booking(f.owner, b.id, false).await.unwrap();
    let flipped = f.engine.decide_booking(f.owner, b.id, true).await.unwrap();
    assert_eq!(flipped.status, BookingStatus::Approved);
    let back = f.engine.decide_booking(f.owner, b.id, false).await.unwrap();
    assert_eq!(back.status, BookingStatus::Rejected);
}

#[tokio::test]
async fn only_owner_decides() {
    let f = fixture("decide_forbidden.wal").await;
    let now = now_ms();
    let b = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    assert!(matches!(
        f.engine.decide_booking(f.renter, b.id, true).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        f.engine.decide_booking(f.outsider, b.id, true).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        f.engine.decide_booking(99, b.id, true).await,
        Err(EngineError::NotFound(Entity::User, 99))
    ));
    assert!(matches!(
        f.engine.decide_booking(f.owner, 12345, true).await,
        Err(EngineError::NotFound(Entity::Booking, 12345))
    ));
    let still = f.engine.get_booking(f.renter, b.id).await.unwrap();
    assert_eq!(still.status, BookingStatus::Waiting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_decisions_one_wins() {
    let f = fixture("concurrent_decide.wal").await;
    let now = now_ms();
    let b = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    let (owner, booking_id) = (f.owner, b.id);
    let engine = Arc::new(f.engine);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.decide_booking(owner, booking_id, true).await
        }));
    }
    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(view) => {
                assert_eq!(view.status, BookingStatus::Approved);
                ok += 1;
            }
            Err(EngineError::InvalidState(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 1));
}

// ── get_booking ──────────────────────────────────────────

#[tokio::test]
async fn owner_approves_and_renter_sees_it() {
    let f = fixture("scenario_approve.wal").await;
    let t = now_ms();
    let b = f
        .engine
        .create_booking(f.renter, f.item, t + D, t + 2 * D)
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Waiting);

    f.engine.decide_booking(f.owner, b.id, true).await.unwrap();

    let seen = f.engine.get_booking(f.renter, b.id).await.unwrap();
    assert_eq!(seen.status, BookingStatus::Approved);
    let owner_view = f.engine.get_booking(f.owner, b.id).await.unwrap();
    assert_eq!(owner_view, seen);
    assert!(matches!(
        f.engine.get_booking(f.outsider, b.id).await,
        Err(EngineError::Forbidden(_))
    ));
}

#[tokio::test]
async fn get_booking_not_found() {
    let f = fixture("get_not_found.wal").await;
    assert!(matches!(
        f.engine.get_booking(f.renter, 5).await,
        Err(EngineError::NotFound(Entity::Booking, 5))
    ));
    assert!(matches!(
        f.engine.get_booking(55, 5).await,
        Err(EngineError::NotFound(Entity::User, 55))
    ));
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn unknown_state_token() {
    let f = fixture("bad_state.wal").await;
    for token in ["UNSUPPORTED_STATUS", "all", "Current", ""] {
        assert!(matches!(
            f.engine.list_bookings_for_renter(f.renter, token, 0, 10).await,
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            f.engine.list_bookings_for_owner(f.owner, token, 0, 10).await,
            Err(EngineError::InvalidInput(_))
        ));
    }
}

#[tokio::test]
async fn bad_page_parameters() {
    let f = fixture("bad_page.wal").await;
    assert!(matches!(
        f.engine.list_bookings_for_renter(f.renter, "ALL", -1, 10).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.list_bookings_for_owner(f.owner, "ALL", 0, 0).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.list_bookings_for_renter(99, "ALL", 0, 10).await,
        Err(EngineError::NotFound(Entity::User, 99))
    ));
    assert!(matches!(
        f.engine
            .list_bookings_for_renter(f.renter, "ALL", 0, crate::limits::MAX_PAGE_SIZE + 1)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(
        f.engine
            .list_bookings_for_renter(f.renter, "ALL", 0, crate::limits::MAX_PAGE_SIZE)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn current_and_future_are_disjoint() {
    let f = fixture("current_future.wal").await;
    let now = now_ms();
    let current = f
        .engine
        .create_booking(f.renter, f.item, now - H, now + H)
        .await
        .unwrap();
    let future = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + D + H)
        .await
        .unwrap();

    let cur = f
        .engine
        .list_bookings_for_renter(f.renter, "CURRENT", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&cur), vec![current.id]);

    let fut = f
        .engine
        .list_bookings_for_renter(f.renter, "FUTURE", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&fut), vec![future.id]);

    let owner_cur = f
        .engine
        .list_bookings_for_owner(f.owner, "CURRENT", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&owner_cur), vec![current.id]);
}

#[tokio::test]
async fn state_orderings() {
    let f = fixture("orderings.wal").await;
    let now = now_ms();
    let mut current = Vec::new();
    for i in 0..3 {
        current.push(
            f.engine
                .create_booking(f.renter, f.item, now - H - i, now + H + i)
                .await
                .unwrap()
                .id,
        );
    }
    let past = f
        .engine
        .create_booking(f.renter, f.item, now - 3 * D, now - 2 * D)
        .await
        .unwrap()
        .id;
    let future = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap()
        .id;

    // CURRENT ascending for both perspectives.
    for views in [
        f.engine
            .list_bookings_for_renter(f.renter, "CURRENT", 0, 10)
            .await
            .unwrap(),
        f.engine
            .list_bookings_for_owner(f.owner, "CURRENT", 0, 10)
            .await
            .unwrap(),
    ] {
        assert_eq!(ids(&views), current);
    }

    let all = f
        .engine
        .list_bookings_for_renter(f.renter, "ALL", 0, 10)
        .await
        .unwrap();
    let mut expected: Vec<Id> = current.clone();
    expected.extend([past, future]);
    expected.sort_by(|a, b| b.cmp(a));
    assert_eq!(ids(&all), expected);

    let past_views = f
        .engine
        .list_bookings_for_owner(f.owner, "PAST", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&past_views), vec![past]);

    let waiting = f
        .engine
        .list_bookings_for_renter(f.renter, "WAITING", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&waiting), expected);
}

#[tokio::test]
async fn status_filters() {
    let f = fixture("status_filters.wal").await;
    let now = now_ms();
    let a = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    let b = f
        .engine
        .create_booking(f.renter, f.item, now + 3 * D, now + 4 * D)
        .await
        .unwrap();
    f.engine.decide_booking(f.owner, a.id, false).await.unwrap();

    let rejected = f
        .engine
        .list_bookings_for_owner(f.owner, "REJECTED", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&rejected), vec![a.id]);
    let waiting = f
        .engine
        .list_bookings_for_renter(f.renter, "WAITING", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&waiting), vec![b.id]);
}

#[tokio::test]
async fn listings_are_scoped_to_user() {
    let f = fixture("scoped.wal").await;
    let now = now_ms();
    let other_item = f
        .engine
        .create_item(f.outsider, "Canoe".into(), String::new(), true)
        .await
        .unwrap()
        .id;
    let mine = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    let theirs = f
        .engine
        .create_booking(f.owner, other_item, now + D, now + 2 * D)
        .await
        .unwrap();

    let renter_all = f
        .engine
        .list_bookings_for_renter(f.renter, "ALL", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&renter_all), vec![mine.id]);

    let owner_all = f
        .engine
        .list_bookings_for_owner(f.owner, "ALL", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&owner_all), vec![mine.id]);

    let outsider_owned = f
        .engine
        .list_bookings_for_owner(f.outsider, "ALL", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&outsider_owned), vec![theirs.id]);

    // No bookings is an empty list, not an error.
    assert!(
        f.engine
            .list_bookings_for_renter(f.outsider, "ALL", 0, 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn only_all_is_paged() {
    let f = fixture("paging.wal").await;
    let now = now_ms();
    let mut created = Vec::new();
    for i in 0..5 {
        created.push(
            f.engine
                .create_booking(f.renter, f.item, now + (i + 1) * D, now + (i + 2) * D)
                .await
                .unwrap()
                .id,
        );
    }
    created.reverse();

    let first = f
        .engine
        .list_bookings_for_renter(f.renter, "ALL", 0, 2)
        .await
        .unwrap();
    assert_eq!(ids(&first), created[..2].to_vec());
    let second = f
        .engine
        .list_bookings_for_renter(f.renter, "ALL", 2, 2)
        .await
        .unwrap();
    assert_eq!(ids(&second), created[2..4].to_vec());
    let last = f
        .engine
        .list_bookings_for_owner(f.owner, "ALL", 4, 2)
        .await
        .unwrap();
    assert_eq!(ids(&last), created[4..].to_vec());

    // FUTURE ignores the page parameters.
    let future = f
        .engine
        .list_bookings_for_renter(f.renter, "FUTURE", 2, 2)
        .await
        .unwrap();
    assert_eq!(ids(&future), created);
}

#[tokio::test]
async fn unaligned_offset_rounds_down() {
    let f = fixture("paging_unaligned.wal").await;
    let now = now_ms();
    let mut created = Vec::new();
    for i in 0..6 {
        created.push(
            f.engine
                .create_booking(f.renter, f.item, now + (i + 1) * D, now + (i + 2) * D)
                .await
                .unwrap()
                .id,
        );
    }
    created.reverse();

    // offset 3 with limit 2 is page 1, i.e. rows 2..4.
    let page = f
        .engine
        .list_bookings_for_renter(f.renter, "ALL", 3, 2)
        .await
        .unwrap();
    assert_eq!(ids(&page), created[2..4].to_vec());
}

// ── Availability annotations ─────────────────────────────

#[tokio::test]
async fn last_and_next_booking() {
    let f = fixture("last_next.wal").await;
    let now = now_ms();
    let past = f
        .engine
        .create_booking(f.renter, f.item, now - 2 * D, now - D)
        .await
        .unwrap();
    f.engine.decide_booking(f.owner, past.id, true).await.unwrap();
    let future = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();

    let last = f.engine.last_booking(f.item).await.unwrap();
    assert_eq!(last.id, past.id);
    assert_eq!(last.booker_id, f.renter);
    assert_eq!(f.engine.next_booking(f.item).await.unwrap().id, future.id);

    f.engine
        .decide_booking(f.owner, future.id, false)
        .await
        .unwrap();
    assert_eq!(f.engine.next_booking(f.item).await, None);
    assert_eq!(f.engine.last_booking(f.item).await.unwrap().id, past.id);
}

#[tokio::test]
async fn next_booking_has_no_fallback() {
    let f = fixture("next_no_fallback.wal").await;
    let now = now_ms();
    let nearest = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();
    f.engine
        .create_booking(f.renter, f.item, now + 3 * D, now + 4 * D)
        .await
        .unwrap();
    f.engine
        .decide_booking(f.owner, nearest.id, false)
        .await
        .unwrap();
    assert_eq!(f.engine.next_booking(f.item).await, None);
}

#[tokio::test]
async fn last_booking_ignores_unapproved() {
    let f = fixture("last_unapproved.wal").await;
    let now = now_ms();
    f.engine
        .create_booking(f.renter, f.item, now - 2 * D, now - D)
        .await
        .unwrap();
    assert_eq!(f.engine.last_booking(f.item).await, None);
    assert_eq!(f.engine.last_booking(404).await, None);
    assert_eq!(f.engine.next_booking(404).await, None);
}

#[tokio::test]
async fn item_details_annotated_for_owner_only() {
    let f = fixture("item_details.wal").await;
    let now = now_ms();
    let future = f
        .engine
        .create_booking(f.renter, f.item, now + D, now + 2 * D)
        .await
        .unwrap();

    let for_owner = f.engine.item_details(f.owner, f.item).await.unwrap();
    assert_eq!(for_owner.next_booking.map(|b| b.id), Some(future.id));
    assert_eq!(for_owner.last_booking, None);

    let for_renter = f.engine.item_details(f.renter, f.item).await.unwrap();
    assert_eq!(for_renter.item.name, "Ladder");
    assert_eq!(for_renter.next_booking, None);

    assert!(matches!(
        f.engine.item_details(f.owner, 31).await,
        Err(EngineError::NotFound(Entity::Item, 31))
    ));
}

#[tokio::test]
async fn items_for_owner_paged_by_id() {
    let f = fixture("items_for_owner.wal").await;
    let mut expected = vec![f.item];
    for name in ["Drill", "Tent", "Kayak"] {
        expected.push(
            f.engine
                .create_item(f.owner, name.into(), String::new(), true)
                .await
                .unwrap()
                .id,
        );
    }
    f.engine
        .create_item(f.renter, "Bike".into(), String::new(), true)
        .await
        .unwrap();

    let page0: Vec<Id> = f
        .engine
        .items_for_owner(f.owner, 0, 3)
        .await
        .unwrap()
        .iter()
        .map(|d| d.item.id)
        .collect();
    assert_eq!(page0, expected[..3].to_vec());
    let page1 = f.engine.items_for_owner(f.owner, 3, 3).await.unwrap();
    assert_eq!(page1.len(), 1);
    assert_eq!(page1[0].item.id, expected[3]);

    assert!(matches!(
        f.engine.items_for_owner(77, 0, 3).await,
        Err(EngineError::NotFound(Entity::User, 77))
    ));
}

#[tokio::test]
async fn search_matches_available_items_ignoring_case() {
    let f = fixture("search.wal").await;
    let drill = f
        .engine
        .create_item(f.owner, "Cordless DRILL".into(), "18V".into(), true)
        .await
        .unwrap();
    let hidden = f
        .engine
        .create_item(f.owner, "Old drill".into(), String::new(), false)
        .await
        .unwrap();
    let saw = f
        .engine
        .create_item(f.renter, "Saw".into(), "fits a drill bit".into(), true)
        .await
        .unwrap();

    let hits = f.engine.search_items("dRiLl", 0, 10).await.unwrap();
    let hit_ids: Vec<Id> = hits.iter().map(|i| i.id).collect();
    assert_eq!(hit_ids, vec![drill.id, saw.id]);
    assert!(!hit_ids.contains(&hidden.id));

    // Description matches too; the fixture's ladder is "aluminium, 3m".
    let ladder = f.engine.search_items("ALUMINIUM", 0, 10).await.unwrap();
    assert_eq!(ladder.len(), 1);
    assert_eq!(ladder[0].id, f.item);

    let second_page = f.engine.search_items("drill", 1, 1).await.unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].id, saw.id);

    assert!(f.engine.search_items("", 0, 10).await.unwrap().is_empty());
    assert!(f.engine.search_items("kayak", 0, 10).await.unwrap().is_empty());
    assert!(matches!(
        f.engine.search_items("drill", 0, 0).await,
        Err(EngineError::InvalidInput(_))
    ));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state_and_sequences() {
    let path = test_wal_path("replay.wal");
    let now = now_ms();
    let (owner, renter, item, booking) = {
        let engine = Engine::new(path.clone()).unwrap();
        let owner = engine
            .create_user("Olga".into(), "olga@example.com".into())
            .await
            .unwrap()
            .id;
        let renter = engine
            .create_user("Rene".into(), "rene@example.com".into())
            .await
            .unwrap()
            .id;
        let item = engine
            .create_item(owner, "Ladder".into(), String::new(), true)
            .await
            .unwrap()
            .id;
        let booking = engine
            .create_booking(renter, item, now + D, now + 2 * D)
            .await
            .unwrap()
            .id;
        engine.decide_booking(owner, booking, true).await.unwrap();
        (owner, renter, item, booking)
    };

    let engine = Engine::new(path).unwrap();
    let view = engine.get_booking(renter, booking).await.unwrap();
    assert_eq!(view.status, BookingStatus::Approved);
    assert_eq!(view.item.id, item);
    assert_eq!(engine.find_user(owner).unwrap().name, "Olga");

    // Sequences continue after the replayed ids.
    let next_user = engine
        .create_user("Xavi".into(), "xavi@example.com".into())
        .await
        .unwrap();
    assert_eq!(next_user.id, renter + 1);
    assert!(matches!(
        engine
            .create_user("Copy".into(), "rene@example.com".into())
            .await,
        Err(EngineError::AlreadyExists(_))
    ));
    let next_booking = engine
        .create_booking(renter, item, now + 3 * D, now + 4 * D)
        .await
        .unwrap();
    assert_eq!(next_booking.id, booking + 1);
    let owned = engine
        .list_bookings_for_owner(owner, "ALL", 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&owned), vec![next_booking.id, booking]);
}

#[tokio::test]
async fn writes_after_a_torn_tail_survive_restart() {
    use std::io::Write;

    let path = test_wal_path("torn_tail.wal");
    let olga = {
        let engine = Engine::new(path.clone()).unwrap();
        engine
            .create_user("Olga".into(), "olga@example.com".into())
            .await
            .unwrap()
            .id
    };
    {
        // Crash mid-frame: the length says 50 bytes, only two made it to disk.
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        f.write_all(&[50u8, 0, 0, 0, 1, 2]).unwrap();
    }

    let rene = {
        let engine = Engine::new(path.clone()).unwrap();
        assert_eq!(engine.store().user_count(), 1);
        engine
            .create_user("Rene".into(), "rene@example.com".into())
            .await
            .unwrap()
            .id
    };
    assert_eq!(rene, olga + 1);

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.find_user(olga).unwrap().name, "Olga");
    assert_eq!(engine.find_user(rene).unwrap().name, "Rene");
    let next = engine
        .create_user("Xavi".into(), "xavi@example.com".into())
        .await
        .unwrap();
    assert_eq!(next.id, rene + 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let now = now_ms();
    let (renter, booking) = {
        let engine = Engine::new(path.clone()).unwrap();
        let owner = engine
            .create_user("Olga".into(), "olga@example.com".into())
            .await
            .unwrap()
            .id;
        let renter = engine
            .create_user("Rene".into(), "rene@example.com".into())
            .await
            .unwrap()
            .id;
        let item = engine
            .create_item(owner, "Ladder".into(), String::new(), true)
            .await
            .unwrap()
            .id;
        engine.set_item_available(owner, item, false).await.unwrap();
        engine.set_item_available(owner, item, true).await.unwrap();
        let booking = engine
            .create_booking(renter, item, now + D, now + 2 * D)
            .await
            .unwrap()
            .id;
        engine.decide_booking(owner, booking, false).await.unwrap();
        engine.decide_booking(owner, booking, true).await.unwrap();

        assert_eq!(engine.wal_appends_since_compact().await, 8);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        (renter, booking)
    };

    let events = crate::wal::Wal::replay(&path).unwrap();
    // Two users, one item, one booking request and its final decision.
    assert_eq!(events.len(), 5);

    let engine = Engine::new(path).unwrap();
    let view = engine.get_booking(renter, booking).await.unwrap();
    assert_eq!(view.status, BookingStatus::Approved);
    assert!(engine.find_item(view.item.id).await.unwrap().available);
}
