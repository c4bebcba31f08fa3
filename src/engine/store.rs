use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;

use crate::model::*;

use super::availability;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// Whose bookings a listing is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Bookings the user made.
    Booker(Id),
    /// Bookings on items the user owns.
    Owner(Id),
}

/// In-memory booking store: users, items with their bookings, and the
/// indexes the state-scoped queries walk.
pub struct Store {
    users: DashMap<Id, User>,
    emails: DashMap<String, Id>,
    items: DashMap<Id, SharedItemState>,
    /// Reverse lookup: booking id → item id.
    booking_to_item: DashMap<Id, Id>,
    /// Owner → item ids, ascending.
    owner_items: DashMap<Id, Vec<Id>>,
    /// Booker → ids of items they have booked, ascending, deduplicated.
    booker_items: DashMap<Id, Vec<Id>>,
    next_user_id: AtomicU64,
    next_item_id: AtomicU64,
    next_booking_id: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn push_sorted_unique(ids: &mut Vec<Id>, id: Id) {
    if let Err(pos) = ids.binary_search(&id) {
        ids.insert(pos, id);
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            items: DashMap::new(),
            booking_to_item: DashMap::new(),
            owner_items: DashMap::new(),
            booker_items: DashMap::new(),
            next_user_id: AtomicU64::new(1),
            next_item_id: AtomicU64::new(1),
            next_booking_id: AtomicU64::new(1),
        }
    }

    // ── Id sequences ─────────────────────────────────────────

    pub fn allocate_user_id(&self) -> Id {
        self.next_user_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn allocate_item_id(&self) -> Id {
        self.next_item_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn allocate_booking_id(&self) -> Id {
        self.next_booking_id.fetch_add(1, Ordering::SeqCst)
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user(&self, id: Id) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    /// Claim `email` for user `id`. False if another user already holds it.
    pub fn reserve_email(&self, email: &str, id: Id) -> bool {
        match self.emails.entry(email.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    pub fn release_email(&self, email: &str) {
        self.emails.remove(email);
    }

    pub fn insert_user(&self, user: User) {
        self.next_user_id.fetch_max(user.id + 1, Ordering::SeqCst);
        self.emails.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
    }

    pub fn users_sorted(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    // ── Items ────────────────────────────────────────────────

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn item_state(&self, id: Id) -> Option<SharedItemState> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    pub async fn item(&self, id: Id) -> Option<Item> {
        let state = self.item_state(id)?;
        let guard = state.read().await;
        Some(guard.item.clone())
    }

    /// Register an item (with any bookings it already carries) and index it.
    pub fn insert_item(&self, state: ItemState) {
        let item_id = state.item.id;
        self.next_item_id.fetch_max(item_id + 1, Ordering::SeqCst);
        push_sorted_unique(&mut self.owner_items.entry(state.item.owner_id).or_default(), item_id);
        for booking in &state.bookings {
            self.index_booking(booking);
        }
        self.items.insert(item_id, Arc::new(RwLock::new(state)));
    }

    pub fn items_of_owner(&self, owner_id: Id) -> Vec<Id> {
        self.owner_items
            .get(&owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn item_ids_sorted(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.items.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn item_of_booking(&self, booking_id: Id) -> Option<Id> {
        self.booking_to_item.get(&booking_id).map(|e| *e.value())
    }

    /// Record a booking in the lookup indexes. The booking itself lives in its `ItemState`.
    pub fn index_booking(&self, booking: &Booking) {
        self.next_booking_id
            .fetch_max(booking.id + 1, Ordering::SeqCst);
        self.booking_to_item.insert(booking.id, booking.item_id);
        push_sorted_unique(
            &mut self.booker_items.entry(booking.booker_id).or_default(),
            booking.item_id,
        );
    }

    fn scope_items(&self, scope: Scope) -> Vec<Id> {
        match scope {
            Scope::Owner(owner_id) => self.items_of_owner(owner_id),
            Scope::Booker(booker_id) => self
                .booker_items
                .get(&booker_id)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
        }
    }

    /// The state-scoped query: every booking in `scope` that falls into `state` at `now`.
    ///
    /// CURRENT is ordered by id ascending, every other state by id descending.
    /// No paging happens here.
    pub async fn select(&self, scope: Scope, state: BookingState, now: Ms) -> Vec<BookingView> {
        let mut views = Vec::new();
        for item_id in self.scope_items(scope) {
            let Some(shared) = self.item_state(item_id) else {
                continue;
            };
            let guard = shared.read().await;
            for booking in &guard.bookings {
                let in_scope = match scope {
                    Scope::Booker(id) => booking.booker_id == id,
                    Scope::Owner(id) => guard.item.owner_id == id,
                };
                if in_scope && state.matches(booking, now) {
                    views.push(BookingView::new(booking, &guard.item));
                }
            }
        }

        if state == BookingState::Current {
            views.sort_by_key(|v| v.id);
        } else {
            views.sort_by(|a, b| b.id.cmp(&a.id));
        }
        views
    }

    /// Latest-starting APPROVED booking on the item that started before `now`.
    pub async fn last_approved_before(&self, item_id: Id, now: Ms) -> Option<BookingRef> {
        let shared = self.item_state(item_id)?;
        let guard = shared.read().await;
        availability::last_booking(&guard, now).map(BookingRef::from)
    }

    /// Earliest booking on the item starting after `now`, unless it was rejected.
    pub async fn earliest_after(&self, item_id: Id, now: Ms) -> Option<BookingRef> {
        let shared = self.item_state(item_id)?;
        let guard = shared.read().await;
        availability::next_booking(&guard, now).map(BookingRef::from)
    }
}

/// Apply an item-scoped event to its `ItemState` (caller holds the lock).
pub(super) fn apply_to_item(state: &mut ItemState, event: &Event) {
    match event {
        Event::ItemAvailabilityChanged { available, .. } => {
            state.item.available = *available;
        }
        Event::BookingRequested {
            id,
            item_id,
            booker_id,
            span,
        } => state.insert_booking(Booking {
            id: *id,
            item_id: *item_id,
            booker_id: *booker_id,
            span: *span,
            status: BookingStatus::Waiting,
        }),
        Event::BookingDecided { id, status, .. } => {
            if let Some(booking) = state.booking_mut(*id) {
                booking.status = *status;
            }
        }
        // Users and new items are registered at the store level.
        Event::UserRegistered { .. } | Event::ItemListed { .. } => {}
    }
}

/// The item an event belongs to, for item-scoped events.
pub(super) fn event_item_id(event: &Event) -> Option<Id> {
    match event {
        Event::ItemAvailabilityChanged { id, .. } => Some(*id),
        Event::BookingRequested { item_id, .. } | Event::BookingDecided { item_id, .. } => {
            Some(*item_id)
        }
        Event::UserRegistered { .. } | Event::ItemListed { .. } => None,
    }
}

/// Rebuild a store from a replayed event log.
///
/// Item state is assembled in plain maps first and only then shared behind
/// locks, so replay never touches a lock.
pub(super) fn rebuild(events: &[Event]) -> Store {
    let store = Store::new();
    let mut items: HashMap<Id, ItemState> = HashMap::new();

    for event in events {
        match event {
            Event::UserRegistered { id, name, email } => store.insert_user(User {
                id: *id,
                name: name.clone(),
                email: email.clone(),
            }),
            Event::ItemListed {
                id,
                owner_id,
                name,
                description,
                available,
            } => {
                items.insert(
                    *id,
                    ItemState::new(Item {
                        id: *id,
                        owner_id: *owner_id,
                        name: name.clone(),
                        description: description.clone(),
                        available: *available,
                    }),
                );
            }
            other => {
                if let Some(state) = event_item_id(other).and_then(|id| items.get_mut(&id)) {
                    apply_to_item(state, other);
                }
            }
        }
    }

    for (_, state) in items {
        store.insert_item(state);
    }
    store
}

/// The minimal event sequence that recreates the store's current state.
pub(super) async fn snapshot(store: &Store) -> Vec<Event> {
    let mut events: Vec<Event> = store
        .users_sorted()
        .into_iter()
        .map(|u| Event::UserRegistered {
            id: u.id,
            name: u.name,
            email: u.email,
        })
        .collect();

    for item_id in store.item_ids_sorted() {
        let Some(shared) = store.item_state(item_id) else {
            continue;
        };
        let guard = shared.read().await;
        let item = &guard.item;
        events.push(Event::ItemListed {
            id: item.id,
            owner_id: item.owner_id,
            name: item.name.clone(),
            description: item.description.clone(),
            available: item.available,
        });
        for booking in &guard.bookings {
            events.push(Event::BookingRequested {
                id: booking.id,
                item_id: booking.item_id,
                booker_id: booking.booker_id,
                span: booking.span,
            });
            if booking.status != BookingStatus::Waiting {
                events.push(Event::BookingDecided {
                    id: booking.id,
                    item_id: booking.item_id,
                    status: booking.status,
                });
            }
        }
    }
    events
}
