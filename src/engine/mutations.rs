use tokio::sync::oneshot;
use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::guard::{decide, ensure_not_owner, ensure_owner, validate_span, validate_text};
use super::store::snapshot;
use super::{Engine, EngineError, Entity, WalCommand};

impl Engine {
    pub async fn create_user(&self, name: String, email: String) -> Result<User, EngineError> {
        validate_text(&name, "name", MAX_NAME_LEN, "user name too long")?;
        validate_text(&email, "email", MAX_EMAIL_LEN, "email too long")?;
        if !email.contains('@') {
            return Err(EngineError::InvalidInput(format!("malformed email: {email}")));
        }
        if self.store.user_count() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let _commit = self.commit_gate.read().await;
        let id = self.store.allocate_user_id();
        if !self.store.reserve_email(&email, id) {
            return Err(EngineError::AlreadyExists(format!("email {email}")));
        }
        let user = User { id, name, email };
        let event = Event::UserRegistered {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_email(&user.email);
            return Err(e);
        }
        self.store.insert_user(user.clone());
        debug!("registered user {}", user.id);
        Ok(user)
    }

    pub async fn create_item(
        &self,
        owner_id: Id,
        name: String,
        description: String,
        available: bool,
    ) -> Result<Item, EngineError> {
        self.find_user(owner_id)?;
        validate_text(&name, "name", MAX_NAME_LEN, "item name too long")?;
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("item description too long"));
        }
        if self.store.item_count() >= MAX_ITEMS {
            return Err(EngineError::LimitExceeded("too many items"));
        }

        let _commit = self.commit_gate.read().await;
        let item = Item {
            id: self.store.allocate_item_id(),
            owner_id,
            name,
            description,
            available,
        };
        self.wal_append(&Event::ItemListed {
            id: item.id,
            owner_id,
            name: item.name.clone(),
            description: item.description.clone(),
            available,
        })
        .await?;
        self.store.insert_item(ItemState::new(item.clone()));
        debug!("listed item {} for owner {owner_id}", item.id);
        Ok(item)
    }

    /// Owners withdraw or relist an item.
    pub async fn set_item_available(
        &self,
        user_id: Id,
        item_id: Id,
        available: bool,
    ) -> Result<Item, EngineError> {
        let _commit = self.commit_gate.read().await;
        let shared = self
            .store
            .item_state(item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        self.find_user(user_id)?;
        let mut guard = shared.write().await;
        ensure_owner(&guard.item, user_id)?;

        if guard.item.available != available {
            let event = Event::ItemAvailabilityChanged {
                id: item_id,
                available,
            };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(guard.item.clone())
    }

    /// A renter asks to book an item. The booking starts out WAITING.
    pub async fn create_booking(
        &self,
        renter_id: Id,
        item_id: Id,
        start: Ms,
        end: Ms,
    ) -> Result<BookingView, EngineError> {
        let _commit = self.commit_gate.read().await;
        let shared = self
            .store
            .item_state(item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        self.find_user(renter_id)?;

        let mut guard = shared.write().await;
        ensure_not_owner(&guard.item, renter_id)?;
        if !guard.item.available {
            return Err(EngineError::InvalidState(format!(
                "item {item_id} is not available"
            )));
        }
        let span = Span::new(start, end);
        validate_span(&span)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }

        let id = self.store.allocate_booking_id();
        let event = Event::BookingRequested {
            id,
            item_id,
            booker_id: renter_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let booking = guard
            .booking(id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        debug!("booking {id} requested on item {item_id} by user {renter_id}");
        Ok(BookingView::new(booking, &guard.item))
    }

    /// The item owner approves or rejects a booking.
    ///
    /// The status check and the write both happen under the item's write lock,
    /// so of two identical concurrent decisions only one succeeds.
    pub async fn decide_booking(
        &self,
        decider_id: Id,
        booking_id: Id,
        approve: bool,
    ) -> Result<BookingView, EngineError> {
        let _commit = self.commit_gate.read().await;
        let item_id = self
            .store
            .item_of_booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        self.find_user(decider_id)?;
        let shared = self
            .store
            .item_state(item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;

        let mut guard = shared.write().await;
        let current = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?
            .status;
        ensure_owner(&guard.item, decider_id)?;
        let status = decide(current, approve)?;

        let event = Event::BookingDecided {
            id: booking_id,
            item_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        debug!("booking {booking_id}: {current} -> {status} by user {decider_id}");
        Ok(BookingView::new(booking, &guard.item))
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _commit = self.commit_gate.write().await;
        let events = snapshot(&self.store).await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
