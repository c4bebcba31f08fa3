use crate::model::*;

use super::guard::{ensure_participant, now_ms, page, parse_state, validate_page};
use super::{Engine, EngineError, Entity, Scope};

impl Engine {
    pub fn find_user(&self, id: Id) -> Result<User, EngineError> {
        self.store
            .user(id)
            .ok_or(EngineError::NotFound(Entity::User, id))
    }

    pub async fn find_item(&self, id: Id) -> Result<Item, EngineError> {
        self.store
            .item(id)
            .await
            .ok_or(EngineError::NotFound(Entity::Item, id))
    }

    /// A single booking, visible only to the item owner and the booker.
    pub async fn get_booking(
        &self,
        viewer_id: Id,
        booking_id: Id,
    ) -> Result<BookingView, EngineError> {
        self.find_user(viewer_id)?;
        let shared = self
            .store
            .item_of_booking(booking_id)
            .and_then(|item_id| self.store.item_state(item_id))
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let guard = shared.read().await;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        ensure_participant(&guard.item, booking, viewer_id)?;
        Ok(BookingView::new(booking, &guard.item))
    }

    /// Bookings the renter made, filtered by `state`.
    pub async fn list_bookings_for_renter(
        &self,
        renter_id: Id,
        state: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<BookingView>, EngineError> {
        self.find_user(renter_id)?;
        self.list_bookings(Scope::Booker(renter_id), state, offset, limit)
            .await
    }

    /// Bookings on items the owner owns, filtered by `state`.
    pub async fn list_bookings_for_owner(
        &self,
        owner_id: Id,
        state: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<BookingView>, EngineError> {
        self.find_user(owner_id)?;
        self.list_bookings(Scope::Owner(owner_id), state, offset, limit)
            .await
    }

    /// Only ALL is paged; the other states return every match.
    async fn list_bookings(
        &self,
        scope: Scope,
        state: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<BookingView>, EngineError> {
        let state = parse_state(state)?;
        validate_page(offset, limit)?;
        let now = now_ms();
        let views = self.store.select(scope, state, now).await;
        Ok(match state {
            BookingState::All => page(views, offset, limit),
            _ => views,
        })
    }

    pub async fn last_booking(&self, item_id: Id) -> Option<BookingRef> {
        self.store.last_approved_before(item_id, now_ms()).await
    }

    pub async fn next_booking(&self, item_id: Id) -> Option<BookingRef> {
        self.store.earliest_after(item_id, now_ms()).await
    }

    /// An item as shown to `viewer_id`. Only the owner sees the last/next booking.
    pub async fn item_details(&self, viewer_id: Id, item_id: Id) -> Result<ItemDetails, EngineError> {
        let item = self.find_item(item_id).await?;
        if item.owner_id != viewer_id {
            return Ok(ItemDetails {
                item,
                last_booking: None,
                next_booking: None,
            });
        }
        Ok(self.annotate(item, now_ms()).await)
    }

    /// The owner's items by id, paged like the ALL listing, each annotated.
    pub async fn items_for_owner(
        &self,
        owner_id: Id,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ItemDetails>, EngineError> {
        self.find_user(owner_id)?;
        validate_page(offset, limit)?;
        let now = now_ms();

        let mut details = Vec::new();
        for item_id in page(self.store.items_of_owner(owner_id), offset, limit) {
            if let Some(item) = self.store.item(item_id).await {
                details.push(self.annotate(item, now).await);
            }
        }
        Ok(details)
    }

    /// Available items whose name or description contains `text`, ignoring
    /// case. Paged by id after filtering; empty text finds nothing.
    pub async fn search_items(
        &self,
        text: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Item>, EngineError> {
        validate_page(offset, limit)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let needle = text.to_lowercase();

        let mut hits = Vec::new();
        for item_id in self.store.item_ids_sorted() {
            let Some(item) = self.store.item(item_id).await else {
                continue;
            };
            if item.available
                && (item.name.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle))
            {
                hits.push(item);
            }
        }
        Ok(page(hits, offset, limit))
    }

    async fn annotate(&self, item: Item, now: Ms) -> ItemDetails {
        let last_booking = self.store.last_approved_before(item.id, now).await;
        let next_booking = self.store.earliest_after(item.id, now).await;
        ItemDetails {
            item,
            last_booking,
            next_booking,
        }
    }
}
