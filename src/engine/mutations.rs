use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

use super::conflict::{find_overlapping, first_overlapping_pair, validate_span};
use super::{owned_booking, record, reload, Engine, EngineError, Field};

impl Engine {
    /// Create a booking owned by `owner` holding every span in `slots`.
    ///
    /// Checks run in a fixed order and the first failure wins: request shape,
    /// overlaps inside the request, then each span against every committed
    /// slot in input order. Nothing is written unless all spans pass.
    pub async fn create_booking(
        &self,
        owner: &Owner,
        slots: &[Span],
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.create_booking_inner(owner, slots).await;
        record("create_booking", started, &result);
        result
    }

    async fn create_booking_inner(
        &self,
        owner: &Owner,
        slots: &[Span],
    ) -> Result<Booking, EngineError> {
        if slots.is_empty() {
            return Err(EngineError::NoSlots);
        }
        if slots.len() > MAX_SLOTS_PER_REQUEST {
            return Err(EngineError::LimitExceeded {
                field: Field::Slots,
                reason: "too many slots in request",
            });
        }
        let now = self.now();
        for (i, span) in slots.iter().enumerate() {
            validate_span(span, now, Field::Slot(i))?;
        }
        if let Some((first, second)) = first_overlapping_pair(slots) {
            return Err(EngineError::IntraRequestConflict { first, second });
        }

        let booking = self
            .with_retry("create_booking", || self.try_create_booking(owner, slots))
            .await?;
        info!(
            "booking {} created for owner {} with {} slots",
            booking.id,
            owner.id,
            booking.slots.len()
        );
        Ok(booking)
    }

    async fn try_create_booking(
        &self,
        owner: &Owner,
        slots: &[Span],
    ) -> Result<Booking, EngineError> {
        let mut tx = self.store.begin().await?;
        for (i, span) in slots.iter().enumerate() {
            let hits = tx.find_overlapping(*span).await?;
            if let Some(existing) = find_overlapping(span, &hits, None) {
                return Err(EngineError::SystemConflict {
                    field: Field::Slot(i),
                    existing: existing.id,
                });
            }
        }

        let booking = tx.create_booking(owner.id).await?;
        for span in slots {
            tx.create_slot(booking.id, *span).await?;
        }
        let booking = reload(tx.as_mut(), booking.id).await?;

        if let Err(e) = tx.commit().await {
            let field = match &e {
                StoreError::Overlap { slot, .. } => booking
                    .slots
                    .iter()
                    .position(|s| s.id == *slot)
                    .map_or(Field::Slots, Field::Slot),
                _ => Field::Slots,
            };
            return Err(EngineError::from_store(e, field));
        }
        Ok(booking)
    }

    /// Add one slot to an existing booking of `owner`.
    pub async fn add_slot(
        &self,
        owner: &Owner,
        booking_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let now = self.now();
        let result = self
            .with_retry("add_slot", || self.try_add_slot(owner, booking_id, span, now))
            .await;
        if result.is_ok() {
            info!("slot [{}, {}) added to booking {booking_id}", span.start, span.end);
        }
        record("add_slot", started, &result);
        result
    }

    async fn try_add_slot(
        &self,
        owner: &Owner,
        booking_id: Ulid,
        span: Span,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let mut tx = self.store.begin().await?;
        let booking = owned_booking(tx.as_mut(), owner, booking_id).await?;
        validate_span(&span, now, Field::StartTime)?;

        let siblings = tx.find_by_booking(booking.id).await?;
        if let Some(existing) = find_overlapping(&span, &siblings, None) {
            return Err(EngineError::IntraBookingConflict {
                field: Field::StartTime,
                existing: existing.id,
            });
        }
        let hits = tx.find_overlapping(span).await?;
        if let Some(existing) = find_overlapping(&span, &hits, None) {
            return Err(EngineError::SystemConflict {
                field: Field::StartTime,
                existing: existing.id,
            });
        }
        if siblings.len() >= MAX_SLOTS_PER_BOOKING {
            return Err(EngineError::LimitExceeded {
                field: Field::StartTime,
                reason: "too many slots in booking",
            });
        }

        tx.create_slot(booking.id, span).await?;
        let booking = reload(tx.as_mut(), booking.id).await?;
        tx.commit()
            .await
            .map_err(|e| EngineError::from_store(e, Field::StartTime))?;
        Ok(booking)
    }

    /// Move `slot_id` of `booking_id` to `span`. The slot keeps its id and its
    /// place in the booking, and never conflicts with its own old position.
    pub async fn update_slot(
        &self,
        owner: &Owner,
        booking_id: Ulid,
        slot_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let now = self.now();
        let result = self
            .with_retry("update_slot", || {
                self.try_update_slot(owner, booking_id, slot_id, span, now)
            })
            .await;
        if result.is_ok() {
            info!(
                "slot {slot_id} of booking {booking_id} moved to [{}, {})",
                span.start, span.end
            );
        }
        record("update_slot", started, &result);
        result
    }

    async fn try_update_slot(
        &self,
        owner: &Owner,
        booking_id: Ulid,
        slot_id: Ulid,
        span: Span,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let mut tx = self.store.begin().await?;
        let booking = owned_booking(tx.as_mut(), owner, booking_id).await?;
        let slot = tx
            .find_slot(slot_id)
            .await?
            .ok_or(EngineError::NotFound(slot_id))?;
        if slot.booking_id != booking.id {
            return Err(EngineError::SlotNotInBooking {
                slot_id,
                booking_id,
            });
        }
        validate_span(&span, now, Field::StartTime)?;

        let siblings = tx.find_by_booking(booking.id).await?;
        if let Some(existing) = find_overlapping(&span, &siblings, Some(slot.id)) {
            return Err(EngineError::IntraBookingConflict {
                field: Field::StartTime,
                existing: existing.id,
            });
        }
        let hits = tx.find_overlapping(span).await?;
        if let Some(existing) = find_overlapping(&span, &hits, Some(slot.id)) {
            return Err(EngineError::SystemConflict {
                field: Field::StartTime,
                existing: existing.id,
            });
        }

        tx.update_slot(slot.id, span).await?;
        let booking = reload(tx.as_mut(), booking.id).await?;
        tx.commit()
            .await
            .map_err(|e| EngineError::from_store(e, Field::StartTime))?;
        Ok(booking)
    }

    /// Delete a booking of `owner` together with all of its slots.
    pub async fn delete_booking(&self, owner: &Owner, booking_id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .with_retry("delete_booking", || self.try_delete_booking(owner, booking_id))
            .await;
        if let Ok(slots) = &result {
            info!("booking {booking_id} deleted with {slots} slots");
        }
        record("delete_booking", started, &result);
        result.map(|_| ())
    }

    async fn try_delete_booking(&self, owner: &Owner, booking_id: Ulid) -> Result<usize, EngineError> {
        let mut tx = self.store.begin().await?;
        let booking = owned_booking(tx.as_mut(), owner, booking_id).await?;
        tx.delete_booking(booking.id).await?;
        tx.commit().await?;
        Ok(booking.slots.len())
    }
}
