use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// All bookings of `owner` with their slots, ordered by id.
    pub async fn list_bookings(&self, owner: &Owner) -> Result<Vec<Booking>, EngineError> {
        Ok(self.store.bookings_for_owner(owner.id).await?)
    }

    pub async fn get_booking(&self, owner: &Owner, booking_id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.is_owned_by(owner) {
            return Err(EngineError::Forbidden(booking_id));
        }
        Ok(booking)
    }
}
