//! Persistence seam for the booking engine.
//!
//! The engine only talks to storage through these traits. A mutating request
//! opens one [`Transaction`] via [`Store::begin`], reads and stages writes
//! through the repository methods, and either commits or drops it. Dropping
//! an uncommitted transaction discards every staged write.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Booking, Slot, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transient: the transaction could not be serialized against concurrent
    /// writers (lock timeout, serialization failure). Safe to retry.
    Contention,
    NotFound(Ulid),
    /// The time-range uniqueness constraint rejected `slot`, which overlaps
    /// the already committed `existing`.
    Overlap { slot: Ulid, existing: Ulid },
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Contention => write!(f, "transaction contention, retry"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Overlap { slot, existing } => {
                write!(f, "slot {slot} overlaps committed slot {existing}")
            }
            StoreError::Io(e) => write!(f, "storage I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Slot reads and writes inside a transaction.
#[async_trait]
pub trait SlotRepository: Send {
    /// Slots of one booking, in booking order. Empty if the booking is absent.
    async fn find_by_booking(&mut self, booking_id: Ulid) -> Result<Vec<Slot>, StoreError>;

    /// Every slot in the system whose span overlaps `span`.
    async fn find_overlapping(&mut self, span: Span) -> Result<Vec<Slot>, StoreError>;

    async fn find_slot(&mut self, slot_id: Ulid) -> Result<Option<Slot>, StoreError>;

    async fn create_slot(&mut self, booking_id: Ulid, span: Span) -> Result<Slot, StoreError>;

    /// Move an existing slot to `span`, keeping its id and booking.
    async fn update_slot(&mut self, slot_id: Ulid, span: Span) -> Result<Slot, StoreError>;
}

/// Booking reads and writes inside a transaction.
#[async_trait]
pub trait BookingRepository: Send {
    async fn create_booking(&mut self, owner_id: Ulid) -> Result<Booking, StoreError>;

    async fn find_booking(&mut self, booking_id: Ulid) -> Result<Option<Booking>, StoreError>;

    /// Delete a booking together with all of its slots.
    async fn delete_booking(&mut self, booking_id: Ulid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Transaction: SlotRepository + BookingRepository {
    /// Make every staged write durable and visible, or none of them.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Start a serializable transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    // Snapshot reads. These never wait on a writer.

    async fn booking(&self, booking_id: Ulid) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_owner(&self, owner_id: Ulid) -> Result<Vec<Booking>, StoreError>;

    async fn slot(&self, slot_id: Ulid) -> Result<Option<Slot>, StoreError>;
}
