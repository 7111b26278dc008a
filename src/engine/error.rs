use ulid::Ulid;

use crate::store::StoreError;

/// Which part of the request a rejection points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The slot list of a create request as a whole.
    Slots,
    /// One entry of the slot list of a create request.
    Slot(usize),
    /// The single interval of an add or update request.
    StartTime,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Slots => write!(f, "slots"),
            Field::Slot(i) => write!(f, "slots.{i}"),
            Field::StartTime => write!(f, "start_time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NoSlots,
    MalformedInterval { field: Field },
    PastStartTime { field: Field },
    /// Two entries of the same create request overlap.
    IntraRequestConflict { first: usize, second: usize },
    IntraBookingConflict { field: Field, existing: Ulid },
    SystemConflict { field: Field, existing: Ulid },
    Forbidden(Ulid),
    SlotNotInBooking { slot_id: Ulid, booking_id: Ulid },
    NotFound(Ulid),
    LimitExceeded { field: Field, reason: &'static str },
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoSlots => write!(f, "at least one slot is required"),
            EngineError::MalformedInterval { field } => {
                write!(f, "{field}: start must be before end")
            }
            EngineError::PastStartTime { field } => write!(f, "{field}: start must be in the future"),
            EngineError::IntraRequestConflict { first, second } => {
                write!(f, "slots {first} and {second} of the request overlap")
            }
            EngineError::IntraBookingConflict { field, existing } => {
                write!(f, "{field}: overlaps slot {existing} of the same booking")
            }
            EngineError::SystemConflict { field, existing } => {
                write!(f, "{field}: overlaps booked slot {existing}")
            }
            EngineError::Forbidden(id) => write!(f, "no access to booking {id}"),
            EngineError::SlotNotInBooking {
                slot_id,
                booking_id,
            } => write!(f, "slot {slot_id} does not belong to booking {booking_id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded { field, reason } => {
                write!(f, "{field}: limit exceeded: {reason}")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::from_store(e, Field::Slots)
    }
}

/// Validation category of a [`Rejection::ValidationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Required,
    MalformedInterval,
    PastStartTime,
    IntraRequestConflict,
    IntraBookingConflict,
    SystemConflict,
    SlotNotInBooking,
    LimitExceeded,
}

/// Transport-facing failure category. Status codes are the transport's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ValidationFailed { field: String, kind: ValidationKind },
    Forbidden,
    NotFound,
    /// Infrastructure trouble the caller may retry later.
    Unavailable,
}

impl EngineError {
    /// Map a storage error raised at `field`. A uniqueness violation from the
    /// store is the same system-wide conflict the engine's own check reports.
    pub fn from_store(e: StoreError, field: Field) -> Self {
        match e {
            StoreError::Overlap { existing, .. } => EngineError::SystemConflict { field, existing },
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }

    /// Transient infrastructure failure; the engine retries these once.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::Contention))
    }

    pub fn rejection(&self) -> Rejection {
        let validation = |field: String, kind| Rejection::ValidationFailed { field, kind };
        match self {
            EngineError::NoSlots => validation(Field::Slots.to_string(), ValidationKind::Required),
            EngineError::MalformedInterval { field } => {
                validation(field.to_string(), ValidationKind::MalformedInterval)
            }
            EngineError::PastStartTime { field } => {
                validation(field.to_string(), ValidationKind::PastStartTime)
            }
            EngineError::IntraRequestConflict { .. } => {
                validation(Field::Slots.to_string(), ValidationKind::IntraRequestConflict)
            }
            EngineError::IntraBookingConflict { field, .. } => {
                validation(field.to_string(), ValidationKind::IntraBookingConflict)
            }
            EngineError::SystemConflict { field, .. } => {
                validation(field.to_string(), ValidationKind::SystemConflict)
            }
            EngineError::SlotNotInBooking { .. } => {
                validation("slot".to_string(), ValidationKind::SlotNotInBooking)
            }
            EngineError::LimitExceeded { field, .. } => {
                validation(field.to_string(), ValidationKind::LimitExceeded)
            }
            EngineError::Forbidden(_) => Rejection::Forbidden,
            EngineError::NotFound(_) => Rejection::NotFound,
            EngineError::Store(_) => Rejection::Unavailable,
        }
    }

    /// Short label for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            EngineError::NoSlots => "no_slots",
            EngineError::MalformedInterval { .. } => "malformed_interval",
            EngineError::PastStartTime { .. } => "past_start_time",
            EngineError::IntraRequestConflict { .. } => "intra_request_conflict",
            EngineError::IntraBookingConflict { .. } => "intra_booking_conflict",
            EngineError::SystemConflict { .. } => "system_conflict",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::SlotNotInBooking { .. } => "slot_not_in_booking",
            EngineError::NotFound(_) => "not_found",
            EngineError::LimitExceeded { .. } => "limit_exceeded",
            EngineError::Store(_) => "store_error",
        }
    }
}
