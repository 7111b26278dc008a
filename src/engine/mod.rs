mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{
    any_pairwise_overlap, exists_overlapping, find_overlapping, first_overlapping_pair, overlaps,
};
pub use error::{EngineError, Field, Rejection, ValidationKind};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::observability::{self, conflict_scope, outcome_label};
use crate::store::{Store, Transaction};

/// Booking mutation orchestrator. Every mutation runs as one store
/// transaction: validate, check conflicts, write, commit. A rejection drops
/// the transaction before anything is committed.
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_system_clock(store: Arc<dyn Store>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    pub(super) fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Run one transactional attempt, retrying once on transient contention.
    /// Semantic rejections are returned as-is.
    pub(super) async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        mut attempt: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        match attempt().await {
            Err(e) if e.is_transient() => {
                warn!("{op}: {e}; retrying once");
                metrics::counter!(observability::TRANSACTION_RETRIES_TOTAL, "op" => op)
                    .increment(1);
                attempt().await
            }
            other => other,
        }
    }
}

/// Load a booking inside `tx` and check that `owner` may touch it.
pub(super) async fn owned_booking(
    tx: &mut dyn Transaction,
    owner: &Owner,
    booking_id: Ulid,
) -> Result<Booking, EngineError> {
    let booking = tx
        .find_booking(booking_id)
        .await?
        .ok_or(EngineError::NotFound(booking_id))?;
    if !booking.is_owned_by(owner) {
        return Err(EngineError::Forbidden(booking_id));
    }
    Ok(booking)
}

/// Re-read a booking after staging writes so the caller gets the new state.
pub(super) async fn reload(
    tx: &mut dyn Transaction,
    booking_id: Ulid,
) -> Result<Booking, EngineError> {
    tx.find_booking(booking_id)
        .await?
        .ok_or(EngineError::NotFound(booking_id))
}

pub(super) fn record<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    metrics::counter!(
        observability::MUTATIONS_TOTAL,
        "op" => op,
        "outcome" => outcome_label(result)
    )
    .increment(1);
    metrics::histogram!(observability::MUTATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        if let Some(scope) = conflict_scope(e) {
            metrics::counter!(observability::CONFLICTS_TOTAL, "scope" => scope).increment(1);
        }
        debug!("{op} rejected: {e}");
    }
}
