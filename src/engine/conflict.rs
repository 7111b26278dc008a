use ulid::Ulid;

use crate::model::*;

use super::{EngineError, Field};

pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// First pair `(i, j)`, `i < j`, of overlapping spans in lexical order.
/// Checks every pair; input order is arbitrary.
pub fn first_overlapping_pair(spans: &[Span]) -> Option<(usize, usize)> {
    for (i, a) in spans.iter().enumerate() {
        for (j, b) in spans.iter().enumerate().skip(i + 1) {
            if a.overlaps(b) {
                return Some((i, j));
            }
        }
    }
    None
}

pub fn any_pairwise_overlap(spans: &[Span]) -> bool {
    first_overlapping_pair(spans).is_some()
}

/// First slot in `scope` overlapping `candidate`, skipping `exclude`.
pub fn find_overlapping<'a>(
    candidate: &Span,
    scope: &'a [Slot],
    exclude: Option<Ulid>,
) -> Option<&'a Slot> {
    scope
        .iter()
        .filter(|s| Some(s.id) != exclude)
        .find(|s| s.span.overlaps(candidate))
}

pub fn exists_overlapping(candidate: &Span, scope: &[Slot], exclude: Option<Ulid>) -> bool {
    find_overlapping(candidate, scope, exclude).is_some()
}

/// Shape check for a proposed slot, in this order: well-formed, strictly
/// after `now`, within limits.
pub(crate) fn validate_span(span: &Span, now: Ms, field: Field) -> Result<(), EngineError> {
    use crate::limits::*;
    if !span.is_well_formed() {
        return Err(EngineError::MalformedInterval { field });
    }
    if span.start <= now {
        return Err(EngineError::PastStartTime { field });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded {
            field,
            reason: "timestamp out of range",
        });
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded {
            field,
            reason: "span too wide",
        });
    }
    Ok(())
}
