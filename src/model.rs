use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// The authenticated caller, as resolved by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub id: Ulid,
}

impl Owner {
    pub fn new(id: Ulid) -> Self {
        Self { id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner_id: Ulid,
    /// Insertion order. Updates keep a slot in its position.
    pub slots: Vec<Slot>,
}

impl Booking {
    pub fn new(id: Ulid, owner_id: Ulid) -> Self {
        Self {
            id,
            owner_id,
            slots: Vec::new(),
        }
    }

    pub fn slot(&self, slot_id: Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        self.owner_id == owner.id
    }
}

/// Every committed slot in the system, sorted by `span.start`.
///
/// Committed slots never overlap, so sorting by start also sorts by end.
/// `overlapping` relies on that to bound the search on both sides.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    slots: Vec<Slot>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    /// Remove slot by id.
    pub fn remove(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    /// Return only slots whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        // Everything at index >= right starts at or after query.end.
        let right = self.slots.partition_point(|s| s.span.start < query.end);
        // Everything at index < left ends at or before query.start.
        let left = self.slots[..right].partition_point(|s| s.span.end <= query.start);
        self.slots[left..right].iter()
    }
}

/// The event types. Flat, no nesting. A WAL entry is the list of events of
/// one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        id: Ulid,
        owner_id: Ulid,
    },
    BookingDeleted {
        id: Ulid,
        owner_id: Ulid,
    },
    SlotAdded {
        id: Ulid,
        booking_id: Ulid,
        span: Span,
    },
    SlotUpdated {
        id: Ulid,
        booking_id: Ulid,
        span: Span,
    },
}

impl Event {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { id, .. } | Event::BookingDeleted { id, .. } => *id,
            Event::SlotAdded { booking_id, .. } | Event::SlotUpdated { booking_id, .. } => {
                *booking_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: Ms, end: Ms) -> Slot {
        Slot {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.is_well_formed());
        assert!(!Span { start: 200, end: 200 }.is_well_formed());
        assert!(!Span { start: 300, end: 200 }.is_well_formed());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn booking_slot_lookup_and_ownership() {
        let owner = Owner::new(Ulid::new());
        let mut b = Booking::new(Ulid::new(), owner.id);
        let s = Slot {
            id: Ulid::new(),
            booking_id: b.id,
            span: Span::new(0, 10),
        };
        b.slots.push(s);
        assert_eq!(b.slot(s.id), Some(&s));
        assert_eq!(b.slot(Ulid::new()), None);
        assert!(b.is_owned_by(&owner));
        assert!(!b.is_owned_by(&Owner::new(Ulid::new())));
    }

    #[test]
    fn timeline_ordering() {
        let mut t = Timeline::new();
        t.insert(slot(300, 400));
        t.insert(slot(100, 200));
        t.insert(slot(200, 300));
        let starts: Vec<Ms> = t.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn timeline_remove() {
        let mut t = Timeline::new();
        let s = slot(100, 200);
        t.insert(s);
        assert_eq!(t.len(), 1);
        assert_eq!(t.remove(s.id), Some(s));
        assert!(t.is_empty());
        assert_eq!(t.remove(s.id), None);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut t = Timeline::new();
        t.insert(slot(100, 200));
        t.insert(slot(450, 600));
        t.insert(slot(1000, 1100));

        let hits: Vec<_> = t.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut t = Timeline::new();
        t.insert(slot(100, 200));
        t.insert(slot(300, 400));
        let hits: Vec<_> = t.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_query_spanning_several() {
        let mut t = Timeline::new();
        for i in 0..10 {
            t.insert(slot(i * 100, i * 100 + 50));
        }
        let hits: Vec<_> = t.overlapping(&Span::new(240, 560)).collect();
        let starts: Vec<Ms> = hits.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![300, 400, 500]);
    }

    #[test]
    fn overlapping_large_slot_covering_query() {
        let mut t = Timeline::new();
        t.insert(slot(0, 10_000));
        assert_eq!(t.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut t = Timeline::new();
        t.insert(slot(100, 201));
        assert_eq!(t.overlapping(&Span::new(200, 300)).count(), 1);
    }

    #[test]
    fn overlapping_empty_timeline() {
        let t = Timeline::new();
        assert_eq!(t.overlapping(&Span::new(0, 1000)).count(), 0);
    }

    #[test]
    fn event_booking_id() {
        let bid = Ulid::new();
        let e = Event::SlotAdded {
            id: Ulid::new(),
            booking_id: bid,
            span: Span::new(0, 1),
        };
        assert_eq!(e.booking_id(), bid);
        assert_eq!(
            Event::BookingDeleted { id: bid, owner_id: Ulid::new() }.booking_id(),
            bid
        );
    }

    #[test]
    fn event_serialization_roundtrip() {
        let events = vec![
            Event::BookingCreated {
                id: Ulid::new(),
                owner_id: Ulid::new(),
            },
            Event::SlotAdded {
                id: Ulid::new(),
                booking_id: Ulid::new(),
                span: Span::new(10, 20),
            },
        ];
        let bytes = bincode::serialize(&events).unwrap();
        let decoded: Vec<Event> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(events, decoded);
    }
}
