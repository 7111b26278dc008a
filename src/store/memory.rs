use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{BookingRepository, SlotRepository, Store, StoreError, Transaction};

/// Committed state. Readers go through here without touching the timeline lock.
#[derive(Default)]
struct Index {
    bookings: DashMap<Ulid, Booking>,
    /// Reverse lookup: slot id → booking id
    slot_to_booking: DashMap<Ulid, Ulid>,
    /// Owner → booking ids.
    owner_bookings: DashMap<Ulid, Vec<Ulid>>,
}

/// Writer-side state. Holding the lock is holding the right to commit.
struct Ledger {
    timeline: Timeline,
    wal: Option<Wal>,
    compact_threshold: u64,
}

/// Single-timeline store: a sorted slot index guarded by one lock, with an
/// optional write-ahead log for durability.
pub struct InMemoryStore {
    ledger: Arc<Mutex<Ledger>>,
    index: Arc<Index>,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store, no WAL.
    pub fn new() -> Self {
        Self::from_parts(Timeline::new(), Index::default(), None, Config::default())
    }

    /// Durable store backed by `<data_dir>/slotbook.wal`. Replays the log first.
    pub fn open(config: &Config) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::open_wal(&config.wal_path(), config)
    }

    fn open_wal(path: &Path, config: &Config) -> std::io::Result<Self> {
        let commits = Wal::replay(path)?;
        let mut timeline = Timeline::new();
        let index = Index::default();
        let mut skipped = 0;
        for events in &commits {
            let touched = fold_commit(&index, events);
            if let Some((slot, existing)) = find_overlap(&timeline, &touched) {
                warn!(
                    "{}: skipping commit whose slot {slot} overlaps {existing}",
                    path.display()
                );
                skipped += 1;
                continue;
            }
            publish(&mut timeline, &index, touched);
        }
        info!(
            "replayed {} commits from {} ({skipped} skipped): {} bookings, {} slots",
            commits.len(),
            path.display(),
            index.bookings.len(),
            timeline.len()
        );
        let wal = Wal::open(path)?;
        Ok(Self::from_parts(timeline, index, Some(wal), config.clone()))
    }

    fn from_parts(timeline: Timeline, index: Index, wal: Option<Wal>, config: Config) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                timeline,
                wal,
                compact_threshold: config.compact_threshold,
            })),
            index: Arc::new(index),
            lock_timeout: config.lock_timeout,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn booking_count(&self) -> usize {
        self.index.bookings.len()
    }

    pub fn slot_count(&self) -> usize {
        self.index.slot_to_booking.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let acquire = self.ledger.clone().lock_owned();
        let ledger = match tokio::time::timeout(self.lock_timeout, acquire).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!("timeline lock not acquired within {:?}", self.lock_timeout);
                return Err(StoreError::Contention);
            }
        };
        Ok(Box::new(MemoryTransaction {
            ledger,
            index: self.index.clone(),
            staged: HashMap::new(),
            events: Vec::new(),
        }))
    }

    async fn booking(&self, booking_id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.index.bookings.get(&booking_id).map(|b| b.value().clone()))
    }

    async fn bookings_for_owner(&self, owner_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .index
            .owner_bookings
            .get(&owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings: Vec<Booking> = ids
            .iter()
            .filter_map(|id| self.index.bookings.get(id).map(|b| b.value().clone()))
            .collect();
        bookings.sort_by_key(|b| b.id);
        Ok(bookings)
    }

    async fn slot(&self, slot_id: Ulid) -> Result<Option<Slot>, StoreError> {
        let Some(booking_id) = self.index.slot_to_booking.get(&slot_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .index
            .bookings
            .get(&booking_id)
            .and_then(|b| b.slot(slot_id).copied()))
    }
}

/// A transaction holds the timeline lock from `begin` until commit or drop.
/// Writes are staged per booking; nothing touches the index before commit.
pub struct MemoryTransaction {
    ledger: OwnedMutexGuard<Ledger>,
    index: Arc<Index>,
    /// Booking id → staged state. `None` means deleted in this transaction.
    staged: HashMap<Ulid, Option<Booking>>,
    events: Vec<Event>,
}

impl MemoryTransaction {
    fn current_booking(&self, booking_id: Ulid) -> Option<Booking> {
        match self.staged.get(&booking_id) {
            Some(staged) => staged.clone(),
            None => self
                .index
                .bookings
                .get(&booking_id)
                .map(|b| b.value().clone()),
        }
    }

    fn locate_slot(&self, slot_id: Ulid) -> Option<Slot> {
        for booking in self.staged.values().flatten() {
            if let Some(slot) = booking.slot(slot_id) {
                return Some(*slot);
            }
        }
        let booking_id = *self.index.slot_to_booking.get(&slot_id)?;
        if self.staged.contains_key(&booking_id) {
            return None;
        }
        self.index.bookings.get(&booking_id)?.slot(slot_id).copied()
    }

    fn staged_slots(&self) -> impl Iterator<Item = &Slot> {
        self.staged
            .values()
            .flatten()
            .flat_map(|booking| booking.slots.iter())
    }
}

#[async_trait]
impl SlotRepository for MemoryTransaction {
    async fn find_by_booking(&mut self, booking_id: Ulid) -> Result<Vec<Slot>, StoreError> {
        Ok(self
            .current_booking(booking_id)
            .map(|b| b.slots)
            .unwrap_or_default())
    }

    async fn find_overlapping(&mut self, span: Span) -> Result<Vec<Slot>, StoreError> {
        let mut hits: Vec<Slot> = self
            .ledger
            .timeline
            .overlapping(&span)
            .filter(|s| !self.staged.contains_key(&s.booking_id))
            .copied()
            .collect();
        hits.extend(self.staged_slots().filter(|s| s.span.overlaps(&span)).copied());
        hits.sort_by_key(|s| s.span.start);
        Ok(hits)
    }

    async fn find_slot(&mut self, slot_id: Ulid) -> Result<Option<Slot>, StoreError> {
        Ok(self.locate_slot(slot_id))
    }

    async fn create_slot(&mut self, booking_id: Ulid, span: Span) -> Result<Slot, StoreError> {
        let mut booking = self
            .current_booking(booking_id)
            .ok_or(StoreError::NotFound(booking_id))?;
        let slot = Slot {
            id: Ulid::new(),
            booking_id,
            span,
        };
        booking.slots.push(slot);
        self.staged.insert(booking_id, Some(booking));
        self.events.push(Event::SlotAdded {
            id: slot.id,
            booking_id,
            span,
        });
        Ok(slot)
    }

    async fn update_slot(&mut self, slot_id: Ulid, span: Span) -> Result<Slot, StoreError> {
        let slot = self.locate_slot(slot_id).ok_or(StoreError::NotFound(slot_id))?;
        let mut booking = self
            .current_booking(slot.booking_id)
            .ok_or(StoreError::NotFound(slot.booking_id))?;
        let updated = Slot { span, ..slot };
        if let Some(s) = booking.slots.iter_mut().find(|s| s.id == slot_id) {
            *s = updated;
        }
        self.staged.insert(booking.id, Some(booking));
        self.events.push(Event::SlotUpdated {
            id: slot_id,
            booking_id: slot.booking_id,
            span,
        });
        Ok(updated)
    }
}

#[async_trait]
impl BookingRepository for MemoryTransaction {
    async fn create_booking(&mut self, owner_id: Ulid) -> Result<Booking, StoreError> {
        let booking = Booking::new(Ulid::new(), owner_id);
        self.staged.insert(booking.id, Some(booking.clone()));
        self.events.push(Event::BookingCreated {
            id: booking.id,
            owner_id,
        });
        Ok(booking)
    }

    async fn find_booking(&mut self, booking_id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.current_booking(booking_id))
    }

    async fn delete_booking(&mut self, booking_id: Ulid) -> Result<(), StoreError> {
        let booking = self
            .current_booking(booking_id)
            .ok_or(StoreError::NotFound(booking_id))?;
        self.staged.insert(booking_id, None);
        self.events.push(Event::BookingDeleted {
            id: booking_id,
            owner_id: booking.owner_id,
        });
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.events.is_empty() {
            return Ok(());
        }
        if let Some((slot, existing)) = find_overlap(&self.ledger.timeline, &self.staged) {
            return Err(StoreError::Overlap { slot, existing });
        }

        let MemoryTransaction {
            mut ledger,
            index,
            staged,
            events,
        } = *self;

        if let Some(wal) = ledger.wal.as_mut() {
            let started = Instant::now();
            wal.append(&events)?;
            metrics::histogram!(observability::WAL_COMMIT_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            metrics::histogram!(observability::WAL_COMMIT_EVENTS).record(events.len() as f64);
        }

        let ledger = &mut *ledger;
        publish(&mut ledger.timeline, &index, staged);
        debug!("committed {} events", events.len());
        metrics::gauge!(observability::BOOKINGS_ACTIVE).set(index.bookings.len() as f64);
        metrics::gauge!(observability::SLOTS_ACTIVE).set(ledger.timeline.len() as f64);

        ledger.maybe_compact(&index);
        Ok(())
    }
}

impl Ledger {
    /// Rewrite the WAL as one commit per live booking once enough commits piled up.
    /// The commit that triggered this is already durable, so failure only logs.
    fn maybe_compact(&mut self, index: &Index) {
        let Some(wal) = self.wal.as_mut() else {
            return;
        };
        if wal.appends_since_compact() < self.compact_threshold {
            return;
        }
        let commits = snapshot_commits(index);
        match wal.compact(&commits) {
            Ok(()) => info!("compacted {} to {} bookings", wal.path().display(), commits.len()),
            Err(e) => warn!("wal compaction failed: {e}"),
        }
    }
}

fn snapshot_commits(index: &Index) -> Vec<Vec<Event>> {
    index
        .bookings
        .iter()
        .map(|entry| {
            let booking = entry.value();
            let mut events = Vec::with_capacity(booking.slots.len() + 1);
            events.push(Event::BookingCreated {
                id: booking.id,
                owner_id: booking.owner_id,
            });
            events.extend(booking.slots.iter().map(|s| Event::SlotAdded {
                id: s.id,
                booking_id: booking.id,
                span: s.span,
            }));
            events
        })
        .collect()
}

/// Exclusion constraint over time ranges. `touched` holds the new state of
/// every booking a commit writes (`None` = deleted); their committed slots are
/// superseded and ignored. Returns `(slot, existing)` for the first clash.
fn find_overlap(
    timeline: &Timeline,
    touched: &HashMap<Ulid, Option<Booking>>,
) -> Option<(Ulid, Ulid)> {
    let mut slots: Vec<&Slot> = touched
        .values()
        .flatten()
        .flat_map(|b| b.slots.iter())
        .collect();
    for slot in &slots {
        let clash = timeline
            .overlapping(&slot.span)
            .find(|s| !touched.contains_key(&s.booking_id));
        if let Some(existing) = clash {
            return Some((slot.id, existing.id));
        }
    }
    slots.sort_by_key(|s| s.span.start);
    slots
        .windows(2)
        .find(|pair| pair[0].span.overlaps(&pair[1].span))
        .map(|pair| (pair[1].id, pair[0].id))
}

/// Resulting state of every booking one commit touches.
fn fold_commit(index: &Index, events: &[Event]) -> HashMap<Ulid, Option<Booking>> {
    let mut touched: HashMap<Ulid, Option<Booking>> = HashMap::new();
    for event in events {
        let booking_id = event.booking_id();
        let booking = touched
            .entry(booking_id)
            .or_insert_with(|| index.bookings.get(&booking_id).map(|b| b.value().clone()));
        match event {
            Event::BookingCreated { id, owner_id } => {
                *booking = Some(Booking::new(*id, *owner_id));
            }
            Event::BookingDeleted { .. } => {
                *booking = None;
            }
            Event::SlotAdded {
                id,
                booking_id,
                span,
            } => {
                if let Some(b) = booking.as_mut() {
                    b.slots.push(Slot {
                        id: *id,
                        booking_id: *booking_id,
                        span: *span,
                    });
                }
            }
            Event::SlotUpdated { id, span, .. } => {
                if let Some(b) = booking.as_mut()
                    && let Some(s) = b.slots.iter_mut().find(|s| s.id == *id)
                {
                    s.span = *span;
                }
            }
        }
    }
    touched
}

/// Publish the new state of each touched booking. Each booking goes into the
/// index in a single insert, so readers never see half of it. The timeline
/// only changes for slots that moved, appeared or vanished.
fn publish(timeline: &mut Timeline, index: &Index, touched: HashMap<Ulid, Option<Booking>>) {
    let mut removed: Vec<Ulid> = Vec::new();
    let mut added: Vec<Slot> = Vec::new();

    for (id, booking) in touched {
        let new_slots: HashMap<Ulid, Slot> = booking
            .iter()
            .flat_map(|b| b.slots.iter())
            .map(|s| (s.id, *s))
            .collect();
        let previous = match booking {
            Some(b) => {
                let owner_id = b.owner_id;
                let previous = index.bookings.insert(id, b);
                if previous.is_none() {
                    index.owner_bookings.entry(owner_id).or_default().push(id);
                }
                previous
            }
            None => {
                let previous = index.bookings.remove(&id).map(|(_, b)| b);
                if let Some(old) = &previous
                    && let Some(mut ids) = index.owner_bookings.get_mut(&old.owner_id)
                {
                    ids.retain(|b| *b != id);
                }
                previous
            }
        };

        let old_spans: HashMap<Ulid, Span> = previous
            .iter()
            .flat_map(|b| b.slots.iter())
            .map(|s| (s.id, s.span))
            .collect();
        for (slot_id, span) in &old_spans {
            match new_slots.get(slot_id) {
                Some(slot) if slot.span == *span => {}
                Some(_) => removed.push(*slot_id),
                None => {
                    removed.push(*slot_id);
                    index.slot_to_booking.remove(slot_id);
                }
            }
        }
        for slot in new_slots.values() {
            if old_spans.get(&slot.id) != Some(&slot.span) {
                added.push(*slot);
                index.slot_to_booking.insert(slot.id, id);
            }
        }
    }

    // All removals first: a slot may move into a range another one just left.
    for slot_id in removed {
        timeline.remove(slot_id);
    }
    for slot in added {
        timeline.insert(slot);
    }
}
