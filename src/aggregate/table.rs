use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::protocol::{AggregationKind, Sample};

use super::accumulator::{Accumulator, InvalidStateError};

/// What happened when a sample was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sample for this name in the window.
    Created,
    /// Folded into an existing accumulator of the same kind.
    Updated,
    /// Folded into an existing accumulator under its stored kind; the
    /// sample's own kind was ignored.
    KindMismatch {
        stored: AggregationKind,
        received: AggregationKind,
    },
}

/// Thread-safe mapping from metric name to its accumulator for one window.
///
/// Uses `DashMap` so concurrent recorders only contend per shard.
pub struct AccumulatorTable {
    window_start: SystemTime,
    entries: DashMap<Box<[u8]>, Accumulator>,
}

impl AccumulatorTable {
    /// Creates an empty table for a window starting at `window_start`.
    pub fn new(window_start: SystemTime) -> Self {
        Self {
            window_start,
            entries: DashMap::with_capacity(64),
        }
    }

    pub fn window_start(&self) -> SystemTime {
        self.window_start
    }

    /// Number of distinct metric names seen in this window.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a sample, creating the accumulator on first sight of the name.
    ///
    /// Once an accumulator exists, its stored kind wins over the sample's.
    pub fn record_sample(&self, sample: &Sample<'_>) -> Result<RecordOutcome, InvalidStateError> {
        // Fast path: existing name, no key allocation.
        if let Some(mut acc) = self.entries.get_mut(sample.name) {
            return apply_existing(&mut acc, sample);
        }

        match self.entries.entry(Box::from(sample.name)) {
            Entry::Occupied(mut occupied) => apply_existing(occupied.get_mut(), sample),
            Entry::Vacant(vacant) => {
                vacant.insert(Accumulator::with_first(sample.kind, sample.count));
                Ok(RecordOutcome::Created)
            }
        }
    }

    /// Returns a copy of the accumulator for `name`, if present.
    pub fn get(&self, name: &[u8]) -> Option<Accumulator> {
        self.entries.get(name).map(|acc| acc.value().clone())
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, name: &[u8], acc: Accumulator) {
        self.entries.insert(Box::from(name), acc);
    }

    /// Consumes the table, yielding every `(name, accumulator)` pair.
    pub fn into_entries(self) -> impl Iterator<Item = (Box<[u8]>, Accumulator)> {
        self.entries.into_iter()
    }
}

fn apply_existing(
    acc: &mut Accumulator,
    sample: &Sample<'_>,
) -> Result<RecordOutcome, InvalidStateError> {
    acc.apply(sample.count)?;
    if acc.kind() == sample.kind {
        Ok(RecordOutcome::Updated)
    } else {
        Ok(RecordOutcome::KindMismatch {
            stored: acc.kind(),
            received: sample.kind,
        })
    }
}

/// Holder for the table of the currently open window.
///
/// Recorders take a full `Arc` of the current table and must drop it before
/// yielding to the runtime. [`ActiveTable::drain_and_replace`] swaps in a
/// fresh table and then waits for those in-flight recorders, so the table it
/// returns can no longer be written to.
pub struct ActiveTable {
    inner: ArcSwap<AccumulatorTable>,
}

impl ActiveTable {
    pub fn new(window_start: SystemTime) -> Self {
        Self {
            inner: ArcSwap::from_pointee(AccumulatorTable::new(window_start)),
        }
    }

    /// Records a sample into the current window's table.
    pub fn record_sample(&self, sample: &Sample<'_>) -> Result<RecordOutcome, InvalidStateError> {
        let table = self.inner.load_full();
        table.record_sample(sample)
    }

    /// Number of distinct names in the current window.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, name: &[u8], acc: Accumulator) {
        self.inner.load().insert(name, acc);
    }

    /// Start time of the current window.
    pub fn window_start(&self) -> SystemTime {
        self.inner.load().window_start()
    }

    /// Detaches the current table and installs an empty one starting at
    /// `next_window_start`. Every sample recorded concurrently lands in
    /// exactly one of the two tables.
    pub fn drain_and_replace(&self, next_window_start: SystemTime) -> AccumulatorTable {
        let mut detached = self
            .inner
            .swap(Arc::new(AccumulatorTable::new(next_window_start)));

        // Recorders that loaded the old table before the swap still hold a
        // reference; they finish in bounded time.
        loop {
            match Arc::try_unwrap(detached) {
                Ok(table) => return table,
                Err(shared) => {
                    detached = shared;
                    std::thread::yield_now();
                }
            }
        }
    }
}
