use thiserror::Error;

use crate::protocol::AggregationKind;

/// Accumulator misuse. Any of these means the single-owner discipline
/// around window hand-off was broken somewhere.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateError {
    #[error("accumulator already finalized")]
    Finalized,

    #[error("accumulator finalized without any samples")]
    Empty,
}

/// Per-kind reduction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduction {
    Sum { total: u64 },
    Average { total: u64 },
    Peak { max: u32 },
    Min { min: u32 },
}

impl Reduction {
    fn new(kind: AggregationKind) -> Self {
        match kind {
            AggregationKind::Sum => Self::Sum { total: 0 },
            AggregationKind::Average => Self::Average { total: 0 },
            AggregationKind::Peak => Self::Peak { max: 0 },
            AggregationKind::Min => Self::Min { min: u32::MAX },
        }
    }
}

/// Running reduction for one metric name within one window.
///
/// Open until [`Accumulator::finalize`] is called, then terminal. All four
/// reductions are commutative and associative, so the result does not
/// depend on packet arrival order.
#[derive(Debug, Clone)]
pub struct Accumulator {
    kind: AggregationKind,
    sample_count: u64,
    reduction: Reduction,
    finalized: bool,
}

impl Accumulator {
    /// Creates an open accumulator with no samples.
    pub fn new(kind: AggregationKind) -> Self {
        Self {
            kind,
            sample_count: 0,
            reduction: Reduction::new(kind),
            finalized: false,
        }
    }

    /// Creates an accumulator seeded with its first sample.
    pub fn with_first(kind: AggregationKind, count: u32) -> Self {
        let mut acc = Self::new(kind);
        acc.fold(count);
        acc
    }

    /// Kind fixed at creation.
    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    /// Number of samples folded in so far.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Folds one sample into the running reduction.
    pub fn apply(&mut self, count: u32) -> Result<(), InvalidStateError> {
        if self.finalized {
            return Err(InvalidStateError::Finalized);
        }
        self.fold(count);
        Ok(())
    }

    /// Closes the accumulator and returns the reduced value.
    ///
    /// AVERAGE uses truncating integer division.
    pub fn finalize(&mut self) -> Result<u64, InvalidStateError> {
        if self.finalized {
            return Err(InvalidStateError::Finalized);
        }
        if self.sample_count == 0 {
            return Err(InvalidStateError::Empty);
        }
        self.finalized = true;

        let value = match self.reduction {
            Reduction::Sum { total } => total,
            Reduction::Average { total } => total / self.sample_count,
            Reduction::Peak { max } => u64::from(max),
            Reduction::Min { min } => u64::from(min),
        };
        Ok(value)
    }

    fn fold(&mut self, count: u32) {
        let first = self.sample_count == 0;
        self.sample_count = self.sample_count.saturating_add(1);

        match &mut self.reduction {
            Reduction::Sum { total } | Reduction::Average { total } => {
                *total = total.saturating_add(u64::from(count));
            }
            Reduction::Peak { max } => {
                if first || count > *max {
                    *max = count;
                }
            }
            Reduction::Min { min } => {
                if first || count < *min {
                    *min = count;
                }
            }
        }
    }
}
