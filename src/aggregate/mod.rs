//! Windowed aggregation: per-name accumulators, the active table, the
//! window scheduler and the flush emitter.

pub mod accumulator;
pub mod flush;
pub mod scheduler;
pub mod table;

pub use accumulator::{Accumulator, InvalidStateError};
pub use flush::{FlushEmitter, FlushReport, FlushedMetric};
pub use scheduler::{ClosedWindow, WindowScheduler};
pub use table::{AccumulatorTable, ActiveTable, RecordOutcome};
