//! Tabstash Undo
//!
//! Bounded stack of reversible operations. The stack lives in memory, is
//! mirrored to the `undoStack` collection through a debounced write, and is
//! rehydrated lazily on first use after a restart.

mod engine;
mod entry;
mod error;
mod scheduler;

pub use engine::{UndoEngine, UndoPhase, DEFAULT_PERSIST_DEBOUNCE};
pub use entry::{UndoAction, UndoEntry, MAX_UNDO_DEPTH};
pub use error::UndoError;
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, Task, TokioScheduler};

pub type Result<T> = std::result::Result<T, UndoError>;
