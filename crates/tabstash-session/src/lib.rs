//! Tabstash Sessions
//!
//! A Session is a named, timestamped collection of tab groups saved
//! explicitly by the user. Sessions are captured once and then only
//! renamed, regrouped, deleted, or replaced wholesale by an import.

mod error;
mod repository;
mod session;

pub use error::SessionError;
pub use repository::SessionRepository;
pub use session::{CapturedTab, Group, Session, SessionPatch, TabSnapshot};

pub type Result<T> = std::result::Result<T, SessionError>;
