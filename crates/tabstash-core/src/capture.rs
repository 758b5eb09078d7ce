//! Tab capture collaborator

use tabstash_session::CapturedTab;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureScope {
    CurrentWindow,
    AllWindows,
}

/// Host facility that lists open tabs, in window order.
pub trait TabCapture: Send + Sync {
    fn capture(&self, scope: CaptureScope) -> Result<Vec<CapturedTab>>;
}
