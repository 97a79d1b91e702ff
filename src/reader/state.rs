use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the reader module: `Init -> Ready -> Scanning -> Stopped -> Closed`.
///
/// `Stopped` can go back to `Scanning`, and `Closed` back to `Ready` through a
/// fresh `init_device`, which is what happens when the app is backgrounded and
/// resumed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReaderState {
    Init,
    Ready,
    Scanning,
    Stopped,
    Closed,
}

impl Default for ReaderState {
    fn default() -> Self {
        ReaderState::Init
    }
}

impl ReaderState {
    /// The power rail is on and the serial link is open.
    pub fn is_powered(self) -> bool {
        matches!(
            self,
            ReaderState::Ready | ReaderState::Scanning | ReaderState::Stopped
        )
    }

    pub fn can_open(self) -> bool {
        matches!(self, ReaderState::Init | ReaderState::Closed)
    }

    pub fn can_start_scan(self) -> bool {
        matches!(self, ReaderState::Ready | ReaderState::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReaderState::Init => "init",
            ReaderState::Ready => "ready",
            ReaderState::Scanning => "scanning",
            ReaderState::Stopped => "stopped",
            ReaderState::Closed => "closed",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_states_are_powered() {
        assert!(!ReaderState::Init.is_powered());
        assert!(ReaderState::Ready.is_powered());
        assert!(ReaderState::Scanning.is_powered());
        assert!(ReaderState::Stopped.is_powered());
        assert!(!ReaderState::Closed.is_powered());
    }

    #[test]
    fn scan_can_restart_after_stop_but_not_while_running() {
        assert!(ReaderState::Stopped.can_start_scan());
        assert!(!ReaderState::Scanning.can_start_scan());
        assert!(!ReaderState::Closed.can_start_scan());
    }
}
