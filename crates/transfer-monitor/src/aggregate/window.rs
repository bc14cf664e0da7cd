use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    Open,
    Closing,
    Closed,
    /// Close-time verification failed; needs an operator acknowledgement.
    Halted,
}

impl WindowPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Halted => "halted",
        }
    }

    pub fn accepts_updates(self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }

    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
                | (Self::Closing, Self::Halted)
                | (Self::Halted, Self::Closed)
                | (Self::Closed, Self::Open)
        )
    }
}

impl fmt::Display for WindowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WindowLifecycle {
    pub window_id: u64,
    pub phase: WindowPhase,
    pub opened_at_ms: u64,
    pub closing_at_ms: Option<u64>,
}

impl WindowLifecycle {
    pub fn new(opened_at_ms: u64) -> Self {
        Self {
            window_id: 1,
            phase: WindowPhase::Open,
            opened_at_ms,
            closing_at_ms: None,
        }
    }

    pub fn advance(&mut self, next: WindowPhase, at_ms: u64) -> Result<()> {
        if !self.phase.can_move_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase.as_str(),
                to: next.as_str(),
            });
        }
        match next {
            WindowPhase::Closing => self.closing_at_ms = Some(at_ms),
            WindowPhase::Open => {
                self.window_id += 1;
                self.opened_at_ms = at_ms;
                self.closing_at_ms = None;
            }
            WindowPhase::Closed | WindowPhase::Halted => {}
        }
        self.phase = next;
        Ok(())
    }
}
