// Transgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Per-call state machine

use crate::error::{BridgeError, BridgeResult};

/// Lifecycle states of one transcoded call.
///
/// Cancelled is reachable from every non-terminal state; the ordinary path
/// is Init -> Receiving -> HalfClosed -> Completing -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Init,
    Receiving,
    HalfClosed,
    Completing,
    Closed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Closed | CallState::Cancelled)
    }
}

/// State machine enforcing the call lifecycle invariants: a single
/// half-close, no sends after a terminal state, and a single close.
#[derive(Debug)]
pub struct CallStateMachine {
    state: CallState,
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self { state: CallState::Init }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Sends are rejected once the call reached a terminal state
    pub fn can_send(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Init -> Receiving, when dispatch starts feeding the request stream
    pub fn begin_receiving(&mut self) -> BridgeResult<()> {
        match self.state {
            CallState::Init => {
                self.state = CallState::Receiving;
                Ok(())
            }
            other => Err(self.invalid_transition("begin receiving", other)),
        }
    }

    /// Receiving -> HalfClosed; at most one transition per call
    pub fn half_close(&mut self) -> BridgeResult<()> {
        match self.state {
            CallState::Receiving => {
                self.state = CallState::HalfClosed;
                Ok(())
            }
            other => Err(self.invalid_transition("half-close", other)),
        }
    }

    /// Entering the close sequence; the handler may complete before the
    /// request stream half-closed.
    pub fn begin_completing(&mut self) -> BridgeResult<()> {
        match self.state {
            CallState::Receiving | CallState::HalfClosed => {
                self.state = CallState::Completing;
                Ok(())
            }
            other => Err(self.invalid_transition("begin completing", other)),
        }
    }

    /// Completing -> Closed; trailers are written exactly on this
    /// transition
    pub fn close(&mut self) -> BridgeResult<()> {
        match self.state {
            CallState::Completing => {
                self.state = CallState::Closed;
                Ok(())
            }
            other => Err(self.invalid_transition("close", other)),
        }
    }

    /// Cancel from any non-terminal state; terminal states are untouched
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = CallState::Cancelled;
        }
    }

    fn invalid_transition(&self, action: &str, from: CallState) -> BridgeError {
        BridgeError::IllegalState {
            message: format!("cannot {} from call state {:?}", action, from),
        }
    }
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
