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

//! Write-side flow adapter: pull-based payload sink to push-based message
//! writes with a ready/drain signal

use crate::codec::MessageEncoder;
use crate::error::{BridgeError, BridgeResult};
use hyper::body::Bytes;
use serde_json::Value;
use std::sync::Arc;

/// The payload sink a call's response payloads are written into
pub trait MessageSink: Send {
    fn write(&mut self, payload: Bytes, end_of_stream: bool) -> BridgeResult<()>;
    fn write_queue_full(&self) -> bool;
    fn reset(&mut self, code: u32);
}

/// Turns the pull-based sink into a push-based writer with an advisory
/// ready flag.
///
/// Writes proceed regardless of `ready`; callers treat `is_ready` as a
/// backpressure hint, not a gate. `check_ready` reports a genuine
/// false-to-true transition exactly once, which is when the owner fires
/// the listener's ready callback.
pub struct WriteStreamAdapter {
    ready: bool,
    sink: Option<Box<dyn MessageSink>>,
    encoder: Option<Arc<dyn MessageEncoder>>,
}

impl WriteStreamAdapter {
    pub fn new() -> Self {
        Self {
            ready: false,
            sink: None,
            encoder: None,
        }
    }

    /// Attach the payload sink and encoder
    pub fn init(&mut self, sink: Box<dyn MessageSink>, encoder: Arc<dyn MessageEncoder>) -> BridgeResult<()> {
        if self.sink.is_some() {
            return Err(BridgeError::IllegalState {
                message: "write adapter initialized twice".to_string(),
            });
        }
        self.sink = Some(sink);
        self.encoder = Some(encoder);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Encode and write one message, then recompute the ready flag from
    /// the sink's queue state
    pub fn write(&mut self, message: &Value, end_of_stream: bool) -> BridgeResult<()> {
        let encoder = self.encoder.as_ref().ok_or_else(|| BridgeError::IllegalState {
            message: "write before write adapter init".to_string(),
        })?;
        let payload = encoder.encode(message)?;
        self.write_raw(payload, end_of_stream)
    }

    /// Write a pre-encoded payload
    pub fn write_raw(&mut self, payload: Bytes, end_of_stream: bool) -> BridgeResult<()> {
        let sink = self.sink.as_mut().ok_or_else(|| BridgeError::IllegalState {
            message: "write before write adapter init".to_string(),
        })?;
        sink.write(payload, end_of_stream)?;
        self.ready = !sink.write_queue_full();
        Ok(())
    }

    /// Drain notification from the sink. Returns true exactly when the
    /// flag genuinely transitions from not-ready to ready; never fires
    /// spuriously while already ready.
    pub fn check_ready(&mut self) -> bool {
        if self.ready {
            return false;
        }
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };
        if sink.write_queue_full() {
            return false;
        }
        self.ready = true;
        true
    }

    /// Force a transport-level reset on the sink
    pub fn reset(&mut self, code: u32) {
        if let Some(sink) = self.sink.as_mut() {
            sink.reset(code);
        }
    }
}

impl Default for WriteStreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}
