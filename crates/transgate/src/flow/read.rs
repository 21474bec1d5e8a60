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

//! Read-side flow adapter: push-based payload source to credit-based
//! message delivery

use crate::codec::MessageDecoder;
use crate::error::{BridgeError, BridgeResult};
use hyper::body::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// A push-based payload source that also honors pull-side demand.
///
/// `fetch` registers additional demand with the source and returns any
/// payloads that are already available (at most `demand`); later payloads
/// arrive through the adapter's `on_data`. `pause` asks the source to stop
/// pushing until further demand is fetched.
pub trait MessageSource: Send {
    fn fetch(&mut self, demand: u64) -> Vec<Bytes>;
    fn pause(&mut self);
}

/// Decoded events the adapter hands to the owning call for listener
/// dispatch. Keeping delivery out of the adapter leaves one dispatch path
/// and no swappable handler fields.
#[derive(Debug, PartialEq)]
pub enum ReadEvent {
    Message(Value),
    End,
}

/// Turns a push-based payload source into the credit-driven message stream
/// the call listener consumes.
///
/// Demand issued before the source is attached accumulates and is fetched
/// exactly once on attach; afterwards every new request is forwarded
/// directly. Payloads beyond the consumer's credit queue FIFO and pause
/// the source. Nothing is delivered before `init`, and nothing after the
/// end event has fired.
pub struct ReadStreamAdapter {
    credit: u64,
    unforwarded: u64,
    queue: VecDeque<Bytes>,
    source: Option<Box<dyn MessageSource>>,
    decoder: Option<Arc<dyn MessageDecoder>>,
    end_pending: bool,
    end_delivered: bool,
}

impl ReadStreamAdapter {
    pub fn new() -> Self {
        Self {
            credit: 0,
            unforwarded: 0,
            queue: VecDeque::new(),
            source: None,
            decoder: None,
            end_pending: false,
            end_delivered: false,
        }
    }

    /// Increase outstanding demand by `n`
    pub fn request(&mut self, n: u64) -> BridgeResult<Vec<ReadEvent>> {
        self.credit = self.credit.saturating_add(n);
        self.unforwarded = self.unforwarded.saturating_add(n);
        self.pump()
    }

    /// Attach the payload source and decoder, fetching any accumulated
    /// demand
    pub fn init(&mut self, source: Box<dyn MessageSource>, decoder: Arc<dyn MessageDecoder>) -> BridgeResult<Vec<ReadEvent>> {
        if self.decoder.is_some() {
            return Err(BridgeError::IllegalState {
                message: "read adapter initialized twice".to_string(),
            });
        }
        self.source = Some(source);
        self.decoder = Some(decoder);
        self.pump()
    }

    /// A payload pushed by the source
    pub fn on_data(&mut self, payload: Bytes) -> BridgeResult<Vec<ReadEvent>> {
        if self.end_delivered {
            return Err(BridgeError::IllegalState {
                message: "payload received after end of stream".to_string(),
            });
        }
        self.queue.push_back(payload);
        let events = self.pump()?;
        if !self.queue.is_empty() {
            if let Some(source) = self.source.as_mut() {
                source.pause();
            }
        }
        Ok(events)
    }

    /// End of the payload stream. The end event is held back until every
    /// queued payload has been delivered.
    pub fn on_end(&mut self) -> BridgeResult<Vec<ReadEvent>> {
        self.end_pending = true;
        self.pump()
    }

    pub fn is_ended(&self) -> bool {
        self.end_delivered
    }

    fn pump(&mut self) -> BridgeResult<Vec<ReadEvent>> {
        let mut events = Vec::new();

        // Nothing is delivered before init completes.
        if self.decoder.is_none() {
            return Ok(events);
        }

        loop {
            while self.credit > 0 {
                let Some(payload) = self.queue.pop_front() else { break };
                let message = self.decode(&payload)?;
                self.credit -= 1;
                events.push(ReadEvent::Message(message));
            }

            // Forward demand the source has not seen yet; each unit of
            // demand reaches the source exactly once.
            if self.unforwarded == 0 || self.end_pending {
                break;
            }
            let Some(source) = self.source.as_mut() else { break };
            let demand = std::mem::take(&mut self.unforwarded);
            let pulled = source.fetch(demand);
            if pulled.is_empty() {
                break;
            }
            self.queue.extend(pulled);
        }

        if self.end_pending && self.queue.is_empty() && !self.end_delivered {
            self.end_delivered = true;
            events.push(ReadEvent::End);
        }

        Ok(events)
    }

    fn decode(&self, payload: &[u8]) -> BridgeResult<Value> {
        match self.decoder.as_ref() {
            Some(decoder) => decoder.decode(payload),
            None => Err(BridgeError::IllegalState {
                message: "decode before read adapter init".to_string(),
            }),
        }
    }
}

impl Default for ReadStreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}
