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

//! Call-scoped request/response pair and shared call primitives

pub mod request;
pub mod response;
pub mod state;

pub use request::TranscodingRequest;
pub use response::{CallResponder, TranscodedResponse, TranscodingResponse};
pub use state::{CallState, CallStateMachine};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// A completion signal that resolves exactly once.
///
/// Both the normal end-of-stream path and the exception path converge on
/// the same instance; the first resolution wins and later ones are
/// dropped.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    result: Mutex<Option<Result<(), String>>>,
    notify: Notify,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                result: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve the completion. Returns false if it was already resolved.
    pub fn complete(&self, result: Result<(), String>) -> bool {
        {
            let mut slot = self.inner.result.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.inner.result.lock().is_some()
    }

    pub fn result(&self) -> Option<Result<(), String>> {
        self.inner.result.lock().clone()
    }

    /// Wait until the completion resolves
    pub async fn wait(&self) -> Result<(), String> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.result() {
                return result;
            }
            notified.await;
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_resolution_wins() {
        let completion = Completion::new();
        assert!(completion.complete(Ok(())));
        assert!(!completion.complete(Err("late".to_string())));
        assert_eq!(completion.result(), Some(Ok(())));
    }

    #[tokio::test]
    async fn test_wait_observes_resolution() {
        let completion = Completion::new();
        let waiter = completion.clone();

        let task = tokio::spawn(async move { waiter.wait().await });
        completion.complete(Ok(()));

        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_complete() {
        let completion = Completion::new();
        completion.complete(Err("failed".to_string()));
        assert_eq!(completion.wait().await, Err("failed".to_string()));
    }
}
