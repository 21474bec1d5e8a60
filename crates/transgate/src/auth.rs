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

//! Pluggable authentication hook invoked before routing

use crate::error::BridgeResult;
use async_trait::async_trait;
use hyper::{HeaderMap, Method};

/// Authorization decision point for incoming requests.
///
/// The hook runs before route matching; a rejection terminates the request
/// without touching the route table. Implementations return an
/// `Unauthorized` bridge error to reject.
#[async_trait]
pub trait AuthHook: Send + Sync {
    async fn authorize(&self, verb: &Method, path: &str, headers: &HeaderMap) -> BridgeResult<()>;
}

/// Default hook that admits every request
pub struct AllowAll;

#[async_trait]
impl AuthHook for AllowAll {
    async fn authorize(&self, _verb: &Method, _path: &str, _headers: &HeaderMap) -> BridgeResult<()> {
        Ok(())
    }
}
