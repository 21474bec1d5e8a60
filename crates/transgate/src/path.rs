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

//! Path template matching and parameter extraction

use std::collections::HashMap;

/// Returns the variable name if the template segment is a `{name}` capture
fn capture_name(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

/// Check whether a concrete request path satisfies a path template.
///
/// Segments are matched positionally: a `{name}` template segment matches
/// any non-empty concrete segment, every other segment must match verbatim,
/// and both sides must be fully consumed.
pub fn matches(path: &str, template: &str) -> bool {
    let mut path_segments = path.split('/');
    let mut template_segments = template.split('/');

    loop {
        match (path_segments.next(), template_segments.next()) {
            (Some(concrete), Some(pattern)) => {
                if capture_name(pattern).is_some() {
                    if concrete.is_empty() {
                        return false;
                    }
                } else if concrete != pattern {
                    return false;
                }
            }
            (None, None) => return true,
            // One side exhausted before the other
            _ => return false,
        }
    }
}

/// Extract path variables bound by a template from a concrete path.
///
/// Callers must only invoke this after `matches` succeeded for the same
/// pair; segment counts are assumed equal.
pub fn extract_path_params(template: &str, path: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for (pattern, concrete) in template.split('/').zip(path.split('/')) {
        if let Some(name) = capture_name(pattern) {
            params.insert(name.to_string(), concrete.to_string());
        }
    }

    params
}

/// Parse query parameters from a raw query string.
///
/// Duplicate keys resolve to the last value.
pub fn extract_query_params(raw_query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw_query.as_bytes()).into_owned().collect()
}
