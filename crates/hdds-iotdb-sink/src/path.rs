// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device path normalization.
//!
//! Resolved device identifiers may use `/` as the level separator. The store
//! expects `.`, except inside backtick-quoted segments where both characters
//! are literal.
//!
//! ```text
//! root/ln/wf01/`abc.d`/deviceId  ->  root.ln.wf01.`abc.d`.deviceId
//! ```

use crate::error::SinkError;
use regex::Regex;
use std::sync::OnceLock;

const QUOTE: char = '`';
const SEPARATOR: &str = "/";
const LEVEL: &str = ".";

/// Rewrites `/` level separators to `.` outside quoted segments.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    separator: Regex,
}

impl PathNormalizer {
    pub fn new() -> Self {
        // an escaped literal always compiles
        Self {
            separator: Regex::new(&regex::escape(SEPARATOR))
                .expect("escaped literal is a valid pattern"),
        }
    }

    /// Normalize `path`.
    ///
    /// Spans between backticks alternate unquoted / quoted, starting with an
    /// unquoted (possibly empty) span. Only unquoted spans are rewritten.
    /// Fails with [`SinkError::PathFormat`] when a quote is left open.
    pub fn normalize(&self, path: &str) -> Result<String, SinkError> {
        let spans: Vec<&str> = path.split(QUOTE).collect();
        if spans.len() % 2 == 0 {
            return Err(SinkError::PathFormat {
                path: path.to_string(),
                reason: "unterminated backtick quote".to_string(),
            });
        }

        let mut out = String::with_capacity(path.len());
        for (i, span) in spans.iter().enumerate() {
            if i > 0 {
                out.push(QUOTE);
            }
            if i % 2 == 0 {
                out.push_str(&self.separator.replace_all(span, LEVEL));
            } else {
                out.push_str(span);
            }
        }
        Ok(out)
    }
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize `path` with a process-wide [`PathNormalizer`].
pub fn normalize_path(path: &str) -> Result<String, SinkError> {
    static NORMALIZER: OnceLock<PathNormalizer> = OnceLock::new();
    NORMALIZER.get_or_init(PathNormalizer::new).normalize(path)
}
