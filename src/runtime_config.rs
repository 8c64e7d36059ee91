//! # Runtime Configuration Module
//!
//! Settings that shape how the dispatcher executes handlers, loaded from a
//! YAML file, environment variables, or both (environment wins).
//!
//! ## Environment Variables
//!
//! | Variable                      | Field                 | Default   |
//! |-------------------------------|-----------------------|-----------|
//! | `BRRTR_STACK_SIZE`            | `stack_size`          | `0x10000` |
//! | `BRRTR_HANDLER_WORKERS`       | `handler_workers`     | `0`       |
//! | `BRRTR_HANDLER_QUEUE_BOUND`   | `queue_bound`         | `1024`    |
//! | `BRRTR_COROUTINES`            | `coroutines`          | `false`   |
//! | `BRRTR_SCRATCH_BUFFER_SIZE`   | `scratch_buffer_size` | `32768`   |
//! | `BRRTR_CHARSET`               | `charset`             | `utf-8`   |
//!
//! Sizes accept decimal (`32768`) or hexadecimal (`0x8000`). A value that
//! does not parse is logged and ignored.
//!
//! `handler_workers = 0` runs handlers inline on the host thread; any other
//! value creates a worker pool of that size.
//!
//! ## Example
//!
//! ```yaml
//! stack_size: 0x8000
//! handler_workers: 8
//! queue_bound: 256
//! coroutines: true
//! charset: iso-8859-1
//! ```
//!
//! ```rust,ignore
//! let config = RuntimeConfig::load(Some(Path::new("runtime.yaml")))?;
//! ```

use crate::charset::Charset;
use crate::scratch::DEFAULT_SCRATCH_SIZE;
use anyhow::Context;
use serde::{de, Deserialize, Deserializer};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Parse a size given in decimal or `0x`-prefixed hexadecimal.
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(usize),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => {
            parse_size(&s).ok_or_else(|| de::Error::custom(format!("invalid size `{s}`")))
        }
    }
}

/// Execution settings for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Stack size for worker coroutines in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub stack_size: usize,
    /// Worker pool size; 0 handles requests inline
    pub handler_workers: usize,
    /// Maximum queued + running pooled requests (0 = unbounded)
    pub queue_bound: usize,
    /// Run handlers as detachable coroutines
    pub coroutines: bool,
    /// Per-thread scratch buffer; caps text and stream segment size
    #[serde(deserialize_with = "deserialize_size")]
    pub scratch_buffer_size: usize,
    /// Transport charset for header values, paths and text bodies
    pub charset: Charset,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: 0x10000,
            handler_workers: 0,
            queue_bound: 1024,
            coroutines: false,
            scratch_buffer_size: DEFAULT_SCRATCH_SIZE,
            charset: Charset::Utf8,
        }
    }
}

/// Overwrite `target` from `var` when it is set and parses.
fn override_from<T>(target: &mut T, var: &str, parse: impl Fn(&str) -> Option<T>) {
    if let Ok(raw) = env::var(var) {
        match parse(&raw) {
            Some(value) => *target = value,
            None => warn!(var = var, value = %raw, "Ignoring invalid configuration value"),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Read a YAML file; missing fields keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse runtime config {}", path.display()))
    }

    /// YAML file (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let base = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        override_from(&mut self.stack_size, "BRRTR_STACK_SIZE", parse_size);
        override_from(&mut self.handler_workers, "BRRTR_HANDLER_WORKERS", |s| {
            s.trim().parse().ok()
        });
        override_from(&mut self.queue_bound, "BRRTR_HANDLER_QUEUE_BOUND", |s| {
            s.trim().parse().ok()
        });
        override_from(&mut self.coroutines, "BRRTR_COROUTINES", parse_bool);
        override_from(
            &mut self.scratch_buffer_size,
            "BRRTR_SCRATCH_BUFFER_SIZE",
            parse_size,
        );
        override_from(&mut self.charset, "BRRTR_CHARSET", |s| {
            Charset::from_str(s).ok()
        });
        self
    }

    /// Whether requests go through a worker pool.
    #[must_use]
    pub fn uses_pool(&self) -> bool {
        self.handler_workers > 0
    }
}
