//! Engine configuration.
//!
//! Defaults are tuned for price series of a few thousand to a few million
//! samples. A config can also be read from a JSON document or from
//! `CUDAFINANCE_*` environment variables.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Requested kernel strategy. `Auto` lets the engine pick per call.
#[cfg_attr(feature = "python", pyclass)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelPolicy {
    #[default]
    Auto,
    Naive,
    PrefixSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Host,
    #[default]
    Parallel,
}

/// How often the selected kernel is reported when `debug` is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugScope {
    #[default]
    Once,
    Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: KernelPolicy,
    pub backend: Backend,
    /// Under `Auto`, windows at least this wide use the prefix-sum kernel.
    pub prefix_sum_min_window: usize,
    /// Series shorter than this run as a single block on the calling thread.
    pub parallel_min_len: usize,
    /// Outputs per block; 0 derives it from the series length and thread count.
    pub block_len: usize,
    /// Dedicated pool size. `None` shares rayon's global pool.
    pub threads: Option<usize>,
    /// Accept `window > len` and average over the available samples.
    pub allow_oversized_window: bool,
    pub debug: bool,
    pub debug_scope: DebugScope,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            policy: KernelPolicy::Auto,
            backend: Backend::Parallel,
            prefix_sum_min_window: 32,
            parallel_min_len: 4096,
            block_len: 0,
            threads: None,
            allow_oversized_window: false,
            debug: false,
            debug_scope: DebugScope::Once,
        }
    }
}

pub const ENV_POLICY: &str = "CUDAFINANCE_POLICY";
pub const ENV_BACKEND: &str = "CUDAFINANCE_BACKEND";
pub const ENV_PREFIX_MIN_WINDOW: &str = "CUDAFINANCE_PREFIX_MIN_WINDOW";
pub const ENV_PARALLEL_MIN_LEN: &str = "CUDAFINANCE_PARALLEL_MIN_LEN";
pub const ENV_BLOCK_LEN: &str = "CUDAFINANCE_BLOCK_LEN";
pub const ENV_THREADS: &str = "CUDAFINANCE_THREADS";
pub const ENV_ALLOW_OVERSIZED_WINDOW: &str = "CUDAFINANCE_ALLOW_OVERSIZED_WINDOW";
pub const ENV_DEBUG: &str = "CUDAFINANCE_DEBUG";
pub const ENV_DEBUG_SCOPE: &str = "CUDAFINANCE_DEBUG_SCOPE";

impl EngineConfig {
    pub fn from_json_str(doc: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(doc).map_err(|e| Error::Config {
            key: "<json>".into(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config {
            key: "<json>".into(),
            reason: e.to_string(),
        })
    }

    /// Defaults overridden by whatever `CUDAFINANCE_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        if let Some(v) = lookup(ENV_POLICY) {
            config.policy = match v.trim().to_ascii_lowercase().as_str() {
                "auto" => KernelPolicy::Auto,
                "naive" => KernelPolicy::Naive,
                "prefix_sum" | "prefix" => KernelPolicy::PrefixSum,
                _ => return Err(bad_value(ENV_POLICY, &v, "expected auto, naive or prefix_sum")),
            };
        }
        if let Some(v) = lookup(ENV_BACKEND) {
            config.backend = match v.trim().to_ascii_lowercase().as_str() {
                "host" => Backend::Host,
                "parallel" => Backend::Parallel,
                _ => return Err(bad_value(ENV_BACKEND, &v, "expected host or parallel")),
            };
        }
        if let Some(v) = lookup(ENV_PREFIX_MIN_WINDOW) {
            config.prefix_sum_min_window = parse_usize(ENV_PREFIX_MIN_WINDOW, &v)?;
        }
        if let Some(v) = lookup(ENV_PARALLEL_MIN_LEN) {
            config.parallel_min_len = parse_usize(ENV_PARALLEL_MIN_LEN, &v)?;
        }
        if let Some(v) = lookup(ENV_BLOCK_LEN) {
            config.block_len = parse_usize(ENV_BLOCK_LEN, &v)?;
        }
        if let Some(v) = lookup(ENV_THREADS) {
            config.threads = Some(parse_usize(ENV_THREADS, &v)?);
        }
        if let Some(v) = lookup(ENV_ALLOW_OVERSIZED_WINDOW) {
            config.allow_oversized_window = parse_flag(&v);
        }
        if let Some(v) = lookup(ENV_DEBUG) {
            config.debug = parse_flag(&v);
        }
        if let Some(v) = lookup(ENV_DEBUG_SCOPE) {
            config.debug_scope = match v.trim().to_ascii_lowercase().as_str() {
                "once" => DebugScope::Once,
                "call" => DebugScope::Call,
                _ => return Err(bad_value(ENV_DEBUG_SCOPE, &v, "expected once or call")),
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(Error::Config {
                key: "threads".into(),
                reason: "thread count must be at least 1".into(),
            });
        }
        if self.prefix_sum_min_window == 0 {
            return Err(Error::Config {
                key: "prefix_sum_min_window".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn bad_value(key: &str, value: &str, expected: &str) -> Error {
    Error::Config {
        key: key.to_string(),
        reason: format!("{expected}, got {value:?}"),
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| bad_value(key, value, "expected a non-negative integer"))
}

// Anything but "0" or "false" turns a switch on.
fn parse_flag(value: &str) -> bool {
    let v = value.trim();
    v != "0" && !v.eq_ignore_ascii_case("false")
}
