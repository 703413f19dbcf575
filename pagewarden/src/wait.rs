//! Wait specifications.
//!
//! A wait spec is a compact textual delay encoding: empty for "no wait", one
//! numeric token for a fixed number of seconds, two tokens separated by
//! whitespace or `e` for an inclusive random range (`"2e5"` waits 2..=5
//! seconds). An empty spec is distinct from a configured zero-second wait:
//! the latter still announces itself through the progress sink.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use crate::errors::EngineError;

static TOKEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[e\s]+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSpec {
    /// No wait configured.
    None,
    /// Fixed duration in seconds.
    Fixed(u64),
    /// Inclusive random range in seconds.
    Range(u64, u64),
}

impl WaitSpec {
    /// Parse a spec string. Malformed input (more than two tokens, or a token
    /// that is not a non-negative integer) is a diagnostic, not a fatal
    /// error: callers log it and schedule no wait.
    pub fn parse(spec: &str) -> Result<WaitSpec, EngineError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(WaitSpec::None);
        }

        let malformed = || EngineError::MalformedWaitSpec(spec.to_string());
        let tokens: Vec<&str> = TOKEN_SPLIT.split(spec).filter(|t| !t.is_empty()).collect();
        match tokens.as_slice() {
            [single] => single.parse().map(WaitSpec::Fixed).map_err(|_| malformed()),
            [start, stop] => {
                let start = start.parse().map_err(|_| malformed())?;
                let stop = stop.parse().map_err(|_| malformed())?;
                Ok(WaitSpec::Range(start, stop))
            }
            _ => Err(malformed()),
        }
    }

    /// Resolve to a concrete duration in seconds. A range draws uniformly and
    /// inclusively; a reversed range is the caller's definition error, never
    /// reordered here.
    pub fn resolve(&self) -> Result<u64, EngineError> {
        match *self {
            WaitSpec::None => Ok(0),
            WaitSpec::Fixed(secs) => Ok(secs),
            WaitSpec::Range(start, stop) => {
                if start > stop {
                    return Err(EngineError::InvalidRange { start, stop });
                }
                Ok(rand::thread_rng().gen_range(start..=stop))
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, WaitSpec::None)
    }
}
