//! The rule document model.
//!
//! A rule set is an ordered JSON array of rules; each rule is a URL match plus
//! an ordered list of actions. Document order is significant on both levels:
//! later actions may depend on flags set by earlier ones. Field names follow
//! the document format the engine has always consumed (`enable`, `initWait`,
//! `elementFinder` with the legacy `xpath` alias, `addon`, `flag`, `flagSet`,
//! `true`/`false` mutation lists).

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use serde::de::Deserializer;
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

fn default_name() -> String {
    "(unknown)".to_string()
}

fn default_true() -> bool {
    true
}

/// Ordered set of rules, optionally tied to the file it was loaded from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    #[serde(skip)]
    source_mtime: Option<SystemTime>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            source_mtime: None,
        }
    }

    /// Parse a rule set from JSON text. Missing required fields fail here,
    /// fast, rather than surfacing mid-pass.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| EngineError::MalformedRules(e.to_string()))
    }

    /// Load a rule set from a file, recording its modification time so
    /// [`RuleSet::source_changed`] can detect a rewrite between ticks.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::MalformedRules(format!("{}: {e}", path.display())))?;
        let mut set = Self::from_json(&text)?;
        set.source_mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        Ok(set)
    }

    /// Whether the backing file's modification time has advanced past the one
    /// recorded at load. A set that never came from a file reports `true` so
    /// a first load always proceeds.
    pub fn source_changed(&self, path: impl AsRef<Path>) -> bool {
        let Ok(mtime) = fs::metadata(path).and_then(|m| m.modified()) else {
            return false;
        };
        match self.source_mtime {
            None => true,
            Some(recorded) => recorded < mtime,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// One top-level automation unit: a URL match plus an ordered action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "default_name")]
    pub name: String,
    pub url: String,
    pub enable: bool,
    #[serde(rename = "initWait")]
    pub init_wait: String,
    pub actions: Vec<Action>,
}

/// One atomic page interaction: locate an element, gate it, apply an effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default, rename = "initWait")]
    pub init_wait: String,
    #[serde(rename = "elementFinder", alias = "xpath")]
    pub element_finder: String,
    #[serde(default)]
    pub value: ActionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addon: Option<Criterion>,
    #[serde(default, alias = "flagCheck", skip_serializing_if = "Option::is_none")]
    pub flag: Option<FlagExpr>,
    #[serde(
        default,
        rename = "flagSet",
        skip_serializing_if = "Option::is_none"
    )]
    pub flag_set: Option<Vec<FlagMutation>>,
}

/// An action's value: usually literal document text, occasionally a closure
/// supplied by programmatic rule construction. Resolved once at the point of
/// use.
#[derive(Clone)]
pub enum ActionValue {
    Literal(String),
    Computed(Arc<dyn Fn() -> String + Send + Sync>),
}

impl ActionValue {
    pub fn resolve(&self) -> String {
        match self {
            ActionValue::Literal(text) => text.clone(),
            ActionValue::Computed(f) => f(),
        }
    }
}

impl Default for ActionValue {
    fn default() -> Self {
        ActionValue::Literal(String::new())
    }
}

impl fmt::Debug for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionValue::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            ActionValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for ActionValue {
    fn from(text: &str) -> Self {
        ActionValue::Literal(text.to_string())
    }
}

impl From<String> for ActionValue {
    fn from(text: String) -> Self {
        ActionValue::Literal(text)
    }
}

impl Serialize for ActionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ActionValue::Literal(text) => serializer.serialize_str(text),
            ActionValue::Computed(_) => Err(ser::Error::custom(
                "computed action values cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ActionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(ActionValue::Literal(text))
    }
}

/// A comparison between an element's observed content and a document value.
/// Used as the per-action "addon" gate. The operator is kept textual so an
/// unknown one surfaces at evaluation time, where it names the defective
/// action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(default, rename = "elementFinder", alias = "xpath")]
    pub element_finder: String,
    pub value: String,
    pub condition: String,
}

/// A flag-check expression tree: a comparison against the flag store plus an
/// optional `and`/`or` child, with mutation lists applied on the branch taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagExpr {
    pub name: String,
    pub value: String,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Box<FlagExpr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Box<FlagExpr>>,
    #[serde(default, rename = "true", skip_serializing_if = "Option::is_none")]
    pub when_true: Option<Vec<FlagMutation>>,
    #[serde(default, rename = "false", skip_serializing_if = "Option::is_none")]
    pub when_false: Option<Vec<FlagMutation>>,
}

/// One store update: `set`/`=`, `incr`/`+=` or `decr`/`-=`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagMutation {
    pub name: String,
    pub value: String,
    pub op: String,
}
