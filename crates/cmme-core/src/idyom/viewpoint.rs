//! Viewpoint algebra: basic attributes, functions of them, threaded
//! (anchored) viewpoints and linked tuples predicted jointly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Event attributes stored directly in a melody database.
pub const BASIC_VIEWPOINTS: &[&str] = &[
    "onset",
    "cpitch",
    "dur",
    "keysig",
    "mode",
    "tempo",
    "pulses",
    "barlength",
    "deltast",
    "bioi",
    "phrase",
    "mpitch",
    "accidental",
    "dyn",
    "voice",
    "ornament",
    "comma",
    "articulation",
];

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Viewpoint {
    Basic(String),
    Derived(String),
    /// `base` evaluated only at events selected by `anchor`.
    Threaded { base: Box<Viewpoint>, anchor: String },
    Linked(Vec<Viewpoint>),
}

impl Viewpoint {
    pub fn basic(name: impl Into<String>) -> Self {
        Viewpoint::Basic(name.into())
    }

    pub fn derived(name: impl Into<String>) -> Self {
        Viewpoint::Derived(name.into())
    }

    pub fn threaded(base: Viewpoint, anchor: impl Into<String>) -> Self {
        Viewpoint::Threaded {
            base: Box::new(base),
            anchor: anchor.into(),
        }
    }

    pub fn linked(parts: impl IntoIterator<Item = Viewpoint>) -> Self {
        Viewpoint::Linked(parts.into_iter().collect())
    }

    /// Classify a bare name: known attributes are basic, anything else derived.
    pub fn from_name(name: &str) -> Self {
        if BASIC_VIEWPOINTS.contains(&name) {
            Viewpoint::basic(name)
        } else {
            Viewpoint::derived(name)
        }
    }

    /// Build from nested JSON: strings are viewpoints, arrays are links.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(name) => Ok(Viewpoint::from_name(name)),
            serde_json::Value::Array(items) => Ok(Viewpoint::Linked(
                items.iter().map(Viewpoint::from_json).collect::<Result<_>>()?,
            )),
            other => Err(ModelError::input(format!("not a viewpoint: {other}"))),
        }
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, Viewpoint::Basic(_))
    }

    /// Name as the runtime knows it. Links join their members with `.`.
    pub fn name(&self) -> String {
        match self {
            Viewpoint::Basic(n) | Viewpoint::Derived(n) => n.clone(),
            Viewpoint::Threaded { base, anchor } => format!("thr{}-{anchor}", base.name()),
            Viewpoint::Linked(parts) => parts
                .iter()
                .map(Viewpoint::name)
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    /// Lisp form: a symbol, or a parenthesized list for links.
    pub fn to_lisp(&self) -> String {
        match self {
            Viewpoint::Linked(parts) => format!(
                "({})",
                parts
                    .iter()
                    .map(Viewpoint::to_lisp)
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            other => other.name(),
        }
    }

    /// Basic viewpoints this one is ultimately computed from, when known.
    pub fn basic_names(&self) -> Vec<String> {
        match self {
            Viewpoint::Basic(n) => vec![n.clone()],
            Viewpoint::Derived(_) => Vec::new(),
            Viewpoint::Threaded { base, .. } => base.basic_names(),
            Viewpoint::Linked(parts) => parts.iter().flat_map(Viewpoint::basic_names).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Viewpoint::Basic(n) | Viewpoint::Derived(n) => {
                if n.is_empty() || n.contains(char::is_whitespace) {
                    return Err(ModelError::params(format!("invalid viewpoint name {n:?}")));
                }
                Ok(())
            }
            Viewpoint::Threaded { base, anchor } => {
                if anchor.is_empty() {
                    return Err(ModelError::params("threaded viewpoint needs an anchor"));
                }
                if matches!(**base, Viewpoint::Linked(_)) {
                    return Err(ModelError::params("cannot thread a linked viewpoint"));
                }
                base.validate()
            }
            Viewpoint::Linked(parts) => {
                if parts.len() < 2 {
                    return Err(ModelError::params(
                        "linked viewpoint needs at least two members",
                    ));
                }
                for part in parts {
                    if matches!(part, Viewpoint::Linked(_)) {
                        return Err(ModelError::params("linked viewpoints cannot nest"));
                    }
                    part.validate()?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Viewpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lisp())
    }
}
