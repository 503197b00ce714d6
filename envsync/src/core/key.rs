//! Key identity and resolution actions.
//!
//! A key is an opaque `(kind, name)` pair. The kind decides how a missing value
//! is treated and whether the resolved value is substituted inline or as the
//! path of a generated file.

use std::fmt;
use std::str::FromStr;

use crate::error::ResolveError;

/// Kind of a key reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    /// Required scalar.
    Env,
    /// Optional scalar; a missing key resolves to `""` without touching the store.
    Envo,
    /// Required value materialized as a file; the file path is substituted.
    Envf,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Env, Kind::Envo, Kind::Envf];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Env => "env",
            Kind::Envo => "envo",
            Kind::Envf => "envf",
        }
    }

    /// Whether an empty resolved value is an error for this kind.
    pub fn is_required(self) -> bool {
        !matches!(self, Kind::Envo)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env" => Ok(Kind::Env),
            "envo" => Ok(Kind::Envo),
            "envf" => Ok(Kind::Envf),
            other => Err(ResolveError::UnknownKind(other.to_string())),
        }
    }
}

/// Store identity of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub kind: Kind,
    pub name: String,
}

impl Key {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Literal attached to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// No literal was written; the value must already exist.
    Absent,
    /// The author wrote an explicit empty stub (`""`).
    Empty,
    Value(String),
}

impl Literal {
    /// Text to store or substitute. `Absent` has none.
    pub fn as_value(&self) -> Option<&str> {
        match self {
            Literal::Absent => None,
            Literal::Empty => Some(""),
            Literal::Value(value) => Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Read the stored value; provision the literal only when missing.
    Default,
    /// Always write the literal.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub literal: Literal,
}

impl Default for Action {
    fn default() -> Self {
        Self {
            kind: ActionKind::Default,
            literal: Literal::Absent,
        }
    }
}

/// A scanned key reference together with the action of its first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: Key,
    pub action: Action,
}
