//! Placeholder grammar: scanning and substitution.
//!
//! ```text
//! ${<kind>:// .<identifier> [| default|overwrite [<literal>]] }
//! ```
//!
//! The identifier is `[_a-zA-Z][_a-zA-Z0-9]*`. A literal is either `""`
//! (explicit empty) or a run of a safe printable alphabet. Text that does not
//! match the grammar is never touched.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::key::{Action, ActionKind, Key, KeyVal, Kind, Literal};
use crate::error::ResolveError;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\$\{(?P<kind>[a-z][a-z0-9]*)://[ \t]*\.(?P<name>[_a-zA-Z][_a-zA-Z0-9]*)[ \t]*",
        r#"(?:\|[ \t]*(?P<action>default|overwrite)(?:[ \t]+(?P<literal>""|[-_a-zA-Z0-9./:@,=+%~^*#!?]+))?[ \t]*)?"#,
        r"\}"
    ))
    .unwrap()
});

/// A single placeholder occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: Key,
    pub action: Action,
}

fn parse_captures(caps: &Captures<'_>) -> Result<Placeholder, ResolveError> {
    let kind: Kind = caps["kind"].parse()?;
    let action = match caps.name("action").map(|m| m.as_str()) {
        None => Action::default(),
        Some(action) => Action {
            kind: if action == "overwrite" {
                ActionKind::Overwrite
            } else {
                ActionKind::Default
            },
            literal: match caps.name("literal").map(|m| m.as_str()) {
                None => Literal::Absent,
                Some("\"\"") => Literal::Empty,
                Some(value) => Literal::Value(value.to_string()),
            },
        },
    };
    Ok(Placeholder {
        key: Key::new(kind, &caps["name"]),
        action,
    })
}

/// Scan `text` for placeholders, one entry per unique key in order of first
/// appearance. The first occurrence's action wins.
pub fn scan(text: &str) -> Result<Vec<KeyVal>, ResolveError> {
    let mut seen = HashSet::new();
    let mut keyvals = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let placeholder = parse_captures(&caps)?;
        if !seen.insert(placeholder.key.clone()) {
            continue;
        }
        keyvals.push(KeyVal {
            key: placeholder.key,
            action: placeholder.action,
        });
    }
    Ok(keyvals)
}

/// Names of every key referenced in `text`, regardless of kind.
pub fn referenced_names(text: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .map(|caps| caps["name"].to_string())
        .collect()
}

/// Replace each placeholder with the value bound to its key.
///
/// Placeholders whose key is not bound are left verbatim.
pub fn substitute(text: &str, values: &HashMap<Key, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let bound = caps["kind"]
                .parse::<Kind>()
                .ok()
                .and_then(|kind| values.get(&Key::new(kind, &caps["name"])));
            match bound {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
