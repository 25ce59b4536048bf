//! JSON-aware conflict checks.
//!
//! Manifests carrying dependency maps are compared key by key, so two
//! branches bumping different packages never conflict even when the edits
//! sit on adjacent lines. Other JSON documents are compared through a
//! canonical serialization so formatting changes are ignored.

use serde_json::{Map, Value};

use super::merger::Merger;

/// Keys whose object values are treated as dependency maps.
pub const DEPENDENCY_KEYS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

/// Decide whether three JSON versions conflict.
///
/// Returns `None` when any version fails to parse; callers then fall back
/// to a plain line diff. An empty version (file absent) parses as `null`.
pub fn json_conflicts(base: &str, ours: &str, theirs: &str) -> Option<bool> {
    let base = parse(base)?;
    let ours = parse(ours)?;
    let theirs = parse(theirs)?;

    if [&base, &ours, &theirs].iter().any(|v| is_dependency_document(v)) {
        return Some(keyed_conflict(
            base.as_object(),
            ours.as_object(),
            theirs.as_object(),
        ));
    }

    Some(Merger::has_conflicts(
        &canonical(&base),
        &canonical(&ours),
        &canonical(&theirs),
    ))
}

fn parse(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return Some(Value::Null);
    }
    serde_json::from_str(text).ok()
}

/// A manifest with a dependency map, or a bare map of string values.
fn is_dependency_document(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let has_map = DEPENDENCY_KEYS
        .iter()
        .any(|key| obj.get(*key).is_some_and(Value::is_object));
    let bare_map = !obj.is_empty() && obj.values().all(Value::is_string);
    has_map || bare_map
}

/// Value-level three-way compare over the union of keys. Dependency maps
/// nested under [`DEPENDENCY_KEYS`] are compared per package.
fn keyed_conflict(
    base: Option<&Map<String, Value>>,
    ours: Option<&Map<String, Value>>,
    theirs: Option<&Map<String, Value>>,
) -> bool {
    let mut keys: Vec<&String> = [base, ours, theirs]
        .into_iter()
        .flatten()
        .flat_map(|m| m.keys())
        .collect();
    keys.sort();
    keys.dedup();

    keys.into_iter().any(|key| {
        let b = base.and_then(|m| m.get(key));
        let o = ours.and_then(|m| m.get(key));
        let t = theirs.and_then(|m| m.get(key));

        let nested = DEPENDENCY_KEYS.contains(&key.as_str())
            && [b, o, t].iter().flatten().all(|v| v.is_object());
        if nested {
            keyed_conflict(
                b.and_then(Value::as_object),
                o.and_then(Value::as_object),
                t.and_then(Value::as_object),
            )
        } else {
            value_conflict(b, o, t)
        }
    })
}

/// Both sides changed the value (absence included) and disagree.
fn value_conflict(base: Option<&Value>, ours: Option<&Value>, theirs: Option<&Value>) -> bool {
    ours != base && theirs != base && ours != theirs
}

/// Stable pretty serialization with sorted keys.
fn canonical(value: &Value) -> String {
    // serde_json's default map is ordered by key.
    let mut out = serde_json::to_string_pretty(value).unwrap_or_default();
    out.push('\n');
    out
}
