//! JSON Patch handling for the local mirror.
//!
//! Only `replace` operations are mirrored. `add`, `remove`, `move`, `copy` and
//! `test` are accepted by the upstream but skipped here, so the mirror can lag
//! behind on those fields until the next full update.

use serde_json::{Map, Value};
use tracing::debug;

/// A `replace` operation reduced to the pointer segments and its new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub path: Vec<String>,
    pub value: Value,
}

/// Extracts the mirrorable `replace` operations from a patch document.
///
/// Operations without a string `path`, with a null/missing `value`, or with an
/// empty pointer are skipped.
pub fn replacement_ops(ops: &[Value]) -> Vec<Replacement> {
    ops.iter()
        .filter(|op| op.get("op").and_then(Value::as_str) == Some("replace"))
        .filter_map(|op| {
            let path = op.get("path")?.as_str()?;
            let value = op.get("value").filter(|v| !v.is_null())?;
            let segments = parse_pointer(path);
            if segments.is_empty() {
                return None;
            }
            Some(Replacement {
                path: segments,
                value: value.clone(),
            })
        })
        .collect()
}

/// Splits a JSON pointer into unescaped segments. A missing leading `/` is
/// tolerated.
fn parse_pointer(pointer: &str) -> Vec<String> {
    pointer
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Sets every replacement on `doc`, creating intermediate objects as needed.
///
/// A replacement whose path runs through an array with a missing or
/// non-numeric index is skipped; the array is left as it was.
pub fn apply_replacements(doc: &mut Value, replacements: &[Replacement]) {
    for replacement in replacements {
        if !set_path(doc, &replacement.path, replacement.value.clone()) {
            debug!(
                path = %replacement.path.join("/"),
                "Replace target not present in mirrored array; skipped"
            );
        }
    }
}

fn set_path(target: &mut Value, path: &[String], value: Value) -> bool {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return true;
    };

    if let Value::Array(items) = target {
        return match head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(item) => set_path(item, rest, value),
            None => false,
        };
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    match target {
        Value::Object(map) => {
            let child = map.entry(head.clone()).or_insert(Value::Null);
            set_path(child, rest, value)
        }
        _ => false,
    }
}
