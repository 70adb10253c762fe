//! Helpers over the generic value tree used for responses, fetch records, and params.
//!
//! Every provider payload is held as a [`Value`]. Walking a path never panics: a
//! missing key, an out-of-range index, or a primitive in the middle of the path all
//! yield `None`, leaving the caller to decide whether absence is an error.

// self
use crate::_prelude::*;

/// Walks `path` through nested objects (by key) and arrays (by decimal index).
pub fn walk<'a, S>(root: &'a Value, path: &[S]) -> Option<&'a Value>
where
	S: AsRef<str>,
{
	path.iter().try_fold(root, |node, segment| child(node, segment.as_ref()))
}

/// Renders a path as `a.b.c` for error messages.
pub fn dotted<S>(path: &[S]) -> String
where
	S: AsRef<str>,
{
	path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(".")
}

/// Converts a primitive into its string form.
///
/// Objects, arrays, and `null` have no flat rendering and yield `None`.
pub fn flatten(value: &Value) -> Option<String> {
	match value {
		Value::String(text) => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		Value::Null | Value::Array(_) | Value::Object(_) => None,
	}
}

/// Returns true for values a resolver must not produce (`null` and the empty string).
pub fn is_empty(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::String(text) => text.is_empty(),
		_ => false,
	}
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
	match node {
		Value::Object(map) => map.get(segment),
		Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
		_ => None,
	}
}
