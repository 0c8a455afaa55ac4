use chrono::DateTime;

use crate::val::{Array, Value};

pub fn concat(args: &[Value]) -> Value {
	let mut out = String::new();
	for arg in args {
		match arg.string_view() {
			Some(s) => out.push_str(s),
			None => return Value::Nothing,
		}
	}
	Value::new_string(&out)
}

pub fn replace_one(input: &Value, find: &Value, replacement: &Value) -> Value {
	match (input.string_view(), find.string_view(), replacement.string_view()) {
		(Some(input), Some(find), Some(replacement)) => {
			Value::new_string(&input.replacen(find, replacement, 1))
		}
		_ => Value::Nothing,
	}
}

pub fn split(input: &Value, delimiter: &Value) -> Value {
	match (input.string_view(), delimiter.string_view()) {
		(Some(input), Some(delimiter)) if !delimiter.is_empty() => {
			Value::Array(Box::new(input.split(delimiter).map(Value::new_string).collect::<Array>()))
		}
		_ => Value::Nothing,
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
	Bytes,
	CodePoints,
}

fn index_arg(v: &Value) -> Option<usize> {
	match v {
		Value::NumberInt32(i) => usize::try_from(*i).ok(),
		Value::NumberInt64(i) => usize::try_from(*i).ok(),
		_ => None,
	}
}

fn position<T: PartialEq>(haystack: &[T], needle: &[T], start: usize, end: usize) -> i32 {
	let end = end.min(haystack.len());
	if start > end {
		return -1;
	}
	if needle.is_empty() {
		return start as i32;
	}
	haystack[start..end]
		.windows(needle.len())
		.position(|w| w == needle)
		.map(|p| (p + start) as i32)
		.unwrap_or(-1)
}

/// Finds the first occurrence of a substring within `[start, end)`, counting in bytes or code
/// points. Yields -1 when there is none.
pub fn index_of(input: &Value, sub: &Value, start: &Value, end: Option<&Value>, unit: Unit) -> Value {
	let (Some(input), Some(sub), Some(start)) = (input.string_view(), sub.string_view(), index_arg(start))
	else {
		return Value::Nothing;
	};
	let end = match end {
		Some(e) => match index_arg(e) {
			Some(e) => e,
			None => return Value::Nothing,
		},
		None => usize::MAX,
	};
	Value::NumberInt32(match unit {
		Unit::Bytes => position(input.as_bytes(), sub.as_bytes(), start, end),
		Unit::CodePoints => {
			let haystack: Vec<char> = input.chars().collect();
			let needle: Vec<char> = sub.chars().collect();
			position(&haystack, &needle, start, end)
		}
	})
}

pub fn to_upper(v: &Value) -> Value {
	v.string_view().map(|s| Value::new_string(&s.to_ascii_uppercase())).unwrap_or_default()
}

pub fn to_lower(v: &Value) -> Value {
	v.string_view().map(|s| Value::new_string(&s.to_ascii_lowercase())).unwrap_or_default()
}

/// Renders scalars as strings the way `$concat`-style operators present them
pub fn coerce_to_string(v: &Value) -> Value {
	let s = match v {
		Value::Null | Value::BsonUndefined => String::new(),
		Value::NumberInt32(i) => i.to_string(),
		Value::NumberInt64(i) => i.to_string(),
		Value::NumberDouble(d) => d.to_string(),
		Value::NumberDecimal(d) => d.to_string(),
		Value::Date(ms) => match DateTime::from_timestamp_millis(*ms) {
			Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
			None => return Value::Nothing,
		},
		Value::Timestamp(ts) => format!("Timestamp({}, {})", ts >> 32, ts & 0xffff_ffff),
		_ => match v.string_or_symbol_view() {
			Some(s) => s.to_owned(),
			None => return Value::Nothing,
		},
	};
	Value::new_string(&s)
}
