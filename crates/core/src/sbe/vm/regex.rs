//! Regular expression builtins over compiled [`PcreRegex`] handles.

use anyhow::Result;
use ::regex::Captures;

use crate::val::{Array, Object, PcreRegex, Value};

/// Compiles a pattern and its options into a handle. Invalid patterns are errors.
pub fn compile(pattern: &Value, options: &Value) -> Result<Value> {
	match (pattern.string_view(), options.string_view()) {
		(Some(p), Some(o)) => Ok(Value::PcreRegex(Box::new(PcreRegex::new(p, o)?))),
		_ => Ok(Value::Nothing),
	}
}

fn operands<'a>(regex: &'a Value, input: &'a Value) -> Option<(&'a PcreRegex, &'a str)> {
	match regex {
		Value::PcreRegex(re) => Some((re, input.string_view()?)),
		_ => None,
	}
}

pub fn is_match(regex: &Value, input: &Value) -> Value {
	match operands(regex, input) {
		Some((re, s)) => Value::Boolean(re.regex().is_match(s)),
		None => Value::Nothing,
	}
}

fn match_object(input: &str, caps: &Captures) -> Value {
	let Some(whole) = caps.get(0) else {
		return Value::Null;
	};
	let mut captures = Array::with_capacity(caps.len().saturating_sub(1));
	for group in caps.iter().skip(1) {
		captures.push(match group {
			Some(m) => Value::new_string(m.as_str()),
			None => Value::Null,
		});
	}
	let idx = input[..whole.start()].chars().count();
	let mut obj = Object::with_capacity(3);
	obj.push("match", Value::new_string(whole.as_str()));
	obj.push("idx", Value::NumberInt32(i32::try_from(idx).unwrap_or(i32::MAX)));
	obj.push("captures", captures.into());
	obj.into()
}

/// The first match as `{match, idx, captures}`, or null when there is none
pub fn find(regex: &Value, input: &Value) -> Value {
	let Some((re, s)) = operands(regex, input) else {
		return Value::Nothing;
	};
	match re.regex().captures(s) {
		Some(caps) => match_object(s, &caps),
		None => Value::Null,
	}
}

pub fn find_all(regex: &Value, input: &Value) -> Value {
	let Some((re, s)) = operands(regex, input) else {
		return Value::Nothing;
	};
	re.regex().captures_iter(s).map(|caps| match_object(s, &caps)).collect::<Array>().into()
}
