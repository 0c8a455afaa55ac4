//! Accumulator builtins. Each takes the previous aggregate state (`Nothing` before the first
//! input) and returns the next one.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;

use super::arith;
use crate::val::{Array, ArraySet, Collator, Value, three_way};

pub fn add_to_array(acc: Value, value: Value) -> Value {
	let mut acc = match acc {
		Value::Array(a) => a,
		_ => Box::new(Array::new()),
	};
	acc.push(value);
	Value::Array(acc)
}

pub fn add_to_set(acc: Value, value: Value, collator: Option<Arc<dyn Collator>>) -> Value {
	let mut acc = match acc {
		Value::ArraySet(s) => s,
		_ => Box::new(ArraySet::new(collator)),
	};
	acc.push(value);
	Value::ArraySet(acc)
}

/// Sums numeric inputs, skipping everything else. The empty sum is `0`.
pub fn sum(acc: Value, value: &Value) -> Result<Value> {
	let acc = match acc {
		Value::Nothing => Value::NumberInt32(0),
		acc => acc,
	};
	if !value.tag().is_number() {
		return Ok(acc);
	}
	arith::add(&acc, value)
}

fn extreme(acc: Value, value: Value, collator: Option<&dyn Collator>, keep: Ordering) -> Value {
	if value.is_null_or_missing() || matches!(value, Value::BsonUndefined) {
		return acc;
	}
	if acc.is_nothing() {
		return value;
	}
	match three_way(&value, &acc, collator) {
		Some(ord) if ord == keep => value,
		_ => acc,
	}
}

pub fn min(acc: Value, value: Value, collator: Option<&dyn Collator>) -> Value {
	extreme(acc, value, collator, Ordering::Less)
}

pub fn max(acc: Value, value: Value, collator: Option<&dyn Collator>) -> Value {
	extreme(acc, value, collator, Ordering::Greater)
}

/// Keeps the first input seen. A missing first input is recorded as null.
pub fn first(acc: Value, value: Value) -> Value {
	match acc {
		Value::Nothing if value.is_nothing() => Value::Null,
		Value::Nothing => value,
		acc => acc,
	}
}

pub fn last(_acc: Value, value: Value) -> Value {
	match value {
		Value::Nothing => Value::Null,
		value => value,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::val::handles::CaseInsensitiveCollator;

	fn fold(inputs: &[Value], f: impl Fn(Value, Value) -> Value) -> Value {
		inputs.iter().cloned().fold(Value::Nothing, f)
	}

	#[test]
	fn sums_skip_non_numbers() {
		let mut acc = Value::Nothing;
		for v in [Value::NumberInt32(2), Value::new_string("x"), Value::NumberDouble(0.5)] {
			acc = sum(acc, &v).unwrap();
		}
		assert_eq!(acc.to_string(), "2.5");
		assert_eq!(sum(Value::Nothing, &Value::Null).unwrap().to_string(), "0");
	}

	#[test]
	fn extremes_ignore_nullish() {
		let inputs = [Value::Null, Value::NumberInt32(3), Value::Nothing, Value::NumberInt64(1)];
		assert_eq!(fold(&inputs, |a, v| min(a, v, None)).to_string(), "1");
		assert_eq!(fold(&inputs, |a, v| max(a, v, None)).to_string(), "3");
		assert!(fold(&[Value::Null], |a, v| min(a, v, None)).is_nothing());
	}

	#[test]
	fn extremes_follow_collation() {
		let inputs = [Value::new_string("b"), Value::new_string("A")];
		assert_eq!(fold(&inputs, |a, v| min(a, v, None)).to_string(), "\"A\"");
		let collator = CaseInsensitiveCollator;
		assert_eq!(fold(&inputs, |a, v| min(a, v, Some(&collator))).to_string(), "\"A\"");
		assert_eq!(fold(&inputs, |a, v| max(a, v, Some(&collator))).to_string(), "\"b\"");
	}

	#[test]
	fn first_and_last() {
		let inputs = [Value::Nothing, Value::NumberInt32(1), Value::NumberInt32(2)];
		assert_eq!(fold(&inputs, first).to_string(), "null");
		assert_eq!(fold(&inputs, last).to_string(), "2");
	}

	#[test]
	fn collecting() {
		let inputs = [Value::NumberInt32(1), Value::Nothing, Value::NumberDouble(1.0)];
		assert_eq!(fold(&inputs, add_to_array).to_string(), "[1, 1]");
		let set = fold(&inputs, |a, v| add_to_set(a, v, None));
		assert_eq!(set.as_array_set().map(ArraySet::len), Some(1));
	}
}
