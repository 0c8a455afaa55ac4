use std::sync::Arc;

use crate::val::{ArrayEnumerator, ArraySet, Collator, Value};

fn to_set(array: &Value, collator: &Option<Arc<dyn Collator>>) -> ArraySet {
	let mut set = ArraySet::new(collator.clone());
	let mut it = ArrayEnumerator::new(array);
	while !it.at_end() {
		set.push(it.view().clone());
		it.advance();
	}
	set
}

fn all_arrays(args: &[Value]) -> bool {
	args.iter().all(|a| a.tag().is_array())
}

pub fn union(args: &[Value], collator: Option<Arc<dyn Collator>>) -> Value {
	if !all_arrays(args) {
		return Value::Nothing;
	}
	let mut out = ArraySet::new(collator);
	for arg in args {
		let mut it = ArrayEnumerator::new(arg);
		while !it.at_end() {
			out.push(it.view().clone());
			it.advance();
		}
	}
	Value::ArraySet(Box::new(out))
}

pub fn intersection(args: &[Value], collator: Option<Arc<dyn Collator>>) -> Value {
	if !all_arrays(args) {
		return Value::Nothing;
	}
	let Some((first, rest)) = args.split_first() else {
		return Value::ArraySet(Box::new(ArraySet::new(collator)));
	};
	let others: Vec<ArraySet> = rest.iter().map(|a| to_set(a, &collator)).collect();
	let mut out = ArraySet::new(collator.clone());
	for v in to_set(first, &collator).into_values() {
		if others.iter().all(|s| s.contains(&v)) {
			out.push(v);
		}
	}
	Value::ArraySet(Box::new(out))
}

pub fn difference(lhs: &Value, rhs: &Value, collator: Option<Arc<dyn Collator>>) -> Value {
	if !lhs.tag().is_array() || !rhs.tag().is_array() {
		return Value::Nothing;
	}
	let exclude = to_set(rhs, &collator);
	let mut out = ArraySet::new(collator.clone());
	for v in to_set(lhs, &collator).into_values() {
		if !exclude.contains(&v) {
			out.push(v);
		}
	}
	Value::ArraySet(Box::new(out))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::val::handles::CaseInsensitiveCollator;
	use crate::val::json::from_json;

	fn arr(json: serde_json::Value) -> Value {
		from_json(&json).unwrap()
	}

	fn set_of(v: &Value) -> &ArraySet {
		v.as_array_set().unwrap()
	}

	#[test]
	fn intersection_ignores_order() {
		let v = intersection(&[arr(serde_json::json!([1, 2, 3])), arr(serde_json::json!([4, 3, 2]))], None);
		let expected = to_set(&arr(serde_json::json!([3, 2])), &None);
		assert!(set_of(&v).set_equals(&expected));
		assert!(intersection(&[Value::NumberInt32(1), arr(serde_json::json!([2]))], None).is_nothing());
	}

	#[test]
	fn union_and_difference() {
		let a = arr(serde_json::json!([1, 1, 2]));
		let b = arr(serde_json::json!([2.0, 3]));
		assert_eq!(set_of(&union(&[a.clone(), b.clone()], None)).len(), 3);
		let d = difference(&a, &b, None);
		assert!(set_of(&d).set_equals(&to_set(&arr(serde_json::json!([1])), &None)));
	}

	#[test]
	fn collation_decides_membership() {
		let collator: Option<Arc<dyn Collator>> = Some(Arc::new(CaseInsensitiveCollator));
		let a = arr(serde_json::json!(["a", "B"]));
		let b = arr(serde_json::json!(["b"]));
		assert_eq!(set_of(&intersection(&[a.clone(), b.clone()], collator)).len(), 1);
		assert_eq!(set_of(&intersection(&[a, b], None)).len(), 0);
	}
}
