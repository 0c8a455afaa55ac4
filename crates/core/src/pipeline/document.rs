use crate::val::{Object, ObjectEnumerator, Value};

/// Per-document metadata produced by the query layer
#[derive(Clone, Debug, Default)]
pub struct Metadata {
	/// The distance computed by a near query
	pub geo_near_distance: Option<f64>,
	/// The point a near query measured the distance to
	pub geo_near_point: Option<Value>,
	/// The random value a random cursor attached to the document
	pub rand_val: Option<f64>,
}

/// A document flowing through a pipeline, with its metadata
#[derive(Clone, Debug, Default)]
pub struct Document {
	pub value: Value,
	pub meta: Metadata,
}

impl Document {
	pub fn new(value: Value) -> Self {
		Self {
			value,
			meta: Metadata::default(),
		}
	}

	pub fn empty() -> Self {
		Self::new(Value::new_object())
	}

	pub fn with_meta(value: Value, meta: Metadata) -> Self {
		Self {
			value,
			meta,
		}
	}

	pub fn get_path(&self, path: &str) -> Value {
		self.value.get_path(path)
	}

	/// Takes the document out as an owned, mutable object
	pub fn into_object(self) -> Object {
		to_object(self.value)
	}
}

/// Converts any object-like value, including a raw BSON view, into an owned object
pub fn to_object(value: Value) -> Object {
	match value {
		Value::Object(obj) => *obj,
		value if value.tag().is_object() => {
			let mut obj = Object::new();
			let mut it = ObjectEnumerator::new(&value);
			while !it.at_end() {
				obj.push(it.field_name(), it.view().clone());
				it.advance();
			}
			obj
		}
		_ => Object::new(),
	}
}

/// Writes `value` at a dotted path, creating intermediate objects as needed. Intermediate values
/// which are not objects are replaced.
pub fn set_path(obj: &mut Object, path: &str, value: Value) {
	match path.split_once('.') {
		None => obj.set(path, value),
		Some((head, rest)) => match obj.get_field_mut(head) {
			Some(slot) => {
				let mut child = to_object(std::mem::take(slot));
				set_path(&mut child, rest, value);
				*slot = Value::Object(Box::new(child));
			}
			None => {
				let mut child = Object::new();
				set_path(&mut child, rest, value);
				obj.push(head, Value::Object(Box::new(child)));
			}
		},
	}
}

/// Removes the field at a dotted path, descending into arrays of objects
pub fn remove_path(obj: &mut Object, path: &str) {
	match path.split_once('.') {
		None => {
			obj.remove(path);
		}
		Some((head, rest)) => {
			let Some(child) = obj.get_field_mut(head) else {
				return;
			};
			remove_nested(child, rest);
		}
	}
}

fn remove_nested(value: &mut Value, path: &str) {
	if value.tag().is_object() {
		let mut obj = to_object(std::mem::take(value));
		remove_path(&mut obj, path);
		*value = Value::Object(Box::new(obj));
	} else if let Some(arr) = value.as_array_mut() {
		let items = std::mem::take(arr).into_values();
		for mut item in items {
			remove_nested(&mut item, path);
			arr.push(item);
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::val::json::{from_json, to_json};

	#[test]
	fn nested_set_creates_objects() {
		let mut obj = to_object(from_json(&json!({"a": 1})).unwrap());
		set_path(&mut obj, "b.c", Value::NumberInt32(2));
		let out = to_json(&Value::Object(Box::new(obj))).unwrap();
		assert_eq!(out, json!({"a": 1, "b": {"c": 2}}));
	}

	#[test]
	fn nested_remove_descends_arrays() {
		let mut obj = to_object(from_json(&json!({"a": [{"b": 1, "c": 2}, {"b": 3}], "d": 4})).unwrap());
		remove_path(&mut obj, "a.b");
		let out = to_json(&Value::Object(Box::new(obj))).unwrap();
		assert_eq!(out, json!({"a": [{"c": 2}, {}], "d": 4}));
	}
}
