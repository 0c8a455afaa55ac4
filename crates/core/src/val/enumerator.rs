//! Uniform iteration over every container representation.
//!
//! The yielded values are views: they are borrowed from the container for native arrays, sets
//! and objects, and share the source buffer for wire-format documents.

use ::bson::RawDocument;
use bytes::Bytes;

use super::Value;
use super::bson::{from_raw, raw_document};

type RawIter<'a> = <&'a RawDocument as IntoIterator>::IntoIter;

enum Source<'a> {
	Slice(std::slice::Iter<'a, Value>, Option<&'a Value>),
	Raw {
		doc: &'a Bytes,
		iter: RawIter<'a>,
		element: Option<(&'a str, Value)>,
	},
	Empty,
}

fn next_element<'a>(doc: &Bytes, iter: &mut RawIter<'a>) -> Option<(&'a str, Value)> {
	match iter.next()? {
		Ok((name, value)) => Some((name, from_raw(doc, value))),
		Err(_) => None,
	}
}

impl<'a> Source<'a> {
	fn raw(doc: &'a Bytes) -> Self {
		let Some(raw) = raw_document(doc) else {
			return Source::Empty;
		};
		let mut iter = raw.into_iter();
		let element = next_element(doc, &mut iter);
		Source::Raw {
			doc,
			iter,
			element,
		}
	}

	fn slice(values: std::slice::Iter<'a, Value>) -> Self {
		let mut values = values;
		let current = values.next();
		Source::Slice(values, current)
	}

	fn at_end(&self) -> bool {
		match self {
			Source::Slice(_, current) => current.is_none(),
			Source::Raw {
				element,
				..
			} => element.is_none(),
			Source::Empty => true,
		}
	}

	fn advance(&mut self) -> bool {
		match self {
			Source::Slice(rest, current) => {
				*current = rest.next();
				current.is_some()
			}
			Source::Raw {
				doc,
				iter,
				element,
			} => {
				*element = element.as_ref().and_then(|_| next_element(doc, iter));
				element.is_some()
			}
			Source::Empty => false,
		}
	}

	fn view(&self) -> &Value {
		match self {
			Source::Slice(_, Some(v)) => v,
			Source::Raw {
				element: Some((_, v)),
				..
			} => v,
			_ => &Value::Nothing,
		}
	}
}

/// Enumerates the elements of an `Array`, `ArraySet` or `BsonArray`.
///
/// Any other value enumerates as empty.
pub struct ArrayEnumerator<'a> {
	source: Source<'a>,
}

impl<'a> ArrayEnumerator<'a> {
	pub fn new(value: &'a Value) -> Self {
		let source = match value {
			Value::Array(arr) => Source::slice(arr.iter()),
			Value::ArraySet(set) => Source::slice(set.iter()),
			Value::BsonArray(doc) => Source::raw(doc),
			_ => Source::Empty,
		};
		Self {
			source,
		}
	}

	pub fn at_end(&self) -> bool {
		self.source.at_end()
	}

	/// Moves to the next element, returning whether one exists
	pub fn advance(&mut self) -> bool {
		self.source.advance()
	}

	/// The current element, or `Nothing` at the end
	pub fn view(&self) -> &Value {
		self.source.view()
	}
}

/// Enumerates the fields of an `Object` or `BsonObject`.
///
/// Any other value enumerates as empty.
pub struct ObjectEnumerator<'a> {
	source: Source<'a>,
	object: Option<&'a super::Object>,
	index: usize,
}

impl<'a> ObjectEnumerator<'a> {
	pub fn new(value: &'a Value) -> Self {
		match value {
			Value::Object(obj) => Self {
				source: Source::slice(obj.iter_values()),
				object: Some(obj),
				index: 0,
			},
			Value::BsonObject(doc) => Self {
				source: Source::raw(doc),
				object: None,
				index: 0,
			},
			_ => Self {
				source: Source::Empty,
				object: None,
				index: 0,
			},
		}
	}

	pub fn at_end(&self) -> bool {
		self.source.at_end()
	}

	pub fn advance(&mut self) -> bool {
		self.index += 1;
		self.source.advance()
	}

	pub fn view(&self) -> &Value {
		self.source.view()
	}

	pub fn field_name(&self) -> &str {
		if let Some(obj) = self.object {
			return obj.field(self.index);
		}
		match &self.source {
			Source::Raw {
				element: Some((name, _)),
				..
			} => *name,
			_ => "",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::val::json::from_json;
	use crate::val::{ArraySet, bson};

	fn names(value: &Value) -> Vec<String> {
		let mut out = Vec::new();
		let mut it = ObjectEnumerator::new(value);
		while !it.at_end() {
			out.push(it.field_name().to_owned());
			it.advance();
		}
		out
	}

	#[test]
	fn native_and_wire_objects_enumerate_alike() {
		let native = from_json(&serde_json::json!({"a": 1, "b": "two", "c": [3]})).unwrap();
		let raw = bson::decode_document(bson::encode_document(&native).unwrap().into()).unwrap();
		assert_eq!(names(&native), vec!["a", "b", "c"]);
		assert_eq!(names(&raw), names(&native));
	}

	#[test]
	fn array_kinds() {
		let mut set = ArraySet::new(None);
		set.push(Value::NumberInt32(1));
		set.push(Value::NumberInt32(2));
		let set = Value::ArraySet(Box::new(set));
		let mut it = ArrayEnumerator::new(&set);
		let mut count = 0;
		while !it.at_end() {
			count += 1;
			it.advance();
		}
		assert_eq!(count, 2);
		assert!(ArrayEnumerator::new(&Value::NumberInt32(1)).at_end());
		assert!(ArrayEnumerator::new(&Value::new_array()).view().is_nothing());
	}
}
