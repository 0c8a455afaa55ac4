use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::compare::{hash_value, three_way};
use super::handles::{Collator, collators_match};
use super::Value;

/// An ordered sequence of owned values.
#[derive(Clone, Debug, Default)]
pub struct Array {
	values: Vec<Value>,
}

impl Array {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			values: Vec::with_capacity(capacity.max(1)),
		}
	}

	/// Appends a value, taking ownership of it. Pushing `Nothing` is a no-op.
	pub fn push(&mut self, value: Value) {
		if !value.is_nothing() {
			self.values.push(value);
		}
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Returns a view of the element at `idx`, or `Nothing` past the end.
	pub fn get_at(&self, idx: usize) -> &Value {
		self.values.get(idx).unwrap_or(&Value::Nothing)
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Value> {
		self.values.iter()
	}

	pub fn reverse(&mut self) {
		self.values.reverse();
	}

	pub fn into_values(self) -> Vec<Value> {
		self.values
	}
}

impl FromIterator<Value> for Array {
	fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
		let mut arr = Array::new();
		for v in iter {
			arr.push(v);
		}
		arr
	}
}

impl From<Vec<Value>> for Array {
	fn from(values: Vec<Value>) -> Self {
		values.into_iter().collect()
	}
}

/// An unordered collection of unique values.
///
/// Uniqueness is decided by three-way comparison under the set's collation. Elements are kept in
/// insertion order so that enumeration is stable, but that order carries no meaning.
#[derive(Clone, Debug, Default)]
pub struct ArraySet {
	values: Vec<Value>,
	buckets: HashMap<u64, Vec<usize>, ahash::RandomState>,
	collator: Option<Arc<dyn Collator>>,
}

impl ArraySet {
	pub fn new(collator: Option<Arc<dyn Collator>>) -> Self {
		Self {
			values: Vec::new(),
			buckets: HashMap::default(),
			collator,
		}
	}

	pub fn collator(&self) -> Option<&Arc<dyn Collator>> {
		self.collator.as_ref()
	}

	/// Inserts a value, taking ownership of it.
	///
	/// Returns `false` if the value was `Nothing` or already present, in which case the
	/// candidate is dropped here.
	pub fn push(&mut self, value: Value) -> bool {
		if value.is_nothing() {
			return false;
		}
		let hash = hash_value(&value, self.collator.as_deref());
		let collator = self.collator.as_deref();
		let bucket = self.buckets.entry(hash).or_default();
		for &idx in bucket.iter() {
			if three_way(&self.values[idx], &value, collator) == Some(Ordering::Equal) {
				return false;
			}
		}
		bucket.push(self.values.len());
		self.values.push(value);
		true
	}

	pub fn contains(&self, value: &Value) -> bool {
		let collator = self.collator.as_deref();
		let hash = hash_value(value, collator);
		self.buckets.get(&hash).is_some_and(|bucket| {
			bucket
				.iter()
				.any(|&idx| three_way(&self.values[idx], value, collator) == Some(Ordering::Equal))
		})
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Value> {
		self.values.iter()
	}

	/// Whether both sets hold the same elements, irrespective of order
	pub fn set_equals(&self, other: &ArraySet) -> bool {
		self.len() == other.len() && self.values.iter().all(|v| other.contains(v))
	}

	/// Whether this set was built with a collation equivalent to `collator`
	pub fn matches_collator(&self, collator: Option<&Arc<dyn Collator>>) -> bool {
		collators_match(self.collator.as_ref(), collator)
	}

	pub fn into_values(self) -> Vec<Value> {
		self.values
	}
}

/// An ordered mapping of field names to owned values.
#[derive(Clone, Debug, Default)]
pub struct Object {
	names: Vec<String>,
	values: Vec<Value>,
}

impl Object {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			names: Vec::with_capacity(capacity),
			values: Vec::with_capacity(capacity),
		}
	}

	/// Appends a field, taking ownership of the value. A `Nothing` value is not stored.
	pub fn push(&mut self, name: impl Into<String>, value: Value) {
		if !value.is_nothing() {
			self.names.push(name.into());
			self.values.push(value);
		}
	}

	/// Replaces the value of an existing field in place, or appends a new one.
	///
	/// Setting a field to `Nothing` removes it.
	pub fn set(&mut self, name: &str, value: Value) {
		match self.position(name) {
			Some(idx) if value.is_nothing() => {
				self.names.remove(idx);
				self.values.remove(idx);
			}
			Some(idx) => self.values[idx] = value,
			None => self.push(name, value),
		}
	}

	pub fn remove(&mut self, name: &str) -> Value {
		match self.position(name) {
			Some(idx) => {
				self.names.remove(idx);
				self.values.remove(idx)
			}
			None => Value::Nothing,
		}
	}

	/// Returns a view of the named field, or `Nothing` if the field is absent
	pub fn get_field(&self, name: &str) -> &Value {
		match self.position(name) {
			Some(idx) => &self.values[idx],
			None => &Value::Nothing,
		}
	}

	pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Value> {
		self.position(name).map(|idx| &mut self.values[idx])
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn field(&self, idx: usize) -> &str {
		self.names.get(idx).map(String::as_str).unwrap_or("")
	}

	pub fn get_at(&self, idx: usize) -> &Value {
		self.values.get(idx).unwrap_or(&Value::Nothing)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.names.iter().map(String::as_str).zip(self.values.iter())
	}

	pub(crate) fn iter_values(&self) -> std::slice::Iter<'_, Value> {
		self.values.iter()
	}

	pub fn into_fields(self) -> impl Iterator<Item = (String, Value)> {
		self.names.into_iter().zip(self.values)
	}

	fn position(&self, name: &str) -> Option<usize> {
		self.names.iter().position(|n| n == name)
	}
}

impl<S: Into<String>> FromIterator<(S, Value)> for Object {
	fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
		let mut obj = Object::new();
		for (name, value) in iter {
			obj.push(name, value);
		}
		obj
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::val::handles::CaseInsensitiveCollator;

	#[test]
	fn array_skips_nothing() {
		let mut arr = Array::new();
		arr.push(Value::NumberInt32(1));
		arr.push(Value::Nothing);
		arr.push(Value::Null);
		assert_eq!(arr.len(), 2);
		assert!(arr.get_at(5).is_nothing());
	}

	#[test]
	fn array_set_deduplicates_across_numeric_types() {
		let mut set = ArraySet::new(None);
		assert!(set.push(Value::NumberInt32(3)));
		assert!(!set.push(Value::NumberInt64(3)));
		assert!(!set.push(Value::NumberDouble(3.0)));
		assert!(set.push(Value::NumberDouble(3.5)));
		assert!(!set.push(Value::Nothing));
		assert_eq!(set.len(), 2);
		assert!(set.contains(&Value::decimal(crate::val::Decimal::from(3))));
	}

	#[test]
	fn array_set_uses_collation() {
		let collator: Arc<dyn Collator> = Arc::new(CaseInsensitiveCollator);
		let mut set = ArraySet::new(Some(collator));
		assert!(set.push(Value::new_string("Hello")));
		assert!(!set.push(Value::new_string("hELLO")));
		let mut plain = ArraySet::new(None);
		plain.push(Value::new_string("Hello"));
		assert!(plain.push(Value::new_string("hELLO")));
	}

	#[test]
	fn set_equality_ignores_order() {
		let a: ArraySet = {
			let mut s = ArraySet::new(None);
			s.push(Value::NumberInt32(1));
			s.push(Value::NumberInt32(2));
			s
		};
		let b: ArraySet = {
			let mut s = ArraySet::new(None);
			s.push(Value::NumberInt64(2));
			s.push(Value::NumberInt64(1));
			s
		};
		assert!(a.set_equals(&b));
	}

	#[test]
	fn object_fields() {
		let mut obj = Object::new();
		obj.push("a", Value::NumberInt32(1));
		obj.push("b", Value::Nothing);
		obj.set("c", Value::Boolean(true));
		obj.set("a", Value::NumberInt32(2));
		assert_eq!(obj.len(), 2);
		assert_eq!(obj.field(0), "a");
		assert!(matches!(obj.get_field("a"), Value::NumberInt32(2)));
		obj.set("a", Value::Nothing);
		assert_eq!(obj.len(), 1);
		assert!(obj.get_field("a").is_nothing());
	}
}
