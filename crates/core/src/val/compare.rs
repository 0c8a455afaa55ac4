//! Total ordering and hashing of values.
//!
//! Values of different canonical types order by their canonical type. Numbers of different
//! widths compare by value, and strings compare under an optional collation. A pair which has no
//! defined order (two sets which differ, or two engine handles) compares as `Nothing`.

use std::cmp::Ordering;
use std::hash::BuildHasher;
use std::sync::Arc;

use super::handles::Collator;
use crate::cnf::HASH_CONTAINER_PREFIX;
use super::tags::widest_numerical_type;
use super::{ArrayEnumerator, ArraySet, ObjectEnumerator, TypeTags, Value};

const HASH_INIT: u64 = 17;

static HASHER: ahash::RandomState = ahash::RandomState::with_seeds(
	0x243f_6a88_85a3_08d3,
	0x1319_8a2e_0370_7344,
	0xa409_3822_299f_31d0,
	0x082e_fa98_ec4e_6c89,
);

fn hash_one<T: std::hash::Hash>(value: T) -> u64 {
	HASHER.hash_one(value)
}

fn hash_combine(seed: u64, value: u64) -> u64 {
	seed.wrapping_mul(31).wrapping_add(value)
}

fn hash_f64(d: f64) -> u64 {
	if d.is_nan() {
		hash_one(f64::NAN.to_bits())
	} else {
		hash_one(d.to_bits())
	}
}

fn hash_object_id(id: &[u8]) -> u64 {
	let lo = id.get(..8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes).unwrap_or(0);
	let hi = id.get(8..12).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes).unwrap_or(0);
	hash_one(lo) ^ hash_one(hi)
}

/// Hashes a value consistently with [`three_way`]: values which compare equal under `collator`
/// hash equal. Engine handles all hash to zero.
pub fn hash_value(value: &Value, collator: Option<&dyn Collator>) -> u64 {
	match value {
		Value::NumberInt32(i) => hash_one(*i as i64),
		Value::NumberInt64(i) | Value::RecordId(i) => hash_one(*i),
		Value::NumberDouble(d) => match super::f64_to_i64_exact(*d) {
			Some(i) => hash_one(i),
			None => hash_f64(*d),
		},
		Value::NumberDecimal(d) => {
			if let Some(i) = d.to_i64_exact() {
				return hash_one(i);
			}
			match value.numeric_convert(TypeTags::NumberDouble) {
				Value::NumberDouble(f) => hash_f64(f),
				_ => hash_one(d.normalized().to_bid()),
			}
		}
		Value::Date(i) => hash_one(*i),
		Value::Timestamp(t) => hash_one(*t),
		Value::Boolean(b) => *b as u64,
		Value::Null | Value::MinKey | Value::MaxKey | Value::BsonUndefined => 0,
		Value::StringSmall(_) | Value::StringBig(_) | Value::BsonString(_) | Value::BsonSymbol(_) => {
			let s = value.string_or_symbol_view().unwrap_or_default();
			match collator {
				Some(c) => hash_one(c.comparison_key(s)),
				None => hash_one(s),
			}
		}
		Value::ObjectId(_) | Value::BsonObjectId(_) => {
			hash_object_id(value.object_id_bytes().unwrap_or_default())
		}
		Value::KsValue(ks) => hash_one(ks.as_bytes()),
		Value::Array(_) | Value::ArraySet(_) | Value::BsonArray(_) => {
			let mut res = HASH_INIT;
			let mut it = ArrayEnumerator::new(value);
			for _ in 0..HASH_CONTAINER_PREFIX {
				if it.at_end() {
					break;
				}
				res = hash_combine(res, hash_value(it.view(), collator));
				it.advance();
			}
			res
		}
		Value::Object(_) | Value::BsonObject(_) => {
			let mut res = HASH_INIT;
			let mut it = ObjectEnumerator::new(value);
			for _ in 0..HASH_CONTAINER_PREFIX {
				if it.at_end() {
					break;
				}
				res = hash_combine(res, hash_value(it.view(), collator));
				it.advance();
			}
			res
		}
		Value::BsonBinData(_) => {
			let data = value.bin_data_view().map(|v| v.data).unwrap_or_default();
			let mut buf = [0u8; 8];
			let n = data.len().min(8);
			buf[..n].copy_from_slice(&data[..n]);
			hash_one(u64::from_le_bytes(buf))
		}
		Value::BsonRegex(_) => match value.bson_regex_view() {
			Some(re) => hash_combine(hash_combine(HASH_INIT, hash_one(re.pattern)), hash_one(re.flags)),
			None => 0,
		},
		Value::BsonJavascript(_) => hash_one(value.javascript_view().unwrap_or_default()),
		Value::BsonDBPointer(_) => match value.db_pointer_view() {
			Some(ptr) => hash_combine(hash_combine(HASH_INIT, hash_one(ptr.ns)), hash_object_id(ptr.id)),
			None => 0,
		},
		Value::BsonCodeWScope(_) => match value.code_w_scope_view() {
			// The scope document is hashed without the collation
			Some(cws) => {
				hash_combine(hash_combine(HASH_INIT, hash_one(cws.code)), hash_value(&cws.scope, None))
			}
			None => 0,
		},
		_ => 0,
	}
}

/// Orders doubles with NaN below every other number, and equal to itself
fn compare_doubles(lhs: f64, rhs: f64) -> Ordering {
	match (lhs.is_nan(), rhs.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Less,
		(false, true) => Ordering::Greater,
		(false, false) => lhs.partial_cmp(&rhs).unwrap_or(Ordering::Equal),
	}
}


fn compare_numbers(lhs: &Value, rhs: &Value) -> Option<Ordering> {
	Some(match widest_numerical_type(lhs.tag(), rhs.tag())? {
		TypeTags::NumberInt32 | TypeTags::NumberInt64 => {
			lhs.to_i64_exact()?.cmp(&rhs.to_i64_exact()?)
		}
		TypeTags::NumberDouble => compare_doubles(lhs.to_f64()?, rhs.to_f64()?),
		_ => lhs.to_decimal()?.cmp(&rhs.to_decimal()?),
	})
}

fn compare_arrays(lhs: &Value, rhs: &Value, collator: Option<&dyn Collator>) -> Option<Ordering> {
	if let (Value::ArraySet(l), Value::ArraySet(r)) = (lhs, rhs) {
		// Sets are unordered, so only equality is defined
		return l.set_equals(r).then_some(Ordering::Equal);
	}
	let mut l = ArrayEnumerator::new(lhs);
	let mut r = ArrayEnumerator::new(rhs);
	while !l.at_end() && !r.at_end() {
		match three_way(l.view(), r.view(), collator)? {
			Ordering::Equal => {}
			ord => return Some(ord),
		}
		l.advance();
		r.advance();
	}
	Some(r.at_end().cmp(&l.at_end()))
}

fn compare_objects(lhs: &Value, rhs: &Value, collator: Option<&dyn Collator>) -> Option<Ordering> {
	let mut l = ObjectEnumerator::new(lhs);
	let mut r = ObjectEnumerator::new(rhs);
	while !l.at_end() && !r.at_end() {
		match l.field_name().cmp(r.field_name()) {
			Ordering::Equal => {}
			ord => return Some(ord),
		}
		match three_way(l.view(), r.view(), collator)? {
			Ordering::Equal => {}
			ord => return Some(ord),
		}
		l.advance();
		r.advance();
	}
	Some(r.at_end().cmp(&l.at_end()))
}

/// Compares two values, returning `None` when the pair has no defined order.
pub fn three_way(lhs: &Value, rhs: &Value, collator: Option<&dyn Collator>) -> Option<Ordering> {
	let (lt, rt) = (lhs.tag(), rhs.tag());
	if lt.is_number() && rt.is_number() {
		return compare_numbers(lhs, rhs);
	}
	if lt.is_string_or_symbol() && rt.is_string_or_symbol() {
		let l = lhs.string_or_symbol_view()?;
		let r = rhs.string_or_symbol_view()?;
		return Some(match collator {
			Some(c) => c.compare(l, r),
			None => l.cmp(r),
		});
	}
	if lt.is_array() && rt.is_array() {
		return compare_arrays(lhs, rhs, collator);
	}
	if lt.is_object() && rt.is_object() {
		return compare_objects(lhs, rhs, collator);
	}
	if lt.is_object_id() && rt.is_object_id() {
		return Some(lhs.object_id_bytes()?.cmp(rhs.object_id_bytes()?));
	}
	match (lhs, rhs) {
		(Value::Date(l), Value::Date(r)) => Some(l.cmp(r)),
		(Value::Timestamp(l), Value::Timestamp(r)) => Some(l.cmp(r)),
		(Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
		(Value::Null, Value::Null)
		| (Value::MinKey, Value::MinKey)
		| (Value::MaxKey, Value::MaxKey)
		| (Value::BsonUndefined, Value::BsonUndefined)
		| (Value::Nothing, Value::Nothing) => Some(Ordering::Equal),
		(Value::RecordId(l), Value::RecordId(r)) => Some(l.cmp(r)),
		(Value::KsValue(l), Value::KsValue(r)) => Some(l.cmp(r)),
		(Value::BsonBinData(l), Value::BsonBinData(r)) => {
			let (ld, rd) = (lhs.bin_data_view()?, rhs.bin_data_view()?);
			// Size first, then subtype and payload together
			Some(ld.data.len().cmp(&rd.data.len()).then_with(|| l.cmp(r)))
		}
		(Value::BsonRegex(_), Value::BsonRegex(_)) => {
			let (l, r) = (lhs.bson_regex_view()?, rhs.bson_regex_view()?);
			Some(l.pattern.cmp(r.pattern).then_with(|| l.flags.cmp(r.flags)))
		}
		(Value::BsonJavascript(_), Value::BsonJavascript(_)) => {
			Some(lhs.javascript_view()?.cmp(rhs.javascript_view()?))
		}
		(Value::BsonDBPointer(_), Value::BsonDBPointer(_)) => {
			let (l, r) = (lhs.db_pointer_view()?, rhs.db_pointer_view()?);
			Some(
				l.ns.len()
					.cmp(&r.ns.len())
					.then_with(|| l.ns.cmp(r.ns))
					.then_with(|| l.id.cmp(r.id)),
			)
		}
		(Value::BsonCodeWScope(_), Value::BsonCodeWScope(_)) => {
			let (l, r) = (lhs.code_w_scope_view()?, rhs.code_w_scope_view()?);
			match l.code.cmp(r.code) {
				Ordering::Equal => three_way(&l.scope, &r.scope, None),
				ord => Some(ord),
			}
		}
		_ => {
			let lty = lt.to_type()?;
			let rty = rt.to_type()?;
			if lty == rty {
				return None;
			}
			Some(lty.canonical_order().cmp(&rty.canonical_order()))
		}
	}
}

/// Compares two values, producing an `Int32` of -1, 0 or 1, or `Nothing` when the pair has no
/// defined order.
pub fn compare_value(lhs: &Value, rhs: &Value, collator: Option<&dyn Collator>) -> Value {
	match three_way(lhs, rhs, collator) {
		Some(ord) => Value::NumberInt32(ord as i32),
		None => Value::Nothing,
	}
}

/// Copies the elements of any array into a new set. Other values yield `Nothing`.
pub fn array_to_set(value: &Value, collator: Option<Arc<dyn Collator>>) -> Value {
	if !value.tag().is_array() {
		return Value::Nothing;
	}
	let mut set = ArraySet::new(collator);
	let mut it = ArrayEnumerator::new(value);
	while !it.at_end() {
		set.push(it.view().clone());
		it.advance();
	}
	Value::ArraySet(Box::new(set))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::val::handles::{CaseInsensitiveCollator, ReverseStringCollator};
	use crate::val::json::from_json;
	use crate::val::{Decimal, Object, TimeZoneDatabase, bson};

	fn cmp(lhs: &Value, rhs: &Value) -> Option<i32> {
		match compare_value(lhs, rhs, None) {
			Value::NumberInt32(i) => Some(i),
			_ => None,
		}
	}

	#[rstest]
	#[case::int_vs_long(Value::NumberInt32(1), Value::NumberInt64(2), Some(-1))]
	#[case::long_vs_double(Value::NumberInt64(3), Value::NumberDouble(3.0), Some(0))]
	#[case::nan_smallest(Value::NumberDouble(f64::NAN), Value::NumberInt32(i32::MIN), Some(-1))]
	#[case::nan_equal(Value::NumberDouble(f64::NAN), Value::NumberDouble(f64::NAN), Some(0))]
	#[case::decimal_vs_int(Value::decimal(Decimal::new(25, 1)), Value::NumberInt32(2), Some(1))]
	#[case::decimal_vs_infinity(Value::decimal(Decimal::MAX), Value::NumberDouble(f64::INFINITY), Some(-1))]
	#[case::null_before_number(Value::Null, Value::NumberInt32(0), Some(-1))]
	#[case::minkey_first(Value::MinKey, Value::Null, Some(-1))]
	#[case::maxkey_last(Value::MaxKey, Value::new_string("z"), Some(1))]
	#[case::string_vs_symbol(Value::new_string("abc"), Value::bson_symbol("abc"), Some(0))]
	#[case::bool_after_object_id(Value::Boolean(false), Value::object_id([0xff; 12]), Some(1))]
	#[case::date_vs_timestamp(Value::Date(i64::MAX), Value::Timestamp(0), Some(-1))]
	#[case::nothing_equal(Value::Nothing, Value::Nothing, Some(0))]
	#[case::bin_data_size_first(Value::bin_data(9, b"a"), Value::bin_data(0, b"ab"), Some(-1))]
	#[case::regex_pattern_then_flags(Value::bson_regex("a", "i"), Value::bson_regex("a", "m"), Some(-1))]
	#[case::db_pointer_ns_length(
		Value::bson_db_pointer("zz", &[0; 12]),
		Value::bson_db_pointer("aaa", &[0; 12]),
		Some(-1)
	)]
	#[case::handles_undefined(
		Value::TimeZoneDB(Arc::new(TimeZoneDatabase::new())),
		Value::TimeZoneDB(Arc::new(TimeZoneDatabase::new())),
		None
	)]
	fn ordering(#[case] lhs: Value, #[case] rhs: Value, #[case] expected: Option<i32>) {
		assert_eq!(cmp(&lhs, &rhs), expected);
		if let Some(e) = expected {
			assert_eq!(cmp(&rhs, &lhs), Some(-e));
		}
	}

	#[test]
	fn arrays_compare_element_wise_then_by_length() {
		let short = Value::array(vec![1.into(), 2.into()]);
		let long = Value::array(vec![1.into(), 2.into(), 0.into()]);
		let bigger = Value::array(vec![1.into(), 3.into()]);
		assert_eq!(cmp(&short, &long), Some(-1));
		assert_eq!(cmp(&bigger, &long), Some(1));
	}

	#[test]
	fn sets_only_compare_for_equality() {
		let a = array_to_set(&Value::array(vec![1.into(), 2.into()]), None);
		let b = array_to_set(&Value::array(vec![2.into(), 1.into()]), None);
		let c = array_to_set(&Value::array(vec![3.into()]), None);
		assert_eq!(cmp(&a, &b), Some(0));
		assert_eq!(cmp(&a, &c), None);
		assert_eq!(cmp(&a, &Value::array(vec![1.into(), 3.into()])), Some(-1));
	}

	#[test]
	fn objects_compare_names_before_values() {
		let a = from_json(&serde_json::json!({"a": 5})).unwrap();
		let b = from_json(&serde_json::json!({"b": 1})).unwrap();
		assert_eq!(cmp(&a, &b), Some(-1));
		let raw = bson::decode_document(bson::encode_document(&a).unwrap().into()).unwrap();
		assert_eq!(cmp(&a, &raw), Some(0));
		assert_eq!(hash_value(&a, None), hash_value(&raw, None));
	}

	#[test]
	fn collation_applies_to_nested_strings_but_not_code_scope() {
		let ci = CaseInsensitiveCollator;
		let a = Value::array(vec![Value::new_string("ABC")]);
		let b = Value::array(vec![Value::new_string("abc")]);
		assert_eq!(three_way(&a, &b, Some(&ci)), Some(Ordering::Equal));
		assert_eq!(hash_value(&a, Some(&ci)), hash_value(&b, Some(&ci)));
		let scope_a: Value = [("x", Value::new_string("ABC"))].into_iter().collect::<Object>().into();
		let scope_b: Value = [("x", Value::new_string("abc"))].into_iter().collect::<Object>().into();
		let cws_a = Value::bson_code_w_scope("f", &scope_a).unwrap();
		let cws_b = Value::bson_code_w_scope("f", &scope_b).unwrap();
		assert_eq!(three_way(&cws_a, &cws_b, Some(&ci)), Some(Ordering::Less));
		let rev = ReverseStringCollator;
		assert_eq!(
			three_way(&Value::new_string("ab"), &Value::new_string("ba"), Some(&rev)),
			Some(Ordering::Greater)
		);
	}

	#[rstest]
	#[case::int_long(Value::NumberInt32(7), Value::NumberInt64(7))]
	#[case::long_double(Value::NumberInt64(7), Value::NumberDouble(7.0))]
	#[case::double_decimal(Value::NumberDouble(7.5), Value::decimal(Decimal::new(75, 1)))]
	#[case::string_symbol(Value::new_string("hello"), Value::bson_symbol("hello"))]
	fn equal_values_hash_equal(#[case] lhs: Value, #[case] rhs: Value) {
		assert_eq!(cmp(&lhs, &rhs), Some(0));
		assert_eq!(hash_value(&lhs, None), hash_value(&rhs, None));
	}

	#[test]
	fn integral_numbers_share_one_set_bucket() {
		let sevens = vec![
			Value::decimal(Decimal::from(7)),
			Value::NumberInt32(7),
			Value::NumberInt64(7),
			Value::NumberDouble(7.0),
		];
		for lhs in &sevens {
			for rhs in &sevens {
				assert_eq!(cmp(lhs, rhs), Some(0), "{lhs} vs {rhs}");
				assert_eq!(hash_value(lhs, None), hash_value(rhs, None), "{lhs} vs {rhs}");
			}
		}
		let set = array_to_set(&Value::array(sevens), None);
		assert_eq!(set.as_array_set().map(|s| s.len()), Some(1));
	}

	#[test]
	fn canonical_order_is_total_and_transitive() {
		let table = vec![
			Value::MinKey,
			Value::Null,
			Value::NumberDouble(f64::NAN),
			Value::decimal(Decimal::NEG_INFINITY),
			Value::NumberInt32(-3),
			Value::decimal(Decimal::new(-25, 1)),
			Value::NumberInt64(0),
			Value::NumberDouble(0.5),
			Value::decimal(Decimal::ONE),
			Value::NumberInt64(i64::MAX),
			Value::NumberDouble(f64::INFINITY),
			Value::new_string(""),
			Value::bson_symbol("m"),
			Value::new_string("a string stored on the heap"),
			from_json(&serde_json::json!({})).unwrap(),
			from_json(&serde_json::json!({"a": 1})).unwrap(),
			from_json(&serde_json::json!({"a": "x"})).unwrap(),
			Value::array(vec![]),
			Value::array(vec![Value::NumberInt32(1)]),
			Value::array(vec![Value::new_string("x")]),
			Value::bin_data(0, b"ab"),
			Value::bin_data(5, b"ab"),
			Value::object_id([1; 12]),
			Value::object_id([2; 12]),
			Value::Boolean(false),
			Value::Boolean(true),
			Value::Date(-1),
			Value::Date(1),
			Value::Timestamp(1),
			Value::bson_regex("a", ""),
			Value::bson_db_pointer("db.c", &[0; 12]),
			Value::bson_javascript("f()"),
			Value::MaxKey,
		];
		for a in &table {
			for b in &table {
				let ab = three_way(a, b, None);
				assert!(ab.is_some(), "{a} and {b} have no order");
				assert_eq!(ab.map(Ordering::reverse), three_way(b, a, None), "{a} vs {b}");
				for c in &table {
					let bc = three_way(b, c, None);
					if ab != Some(Ordering::Greater) && bc != Some(Ordering::Greater) {
						assert_ne!(three_way(a, c, None), Some(Ordering::Greater), "{a} <= {b} <= {c}");
					}
				}
			}
		}
	}
}
