//! Query predicates with MQL matching semantics.
//!
//! A predicate on a path holds if any value reachable along the path satisfies it. When a reached
//! value is an array, its elements are tried as well, so `{a: 2}` matches `{a: [1, 2]}`.

use std::cmp::Ordering;

use anyhow::{Result, bail, ensure};
use serde_json::{Map, Value as Json, json};

use crate::err::Error;
use crate::expr::Dependencies;
use crate::val::json::{from_json, to_json};
use crate::val::tags::mask;
use crate::val::{ArrayEnumerator, BsonType, PcreRegex, Value, three_way};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
	Eq,
	Lt,
	Lte,
	Gt,
	Gte,
}

impl Comparison {
	fn name(self) -> &'static str {
		match self {
			Comparison::Eq => "$eq",
			Comparison::Lt => "$lt",
			Comparison::Lte => "$lte",
			Comparison::Gt => "$gt",
			Comparison::Gte => "$gte",
		}
	}

	fn accepts(self, ord: Ordering) -> bool {
		match self {
			Comparison::Eq => ord == Ordering::Equal,
			Comparison::Lt => ord == Ordering::Less,
			Comparison::Lte => ord != Ordering::Greater,
			Comparison::Gt => ord == Ordering::Greater,
			Comparison::Gte => ord != Ordering::Less,
		}
	}
}

/// A condition on the values found at one path
#[derive(Clone, Debug)]
pub enum Predicate {
	Compare(Comparison, Value),
	In(Vec<Value>),
	Exists(bool),
	Type(u32),
	Regex(PcreRegex),
	Size(usize),
	All(Vec<Value>),
	Mod(i64, i64),
	/// Some array element matches a document predicate
	ElemMatchObject(Box<MatchExpression>),
	/// Some array element satisfies every value predicate
	ElemMatchValue(Vec<Predicate>),
	Not(Box<Predicate>),
	And(Vec<Predicate>),
}

#[derive(Clone, Debug)]
pub enum MatchExpression {
	AlwaysTrue,
	And(Vec<MatchExpression>),
	Or(Vec<MatchExpression>),
	Nor(Vec<MatchExpression>),
	Path {
		path: String,
		predicate: Predicate,
	},
}

fn bad(message: impl Into<String>) -> anyhow::Error {
	anyhow::Error::new(Error::BadValue(message.into()))
}

impl MatchExpression {
	pub fn parse(query: &Json) -> Result<Self> {
		let Json::Object(map) = query else {
			bail!(bad("the match filter must be an object"));
		};
		let mut clauses = Vec::with_capacity(map.len());
		for (key, value) in map {
			clauses.push(match key.as_str() {
				"$and" => MatchExpression::And(Self::parse_list(key, value)?),
				"$or" => MatchExpression::Or(Self::parse_list(key, value)?),
				"$nor" => MatchExpression::Nor(Self::parse_list(key, value)?),
				k if k.starts_with('$') => bail!(bad(format!("unknown top level operator: {k}"))),
				path => MatchExpression::Path {
					path: path.to_owned(),
					predicate: Predicate::parse(value)?,
				},
			});
		}
		Ok(match clauses.len() {
			0 => MatchExpression::AlwaysTrue,
			1 => clauses.swap_remove(0),
			_ => MatchExpression::And(clauses),
		})
	}

	fn parse_list(op: &str, value: &Json) -> Result<Vec<MatchExpression>> {
		let Json::Array(items) = value else {
			bail!(bad(format!("{op} must be an array")));
		};
		ensure!(!items.is_empty(), bad(format!("{op} must be a nonempty array")));
		items.iter().map(Self::parse).collect()
	}

	pub fn is_trivially_true(&self) -> bool {
		match self {
			MatchExpression::AlwaysTrue => true,
			MatchExpression::And(children) => children.iter().all(Self::is_trivially_true),
			_ => false,
		}
	}

	/// The conjunction of two predicates
	pub fn and(self, other: MatchExpression) -> MatchExpression {
		match (self, other) {
			(MatchExpression::AlwaysTrue, other) | (other, MatchExpression::AlwaysTrue) => other,
			(MatchExpression::And(mut lhs), MatchExpression::And(rhs)) => {
				lhs.extend(rhs);
				MatchExpression::And(lhs)
			}
			(MatchExpression::And(mut lhs), rhs) => {
				lhs.push(rhs);
				MatchExpression::And(lhs)
			}
			(lhs, rhs) => MatchExpression::And(vec![lhs, rhs]),
		}
	}

	pub fn matches(&self, doc: &Value) -> bool {
		match self {
			MatchExpression::AlwaysTrue => true,
			MatchExpression::And(children) => children.iter().all(|c| c.matches(doc)),
			MatchExpression::Or(children) => children.iter().any(|c| c.matches(doc)),
			MatchExpression::Nor(children) => !children.iter().any(|c| c.matches(doc)),
			MatchExpression::Path {
				path,
				predicate,
			} => predicate.matches_path(doc, path),
		}
	}

	pub fn add_dependencies(&self, deps: &mut Dependencies) {
		match self {
			MatchExpression::AlwaysTrue => {}
			MatchExpression::And(children) | MatchExpression::Or(children) | MatchExpression::Nor(children) => {
				for child in children {
					child.add_dependencies(deps);
				}
			}
			MatchExpression::Path {
				path,
				..
			} => deps.add_field(path.as_str()),
		}
	}

	pub fn serialize(&self) -> Json {
		match self {
			MatchExpression::AlwaysTrue => json!({}),
			MatchExpression::And(children) => json!({"$and": children.iter().map(Self::serialize).collect::<Vec<_>>()}),
			MatchExpression::Or(children) => json!({"$or": children.iter().map(Self::serialize).collect::<Vec<_>>()}),
			MatchExpression::Nor(children) => json!({"$nor": children.iter().map(Self::serialize).collect::<Vec<_>>()}),
			MatchExpression::Path {
				path,
				predicate,
			} => {
				let mut map = Map::new();
				map.insert(path.clone(), predicate.serialize());
				Json::Object(map)
			}
		}
	}
}

fn is_operator_object(value: &Json) -> bool {
	match value {
		Json::Object(map) => map.keys().next().is_some_and(|k| k.starts_with('$')) && !is_extended_json(map),
		_ => false,
	}
}

fn is_extended_json(map: &Map<String, Json>) -> bool {
	const WRAPPERS: &[&str] = &[
		"$oid",
		"$date",
		"$numberLong",
		"$numberDecimal",
		"$numberInt",
		"$numberDouble",
		"$binary",
		"$regularExpression",
		"$timestamp",
		"$minKey",
		"$maxKey",
		"$undefined",
		"$symbol",
		"$code",
	];
	map.len() <= 2 && map.keys().next().is_some_and(|k| WRAPPERS.contains(&k.as_str()))
}

fn parse_type(spec: &Json) -> Result<u32> {
	const ALL: &[BsonType] = &[
		BsonType::MinKey,
		BsonType::NumberDouble,
		BsonType::String,
		BsonType::Object,
		BsonType::Array,
		BsonType::BinData,
		BsonType::Undefined,
		BsonType::ObjectId,
		BsonType::Bool,
		BsonType::Date,
		BsonType::Null,
		BsonType::Regex,
		BsonType::DBPointer,
		BsonType::Code,
		BsonType::Symbol,
		BsonType::CodeWScope,
		BsonType::NumberInt,
		BsonType::Timestamp,
		BsonType::NumberLong,
		BsonType::NumberDecimal,
		BsonType::MaxKey,
	];
	match spec {
		Json::String(alias) if alias == "number" => Ok(mask::NUMBER),
		Json::String(alias) => ALL
			.iter()
			.find(|t| t.alias() == alias)
			.map(|t| t.mask())
			.ok_or_else(|| bad(format!("unknown type name alias: {alias}"))),
		Json::Number(n) => n
			.as_i64()
			.and_then(|c| u8::try_from(c & 0xff).ok())
			.and_then(BsonType::from_code)
			.map(BsonType::mask)
			.ok_or_else(|| bad(format!("invalid numerical type code: {n}"))),
		Json::Array(items) => items.iter().try_fold(0, |acc, item| Ok(acc | parse_type(item)?)),
		_ => bail!(bad("type must be represented as a number or a string")),
	}
}

fn values_of(value: &Json, op: &str) -> Result<Vec<Value>> {
	let Json::Array(items) = value else {
		bail!(bad(format!("{op} needs an array")));
	};
	items.iter().map(from_json).collect()
}

impl Predicate {
	fn parse(value: &Json) -> Result<Self> {
		if !is_operator_object(value) {
			return Self::equality(from_json(value)?);
		}
		let Json::Object(map) = value else {
			return Self::equality(from_json(value)?);
		};
		let options = map.get("$options").and_then(Json::as_str).unwrap_or("");
		let mut preds = Vec::with_capacity(map.len());
		for (op, arg) in map {
			preds.push(match op.as_str() {
				"$eq" => Self::equality(from_json(arg)?)?,
				"$ne" => Predicate::Not(Box::new(Self::equality(from_json(arg)?)?)),
				"$lt" => Predicate::Compare(Comparison::Lt, from_json(arg)?),
				"$lte" => Predicate::Compare(Comparison::Lte, from_json(arg)?),
				"$gt" => Predicate::Compare(Comparison::Gt, from_json(arg)?),
				"$gte" => Predicate::Compare(Comparison::Gte, from_json(arg)?),
				"$in" => Predicate::In(values_of(arg, op)?),
				"$nin" => Predicate::Not(Box::new(Predicate::In(values_of(arg, op)?))),
				"$exists" => Predicate::Exists(arg.as_bool().unwrap_or_else(|| arg.as_i64().is_some_and(|n| n != 0))),
				"$type" => Predicate::Type(parse_type(arg)?),
				"$regex" => match arg {
					Json::String(pattern) => Predicate::Regex(PcreRegex::new(pattern, options)?),
					other => match from_json(other)?.bson_regex_view() {
						Some(re) => Predicate::Regex(PcreRegex::new(re.pattern, re.flags)?),
						None => bail!(bad("$regex has to be a string")),
					},
				},
				"$options" => continue,
				"$size" => match arg.as_i64() {
					Some(n) if n >= 0 => Predicate::Size(n as usize),
					_ => bail!(bad("$size needs a non-negative integer")),
				},
				"$all" => Predicate::All(values_of(arg, op)?),
				"$mod" => match arg.as_array().map(|a| (a.first().and_then(Json::as_i64), a.get(1).and_then(Json::as_i64))) {
					Some((Some(0), Some(_))) => bail!(bad("divisor cannot be 0")),
					Some((Some(d), Some(r))) => Predicate::Mod(d, r),
					_ => bail!(bad("malformed mod, needs to be an array of divisor and remainder")),
				},
				"$elemMatch" => {
					if is_operator_object(arg) {
						match Self::parse(arg)? {
							Predicate::And(preds) => Predicate::ElemMatchValue(preds),
							pred => Predicate::ElemMatchValue(vec![pred]),
						}
					} else {
						Predicate::ElemMatchObject(Box::new(MatchExpression::parse(arg)?))
					}
				}
				"$not" => {
					ensure!(is_operator_object(arg), bad("$not needs a regex or a document"));
					Predicate::Not(Box::new(Self::parse(arg)?))
				}
				other => bail!(bad(format!("unknown operator: {other}"))),
			});
		}
		Ok(match preds.len() {
			1 => preds.swap_remove(0),
			_ => Predicate::And(preds),
		})
	}

	fn equality(value: Value) -> Result<Self> {
		Ok(match value.bson_regex_view() {
			Some(re) => Predicate::Regex(PcreRegex::new(re.pattern, re.flags)?),
			None => Predicate::Compare(Comparison::Eq, value),
		})
	}

	/// Whether the predicate holds for a document which lacks the path
	fn matches_missing(&self) -> bool {
		match self {
			Predicate::Compare(Comparison::Eq | Comparison::Lte | Comparison::Gte, v) => v.is_null(),
			Predicate::In(values) => values.iter().any(Value::is_null),
			_ => false,
		}
	}

	fn matches_path(&self, doc: &Value, path: &str) -> bool {
		let mut found = Vec::new();
		doc.collect_path_values(path, &mut found);
		match self {
			Predicate::Exists(exists) => found.is_empty() != *exists,
			Predicate::Not(inner) => !inner.matches_path(doc, path),
			Predicate::And(preds) => preds.iter().all(|p| p.matches_path(doc, path)),
			Predicate::All(targets) => {
				!targets.is_empty()
					&& targets.iter().all(|t| found.iter().any(|v| self::equals_or_contains(v, t)))
			}
			_ if found.is_empty() => self.matches_missing(),
			_ => found.iter().any(|v| self.matches_found(v)),
		}
	}

	fn matches_found(&self, value: &Value) -> bool {
		if self.matches_value(value) {
			return true;
		}
		if !value.tag().is_array() || matches!(self, Predicate::Size(_) | Predicate::ElemMatchObject(_) | Predicate::ElemMatchValue(_)) {
			return false;
		}
		let mut it = ArrayEnumerator::new(value);
		while !it.at_end() {
			if self.matches_value(it.view()) {
				return true;
			}
			it.advance();
		}
		false
	}

	fn matches_value(&self, value: &Value) -> bool {
		match self {
			Predicate::Compare(cmp, target) => compare(value, target).is_some_and(|ord| cmp.accepts(ord)),
			Predicate::In(targets) => targets.iter().any(|t| match t.bson_regex_view() {
				Some(re) => PcreRegex::new(re.pattern, re.flags)
					.is_ok_and(|re| value.string_view().is_some_and(|s| re.regex().is_match(s))),
				None => compare(value, t) == Some(Ordering::Equal),
			}),
			Predicate::Exists(exists) => *exists,
			Predicate::Type(mask) => value.tag().type_mask() & mask != 0,
			Predicate::Regex(re) => value.string_or_symbol_view().is_some_and(|s| re.regex().is_match(s)),
			Predicate::Size(n) => value.as_array().is_some_and(|a| a.len() == *n)
				|| (value.tag().is_array() && count_elements(value) == *n),
			Predicate::All(targets) => targets.iter().all(|t| equals_or_contains(value, t)),
			Predicate::Mod(divisor, remainder) => value
				.to_f64()
				.filter(|d| d.is_finite())
				.is_some_and(|d| (d.trunc() as i64).wrapping_rem(*divisor) == *remainder),
			Predicate::ElemMatchObject(expr) => any_element(value, |e| e.tag().is_object() && expr.matches(e)),
			Predicate::ElemMatchValue(preds) => any_element(value, |e| preds.iter().all(|p| p.matches_found(e))),
			Predicate::Not(inner) => !inner.matches_found(value),
			Predicate::And(preds) => preds.iter().all(|p| p.matches_found(value)),
		}
	}

	fn serialize(&self) -> Json {
		let value = |v: &Value| to_json(v).unwrap_or(Json::Null);
		let values = |vs: &[Value]| Json::Array(vs.iter().map(value).collect());
		match self {
			Predicate::Compare(cmp, v) => json!({ cmp.name(): value(v) }),
			Predicate::In(vs) => json!({"$in": values(vs)}),
			Predicate::Exists(e) => json!({"$exists": e}),
			Predicate::Type(m) => json!({"$type": m}),
			Predicate::Regex(re) => json!({"$regex": re.pattern(), "$options": re.options()}),
			Predicate::Size(n) => json!({"$size": n}),
			Predicate::All(vs) => json!({"$all": values(vs)}),
			Predicate::Mod(d, r) => json!({"$mod": [d, r]}),
			Predicate::ElemMatchObject(expr) => json!({"$elemMatch": expr.serialize()}),
			Predicate::ElemMatchValue(preds) => {
				let mut map = Map::new();
				for pred in preds {
					if let Json::Object(m) = pred.serialize() {
						map.extend(m);
					}
				}
				json!({"$elemMatch": map})
			}
			Predicate::Not(inner) => json!({"$not": inner.serialize()}),
			Predicate::And(preds) => {
				let mut map = Map::new();
				for pred in preds {
					if let Json::Object(m) = pred.serialize() {
						map.extend(m);
					}
				}
				Json::Object(map)
			}
		}
	}
}

/// Orders two values of the same canonical type. Values of different types never match a
/// comparison, except that null and undefined are interchangeable.
fn compare(value: &Value, target: &Value) -> Option<Ordering> {
	let order = |v: &Value| match v {
		Value::BsonUndefined => BsonType::Null.canonical_order(),
		v => v.tag().to_type().map(BsonType::canonical_order).unwrap_or(0),
	};
	if order(value) != order(target) {
		return None;
	}
	if value.is_null() || matches!(value, Value::BsonUndefined) {
		return Some(Ordering::Equal);
	}
	three_way(value, target, None)
}

fn equals_or_contains(value: &Value, target: &Value) -> bool {
	compare(value, target) == Some(Ordering::Equal) || any_element(value, |e| compare(e, target) == Some(Ordering::Equal))
}

fn any_element(value: &Value, mut f: impl FnMut(&Value) -> bool) -> bool {
	if !value.tag().is_array() {
		return false;
	}
	let mut it = ArrayEnumerator::new(value);
	while !it.at_end() {
		if f(it.view()) {
			return true;
		}
		it.advance();
	}
	false
}

fn count_elements(value: &Value) -> usize {
	let mut count = 0;
	let mut it = ArrayEnumerator::new(value);
	while !it.at_end() {
		count += 1;
		it.advance();
	}
	count
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn matches(filter: Json, doc: Json) -> bool {
		MatchExpression::parse(&filter).unwrap().matches(&from_json(&doc).unwrap())
	}

	#[rstest]
	#[case::equality(json!({"a": 1}), json!({"a": 1}), true)]
	#[case::numeric_types_mix(json!({"a": 1}), json!({"a": 1.0}), true)]
	#[case::array_element(json!({"a": 2}), json!({"a": [1, 2]}), true)]
	#[case::whole_array(json!({"a": [1, 2]}), json!({"a": [1, 2]}), true)]
	#[case::nested_array_path(json!({"a.b": 3}), json!({"a": [{"b": 1}, {"b": 3}]}), true)]
	#[case::null_matches_missing(json!({"a": null}), json!({"b": 1}), true)]
	#[case::type_bracketing(json!({"a": {"$gt": 1}}), json!({"a": "x"}), false)]
	#[case::range_on_elements(json!({"a": {"$gt": 1, "$lt": 3}}), json!({"a": [0, 4]}), true)]
	#[case::elem_match_is_stricter(json!({"a": {"$elemMatch": {"$gt": 1, "$lt": 3}}}), json!({"a": [0, 4]}), false)]
	#[case::elem_match_object(json!({"a": {"$elemMatch": {"b": 1}}}), json!({"a": [{"b": 2}, {"b": 1}]}), true)]
	#[case::ne_on_array(json!({"a": {"$ne": 2}}), json!({"a": [1, 2]}), false)]
	#[case::in_list(json!({"a": {"$in": [5, 6]}}), json!({"a": 6}), true)]
	#[case::nin_missing(json!({"a": {"$nin": [5]}}), json!({}), true)]
	#[case::exists(json!({"a": {"$exists": false}}), json!({"a": null}), false)]
	#[case::size(json!({"a": {"$size": 2}}), json!({"a": [1, [2, 3]]}), true)]
	#[case::all(json!({"a": {"$all": [1, 3]}}), json!({"a": [1, 2, 3]}), true)]
	#[case::regex(json!({"s": {"$regex": "^ab", "$options": "i"}}), json!({"s": "ABc"}), true)]
	#[case::type_alias(json!({"a": {"$type": "number"}}), json!({"a": 1.5}), true)]
	#[case::or(json!({"$or": [{"a": 1}, {"b": 1}]}), json!({"b": 1}), true)]
	#[case::nor(json!({"$nor": [{"a": 1}]}), json!({"a": 1}), false)]
	#[case::not(json!({"a": {"$not": {"$gt": 5}}}), json!({"a": 3}), true)]
	#[case::modulo(json!({"a": {"$mod": [4, 1]}}), json!({"a": 9}), true)]
	fn mql_semantics(#[case] filter: Json, #[case] doc: Json, #[case] expected: bool) {
		assert_eq!(matches(filter, doc), expected);
	}

	#[test]
	fn conjunctions_flatten() {
		let a = MatchExpression::parse(&json!({"a": 1})).unwrap();
		let b = MatchExpression::parse(&json!({"b": 1})).unwrap();
		let both = a.and(b).and(MatchExpression::AlwaysTrue);
		assert_eq!(both.serialize(), json!({"$and": [{"a": {"$eq": 1}}, {"b": {"$eq": 1}}]}));
	}

	#[test]
	fn unknown_operators_are_rejected() {
		assert!(MatchExpression::parse(&json!({"a": {"$bogus": 1}})).is_err());
		assert!(MatchExpression::parse(&json!({"$where": "x"})).is_err());
	}
}
