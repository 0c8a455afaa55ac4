//! Conversion between values and extended JSON.
//!
//! Type wrappers such as `$oid`, `$date` or `$binary` are read and written through the `bson`
//! extended JSON codec. `$numberDecimal` goes through [`Decimal`] so that every digit, and the
//! special values, are preserved.

use anyhow::{Result, bail};
use bson::Bson;
use serde_json::{Map, Number, json};

use super::bson::{from_bson, to_bson};
use super::{Array, ArrayEnumerator, Decimal, Object, ObjectEnumerator, Value};
use crate::err::Error;

fn bad(message: impl Into<String>) -> anyhow::Error {
	anyhow::Error::new(Error::BadValue(message.into()))
}

/// Builds a value from extended JSON in either its canonical or relaxed form. Plain integers
/// become `Int32` when they fit, and `Int64` otherwise.
pub fn from_json(json: &serde_json::Value) -> Result<Value> {
	Ok(match json {
		serde_json::Value::Null => Value::Null,
		serde_json::Value::Bool(b) => Value::Boolean(*b),
		serde_json::Value::Number(n) => from_number(n)?,
		serde_json::Value::String(s) => Value::new_string(s),
		serde_json::Value::Array(items) => {
			let mut arr = Array::with_capacity(items.len());
			for item in items {
				arr.push(from_json(item)?);
			}
			arr.into()
		}
		serde_json::Value::Object(map) => {
			if let Some(special) = from_wrapper(map)? {
				return Ok(special);
			}
			let mut obj = Object::with_capacity(map.len());
			for (k, v) in map {
				obj.push(k.as_str(), from_json(v)?);
			}
			obj.into()
		}
	})
}

fn from_number(n: &Number) -> Result<Value> {
	if let Some(i) = n.as_i64() {
		return Ok(match i32::try_from(i) {
			Ok(small) => Value::NumberInt32(small),
			Err(_) => Value::NumberInt64(i),
		});
	}
	match n.as_f64() {
		Some(d) => Ok(Value::NumberDouble(d)),
		None => Err(bad(format!("number out of range: {n}"))),
	}
}

/// Reads an object whose first key names a type wrapper. Objects with any other `$` key are
/// left to be read as plain documents.
fn from_wrapper(map: &Map<String, serde_json::Value>) -> Result<Option<Value>> {
	let Some((key, inner)) = map.iter().next() else {
		return Ok(None);
	};
	if !key.starts_with('$') {
		return Ok(None);
	}
	if key == "$numberDecimal" && map.len() == 1 {
		let Some(text) = inner.as_str() else {
			bail!(bad("$numberDecimal must be a string"));
		};
		let d = Decimal::parse(text).ok_or_else(|| bad(format!("invalid $numberDecimal: {text}")))?;
		return Ok(Some(Value::decimal(d)));
	}
	let parsed = Bson::try_from(serde_json::Value::Object(map.clone()))
		.map_err(|e| bad(format!("invalid {key}: {e}")))?;
	Ok(match parsed {
		Bson::Document(_) => None,
		other => Some(from_bson(other)),
	})
}

/// Renders a value as relaxed extended JSON. Engine handles have no JSON form and are rejected.
pub fn to_json(value: &Value) -> Result<serde_json::Value> {
	Ok(match value {
		Value::Nothing => bail!(bad("missing values cannot be rendered")),
		Value::NumberInt32(i) => json!(i),
		Value::NumberInt64(i) | Value::RecordId(i) => json!(i),
		Value::NumberDecimal(d) => json!({"$numberDecimal": d.to_string()}),
		Value::Boolean(b) => json!(b),
		Value::Null => serde_json::Value::Null,
		Value::StringSmall(_) | Value::StringBig(_) | Value::BsonString(_) => {
			json!(value.string_view().unwrap_or_default())
		}
		Value::Array(_) | Value::ArraySet(_) | Value::BsonArray(_) => {
			let mut out = Vec::new();
			let mut it = ArrayEnumerator::new(value);
			while !it.at_end() {
				out.push(to_json(it.view())?);
				it.advance();
			}
			serde_json::Value::Array(out)
		}
		Value::Object(_) | Value::BsonObject(_) => {
			let mut out = Map::new();
			let mut it = ObjectEnumerator::new(value);
			while !it.at_end() {
				if !it.view().is_nothing() {
					out.insert(it.field_name().to_owned(), to_json(it.view())?);
				}
				it.advance();
			}
			serde_json::Value::Object(out)
		}
		Value::BsonCodeWScope(_) => {
			let cws = value.code_w_scope_view().ok_or_else(|| bad("invalid code payload"))?;
			json!({"$code": cws.code, "$scope": to_json(&cws.scope)?})
		}
		v if v.tag().to_type().is_some() => to_bson(v)?.into_relaxed_extjson(),
		other => bail!(bad(format!("{} values cannot be rendered as JSON", other.tag()))),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::val::TypeTags;

	#[test]
	fn wrappers() {
		let v = from_json(&json!({
			"i": 1,
			"l": 5_000_000_000i64,
			"d": 1.5,
			"dec": {"$numberDecimal": "1.10"},
			"date": {"$date": {"$numberLong": "86400000"}},
			"oid": {"$oid": "0102030405060708090a0b0c"},
			"bin": {"$binary": {"base64": "AQI=", "subType": "00"}},
			"re": {"$regularExpression": {"pattern": "a+", "options": "i"}},
			"ts": {"$timestamp": {"t": 1, "i": 2}},
			"min": {"$minKey": 1}
		}))
		.unwrap();
		let tags: Vec<TypeTags> = ["i", "l", "d", "dec", "date", "oid", "bin", "re", "ts", "min"]
			.iter()
			.map(|f| v.get_field(f).tag())
			.collect();
		assert_eq!(
			tags,
			vec![
				TypeTags::NumberInt32,
				TypeTags::NumberInt64,
				TypeTags::NumberDouble,
				TypeTags::NumberDecimal,
				TypeTags::Date,
				TypeTags::ObjectId,
				TypeTags::BsonBinData,
				TypeTags::BsonRegex,
				TypeTags::Timestamp,
				TypeTags::MinKey,
			]
		);
		assert!(matches!(*v.get_field("date"), Value::Date(86_400_000)));
		assert_eq!(v.get_field("bin").bin_data_view().map(|b| b.data), Some(&[1u8, 2][..]));
	}

	#[test]
	fn decimals_keep_every_digit() {
		for text in ["NaN", "-Infinity", "1E+40", "1234567890123456789012345678901234", "1.10"] {
			let v = from_json(&json!({"$numberDecimal": text})).unwrap();
			assert_eq!(v.tag(), TypeTags::NumberDecimal, "{text}");
			assert_eq!(to_json(&v).unwrap(), json!({"$numberDecimal": text}));
		}
		assert!(from_json(&json!({"$numberDecimal": "1.2.3"})).is_err());
	}

	#[test]
	fn unknown_dollar_keys_are_plain_fields() {
		let v = from_json(&json!({"$custom": 1})).unwrap();
		assert_eq!(v.tag(), TypeTags::Object);
		assert!(matches!(*v.get_field("$custom"), Value::NumberInt32(1)));
	}

	#[test]
	fn renders_back() {
		let input = json!({
			"a": [1, "x", null],
			"b": {"$date": "1970-01-01T00:00:00.005Z"},
			"c": {"$oid": "0102030405060708090a0b0c"},
			"d": {"$symbol": "s"}
		});
		let v = from_json(&input).unwrap();
		assert_eq!(to_json(&v).unwrap(), input);
		assert!(to_json(&Value::Nothing).is_err());
	}
}
