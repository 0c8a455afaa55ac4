use std::fmt::{self, Display, Formatter, Write};

use super::handles::Collator;
use super::{ArrayEnumerator, Object, ObjectEnumerator, Value};
use crate::cnf::{PRINT_BINDATA_LIMIT, PRINT_STRING_LIMIT};

fn write_string(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
	if s.len() <= PRINT_STRING_LIMIT {
		return write!(f, "\"{s}\"");
	}
	let mut end = PRINT_STRING_LIMIT;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	write!(f, "\"{}\"...", &s[..end])
}

fn write_array(f: &mut Formatter<'_>, value: &Value) -> fmt::Result {
	f.write_char('[')?;
	let mut it = ArrayEnumerator::new(value);
	let mut first = true;
	while !it.at_end() {
		if !first {
			f.write_str(", ")?;
		}
		first = false;
		write!(f, "{}", it.view())?;
		it.advance();
	}
	f.write_char(']')
}

fn write_object(f: &mut Formatter<'_>, value: &Value) -> fmt::Result {
	f.write_char('{')?;
	let mut it = ObjectEnumerator::new(value);
	let mut first = true;
	while !it.at_end() {
		if !first {
			f.write_str(", ")?;
		}
		first = false;
		write!(f, "\"{}\" : {}", it.field_name(), it.view())?;
		it.advance();
	}
	f.write_char('}')
}

fn write_owned_object(f: &mut Formatter<'_>, obj: Object) -> fmt::Result {
	write_object(f, &Value::from(obj))
}

fn write_object_id(f: &mut Formatter<'_>, prefix: &str, id: &[u8]) -> fmt::Result {
	write!(f, "{prefix}(\"{}\")", hex::encode(id))
}

fn write_collator(f: &mut Formatter<'_>, collator: Option<&dyn Collator>) -> fmt::Result {
	match collator {
		Some(c) => {
			f.write_str("Collator(")?;
			write_owned_object(f, c.spec().to_object())?;
			f.write_char(')')
		}
		None => f.write_str("null"),
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Value::Nothing => f.write_str("Nothing"),
			Value::NumberInt32(v) => write!(f, "{v}"),
			Value::NumberInt64(v) => write!(f, "{v}"),
			Value::NumberDouble(v) => write!(f, "{v}"),
			Value::NumberDecimal(v) => write!(f, "{v}"),
			Value::Date(v) => write!(f, "{v}"),
			Value::Timestamp(v) => write!(f, "Timestamp({}, {})", v >> 32, v & 0xffff_ffff),
			Value::Boolean(v) => write!(f, "{v}"),
			Value::Null => f.write_str("null"),
			Value::StringSmall(_) | Value::StringBig(_) | Value::BsonString(_) => {
				write_string(f, self.string_view().unwrap_or_default())
			}
			Value::BsonSymbol(_) => {
				f.write_str("Symbol(")?;
				write_string(f, self.string_or_symbol_view().unwrap_or_default())?;
				f.write_char(')')
			}
			Value::Array(_) | Value::ArraySet(_) | Value::BsonArray(_) => write_array(f, self),
			Value::Object(_) | Value::BsonObject(_) => write_object(f, self),
			Value::ObjectId(id) => write_object_id(f, "ObjectId", &id[..]),
			Value::BsonObjectId(id) => write_object_id(f, "bsonObjectId", id),
			Value::RecordId(v) => write!(f, "RecordId({v})"),
			Value::MinKey => f.write_str("minKey"),
			Value::MaxKey => f.write_str("maxKey"),
			Value::BsonBinData(_) => {
				let Some(bin) = self.bin_data_view() else {
					return f.write_str("BinData()");
				};
				if bin.subtype == 4 {
					if let Ok(id) = uuid::Uuid::from_slice(bin.data) {
						return write!(f, "UUID(\"{id}\")");
					}
				}
				let shown = bin.data.len().min(PRINT_BINDATA_LIMIT);
				write!(f, "BinData({}, {}", bin.subtype, hex::encode_upper(&bin.data[..shown]))?;
				if bin.data.len() > PRINT_BINDATA_LIMIT {
					f.write_str("...)")
				} else {
					f.write_char(')')
				}
			}
			Value::BsonUndefined => f.write_str("undefined"),
			Value::BsonRegex(_) => match self.bson_regex_view() {
				Some(re) => write!(f, "/{}/{}", re.pattern, re.flags),
				None => f.write_str("//"),
			},
			Value::BsonJavascript(_) => {
				write!(f, "Javascript({})", self.javascript_view().unwrap_or_default())
			}
			Value::BsonDBPointer(_) => {
				let Some(ptr) = self.db_pointer_view() else {
					return f.write_str("DBPointer()");
				};
				f.write_str("DBPointer(")?;
				write_string(f, ptr.ns)?;
				f.write_str(", ")?;
				write_object_id(f, "bsonObjectId", ptr.id)?;
				f.write_char(')')
			}
			Value::BsonCodeWScope(_) => {
				let Some(cws) = self.code_w_scope_view() else {
					return f.write_str("CodeWScope()");
				};
				write!(f, "CodeWScope({}, ", cws.code)?;
				write_object(f, &cws.scope)?;
				f.write_char(')')
			}
			Value::KsValue(ks) => write!(f, "KS({ks})"),
			Value::PcreRegex(re) => write!(f, "PcreRegex(/{}/{})", re.pattern(), re.options()),
			Value::TimeZoneDB(db) => {
				let (first, last) = db.bounds();
				write!(f, "TimeZoneDatabase({first}...{last})")
			}
			Value::JsFunction(_) => f.write_str("jsFunction"),
			Value::ShardFilterer(_) => f.write_str("ShardFilterer"),
			Value::Collator(c) => write_collator(f, Some(c.as_ref())),
			Value::FtsMatcher(m) => {
				f.write_str("FtsMatcher(")?;
				write_owned_object(f, m.to_object())?;
				f.write_char(')')
			}
			Value::SortSpec(spec) => {
				f.write_str("SortSpec(")?;
				write_owned_object(f, spec.to_object())?;
				f.write_str(", ")?;
				write_collator(f, spec.collator().map(|c| c.as_ref()))?;
				f.write_char(')')
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use rstest::rstest;
	use super::*;
	use crate::val::Decimal;
	use crate::val::handles::CaseInsensitiveCollator;
	use crate::val::json::from_json;

	#[rstest]
	#[case::int(Value::NumberInt32(-4), "-4")]
	#[case::double(Value::NumberDouble(2.5), "2.5")]
	#[case::decimal(Value::decimal(Decimal::new(1050, 2)), "10.50")]
	#[case::boolean(Value::Boolean(true), "true")]
	#[case::string(Value::new_string("hi"), "\"hi\"")]
	#[case::symbol(Value::bson_symbol("sym"), "Symbol(\"sym\")")]
	#[case::nothing(Value::Nothing, "Nothing")]
	#[case::min_key(Value::MinKey, "minKey")]
	#[case::timestamp(Value::Timestamp((5 << 32) | 7), "Timestamp(5, 7)")]
	#[case::record_id(Value::RecordId(12), "RecordId(12)")]
	#[case::regex(Value::bson_regex("^a", "im"), "/^a/im")]
	#[case::object_id(Value::object_id([0xab; 12]), "ObjectId(\"abababababababababababab\")")]
	#[case::bin_data(Value::bin_data(0, &[0xde, 0xad]), "BinData(0, DEAD)")]
	#[case::uuid(
		Value::bin_data(4, &[0x11; 16]),
		"UUID(\"11111111-1111-1111-1111-111111111111\")"
	)]
	#[case::javascript(Value::bson_javascript("x++"), "Javascript(x++)")]
	fn scalars(#[case] value: Value, #[case] expected: &str) {
		assert_eq!(value.to_string(), expected);
	}

	#[test]
	fn containers() {
		let doc = from_json(&serde_json::json!({"a": 1, "b": [true, null]})).unwrap();
		assert_eq!(doc.to_string(), "{\"a\" : 1, \"b\" : [true, null]}");
	}

	#[test]
	fn long_strings_are_truncated() {
		let s = "x".repeat(PRINT_STRING_LIMIT + 10);
		let shown = Value::new_string(&s).to_string();
		assert!(shown.ends_with("\"..."));
		assert_eq!(shown.len(), PRINT_STRING_LIMIT + 5);
	}

	#[test]
	fn collators() {
		let v = Value::Collator(Arc::new(CaseInsensitiveCollator));
		assert_eq!(v.to_string(), "Collator({\"locale\" : \"en\", \"strength\" : 2})");
	}
}
