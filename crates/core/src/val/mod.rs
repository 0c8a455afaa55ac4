//! The tagged value runtime.
//!
//! A [`Value`] is a closed sum over every runtime type. Payloads which do not fit the value word
//! are owned through a `Box` (or a shared `Bytes` buffer for wire-format views), so releasing a
//! value is its `Drop` and copying it is its `Clone`. Adding a variant without deciding how it is
//! released is therefore a build error rather than a leak.
//!
//! Values read out of a container through [`ArrayEnumerator`], [`ObjectEnumerator`] or
//! [`Value::get_field`] are views: they borrow from the container (or share its buffer) and are
//! never released independently of it.

pub mod array;
pub mod bson;
pub mod compare;
pub mod decimal;
mod display;
pub mod enumerator;
pub mod handles;
pub mod json;
pub mod tags;

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

pub use self::array::{Array, ArraySet, Object};
pub use self::compare::{array_to_set, compare_value, hash_value, three_way};
pub use self::decimal::Decimal;
pub use self::enumerator::{ArrayEnumerator, ObjectEnumerator};
pub use self::handles::{
	Collator, FtsMatcher, JsFunction, KeyString, PcreRegex, ShardFilterer, SortSpec,
	TimeZoneDatabase,
};
pub use self::tags::{BsonType, TypeTags};

/// The length of the longest string which is stored inline.
pub const SMALL_STRING_MAX_LENGTH: usize = 7;

/// A string of at most seven bytes with no NUL, stored inline.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmallString {
	len: u8,
	buf: [u8; SMALL_STRING_MAX_LENGTH],
}

impl SmallString {
	pub fn new(input: &str) -> Option<Self> {
		if input.len() > SMALL_STRING_MAX_LENGTH || input.contains('\0') {
			return None;
		}
		let mut buf = [0; SMALL_STRING_MAX_LENGTH];
		buf[..input.len()].copy_from_slice(input.as_bytes());
		Some(Self {
			len: input.len() as u8,
			buf,
		})
	}

	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or_default()
	}
}

impl std::fmt::Debug for SmallString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Debug::fmt(self.as_str(), f)
	}
}

/// A runtime value.
#[derive(Clone, Debug, Default)]
pub enum Value {
	/// The absence of a value
	#[default]
	Nothing,
	NumberInt32(i32),
	NumberInt64(i64),
	NumberDouble(f64),
	NumberDecimal(Box<Decimal>),
	/// Milliseconds since the Unix epoch
	Date(i64),
	Timestamp(u64),
	Boolean(bool),
	Null,
	StringSmall(SmallString),
	StringBig(Box<str>),
	Array(Box<Array>),
	ArraySet(Box<ArraySet>),
	Object(Box<Object>),
	ObjectId(Box<[u8; 12]>),
	RecordId(i64),
	MinKey,
	MaxKey,
	/// A whole document
	BsonObject(Bytes),
	/// A whole document with array index field names
	BsonArray(Bytes),
	/// UTF-8 bytes
	BsonString(Bytes),
	/// UTF-8 bytes
	BsonSymbol(Bytes),
	/// Twelve bytes
	BsonObjectId(Bytes),
	/// `[subtype][data]`
	BsonBinData(Bytes),
	BsonUndefined,
	/// `pattern\0flags\0`
	BsonRegex(Bytes),
	/// UTF-8 bytes
	BsonJavascript(Bytes),
	/// A namespace string followed by twelve id bytes
	BsonDBPointer(Bytes),
	/// `[code length][code][scope document]`
	BsonCodeWScope(Bytes),
	KsValue(Box<KeyString>),
	PcreRegex(Box<PcreRegex>),
	TimeZoneDB(Arc<TimeZoneDatabase>),
	JsFunction(Box<JsFunction>),
	ShardFilterer(Box<dyn ShardFilterer>),
	Collator(Arc<dyn Collator>),
	FtsMatcher(Box<FtsMatcher>),
	SortSpec(Box<SortSpec>),
}

/// A view of a binary payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinDataView<'a> {
	pub subtype: u8,
	pub data: &'a [u8],
}

/// A view of a wire-format regular expression
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BsonRegexView<'a> {
	pub pattern: &'a str,
	pub flags: &'a str,
}

/// A view of a wire-format database pointer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DBPointerView<'a> {
	pub ns: &'a str,
	pub id: &'a [u8],
}

/// A view of wire-format code with a scope document
#[derive(Clone, Debug)]
pub struct CodeWScopeView<'a> {
	pub code: &'a str,
	pub scope: Value,
}

impl Value {
	pub fn tag(&self) -> TypeTags {
		match self {
			Value::Nothing => TypeTags::Nothing,
			Value::NumberInt32(_) => TypeTags::NumberInt32,
			Value::NumberInt64(_) => TypeTags::NumberInt64,
			Value::NumberDouble(_) => TypeTags::NumberDouble,
			Value::NumberDecimal(_) => TypeTags::NumberDecimal,
			Value::Date(_) => TypeTags::Date,
			Value::Timestamp(_) => TypeTags::Timestamp,
			Value::Boolean(_) => TypeTags::Boolean,
			Value::Null => TypeTags::Null,
			Value::StringSmall(_) => TypeTags::StringSmall,
			Value::StringBig(_) => TypeTags::StringBig,
			Value::Array(_) => TypeTags::Array,
			Value::ArraySet(_) => TypeTags::ArraySet,
			Value::Object(_) => TypeTags::Object,
			Value::ObjectId(_) => TypeTags::ObjectId,
			Value::RecordId(_) => TypeTags::RecordId,
			Value::MinKey => TypeTags::MinKey,
			Value::MaxKey => TypeTags::MaxKey,
			Value::BsonObject(_) => TypeTags::BsonObject,
			Value::BsonArray(_) => TypeTags::BsonArray,
			Value::BsonString(_) => TypeTags::BsonString,
			Value::BsonSymbol(_) => TypeTags::BsonSymbol,
			Value::BsonObjectId(_) => TypeTags::BsonObjectId,
			Value::BsonBinData(_) => TypeTags::BsonBinData,
			Value::BsonUndefined => TypeTags::BsonUndefined,
			Value::BsonRegex(_) => TypeTags::BsonRegex,
			Value::BsonJavascript(_) => TypeTags::BsonJavascript,
			Value::BsonDBPointer(_) => TypeTags::BsonDBPointer,
			Value::BsonCodeWScope(_) => TypeTags::BsonCodeWScope,
			Value::KsValue(_) => TypeTags::KsValue,
			Value::PcreRegex(_) => TypeTags::PcreRegex,
			Value::TimeZoneDB(_) => TypeTags::TimeZoneDB,
			Value::JsFunction(_) => TypeTags::JsFunction,
			Value::ShardFilterer(_) => TypeTags::ShardFilterer,
			Value::Collator(_) => TypeTags::Collator,
			Value::FtsMatcher(_) => TypeTags::FtsMatcher,
			Value::SortSpec(_) => TypeTags::SortSpec,
		}
	}

	pub fn is_nothing(&self) -> bool {
		matches!(self, Value::Nothing)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Whether the value is missing, null or undefined
	pub fn is_null_or_missing(&self) -> bool {
		matches!(self, Value::Nothing | Value::Null | Value::BsonUndefined)
	}

	pub fn is_nan(&self) -> bool {
		matches!(self, Value::NumberDouble(d) if d.is_nan())
	}

	// ------------------------------
	// Constructors
	// ------------------------------

	/// Builds an owned string, stored inline when it is short enough
	pub fn new_string(input: &str) -> Value {
		match SmallString::new(input) {
			Some(small) => Value::StringSmall(small),
			None => Value::StringBig(input.into()),
		}
	}

	pub fn bson_symbol(input: &str) -> Value {
		Value::BsonSymbol(Bytes::copy_from_slice(input.as_bytes()))
	}

	pub fn bson_javascript(code: &str) -> Value {
		Value::BsonJavascript(Bytes::copy_from_slice(code.as_bytes()))
	}

	pub fn bson_regex(pattern: &str, flags: &str) -> Value {
		let mut out = Vec::with_capacity(pattern.len() + flags.len() + 2);
		out.extend_from_slice(pattern.as_bytes());
		out.push(0);
		out.extend_from_slice(flags.as_bytes());
		out.push(0);
		Value::BsonRegex(Bytes::from(out))
	}

	pub fn bin_data(subtype: u8, data: &[u8]) -> Value {
		let mut out = Vec::with_capacity(data.len() + 1);
		out.push(subtype);
		out.extend_from_slice(data);
		Value::BsonBinData(Bytes::from(out))
	}

	pub fn bson_db_pointer(ns: &str, id: &[u8; 12]) -> Value {
		let mut out = Vec::with_capacity(ns.len() + id.len());
		out.extend_from_slice(ns.as_bytes());
		out.extend_from_slice(id);
		Value::BsonDBPointer(Bytes::from(out))
	}

	pub fn bson_code_w_scope(code: &str, scope: &Value) -> Result<Value> {
		let scope = bson::encode_document(scope)?;
		Ok(Value::BsonCodeWScope(bson::code_w_scope_payload(code, &scope)))
	}

	pub fn object_id(id: [u8; 12]) -> Value {
		Value::ObjectId(Box::new(id))
	}

	pub fn decimal(d: Decimal) -> Value {
		Value::NumberDecimal(Box::new(d))
	}

	pub fn new_array() -> Value {
		Value::Array(Box::default())
	}

	pub fn new_array_set(collator: Option<Arc<dyn Collator>>) -> Value {
		Value::ArraySet(Box::new(ArraySet::new(collator)))
	}

	pub fn new_object() -> Value {
		Value::Object(Box::default())
	}

	pub fn array(values: Vec<Value>) -> Value {
		Value::Array(Box::new(values.into()))
	}

	// ------------------------------
	// Views
	// ------------------------------

	/// The contents of a string, not including symbols
	pub fn string_view(&self) -> Option<&str> {
		match self {
			Value::StringSmall(s) => Some(s.as_str()),
			Value::StringBig(s) => Some(s),
			Value::BsonString(b) => utf8(b),
			_ => None,
		}
	}

	pub fn string_or_symbol_view(&self) -> Option<&str> {
		match self {
			Value::BsonSymbol(b) => utf8(b),
			v => v.string_view(),
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Boolean(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&Array> {
		match self {
			Value::Array(a) => Some(a),
			_ => None,
		}
	}

	pub fn as_array_mut(&mut self) -> Option<&mut Array> {
		match self {
			Value::Array(a) => Some(a),
			_ => None,
		}
	}

	pub fn as_array_set(&self) -> Option<&ArraySet> {
		match self {
			Value::ArraySet(a) => Some(a),
			_ => None,
		}
	}

	pub fn as_array_set_mut(&mut self) -> Option<&mut ArraySet> {
		match self {
			Value::ArraySet(a) => Some(a),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&Object> {
		match self {
			Value::Object(o) => Some(o),
			_ => None,
		}
	}

	pub fn as_object_mut(&mut self) -> Option<&mut Object> {
		match self {
			Value::Object(o) => Some(o),
			_ => None,
		}
	}

	pub fn object_id_bytes(&self) -> Option<&[u8]> {
		match self {
			Value::ObjectId(id) => Some(&id[..]),
			Value::BsonObjectId(b) => Some(b),
			_ => None,
		}
	}

	pub fn bin_data_view(&self) -> Option<BinDataView<'_>> {
		match self {
			Value::BsonBinData(b) => {
				let (subtype, data) = b.split_first()?;
				Some(BinDataView {
					subtype: *subtype,
					data,
				})
			}
			_ => None,
		}
	}

	pub fn bson_regex_view(&self) -> Option<BsonRegexView<'_>> {
		let Value::BsonRegex(b) = self else {
			return None;
		};
		let mut parts = b.split(|&c| c == 0);
		let pattern = std::str::from_utf8(parts.next()?).ok()?;
		let flags = std::str::from_utf8(parts.next()?).ok()?;
		Some(BsonRegexView {
			pattern,
			flags,
		})
	}

	pub fn javascript_view(&self) -> Option<&str> {
		match self {
			Value::BsonJavascript(b) => utf8(b),
			_ => None,
		}
	}

	pub fn db_pointer_view(&self) -> Option<DBPointerView<'_>> {
		let Value::BsonDBPointer(b) = self else {
			return None;
		};
		let (ns, id) = b.split_at(b.len().checked_sub(12)?);
		let ns = std::str::from_utf8(ns).ok()?;
		Some(DBPointerView {
			ns,
			id,
		})
	}

	pub fn code_w_scope_view(&self) -> Option<CodeWScopeView<'_>> {
		let Value::BsonCodeWScope(b) = self else {
			return None;
		};
		let len = u32::from_le_bytes(b.get(..4)?.try_into().ok()?) as usize;
		let code = std::str::from_utf8(b.get(4..4 + len)?).ok()?;
		Some(CodeWScopeView {
			code,
			scope: Value::BsonObject(b.slice(4 + len..)),
		})
	}

	// ------------------------------
	// Numbers
	// ------------------------------

	/// Converts any number to a double, possibly losing precision
	pub fn to_f64(&self) -> Option<f64> {
		match self {
			Value::NumberInt32(i) => Some(*i as f64),
			Value::NumberInt64(i) => Some(*i as f64),
			Value::NumberDouble(d) => Some(*d),
			Value::NumberDecimal(d) => Some(d.to_f64()),
			_ => None,
		}
	}

	/// Converts any number to a decimal. Doubles are converted with 34 significant digits, and
	/// keep their infinities and NaN.
	pub fn to_decimal(&self) -> Option<Decimal> {
		match self {
			Value::NumberInt32(i) => Some(Decimal::from(*i)),
			Value::NumberInt64(i) => Some(Decimal::from(*i)),
			Value::NumberDouble(d) => Some(Decimal::from_f64_exact(*d)),
			Value::NumberDecimal(d) => Some(**d),
			_ => None,
		}
	}

	/// Converts an integral number to a 64-bit integer if it can be represented exactly
	pub fn to_i64_exact(&self) -> Option<i64> {
		match self {
			Value::NumberInt32(i) => Some(*i as i64),
			Value::NumberInt64(i) => Some(*i),
			Value::NumberDouble(d) => f64_to_i64_exact(*d),
			Value::NumberDecimal(d) => d.to_i64_exact(),
			_ => None,
		}
	}

	/// Converts a number to the `target` numeric type, returning `Nothing` if the conversion
	/// would lose information.
	pub fn numeric_convert(&self, target: TypeTags) -> Value {
		if !self.tag().is_number() {
			return Value::Nothing;
		}
		match target {
			TypeTags::NumberInt32 => self
				.to_i64_exact()
				.and_then(|i| i32::try_from(i).ok())
				.map(Value::NumberInt32)
				.unwrap_or_default(),
			TypeTags::NumberInt64 => self.to_i64_exact().map(Value::NumberInt64).unwrap_or_default(),
			TypeTags::NumberDouble => match self {
				Value::NumberInt32(i) => Value::NumberDouble(*i as f64),
				Value::NumberInt64(i) => {
					let d = *i as f64;
					if d < 9.223372036854775808e18 && d as i64 == *i {
						Value::NumberDouble(d)
					} else {
						Value::Nothing
					}
				}
				Value::NumberDouble(d) => Value::NumberDouble(*d),
				Value::NumberDecimal(dec) => {
					let d = dec.to_f64();
					if Decimal::from_f64_exact(d) == **dec {
						Value::NumberDouble(d)
					} else {
						Value::Nothing
					}
				}
				_ => Value::Nothing,
			},
			TypeTags::NumberDecimal => self.to_decimal().map(Value::decimal).unwrap_or_default(),
			_ => Value::Nothing,
		}
	}

	// ------------------------------
	// Fields and paths
	// ------------------------------

	/// Looks up a top-level field of an object. Anything else yields `Nothing`.
	pub fn get_field(&self, name: &str) -> Cow<'_, Value> {
		match self {
			Value::Object(obj) => Cow::Borrowed(obj.get_field(name)),
			Value::BsonObject(bytes) => Cow::Owned(bson::get_raw_field(bytes, name)),
			_ => Cow::Owned(Value::Nothing),
		}
	}

	/// Follows a dotted path through nested objects without traversing arrays
	pub fn get_path(&self, path: &str) -> Value {
		let mut parts = path.split('.');
		let Some(first) = parts.next() else {
			return Value::Nothing;
		};
		let mut current = self.get_field(first).into_owned();
		for part in parts {
			current = current.get_field(part).into_owned();
			if current.is_nothing() {
				break;
			}
		}
		current
	}

	/// Collects every value reachable along a dotted path, traversing arrays the way query
	/// predicates do: an array in the middle of the path is searched element by element, and a
	/// numeric path component may also select an array position.
	pub fn collect_path_values(&self, path: &str, out: &mut Vec<Value>) {
		let parts: Vec<&str> = path.split('.').collect();
		collect_path(self, &parts, out);
	}
}

fn collect_path(value: &Value, parts: &[&str], out: &mut Vec<Value>) {
	let Some((head, rest)) = parts.split_first() else {
		if !value.is_nothing() {
			out.push(value.clone());
		}
		return;
	};
	if value.tag().is_object() {
		let field = value.get_field(head);
		if !field.is_nothing() {
			collect_path(&field, rest, out);
		}
	} else if value.tag().is_array() {
		if let Ok(idx) = head.parse::<usize>() {
			let mut it = ArrayEnumerator::new(value);
			let mut pos = 0;
			while !it.at_end() {
				if pos == idx {
					collect_path(it.view(), rest, out);
				}
				pos += 1;
				it.advance();
			}
		}
		let mut it = ArrayEnumerator::new(value);
		while !it.at_end() {
			if it.view().tag().is_object() {
				collect_path(it.view(), parts, out);
			}
			it.advance();
		}
	}
}

pub(crate) fn f64_to_i64_exact(d: f64) -> Option<i64> {
	if !d.is_finite() || d.fract() != 0.0 {
		return None;
	}
	if (-9.223372036854775808e18..9.223372036854775808e18).contains(&d) {
		Some(d as i64)
	} else {
		None
	}
}

fn utf8(b: &[u8]) -> Option<&str> {
	std::str::from_utf8(b).ok()
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::NumberInt32(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::NumberInt64(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::NumberDouble(v)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Boolean(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::new_string(v)
	}
}

impl From<Decimal> for Value {
	fn from(v: Decimal) -> Self {
		Value::decimal(v)
	}
}

impl From<Array> for Value {
	fn from(v: Array) -> Self {
		Value::Array(Box::new(v))
	}
}

impl From<Object> for Value {
	fn from(v: Object) -> Self {
		Value::Object(Box::new(v))
	}
}
