//! The wire format codec.
//!
//! Documents decode lazily: a decoded document or array is a view holding a slice of the
//! received buffer, and its elements become values only as they are enumerated. Strings, nested
//! documents and arrays share the same `Bytes` allocation, so a view never frees the buffer on
//! its own. Smaller payloads are copied into the layouts documented on [`Value`].

use ::bson::oid::ObjectId;
use ::bson::spec::BinarySubtype;
use ::bson::{
	Binary, Bson, DateTime, Decimal128, Document, JavaScriptCodeWithScope, RawBsonRef, RawDocument,
	Regex, Timestamp,
};
use anyhow::{Result, bail};
use bytes::Bytes;

use super::{ArrayEnumerator, Decimal, Object, ObjectEnumerator, Value};
use crate::err::Error;

fn invalid(err: impl std::fmt::Display) -> anyhow::Error {
	anyhow::Error::new(Error::InvalidBson(err.to_string()))
}

fn unserializable(value: &Value) -> anyhow::Error {
	anyhow::Error::new(Error::BadValue(format!("cannot serialize a value of type {}", value.tag())))
}

/// Walks every element so that a document which validates can be enumerated without errors
fn validate(doc: &RawDocument) -> Result<()> {
	for elem in doc {
		let (_, value) = elem.map_err(invalid)?;
		validate_value(value)?;
	}
	Ok(())
}

fn validate_value(value: RawBsonRef<'_>) -> Result<()> {
	match value {
		RawBsonRef::Document(doc) => validate(doc),
		RawBsonRef::Array(arr) => {
			for item in arr {
				validate_value(item.map_err(invalid)?)?;
			}
			Ok(())
		}
		RawBsonRef::JavaScriptCodeWithScope(cws) => validate(cws.scope),
		_ => Ok(()),
	}
}

/// Checks that `buf` begins with a complete, well-formed document and returns its length
pub fn validate_document(buf: &[u8]) -> Result<usize> {
	let len = buf.get(..4).ok_or_else(|| invalid("truncated document length"))?;
	let len = i32::from_le_bytes([len[0], len[1], len[2], len[3]]);
	let len = usize::try_from(len).map_err(|_| invalid("negative document length"))?;
	let doc = buf.get(..len).ok_or_else(|| invalid("document is truncated"))?;
	validate(RawDocument::from_bytes(doc).map_err(invalid)?)?;
	Ok(len)
}

/// Decodes a document into a view which shares `buf`
pub fn decode_document(buf: Bytes) -> Result<Value> {
	let len = validate_document(&buf)?;
	Ok(Value::BsonObject(buf.slice(..len)))
}

/// Reinterprets the bytes of a validated document held by a view
pub(crate) fn raw_document(doc: &Bytes) -> Option<&RawDocument> {
	RawDocument::from_bytes(doc).ok()
}

/// Converts one element of the document held in `buf` into a value
pub(crate) fn from_raw(buf: &Bytes, value: RawBsonRef<'_>) -> Value {
	match value {
		RawBsonRef::Double(d) => Value::NumberDouble(d),
		RawBsonRef::String(s) => Value::BsonString(buf.slice_ref(s.as_bytes())),
		RawBsonRef::Document(doc) => Value::BsonObject(buf.slice_ref(doc.as_bytes())),
		RawBsonRef::Array(arr) => Value::BsonArray(buf.slice_ref(arr.as_bytes())),
		RawBsonRef::Boolean(b) => Value::Boolean(b),
		RawBsonRef::Null => Value::Null,
		RawBsonRef::RegularExpression(re) => Value::bson_regex(re.pattern, re.options),
		RawBsonRef::JavaScriptCode(code) => Value::BsonJavascript(buf.slice_ref(code.as_bytes())),
		RawBsonRef::JavaScriptCodeWithScope(cws) => {
			Value::BsonCodeWScope(code_w_scope_payload(cws.code, cws.scope.as_bytes()))
		}
		RawBsonRef::Int32(i) => Value::NumberInt32(i),
		RawBsonRef::Int64(i) => Value::NumberInt64(i),
		RawBsonRef::Timestamp(ts) => Value::Timestamp(timestamp_bits(ts)),
		RawBsonRef::Binary(bin) => Value::bin_data(u8::from(bin.subtype), bin.bytes),
		RawBsonRef::ObjectId(oid) => Value::BsonObjectId(Bytes::copy_from_slice(&oid.bytes())),
		RawBsonRef::DateTime(dt) => Value::Date(dt.timestamp_millis()),
		RawBsonRef::Symbol(s) => Value::BsonSymbol(buf.slice_ref(s.as_bytes())),
		RawBsonRef::Decimal128(d) => Value::decimal(Decimal::from_bid(d.bytes())),
		RawBsonRef::Undefined => Value::BsonUndefined,
		RawBsonRef::MaxKey => Value::MaxKey,
		RawBsonRef::MinKey => Value::MinKey,
		other => Bson::try_from(other.to_raw_bson()).map(from_bson).unwrap_or_default(),
	}
}

fn timestamp_bits(ts: Timestamp) -> u64 {
	((ts.time as u64) << 32) | ts.increment as u64
}

/// `[code length][code][scope document]`
pub(crate) fn code_w_scope_payload(code: &str, scope: &[u8]) -> Bytes {
	let mut out = Vec::with_capacity(4 + code.len() + scope.len());
	out.extend_from_slice(&(code.len() as u32).to_le_bytes());
	out.extend_from_slice(code.as_bytes());
	out.extend_from_slice(scope);
	Bytes::from(out)
}

/// Splits a database pointer into its namespace and id through its extended JSON form, which
/// is the only public view of its fields.
fn db_pointer_parts(ptr: Bson) -> Option<(String, ObjectId)> {
	let json = ptr.into_canonical_extjson();
	let body = json.get("$dbPointer")?;
	let ns = body.get("$ref")?.as_str()?.to_owned();
	let id = ObjectId::parse_str(body.get("$id")?.get("$oid")?.as_str()?).ok()?;
	Some((ns, id))
}

fn db_pointer(ns: &str, id: &[u8]) -> Result<Bson> {
	let id: [u8; 12] = id.try_into().map_err(|_| invalid("database pointer id must be 12 bytes"))?;
	let json = serde_json::json!({"$dbPointer": {"$ref": ns, "$id": {"$oid": ObjectId::from_bytes(id).to_hex()}}});
	Bson::try_from(json).map_err(invalid)
}

/// Converts an owned wire value into an owned value
pub(crate) fn from_bson(value: Bson) -> Value {
	match value {
		Bson::Double(d) => Value::NumberDouble(d),
		Bson::String(s) => Value::new_string(&s),
		Bson::Array(items) => Value::array(items.into_iter().map(from_bson).collect()),
		Bson::Document(doc) => from_bson_document(doc),
		Bson::Boolean(b) => Value::Boolean(b),
		Bson::Null => Value::Null,
		Bson::RegularExpression(re) => Value::bson_regex(&re.pattern, &re.options),
		Bson::JavaScriptCode(code) => Value::bson_javascript(&code),
		Bson::JavaScriptCodeWithScope(cws) => {
			let mut scope = Vec::new();
			match cws.scope.to_writer(&mut scope) {
				Ok(()) => Value::BsonCodeWScope(code_w_scope_payload(&cws.code, &scope)),
				Err(_) => Value::Nothing,
			}
		}
		Bson::Int32(i) => Value::NumberInt32(i),
		Bson::Int64(i) => Value::NumberInt64(i),
		Bson::Timestamp(ts) => Value::Timestamp(timestamp_bits(ts)),
		Bson::Binary(bin) => Value::bin_data(u8::from(bin.subtype), &bin.bytes),
		Bson::ObjectId(oid) => Value::object_id(oid.bytes()),
		Bson::DateTime(dt) => Value::Date(dt.timestamp_millis()),
		Bson::Symbol(s) => Value::bson_symbol(&s),
		Bson::Decimal128(d) => Value::decimal(Decimal::from_bid(d.bytes())),
		Bson::Undefined => Value::BsonUndefined,
		Bson::MaxKey => Value::MaxKey,
		Bson::MinKey => Value::MinKey,
		ptr @ Bson::DbPointer(_) => match db_pointer_parts(ptr) {
			Some((ns, id)) => Value::bson_db_pointer(&ns, &id.bytes()),
			None => Value::Nothing,
		},
	}
}

pub(crate) fn from_bson_document(doc: Document) -> Value {
	let mut obj = Object::with_capacity(doc.len());
	for (name, value) in doc {
		obj.push(name.as_str(), from_bson(value));
	}
	obj.into()
}

/// Converts a value into an owned wire value. `Nothing` and engine handles have no wire form.
pub(crate) fn to_bson(value: &Value) -> Result<Bson> {
	Ok(match value {
		Value::NumberInt32(i) => Bson::Int32(*i),
		Value::NumberInt64(i) | Value::RecordId(i) => Bson::Int64(*i),
		Value::NumberDouble(d) => Bson::Double(*d),
		Value::NumberDecimal(d) => Bson::Decimal128(Decimal128::from_bytes(d.to_bid())),
		Value::Date(ms) => Bson::DateTime(DateTime::from_millis(*ms)),
		Value::Timestamp(ts) => Bson::Timestamp(Timestamp {
			time: (ts >> 32) as u32,
			increment: *ts as u32,
		}),
		Value::Boolean(b) => Bson::Boolean(*b),
		Value::Null => Bson::Null,
		Value::MinKey => Bson::MinKey,
		Value::MaxKey => Bson::MaxKey,
		Value::BsonUndefined => Bson::Undefined,
		Value::StringSmall(_) | Value::StringBig(_) | Value::BsonString(_) => {
			Bson::String(value.string_view().unwrap_or_default().to_owned())
		}
		Value::BsonSymbol(_) => Bson::Symbol(value.string_or_symbol_view().unwrap_or_default().to_owned()),
		Value::BsonJavascript(_) => Bson::JavaScriptCode(value.javascript_view().unwrap_or_default().to_owned()),
		Value::ObjectId(_) | Value::BsonObjectId(_) => {
			let id = value.object_id_bytes().and_then(|b| <[u8; 12]>::try_from(b).ok());
			Bson::ObjectId(ObjectId::from_bytes(id.ok_or_else(|| invalid("object id must be 12 bytes"))?))
		}
		Value::BsonBinData(_) => {
			let bin = value.bin_data_view().ok_or_else(|| invalid("empty binary payload"))?;
			Bson::Binary(Binary {
				subtype: BinarySubtype::from(bin.subtype),
				bytes: bin.data.to_vec(),
			})
		}
		Value::BsonRegex(_) => {
			let re = value.bson_regex_view().ok_or_else(|| invalid("malformed regex payload"))?;
			Bson::RegularExpression(Regex {
				pattern: re.pattern.to_owned(),
				options: re.flags.to_owned(),
			})
		}
		Value::PcreRegex(re) => Bson::RegularExpression(Regex {
			pattern: re.pattern().to_owned(),
			options: re.options().to_owned(),
		}),
		Value::BsonDBPointer(_) => {
			let ptr = value.db_pointer_view().ok_or_else(|| invalid("malformed database pointer"))?;
			db_pointer(ptr.ns, ptr.id)?
		}
		Value::BsonCodeWScope(_) => {
			let cws = value.code_w_scope_view().ok_or_else(|| invalid("malformed code with scope"))?;
			Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
				code: cws.code.to_owned(),
				scope: to_document(&cws.scope)?,
			})
		}
		v if v.tag().is_object() => Bson::Document(to_document(v)?),
		v if v.tag().is_array() => {
			let mut out = Vec::new();
			let mut it = ArrayEnumerator::new(v);
			while !it.at_end() {
				if !it.view().is_nothing() {
					out.push(to_bson(it.view())?);
				}
				it.advance();
			}
			Bson::Array(out)
		}
		v => bail!(unserializable(v)),
	})
}

/// Converts a document-like value. Array elements are named by position and `Nothing` fields
/// are skipped.
pub(crate) fn to_document(value: &Value) -> Result<Document> {
	let mut doc = Document::new();
	if value.tag().is_object() {
		let mut it = ObjectEnumerator::new(value);
		while !it.at_end() {
			if !it.view().is_nothing() {
				doc.insert(it.field_name(), to_bson(it.view())?);
			}
			it.advance();
		}
	} else if value.tag().is_array() {
		let mut it = ArrayEnumerator::new(value);
		let mut idx = 0usize;
		while !it.at_end() {
			if !it.view().is_nothing() {
				doc.insert(idx.to_string(), to_bson(it.view())?);
			}
			idx += 1;
			it.advance();
		}
	} else {
		bail!(Error::BadValue(format!("cannot serialize {} as a document", value.tag())));
	}
	Ok(doc)
}

/// Serializes a document-like value
pub fn encode_document(value: &Value) -> Result<Vec<u8>> {
	match value {
		Value::BsonObject(bytes) | Value::BsonArray(bytes) => Ok(bytes.to_vec()),
		v => {
			let mut out = Vec::new();
			to_document(v)?.to_writer(&mut out).map_err(invalid)?;
			Ok(out)
		}
	}
}

/// The serialized size of a document-like value
pub fn bson_size(value: &Value) -> Result<i32> {
	match value {
		Value::BsonObject(bytes) => Ok(bytes.len() as i32),
		v => Ok(encode_document(v)?.len() as i32),
	}
}

/// Looks up a top-level field directly on the raw bytes of a validated document
pub fn get_raw_field(doc: &Bytes, name: &str) -> Value {
	match raw_document(doc).map(|raw| raw.get(name)) {
		Some(Ok(Some(value))) => from_raw(doc, value),
		_ => Value::Nothing,
	}
}
