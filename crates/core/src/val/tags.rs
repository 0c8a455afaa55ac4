use std::fmt::{self, Display, Formatter};

/// The dispatch tag of a runtime value.
///
/// Every [`Value`](super::Value) variant reports exactly one tag. Tags which begin with `Bson`
/// are views over wire-format bytes and are never produced by the engine itself, except when a
/// value is decoded from a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TypeTags {
	/// The value does not exist
	Nothing = 0,
	NumberInt32,
	NumberInt64,
	NumberDouble,
	NumberDecimal,
	Date,
	Timestamp,
	Boolean,
	Null,
	StringSmall,
	StringBig,
	Array,
	ArraySet,
	Object,
	ObjectId,
	RecordId,
	MinKey,
	MaxKey,
	BsonObject,
	BsonArray,
	BsonString,
	BsonSymbol,
	BsonObjectId,
	BsonBinData,
	BsonUndefined,
	BsonRegex,
	BsonJavascript,
	BsonDBPointer,
	BsonCodeWScope,
	/// An opaque index key encoding
	KsValue,
	/// A compiled regular expression
	PcreRegex,
	/// A time zone database handle
	TimeZoneDB,
	/// A compiled script function
	JsFunction,
	/// A shard ownership predicate
	ShardFilterer,
	/// A collation handle
	Collator,
	/// A full text search matcher
	FtsMatcher,
	/// A materialized sort specification
	SortSpec,
}

impl TypeTags {
	pub const fn is_number(self) -> bool {
		matches!(
			self,
			TypeTags::NumberInt32
				| TypeTags::NumberInt64
				| TypeTags::NumberDouble
				| TypeTags::NumberDecimal
		)
	}

	pub const fn is_string(self) -> bool {
		matches!(self, TypeTags::StringSmall | TypeTags::StringBig | TypeTags::BsonString)
	}

	pub const fn is_string_or_symbol(self) -> bool {
		self.is_string() || matches!(self, TypeTags::BsonSymbol)
	}

	pub const fn is_object(self) -> bool {
		matches!(self, TypeTags::Object | TypeTags::BsonObject)
	}

	pub const fn is_array(self) -> bool {
		matches!(self, TypeTags::Array | TypeTags::ArraySet | TypeTags::BsonArray)
	}

	pub const fn is_object_id(self) -> bool {
		matches!(self, TypeTags::ObjectId | TypeTags::BsonObjectId)
	}

	pub const fn is_bin_data(self) -> bool {
		matches!(self, TypeTags::BsonBinData)
	}

	pub const fn is_collatable(self) -> bool {
		self.is_string() || self.is_array() || self.is_object()
	}

	/// Whether a value of this tag is stored entirely inside the value word.
	///
	/// Values of every other tag own a heap payload which is released exactly once when the
	/// value is dropped. Handle tags which share their payload (`TimeZoneDB`, `Collator`) are
	/// reference counted and count as shallow.
	pub const fn is_shallow(self) -> bool {
		match self {
			TypeTags::Nothing
			| TypeTags::Null
			| TypeTags::NumberInt32
			| TypeTags::NumberInt64
			| TypeTags::NumberDouble
			| TypeTags::Date
			| TypeTags::Timestamp
			| TypeTags::Boolean
			| TypeTags::StringSmall
			| TypeTags::RecordId
			| TypeTags::MinKey
			| TypeTags::MaxKey
			| TypeTags::BsonUndefined
			| TypeTags::TimeZoneDB
			| TypeTags::Collator => true,
			TypeTags::NumberDecimal
			| TypeTags::StringBig
			| TypeTags::BsonString
			| TypeTags::BsonSymbol
			| TypeTags::Array
			| TypeTags::ArraySet
			| TypeTags::Object
			| TypeTags::ObjectId
			| TypeTags::BsonObjectId
			| TypeTags::BsonObject
			| TypeTags::BsonArray
			| TypeTags::BsonBinData
			| TypeTags::KsValue
			| TypeTags::BsonRegex
			| TypeTags::BsonJavascript
			| TypeTags::BsonDBPointer
			| TypeTags::BsonCodeWScope
			| TypeTags::PcreRegex
			| TypeTags::JsFunction
			| TypeTags::ShardFilterer
			| TypeTags::FtsMatcher
			| TypeTags::SortSpec => false,
		}
	}

	/// The wire type which values of this tag serialize as.
	///
	/// Engine-internal handles have no wire type.
	pub const fn to_type(self) -> Option<BsonType> {
		Some(match self {
			TypeTags::Nothing | TypeTags::KsValue => BsonType::Eoo,
			TypeTags::NumberInt32 => BsonType::NumberInt,
			TypeTags::RecordId | TypeTags::NumberInt64 => BsonType::NumberLong,
			TypeTags::NumberDouble => BsonType::NumberDouble,
			TypeTags::NumberDecimal => BsonType::NumberDecimal,
			TypeTags::Date => BsonType::Date,
			TypeTags::Timestamp => BsonType::Timestamp,
			TypeTags::Boolean => BsonType::Bool,
			TypeTags::Null => BsonType::Null,
			TypeTags::StringSmall | TypeTags::StringBig | TypeTags::BsonString => {
				BsonType::String
			}
			TypeTags::Array | TypeTags::ArraySet | TypeTags::BsonArray => BsonType::Array,
			TypeTags::Object | TypeTags::BsonObject => BsonType::Object,
			TypeTags::ObjectId | TypeTags::BsonObjectId => BsonType::ObjectId,
			TypeTags::MinKey => BsonType::MinKey,
			TypeTags::MaxKey => BsonType::MaxKey,
			TypeTags::BsonSymbol => BsonType::Symbol,
			TypeTags::BsonBinData => BsonType::BinData,
			TypeTags::BsonUndefined => BsonType::Undefined,
			TypeTags::BsonRegex => BsonType::Regex,
			TypeTags::BsonJavascript => BsonType::Code,
			TypeTags::BsonDBPointer => BsonType::DBPointer,
			TypeTags::BsonCodeWScope => BsonType::CodeWScope,
			TypeTags::PcreRegex
			| TypeTags::TimeZoneDB
			| TypeTags::JsFunction
			| TypeTags::ShardFilterer
			| TypeTags::Collator
			| TypeTags::FtsMatcher
			| TypeTags::SortSpec => return None,
		})
	}

	/// The singleton type mask for this tag, or zero for engine-internal handles
	pub fn type_mask(self) -> u32 {
		self.to_type().map(BsonType::mask).unwrap_or(0)
	}

	pub const fn name(self) -> &'static str {
		match self {
			TypeTags::Nothing => "Nothing",
			TypeTags::NumberInt32 => "NumberInt32",
			TypeTags::NumberInt64 => "NumberInt64",
			TypeTags::NumberDouble => "NumberDouble",
			TypeTags::NumberDecimal => "NumberDecimal",
			TypeTags::Date => "Date",
			TypeTags::Timestamp => "Timestamp",
			TypeTags::Boolean => "Boolean",
			TypeTags::Null => "Null",
			TypeTags::StringSmall => "StringSmall",
			TypeTags::StringBig => "StringBig",
			TypeTags::Array => "Array",
			TypeTags::ArraySet => "ArraySet",
			TypeTags::Object => "Object",
			TypeTags::ObjectId => "ObjectId",
			TypeTags::RecordId => "RecordId",
			TypeTags::MinKey => "MinKey",
			TypeTags::MaxKey => "MaxKey",
			TypeTags::BsonObject => "bsonObject",
			TypeTags::BsonArray => "bsonArray",
			TypeTags::BsonString => "bsonString",
			TypeTags::BsonSymbol => "bsonSymbol",
			TypeTags::BsonObjectId => "bsonObjectId",
			TypeTags::BsonBinData => "bsonBinData",
			TypeTags::BsonUndefined => "bsonUndefined",
			TypeTags::BsonRegex => "bsonRegex",
			TypeTags::BsonJavascript => "bsonJavascript",
			TypeTags::BsonDBPointer => "bsonDBPointer",
			TypeTags::BsonCodeWScope => "bsonCodeWScope",
			TypeTags::KsValue => "ksValue",
			TypeTags::PcreRegex => "pcreRegex",
			TypeTags::TimeZoneDB => "timeZoneDB",
			TypeTags::JsFunction => "jsFunction",
			TypeTags::ShardFilterer => "shardFilterer",
			TypeTags::Collator => "collator",
			TypeTags::FtsMatcher => "ftsMatcher",
			TypeTags::SortSpec => "sortSpec",
		}
	}
}

impl Display for TypeTags {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Returns the widest numeric tag of the two, or `None` if either side is not a number.
pub fn widest_numerical_type(lhs: TypeTags, rhs: TypeTags) -> Option<TypeTags> {
	if !lhs.is_number() || !rhs.is_number() {
		return None;
	}
	Some(if lhs == TypeTags::NumberDecimal || rhs == TypeTags::NumberDecimal {
		TypeTags::NumberDecimal
	} else if lhs == TypeTags::NumberDouble || rhs == TypeTags::NumberDouble {
		TypeTags::NumberDouble
	} else if lhs == TypeTags::NumberInt64 || rhs == TypeTags::NumberInt64 {
		TypeTags::NumberInt64
	} else {
		TypeTags::NumberInt32
	})
}

/// The wire format element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum BsonType {
	MinKey = -1,
	Eoo = 0,
	NumberDouble = 1,
	String = 2,
	Object = 3,
	Array = 4,
	BinData = 5,
	Undefined = 6,
	ObjectId = 7,
	Bool = 8,
	Date = 9,
	Null = 10,
	Regex = 11,
	DBPointer = 12,
	Code = 13,
	Symbol = 14,
	CodeWScope = 15,
	NumberInt = 16,
	Timestamp = 17,
	NumberLong = 18,
	NumberDecimal = 19,
	MaxKey = 127,
}

impl BsonType {
	pub fn from_code(code: u8) -> Option<BsonType> {
		Some(match code as i8 {
			-1 => BsonType::MinKey,
			0 => BsonType::Eoo,
			1 => BsonType::NumberDouble,
			2 => BsonType::String,
			3 => BsonType::Object,
			4 => BsonType::Array,
			5 => BsonType::BinData,
			6 => BsonType::Undefined,
			7 => BsonType::ObjectId,
			8 => BsonType::Bool,
			9 => BsonType::Date,
			10 => BsonType::Null,
			11 => BsonType::Regex,
			12 => BsonType::DBPointer,
			13 => BsonType::Code,
			14 => BsonType::Symbol,
			15 => BsonType::CodeWScope,
			16 => BsonType::NumberInt,
			17 => BsonType::Timestamp,
			18 => BsonType::NumberLong,
			19 => BsonType::NumberDecimal,
			127 => BsonType::MaxKey,
			_ => return None,
		})
	}

	pub const fn code(self) -> u8 {
		self as i8 as u8
	}

	/// The position of this type in the cross-type sort order.
	pub const fn canonical_order(self) -> i32 {
		match self {
			BsonType::MinKey => -1,
			BsonType::MaxKey => 127,
			BsonType::Eoo | BsonType::Undefined => 0,
			BsonType::Null => 5,
			BsonType::NumberDecimal
			| BsonType::NumberDouble
			| BsonType::NumberInt
			| BsonType::NumberLong => 10,
			BsonType::String | BsonType::Symbol => 15,
			BsonType::Object => 20,
			BsonType::Array => 25,
			BsonType::BinData => 30,
			BsonType::ObjectId => 35,
			BsonType::Bool => 40,
			BsonType::Date => 45,
			BsonType::Timestamp => 47,
			BsonType::Regex => 50,
			BsonType::DBPointer => 55,
			BsonType::Code => 60,
			BsonType::CodeWScope => 65,
		}
	}

	/// The bit which represents this type inside a type mask.
	pub const fn mask(self) -> u32 {
		match self {
			BsonType::MinKey => 1 << 30,
			BsonType::MaxKey => 1 << 31,
			t => 1 << (t as i8 as u32),
		}
	}

	/// The `$type` alias of this type.
	pub const fn alias(self) -> &'static str {
		match self {
			BsonType::MinKey => "minKey",
			BsonType::Eoo => "missing",
			BsonType::NumberDouble => "double",
			BsonType::String => "string",
			BsonType::Object => "object",
			BsonType::Array => "array",
			BsonType::BinData => "binData",
			BsonType::Undefined => "undefined",
			BsonType::ObjectId => "objectId",
			BsonType::Bool => "bool",
			BsonType::Date => "date",
			BsonType::Null => "null",
			BsonType::Regex => "regex",
			BsonType::DBPointer => "dbPointer",
			BsonType::Code => "javascript",
			BsonType::Symbol => "symbol",
			BsonType::CodeWScope => "javascriptWithScope",
			BsonType::NumberInt => "int",
			BsonType::Timestamp => "timestamp",
			BsonType::NumberLong => "long",
			BsonType::NumberDecimal => "decimal",
			BsonType::MaxKey => "maxKey",
		}
	}
}

/// Type masks used by `typeMatch` checks.
pub mod mask {
	use super::BsonType;

	pub const NUMBER: u32 = BsonType::NumberInt.mask()
		| BsonType::NumberLong.mask()
		| BsonType::NumberDouble.mask()
		| BsonType::NumberDecimal.mask();
	pub const STRING: u32 = BsonType::String.mask();
	pub const ARRAY: u32 = BsonType::Array.mask();
	pub const OBJECT: u32 = BsonType::Object.mask();
	pub const NULL: u32 = BsonType::Null.mask();
	pub const UNDEFINED: u32 = BsonType::Undefined.mask();
	pub const DATE: u32 = BsonType::Date.mask();
	pub const TIMESTAMP: u32 = BsonType::Timestamp.mask();
	pub const OBJECT_ID: u32 = BsonType::ObjectId.mask();
	pub const SYMBOL: u32 = BsonType::Symbol.mask();
	/// Values which can be interpreted as a point in time
	pub const DATE_LIKE: u32 = DATE | TIMESTAMP | OBJECT_ID;
	/// Values which `$toLower`/`$toUpper` can coerce to a string
	pub const STRING_COERCIBLE: u32 = STRING | SYMBOL | NUMBER | DATE | TIMESTAMP;
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::int_long(TypeTags::NumberInt32, TypeTags::NumberInt64, TypeTags::NumberInt64)]
	#[case::long_double(TypeTags::NumberInt64, TypeTags::NumberDouble, TypeTags::NumberDouble)]
	#[case::double_decimal(TypeTags::NumberDouble, TypeTags::NumberDecimal, TypeTags::NumberDecimal)]
	#[case::int_int(TypeTags::NumberInt32, TypeTags::NumberInt32, TypeTags::NumberInt32)]
	fn widest_type(#[case] lhs: TypeTags, #[case] rhs: TypeTags, #[case] expected: TypeTags) {
		assert_eq!(widest_numerical_type(lhs, rhs), Some(expected));
		assert_eq!(widest_numerical_type(rhs, lhs), Some(expected));
	}

	#[test]
	fn views_share_wire_types() {
		assert_eq!(TypeTags::ObjectId.to_type(), TypeTags::BsonObjectId.to_type());
		assert_eq!(TypeTags::StringSmall.to_type(), TypeTags::BsonString.to_type());
		assert_eq!(TypeTags::ArraySet.to_type(), Some(BsonType::Array));
		assert_eq!(TypeTags::Collator.to_type(), None);
	}

	#[test]
	fn masks_are_distinct() {
		assert_eq!(BsonType::MinKey.mask(), 1 << 30);
		assert_eq!(BsonType::NumberDouble.mask(), 2);
		assert_eq!(mask::NUMBER.count_ones(), 4);
		assert_eq!(mask::DATE_LIKE & TypeTags::BsonObjectId.type_mask(), mask::OBJECT_ID);
	}

	#[test]
	fn codes_round_trip() {
		for code in [0xffu8, 0, 1, 2, 3, 4, 5, 7, 10, 13, 16, 19, 127] {
			assert_eq!(BsonType::from_code(code).map(BsonType::code), Some(code));
		}
		assert_eq!(BsonType::from_code(42), None);
	}
}
