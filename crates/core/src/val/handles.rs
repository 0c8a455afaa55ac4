//! Engine-internal handle types which can be carried inside a [`Value`].

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::{Arc, LazyLock};

use anyhow::{Result, bail};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone as _, Utc};
use chrono_tz::Tz;
use quick_cache::sync::{Cache, GuardResult};
use regex::RegexBuilder;

use super::{Array, Object, Value};
use crate::cnf::{REGEX_CACHE_SIZE, REGEX_SIZE_LIMIT};
use crate::err::Error;

// ------------------------------
// Collation
// ------------------------------

/// The identifying parameters of a collation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollationSpec {
	pub locale: String,
	pub strength: u8,
}

impl CollationSpec {
	pub fn to_object(&self) -> Object {
		let mut obj = Object::with_capacity(2);
		obj.push("locale", Value::new_string(&self.locale));
		obj.push("strength", Value::NumberInt32(self.strength as i32));
		obj
	}
}

/// A string comparison policy.
///
/// Two strings are equal under a collation exactly when their comparison keys are equal, so
/// hashing a comparison key is consistent with [`Collator::compare`].
pub trait Collator: Debug + Send + Sync {
	fn spec(&self) -> CollationSpec;

	/// Returns the key which represents `input` under this collation
	fn comparison_key(&self, input: &str) -> String;

	fn compare(&self, lhs: &str, rhs: &str) -> Ordering {
		self.comparison_key(lhs).cmp(&self.comparison_key(rhs))
	}
}

/// Compares strings without regard to letter case.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaseInsensitiveCollator;

impl Collator for CaseInsensitiveCollator {
	fn spec(&self) -> CollationSpec {
		CollationSpec {
			locale: "en".to_owned(),
			strength: 2,
		}
	}

	fn comparison_key(&self, input: &str) -> String {
		input.to_lowercase()
	}
}

/// Compares strings by their reversed contents. Used to verify that collation is threaded
/// through every comparison site.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReverseStringCollator;

impl Collator for ReverseStringCollator {
	fn spec(&self) -> CollationSpec {
		CollationSpec {
			locale: "mock_reverse_string".to_owned(),
			strength: 3,
		}
	}

	fn comparison_key(&self, input: &str) -> String {
		input.chars().rev().collect()
	}
}

/// Resolves a collation document into a collator, where `None` is the simple binary collation
pub fn collator_from_spec(locale: &str, strength: Option<u8>) -> Result<Option<Arc<dyn Collator>>> {
	match (locale, strength) {
		("simple", _) => Ok(None),
		("en", Some(1 | 2)) => Ok(Some(Arc::new(CaseInsensitiveCollator))),
		("en", None | Some(3)) => Ok(None),
		("mock_reverse_string", _) => Ok(Some(Arc::new(ReverseStringCollator))),
		_ => Err(anyhow::Error::new(Error::BadValue(format!(
			"unsupported collation: locale '{locale}' with strength {strength:?}"
		)))),
	}
}

/// Whether two optional collators produce the same comparisons
pub fn collators_match(lhs: Option<&Arc<dyn Collator>>, rhs: Option<&Arc<dyn Collator>>) -> bool {
	match (lhs, rhs) {
		(None, None) => true,
		(Some(l), Some(r)) => l.spec() == r.spec(),
		_ => false,
	}
}

// ------------------------------
// Time zones
// ------------------------------

/// A resolved time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeZone {
	Fixed(FixedOffset),
	Named(Tz),
}

impl TimeZone {
	pub fn utc() -> Self {
		TimeZone::Named(Tz::UTC)
	}

	/// The wall clock time in this zone at the given instant
	pub fn to_local(&self, millis: i64) -> Option<NaiveDateTime> {
		let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
		Some(match self {
			TimeZone::Fixed(offset) => utc.with_timezone(offset).naive_local(),
			TimeZone::Named(tz) => utc.with_timezone(tz).naive_local(),
		})
	}

	/// The instant at which this zone shows the given wall clock time.
	///
	/// Ambiguous wall clock times resolve to the earlier instant. Wall clock times skipped by a
	/// transition resolve one hour later.
	pub fn from_local(&self, local: &NaiveDateTime) -> Option<i64> {
		let resolved = match self {
			TimeZone::Fixed(offset) => {
				offset.from_local_datetime(local).earliest()?.timestamp_millis()
			}
			TimeZone::Named(tz) => match tz.from_local_datetime(local).earliest() {
				Some(dt) => dt.timestamp_millis(),
				None => {
					let shifted = *local + chrono::Duration::hours(1);
					tz.from_local_datetime(&shifted).earliest()?.timestamp_millis()
				}
			},
		};
		Some(resolved)
	}

	/// The offset from UTC at the given instant, in seconds
	pub fn offset_seconds(&self, millis: i64) -> i32 {
		let Some(utc) = DateTime::<Utc>::from_timestamp_millis(millis) else {
			return 0;
		};
		match self {
			TimeZone::Fixed(offset) => offset.local_minus_utc(),
			TimeZone::Named(tz) => {
				tz.offset_from_utc_datetime(&utc.naive_utc()).fix().local_minus_utc()
			}
		}
	}
}

impl Display for TimeZone {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			TimeZone::Fixed(offset) => write!(f, "{offset}"),
			TimeZone::Named(tz) => f.write_str(tz.name()),
		}
	}
}

/// Resolves time zone identifiers.
///
/// Olson identifiers are resolved by `chrono-tz`. Fixed offsets may be written as `+HH`, `+HHMM`
/// or `+HH:MM`, with either sign.
#[derive(Debug, Default)]
pub struct TimeZoneDatabase;

impl TimeZoneDatabase {
	pub fn new() -> Self {
		TimeZoneDatabase
	}

	pub fn is_time_zone_identifier(&self, name: &str) -> bool {
		self.get_time_zone(name).is_some()
	}

	pub fn get_time_zone(&self, name: &str) -> Option<TimeZone> {
		if let Some(offset) = parse_utc_offset(name) {
			return Some(TimeZone::Fixed(offset));
		}
		name.parse::<Tz>().ok().map(TimeZone::Named)
	}

	/// The first and last identifiers known to this database
	pub fn bounds(&self) -> (&'static str, &'static str) {
		let first = chrono_tz::TZ_VARIANTS.first().map(|tz| tz.name()).unwrap_or("");
		let last = chrono_tz::TZ_VARIANTS.last().map(|tz| tz.name()).unwrap_or("");
		(first, last)
	}
}

fn parse_utc_offset(name: &str) -> Option<FixedOffset> {
	let sign = match name.as_bytes().first()? {
		b'+' => 1,
		b'-' => -1,
		_ => return None,
	};
	let digits = &name[1..];
	if !digits.is_ascii() {
		return None;
	}
	let (hours, minutes) = match digits.len() {
		2 => (digits, "0"),
		4 => (&digits[..2], &digits[2..]),
		5 if digits.as_bytes()[2] == b':' => (&digits[..2], &digits[3..]),
		_ => return None,
	};
	if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
		return None;
	}
	let hours: i32 = hours.parse().ok()?;
	let minutes: i32 = minutes.parse().ok()?;
	FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

// ------------------------------
// Regular expressions
// ------------------------------

/// A compiled regular expression together with the pattern and options it was built from.
#[derive(Clone)]
pub struct PcreRegex {
	pattern: String,
	options: String,
	regex: regex::Regex,
}

impl PcreRegex {
	/// Compiles a pattern. Fails if an option flag is unknown or the pattern is malformed.
	pub fn new(pattern: &str, options: &str) -> Result<Self> {
		let regex = regex_new(pattern, options)?;
		Ok(Self {
			pattern: pattern.to_owned(),
			options: options.to_owned(),
			regex,
		})
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	pub fn options(&self) -> &str {
		&self.options
	}

	pub fn regex(&self) -> &regex::Regex {
		&self.regex
	}

	/// The number of capture groups, excluding the implicit whole-match group
	pub fn capture_count(&self) -> usize {
		self.regex.captures_len().saturating_sub(1)
	}
}

impl Debug for PcreRegex {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "PcreRegex(/{}/{})", self.pattern, self.options)
	}
}

fn regex_new(pattern: &str, options: &str) -> Result<regex::Regex> {
	static REGEX_CACHE: LazyLock<Cache<(String, String), regex::Regex>> =
		LazyLock::new(|| Cache::new(REGEX_CACHE_SIZE.max(10)));
	let key = (pattern.to_owned(), options.to_owned());
	match REGEX_CACHE.get_value_or_guard(&key, None) {
		GuardResult::Value(v) => Ok(v),
		GuardResult::Guard(g) => {
			let re = build_regex(pattern, options)?;
			g.insert(re.clone()).ok();
			Ok(re)
		}
		GuardResult::Timeout => {
			warn!("Regex cache timeout");
			build_regex(pattern, options)
		}
	}
}

fn build_regex(pattern: &str, options: &str) -> Result<regex::Regex> {
	let mut builder = RegexBuilder::new(pattern);
	builder.size_limit(*REGEX_SIZE_LIMIT);
	for flag in options.chars() {
		match flag {
			'i' => builder.case_insensitive(true),
			'm' => builder.multi_line(true),
			's' => builder.dot_matches_new_line(true),
			'x' => builder.ignore_whitespace(true),
			'u' => &mut builder,
			c => bail!(Error::InvalidRegexFlag(c)),
		};
	}
	builder.build().map_err(|e| anyhow::Error::new(Error::InvalidRegex(e.to_string())))
}

// ------------------------------
// Index keys
// ------------------------------

/// An opaque, byte-comparable encoding of a sequence of index key components.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyString(Vec<u8>);

impl KeyString {
	pub fn from_bytes(bytes: Vec<u8>) -> Self {
		KeyString(bytes)
	}

	/// Encodes key components so that the byte order of two encodings follows the value order
	/// of the numbers, strings, booleans, dates and nulls they contain.
	pub fn encode(components: &[Value]) -> Self {
		let mut out = Vec::new();
		for component in components {
			encode_key_component(component, &mut out);
		}
		KeyString(out)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

impl Display for KeyString {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(&hex::encode(&self.0))
	}
}

fn encode_key_component(value: &Value, out: &mut Vec<u8>) {
	let order = value.tag().to_type().map(|t| t.canonical_order()).unwrap_or(0);
	out.push((order + 1) as u8);
	if let Some(d) = value.to_f64() {
		let bits = d.to_bits();
		let ordered = if d.is_sign_negative() {
			!bits
		} else {
			bits | (1 << 63)
		};
		out.extend_from_slice(&ordered.to_be_bytes());
	} else if let Some(s) = value.string_or_symbol_view() {
		for b in s.bytes() {
			out.push(b);
			if b == 0 {
				out.push(0xff);
			}
		}
		out.push(0);
	} else {
		match value {
			Value::Boolean(b) => out.push(*b as u8),
			Value::Date(ms) => out.extend_from_slice(&((*ms as u64) ^ (1 << 63)).to_be_bytes()),
			Value::Timestamp(ts) => out.extend_from_slice(&ts.to_be_bytes()),
			_ => {
				if let Some(id) = value.object_id_bytes() {
					out.extend_from_slice(id);
				} else {
					out.extend_from_slice(value.to_string().as_bytes());
					out.push(0);
				}
			}
		}
	}
}

// ------------------------------
// Script functions
// ------------------------------

/// The source text of a server-side script function. The engine never executes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsFunction {
	pub code: String,
}

// ------------------------------
// Shard filtering
// ------------------------------

/// The result of checking a document against a shard's ownership ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentBelongsResult {
	Belongs,
	DoesNotBelong,
	NoShardKey,
}

/// Decides whether a document is owned by the current shard.
pub trait ShardFilterer: Debug + Send + Sync {
	/// Whether the collection is sharded at all
	fn is_collection_sharded(&self) -> bool;

	/// The dotted paths which make up the shard key
	fn key_pattern(&self) -> Vec<String>;

	/// Checks an extracted shard key, which is an object keyed by the shard key paths
	fn key_belongs_to_me(&self, key: &Value) -> bool;

	fn clone_box(&self) -> Box<dyn ShardFilterer>;

	fn document_belongs_to_me(&self, doc: &Value) -> DocumentBelongsResult {
		if !self.is_collection_sharded() {
			return DocumentBelongsResult::Belongs;
		}
		let mut key = Object::new();
		for path in self.key_pattern() {
			let value = doc.get_path(&path);
			if value.is_nothing() {
				return DocumentBelongsResult::NoShardKey;
			}
			key.push(path, value);
		}
		if self.key_belongs_to_me(&Value::Object(Box::new(key))) {
			DocumentBelongsResult::Belongs
		} else {
			DocumentBelongsResult::DoesNotBelong
		}
	}
}

impl Clone for Box<dyn ShardFilterer> {
	fn clone(&self) -> Self {
		self.clone_box()
	}
}

/// Owns the half-open ranges `[min, max)` of a single shard key path.
#[derive(Clone, Debug)]
pub struct KeyRangeShardFilterer {
	key: String,
	ranges: Vec<(Value, Value)>,
}

impl KeyRangeShardFilterer {
	pub fn new(key: impl Into<String>, ranges: Vec<(Value, Value)>) -> Self {
		Self {
			key: key.into(),
			ranges,
		}
	}
}

impl ShardFilterer for KeyRangeShardFilterer {
	fn is_collection_sharded(&self) -> bool {
		true
	}

	fn key_pattern(&self) -> Vec<String> {
		vec![self.key.clone()]
	}

	fn key_belongs_to_me(&self, key: &Value) -> bool {
		let value = key.get_field(&self.key);
		self.ranges.iter().any(|(min, max)| {
			super::three_way(min, &value, None).is_some_and(Ordering::is_le)
				&& super::three_way(&value, max, None) == Some(Ordering::Less)
		})
	}

	fn clone_box(&self) -> Box<dyn ShardFilterer> {
		Box::new(self.clone())
	}
}

// ------------------------------
// Full text search
// ------------------------------

/// Matches documents against a text search query.
///
/// Plain terms match if any of them occurs as a word. Quoted phrases must all occur, and terms
/// prefixed with `-` must not occur.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FtsMatcher {
	query: String,
	terms: Vec<String>,
	phrases: Vec<String>,
	negated: Vec<String>,
	case_sensitive: bool,
}

impl FtsMatcher {
	pub fn new(query: &str, case_sensitive: bool) -> Self {
		let fold = |s: &str| if case_sensitive { s.to_owned() } else { s.to_lowercase() };
		let mut terms = Vec::new();
		let mut phrases = Vec::new();
		let mut negated = Vec::new();
		let mut rest = query;
		while let Some(start) = rest.find('"') {
			let (before, after) = rest.split_at(start);
			let after = &after[1..];
			let end = after.find('"').unwrap_or(after.len());
			phrases.push(fold(&after[..end]));
			Self::split_terms(before, &fold, &mut terms, &mut negated);
			rest = after.get(end + 1..).unwrap_or("");
		}
		Self::split_terms(rest, &fold, &mut terms, &mut negated);
		Self {
			query: query.to_owned(),
			terms,
			phrases,
			negated,
			case_sensitive,
		}
	}

	fn split_terms(
		text: &str,
		fold: &impl Fn(&str) -> String,
		terms: &mut Vec<String>,
		negated: &mut Vec<String>,
	) {
		for word in text.split_whitespace() {
			match word.strip_prefix('-') {
				Some(w) if !w.is_empty() => negated.push(fold(w)),
				_ => terms.push(fold(word)),
			}
		}
	}

	pub fn query(&self) -> &str {
		&self.query
	}

	pub fn matches(&self, doc: &Value) -> bool {
		let mut text = Vec::new();
		collect_strings(doc, &mut text);
		let text: Vec<String> = if self.case_sensitive {
			text
		} else {
			text.iter().map(|s| s.to_lowercase()).collect()
		};
		let words = || {
			text.iter().flat_map(|s| s.split(|c: char| !c.is_alphanumeric())).filter(|w| !w.is_empty())
		};
		if self.negated.iter().any(|n| words().any(|w| w == n)) {
			return false;
		}
		if !self.phrases.iter().all(|p| text.iter().any(|s| s.contains(p.as_str()))) {
			return false;
		}
		(self.terms.is_empty() && !self.phrases.is_empty())
			|| self.terms.iter().any(|t| words().any(|w| w == t))
	}

	pub fn to_object(&self) -> Object {
		let mut obj = Object::with_capacity(2);
		obj.push("$search", Value::new_string(&self.query));
		obj.push("$caseSensitive", Value::Boolean(self.case_sensitive));
		obj
	}
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
	if let Some(s) = value.string_view() {
		out.push(s.to_owned());
	} else if value.tag().is_array() {
		let mut it = super::ArrayEnumerator::new(value);
		while !it.at_end() {
			collect_strings(it.view(), out);
			it.advance();
		}
	} else if value.tag().is_object() {
		let mut it = super::ObjectEnumerator::new(value);
		while !it.at_end() {
			collect_strings(it.view(), out);
			it.advance();
		}
	}
}

// ------------------------------
// Sort specifications
// ------------------------------

/// One component of a sort pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortPart {
	pub path: String,
	pub ascending: bool,
}

/// A sort pattern together with the collation its string keys are compared under.
#[derive(Clone, Debug)]
pub struct SortSpec {
	pattern: Vec<SortPart>,
	collator: Option<Arc<dyn Collator>>,
}

impl SortSpec {
	pub fn new(pattern: Vec<SortPart>, collator: Option<Arc<dyn Collator>>) -> Self {
		Self {
			pattern,
			collator,
		}
	}

	pub fn pattern(&self) -> &[SortPart] {
		&self.pattern
	}

	pub fn collator(&self) -> Option<&Arc<dyn Collator>> {
		self.collator.as_ref()
	}

	/// Builds the sort key of a document, one element per pattern component.
	///
	/// When a path resolves to an array, an ascending component uses the smallest element and a
	/// descending component the largest. Missing paths sort as null, and empty arrays sort before
	/// null.
	pub fn generate_sort_key(&self, doc: &Value) -> Value {
		let mut key = Array::with_capacity(self.pattern.len());
		for part in &self.pattern {
			let mut found = Vec::new();
			doc.collect_path_values(&part.path, &mut found);
			let mut candidates = Vec::new();
			let mut saw_empty_array = false;
			for value in found {
				if value.tag().is_array() {
					let mut it = super::ArrayEnumerator::new(&value);
					saw_empty_array |= it.at_end();
					while !it.at_end() {
						candidates.push(it.view().clone());
						it.advance();
					}
				} else {
					candidates.push(value);
				}
			}
			let wanted = if part.ascending {
				Ordering::Less
			} else {
				Ordering::Greater
			};
			let component = match candidates.len() {
				0 if saw_empty_array => Value::BsonUndefined,
				0 => Value::Null,
				_ => {
					let mut best = candidates.swap_remove(0);
					for c in candidates {
						if super::three_way(&c, &best, None) == Some(wanted) {
							best = c;
						}
					}
					best
				}
			};
			key.push(self.collate(component));
		}
		Value::Array(Box::new(key))
	}

	fn collate(&self, value: Value) -> Value {
		match (&self.collator, value.string_view()) {
			(Some(c), Some(s)) => Value::new_string(&c.comparison_key(s)),
			_ => value,
		}
	}

	/// Orders two sort keys produced by [`SortSpec::generate_sort_key`]
	pub fn compare_keys(&self, lhs: &Value, rhs: &Value) -> Ordering {
		let (Value::Array(l), Value::Array(r)) = (lhs, rhs) else {
			return Ordering::Equal;
		};
		for (idx, part) in self.pattern.iter().enumerate() {
			let ord = super::three_way(l.get_at(idx), r.get_at(idx), None).unwrap_or(Ordering::Equal);
			let ord = if part.ascending {
				ord
			} else {
				ord.reverse()
			};
			if ord != Ordering::Equal {
				return ord;
			}
		}
		Ordering::Equal
	}

	pub fn to_object(&self) -> Object {
		self.pattern
			.iter()
			.map(|p| (p.path.clone(), Value::NumberInt32(if p.ascending { 1 } else { -1 })))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::positive_hours("+05", 5 * 3600)]
	#[case::negative_compact("-0330", -(3 * 3600 + 30 * 60))]
	#[case::colon("+10:45", 10 * 3600 + 45 * 60)]
	fn fixed_offsets(#[case] name: &str, #[case] seconds: i32) {
		let tzdb = TimeZoneDatabase::new();
		assert_eq!(tzdb.get_time_zone(name), Some(TimeZone::Fixed(FixedOffset::east_opt(seconds).unwrap())));
	}

	#[test]
	fn olson_names() {
		let tzdb = TimeZoneDatabase::new();
		assert!(tzdb.is_time_zone_identifier("America/New_York"));
		assert!(tzdb.is_time_zone_identifier("UTC"));
		assert!(!tzdb.is_time_zone_identifier("Mars/Olympus"));
		assert!(!tzdb.is_time_zone_identifier("+5"));
		let ny = tzdb.get_time_zone("America/New_York").unwrap();
		// 2021-01-01T00:00:00Z is 19:00 the previous day in New York
		let local = ny.to_local(1_609_459_200_000).unwrap();
		assert_eq!(local.to_string(), "2020-12-31 19:00:00");
		assert_eq!(ny.from_local(&local), Some(1_609_459_200_000));
	}

	#[test]
	fn regex_flags() {
		let re = PcreRegex::new("^ab.c$", "ims").unwrap();
		assert!(re.regex().is_match("AB\nC"));
		let err = PcreRegex::new("a", "q").unwrap_err();
		assert_eq!(err.downcast_ref::<Error>(), Some(&Error::InvalidRegexFlag('q')));
		let err = PcreRegex::new("(", "").unwrap_err();
		assert_eq!(err.downcast_ref::<Error>().and_then(Error::code), Some(5073402));
	}

	#[test]
	fn collators() {
		let ci = CaseInsensitiveCollator;
		assert_eq!(ci.compare("abc", "ABC"), Ordering::Equal);
		let rev = ReverseStringCollator;
		assert_eq!(rev.compare("ab", "ba"), Ordering::Greater);
		let a: Arc<dyn Collator> = Arc::new(CaseInsensitiveCollator);
		let b: Arc<dyn Collator> = Arc::new(CaseInsensitiveCollator);
		assert!(collators_match(Some(&a), Some(&b)));
		assert!(!collators_match(Some(&a), None));
	}

	#[test]
	fn key_strings_preserve_order() {
		let a = KeyString::encode(&[Value::NumberInt32(-5)]);
		let b = KeyString::encode(&[Value::NumberDouble(2.5)]);
		let c = KeyString::encode(&[Value::new_string("a")]);
		let d = KeyString::encode(&[Value::new_string("b")]);
		assert!(a < b && b < c && c < d);
	}

	#[test]
	fn text_search() {
		let doc = crate::val::json::from_json(&serde_json::json!({
			"title": "The quick brown fox",
			"tags": ["animals", "Story"]
		}))
		.unwrap();
		assert!(FtsMatcher::new("story", false).matches(&doc));
		assert!(!FtsMatcher::new("story", true).matches(&doc));
		assert!(FtsMatcher::new("\"brown fox\"", false).matches(&doc));
		assert!(!FtsMatcher::new("fox -quick", false).matches(&doc));
	}

	#[test]
	fn key_range_filter() {
		let f = KeyRangeShardFilterer::new("x", vec![(Value::NumberInt32(0), Value::NumberInt32(10))]);
		let inside = crate::val::json::from_json(&serde_json::json!({"x": 5})).unwrap();
		let outside = crate::val::json::from_json(&serde_json::json!({"x": 10})).unwrap();
		let missing = crate::val::json::from_json(&serde_json::json!({"y": 1})).unwrap();
		assert_eq!(f.document_belongs_to_me(&inside), DocumentBelongsResult::Belongs);
		assert_eq!(f.document_belongs_to_me(&outside), DocumentBelongsResult::DoesNotBelong);
		assert_eq!(f.document_belongs_to_me(&missing), DocumentBelongsResult::NoShardKey);
	}
}
