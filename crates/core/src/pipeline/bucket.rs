//! Time-series buckets.
//!
//! A bucket stores many measurements column-wise:
//!
//! ```json
//! {"_id": .., "control": {"version": 1, "min": {..}, "max": {..}}, "meta": ..,
//!  "data": {"t": {"0": .., "1": ..}, "x": {"0": .., "1": ..}}}
//! ```
//!
//! Each column of `data` is keyed by the measurement's position within the bucket. A column may
//! skip positions where a measurement has no value for that field.

use anyhow::{Result, bail};
use serde_json::{Value as Json, json};

use crate::err::Error;
use crate::val::{Object, ObjectEnumerator, Value};

/// Rebuilds measurements from the buckets of a time-series collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketUnpacker {
	time_field: String,
	meta_field: Option<String>,
}

impl BucketUnpacker {
	pub fn new(time_field: impl Into<String>, meta_field: Option<String>) -> Self {
		Self {
			time_field: time_field.into(),
			meta_field,
		}
	}

	/// Parses the `$_internalUnpackBucket` stage specification
	pub fn parse(spec: &Json) -> Result<Self> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(5346500, "$_internalUnpackBucket specification must be an object"));
		};
		let mut time_field = None;
		let mut meta_field = None;
		for (key, value) in map {
			match key.as_str() {
				"timeField" => match value {
					Json::String(s) => time_field = Some(s.clone()),
					_ => bail!(Error::fail(5346504, "timeField field must be a string")),
				},
				"metaField" => match value {
					Json::String(s) if !s.contains('.') => meta_field = Some(s.clone()),
					Json::String(_) => bail!(Error::fail(5545700, "metaField field must be a single-element field path")),
					_ => bail!(Error::fail(5346505, "metaField field must be a string")),
				},
				"bucketMaxSpanSeconds" | "exclude" | "include" => {}
				other => bail!(Error::fail(5346506, format!("unrecognized parameter to $_internalUnpackBucket: {other}"))),
			}
		}
		match time_field {
			Some(time_field) => Ok(Self::new(time_field, meta_field)),
			None => bail!(Error::fail(5346508, "The $_internalUnpackBucket stage requires a timeField parameter")),
		}
	}

	pub fn time_field(&self) -> &str {
		&self.time_field
	}

	pub fn meta_field(&self) -> Option<&str> {
		self.meta_field.as_deref()
	}

	pub fn serialize(&self) -> Json {
		match &self.meta_field {
			Some(meta) => json!({"timeField": self.time_field, "metaField": meta}),
			None => json!({"timeField": self.time_field}),
		}
	}

	/// The number of measurements held by a bucket
	pub fn measurement_count(&self, bucket: &Value) -> usize {
		let data = bucket.get_field("data");
		let times = data.get_field(&self.time_field);
		let mut count = 0;
		let mut it = ObjectEnumerator::new(&times);
		while !it.at_end() {
			count += 1;
			it.advance();
		}
		count
	}

	/// Extracts the measurement at `idx`, or `None` when the bucket holds fewer
	pub fn measurement_at(&self, bucket: &Value, idx: usize) -> Option<Value> {
		let key = idx.to_string();
		let data = bucket.get_field("data");
		if data.get_field(&self.time_field).get_field(&key).is_nothing() {
			return None;
		}
		let mut out = Object::new();
		let mut columns = ObjectEnumerator::new(&data);
		while !columns.at_end() {
			out.push(columns.field_name(), columns.view().get_field(&key).into_owned());
			columns.advance();
		}
		if let Some(meta) = &self.meta_field {
			out.push(meta.as_str(), bucket.get_field("meta").into_owned());
		}
		Some(Value::Object(Box::new(out)))
	}

	pub fn unpack(&self, bucket: &Value) -> Vec<Value> {
		let mut out = Vec::new();
		let mut idx = 0;
		while let Some(measurement) = self.measurement_at(bucket, idx) {
			out.push(measurement);
			idx += 1;
		}
		out
	}
}
