use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

use crate::val::bson::{decode_document, encode_document};
use crate::val::json::from_json;
use crate::val::{ShardFilterer, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
	Ascending,
	Descending,
	Geo2d,
	Geo2dSphere,
}

impl IndexKind {
	pub fn name(self) -> &'static str {
		match self {
			IndexKind::Ascending => "1",
			IndexKind::Descending => "-1",
			IndexKind::Geo2d => "2d",
			IndexKind::Geo2dSphere => "2dsphere",
		}
	}

	pub fn is_geo(self) -> bool {
		matches!(self, IndexKind::Geo2d | IndexKind::Geo2dSphere)
	}
}

/// A single-field index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
	pub name: String,
	pub field: String,
	pub kind: IndexKind,
}

impl IndexSpec {
	pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
		let field = field.into();
		Self {
			name: format!("{field}_{}", kind.name()),
			field,
			kind,
		}
	}
}

/// Marks a collection as the bucket store of a time-series collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeseriesOptions {
	pub time_field: String,
	pub meta_field: Option<String>,
}

/// An in-memory collection whose documents are stored as BSON
#[derive(Clone)]
pub struct Collection {
	name: String,
	docs: Vec<Value>,
	indexes: Vec<IndexSpec>,
	shard_filter: Option<Arc<dyn ShardFilterer>>,
	timeseries: Option<TimeseriesOptions>,
	random_cursor: bool,
}

impl fmt::Debug for Collection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Collection")
			.field("name", &self.name)
			.field("records", &self.docs.len())
			.field("indexes", &self.indexes)
			.field("sharded", &self.is_sharded())
			.field("timeseries", &self.timeseries)
			.finish()
	}
}

impl Collection {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			docs: Vec::new(),
			indexes: Vec::new(),
			shard_filter: None,
			timeseries: None,
			random_cursor: true,
		}
	}

	/// Builds a collection from a JSON array of extended JSON documents
	pub fn from_json(name: impl Into<String>, docs: &serde_json::Value) -> Result<Self> {
		let mut coll = Self::new(name);
		match docs {
			serde_json::Value::Array(items) => {
				for item in items {
					coll.insert(&from_json(item)?)?;
				}
			}
			single => coll.insert(&from_json(single)?)?,
		}
		Ok(coll)
	}

	pub fn insert(&mut self, doc: &Value) -> Result<()> {
		let encoded = encode_document(doc)?;
		self.docs.push(decode_document(Bytes::from(encoded))?);
		Ok(())
	}

	pub fn with_index(mut self, index: IndexSpec) -> Self {
		self.indexes.push(index);
		self
	}

	pub fn with_shard_filter(mut self, filter: Arc<dyn ShardFilterer>) -> Self {
		self.shard_filter = Some(filter);
		self
	}

	pub fn with_timeseries(mut self, options: TimeseriesOptions) -> Self {
		self.timeseries = Some(options);
		self
	}

	/// Disables the storage-level random cursor
	pub fn without_random_cursor(mut self) -> Self {
		self.random_cursor = false;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn num_records(&self) -> u64 {
		self.docs.len() as u64
	}

	pub fn documents(&self) -> &[Value] {
		&self.docs
	}

	pub fn indexes(&self) -> &[IndexSpec] {
		&self.indexes
	}

	pub fn find_indexes_by_kind(&self, kind: IndexKind) -> Vec<&IndexSpec> {
		self.indexes.iter().filter(|i| i.kind == kind).collect()
	}

	pub fn is_sharded(&self) -> bool {
		self.shard_filter.as_ref().is_some_and(|f| f.is_collection_sharded())
	}

	pub fn shard_filter(&self) -> Option<&Arc<dyn ShardFilterer>> {
		self.shard_filter.as_ref()
	}

	pub fn timeseries(&self) -> Option<&TimeseriesOptions> {
		self.timeseries.as_ref()
	}

	pub fn is_timeseries_buckets(&self) -> bool {
		self.timeseries.is_some()
	}

	pub fn supports_random_cursor(&self) -> bool {
		self.random_cursor
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn documents_are_stored_as_bson() {
		let coll = Collection::from_json("c", &json!([{"a": 1}, {"a": 2}])).unwrap();
		assert_eq!(coll.num_records(), 2);
		assert!(matches!(coll.documents()[0], Value::BsonObject(_)));
		assert_eq!(coll.documents()[1].get_path("a").to_string(), "2");
	}

	#[test]
	fn indexes_are_found_by_kind() {
		let coll = Collection::new("c")
			.with_index(IndexSpec::new("loc", IndexKind::Geo2dSphere))
			.with_index(IndexSpec::new("a", IndexKind::Ascending));
		assert_eq!(coll.find_indexes_by_kind(IndexKind::Geo2dSphere)[0].field, "loc");
		assert!(coll.find_indexes_by_kind(IndexKind::Geo2d).is_empty());
	}
}
