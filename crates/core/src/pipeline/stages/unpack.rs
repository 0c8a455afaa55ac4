use std::collections::VecDeque;

use anyhow::Result;
use serde_json::{Value as Json, json};

use super::{DepsState, DocumentSource, Upstream};
use crate::expr::Dependencies;
use crate::pipeline::bucket::BucketUnpacker;
use crate::pipeline::document::Document;

/// `$_internalUnpackBucket`: turns each time-series bucket into its measurements
#[derive(Debug)]
pub struct UnpackBucketStage {
	unpacker: BucketUnpacker,
	pending: VecDeque<Document>,
}

impl UnpackBucketStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		Ok(Self::new(BucketUnpacker::parse(spec)?))
	}

	pub fn new(unpacker: BucketUnpacker) -> Self {
		Self {
			unpacker,
			pending: VecDeque::new(),
		}
	}

	pub fn unpacker(&self) -> &BucketUnpacker {
		&self.unpacker
	}
}

impl DocumentSource for UnpackBucketStage {
	fn name(&self) -> &'static str {
		"$_internalUnpackBucket"
	}

	fn get_dependencies(&self, _deps: &mut Dependencies) -> DepsState {
		DepsState::ExhaustiveAll
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		loop {
			if let Some(doc) = self.pending.pop_front() {
				return Ok(Some(doc));
			}
			let Some(bucket) = input.next()? else {
				return Ok(None);
			};
			self.pending.extend(self.unpacker.unpack(&bucket.value).into_iter().map(Document::new));
		}
	}

	fn serialize(&self) -> Json {
		json!({"$_internalUnpackBucket": self.unpacker.serialize()})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pipeline::stages::{Stage, run_stages};

	#[test]
	fn buckets_become_measurements() {
		let buckets = json!([
			{"_id": 1, "meta": "a", "data": {"t": {"0": 1, "1": 2}, "x": {"1": 5}}},
			{"_id": 2, "meta": "b", "data": {"t": {"0": 3}}},
		]);
		let stage = UnpackBucketStage::parse(&json!({"timeField": "t", "metaField": "m"})).unwrap();
		let out = run_stages(vec![Stage::UnpackBucket(stage)], buckets);
		assert_eq!(out.len(), 3);
		assert_eq!(out[1]["x"], json!(5));
		assert_eq!(out[2]["m"], json!("b"));
	}
}
