use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{Result, bail, ensure};
use rand::Rng;
use rand::rngs::StdRng;
use serde_json::{Value as Json, json};

use super::{DepsState, DocumentSource, Upstream};
use crate::cnf::MAX_BUFFERED_DOCUMENTS;
use crate::err::Error;
use crate::expr::Dependencies;
use crate::pipeline::document::Document;
use crate::pipeline::query::random::{rng_from_seed, with_rand_val};
use crate::val::{Value, hash_value, three_way};

/// The number of duplicates a random cursor may return in a row before sampling gives up
const MAX_CONSECUTIVE_DUPLICATES: u64 = 100;

/// `$sample` when it runs over its whole input: every document draws a random value and the
/// `size` largest draws are kept
#[derive(Debug)]
pub struct SampleStage {
	size: u64,
	rng: StdRng,
	output: Option<std::vec::IntoIter<Document>>,
}

impl SampleStage {
	pub fn parse(spec: &Json, seed: Option<u64>) -> Result<Self> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(28745, "the $sample stage specification must be an object"));
		};
		let mut size = None;
		for (name, value) in map {
			match name.as_str() {
				"size" => {
					let Some(n) = value.as_f64() else {
						bail!(Error::fail(28746, "size argument to $sample must be a number"));
					};
					ensure!(n >= 0.0, Error::fail(28747, "size argument to $sample must not be negative"));
					size = Some(n as u64);
				}
				other => bail!(Error::fail(28748, format!("unrecognized option to $sample: {other}"))),
			}
		}
		let Some(size) = size else {
			bail!(Error::fail(28749, "$sample stage must specify a size"));
		};
		Ok(Self::new(size, seed))
	}

	pub fn new(size: u64, seed: Option<u64>) -> Self {
		Self {
			size,
			rng: rng_from_seed(seed),
			output: None,
		}
	}

	pub fn size(&self) -> u64 {
		self.size
	}

	fn top_k(&mut self, input: &mut Upstream<'_>) -> Result<Vec<Document>> {
		let mut drawn = Vec::new();
		while let Some(doc) = input.next()? {
			uassert!(
				drawn.len() < *MAX_BUFFERED_DOCUMENTS,
				292,
				"$sample exceeded the buffered document limit of {}",
				*MAX_BUFFERED_DOCUMENTS
			);
			let rand_val: f64 = self.rng.r#gen();
			drawn.push(with_rand_val(doc, rand_val));
		}
		drawn.sort_by(|l, r| {
			let (l, r) = (l.meta.rand_val.unwrap_or(0.0), r.meta.rand_val.unwrap_or(0.0));
			r.partial_cmp(&l).unwrap_or(Ordering::Equal)
		});
		drawn.truncate(usize::try_from(self.size).unwrap_or(usize::MAX));
		Ok(drawn)
	}
}

impl DocumentSource for SampleStage {
	fn name(&self) -> &'static str {
		"$sample"
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		if self.size == 0 {
			return Ok(None);
		}
		if self.output.is_none() {
			self.output = Some(self.top_k(input)?.into_iter());
		}
		Ok(self.output.as_mut().and_then(Iterator::next))
	}

	fn serialize(&self) -> Json {
		json!({"$sample": {"size": self.size}})
	}
}

/// `$sampleFromRandomCursor`: deduplicates the documents of a random cursor by id, stopping once
/// enough distinct documents were returned
#[derive(Debug)]
pub struct SampleFromRandomCursorStage {
	size: u64,
	id_field: String,
	num_records: u64,
	rng: StdRng,
	/// The random value attached to the previous document, decreasing from 1
	rand_val: f64,
	seen: HashMap<u64, Vec<Value>, ahash::RandomState>,
	returned: u64,
}

impl SampleFromRandomCursorStage {
	pub fn new(size: u64, id_field: impl Into<String>, num_records: u64, seed: Option<u64>) -> Self {
		Self {
			size,
			id_field: id_field.into(),
			num_records,
			rng: rng_from_seed(seed.map(|s| s.wrapping_add(2))),
			rand_val: 1.0,
			seen: HashMap::default(),
			returned: 0,
		}
	}

	/// Records an id, returning false if it was already seen
	fn insert_id(&mut self, id: Value) -> bool {
		let bucket = self.seen.entry(hash_value(&id, None)).or_default();
		if bucket.iter().any(|v| three_way(v, &id, None) == Some(Ordering::Equal)) {
			return false;
		}
		bucket.push(id);
		true
	}

	/// The smallest of `n` uniform draws, which is how far the next random value falls
	fn smallest_of_uniform_draws(&mut self) -> f64 {
		let n = self.num_records.max(1) as f64;
		let u: f64 = self.rng.r#gen();
		1.0 - u.powf(1.0 / n)
	}
}

impl DocumentSource for SampleFromRandomCursorStage {
	fn name(&self) -> &'static str {
		"$sampleFromRandomCursor"
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		deps.add_field(self.id_field.as_str());
		DepsState::SeeNext
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		if self.returned >= self.size {
			return Ok(None);
		}
		let mut duplicates = 0;
		loop {
			let Some(doc) = input.next()? else {
				return Ok(None);
			};
			let id = doc.value.get_path(&self.id_field);
			uassert!(
				!id.is_nothing(),
				28793,
				"The optimized $sample stage requires all documents have a {} field",
				self.id_field
			);
			if self.insert_id(id) {
				self.returned += 1;
				self.rand_val -= self.smallest_of_uniform_draws();
				return Ok(Some(with_rand_val(doc, self.rand_val)));
			}
			duplicates += 1;
			uassert!(
				duplicates < MAX_CONSECUTIVE_DUPLICATES,
				28799,
				"$sample stage could not find a non-duplicate document after {} while using a random cursor. This is likely a sporadic failure, please try again.",
				MAX_CONSECUTIVE_DUPLICATES
			);
		}
	}

	fn serialize(&self) -> Json {
		json!({"$sampleFromRandomCursor": {"size": self.size}})
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::stages::{Stage, run_stages};

	fn docs(n: i64) -> Json {
		Json::Array((0..n).map(|i| json!({"_id": i})).collect())
	}

	#[test]
	fn top_k_sample_is_repeatable_with_a_seed() {
		let first = run_stages(vec![Stage::Sample(SampleStage::new(3, Some(7)))], docs(20));
		let second = run_stages(vec![Stage::Sample(SampleStage::new(3, Some(7)))], docs(20));
		assert_eq!(first.len(), 3);
		assert_eq!(first, second);
	}

	#[test]
	fn oversized_samples_return_everything() {
		assert_eq!(run_stages(vec![Stage::Sample(SampleStage::new(50, None))], docs(5)).len(), 5);
		assert!(run_stages(vec![Stage::Sample(SampleStage::new(0, None))], docs(5)).is_empty());
	}

	#[test]
	fn random_cursor_samples_are_deduplicated() {
		let docs = json!([{"_id": 1}, {"_id": 1}, {"_id": 2}, {"_id": 1}, {"_id": 3}]);
		let stage = Stage::SampleFromRandomCursor(SampleFromRandomCursorStage::new(2, "_id", 5, None));
		assert_eq!(run_stages(vec![stage], docs), vec![json!({"_id": 1}), json!({"_id": 2})]);
	}

	#[test]
	fn too_many_duplicates_fail() {
		use std::sync::Arc;

		use crate::pipeline::query::Collection;
		use crate::pipeline::query::collscan::{CollectionScan, ScanParams};
		use crate::pipeline::stages::{CursorStage, CursorType, Upstream};

		let docs = Json::Array((0..150).map(|_| json!({"_id": 1})).collect());
		let coll = Arc::new(Collection::from_json("test.c", &docs).unwrap());
		let exec = Box::new(CollectionScan::new(coll, ScanParams::default()));
		let mut stages = vec![
			Stage::Cursor(CursorStage::new(exec, CursorType::Regular, None).unwrap()),
			Stage::SampleFromRandomCursor(SampleFromRandomCursorStage::new(2, "_id", 5, None)),
		];
		assert!(Upstream::new(&mut stages).next().unwrap().is_some());
		let err = Upstream::new(&mut stages).next().unwrap_err();
		assert_eq!(code_of(&err), Some(28799));
	}

	#[test]
	fn sample_size_must_be_valid() {
		let err = SampleStage::parse(&json!({"size": -1}), None).unwrap_err();
		assert_eq!(code_of(&err), Some(28747));
		let err = SampleStage::parse(&json!({}), None).unwrap_err();
		assert_eq!(code_of(&err), Some(28749));
	}
}
