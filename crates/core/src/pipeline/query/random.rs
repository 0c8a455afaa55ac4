//! Executors behind the `$sample` optimization.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value as Json, json};

use super::collection::Collection;
use super::exec::{BoxedExecutor, Lifecycle, PlanExecutor, WorkState};
use crate::pipeline::bucket::BucketUnpacker;
use crate::pipeline::document::{Document, Metadata};
use crate::val::handles::DocumentBelongsResult;
use crate::val::{ShardFilterer, Value, hash_value};

pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
	match seed {
		Some(seed) => StdRng::seed_from_u64(seed),
		None => StdRng::from_entropy(),
	}
}

/// Returns uniformly chosen records, with replacement, for as long as it is asked
#[derive(Debug)]
pub struct RandomCursor {
	coll: Arc<Collection>,
	rng: StdRng,
	lifecycle: Lifecycle,
}

impl RandomCursor {
	pub fn new(coll: Arc<Collection>, seed: Option<u64>) -> Self {
		Self {
			coll,
			rng: rng_from_seed(seed),
			lifecycle: Lifecycle::default(),
		}
	}
}

impl PlanExecutor for RandomCursor {
	fn name(&self) -> &'static str {
		"MULTI_ITERATOR"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		let docs = self.coll.documents();
		if docs.is_empty() {
			return Ok(WorkState::IsEof);
		}
		let idx = self.rng.gen_range(0..docs.len());
		Ok(WorkState::Advanced(Document::new(docs[idx].clone())))
	}

	fn explain(&self) -> Json {
		json!({"stage": "MULTI_ITERATOR", "namespace": self.coll.name(), "random": true})
	}
}

/// Drops documents which are not owned by this shard
#[derive(Debug)]
pub struct ShardFilter {
	child: BoxedExecutor,
	filter: Arc<dyn ShardFilterer>,
	lifecycle: Lifecycle,
}

impl ShardFilter {
	pub fn new(child: BoxedExecutor, filter: Arc<dyn ShardFilterer>) -> Self {
		Self {
			child,
			filter,
			lifecycle: Lifecycle::default(),
		}
	}
}

impl PlanExecutor for ShardFilter {
	fn name(&self) -> &'static str {
		"SHARDING_FILTER"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		match self.child.work()? {
			WorkState::Advanced(doc) if is_owned(self.filter.as_ref(), &doc.value) => Ok(WorkState::Advanced(doc)),
			WorkState::Advanced(_) => Ok(WorkState::NeedTime),
			other => Ok(other),
		}
	}

	fn explain(&self) -> Json {
		json!({"stage": "SHARDING_FILTER", "inputStage": self.child.explain()})
	}
}

/// Whether this shard owns the document. Documents without a shard key are never owned.
pub fn is_owned(filter: &dyn ShardFilterer, doc: &Value) -> bool {
	match filter.document_belongs_to_me(doc) {
		DocumentBelongsResult::Belongs => true,
		DocumentBelongsResult::DoesNotBelong => false,
		DocumentBelongsResult::NoShardKey => {
			warn!(
				target: "sbe::query",
				shard_key = ?filter.key_pattern(),
				"no shard key found in document, filtering it out"
			);
			false
		}
	}
}

/// Runs a trial plan for a bounded amount of work and falls back to a backup plan when the trial
/// advances too rarely.
#[derive(Debug)]
pub struct TrialExecutor {
	active: BoxedExecutor,
	/// Kept for explain once the trial has been decided
	rejected: Json,
	buffered: VecDeque<Document>,
	picked_backup: bool,
	ratio: f64,
	lifecycle: Lifecycle,
}

impl TrialExecutor {
	/// Runs the trial immediately, so the choice is known as soon as the executor exists
	pub fn new(mut trial: BoxedExecutor, backup: BoxedExecutor, max_work: u64, min_ratio: f64) -> Result<Self> {
		let mut buffered = VecDeque::new();
		let mut works = 0u64;
		let mut advanced = 0u64;
		let mut trial_eof = false;
		while works < max_work {
			works += 1;
			match trial.work()? {
				WorkState::Advanced(doc) => {
					advanced += 1;
					buffered.push_back(doc);
				}
				WorkState::NeedTime => {}
				WorkState::IsEof => {
					trial_eof = true;
					break;
				}
			}
		}
		let ratio = if works == 0 {
			0.0
		} else {
			advanced as f64 / works as f64
		};
		let picked_backup = !trial_eof && ratio < min_ratio;
		debug!(
			target: "sbe::query",
			works,
			advanced,
			ratio,
			min_ratio,
			picked_backup,
			"trial period complete"
		);
		let (active, rejected) = if picked_backup {
			buffered.clear();
			let rejected = trial.explain();
			(backup, rejected)
		} else {
			let rejected = backup.explain();
			(trial, rejected)
		};
		Ok(Self {
			active,
			rejected,
			buffered,
			picked_backup,
			ratio,
			lifecycle: Lifecycle::default(),
		})
	}

	pub fn picked_backup_plan(&self) -> bool {
		self.picked_backup
	}
}

impl PlanExecutor for TrialExecutor {
	fn name(&self) -> &'static str {
		"TRIAL"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		match self.buffered.pop_front() {
			Some(doc) => Ok(WorkState::Advanced(doc)),
			None => self.active.work(),
		}
	}

	fn explain(&self) -> Json {
		json!({
			"stage": "TRIAL",
			"pickedBackupPlan": self.picked_backup,
			"trialRatio": self.ratio,
			"inputStage": self.active.explain(),
			"rejectedPlan": self.rejected,
		})
	}
}

/// Samples measurements by picking a random bucket and then a random position within the
/// largest possible bucket. Positions past the end of the chosen bucket are misses.
#[derive(Debug)]
pub struct SampleFromBuckets {
	child: BoxedExecutor,
	unpacker: BucketUnpacker,
	rng: StdRng,
	max_consecutive_attempts: u64,
	sample_size: u64,
	bucket_max_count: u64,
	seen: HashSet<(u64, usize)>,
	attempts: u64,
	returned: u64,
	lifecycle: Lifecycle,
}

impl SampleFromBuckets {
	pub fn new(
		child: BoxedExecutor,
		unpacker: BucketUnpacker,
		max_consecutive_attempts: u64,
		sample_size: u64,
		bucket_max_count: u64,
		seed: Option<u64>,
	) -> Self {
		Self {
			child,
			unpacker,
			rng: rng_from_seed(seed.map(|s| s.wrapping_add(1))),
			max_consecutive_attempts,
			sample_size,
			bucket_max_count: bucket_max_count.max(1),
			seen: HashSet::new(),
			attempts: 0,
			returned: 0,
			lifecycle: Lifecycle::default(),
		}
	}

	fn miss(&mut self) -> Result<WorkState> {
		self.attempts += 1;
		uassert!(
			self.attempts < self.max_consecutive_attempts,
			5521504,
			"SAMPLE_FROM_TIMESERIES_BUCKET could not find a non-duplicate measurement after {} attempts",
			self.attempts
		);
		Ok(WorkState::NeedTime)
	}
}

impl PlanExecutor for SampleFromBuckets {
	fn name(&self) -> &'static str {
		"SAMPLE_FROM_TIMESERIES_BUCKET"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		if self.returned >= self.sample_size {
			return Ok(WorkState::IsEof);
		}
		let bucket = match self.child.work()? {
			WorkState::Advanced(bucket) => bucket,
			other => return Ok(other),
		};
		let pos = self.rng.gen_range(0..self.bucket_max_count) as usize;
		let Some(measurement) = self.unpacker.measurement_at(&bucket.value, pos) else {
			return self.miss();
		};
		let id = hash_value(&bucket.value.get_field("_id"), None);
		if !self.seen.insert((id, pos)) {
			return self.miss();
		}
		self.attempts = 0;
		self.returned += 1;
		Ok(WorkState::Advanced(Document::new(measurement)))
	}

	fn explain(&self) -> Json {
		json!({
			"stage": "SAMPLE_FROM_TIMESERIES_BUCKET",
			"sampleSize": self.sample_size,
			"bucketMaxCount": self.bucket_max_count,
			"inputStage": self.child.explain(),
		})
	}
}

/// Unpacks every measurement of every bucket its child produces
#[derive(Debug)]
pub struct UnpackBuckets {
	child: BoxedExecutor,
	unpacker: BucketUnpacker,
	pending: VecDeque<Value>,
	lifecycle: Lifecycle,
}

impl UnpackBuckets {
	pub fn new(child: BoxedExecutor, unpacker: BucketUnpacker) -> Self {
		Self {
			child,
			unpacker,
			pending: VecDeque::new(),
			lifecycle: Lifecycle::default(),
		}
	}
}

impl PlanExecutor for UnpackBuckets {
	fn name(&self) -> &'static str {
		"UNPACK_TIMESERIES_BUCKET"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		if let Some(measurement) = self.pending.pop_front() {
			return Ok(WorkState::Advanced(Document::new(measurement)));
		}
		match self.child.work()? {
			WorkState::Advanced(bucket) => {
				self.pending.extend(self.unpacker.unpack(&bucket.value));
				Ok(WorkState::NeedTime)
			}
			other => Ok(other),
		}
	}

	fn explain(&self) -> Json {
		json!({"stage": "UNPACK_TIMESERIES_BUCKET", "inputStage": self.child.explain()})
	}
}

/// Attaches a random value to each document, for the stages which need one downstream
pub fn with_rand_val(doc: Document, rand_val: f64) -> Document {
	Document::with_meta(
		doc.value,
		Metadata {
			rand_val: Some(rand_val),
			..doc.meta
		},
	)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::query::collscan::{CollectionScan, ScanParams};
	use crate::val::handles::KeyRangeShardFilterer;

	fn numbers(n: i32) -> Arc<Collection> {
		let docs: Vec<Json> = (0..n).map(|i| json!({"_id": i, "k": i})).collect();
		Arc::new(Collection::from_json("test.c", &Json::Array(docs)).unwrap())
	}

	fn owned_below(bound: i32) -> Arc<dyn ShardFilterer> {
		Arc::new(KeyRangeShardFilterer::new("k", vec![(Value::NumberInt32(i32::MIN), Value::NumberInt32(bound))]))
	}

	#[test]
	fn random_cursor_is_repeatable_with_a_seed() {
		let coll = numbers(50);
		let mut a = RandomCursor::new(coll.clone(), Some(7));
		let mut b = RandomCursor::new(coll, Some(7));
		for _ in 0..10 {
			let (x, y) = (a.get_next().unwrap().unwrap(), b.get_next().unwrap().unwrap());
			assert_eq!(x.value.get_field("_id").to_string(), y.value.get_field("_id").to_string());
		}
	}

	#[test]
	fn trial_keeps_a_mostly_owned_random_cursor() {
		let coll = numbers(200);
		let filter = owned_below(190);
		let trial = Box::new(ShardFilter::new(Box::new(RandomCursor::new(coll.clone(), Some(1))), filter.clone()));
		let backup = Box::new(ShardFilter::new(Box::new(CollectionScan::new(coll, ScanParams::default())), filter));
		let exec = TrialExecutor::new(trial, backup, 100, 0.5).unwrap();
		assert!(!exec.picked_backup_plan());
	}

	#[test]
	fn trial_falls_back_when_orphans_dominate() {
		let coll = numbers(200);
		let filter = owned_below(5);
		let trial = Box::new(ShardFilter::new(Box::new(RandomCursor::new(coll.clone(), Some(1))), filter.clone()));
		let backup = Box::new(ShardFilter::new(Box::new(CollectionScan::new(coll, ScanParams::default())), filter));
		let mut exec = TrialExecutor::new(trial, backup, 100, 0.5).unwrap();
		assert!(exec.picked_backup_plan());
		let mut owned = 0;
		while exec.get_next().unwrap().is_some() {
			owned += 1;
		}
		assert_eq!(owned, 5);
	}

	#[test_log::test]
	fn documents_without_a_shard_key_are_dropped() {
		let coll = Arc::new(Collection::from_json("test.c", &json!([{"_id": 1}])).unwrap());
		let scan = Box::new(CollectionScan::new(coll, ScanParams::default()));
		let mut exec = ShardFilter::new(scan, owned_below(10));
		assert!(exec.get_next().unwrap().is_none());
	}

	#[test]
	fn bucket_sampling_gives_up_on_empty_buckets() {
		let bucket = json!({"_id": 1, "meta": null, "data": {"t": {"0": 1}}});
		let coll = Arc::new(Collection::from_json("test.buckets", &json!([bucket])).unwrap());
		let unpacker = BucketUnpacker::new("t", None);
		let mut exec = SampleFromBuckets::new(Box::new(RandomCursor::new(coll, Some(3))), unpacker, 10, 5, 1_000_000, Some(3));
		let err = exec.get_next().and_then(|_| exec.get_next()).unwrap_err();
		assert_eq!(code_of(&err), Some(5521504));
	}
}
