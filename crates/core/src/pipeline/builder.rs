//! Builds the query executor which feeds the front of a pipeline.
//!
//! Building happens in two steps. [`build_inner_query_executor`] removes the stages at the head
//! of the pipeline which the query layer can answer, and returns an executor for them along with
//! a callback. [`attach_inner_query_executor`] later runs the callback, which installs the
//! executor as the pipeline's `$cursor` source.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::Value as Json;

use super::bucket::BucketUnpacker;
use super::projection::inclusion_of;
use super::query::collscan::{CollectionScan, ScanParams};
use super::query::near::{NearExecutor, NearQuery};
use super::query::random::{RandomCursor, SampleFromBuckets, ShardFilter, TrialExecutor, UnpackBuckets};
use super::query::{BoxedExecutor, Collection, FindCommand, IndexKind, get_executor_distinct, get_executor_find};
use super::stages::{
	CursorStage, CursorType, GroupByDistinctScanStage, GroupFromFirstDocument, SampleFromRandomCursorStage, Stage,
};
use super::{Pipeline, extract_limit_for_pushdown, extract_skip_for_pushdown};
use crate::cnf::{
	GEO_NEAR_DEFAULT_MULTIPLIER, SAMPLE_BUCKET_PRESAMPLE_OFFSET, SAMPLE_MAX_PRESAMPLE_SIZE, SAMPLE_MAX_RATIO,
	SAMPLE_MIN_COLLECTION_SIZE, TIMESERIES_BUCKET_MAX_COUNT, TIMESERIES_MIN_BUCKET_FULLNESS,
	TIMESERIES_SAMPLE_COEFFICIENT, TIMESERIES_TRIAL_COEFFICIENT,
};
use crate::err::{Error, code_of};

/// Installs a built executor as the first stage of a pipeline
pub type AttachExecutorCallback = Box<dyn FnOnce(&Arc<Collection>, BoxedExecutor, &mut Pipeline) -> Result<()>>;

/// The callback and executor returned by [`build_inner_query_executor`]. Both are `None` when the
/// pipeline generates its own documents.
pub type InnerQueryExecutor = (Option<AttachExecutorCallback>, Option<BoxedExecutor>);

/// A number of documents to skip and then a number to return
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipThenLimit {
	pub skip: Option<u64>,
	pub limit: Option<u64>,
}

/// A number of documents to return and then a number of those to skip
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LimitThenSkip {
	pub limit: Option<u64>,
	pub skip: Option<u64>,
}

impl LimitThenSkip {
	/// The same window expressed as a skip applied before a limit
	pub fn flip(self) -> SkipThenLimit {
		SkipThenLimit {
			skip: self.skip,
			limit: match (self.limit, self.skip) {
				(Some(limit), Some(skip)) => Some(limit.saturating_sub(skip)),
				(limit, _) => limit,
			},
		}
	}
}

/// Builds the executor which answers the head of `pipeline`, removing the stages it absorbs
pub fn build_inner_query_executor(coll: Option<&Arc<Collection>>, pipeline: &mut Pipeline) -> Result<InnerQueryExecutor> {
	if pipeline.stages().first().is_some_and(|s| !s.constraints().requires_input_doc_source) {
		trace!(target: "sbe::pipeline", "the first stage generates its own documents");
		return Ok((None, None));
	}
	if let Some(coll) = coll {
		if let Some(built) = build_sample_executor(coll, pipeline)? {
			return Ok(built);
		}
	}
	if matches!(pipeline.stages().first(), Some(Stage::GeoNear(_))) {
		return build_geo_near_executor(coll, pipeline);
	}
	let coll = match coll {
		Some(coll) => coll.clone(),
		None => Arc::new(Collection::new(pipeline.context().ns.clone())),
	};
	build_generic_executor(&coll, pipeline)
}

/// Runs the callback returned alongside an executor
pub fn attach_inner_query_executor(
	coll: &Arc<Collection>,
	callback: Option<AttachExecutorCallback>,
	exec: Option<BoxedExecutor>,
	pipeline: &mut Pipeline,
) -> Result<()> {
	match (callback, exec) {
		(Some(callback), Some(exec)) => callback(coll, exec, pipeline),
		(None, None) => Ok(()),
		_ => Err(Error::unreachable("an executor and its attach callback must be built together").into()),
	}
}

pub fn build_and_attach_inner_query_executor(coll: Option<&Arc<Collection>>, pipeline: &mut Pipeline) -> Result<()> {
	let (callback, exec) = build_inner_query_executor(coll, pipeline)?;
	let coll = match coll {
		Some(coll) => coll.clone(),
		None => Arc::new(Collection::new(pipeline.context().ns.clone())),
	};
	attach_inner_query_executor(&coll, callback, exec, pipeline)
}

fn cursor_callback(cursor_type: CursorType) -> AttachExecutorCallback {
	Box::new(move |_coll, exec, pipeline| {
		pipeline.add_initial_source(Stage::Cursor(CursorStage::new(exec, cursor_type, None)?));
		Ok(())
	})
}

fn cursor_type_for(pipeline: &Pipeline) -> CursorType {
	if pipeline.get_dependencies().has_no_requirements() {
		CursorType::EmptyDocuments
	} else {
		CursorType::Regular
	}
}

/// Builds an executor for a random sample, returning it together with whether the sample is
/// produced by the storage layer. When it is not, the `$sample` stage must stay in the pipeline.
pub fn create_random_cursor_executor(
	coll: &Arc<Collection>,
	sample_size: u64,
	unpacker: Option<&BucketUnpacker>,
	seed: Option<u64>,
) -> Result<Option<(BoxedExecutor, bool)>> {
	let num_records = coll.num_records();
	let size = sample_size as f64;
	let num = num_records as f64;
	let bucket_max = *TIMESERIES_BUCKET_MAX_COUNT;
	if !coll.is_timeseries_buckets() {
		if size > num * *SAMPLE_MAX_RATIO || num_records <= *SAMPLE_MIN_COLLECTION_SIZE {
			debug!(target: "sbe::pipeline", sample_size, num_records, "sample is too large for a random cursor");
			return Ok(None);
		}
	} else if size > *TIMESERIES_SAMPLE_COEFFICIENT * num * bucket_max as f64 {
		debug!(target: "sbe::pipeline", sample_size, num_records, "sample is too large for bucket sampling");
		return Ok(None);
	}
	if !coll.supports_random_cursor() {
		debug!(target: "sbe::pipeline", ns = coll.name(), "storage has no random cursor");
		return Ok(None);
	}
	let random: BoxedExecutor = Box::new(RandomCursor::new(coll.clone(), seed));
	let max_work = *SAMPLE_MAX_PRESAMPLE_SIZE;
	let trial = match (coll.shard_filter(), coll.is_timeseries_buckets()) {
		(Some(filter), false) if filter.is_collection_sharded() => {
			let min_ratio = (size / (num * *SAMPLE_MAX_RATIO)).max(*SAMPLE_MAX_RATIO);
			let trial = Box::new(ShardFilter::new(random, filter.clone()));
			let scan = Box::new(CollectionScan::new(coll.clone(), ScanParams::default()));
			let backup = Box::new(ShardFilter::new(scan, filter.clone()));
			TrialExecutor::new(trial, backup, max_work, min_ratio)?
		}
		(_, true) => {
			let Some(unpacker) = unpacker else {
				return Ok(None);
			};
			if num_records == 0 {
				return Ok(None);
			}
			let min_ratio = (size / (*TIMESERIES_TRIAL_COEFFICIENT * num * bucket_max as f64))
				.min(1.0)
				.max(*TIMESERIES_MIN_BUCKET_FULLNESS);
			let max_attempts = max_work + *SAMPLE_BUCKET_PRESAMPLE_OFFSET;
			let trial =
				Box::new(SampleFromBuckets::new(random, unpacker.clone(), max_attempts, sample_size, bucket_max, seed));
			let scan = Box::new(CollectionScan::new(coll.clone(), ScanParams::default()));
			let backup = Box::new(UnpackBuckets::new(scan, unpacker.clone()));
			TrialExecutor::new(trial, backup, max_work, min_ratio)?
		}
		_ => return Ok(Some((random, true))),
	};
	let optimized = !trial.picked_backup_plan();
	Ok(Some((Box::new(trial), optimized)))
}

/// The size of a leading sample, and the unpacker of a bucket unpacking stage before it
fn leading_sample(pipeline: &Pipeline) -> Option<(u64, Option<BucketUnpacker>)> {
	match pipeline.stages() {
		[Stage::Sample(sample), ..] => Some((sample.size(), None)),
		[Stage::UnpackBucket(unpack), Stage::Sample(sample), ..] => Some((sample.size(), Some(unpack.unpacker().clone()))),
		_ => None,
	}
}

fn build_sample_executor(coll: &Arc<Collection>, pipeline: &mut Pipeline) -> Result<Option<InnerQueryExecutor>> {
	let Some((size, unpacker)) = leading_sample(pipeline) else {
		return Ok(None);
	};
	let seed = pipeline.context().seed;
	let Some((exec, optimized)) = create_random_cursor_executor(coll, size, unpacker.as_ref(), seed)? else {
		return Ok(None);
	};
	debug!(target: "sbe::pipeline", sample_size = size, optimized, timeseries = unpacker.is_some(), "sampling through a random cursor");
	let stages = pipeline.stages_mut();
	match (unpacker.is_some(), optimized) {
		(false, true) => {
			stages.remove(0);
			let sample = SampleFromRandomCursorStage::new(size, "_id", coll.num_records(), seed);
			stages.insert(0, Stage::SampleFromRandomCursor(sample));
		}
		(false, false) => {}
		(true, true) => {
			stages.drain(..2);
		}
		(true, false) => {
			stages.remove(0);
		}
	}
	let cursor_type = cursor_type_for(pipeline);
	Ok(Some((Some(cursor_callback(cursor_type)), Some(exec))))
}

/// Chooses the field an unkeyed `$geoNear` searches, preferring a 2d index
fn geo_near_field_from_indexes(coll: &Collection) -> Result<(String, IndexKind)> {
	let flat = coll.find_indexes_by_kind(IndexKind::Geo2d);
	if flat.len() > 1 {
		bail!(Error::IndexNotFound(format!(
			"There is more than one 2d index on {}; unsure which to use for $geoNear",
			coll.name()
		)));
	}
	if let [index] = flat.as_slice() {
		return Ok((index.field.clone(), IndexKind::Geo2d));
	}
	let spherical = coll.find_indexes_by_kind(IndexKind::Geo2dSphere);
	match spherical.as_slice() {
		[] => bail!(Error::IndexNotFound("$geoNear requires a 2d or 2dsphere index, but none were found".into())),
		[index] => Ok((index.field.clone(), IndexKind::Geo2dSphere)),
		_ => bail!(Error::IndexNotFound(format!(
			"There is more than one 2dsphere index on {}; unsure which to use for $geoNear",
			coll.name()
		))),
	}
}

fn build_geo_near_executor(coll: Option<&Arc<Collection>>, pipeline: &mut Pipeline) -> Result<InnerQueryExecutor> {
	let Some(coll) = coll else {
		bail!(Error::NamespaceNotFound(format!(
			"$geoNear requires a geo index to run, but {} does not exist",
			pipeline.context().ns
		)));
	};
	let Some(Stage::GeoNear(geo)) = pipeline.stages().first() else {
		bail!(Error::unreachable("the geo near path requires a leading $geoNear"));
	};
	let (field, kind) = match geo.key() {
		Some(key) => {
			let Some(index) = coll.indexes().iter().find(|i| i.field == key && i.kind.is_geo()) else {
				bail!(Error::NoQueryExecutionPlans(format!("unable to find index for $geoNear query on '{key}'")));
			};
			(key.to_owned(), index.kind)
		}
		None => geo_near_field_from_indexes(coll)?,
	};
	let mut query = NearQuery::new(field.as_str(), geo.near(), kind, geo.spherical())?;
	query.min_distance = geo.min_distance();
	query.max_distance = geo.max_distance();
	let filter = geo.query().filter(|q| !q.is_trivially_true()).cloned();
	let output = geo.output(*GEO_NEAR_DEFAULT_MULTIPLIER);
	debug!(target: "sbe::pipeline", field = %field, index = kind.name(), "answering $geoNear with a near query");
	let exec: BoxedExecutor = Box::new(NearExecutor::new(coll.clone(), query, filter, None));
	let callback: AttachExecutorCallback = Box::new(move |_coll, exec, pipeline| {
		pipeline.add_initial_source(Stage::Cursor(CursorStage::new(exec, CursorType::Regular, Some(output))?));
		Ok(())
	});
	pipeline.pop_front();
	Ok((Some(callback), Some(exec)))
}

/// The leading `$sort`, and a `$group` which may be answered by a distinct scan
fn sort_and_group(pipeline: &Pipeline) -> (bool, Option<GroupFromFirstDocument>) {
	match pipeline.stages() {
		[Stage::Sort(sort), ..] if sort.has_limit() => (true, None),
		[Stage::Sort(_), Stage::Group(group), ..] => (true, group.rewrite_as_transform_on_first_document()),
		[Stage::Sort(_), ..] => (true, None),
		[Stage::Group(group), ..] => (false, group.rewrite_as_transform_on_first_document()),
		_ => (false, None),
	}
}

/// Removes the `$limit` and `$skip` stages which may move to the front of the pipeline
fn extract_skip_and_limit_for_pushdown(pipeline: &mut Pipeline) -> SkipThenLimit {
	let limit = extract_limit_for_pushdown(pipeline.stages_mut(), 0);
	let skip = extract_skip_for_pushdown(pipeline.stages_mut(), 0);
	let window = LimitThenSkip {
		limit,
		skip,
	}
	.flip();
	if window.skip.is_some() || window.limit.is_some() {
		pipeline.optimize();
	}
	window
}

fn build_generic_executor(coll: &Arc<Collection>, pipeline: &mut Pipeline) -> Result<InnerQueryExecutor> {
	pipeline.optimize();
	let mut filter = None;
	if let Some(Stage::Match(m)) = pipeline.stages().first() {
		if !m.is_trivially_true() {
			filter = Some(m.query());
			pipeline.pop_front();
		}
	}
	let (has_sort, group) = sort_and_group(pipeline);
	let window = extract_skip_and_limit_for_pushdown(pipeline);
	let (exec, cursor_type) = prepare_executor(coll, pipeline, filter, has_sort, group, window)?;
	Ok((Some(cursor_callback(cursor_type)), Some(exec)))
}

fn prepare_executor(
	coll: &Arc<Collection>,
	pipeline: &mut Pipeline,
	filter: Option<Json>,
	has_sort: bool,
	group: Option<GroupFromFirstDocument>,
	mut window: SkipThenLimit,
) -> Result<(BoxedExecutor, CursorType)> {
	let mut sort = None;
	let mut sort_has_limit = false;
	if has_sort {
		if let Some(Stage::Sort(s)) = pipeline.pop_front_with_name("$sort") {
			sort = Some(s.pattern());
			sort_has_limit = s.has_limit();
			let skip = extract_skip_for_pushdown(pipeline.stages_mut(), 0);
			if skip.is_some() {
				pipeline.optimize();
			}
			window = LimitThenSkip {
				limit: s.limit(),
				skip,
			}
			.flip();
			debug!(target: "sbe::pipeline", sort = %s.pattern(), skip = ?window.skip, limit = ?window.limit, "pushing $sort into the query");
		}
	}
	let deps = pipeline.get_dependencies();
	let cursor_type = if deps.has_no_requirements() {
		CursorType::EmptyDocuments
	} else {
		CursorType::Regular
	};
	let projection = match cursor_type {
		CursorType::EmptyDocuments => None,
		CursorType::Regular => {
			let allow_expressions = sort.is_none() && window.skip.is_none() && window.limit.is_none();
			projection_for_pushdown(pipeline, allow_expressions, deps.projection())
		}
	};
	let mut cmd = FindCommand {
		filter,
		projection,
		sort,
		skip: None,
		limit: None,
	};
	if let Some(group) = group {
		match get_executor_distinct(coll.clone(), &cmd, &group.id_field) {
			Ok(exec) => {
				tassert!(!sort_has_limit, 5521504, "a $sort with a limit cannot precede a distinct scan");
				pipeline.pop_front_with_name("$sort");
				pipeline.pop_front_with_name("$group");
				debug!(target: "sbe::pipeline", field = %group.id_field, "answering $group with a distinct scan");
				pipeline.add_initial_source(Stage::GroupByDistinctScan(GroupByDistinctScanStage::new(group)?));
				return Ok((exec, cursor_type));
			}
			Err(err) if code_of(&err) == Some(291) => {
				warn!(target: "sbe::pipeline", field = %group.id_field, error = %err, "falling back from a distinct scan");
			}
			Err(err) => {
				return Err(err).context("Failed to determine whether query system can provide a DISTINCT_SCAN grouping");
			}
		}
	}
	cmd.skip = window.skip;
	cmd.limit = window.limit;
	debug!(target: "sbe::pipeline", ns = coll.name(), ?cmd, "building the find executor");
	Ok((get_executor_find(coll.clone(), &cmd)?, cursor_type))
}

/// Takes a leading inclusion `$project` out of the pipeline, or else projects the fields the
/// pipeline depends on
fn projection_for_pushdown(pipeline: &mut Pipeline, allow_expressions: bool, deps: Option<Vec<String>>) -> Option<Json> {
	if pipeline.is_empty() {
		return None;
	}
	if let Some(Stage::Project(project)) = pipeline.stages().first() {
		let projection = project.projection();
		if projection.is_inclusion() && (!projection.has_expressions() || allow_expressions) {
			let spec = projection.serialize();
			pipeline.pop_front();
			return Some(spec);
		}
	}
	deps.map(|fields| inclusion_of(&fields))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::no_skip(LimitThenSkip { limit: Some(5), skip: None }, SkipThenLimit { skip: None, limit: Some(5) })]
	#[case::skip_inside_limit(LimitThenSkip { limit: Some(5), skip: Some(2) }, SkipThenLimit { skip: Some(2), limit: Some(3) })]
	#[case::skip_past_limit(LimitThenSkip { limit: Some(2), skip: Some(5) }, SkipThenLimit { skip: Some(5), limit: Some(0) })]
	#[case::skip_only(LimitThenSkip { limit: None, skip: Some(4) }, SkipThenLimit { skip: Some(4), limit: None })]
	fn flipping_windows(#[case] window: LimitThenSkip, #[case] expected: SkipThenLimit) {
		assert_eq!(window.flip(), expected);
	}
}
