//! The aggregation pipeline and the builder which pushes its head down into the query layer.

pub mod bucket;
pub mod builder;
pub mod document;
pub mod projection;
pub mod query;
pub mod stages;

use anyhow::{Result, bail};
use serde_json::Value as Json;

use self::document::Document;
use self::stages::{DepsState, Stage, Upstream};
use crate::err::Error;
use crate::expr::Dependencies;

/// The namespace a pipeline runs against, and the seed of its random choices
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
	pub ns: String,
	pub seed: Option<u64>,
}

/// An ordered list of stages
#[derive(Debug)]
pub struct Pipeline {
	ctx: PipelineContext,
	stages: Vec<Stage>,
	opened: bool,
	closed: bool,
}

impl Pipeline {
	pub fn new(ctx: PipelineContext, stages: Vec<Stage>) -> Self {
		Self {
			ctx,
			stages,
			opened: false,
			closed: false,
		}
	}

	pub fn parse(ctx: PipelineContext, spec: &Json) -> Result<Self> {
		let Json::Array(specs) = spec else {
			bail!(Error::fail(14, "a pipeline must be an array of stage specifications"));
		};
		let mut stages = Vec::with_capacity(specs.len());
		for spec in specs {
			stages.extend(Stage::parse(spec, &ctx)?);
		}
		if stages.iter().skip(1).any(|s| matches!(s, Stage::GeoNear(_))) {
			bail!(Error::fail(40603, "$geoNear is only valid as the first stage in a pipeline."));
		}
		Ok(Self::new(ctx, stages))
	}

	pub fn context(&self) -> &PipelineContext {
		&self.ctx
	}

	pub fn stages(&self) -> &[Stage] {
		&self.stages
	}

	pub fn stages_mut(&mut self) -> &mut Vec<Stage> {
		&mut self.stages
	}

	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stages.is_empty()
	}

	pub fn pop_front(&mut self) -> Option<Stage> {
		(!self.stages.is_empty()).then(|| self.stages.remove(0))
	}

	/// Removes the first stage if it has the given name
	pub fn pop_front_with_name(&mut self, name: &str) -> Option<Stage> {
		match self.stages.first() {
			Some(stage) if stage.name() == name => self.pop_front(),
			_ => None,
		}
	}

	pub fn add_initial_source(&mut self, stage: Stage) {
		self.stages.insert(0, stage);
	}

	/// Rewrites the stages into an equivalent, cheaper pipeline
	pub fn optimize(&mut self) {
		self.stages.retain(|s| !matches!(s, Stage::Match(m) if m.is_trivially_true()));
		let mut i = 0;
		while i < self.stages.len() {
			if self.optimize_at(i) {
				i = i.saturating_sub(1);
			} else {
				i += 1;
			}
		}
	}

	fn optimize_at(&mut self, i: usize) -> bool {
		if matches!(self.stages[i], Stage::Sort(_)) {
			let Some(limit) = extract_limit_for_pushdown(&mut self.stages, i + 1) else {
				return false;
			};
			if let Stage::Sort(sort) = &mut self.stages[i] {
				sort.absorb_limit(limit);
			}
			return true;
		}
		let Some(next) = self.stages.get(i + 1) else {
			return false;
		};
		let mergeable = matches!(
			(&self.stages[i], next),
			(Stage::Skip(_), Stage::Skip(_)) | (Stage::Limit(_), Stage::Limit(_)) | (Stage::Match(_), Stage::Match(_))
		);
		if !mergeable {
			return false;
		}
		let next = self.stages.remove(i + 1);
		match (&mut self.stages[i], next) {
			(Stage::Skip(a), Stage::Skip(b)) => a.set_skip(a.skip().saturating_add(b.skip())),
			(Stage::Limit(a), Stage::Limit(b)) => a.set_limit(a.limit().min(b.limit())),
			(Stage::Match(a), Stage::Match(b)) => a.join(b),
			_ => {}
		}
		true
	}

	/// The fields of the input documents which the pipeline reads
	pub fn get_dependencies(&self) -> Dependencies {
		let mut deps = Dependencies::new();
		for stage in &self.stages {
			match stage.get_dependencies(&mut deps) {
				DepsState::SeeNext => continue,
				DepsState::ExhaustiveFields => return deps,
				DepsState::ExhaustiveAll | DepsState::NotSupported => break,
			}
		}
		deps.needs_whole_document = true;
		deps
	}

	/// Pulls the next result out of the last stage
	pub fn next(&mut self) -> Result<Option<Document>> {
		if self.closed {
			return Ok(None);
		}
		if !self.opened {
			self.opened = true;
			trace!(target: "sbe::pipeline", ns = %self.ctx.ns, stages = %self.serialize(), "opening pipeline");
		}
		let next = Upstream::new(&mut self.stages).next()?;
		if next.is_none() {
			self.closed = true;
			trace!(target: "sbe::pipeline", ns = %self.ctx.ns, "closing pipeline");
		}
		Ok(next)
	}

	/// Runs the pipeline to completion
	pub fn collect(&mut self) -> Result<Vec<Document>> {
		let mut out = Vec::new();
		while let Some(doc) = self.next()? {
			out.push(doc);
		}
		Ok(out)
	}

	pub fn serialize(&self) -> Json {
		Json::Array(self.stages.iter().map(Stage::serialize).collect())
	}
}

/// Removes every `$limit` reachable from `start` past `$skip` stages and stages which a limit may
/// swap with, returning the smallest number of documents the removed limits admit at `start`
pub(crate) fn extract_limit_for_pushdown(stages: &mut Vec<Stage>, start: usize) -> Option<u64> {
	let mut skip_sum = 0u64;
	let mut limit: Option<u64> = None;
	let mut i = start;
	while i < stages.len() {
		match &stages[i] {
			Stage::Limit(l) => {
				let admitted = l.limit().saturating_add(skip_sum);
				limit = Some(limit.map_or(admitted, |m| m.min(admitted)));
				stages.remove(i);
			}
			Stage::Skip(s) => {
				skip_sum = skip_sum.saturating_add(s.skip());
				i += 1;
			}
			s if s.constraints().can_swap_with_skip_limit => i += 1,
			_ => break,
		}
	}
	limit
}

/// Removes every `$skip` reachable from `start` past stages which a skip may swap with,
/// returning their sum
pub(crate) fn extract_skip_for_pushdown(stages: &mut Vec<Stage>, start: usize) -> Option<u64> {
	let mut skip: Option<u64> = None;
	let mut i = start;
	while i < stages.len() {
		match &stages[i] {
			Stage::Skip(s) => {
				skip = Some(skip.unwrap_or(0).saturating_add(s.skip()));
				stages.remove(i);
			}
			s if s.constraints().can_swap_with_skip_limit => i += 1,
			_ => break,
		}
	}
	skip
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use test_log::test;

	use super::*;
	use crate::err::code_of;

	fn pipeline(spec: Json) -> Pipeline {
		Pipeline::parse(PipelineContext::default(), &spec).unwrap()
	}

	#[test]
	fn optimize_coalesces_neighbours() {
		let mut p = pipeline(json!([
			{"$match": {}},
			{"$match": {"a": 1}},
			{"$match": {"b": 2}},
			{"$skip": 1},
			{"$skip": 2},
			{"$limit": 5},
			{"$limit": 3},
		]));
		p.optimize();
		assert_eq!(
			p.serialize(),
			json!([{"$match": {"$and": [{"a": {"$eq": 1}}, {"b": {"$eq": 2}}]}}, {"$skip": 3}, {"$limit": 3}])
		);
	}

	#[test]
	fn sort_absorbs_limits_past_skips() {
		let mut p = pipeline(json!([{"$sort": {"a": 1}}, {"$project": {"a": 1}}, {"$skip": 2}, {"$limit": 3}]));
		p.optimize();
		assert_eq!(
			p.serialize(),
			json!([{"$sort": {"sortKey": {"a": 1}, "limit": 5}}, {"$project": {"a": 1}}, {"$skip": 2}])
		);
	}

	#[test]
	fn dependencies_stop_at_exhaustive_stages() {
		let p = pipeline(json!([{"$match": {"a": 1}}, {"$project": {"b": 1, "_id": 0}}, {"$match": {"z": 1}}]));
		let deps = p.get_dependencies();
		assert!(!deps.needs_whole_document);
		assert_eq!(deps.projection(), Some(vec!["a".to_owned(), "b".to_owned()]));

		let p = pipeline(json!([{"$match": {"a": 1}}]));
		assert!(p.get_dependencies().needs_whole_document);

		let p = pipeline(json!([{"$count": "n"}]));
		assert!(p.get_dependencies().has_no_requirements());
	}

	#[test]
	fn geo_near_must_come_first() {
		let err = Pipeline::parse(
			PipelineContext::default(),
			&json!([{"$limit": 1}, {"$geoNear": {"near": [0, 0], "distanceField": "d"}}]),
		)
		.unwrap_err();
		assert_eq!(code_of(&err), Some(40603));
	}

	#[test]
	fn pop_front_with_name_only_matches_the_front() {
		let mut p = pipeline(json!([{"$skip": 1}, {"$limit": 1}]));
		assert!(p.pop_front_with_name("$limit").is_none());
		assert!(p.pop_front_with_name("$skip").is_some());
		assert_eq!(p.len(), 1);
	}
}
