//! The document sources a pipeline is made of.
//!
//! Every stage pulls documents from the stages before it through an [`Upstream`] handle. The
//! set of stages is closed, so the builder can recognise and rewrite the stages it pushes down
//! into the query layer.

mod cursor;
mod group;
mod matching;
mod sample;
mod sort;
mod transform;
mod unpack;
mod unwind;

use anyhow::{Result, bail, ensure};
use serde_json::{Value as Json, json};

pub use self::cursor::{CursorStage, CursorType, GeoNearOutput, GeoNearStage};
pub use self::group::{Accumulator, GroupByDistinctScanStage, GroupFromFirstDocument, GroupStage};
pub use self::matching::MatchStage;
pub use self::sample::{SampleFromRandomCursorStage, SampleStage};
pub use self::sort::{LimitStage, SkipStage, SortStage};
pub use self::transform::{AddFieldsStage, ProjectStage};
pub use self::unpack::UnpackBucketStage;
pub use self::unwind::UnwindStage;
use super::PipelineContext;
use super::document::Document;
use crate::err::Error;
use crate::expr::Dependencies;

/// What a stage requires of its position in a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageConstraints {
	/// Set unless the stage generates its own documents
	pub requires_input_doc_source: bool,
	/// Whether a `$skip` or `$limit` may be moved ahead of this stage without changing results
	pub can_swap_with_skip_limit: bool,
}

impl Default for StageConstraints {
	fn default() -> Self {
		Self {
			requires_input_doc_source: true,
			can_swap_with_skip_limit: false,
		}
	}
}

/// How far the dependency analysis of a pipeline may look past a stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepsState {
	/// The stage passes other fields through, so later stages must also be asked
	SeeNext,
	/// The stage reads only the fields it added, and later stages only see its output
	ExhaustiveFields,
	/// The stage reads the whole document, and later stages only see its output
	ExhaustiveAll,
	/// The stage cannot tell what it reads
	NotSupported,
}

/// The behaviour shared by every pipeline stage
pub trait DocumentSource: std::fmt::Debug {
	fn name(&self) -> &'static str;

	fn constraints(&self) -> StageConstraints {
		StageConstraints::default()
	}

	/// Adds the fields which the stage reads from its input
	fn get_dependencies(&self, _deps: &mut Dependencies) -> DepsState {
		DepsState::SeeNext
	}

	/// Returns the next output document, or `None` once the stage is exhausted
	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>>;

	fn serialize(&self) -> Json;
}

/// The stages before the one being pulled
pub struct Upstream<'a> {
	stages: &'a mut [Stage],
}

impl<'a> Upstream<'a> {
	pub fn new(stages: &'a mut [Stage]) -> Self {
		Self {
			stages,
		}
	}

	/// Pulls the next document out of the last upstream stage
	pub fn next(&mut self) -> Result<Option<Document>> {
		match self.stages.split_last_mut() {
			Some((last, rest)) => last.get_next(&mut Upstream::new(rest)),
			None => Ok(None),
		}
	}
}

#[derive(Debug)]
pub enum Stage {
	Match(MatchStage),
	Project(ProjectStage),
	AddFields(AddFieldsStage),
	Sort(SortStage),
	Skip(SkipStage),
	Limit(LimitStage),
	Group(GroupStage),
	Unwind(UnwindStage),
	Sample(SampleStage),
	SampleFromRandomCursor(SampleFromRandomCursorStage),
	GeoNear(GeoNearStage),
	GroupByDistinctScan(GroupByDistinctScanStage),
	Cursor(CursorStage),
	UnpackBucket(UnpackBucketStage),
}

macro_rules! each_stage {
	($stage:expr, $s:ident => $body:expr) => {
		match $stage {
			Stage::Match($s) => $body,
			Stage::Project($s) => $body,
			Stage::AddFields($s) => $body,
			Stage::Sort($s) => $body,
			Stage::Skip($s) => $body,
			Stage::Limit($s) => $body,
			Stage::Group($s) => $body,
			Stage::Unwind($s) => $body,
			Stage::Sample($s) => $body,
			Stage::SampleFromRandomCursor($s) => $body,
			Stage::GeoNear($s) => $body,
			Stage::GroupByDistinctScan($s) => $body,
			Stage::Cursor($s) => $body,
			Stage::UnpackBucket($s) => $body,
		}
	};
}

impl Stage {
	/// Parses one stage specification. A `$count` stage expands into a `$group` and a
	/// `$project`, so more than one stage may be returned.
	pub fn parse(spec: &Json, ctx: &PipelineContext) -> Result<Vec<Stage>> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(40323, "A pipeline stage specification object must contain exactly one field."));
		};
		let mut fields = map.iter();
		let (Some((name, body)), None) = (fields.next(), fields.next()) else {
			bail!(Error::fail(40323, "A pipeline stage specification object must contain exactly one field."));
		};
		let stage = match name.as_str() {
			"$match" => Stage::Match(MatchStage::parse(body)?),
			"$project" => Stage::Project(ProjectStage::parse(body)?),
			"$addFields" | "$set" => Stage::AddFields(AddFieldsStage::parse(name, body)?),
			"$sort" => Stage::Sort(SortStage::parse(body)?),
			"$skip" => Stage::Skip(SkipStage::parse(body)?),
			"$limit" => Stage::Limit(LimitStage::parse(body)?),
			"$group" => Stage::Group(GroupStage::parse(body)?),
			"$unwind" => Stage::Unwind(UnwindStage::parse(body)?),
			"$sample" => Stage::Sample(SampleStage::parse(body, ctx.seed)?),
			"$geoNear" => Stage::GeoNear(GeoNearStage::parse(body)?),
			"$_internalUnpackBucket" => Stage::UnpackBucket(UnpackBucketStage::parse(body)?),
			"$count" => return parse_count(body),
			other => bail!(Error::UnknownStage(other.to_owned())),
		};
		Ok(vec![stage])
	}

	pub fn name(&self) -> &'static str {
		each_stage!(self, s => s.name())
	}

	pub fn constraints(&self) -> StageConstraints {
		each_stage!(self, s => s.constraints())
	}

	pub fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		each_stage!(self, s => s.get_dependencies(deps))
	}

	pub fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		each_stage!(self, s => s.get_next(input))
	}

	pub fn serialize(&self) -> Json {
		each_stage!(self, s => s.serialize())
	}
}

/// `{$count: "n"}` is `{$group: {_id: null, n: {$sum: 1}}}` followed by `{$project: {_id: 0}}`
fn parse_count(body: &Json) -> Result<Vec<Stage>> {
	let Some(field) = body.as_str() else {
		bail!(Error::fail(40156, "the count field must be a non-empty string"));
	};
	ensure!(!field.is_empty(), Error::fail(40157, "the count field must be a non-empty string"));
	ensure!(!field.starts_with('$'), Error::fail(40158, "the count field cannot be a $-prefixed path"));
	ensure!(!field.contains('.'), Error::fail(40160, "the count field cannot contain '.'"));
	let group = GroupStage::parse(&json!({"_id": null, field: {"$sum": 1}}))?;
	let project = ProjectStage::parse(&json!({"_id": 0}))?;
	Ok(vec![Stage::Group(group), Stage::Project(project)])
}

/// Runs stages over a scan of `docs` and returns their output
#[cfg(test)]
pub(crate) fn run_stages(stages: Vec<Stage>, docs: Json) -> Vec<Json> {
	use std::sync::Arc;

	use crate::pipeline::query::Collection;
	use crate::pipeline::query::collscan::{CollectionScan, ScanParams};
	use crate::val::json::to_json;

	let coll = Arc::new(Collection::from_json("test.c", &docs).unwrap());
	let exec = Box::new(CollectionScan::new(coll, ScanParams::default()));
	let mut all = vec![Stage::Cursor(CursorStage::new(exec, CursorType::Regular, None).unwrap())];
	all.extend(stages);
	let mut out = Vec::new();
	while let Some(doc) = Upstream::new(&mut all).next().unwrap() {
		out.push(to_json(&doc.value).unwrap());
	}
	out
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::err::code_of;

	fn parse(spec: Json) -> Result<Vec<Stage>> {
		Stage::parse(&spec, &PipelineContext::default())
	}

	#[rstest]
	#[case::match_stage(json!({"$match": {"a": 1}}), "$match")]
	#[case::set_is_add_fields(json!({"$set": {"b": 1}}), "$addFields")]
	#[case::unwind_shorthand(json!({"$unwind": "$a"}), "$unwind")]
	#[case::sample(json!({"$sample": {"size": 3}}), "$sample")]
	fn stage_names(#[case] spec: Json, #[case] name: &str) {
		let stages = parse(spec).unwrap();
		assert_eq!(stages.len(), 1);
		assert_eq!(stages[0].name(), name);
	}

	#[test]
	fn count_expands_to_group_and_project() {
		let stages = parse(json!({"$count": "n"})).unwrap();
		let names: Vec<_> = stages.iter().map(Stage::name).collect();
		assert_eq!(names, vec!["$group", "$project"]);
	}

	#[rstest]
	#[case::unknown(json!({"$frobnicate": {}}), 40324)]
	#[case::two_fields(json!({"$match": {}, "$limit": 1}), 40323)]
	#[case::bad_count(json!({"$count": "a.b"}), 40160)]
	fn invalid_stages(#[case] spec: Json, #[case] code: i32) {
		assert_eq!(code_of(&parse(spec).unwrap_err()), Some(code));
	}
}
