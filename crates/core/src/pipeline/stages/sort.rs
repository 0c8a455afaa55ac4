use anyhow::{Result, bail};
use serde_json::{Value as Json, json};

use super::{DepsState, DocumentSource, Upstream};
use crate::cnf::MAX_BUFFERED_DOCUMENTS;
use crate::err::Error;
use crate::expr::Dependencies;
use crate::pipeline::document::Document;
use crate::pipeline::query::{parse_sort, serialize_sort};
use crate::val::SortSpec;
use crate::val::handles::SortPart;

/// `$sort`, possibly with a `$limit` folded into it
#[derive(Debug)]
pub struct SortStage {
	parts: Vec<SortPart>,
	spec: SortSpec,
	limit: Option<u64>,
	sorted: Option<std::vec::IntoIter<Document>>,
}

impl SortStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		let parts = parse_sort(spec)?;
		Ok(Self {
			spec: SortSpec::new(parts.clone(), None),
			parts,
			limit: None,
			sorted: None,
		})
	}

	pub fn parts(&self) -> &[SortPart] {
		&self.parts
	}

	/// The sort pattern as pushed down into a find
	pub fn pattern(&self) -> Json {
		serialize_sort(&self.parts)
	}

	pub fn limit(&self) -> Option<u64> {
		self.limit
	}

	pub fn has_limit(&self) -> bool {
		self.limit.is_some()
	}

	/// Folds a following `$limit` into the sort
	pub fn absorb_limit(&mut self, limit: u64) {
		self.limit = Some(self.limit.map_or(limit, |l| l.min(limit)));
	}

	fn sort_input(&self, input: &mut Upstream<'_>) -> Result<Vec<Document>> {
		let mut keyed = Vec::new();
		while let Some(doc) = input.next()? {
			uassert!(
				keyed.len() < *MAX_BUFFERED_DOCUMENTS,
				292,
				"Sort exceeded the buffered document limit of {}",
				*MAX_BUFFERED_DOCUMENTS
			);
			keyed.push((self.spec.generate_sort_key(&doc.value), doc));
		}
		keyed.sort_by(|(l, _), (r, _)| self.spec.compare_keys(l, r));
		let mut docs: Vec<Document> = keyed.into_iter().map(|(_, doc)| doc).collect();
		if let Some(limit) = self.limit {
			docs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
		}
		Ok(docs)
	}
}

impl DocumentSource for SortStage {
	fn name(&self) -> &'static str {
		"$sort"
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		for part in &self.parts {
			deps.add_field(part.path.as_str());
		}
		DepsState::SeeNext
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		if self.sorted.is_none() {
			trace!(target: "sbe::pipeline", pattern = %self.pattern(), "sorting the input of $sort");
			self.sorted = Some(self.sort_input(input)?.into_iter());
		}
		Ok(self.sorted.as_mut().and_then(Iterator::next))
	}

	fn serialize(&self) -> Json {
		match self.limit {
			Some(limit) => json!({"$sort": {"sortKey": self.pattern(), "limit": limit}}),
			None => json!({"$sort": self.pattern()}),
		}
	}
}

fn parse_count(stage: &str, spec: &Json, codes: (i32, i32)) -> Result<u64> {
	let Some(n) = spec.as_f64() else {
		bail!(Error::fail(codes.0, format!("invalid argument to {stage} stage: Expected a number")));
	};
	if n < 0.0 || n.fract() != 0.0 {
		bail!(Error::fail(codes.1, format!("invalid argument to {stage} stage: Expected a non-negative integer")));
	}
	Ok(n as u64)
}

/// `$skip`
#[derive(Debug)]
pub struct SkipStage {
	skip: u64,
	skipped: u64,
}

impl SkipStage {
	pub fn new(skip: u64) -> Self {
		Self {
			skip,
			skipped: 0,
		}
	}

	pub fn parse(spec: &Json) -> Result<Self> {
		Ok(Self::new(parse_count("$skip", spec, (15972, 15956))?))
	}

	pub fn skip(&self) -> u64 {
		self.skip
	}

	pub fn set_skip(&mut self, skip: u64) {
		self.skip = skip;
	}
}

impl DocumentSource for SkipStage {
	fn name(&self) -> &'static str {
		"$skip"
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		while self.skipped < self.skip {
			if input.next()?.is_none() {
				return Ok(None);
			}
			self.skipped += 1;
		}
		input.next()
	}

	fn serialize(&self) -> Json {
		json!({"$skip": self.skip})
	}
}

/// `$limit`
#[derive(Debug)]
pub struct LimitStage {
	limit: u64,
	returned: u64,
}

impl LimitStage {
	pub fn new(limit: u64) -> Self {
		Self {
			limit,
			returned: 0,
		}
	}

	pub fn parse(spec: &Json) -> Result<Self> {
		let limit = parse_count("$limit", spec, (15957, 15958))?;
		if limit == 0 {
			bail!(Error::fail(15958, "the limit must be positive"));
		}
		Ok(Self::new(limit))
	}

	pub fn limit(&self) -> u64 {
		self.limit
	}

	pub fn set_limit(&mut self, limit: u64) {
		self.limit = limit;
	}
}

impl DocumentSource for LimitStage {
	fn name(&self) -> &'static str {
		"$limit"
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		if self.returned >= self.limit {
			return Ok(None);
		}
		let next = input.next()?;
		if next.is_some() {
			self.returned += 1;
		}
		Ok(next)
	}

	fn serialize(&self) -> Json {
		json!({"$limit": self.limit})
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::stages::{Stage, run_stages};

	fn docs() -> Json {
		json!([{"_id": 1, "a": 3}, {"_id": 2, "a": 1}, {"_id": 3, "a": 2}])
	}

	#[test]
	fn sort_with_absorbed_limit() {
		let mut sort = SortStage::parse(&json!({"a": 1})).unwrap();
		sort.absorb_limit(5);
		sort.absorb_limit(2);
		assert_eq!(sort.serialize(), json!({"$sort": {"sortKey": {"a": 1}, "limit": 2}}));
		let out = run_stages(vec![Stage::Sort(sort)], docs());
		assert_eq!(out, vec![json!({"_id": 2, "a": 1}), json!({"_id": 3, "a": 2})]);
	}

	#[test]
	fn skip_then_limit() {
		let stages = vec![Stage::Skip(SkipStage::new(1)), Stage::Limit(LimitStage::new(1))];
		assert_eq!(run_stages(stages, docs()), vec![json!({"_id": 2, "a": 1})]);
	}

	#[rstest]
	#[case::negative_skip(json!({"$skip": -1}), 15956)]
	#[case::fractional_limit(json!({"$limit": 1.5}), 15958)]
	#[case::zero_limit(json!({"$limit": 0}), 15958)]
	#[case::string_limit(json!({"$limit": "1"}), 15957)]
	fn invalid_counts(#[case] spec: Json, #[case] code: i32) {
		let err = Stage::parse(&spec, &Default::default()).unwrap_err();
		assert_eq!(code_of(&err), Some(code));
	}
}
