use std::sync::Arc;

use anyhow::{Result, bail};
use serde_json::Value as Json;

use super::collection::Collection;
use super::collscan::{CollectionScan, ScanParams};
use super::distinct::{DistinctScan, is_multikey};
use super::exec::BoxedExecutor;
use super::matcher::MatchExpression;
use super::parse_sort;
use crate::err::Error;
use crate::expr::Dependencies;
use crate::pipeline::projection::Projection;
use crate::val::SortSpec;
use crate::val::handles::SortPart;

/// A find request over a single collection
#[derive(Clone, Debug, Default)]
pub struct FindCommand {
	pub filter: Option<Json>,
	pub projection: Option<Json>,
	pub sort: Option<Json>,
	pub skip: Option<u64>,
	pub limit: Option<u64>,
}

impl FindCommand {
	fn parse_filter(&self) -> Result<Option<MatchExpression>> {
		match &self.filter {
			Some(filter) => {
				let expr = MatchExpression::parse(filter)?;
				Ok((!expr.is_trivially_true()).then_some(expr))
			}
			None => Ok(None),
		}
	}

	fn parse_projection(&self) -> Result<Option<Projection>> {
		self.projection.as_ref().map(Projection::parse).transpose()
	}

	fn parse_sort(&self) -> Result<Option<Vec<SortPart>>> {
		self.sort.as_ref().map(parse_sort).transpose()
	}
}

/// Builds the executor answering a find request
pub fn get_executor_find(coll: Arc<Collection>, cmd: &FindCommand) -> Result<BoxedExecutor> {
	let params = ScanParams {
		filter: cmd.parse_filter()?,
		sort: cmd.parse_sort()?.map(|parts| SortSpec::new(parts, None)),
		skip: cmd.skip.filter(|s| *s > 0),
		limit: cmd.limit,
		projection: cmd.parse_projection()?,
		shard_filter: coll.shard_filter().filter(|f| f.is_collection_sharded()).cloned(),
	};
	Ok(Box::new(CollectionScan::new(coll, params)))
}

fn no_plan(reason: impl Into<String>) -> anyhow::Error {
	anyhow::Error::new(Error::NoQueryExecutionPlans(reason.into()))
}

/// Builds an executor returning one document per distinct value of `field`. Fails with
/// `NoQueryExecutionPlans` when no index can provide the values without deduplication.
pub fn get_executor_distinct(coll: Arc<Collection>, cmd: &FindCommand, field: &str) -> Result<BoxedExecutor> {
	let Some(index) = coll.indexes().iter().find(|i| i.field == field && !i.kind.is_geo()).cloned() else {
		bail!(no_plan(format!("no index on '{field}' can provide a distinct scan")));
	};
	if is_multikey(&coll, field) {
		bail!(no_plan(format!("the index on '{field}' is multikey")));
	}
	let filter = cmd.parse_filter()?;
	if let Some(filter) = &filter {
		let mut deps = Dependencies::new();
		filter.add_dependencies(&mut deps);
		let covered = deps.fields.iter().all(|f| f == field || f.starts_with(&format!("{field}.")));
		if !covered {
			bail!(no_plan("the filter needs fields which the index does not hold"));
		}
	}
	let forward = match cmd.parse_sort()?.as_deref() {
		None => true,
		Some([part]) if part.path == field => part.ascending,
		Some(_) => bail!(no_plan("the sort cannot be provided by the index")),
	};
	if coll.is_sharded() {
		bail!(no_plan("a distinct scan cannot filter orphaned documents"));
	}
	let projection = cmd.parse_projection()?;
	Ok(Box::new(DistinctScan::new(coll, index, forward, filter, projection)))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::query::collection::{IndexKind, IndexSpec};

	fn collection() -> Arc<Collection> {
		let docs = json!([{"_id": 1, "a": 1, "b": 1}, {"_id": 2, "a": 1, "b": 2}]);
		Arc::new(Collection::from_json("test.c", &docs).unwrap().with_index(IndexSpec::new("a", IndexKind::Ascending)))
	}

	#[test]
	fn distinct_requires_an_index() {
		let cmd = FindCommand::default();
		assert!(get_executor_distinct(collection(), &cmd, "a").is_ok());
		let err = get_executor_distinct(collection(), &cmd, "b").unwrap_err();
		assert_eq!(code_of(&err), Some(291));
	}

	#[test]
	fn distinct_rejects_uncovered_filters_and_sorts() {
		let cmd = FindCommand {
			filter: Some(json!({"b": 1})),
			..Default::default()
		};
		assert_eq!(code_of(&get_executor_distinct(collection(), &cmd, "a").unwrap_err()), Some(291));
		let cmd = FindCommand {
			sort: Some(json!({"a": 1, "b": 1})),
			..Default::default()
		};
		assert_eq!(code_of(&get_executor_distinct(collection(), &cmd, "a").unwrap_err()), Some(291));
	}

	#[test]
	fn find_applies_every_part() {
		let cmd = FindCommand {
			filter: Some(json!({"a": 1})),
			projection: Some(json!({"b": 1, "_id": 0})),
			sort: Some(json!({"b": -1})),
			skip: None,
			limit: Some(1),
		};
		let mut exec = get_executor_find(collection(), &cmd).unwrap();
		let doc = exec.get_next().unwrap().unwrap();
		assert_eq!(doc.value.get_field("b").to_string(), "2");
		assert!(exec.get_next().unwrap().is_none());
	}
}
