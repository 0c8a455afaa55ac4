//! The in-memory query engine which a pipeline pushes work down into.

pub mod collection;
pub mod collscan;
pub mod distinct;
pub mod exec;
pub mod matcher;
pub mod near;
pub mod planner;
pub mod random;

use anyhow::{Result, bail, ensure};
use serde_json::Value as Json;

pub use self::collection::{Collection, IndexKind, IndexSpec, TimeseriesOptions};
pub use self::exec::{BoxedExecutor, PlanExecutor, WorkState};
pub use self::matcher::MatchExpression;
pub use self::planner::{FindCommand, get_executor_distinct, get_executor_find};
use crate::err::Error;
use crate::val::handles::SortPart;

/// Parses a sort pattern such as `{a: 1, b: -1}`
pub fn parse_sort(spec: &Json) -> Result<Vec<SortPart>> {
	let Json::Object(map) = spec else {
		bail!(Error::fail(15973, "the $sort key specification must be an object"));
	};
	ensure!(!map.is_empty(), Error::fail(15976, "$sort stage must have at least one sort key"));
	let mut parts = Vec::with_capacity(map.len());
	for (path, order) in map {
		let ascending = match order.as_f64() {
			Some(o) if o == 1.0 => true,
			Some(o) if o == -1.0 => false,
			_ => bail!(Error::fail(15975, "$sort key ordering must be 1 (for ascending) or -1 (for descending)")),
		};
		parts.push(SortPart {
			path: path.clone(),
			ascending,
		});
	}
	Ok(parts)
}

/// Renders a sort pattern back into its specification
pub fn serialize_sort(parts: &[SortPart]) -> Json {
	let map = parts.iter().map(|p| (p.path.clone(), Json::from(if p.ascending { 1 } else { -1 }))).collect();
	Json::Object(map)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::err::code_of;

	#[test]
	fn sort_patterns_round_trip() {
		let spec = json!({"a": 1, "b.c": -1});
		assert_eq!(serialize_sort(&parse_sort(&spec).unwrap()), spec);
	}

	#[rstest]
	#[case::not_an_object(json!([1]), 15973)]
	#[case::empty(json!({}), 15976)]
	#[case::bad_order(json!({"a": 2}), 15975)]
	fn invalid_sorts(#[case] spec: Json, #[case] code: i32) {
		assert_eq!(code_of(&parse_sort(&spec).unwrap_err()), Some(code));
	}
}
