use std::path::{Path, PathBuf};

use sbe_core::pipeline::query::{IndexKind, IndexSpec, TimeseriesOptions};
use serde_json::Value as Json;

pub(crate) mod parser;

pub(crate) fn path_exists(path: &str) -> Result<PathBuf, String> {
	let path = Path::new(path);
	if !*path.try_exists().as_ref().map_err(ToString::to_string)? {
		return Err(String::from("Ensure the path exists"));
	}
	Ok(path.to_owned())
}

pub(crate) fn file_exists(path: &str) -> Result<PathBuf, String> {
	let path = path_exists(path)?;
	if !path.is_file() {
		return Err(String::from("Ensure the path is a file"));
	}
	Ok(path)
}

/// Parses an inline JSON argument
pub(crate) fn json_valid(v: &str) -> Result<Json, String> {
	serde_json::from_str(v).map_err(|e| format!("Provide a valid JSON value: {e}"))
}

/// Parses an index given as `field:kind`, where kind is one of `1`, `-1`, `2d` or `2dsphere`
pub(crate) fn index_valid(v: &str) -> Result<IndexSpec, String> {
	let Some((field, kind)) = v.rsplit_once(':') else {
		return Err(String::from("Provide an index as field:kind"));
	};
	if field.is_empty() {
		return Err(String::from("Provide the field of the index"));
	}
	let kind = match kind {
		"1" => IndexKind::Ascending,
		"-1" => IndexKind::Descending,
		"2d" => IndexKind::Geo2d,
		"2dsphere" => IndexKind::Geo2dSphere,
		_ => return Err(String::from("The index kind must be one of 1, -1, 2d or 2dsphere")),
	};
	Ok(IndexSpec::new(field, kind))
}

/// Parses time-series options given as `timeField` or `timeField:metaField`
pub(crate) fn timeseries_valid(v: &str) -> Result<TimeseriesOptions, String> {
	let (time_field, meta_field) = match v.split_once(':') {
		Some((time, meta)) => (time, Some(meta.to_owned())),
		None => (v, None),
	};
	if time_field.is_empty() || meta_field.as_deref().is_some_and(str::is_empty) {
		return Err(String::from("Provide the time-series options as timeField or timeField:metaField"));
	}
	Ok(TimeseriesOptions {
		time_field: time_field.to_owned(),
		meta_field,
	})
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::ascending("a:1", "a", IndexKind::Ascending)]
	#[case::descending("a.b:-1", "a.b", IndexKind::Descending)]
	#[case::flat("loc:2d", "loc", IndexKind::Geo2d)]
	#[case::spherical("loc:2dsphere", "loc", IndexKind::Geo2dSphere)]
	fn indexes(#[case] input: &str, #[case] field: &str, #[case] kind: IndexKind) {
		assert_eq!(index_valid(input), Ok(IndexSpec::new(field, kind)));
	}

	#[rstest]
	#[case::no_kind("a")]
	#[case::no_field(":1")]
	#[case::unknown_kind("a:hashed")]
	fn invalid_indexes(#[case] input: &str) {
		assert!(index_valid(input).is_err());
	}

	#[test]
	fn timeseries_options() {
		assert_eq!(
			timeseries_valid("t:m"),
			Ok(TimeseriesOptions {
				time_field: "t".into(),
				meta_field: Some("m".into()),
			})
		);
		assert_eq!(timeseries_valid("t").map(|o| o.meta_field), Ok(None));
		assert!(timeseries_valid("t:").is_err());
	}

	#[test]
	fn paths_must_exist() {
		let dir = tempfile::tempdir().unwrap();
		assert!(path_exists(dir.path().to_str().unwrap()).is_ok());
		assert!(file_exists(dir.path().to_str().unwrap()).is_err());
		assert!(file_exists("/definitely/not/a/real/path.json").is_err());
	}
}
