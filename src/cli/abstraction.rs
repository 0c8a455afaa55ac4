use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use clap::Args;
use sbe_core::pipeline::query::{Collection, IndexSpec, TimeseriesOptions};
use sbe_core::pipeline::{Pipeline, PipelineContext};
use serde_json::Value as Json;

use crate::cli::validator::{file_exists, index_valid, json_valid, timeseries_valid};
use crate::cnf::{DEFAULT_NAMESPACE, LOG, MAX_INPUT_SIZE};

#[derive(Args, Debug)]
pub(crate) struct CollectionArguments {
	#[arg(help = "Path to a JSON file holding an array of documents. Without one the collection does not exist")]
	#[arg(short = 'c', long = "collection", value_parser = file_exists)]
	pub(crate) collection: Option<PathBuf>,
	#[arg(help = "The namespace of the collection")]
	#[arg(long = "ns", default_value = DEFAULT_NAMESPACE)]
	pub(crate) namespace: String,
	#[arg(help = "An index on the collection, given as field:kind where kind is 1, -1, 2d or 2dsphere")]
	#[arg(long = "index", value_parser = index_valid)]
	pub(crate) indexes: Vec<IndexSpec>,
	#[arg(help = "Treat the documents as time-series buckets, given as timeField or timeField:metaField")]
	#[arg(long = "timeseries", value_parser = timeseries_valid)]
	pub(crate) timeseries: Option<TimeseriesOptions>,
	#[arg(help = "Pretend the storage cannot return documents in random order")]
	#[arg(long = "no-random-cursor")]
	pub(crate) no_random_cursor: bool,
}

impl CollectionArguments {
	/// Loads the collection file, if one was given
	pub(crate) fn load(&self) -> Result<Option<Arc<Collection>>> {
		let Some(path) = &self.collection else {
			debug!(target: LOG, ns = %self.namespace, "no collection file was given");
			return Ok(None);
		};
		let size = fs::metadata(path).with_context(|| format!("Unable to read {}", path.display()))?.len();
		ensure!(size <= *MAX_INPUT_SIZE, "The collection file is {size} bytes, which is larger than the {} byte limit", *MAX_INPUT_SIZE);
		let text = fs::read_to_string(path).with_context(|| format!("Unable to read {}", path.display()))?;
		let docs: Json = serde_json::from_str(&text).with_context(|| format!("{} does not hold valid JSON", path.display()))?;
		ensure!(docs.is_array(), "The collection file must hold an array of documents");
		let mut coll = Collection::from_json(self.namespace.as_str(), &docs)?;
		for index in &self.indexes {
			coll = coll.with_index(index.clone());
		}
		if let Some(options) = &self.timeseries {
			coll = coll.with_timeseries(options.clone());
		}
		if self.no_random_cursor {
			coll = coll.without_random_cursor();
		}
		debug!(target: LOG, collection = ?coll, "loaded the collection");
		Ok(Some(Arc::new(coll)))
	}
}

#[derive(Args, Debug)]
pub(crate) struct PipelineArguments {
	#[arg(help = "The pipeline, as a JSON array of stages")]
	#[arg(index = 1, value_parser = json_valid)]
	pub(crate) pipeline: Json,
	#[arg(help = "The seed of the pipeline's random choices")]
	#[arg(long = "seed", env = "SBE_SEED")]
	pub(crate) seed: Option<u64>,
}

impl PipelineArguments {
	pub(crate) fn parse(&self, ns: &str) -> Result<Pipeline> {
		let ctx = PipelineContext {
			ns: ns.to_owned(),
			seed: self.seed,
		};
		Pipeline::parse(ctx, &self.pipeline)
	}
}
