use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use sbe_core::pipeline::builder::{attach_inner_query_executor, build_inner_query_executor};
use sbe_core::pipeline::query::Collection;
use sbe_core::val::json::to_json;
use serde_json::Value as Json;

use crate::cli::abstraction::{CollectionArguments, PipelineArguments};
use crate::cnf::{LOG, PRETTY_OUTPUT};

#[derive(Args, Debug)]
pub struct RunCommandArguments {
	#[command(flatten)]
	coll: CollectionArguments,
	#[command(flatten)]
	pipeline: PipelineArguments,
}

#[derive(Args, Debug)]
pub struct ExplainCommandArguments {
	#[command(flatten)]
	coll: CollectionArguments,
	#[command(flatten)]
	pipeline: PipelineArguments,
}

fn print(out: &mut impl Write, value: &Json) -> Result<()> {
	if *PRETTY_OUTPUT {
		serde_json::to_writer_pretty(&mut *out, value)?;
	} else {
		serde_json::to_writer(&mut *out, value)?;
	}
	writeln!(out)?;
	Ok(())
}

pub fn init(
	RunCommandArguments {
		coll,
		pipeline,
	}: RunCommandArguments,
) -> Result<()> {
	let collection = coll.load()?;
	let mut pipeline = pipeline.parse(&coll.namespace)?;
	let (callback, exec) = build_inner_query_executor(collection.as_ref(), &mut pipeline)?;
	let collection = collection.unwrap_or_else(|| Arc::new(Collection::new(coll.namespace.as_str())));
	attach_inner_query_executor(&collection, callback, exec, &mut pipeline)?;
	let stdout = io::stdout();
	let mut out = stdout.lock();
	let mut count = 0u64;
	while let Some(doc) = pipeline.next()? {
		print(&mut out, &to_json(&doc.value)?)?;
		count += 1;
	}
	info!(target: LOG, count, "The pipeline finished");
	Ok(())
}

pub fn explain(
	ExplainCommandArguments {
		coll,
		pipeline,
	}: ExplainCommandArguments,
) -> Result<()> {
	let collection = coll.load()?;
	let mut pipeline = pipeline.parse(&coll.namespace)?;
	let (callback, exec) = build_inner_query_executor(collection.as_ref(), &mut pipeline)?;
	let collection = collection.unwrap_or_else(|| Arc::new(Collection::new(coll.namespace.as_str())));
	attach_inner_query_executor(&collection, callback, exec, &mut pipeline)?;
	print(&mut io::stdout().lock(), &serde_json::json!({"stages": pipeline.serialize()}))
}
