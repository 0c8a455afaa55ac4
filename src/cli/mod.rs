mod abstraction;
mod eval;
mod run;
pub(crate) mod validator;
mod version;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sbe_core::err::code_of;

use crate::cli::eval::EvalCommandArguments;
use crate::cli::run::{ExplainCommandArguments, RunCommandArguments};
use crate::cli::validator::parser::tracing::{CustomEnvFilter, CustomEnvFilterParser};
use crate::cnf::{LOG, PKG_VERSION};
use crate::telemetry;

const INFO: &str = "
Runs aggregation pipelines over a collection loaded from a JSON file.

The first stages of each pipeline are answered by a query executor where they can be,
and the rest run in the pipeline itself.
";

#[derive(Parser, Debug)]
#[command(name = "SBE command-line interface", bin_name = "sbe")]
#[command(version = PKG_VERSION, about = INFO)]
#[command(arg_required_else_help = true)]
struct Cli {
	#[arg(help = "The logging level for the command-line tool")]
	#[arg(env = "SBE_LOG", short = 'l', long = "log")]
	#[arg(default_value = "warn")]
	#[arg(value_parser = CustomEnvFilterParser::new())]
	#[arg(global = true)]
	log: CustomEnvFilter,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	#[command(about = "Run a pipeline over a collection and print the results")]
	Run(RunCommandArguments),
	#[command(about = "Show the plan chosen for a pipeline without running it")]
	Explain(ExplainCommandArguments),
	#[command(about = "Evaluate a single expression against a document")]
	Eval(EvalCommandArguments),
	#[command(about = "Output the command-line tool version information")]
	Version,
}

pub fn init() -> ExitCode {
	// Parse the CLI arguments
	let args = Cli::parse();
	// Initialize logging
	telemetry::builder().with_log_level("warn").with_filter(args.log).init();
	// Run the chosen command
	let output = match args.command {
		Commands::Run(args) => run::init(args),
		Commands::Explain(args) => run::explain(args),
		Commands::Eval(args) => eval::init(args),
		Commands::Version => version::init(),
	};
	match output {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			match code_of(&e) {
				Some(code) => error!(target: LOG, code, "{e:#}"),
				None => error!(target: LOG, "{e:#}"),
			}
			eprintln!("Error: {e:#}");
			ExitCode::FAILURE
		}
	}
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn verify_cli() {
		Cli::command().debug_assert();
	}

	#[test]
	fn run_arguments() {
		let cli = Cli::try_parse_from(["sbe", "run", "--index", "a:1", "--seed", "7", r#"[{"$match": {"a": 1}}]"#]).unwrap();
		let Commands::Run(_) = cli.command else {
			panic!("expected the run command");
		};
	}

	#[test]
	fn invalid_pipelines_are_rejected_by_the_parser() {
		assert!(Cli::try_parse_from(["sbe", "explain", "[{"]).is_err());
		assert!(Cli::try_parse_from(["sbe", "run", "--index", "a:hashed", "[]"]).is_err());
	}
}
