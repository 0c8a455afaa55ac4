use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::validator::parser::tracing::CustomEnvFilter;

#[derive(Default, Debug, Clone)]
pub struct Builder {
	log_level: Option<String>,
	filter: Option<CustomEnvFilter>,
}

pub fn builder() -> Builder {
	Builder::default()
}

impl Builder {
	/// Set the log level on the builder
	pub fn with_log_level(mut self, log_level: &str) -> Self {
		self.log_level = Some(log_level.to_owned());
		self
	}

	/// Set the filter on the builder, which takes precedence over the log level
	pub fn with_filter(mut self, filter: CustomEnvFilter) -> Self {
		self.filter = Some(filter);
		self
	}

	fn env_filter(&self) -> EnvFilter {
		if let Some(filter) = &self.filter {
			return filter.env();
		}
		let level = self.log_level.as_deref().unwrap_or("info");
		filter_from_value(level).unwrap_or_else(|_| EnvFilter::new("warn"))
	}

	/// Build a tracing dispatcher which writes compact logs to stderr
	pub fn build(self) -> Box<dyn Subscriber + Send + Sync + 'static> {
		let filter = self.env_filter();
		let registry = tracing_subscriber::registry().with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_target(true)
				.with_span_events(FmtSpan::NONE)
				.with_writer(std::io::stderr)
				.with_filter(filter),
		);
		Box::new(registry)
	}

	/// Install the dispatcher as the global default
	pub fn init(self) {
		self.build().init()
	}
}

/// Parses a log level, or a full filter directive, into an environment filter
pub fn filter_from_value(v: &str) -> Result<EnvFilter, ParseError> {
	match v {
		// Don't show any logs at all
		"none" => EnvFilter::builder().parse("off"),
		// Otherwise, let's show all logs from every crate
		"full" => EnvFilter::builder().parse("trace"),
		// Otherwise, let's only show errors
		"error" => EnvFilter::builder().parse("error"),
		// Specify the log level for each code area
		"warn" | "info" | "debug" | "trace" => EnvFilter::builder().parse(format!("error,sbe={v},sbe_core={v}")),
		// Let's try to parse the custom log level
		_ => EnvFilter::builder().parse(v),
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use tracing::subscriber::with_default;

	use super::*;

	#[rstest]
	#[case::none("none", "off")]
	#[case::full("full", "trace")]
	#[case::level("debug", "sbe=debug")]
	#[case::custom("sbe::pipeline=trace", "sbe::pipeline=trace")]
	fn log_values_become_filters(#[case] value: &str, #[case] directive: &str) {
		let filter = filter_from_value(value).unwrap().to_string();
		assert!(filter.contains(directive), "{filter}");
	}

	#[test]
	fn invalid_filters_are_rejected() {
		assert!(filter_from_value("sbe=notalevel").is_err());
	}

	#[test]
	fn builder_installs_a_scoped_dispatcher() {
		let dispatcher = builder().with_log_level("trace").build();
		with_default(dispatcher, || {
			trace!(target: "sbe::pipeline", "visible while the dispatcher is scoped");
			assert!(tracing::enabled!(target: "sbe::pipeline", tracing::Level::TRACE));
		});
	}
}
