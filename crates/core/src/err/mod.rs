use std::fmt;

use thiserror::Error;

/// An error originating from the execution engine.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
	/// The engine encountered unreachable logic
	#[error("The engine encountered unreachable logic: {0}")]
	Unreachable(String),

	/// A user-facing failure with a stable error code
	#[error("{message}")]
	Fail {
		code: i32,
		message: String,
	},

	/// An internal invariant did not hold
	#[error("{message}")]
	Assertion {
		code: i32,
		message: String,
	},

	/// A regular expression could not be compiled
	#[error("Invalid Regex: {0}")]
	InvalidRegex(String),

	/// A regular expression was given an unknown flag
	#[error("invalid flag in regex options: {0}")]
	InvalidRegexFlag(char),

	/// The named collection does not exist
	#[error("{0}")]
	NamespaceNotFound(String),

	/// No suitable index could be found
	#[error("{0}")]
	IndexNotFound(String),

	/// A value did not have the expected shape
	#[error("{0}")]
	BadValue(String),

	/// The query planner could not produce a plan
	#[error("{0}")]
	NoQueryExecutionPlans(String),

	/// A request could not be parsed
	#[error("{0}")]
	FailedToParse(String),

	/// A variable was referenced outside of the scope which defines it
	#[error("Use of undefined variable: {0}")]
	UndefinedVariable(String),

	/// A BSON buffer was truncated or otherwise malformed
	#[error("Invalid BSON: {0}")]
	InvalidBson(String),

	/// An unknown pipeline stage was requested
	#[error("Unrecognized pipeline stage name: '{0}'")]
	UnknownStage(String),

	/// An unknown expression operator was requested
	#[error("Unrecognized expression '{0}'")]
	UnknownExpression(String),
}

impl Error {
	#[track_caller]
	pub fn unreachable<T: fmt::Display>(message: T) -> Error {
		let location = std::panic::Location::caller();
		let message = format!("{}:{}: {}", location.file(), location.line(), message);
		Error::Unreachable(message)
	}

	/// Creates a user-facing failure
	pub fn fail(code: i32, message: impl Into<String>) -> Error {
		Error::Fail {
			code,
			message: message.into(),
		}
	}

	/// Creates an internal assertion failure
	pub fn assertion(code: i32, message: impl Into<String>) -> Error {
		Error::Assertion {
			code,
			message: message.into(),
		}
	}

	/// The stable numeric code of this error, if it has one
	pub fn code(&self) -> Option<i32> {
		match self {
			Error::Fail {
				code,
				..
			}
			| Error::Assertion {
				code,
				..
			} => Some(*code),
			Error::InvalidRegex(_) => Some(5073402),
			Error::InvalidRegexFlag(_) => Some(51108),
			Error::NamespaceNotFound(_) => Some(26),
			Error::IndexNotFound(_) => Some(27),
			Error::BadValue(_) => Some(2),
			Error::NoQueryExecutionPlans(_) => Some(291),
			Error::FailedToParse(_) => Some(9),
			Error::UndefinedVariable(_) => Some(17276),
			Error::InvalidBson(_) => Some(22),
			Error::UnknownStage(_) => Some(40324),
			Error::UnknownExpression(_) => Some(168),
			Error::Unreachable(_) => None,
		}
	}

	/// Whether this error signals a broken internal invariant rather than bad input
	pub fn is_internal(&self) -> bool {
		matches!(self, Error::Assertion { .. } | Error::Unreachable(_))
	}
}

/// Extracts the stable code of an error raised by this crate, if any
pub fn code_of(err: &anyhow::Error) -> Option<i32> {
	err.downcast_ref::<Error>().and_then(Error::code)
}
