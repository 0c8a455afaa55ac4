/// A macro that allows lazily parsing a value from the environment variable,
/// with a fallback default value if the variable is not set or parsing fails.
///
/// # Parameters
///
/// - `$key`: An expression representing the name of the environment variable.
/// - `$t`: The type of the value to be parsed.
/// - `$default`: The default value to fall back to if the environment variable is not set or
///   parsing fails.
///
/// # Return Value
///
/// A lazy static variable of type `std::sync::LazyLock`, which holds the parsed
/// value from the environment variable or the default value.
#[macro_export]
macro_rules! lazy_env_parse {
	// With no default specified
	($key:expr_2021, $t:ty) => {
		std::sync::LazyLock::new(|| {
			std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()).unwrap_or_default()
		})
	};
	// With a closure for the default value
	($key:expr_2021, $t:ty, || $default:expr_2021) => {
		std::sync::LazyLock::new(|| {
			std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()).unwrap_or_else(|| $default)
		})
	};
	// With a static expression for the default value
	($key:expr_2021, $t:ty, $default:expr_2021) => {
		std::sync::LazyLock::new(|| {
			std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()).unwrap_or($default)
		})
	};
}

/// Throws an unreachable error with location details
macro_rules! fail {
	($($arg:tt)+) => {
		return Err(::anyhow::Error::new($crate::err::Error::unreachable(format_args!($($arg)*))))
	};
}

/// Returns a user-facing error with a stable code unless the condition holds
macro_rules! uassert {
	($cond:expr_2021, $code:expr_2021, $($arg:tt)+) => {
		if !$cond {
			return Err(::anyhow::Error::new($crate::err::Error::Fail {
				code: $code,
				message: format!($($arg)+),
			}));
		}
	};
}

/// Returns an internal assertion error with a stable code unless the condition holds
macro_rules! tassert {
	($cond:expr_2021, $code:expr_2021, $($arg:tt)+) => {
		if !$cond {
			return Err(::anyhow::Error::new($crate::err::Error::Assertion {
				code: $code,
				message: format!($($arg)+),
			}));
		}
	};
}

#[cfg(test)]
mod test {
	use crate::err::Error;

	fn fail_func() -> Result<(), anyhow::Error> {
		fail!("Reached unreachable code");
	}

	fn fail_func_args() -> Result<(), anyhow::Error> {
		fail!("Found {} but expected {}", "test", "other");
	}

	fn checked(value: i32) -> Result<i32, anyhow::Error> {
		uassert!(value >= 0, 4903706, "$ln's argument must be a positive number");
		tassert!(value != 7, 5611300, "Encountered unexpected system variable ID");
		Ok(value)
	}

	#[test]
	fn fail_literal() {
		let Ok(Error::Unreachable(msg)) = fail_func().unwrap_err().downcast() else {
			panic!()
		};
		assert!(msg.starts_with("crates/core/src/mac/mod.rs:"));
		assert!(msg.ends_with(": Reached unreachable code"));
	}

	#[test]
	fn fail_arguments() {
		let Ok(Error::Unreachable(msg)) = fail_func_args().unwrap_err().downcast() else {
			panic!()
		};
		assert!(msg.ends_with(": Found test but expected other"));
	}

	#[test]
	fn assertions_carry_codes() {
		assert_eq!(checked(3).unwrap(), 3);
		let err = checked(-1).unwrap_err();
		let err = err.downcast_ref::<Error>().unwrap();
		assert_eq!(err.code(), Some(4903706));
		assert!(matches!(err, Error::Fail { .. }));
		let err = checked(7).unwrap_err();
		let err = err.downcast_ref::<Error>().unwrap();
		assert_eq!(err.code(), Some(5611300));
		assert!(matches!(err, Error::Assertion { .. }));
	}
}
