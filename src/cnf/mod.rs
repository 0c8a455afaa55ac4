use std::sync::LazyLock;

use sbe_core::lazy_env_parse;

/// The publicly visible name of the binary
pub const PKG_NAME: &str = "sbe";

/// The version of the binary
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The log target of the command-line interface
pub const LOG: &str = "sbe::cli";

/// The default namespace for collections loaded from a file
pub const DEFAULT_NAMESPACE: &str = "test.collection";

/// The largest collection file which will be loaded, in bytes (defaults to 256 MiB)
pub static MAX_INPUT_SIZE: LazyLock<u64> = lazy_env_parse!("SBE_MAX_INPUT_SIZE", u64, 256 << 20);

/// Whether results are printed as pretty JSON rather than one document per line
pub static PRETTY_OUTPUT: LazyLock<bool> = lazy_env_parse!("SBE_PRETTY_OUTPUT", bool, false);
