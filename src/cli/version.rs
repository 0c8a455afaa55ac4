use anyhow::Result;

use crate::cnf::{PKG_NAME, PKG_VERSION};

macro_rules! get_cfg {
	($i:ident : $($s:expr),+) => (
		let $i = || { $( if cfg!($i=$s) { return $s; } );+ "unknown"};
	)
}

pub fn init() -> Result<()> {
	get_cfg!(target_os: "windows", "macos", "ios", "linux", "android", "freebsd", "openbsd", "netbsd");
	get_cfg!(target_arch: "x86", "x86_64", "mips", "powerpc", "powerpc64", "arm", "aarch64");
	println!("{PKG_NAME} {PKG_VERSION} for {} on {}", target_os(), target_arch());
	Ok(())
}
