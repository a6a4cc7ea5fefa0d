//! Build and version information stamped in by `build.rs`.

/// Crate version from the package manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit the binary was built from
pub const GIT_HASH: &str = env!("BUILD_GIT_HASH");

/// Human readable build time
pub const BUILD_DATETIME: &str = env!("BUILD_DATETIME");

/// Full version string for `--version` output
pub fn long_version() -> String {
    format!("{VERSION} (commit {GIT_HASH}, built {BUILD_DATETIME})")
}
