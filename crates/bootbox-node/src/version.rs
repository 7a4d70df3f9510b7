/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit SHA (short)
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// Whether the working tree had uncommitted changes
pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

/// Protocol version string for libp2p identify. Nodes with a different
/// string are not admitted to the group.
pub const PROTOCOL_VERSION: &str = concat!("/bootbox/", env!("CARGO_PKG_VERSION"));

/// `--version` output.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_SHA"),
    " (dirty: ",
    env!("VERGEN_GIT_DIRTY"),
    ")\nbuilt:  ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    "\nrustc:  ",
    env!("VERGEN_RUSTC_SEMVER"),
    "\ntarget: ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

/// Returns version string with git metadata.
/// Format: <version> (<git_sha>) [dirty]
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_tracks_crate_version() {
        assert_eq!(PROTOCOL_VERSION, format!("/bootbox/{VERSION}"));
        assert!(full_version().starts_with(VERSION));
        assert!(LONG_VERSION.starts_with(VERSION));
    }
}
