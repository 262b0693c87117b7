//! Environment variables the shim reads
//!
//! Shared with the `bundle-run` launcher, which writes them.

/// Mapping table source: `SRC1:DST1;SRC2:DST2;...`
pub const PATH_MAPPINGS_ENV: &str = "BUNDLE_PATH_MAPPINGS";
/// Colon-separated directories searched for bare command names
pub const BIN_PATH_ENV: &str = "BUNDLE_BIN_PATH";
/// Working directory the launcher replaced
pub const ORIGINAL_WORKDIR_ENV: &str = "BUNDLE_ORIGINAL_WORKDIR";
/// Filter directive for the trace channel
pub const HOOK_LOG_ENV: &str = "BUNDLE_HOOK_LOG";
