use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use crate::env_vars::{BIN_PATH_ENV, HOOK_LOG_ENV, ORIGINAL_WORKDIR_ENV, PATH_MAPPINGS_ENV};

/// Shim configuration
///
/// Everything the shim knows about its environment is read here; the shim has
/// no configuration file.
#[derive(Clone, Debug, Default)]
pub struct ShimConfig {
    path_mappings: Option<OsString>,
    bin_dirs: Vec<PathBuf>,
    original_workdir: Option<PathBuf>,
    hook_log: Option<String>,
}

impl ShimConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var_os(name))
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        Self {
            path_mappings: non_empty(lookup(PATH_MAPPINGS_ENV)),
            bin_dirs: non_empty(lookup(BIN_PATH_ENV))
                .map(|v| {
                    env::split_paths(&v)
                        .filter(|p| !p.as_os_str().is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            original_workdir: non_empty(lookup(ORIGINAL_WORKDIR_ENV)).map(PathBuf::from),
            hook_log: non_empty(lookup(HOOK_LOG_ENV)).and_then(|v| v.into_string().ok()),
        }
    }

    /// Raw mapping variable value
    pub fn path_mappings(&self) -> Option<&OsString> {
        self.path_mappings.as_ref()
    }
    /// Bundle binary directories, in search order
    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }
    pub fn original_workdir(&self) -> Option<&Path> {
        self.original_workdir.as_deref()
    }
    pub fn hook_log(&self) -> Option<&str> {
        self.hook_log.as_deref()
    }
}

fn non_empty(v: Option<OsString>) -> Option<OsString> {
    v.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ShimConfig {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        ShimConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment() {
        let c = config(&[]);
        assert!(c.path_mappings().is_none());
        assert!(c.bin_dirs().is_empty());
        assert!(c.original_workdir().is_none());
        assert!(c.hook_log().is_none());
    }

    #[test]
    fn empty_values_count_as_unset() {
        let c = config(&[(PATH_MAPPINGS_ENV, ""), (ORIGINAL_WORKDIR_ENV, ""), (HOOK_LOG_ENV, "")]);
        assert!(c.path_mappings().is_none());
        assert!(c.original_workdir().is_none());
        assert!(c.hook_log().is_none());
    }

    #[test]
    fn bin_path_is_split_in_order() {
        let c = config(&[(BIN_PATH_ENV, "/b/usr/bin::/b/bin")]);
        assert_eq!(
            c.bin_dirs(),
            &[PathBuf::from("/b/usr/bin"), PathBuf::from("/b/bin")]
        );
    }

    #[test]
    fn values_are_kept_verbatim() {
        let c = config(&[
            (PATH_MAPPINGS_ENV, "/usr:/b/usr;"),
            (ORIGINAL_WORKDIR_ENV, "/home/user/work"),
            (HOOK_LOG_ENV, "debug"),
        ]);
        assert_eq!(c.path_mappings().unwrap(), "/usr:/b/usr;");
        assert_eq!(c.original_workdir(), Some(Path::new("/home/user/work")));
        assert_eq!(c.hook_log(), Some("debug"));
    }
}
