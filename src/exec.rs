//! Executable path adjustment for process-spawn hooks

use crate::config::ShimConfig;
use crate::probe::Probe;
use crate::redirect::{self, Redirector};
use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Resolve a command name against the bundle binary directories
///
/// Names containing a `/` are used as is. A bare name is looked up in each
/// directory in order; the first executable hit wins. Without a hit the name
/// is returned unchanged so the caller's own lookup still applies.
pub fn resolve_bin_path(filename: &CStr, bin_dirs: &[PathBuf], probe: &impl Probe) -> CString {
    let name = filename.to_bytes();
    if name.is_empty() || name.contains(&b'/') {
        return filename.to_owned();
    }
    for dir in bin_dirs {
        let path = dir.join(OsStr::from_bytes(name));
        let Ok(candidate) = CString::new(path.into_os_string().into_vec()) else {
            continue;
        };
        if probe.is_executable(&candidate) {
            return candidate;
        }
    }
    filename.to_owned()
}

/// Resolve `filename`, then redirect the result
///
/// Never fails: falls back to the resolved, non-redirected path.
pub fn adjust_exec_path_with<P: Probe>(
    redirector: &Redirector<'_, P>,
    bin_dirs: &[PathBuf],
    filename: &CStr,
) -> CString {
    let bin_path = resolve_bin_path(filename, bin_dirs, redirector.probe());
    redirector
        .redirect_path(Some(&bin_path))
        .unwrap_or(bin_path)
}

/// Bundle binary directories from the environment, read once
pub fn bin_dirs() -> &'static [PathBuf] {
    static BIN_DIRS: OnceLock<Vec<PathBuf>> = OnceLock::new();
    BIN_DIRS.get_or_init(|| ShimConfig::from_env().bin_dirs().to_vec())
}

/// [`adjust_exec_path_with`] over the process-wide table and environment
pub fn adjust_exec_path(filename: &CStr) -> CString {
    adjust_exec_path_with(&redirect::global(), bin_dirs(), filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingTable, PathMapping};
    use crate::probe::{AccessProbe, ProbeOutcome};
    use std::os::unix::fs::PermissionsExt;

    struct FixedProbe(Vec<&'static str>);

    impl Probe for FixedProbe {
        fn probe(&self, path: &CStr) -> ProbeOutcome {
            if self.is_executable(path) {
                ProbeOutcome::Exists
            } else {
                ProbeOutcome::Missing
            }
        }
        fn is_executable(&self, path: &CStr) -> bool {
            let path = path.to_str().unwrap();
            self.0.iter().any(|e| *e == path)
        }
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn path_like_names_are_not_searched() {
        let probe = FixedProbe(vec!["/b/bin/tool"]);
        let dirs = [PathBuf::from("/b/bin")];
        assert_eq!(resolve_bin_path(&c("./tool"), &dirs, &probe), c("./tool"));
        assert_eq!(resolve_bin_path(&c("/usr/bin/tool"), &dirs, &probe), c("/usr/bin/tool"));
    }

    #[test]
    fn bin_dirs_are_searched_in_order() {
        let probe = FixedProbe(vec!["/b/usr/bin/tool", "/b/bin/tool"]);
        let dirs = [PathBuf::from("/b/bin"), PathBuf::from("/b/usr/bin")];
        assert_eq!(resolve_bin_path(&c("tool"), &dirs, &probe), c("/b/bin/tool"));
    }

    #[test]
    fn unknown_name_is_left_for_the_caller() {
        let probe = FixedProbe(vec![]);
        let dirs = [PathBuf::from("/b/bin")];
        assert_eq!(resolve_bin_path(&c("tool"), &dirs, &probe), c("tool"));
    }

    #[test]
    fn adjusted_path_is_redirected() {
        let bundle = tempfile::tempdir().unwrap();
        let bin = bundle.path().join("usr/bin");
        std::fs::create_dir_all(&bin).unwrap();
        let tool = bin.join("tool");
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let target = bundle.path().join("usr").to_str().unwrap().to_string();
        let table = MappingTable::new(vec![PathMapping::new("/usr", target.clone())]);
        let r = Redirector::new(&table, AccessProbe);

        assert_eq!(
            adjust_exec_path_with(&r, &[], &c("/usr/bin/tool")),
            c(&format!("{target}/bin/tool"))
        );
        // bare name found in a bundle bin dir, nothing to redirect
        assert_eq!(
            adjust_exec_path_with(&r, &[bin.clone()], &c("tool")),
            c(tool.to_str().unwrap())
        );
        // falls back to the resolved name
        assert_eq!(adjust_exec_path_with(&r, &[bin], &c("missing")), c("missing"));
    }
}
