//! Filesystem existence probes used to gate redirection

use libc::{F_OK, X_OK, c_char, c_int};
use nix::errno::Errno;
use std::ffi::CStr;
use std::sync::OnceLock;

/// Outcome of probing a candidate path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Exists,
    /// A component above the leaf is not a directory (`ENOTDIR`)
    NotADirectory,
    Missing,
}

impl ProbeOutcome {
    /// Whether a redirection to the probed path may be committed
    pub fn is_reachable(self) -> bool {
        matches!(self, Self::Exists | Self::NotADirectory)
    }
}

pub trait Probe {
    fn probe(&self, path: &CStr) -> ProbeOutcome;
    fn is_executable(&self, path: &CStr) -> bool;
}

impl<P: Probe + ?Sized> Probe for &P {
    fn probe(&self, path: &CStr) -> ProbeOutcome {
        (**self).probe(path)
    }
    fn is_executable(&self, path: &CStr) -> bool {
        (**self).is_executable(path)
    }
}

type AccessFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;

/// Resolve the next definition of `name` after this object
///
/// `name` must be NUL-terminated.
pub(crate) fn load_original<T>(name: &[u8]) -> Option<T> {
    let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const c_char) };
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

fn real_access() -> Option<AccessFn> {
    static ACCESS: OnceLock<Option<AccessFn>> = OnceLock::new();
    *ACCESS.get_or_init(|| load_original(b"access\0"))
}

/// Probe backed by the real libc `access`
///
/// The shim interposes `access` itself, so the real function is looked up
/// with `RTLD_NEXT` instead of being called through the PLT.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessProbe;

impl AccessProbe {
    fn access(path: &CStr, mode: c_int) -> Result<(), Errno> {
        let f = real_access().ok_or(Errno::ENOSYS)?;
        let ret = unsafe { f(path.as_ptr(), mode) };
        if ret == 0 { Ok(()) } else { Err(Errno::last()) }
    }
}

impl Probe for AccessProbe {
    fn probe(&self, path: &CStr) -> ProbeOutcome {
        match Self::access(path, F_OK) {
            Ok(()) => ProbeOutcome::Exists,
            Err(Errno::ENOTDIR) => ProbeOutcome::NotADirectory,
            Err(_) => ProbeOutcome::Missing,
        }
    }

    fn is_executable(&self, path: &CStr) -> bool {
        Self::access(path, X_OK).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn c(path: &Path) -> CString {
        CString::new(path.as_os_str().as_bytes()).unwrap()
    }

    #[test]
    fn distinguishes_three_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        assert_eq!(AccessProbe.probe(&c(&file)), ProbeOutcome::Exists);
        assert_eq!(
            AccessProbe.probe(&c(&dir.path().join("missing"))),
            ProbeOutcome::Missing
        );
        assert_eq!(
            AccessProbe.probe(&c(&file.join("below"))),
            ProbeOutcome::NotADirectory
        );
    }

    #[test]
    fn executable_bit_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let data = dir.path().join("data");
        std::fs::write(&data, b"").unwrap();
        std::fs::set_permissions(&data, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(AccessProbe.is_executable(&c(&tool)));
        assert!(!AccessProbe.is_executable(&c(&dir.path().join("nope"))));
        // X_OK fails without any execute bit, even for root
        assert!(!AccessProbe.is_executable(&c(&data)));
    }
}
