//! Path redirection
//!
//! A path starting with a mapping's source prefix is rewritten onto the
//! mapping's target prefix, but only when the rewritten path is usable.
//! Otherwise the original path is returned unchanged.

use crate::mapping::{self, MappingTable, PathMapping};
use crate::probe::{AccessProbe, Probe, ProbeOutcome};
use libc::{O_CREAT, c_int};
use std::ffi::{CStr, CString};

const SEPARATOR: u8 = b'/';

/// Flags selecting a redirection variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedirectMode {
    /// Accept a candidate whose parent exists even if the leaf does not
    pub check_parent: bool,
    /// Leave relative paths untouched without consulting the table
    pub only_if_absolute: bool,
}

impl RedirectMode {
    pub const IF_ABSOLUTE: Self = Self {
        check_parent: false,
        only_if_absolute: true,
    };
    pub const TARGET: Self = Self {
        check_parent: true,
        only_if_absolute: false,
    };
    pub const UNCONDITIONAL: Self = Self {
        check_parent: false,
        only_if_absolute: false,
    };
    /// Creation target given as an absolute path; relative ones stay untouched
    pub const TARGET_IF_ABSOLUTE: Self = Self {
        check_parent: true,
        only_if_absolute: true,
    };

    /// Mode for `open`-style calls
    pub fn for_open(flags: c_int) -> Self {
        if flags & O_CREAT != 0 {
            Self::TARGET
        } else {
            Self::UNCONDITIONAL
        }
    }

    /// Mode for `openat`-style calls, which resolve relative paths against a
    /// directory descriptor
    pub fn for_openat(flags: c_int) -> Self {
        if flags & O_CREAT != 0 {
            Self::TARGET_IF_ABSOLUTE
        } else {
            Self::IF_ABSOLUTE
        }
    }

    /// Mode for `fopen`-style calls; `w` and `a` may create the file
    pub fn for_fopen(mode: Option<&CStr>) -> Self {
        match mode.and_then(|m| m.to_bytes().first()) {
            Some(b'w' | b'a') => Self::TARGET,
            _ => Self::UNCONDITIONAL,
        }
    }
}

/// Redirection engine over a borrowed table
pub struct Redirector<'a, P> {
    table: &'a MappingTable,
    probe: P,
}

impl<'a, P: Probe> Redirector<'a, P> {
    pub fn new(table: &'a MappingTable, probe: P) -> Self {
        Self { table, probe }
    }

    /// Redirect `pathname`, returning an owned path
    ///
    /// `None` only when `pathname` is `None`.
    pub fn redirect(&self, pathname: Option<&CStr>, mode: RedirectMode) -> Option<CString> {
        let pathname = pathname?;
        if mode.only_if_absolute && !is_absolute(pathname) {
            return Some(pathname.to_owned());
        }
        if self.table.is_empty() {
            return Some(pathname.to_owned());
        }
        let path = pathname.to_bytes();
        for mapping in self.table {
            let Some(rest) = path.strip_prefix(mapping.source()) else {
                continue;
            };
            let Ok(candidate) = CString::new(candidate_path(mapping, rest)) else {
                continue;
            };
            if self.accepts(&candidate, mode) {
                return Some(candidate);
            }
            tracing::trace!("rejected candidate {:?} for {:?}", candidate, pathname);
        }
        Some(pathname.to_owned())
    }

    pub fn redirect_if_absolute(&self, pathname: Option<&CStr>) -> Option<CString> {
        self.redirect(pathname, RedirectMode::IF_ABSOLUTE)
    }
    pub fn redirect_target(&self, pathname: Option<&CStr>) -> Option<CString> {
        self.redirect(pathname, RedirectMode::TARGET)
    }
    pub fn redirect_path(&self, pathname: Option<&CStr>) -> Option<CString> {
        self.redirect(pathname, RedirectMode::UNCONDITIONAL)
    }

    pub(crate) fn probe(&self) -> &P {
        &self.probe
    }

    fn accepts(&self, candidate: &CStr, mode: RedirectMode) -> bool {
        if self.probe.probe(candidate).is_reachable() {
            return true;
        }
        if !mode.check_parent {
            return false;
        }
        match CString::new(parent(candidate.to_bytes())) {
            Ok(parent) => self.probe.probe(&parent) == ProbeOutcome::Exists,
            Err(_) => false,
        }
    }
}

/// Redirector over the process-wide table
///
/// The table is loaded from the environment on first use.
pub fn global() -> Redirector<'static, AccessProbe> {
    Redirector::new(mapping::global(), AccessProbe)
}

/// Redirect with the process-wide table
///
/// Relative paths in `IF_ABSOLUTE` mode return before the table is loaded.
pub fn redirect(pathname: Option<&CStr>, mode: RedirectMode) -> Option<CString> {
    let pathname = pathname?;
    if mode.only_if_absolute && !is_absolute(pathname) {
        return Some(pathname.to_owned());
    }
    global().redirect(Some(pathname), mode)
}

pub fn redirect_if_absolute(pathname: Option<&CStr>) -> Option<CString> {
    redirect(pathname, RedirectMode::IF_ABSOLUTE)
}

pub fn redirect_target(pathname: Option<&CStr>) -> Option<CString> {
    redirect(pathname, RedirectMode::TARGET)
}

pub fn redirect_path(pathname: Option<&CStr>) -> Option<CString> {
    redirect(pathname, RedirectMode::UNCONDITIONAL)
}

fn is_absolute(path: &CStr) -> bool {
    path.to_bytes().first() == Some(&SEPARATOR)
}

/// Replace the matched source prefix with the target prefix
///
/// Exactly one separator ends up at the seam. When the source prefix stops in
/// the middle of a component the remainder is appended as is.
fn candidate_path(mapping: &PathMapping, rest: &[u8]) -> Vec<u8> {
    let target = mapping.target();
    let mut out = Vec::with_capacity(target.len() + rest.len() + 1);
    out.extend_from_slice(target);
    if rest.is_empty() {
        return out;
    }
    let target_sep = target.last() == Some(&SEPARATOR);
    let rest_sep = rest.first() == Some(&SEPARATOR);
    let source_sep = mapping.source().last() == Some(&SEPARATOR);
    match (target_sep, rest_sep) {
        (true, true) => out.extend_from_slice(&rest[1..]),
        (false, false) if source_sep => {
            out.push(SEPARATOR);
            out.extend_from_slice(rest);
        }
        _ => out.extend_from_slice(rest),
    }
    out
}

fn parent(path: &[u8]) -> &[u8] {
    let mut end = path.len();
    while end > 1 && path[end - 1] == SEPARATOR {
        end -= 1;
    }
    match path[..end].iter().rposition(|b| *b == SEPARATOR) {
        Some(0) => b"/".as_slice(),
        Some(i) => &path[..i],
        None => b".".as_slice(),
    }
}
