//! Interposed libc functions
//!
//! # Safety
//!
//! All functions in this module are FFI wrappers that intercept libc calls.
//! They require the same safety guarantees as the original libc functions:
//! - Pointers must be valid and point to properly initialized memory
//! - String pointers must be null-terminated C strings
//! - Buffer sizes must be accurate
#![allow(clippy::missing_safety_doc)]
#![allow(unsafe_op_in_unsafe_fn)]

use crate::exec;
use crate::probe::load_original;
use crate::redirect::{self, RedirectMode};
use crate::trace;
use libc::*;
use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::sync::OnceLock;

// Thread-local recursion guard to prevent infinite recursion in hooks
thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// RAII guard for recursion protection
struct RecursionGuard;

impl RecursionGuard {
    /// Try to enter hook. Returns Some(guard) if not already in hook, None otherwise.
    fn try_enter() -> Option<Self> {
        IN_HOOK.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(RecursionGuard)
            }
        })
    }
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}

/// Run `f` with every hook on this thread passing straight through
pub(crate) fn unhooked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = RecursionGuard::try_enter();
    f()
}

unsafe fn redirected(call: &str, path: *const c_char, mode: RedirectMode) -> Option<CString> {
    if path.is_null() {
        return None;
    }
    let path = CStr::from_ptr(path);
    let out = redirect::redirect(Some(path), mode);
    trace::redirection(call, path, out.as_deref());
    out
}

unsafe fn exec_path(call: &str, path: *const c_char) -> Option<CString> {
    if path.is_null() {
        return None;
    }
    let path = CStr::from_ptr(path);
    let out = exec::adjust_exec_path(path);
    trace::redirection(call, path, Some(out.as_c_str()));
    Some(out)
}

fn actual(redirected: &Option<CString>, path: *const c_char) -> *const c_char {
    redirected.as_ref().map_or(path, |v| v.as_ptr())
}

unsafe fn fopen_mode(mode: *const c_char) -> RedirectMode {
    if mode.is_null() {
        RedirectMode::for_fopen(None)
    } else {
        RedirectMode::for_fopen(Some(CStr::from_ptr(mode)))
    }
}

// Type aliases for function pointers
type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, mode_t) -> c_int;
type CreatFn = unsafe extern "C" fn(*const c_char, mode_t) -> c_int;
type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
type StatFn = unsafe extern "C" fn(*const c_char, *mut stat) -> c_int;
type Stat64Fn = unsafe extern "C" fn(*const c_char, *mut stat64) -> c_int;
type FstatatFn = unsafe extern "C" fn(c_int, *const c_char, *mut stat, c_int) -> c_int;
type Fstatat64Fn = unsafe extern "C" fn(c_int, *const c_char, *mut stat64, c_int) -> c_int;
type StatxFn = unsafe extern "C" fn(c_int, *const c_char, c_int, c_uint, *mut statx) -> c_int;
type XstatFn = unsafe extern "C" fn(c_int, *const c_char, *mut stat) -> c_int;
type Xstat64Fn = unsafe extern "C" fn(c_int, *const c_char, *mut stat64) -> c_int;
type AccessFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
type FaccessatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, c_int) -> c_int;
type OpendirFn = unsafe extern "C" fn(*const c_char) -> *mut DIR;
type MkdirFn = unsafe extern "C" fn(*const c_char, mode_t) -> c_int;
type MkdiratFn = unsafe extern "C" fn(c_int, *const c_char, mode_t) -> c_int;
type ChdirFn = unsafe extern "C" fn(*const c_char) -> c_int;
type ReadlinkFn = unsafe extern "C" fn(*const c_char, *mut c_char, size_t) -> ssize_t;
type ReadlinkatFn = unsafe extern "C" fn(c_int, *const c_char, *mut c_char, size_t) -> ssize_t;
type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;
type ExecvFn = unsafe extern "C" fn(*const c_char, *const *const c_char) -> c_int;

/// Real libc functions, resolved once
#[allow(non_snake_case)]
pub(crate) struct OriginalFunctions {
    open: Option<OpenFn>,
    open64: Option<OpenFn>,
    openat: Option<OpenatFn>,
    openat64: Option<OpenatFn>,
    creat: Option<CreatFn>,
    creat64: Option<CreatFn>,
    fopen: Option<FopenFn>,
    fopen64: Option<FopenFn>,
    stat: Option<StatFn>,
    stat64: Option<Stat64Fn>,
    lstat: Option<StatFn>,
    lstat64: Option<Stat64Fn>,
    fstatat: Option<FstatatFn>,
    fstatat64: Option<Fstatat64Fn>,
    statx: Option<StatxFn>,
    __xstat: Option<XstatFn>,
    __xstat64: Option<Xstat64Fn>,
    __lxstat: Option<XstatFn>,
    __lxstat64: Option<Xstat64Fn>,
    access: Option<AccessFn>,
    faccessat: Option<FaccessatFn>,
    opendir: Option<OpendirFn>,
    mkdir: Option<MkdirFn>,
    mkdirat: Option<MkdiratFn>,
    chdir: Option<ChdirFn>,
    readlink: Option<ReadlinkFn>,
    readlinkat: Option<ReadlinkatFn>,
    execve: Option<ExecveFn>,
    execv: Option<ExecvFn>,
    execvp: Option<ExecvFn>,
}

impl OriginalFunctions {
    fn load() -> Self {
        Self {
            open: load_original(b"open\0"),
            open64: load_original(b"open64\0"),
            openat: load_original(b"openat\0"),
            openat64: load_original(b"openat64\0"),
            creat: load_original(b"creat\0"),
            creat64: load_original(b"creat64\0"),
            fopen: load_original(b"fopen\0"),
            fopen64: load_original(b"fopen64\0"),
            stat: load_original(b"stat\0"),
            stat64: load_original(b"stat64\0"),
            lstat: load_original(b"lstat\0"),
            lstat64: load_original(b"lstat64\0"),
            fstatat: load_original(b"fstatat\0"),
            fstatat64: load_original(b"fstatat64\0"),
            statx: load_original(b"statx\0"),
            __xstat: load_original(b"__xstat\0"),
            __xstat64: load_original(b"__xstat64\0"),
            __lxstat: load_original(b"__lxstat\0"),
            __lxstat64: load_original(b"__lxstat64\0"),
            access: load_original(b"access\0"),
            faccessat: load_original(b"faccessat\0"),
            opendir: load_original(b"opendir\0"),
            mkdir: load_original(b"mkdir\0"),
            mkdirat: load_original(b"mkdirat\0"),
            chdir: load_original(b"chdir\0"),
            readlink: load_original(b"readlink\0"),
            readlinkat: load_original(b"readlinkat\0"),
            execve: load_original(b"execve\0"),
            execv: load_original(b"execv\0"),
            execvp: load_original(b"execvp\0"),
        }
    }
}

/// Resolve the real functions; the library constructor calls this first
pub(crate) fn original() -> &'static OriginalFunctions {
    static ORIGINAL: OnceLock<OriginalFunctions> = OnceLock::new();
    ORIGINAL.get_or_init(OriginalFunctions::load)
}

//
// File open functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let Some(f) = original().open else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, flags, mode);
    };
    let redirected = redirected("open", path, RedirectMode::for_open(flags));
    f(actual(&redirected, path), flags, mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let Some(f) = original().open64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, flags, mode);
    };
    let redirected = redirected("open64", path, RedirectMode::for_open(flags));
    f(actual(&redirected, path), flags, mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    let Some(f) = original().openat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, flags, mode);
    };
    let redirected = redirected("openat", path, RedirectMode::for_openat(flags));
    f(dirfd, actual(&redirected, path), flags, mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat64(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    let Some(f) = original().openat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, flags, mode);
    };
    let redirected = redirected("openat64", path, RedirectMode::for_openat(flags));
    f(dirfd, actual(&redirected, path), flags, mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat(path: *const c_char, mode: mode_t) -> c_int {
    let Some(f) = original().creat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, mode);
    };
    let redirected = redirected("creat", path, RedirectMode::TARGET);
    f(actual(&redirected, path), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat64(path: *const c_char, mode: mode_t) -> c_int {
    let Some(f) = original().creat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, mode);
    };
    let redirected = redirected("creat64", path, RedirectMode::TARGET);
    f(actual(&redirected, path), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let Some(f) = original().fopen else {
        return std::ptr::null_mut();
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, mode);
    };
    let redirected = redirected("fopen", path, fopen_mode(mode));
    f(actual(&redirected, path), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let Some(f) = original().fopen64 else {
        return std::ptr::null_mut();
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, mode);
    };
    let redirected = redirected("fopen64", path, fopen_mode(mode));
    f(actual(&redirected, path), mode)
}

//
// Stat functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut stat) -> c_int {
    let Some(f) = original().stat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, buf);
    };
    let redirected = redirected("stat", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stat64(path: *const c_char, buf: *mut stat64) -> c_int {
    let Some(f) = original().stat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, buf);
    };
    let redirected = redirected("stat64", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut stat) -> c_int {
    let Some(f) = original().lstat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, buf);
    };
    let redirected = redirected("lstat", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn lstat64(path: *const c_char, buf: *mut stat64) -> c_int {
    let Some(f) = original().lstat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, buf);
    };
    let redirected = redirected("lstat64", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fstatat(
    dirfd: c_int,
    path: *const c_char,
    buf: *mut stat,
    flags: c_int,
) -> c_int {
    let Some(f) = original().fstatat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, buf, flags);
    };
    let redirected = redirected("fstatat", path, RedirectMode::IF_ABSOLUTE);
    f(dirfd, actual(&redirected, path), buf, flags)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fstatat64(
    dirfd: c_int,
    path: *const c_char,
    buf: *mut stat64,
    flags: c_int,
) -> c_int {
    let Some(f) = original().fstatat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, buf, flags);
    };
    let redirected = redirected("fstatat64", path, RedirectMode::IF_ABSOLUTE);
    f(dirfd, actual(&redirected, path), buf, flags)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn statx(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mask: c_uint,
    buf: *mut statx,
) -> c_int {
    let Some(f) = original().statx else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, flags, mask, buf);
    };
    let redirected = redirected("statx", path, RedirectMode::IF_ABSOLUTE);
    f(dirfd, actual(&redirected, path), flags, mask, buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __xstat(ver: c_int, path: *const c_char, buf: *mut stat) -> c_int {
    let Some(f) = original().__xstat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(ver, path, buf);
    };
    let redirected = redirected("__xstat", path, RedirectMode::UNCONDITIONAL);
    f(ver, actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __xstat64(ver: c_int, path: *const c_char, buf: *mut stat64) -> c_int {
    let Some(f) = original().__xstat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(ver, path, buf);
    };
    let redirected = redirected("__xstat64", path, RedirectMode::UNCONDITIONAL);
    f(ver, actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lxstat(ver: c_int, path: *const c_char, buf: *mut stat) -> c_int {
    let Some(f) = original().__lxstat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(ver, path, buf);
    };
    let redirected = redirected("__lxstat", path, RedirectMode::UNCONDITIONAL);
    f(ver, actual(&redirected, path), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lxstat64(ver: c_int, path: *const c_char, buf: *mut stat64) -> c_int {
    let Some(f) = original().__lxstat64 else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(ver, path, buf);
    };
    let redirected = redirected("__lxstat64", path, RedirectMode::UNCONDITIONAL);
    f(ver, actual(&redirected, path), buf)
}

//
// Access functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    let Some(f) = original().access else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, mode);
    };
    let redirected = redirected("access", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn faccessat(
    dirfd: c_int,
    path: *const c_char,
    mode: c_int,
    flags: c_int,
) -> c_int {
    let Some(f) = original().faccessat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, mode, flags);
    };
    let redirected = redirected("faccessat", path, RedirectMode::IF_ABSOLUTE);
    f(dirfd, actual(&redirected, path), mode, flags)
}

//
// Directory functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut DIR {
    let Some(f) = original().opendir else {
        return std::ptr::null_mut();
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path);
    };
    let redirected = redirected("opendir", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: mode_t) -> c_int {
    let Some(f) = original().mkdir else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, mode);
    };
    let redirected = redirected("mkdir", path, RedirectMode::TARGET);
    f(actual(&redirected, path), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mkdirat(dirfd: c_int, path: *const c_char, mode: mode_t) -> c_int {
    let Some(f) = original().mkdirat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, mode);
    };
    let redirected = redirected("mkdirat", path, RedirectMode::TARGET_IF_ABSOLUTE);
    f(dirfd, actual(&redirected, path), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn chdir(path: *const c_char) -> c_int {
    let Some(f) = original().chdir else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path);
    };
    let redirected = redirected("chdir", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path))
}

//
// Link functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn readlink(path: *const c_char, buf: *mut c_char, size: size_t) -> ssize_t {
    let Some(f) = original().readlink else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, buf, size);
    };
    let redirected = redirected("readlink", path, RedirectMode::UNCONDITIONAL);
    f(actual(&redirected, path), buf, size)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn readlinkat(
    dirfd: c_int,
    path: *const c_char,
    buf: *mut c_char,
    size: size_t,
) -> ssize_t {
    let Some(f) = original().readlinkat else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(dirfd, path, buf, size);
    };
    let redirected = redirected("readlinkat", path, RedirectMode::IF_ABSOLUTE);
    f(dirfd, actual(&redirected, path), buf, size)
}

//
// Exec functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let Some(f) = original().execve else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, argv, envp);
    };
    let adjusted = exec_path("execve", path);
    f(actual(&adjusted, path), argv, envp)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    let Some(f) = original().execv else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(path, argv);
    };
    let adjusted = exec_path("execv", path);
    f(actual(&adjusted, path), argv)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    let Some(f) = original().execvp else {
        return -1;
    };
    let Some(_guard) = RecursionGuard::try_enter() else {
        return f(file, argv);
    };
    let adjusted = exec_path("execvp", file);
    f(actual(&adjusted, file), argv)
}
