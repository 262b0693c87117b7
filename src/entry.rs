//! Entry point interception
//!
//! glibc starts every dynamically linked program through
//! `__libc_start_main(main, ...)`. The shim interposes that function, captures
//! the real `main` and hands the loader a wrapper instead, so the mapping
//! table is ready before any user code runs.

use crate::error::{Error, Result};
use libc::{c_char, c_int};
use std::sync::OnceLock;

pub type MainFn = unsafe extern "C" fn(c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;

/// Holder of the captured `main`
///
/// Unarmed until [`arm`](Self::arm) succeeds; armed for the rest of the
/// process lifetime.
pub struct EntryInterceptor {
    real_main: OnceLock<MainFn>,
}

impl EntryInterceptor {
    pub const fn new() -> Self {
        Self {
            real_main: OnceLock::new(),
        }
    }

    /// Capture the real entry function
    pub fn arm(&self, main: MainFn) -> Result<()> {
        self.real_main.set(main).map_err(|_| Error::AlreadyArmed)
    }

    pub fn is_armed(&self) -> bool {
        self.real_main.get().is_some()
    }

    /// Run the captured `main` between the pre and post steps
    ///
    /// Arguments and the return value pass through untouched.
    ///
    /// # Safety
    ///
    /// `argv` and `envp` must be what the loader handed to the program.
    pub unsafe fn invoke(
        &self,
        argc: c_int,
        argv: *mut *mut c_char,
        envp: *mut *mut c_char,
    ) -> Result<c_int> {
        let main = *self.real_main.get().ok_or(Error::Unarmed)?;
        before_main();
        let ret = unsafe { main(argc, argv, envp) };
        after_main(ret);
        Ok(ret)
    }
}

impl Default for EntryInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

fn before_main() {
    let table = crate::mapping::global();
    if tracing::enabled!(tracing::Level::DEBUG) {
        let exe = std::fs::read_link("/proc/self/exe").unwrap_or_default();
        tracing::debug!(
            "before main {} ({} path mappings)",
            exe.display(),
            table.len()
        );
    }
}

fn after_main(ret: c_int) {
    tracing::debug!("main() returned {ret}");
}

#[cfg(all(not(test), target_os = "linux", target_env = "gnu"))]
mod interpose {
    use super::{EntryInterceptor, MainFn};
    use crate::error::Error;
    use crate::probe::load_original;
    use libc::{c_char, c_int, c_void};

    type InitFn = unsafe extern "C" fn(c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;
    type FiniFn = unsafe extern "C" fn();
    type StartMainFn = unsafe extern "C" fn(
        MainFn,
        c_int,
        *mut *mut c_char,
        Option<InitFn>,
        Option<FiniFn>,
        Option<FiniFn>,
        *mut c_void,
    ) -> c_int;

    static INTERCEPTOR: EntryInterceptor = EntryInterceptor::new();

    unsafe extern "C" fn main_hook(
        argc: c_int,
        argv: *mut *mut c_char,
        envp: *mut *mut c_char,
    ) -> c_int {
        match unsafe { INTERCEPTOR.invoke(argc, argv, envp) } {
            Ok(ret) => ret,
            Err(e) => {
                tracing::error!("{e}");
                std::process::abort();
            }
        }
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn __libc_start_main(
        main: MainFn,
        argc: c_int,
        argv: *mut *mut c_char,
        init: Option<InitFn>,
        fini: Option<FiniFn>,
        rtld_fini: Option<FiniFn>,
        stack_end: *mut c_void,
    ) -> c_int {
        let Some(real) = load_original::<StartMainFn>(b"__libc_start_main\0") else {
            tracing::error!("{}", Error::MissingSymbol("__libc_start_main"));
            std::process::abort();
        };
        let main = match INTERCEPTOR.arm(main) {
            Ok(()) => main_hook as MainFn,
            Err(_) => main,
        };
        unsafe { real(main, argc, argv, init, fini, rtld_fini, stack_end) }
    }
}
