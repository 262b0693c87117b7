//! Runtime shim for relocatable application bundles
//!
//! Loaded with `LD_PRELOAD`, the library rewrites paths under the bundle's
//! original install prefixes onto the matching location inside the bundle.
//! The mapping comes from [`config::PATH_MAPPINGS_ENV`]; see [`redirect`] for
//! the rewrite rules and [`entry`] for how the shim gets control before the
//! program's `main`.

pub mod api;
pub mod config;
pub mod entry;
mod env_vars;
pub mod error;
pub mod exec;
#[cfg(all(not(test), target_os = "linux", target_env = "gnu"))]
mod hooks;
pub mod mapping;
pub mod probe;
pub mod redirect;
pub mod trace;
pub mod workdir;

pub use error::{Error, Result};
pub use mapping::{MappingTable, PathMapping};
pub use redirect::{RedirectMode, Redirector};

/// Library constructor: trace setup, real function lookup, working directory
#[cfg(all(not(test), target_os = "linux", target_env = "gnu"))]
#[ctor::ctor]
unsafe fn init() {
    let config = config::ShimConfig::from_env();
    trace::init(config.hook_log());

    // Resolve real functions before anything below calls into libc
    hooks::original();

    if let Some(dir) = config.original_workdir() {
        if let Err(e) = hooks::unhooked(|| workdir::restore_workdir(Some(dir))) {
            tracing::warn!("{e}");
        }
        // Descendants must not restore a directory they never left.
        // SAFETY: constructors run before the host program starts threads
        unsafe { std::env::remove_var(config::ORIGINAL_WORKDIR_ENV) };
    }
}
