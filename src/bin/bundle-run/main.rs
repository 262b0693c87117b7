mod config;
#[path = "../../env_vars.rs"]
mod env_vars;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use config::{BundleConfig, CONFIG_FILE_NAME};
use env_vars::{BIN_PATH_ENV, HOOK_LOG_ENV, ORIGINAL_WORKDIR_ENV, PATH_MAPPINGS_ENV};
use libloading::{Library, Symbol};
use std::env;
use std::ffi::{CStr, CString, OsStr, OsString, c_char};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, exit};
use tracing_subscriber::{
    Layer,
    filter::{EnvFilter, LevelFilter},
    prelude::*,
};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(target_os = "linux")]
const CDYLIB_EXT: &str = "so";
#[cfg(target_os = "macos")]
const CDYLIB_EXT: &str = "dylib";

const PRELOAD_ENV: &str = "LD_PRELOAD";

#[derive(Parser)]
#[command(version, about = "Run a program from a relocatable bundle")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with install-time paths redirected into the bundle
    Run {
        /// Bundle root; defaults to the launcher's directory
        #[arg(long)]
        bundle: Option<PathBuf>,
        /// Bundle config file; searched upward from the bundle root by default
        #[arg(long)]
        config: Option<PathBuf>,
        /// Shim library; defaults to the one next to the launcher
        #[arg(long)]
        library: Option<PathBuf>,
        /// Trace filter for the shim, e.g. `debug`
        #[arg(long)]
        hook_log: Option<String>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<OsString>,
    },
    /// Show how the shim parses a mapping value
    Mappings {
        #[arg(long)]
        library: Option<PathBuf>,
        /// Mapping value; defaults to the current BUNDLE_PATH_MAPPINGS
        value: Option<String>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(LevelFilter::WARN.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            bundle,
            config,
            library,
            hook_log,
            command,
        } => run(bundle, config, library, hook_log, command),
        Commands::Mappings { library, value } => show_mappings(library, value),
    };
    if let Err(e) = result {
        tracing::error!("{e:?}");
        exit(1);
    }
}

fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe().context("failed to get executable path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable has no parent directory")
}

fn default_library() -> anyhow::Result<PathBuf> {
    Ok(exe_dir()?.join(format!("lib{PKG_NAME}.{CDYLIB_EXT}")))
}

#[tracing::instrument(skip(command))]
fn run(
    bundle: Option<PathBuf>,
    config: Option<PathBuf>,
    library: Option<PathBuf>,
    hook_log: Option<String>,
    command: Vec<OsString>,
) -> anyhow::Result<()> {
    let workdir = env::current_dir().context("failed to get working directory")?;
    let bundle_root = match bundle {
        Some(p) => p,
        None => exe_dir()?,
    };
    let bundle_root = fs::canonicalize(&bundle_root)
        .with_context(|| format!("failed to resolve bundle root: {}", bundle_root.display()))?;
    tracing::debug!("bundle root: {}", bundle_root.display());

    let conf = match config {
        Some(p) => BundleConfig::from_file_path(p)?,
        None => BundleConfig::from_dir_path(&bundle_root, CONFIG_FILE_NAME)?,
    };

    let library = match library {
        Some(p) => p,
        None => default_library()?,
    };
    let library = fs::canonicalize(&library)
        .with_context(|| format!("shim library not found: {}", library.display()))?;
    let dylib = DyLib::load(&library)?;
    let version = dylib.version()?;
    tracing::debug!("shim library version: {version}");
    if version != PKG_VERSION {
        anyhow::bail!("shim library version {version} does not match launcher {PKG_VERSION}");
    }

    let mappings = conf.encode_mappings(&bundle_root)?;
    let description = dylib.describe_mappings(&mappings)?;
    if let Some(skipped) = description["skipped"].as_array().filter(|v| !v.is_empty()) {
        tracing::warn!("shim will skip mapping entries: {skipped:?}");
    }
    let bin_dirs = conf.encode_bin_dirs(&bundle_root)?;

    let shim = ShimEnv {
        mappings,
        bin_dirs,
        workdir,
        library,
        hook_log,
    };

    let mut args = command.into_iter();
    let program = args.next().context("no command!")?;
    let dirs: Vec<PathBuf> = conf.bin_dirs().iter().map(|d| bundle_root.join(d)).collect();
    let program = resolve_program(&program, &dirs);
    tracing::info!("exec: {}", Path::new(&program).display());

    let err = Command::new(&program)
        .args(args)
        .current_dir(&bundle_root)
        .envs(shim.vars(env::var_os(PRELOAD_ENV)))
        .exec();
    Err(err).with_context(|| format!("failed to start {}", Path::new(&program).display()))
}

#[tracing::instrument]
fn show_mappings(library: Option<PathBuf>, value: Option<String>) -> anyhow::Result<()> {
    let library = match library {
        Some(p) => p,
        None => default_library()?,
    };
    let value = value
        .or_else(|| env::var(PATH_MAPPINGS_ENV).ok())
        .unwrap_or_default();
    let description = DyLib::load(&library)?.describe_mappings(&value)?;
    let out = serde_json::to_string_pretty(&description).context("failed to format mappings")?;
    println!("{out}");
    Ok(())
}

/// Environment handed to the program for the shim
struct ShimEnv {
    mappings: String,
    bin_dirs: String,
    workdir: PathBuf,
    library: PathBuf,
    hook_log: Option<String>,
}

impl ShimEnv {
    /// Variables to set, with the shim prepended to `preload`
    fn vars(&self, preload: Option<OsString>) -> Vec<(&'static str, OsString)> {
        let mut shim_preload = self.library.clone().into_os_string();
        if let Some(existing) = preload.filter(|v| !v.is_empty()) {
            shim_preload.push(":");
            shim_preload.push(existing);
        }
        let mut vars = vec![
            (PATH_MAPPINGS_ENV, OsString::from(&self.mappings)),
            (BIN_PATH_ENV, OsString::from(&self.bin_dirs)),
            (ORIGINAL_WORKDIR_ENV, self.workdir.clone().into_os_string()),
            (PRELOAD_ENV, shim_preload),
        ];
        if let Some(filter) = &self.hook_log {
            vars.push((HOOK_LOG_ENV, OsString::from(filter)));
        }
        vars
    }
}

/// Look a bare command name up in the bundle's binary directories
///
/// Same rule as the shim's `exec::resolve_bin_path`, which handles commands
/// the program itself execs later.
fn resolve_program(program: &OsStr, bin_dirs: &[PathBuf]) -> OsString {
    if program.as_bytes().contains(&b'/') {
        return program.to_os_string();
    }
    bin_dirs
        .iter()
        .map(|d| d.join(program))
        .find(|p| is_executable(p))
        .map(PathBuf::into_os_string)
        .unwrap_or_else(|| program.to_os_string())
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

struct DyLib {
    cdylib: Library,
}

impl DyLib {
    fn load(library_path: &Path) -> anyhow::Result<Self> {
        let cdylib = unsafe {
            Library::new(library_path)
                .with_context(|| format!("failed to load library: {}", library_path.display()))
        }?;
        Ok(Self { cdylib })
    }

    pub fn version(&self) -> anyhow::Result<String> {
        unsafe {
            let func: Symbol<unsafe extern "C" fn() -> *const c_char> = self
                .cdylib
                .get(b"bundlehook_version")
                .context("failed to load version function")?;
            Ok(CStr::from_ptr(func()).to_string_lossy().to_string())
        }
    }

    pub fn describe_mappings(&self, value: &str) -> anyhow::Result<serde_json::Value> {
        let value = CString::new(value).context("mapping value contains NUL")?;
        unsafe {
            let describe: Symbol<unsafe extern "C" fn(*const c_char) -> *mut c_char> = self
                .cdylib
                .get(b"bundlehook_describe_mappings")
                .context("failed to load describe function")?;
            let free: Symbol<unsafe extern "C" fn(*mut c_char)> = self
                .cdylib
                .get(b"bundlehook_free_string")
                .context("failed to load free function")?;
            let ptr = describe(value.as_ptr());
            if ptr.is_null() {
                anyhow::bail!("shim library failed to describe mappings");
            }
            let json = CStr::from_ptr(ptr).to_string_lossy().to_string();
            free(ptr);
            serde_json::from_str(&json).context("malformed mapping description")
        }
    }
}
