use std::path::PathBuf;

/// Errors surfaced by the shim's fallible setup steps
///
/// Path redirection itself never fails; it falls back to the original path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("entry point interceptor is already armed")]
    AlreadyArmed,
    #[error("entry point interceptor was invoked before being armed")]
    Unarmed,
    #[error("failed to restore working directory {}", .path.display())]
    Workdir {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("real `{0}` could not be resolved")]
    MissingSymbol(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
