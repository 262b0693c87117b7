use crate::error::{Error, Result};
use std::path::Path;

/// Switch back to the directory the launcher left
///
/// Returns whether a change happened. A missing value is a no-op.
pub fn restore_workdir(original: Option<&Path>) -> Result<bool> {
    let Some(path) = original else {
        return Ok(false);
    };
    nix::unistd::chdir(path).map_err(|source| Error::Workdir {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("restored working directory: {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_value_is_noop() {
        let before = std::env::current_dir().unwrap();
        assert!(!restore_workdir(None).unwrap());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let before = std::env::current_dir().unwrap();
        let err = restore_workdir(Some(&gone)).unwrap_err();
        assert!(matches!(err, Error::Workdir { ref path, .. } if path == &gone));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
