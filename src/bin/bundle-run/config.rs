use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name searched for when no config path is given
pub const CONFIG_FILE_NAME: &str = ".bundle.toml";

/// One install-time prefix and where it lives inside the bundle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub source: PathBuf,
    /// Relative targets are resolved against the bundle root
    pub target: PathBuf,
}

/// Bundle configuration
///
/// Config file is deserialized to this object
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BundleConfig {
    mappings: Vec<Mapping>,
    bin_dirs: Vec<PathBuf>,
}

impl BundleConfig {
    pub fn from_file_path(p: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Config file read error: {}", p.as_ref().display()))?;
        let c = toml::from_str(&s).context("Config file format error")?;
        Ok(c)
    }
    pub fn from_dir_path(p: impl AsRef<Path>, file_name: impl AsRef<Path>) -> Result<Self> {
        let mut path = fs::canonicalize(p).context("Failed to get absolute path")?;
        let f = file_name.as_ref();
        loop {
            let file_path = path.join(f);
            if file_path.is_file() {
                return Self::from_file_path(file_path);
            }
            if let Some(new_path) = path.parent() {
                path = new_path.to_path_buf();
            } else {
                return Ok(Self::default());
            }
        }
    }

    /// Get mappings in declaration order
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
    /// Get binary directories, relative to the bundle root
    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }

    /// Encode mappings as the shim's `SRC:DST;` list
    pub fn encode_mappings(&self, bundle_root: &Path) -> Result<String> {
        let mut out = String::new();
        for m in self.mappings() {
            let target = bundle_root.join(&m.target);
            out.push_str(&encode_path(&m.source)?);
            out.push(':');
            out.push_str(&encode_path(&target)?);
            out.push(';');
        }
        Ok(out)
    }

    /// Encode binary directories as a colon-separated list
    pub fn encode_bin_dirs(&self, bundle_root: &Path) -> Result<String> {
        let dirs = self
            .bin_dirs
            .iter()
            .map(|d| encode_path(&bundle_root.join(d)))
            .collect::<Result<Vec<_>>>()?;
        Ok(dirs.join(":"))
    }
}

fn encode_path(path: &Path) -> Result<String> {
    let s = path
        .to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))?;
    if s.contains([':', ';']) {
        anyhow::bail!("path contains a reserved delimiter (':' or ';'): {s}");
    }
    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
bin_dirs = ["usr/bin", "bin"]

[[mappings]]
source = "/usr/share"
target = "usr/share"

[[mappings]]
source = "/etc/app"
target = "/opt/app/etc"
"#;

    #[test]
    fn parses_and_encodes() {
        let c: BundleConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(c.mappings().len(), 2);
        assert_eq!(
            c.encode_mappings(Path::new("/bundle")).unwrap(),
            "/usr/share:/bundle/usr/share;/etc/app:/opt/app/etc;"
        );
        assert_eq!(
            c.encode_bin_dirs(Path::new("/bundle")).unwrap(),
            "/bundle/usr/bin:/bundle/bin"
        );
    }

    #[test]
    fn missing_keys_default_to_empty() {
        let c: BundleConfig = toml::from_str("").unwrap();
        assert_eq!(c, BundleConfig::default());
        assert_eq!(c.encode_mappings(Path::new("/bundle")).unwrap(), "");
    }

    #[test]
    fn delimiters_in_paths_are_rejected() {
        let c = BundleConfig {
            mappings: vec![Mapping {
                source: PathBuf::from("/opt/a;b"),
                target: PathBuf::from("x"),
            }],
            bin_dirs: vec![],
        };
        assert!(c.encode_mappings(Path::new("/bundle")).is_err());

        let c = BundleConfig {
            mappings: vec![Mapping {
                source: PathBuf::from("/opt"),
                target: PathBuf::from("x"),
            }],
            bin_dirs: vec![],
        };
        assert!(c.encode_mappings(Path::new("/bun:dle")).is_err());
    }

    #[test]
    fn config_is_found_in_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), SAMPLE).unwrap();
        let nested = dir.path().join("usr/lib");
        fs::create_dir_all(&nested).unwrap();

        let c = BundleConfig::from_dir_path(&nested, CONFIG_FILE_NAME).unwrap();
        assert_eq!(c.bin_dirs(), &[PathBuf::from("usr/bin"), PathBuf::from("bin")]);
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "mappings = 3").unwrap();
        assert!(BundleConfig::from_dir_path(dir.path(), CONFIG_FILE_NAME).is_err());
    }
}
