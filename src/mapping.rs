//! Path mapping table
//!
//! The table is parsed from [`crate::config::PATH_MAPPINGS_ENV`] once per process and never
//! mutated afterwards. The process-wide instance lives in a `static` and is
//! never freed; process exit reclaims it.

use crate::config::ShimConfig;
use serde::Serialize;
use std::os::unix::ffi::OsStrExt;
use std::sync::OnceLock;

const ENTRY_SEPARATOR: u8 = b';';
const PAIR_SEPARATOR: u8 = b':';

/// A single `source:target` rule
///
/// Paths starting with `source` are tried with that prefix replaced by
/// `target` before falling back to the unmodified path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathMapping {
    source: Vec<u8>,
    target: Vec<u8>,
}

impl PathMapping {
    pub fn new(source: impl Into<Vec<u8>>, target: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
    pub fn source(&self) -> &[u8] {
        &self.source
    }
    pub fn target(&self) -> &[u8] {
        &self.target
    }
}

/// Ordered, immutable list of mappings; matching is first-match-wins
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingTable(Vec<PathMapping>);

impl MappingTable {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        Self(mappings)
    }

    /// Parse a mapping variable value, dropping malformed segments
    pub fn parse(value: impl AsRef<[u8]>) -> Self {
        ParsedMappings::parse(value).table
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, PathMapping> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a MappingTable {
    type Item = &'a PathMapping;
    type IntoIter = std::slice::Iter<'a, PathMapping>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Result of one parse pass: the table plus every segment that was dropped
#[derive(Clone, Debug, Default)]
pub struct ParsedMappings {
    pub table: MappingTable,
    pub skipped: Vec<Vec<u8>>,
}

impl ParsedMappings {
    pub fn parse(value: impl AsRef<[u8]>) -> Self {
        let mut mappings = Vec::new();
        let mut skipped = Vec::new();
        for segment in value.as_ref().split(|b| *b == ENTRY_SEPARATOR) {
            if segment.is_empty() {
                continue;
            }
            match segment.iter().position(|b| *b == PAIR_SEPARATOR) {
                Some(colon) if colon > 0 => {
                    mappings.push(PathMapping::new(&segment[..colon], &segment[colon + 1..]));
                }
                _ => {
                    tracing::trace!(
                        "skipping malformed path mapping: {}",
                        String::from_utf8_lossy(segment)
                    );
                    skipped.push(segment.to_vec());
                }
            }
        }
        Self {
            table: MappingTable(mappings),
            skipped,
        }
    }

    /// JSON-friendly view used by the inspection API
    pub fn describe(&self) -> MappingsDescription {
        let lossy = |v: &[u8]| String::from_utf8_lossy(v).into_owned();
        MappingsDescription {
            mappings: self
                .table
                .iter()
                .map(|m| MappingEntry {
                    source: lossy(m.source()),
                    target: lossy(m.target()),
                })
                .collect(),
            skipped: self.skipped.iter().map(|s| lossy(s)).collect(),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct MappingEntry {
    pub source: String,
    pub target: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct MappingsDescription {
    pub mappings: Vec<MappingEntry>,
    pub skipped: Vec<String>,
}

/// Exactly-once holder for a [`MappingTable`]
pub struct MappingStore {
    table: OnceLock<MappingTable>,
}

impl MappingStore {
    pub const fn new() -> Self {
        Self {
            table: OnceLock::new(),
        }
    }

    /// Return the table, building it with `source` on first use
    ///
    /// Concurrent first calls block until a single build completes, so no
    /// caller observes a partially built table.
    pub fn get_or_load<F, V>(&self, source: F) -> &MappingTable
    where
        F: FnOnce() -> Option<V>,
        V: AsRef<[u8]>,
    {
        self.table.get_or_init(|| match source() {
            Some(value) => {
                let parsed = ParsedMappings::parse(value);
                tracing::debug!(
                    "loaded {} path mappings ({} skipped)",
                    parsed.table.len(),
                    parsed.skipped.len()
                );
                parsed.table
            }
            None => MappingTable::default(),
        })
    }

    pub fn get(&self) -> Option<&MappingTable> {
        self.table.get()
    }
}

impl Default for MappingStore {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: MappingStore = MappingStore::new();

/// Process-wide table, loaded from the environment on first use
pub fn global() -> &'static MappingTable {
    GLOBAL.get_or_load(|| {
        ShimConfig::from_env()
            .path_mappings()
            .map(|v| v.as_bytes().to_vec())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn parses_entries_in_order() {
        let table = MappingTable::parse("/usr/share:/b/usr/share;/etc:/b/etc;");
        assert_eq!(
            table,
            MappingTable::new(vec![
                PathMapping::new("/usr/share", "/b/usr/share"),
                PathMapping::new("/etc", "/b/etc"),
            ])
        );
    }

    #[test]
    fn accepts_last_entry_without_separator() {
        let table = MappingTable::parse("/opt/app:/b/opt/app");
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().next().unwrap().target(), b"/b/opt/app");

        let table = MappingTable::parse("/a:/x;/c:/y");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn malformed_entry_does_not_affect_neighbours() {
        let parsed = ParsedMappings::parse("/a:/x;badentry;/c:/y;");
        assert_eq!(
            parsed.table,
            MappingTable::new(vec![PathMapping::new("/a", "/x"), PathMapping::new("/c", "/y")])
        );
        assert_eq!(parsed.skipped, vec![b"badentry".to_vec()]);
    }

    #[test]
    fn empty_source_is_dropped() {
        let parsed = ParsedMappings::parse(":/x;/a:/y");
        assert_eq!(parsed.table.len(), 1);
        assert_eq!(parsed.skipped, vec![b":/x".to_vec()]);
    }

    #[test]
    fn target_keeps_everything_after_first_colon() {
        let table = MappingTable::parse("/a:/x:y;");
        assert_eq!(table.iter().next().unwrap().target(), b"/x:y");
    }

    #[test]
    fn empty_value_gives_empty_table() {
        assert!(MappingTable::parse("").is_empty());
        assert!(MappingTable::parse(";;").is_empty());
    }

    #[test]
    fn describe_reports_skipped_segments() {
        let desc = ParsedMappings::parse("/a:/x;nope").describe();
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["mappings"][0]["source"], "/a");
        assert_eq!(json["mappings"][0]["target"], "/x");
        assert_eq!(json["skipped"][0], "nope");
    }

    #[test]
    fn store_loads_once_under_contention() {
        let store = Arc::new(MappingStore::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let loads = Arc::clone(&loads);
                thread::spawn(move || {
                    store
                        .get_or_load(|| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Some("/a:/x;/b:/y;")
                        })
                        .len()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 2);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let again = store.get_or_load(|| Some("/c:/z;"));
        assert_eq!(
            again,
            &MappingTable::new(vec![PathMapping::new("/a", "/x"), PathMapping::new("/b", "/y")])
        );
    }

    #[test]
    fn store_without_source_is_empty() {
        let store = MappingStore::new();
        assert!(store.get().is_none());
        assert!(store.get_or_load(|| None::<&str>).is_empty());
        assert!(store.get().is_some());
    }
}
