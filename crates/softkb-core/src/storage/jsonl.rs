//! JSON Lines dump reading
//!
//! Source harvesters deliver their records as JSON Lines files, one JSON
//! object per line. Dumps are laid out per source and collection:
//!
//! ```text
//! <dump_dir>/
//! ├── wikidata/software.jsonl
//! ├── rOpenSci/packages.jsonl
//! ├── CRAN/packages.jsonl
//! └── mentions/
//!     ├── documents.jsonl
//!     ├── annotations.jsonl
//!     └── references.jsonl
//! ```

use serde_json::Value as Json;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Description of one dump file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpSpec {
    pub source: &'static str,
    pub collection: &'static str,
    /// JSON pointers tried in order to find the record key
    pub key_pointers: &'static [&'static str],
    /// JSON pointer to the key of the parent record, if any
    pub parent_pointer: Option<&'static str>,
}

impl DumpSpec {
    /// Path of the dump file under `dump_dir`
    pub fn path(&self, dump_dir: &Path) -> PathBuf {
        dump_dir.join(self.source).join(format!("{}.jsonl", self.collection))
    }

    /// Key of a record, the first pointer resolving to a string or number
    pub fn record_key(&self, record: &Json) -> Option<String> {
        self.key_pointers
            .iter()
            .find_map(|pointer| record.pointer(pointer).and_then(scalar_text))
    }

    pub fn parent_key(&self, record: &Json) -> Option<String> {
        self.parent_pointer
            .and_then(|pointer| record.pointer(pointer))
            .and_then(scalar_text)
    }
}

/// Dump files the pipeline knows how to load, in load order
pub const KNOWN_DUMPS: &[DumpSpec] = &[
    DumpSpec {
        source: "wikidata",
        collection: "software",
        key_pointers: &["/id", "/_key"],
        parent_pointer: None,
    },
    DumpSpec {
        source: "rOpenSci",
        collection: "packages",
        key_pointers: &["/_key", "/_id/$oid", "/Package"],
        parent_pointer: None,
    },
    DumpSpec {
        source: "CRAN",
        collection: "packages",
        key_pointers: &["/_key", "/_id/$oid", "/Package"],
        parent_pointer: None,
    },
    DumpSpec {
        source: "mentions",
        collection: "documents",
        key_pointers: &["/_key", "/_id/$oid"],
        parent_pointer: None,
    },
    DumpSpec {
        source: "mentions",
        collection: "annotations",
        key_pointers: &["/_key", "/_id/$oid"],
        parent_pointer: Some("/document/$oid"),
    },
    DumpSpec {
        source: "mentions",
        collection: "references",
        key_pointers: &["/_key", "/_id/$oid"],
        parent_pointer: None,
    },
];

/// Dump files of one source
pub fn dumps_for(source: &str) -> impl Iterator<Item = &'static DumpSpec> + '_ {
    KNOWN_DUMPS.iter().filter(move |spec| spec.source == source)
}

fn scalar_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) if !s.is_empty() => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One parsed line of a JSON Lines file
#[derive(Debug)]
pub struct JsonLine {
    /// 1-based line number
    pub line: usize,
    pub record: Result<Json>,
}

/// Iterator over the non-empty lines of a JSON Lines file
pub struct JsonlReader<R> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl JsonlReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!("Dump file not found: {}", path.display())));
        }
        let file = File::open(path).map_err(Error::Io)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for JsonlReader<R> {
    type Item = JsonLine;

    fn next(&mut self) -> Option<JsonLine> {
        loop {
            let line = self.lines.next()?;
            self.line += 1;
            let record = match line {
                Ok(text) => {
                    // dumps of JSON arrays leave a trailing comma on each line
                    let text = text.trim().trim_end_matches(',');
                    if text.is_empty() {
                        continue;
                    }
                    serde_json::from_str(text)
                        .map_err(|e| Error::Parse(format!("Invalid JSON: {}", e)))
                }
                Err(e) => Err(Error::Io(e)),
            };
            return Some(JsonLine {
                line: self.line,
                record,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_reader_skips_blank_lines() {
        let input = "{\"a\": 1}\n\n   \n{\"a\": 2},\nnot json\n";
        let lines: Vec<JsonLine> = JsonlReader::new(Cursor::new(input)).collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line, 1);
        assert_eq!(lines[1].line, 4);
        assert_eq!(lines[1].record.as_ref().unwrap()["a"], 2);
        assert_eq!(lines[2].line, 5);
        assert!(matches!(lines[2].record, Err(Error::Parse(_))));
    }

    #[test]
    fn test_record_keys() {
        let annotations = dumps_for("mentions")
            .find(|spec| spec.collection == "annotations")
            .unwrap();
        let record = json!({"_id": {"$oid": "a1"}, "document": {"$oid": "d1"}});
        assert_eq!(annotations.record_key(&record).as_deref(), Some("a1"));
        assert_eq!(annotations.parent_key(&record).as_deref(), Some("d1"));

        let wikidata = dumps_for("wikidata").next().unwrap();
        assert_eq!(wikidata.record_key(&json!({"id": "Q42"})).as_deref(), Some("Q42"));
        assert_eq!(wikidata.record_key(&json!({"labels": "x"})), None);
    }

    #[test]
    fn test_dump_paths() {
        let spec = dumps_for("CRAN").next().unwrap();
        assert_eq!(
            spec.path(Path::new("/data")),
            PathBuf::from("/data/CRAN/packages.jsonl")
        );
        assert_eq!(dumps_for("mentions").count(), 3);
        assert_eq!(dumps_for("pypi").count(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            JsonlReader::open(&dir.path().join("missing.jsonl")),
            Err(Error::NotFound(_))
        ));
    }
}
