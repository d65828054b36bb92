//! One-shot bulk static data iterators.
//!
//! A partition reads its static records once, before it processes any
//! message. Every partition may read the same source; the evaluator keeps the
//! records located in its own cells.

use crate::error::{MessageError, StaticLoadError};
use crate::messages::DataObjectMessage;
use crate::types::DataObject;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

pub type StaticRecords<'a> =
    Box<dyn Iterator<Item = Result<DataObject, StaticLoadError>> + Send + 'a>;

pub trait StaticDataSource: Send + Sync {
    /// Opens a fresh pass over every record.
    fn records(&self) -> Result<StaticRecords<'_>, StaticLoadError>;
}

/// JSON lines file of data object messages. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_record(line: &str) -> Result<DataObject, MessageError> {
    let message: DataObjectMessage = serde_json::from_str(line)?;
    DataObject::try_from(message)
}

impl StaticDataSource for JsonLinesSource {
    fn records(&self) -> Result<StaticRecords<'_>, StaticLoadError> {
        let file = File::open(&self.path)?;
        debug!("Reading static data from {}", self.path.display());

        let records = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_number = index + 1;
                match line {
                    Err(e) => Some(Err(StaticLoadError::Io(e))),
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(parse_record(&line).map_err(|source| StaticLoadError::Record {
                        line: line_number,
                        source,
                    })),
                }
            });
        Ok(Box::new(records))
    }
}

/// Static records held in memory.
impl StaticDataSource for Vec<DataObject> {
    fn records(&self) -> Result<StaticRecords<'_>, StaticLoadError> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Command, Point, TokenSet};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn json_lines_are_parsed_in_order() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"objectId":"p1","x":1.0,"y":2.0,"text":"Pizza Place","timestamp":1,"command":"add","sourceId":"pois"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"objectId":"p2","x":3.0,"y":4.0,"text":["bar"],"command":"add","sourceId":"pois"}}"#
        )
        .unwrap();

        let source = JsonLinesSource::new(file.path());
        let objects: Vec<_> = source.records().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].object_id.as_str(), "p1");
        assert!(objects[0].text.contains("pizza"));
        assert_eq!(objects[1].location, Point::new(3.0, 4.0));
    }

    #[test]
    fn bad_record_reports_its_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"objectId":"p1","x":1.0,"y":2.0,"command":"add","sourceId":"pois"}}"#
        )
        .unwrap();
        writeln!(file, "not json").unwrap();

        let source = JsonLinesSource::new(file.path());
        let results: Vec<_> = source.records().unwrap().collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StaticLoadError::Record { line: 2, .. })));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonLinesSource::new(dir.path().join("absent.jsonl"));
        assert!(matches!(source.records(), Err(StaticLoadError::Io(_))));
    }

    #[test]
    fn in_memory_records_are_replayable() {
        let records = vec![DataObject::new(
            "p1",
            Point::new(0.0, 0.0),
            TokenSet::new(),
            0,
            Command::Add,
            "pois",
        )];
        assert_eq!(records.records().unwrap().count(), 1);
        assert_eq!(records.records().unwrap().count(), 1);
    }
}
