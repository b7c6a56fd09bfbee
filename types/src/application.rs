//! The application signature table (`protolist.csv`).
//!
//! One row per application the external DPI engine can recognize. The
//! `APPLICATION` value in a classifier reply is an opaque identifier that is
//! looked up in this table to derive a human-readable name, category,
//! productivity and risk score.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A single row of `protolist.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub guid: String,
    pub index: u32,
    pub name: String,
    pub description: String,
    pub category: String,
    pub productivity: u32,
    pub risk: u32,
    pub flags: u32,
    pub reference: String,
    pub plugin: String,
}

impl Default for Application {
    fn default() -> Self {
        Application {
            guid: String::new(),
            index: 0,
            name: String::new(),
            description: String::new(),
            category: String::new(),
            productivity: 0,
            risk: 0,
            flags: 0,
            reference: String::new(),
            plugin: String::new(),
        }
    }
}

/// Lookup table from application `guid` to its [`Application`] record.
#[derive(Debug, Default)]
pub struct ApplicationTable {
    by_guid: HashMap<String, Application>,
}

impl ApplicationTable {
    pub fn lookup(&self, guid: &str) -> Option<&Application> {
        self.by_guid.get(guid)
    }

    pub fn len(&self) -> usize {
        self.by_guid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_guid.is_empty()
    }
}

const EXPECTED_FIELDS: usize = 10;

/// Loads the application table from a CSV file.
///
/// The first row is a header/comment and is always skipped. Rows whose
/// field count is not exactly [`EXPECTED_FIELDS`] are logged at warning and
/// skipped entirely; a numeric field that fails to parse is logged at
/// warning and left at its default (zero), the rest of the row is kept.
pub fn load_protolist<P: AsRef<Path>>(path: P) -> std::io::Result<ApplicationTable> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut table = ApplicationTable::default();
    for (line_no, record) in reader.records().enumerate() {
        if line_no == 0 {
            // header/comment row
            continue;
        }
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                log::warn!("protolist.csv: malformed row {}: {}", line_no, e);
                continue;
            }
        };
        if record.len() != EXPECTED_FIELDS {
            log::warn!(
                "protolist.csv: row {} has {} fields, expected {}; skipping",
                line_no,
                record.len(),
                EXPECTED_FIELDS
            );
            continue;
        }
        let app = parse_row(line_no, &record);
        table.by_guid.insert(app.guid.clone(), app);
    }
    Ok(table)
}

fn parse_row(line_no: usize, record: &csv::StringRecord) -> Application {
    let field = |i: usize| record.get(i).unwrap_or("").to_string();
    let numeric = |i: usize, name: &str| -> u32 {
        let raw = record.get(i).unwrap_or("");
        raw.trim().parse::<u32>().unwrap_or_else(|_| {
            log::warn!(
                "protolist.csv: row {} field '{}' ('{}') is not numeric, defaulting to 0",
                line_no,
                name,
                raw
            );
            0
        })
    };

    Application {
        guid: field(0),
        index: numeric(1, "index"),
        name: field(2),
        description: field(3),
        category: field(4),
        productivity: numeric(5, "productivity"),
        risk: numeric(6, "risk"),
        flags: numeric(7, "flags"),
        reference: field(8),
        plugin: field(9),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn skips_header_and_parses_rows() {
        let csv = "guid,index,name,description,category,productivity,risk,flags,reference,plugin\n\
                   0x1a,1,HTTP,Hypertext,Web,3,1,0,http://example,http\n";
        let f = write_fixture(csv);
        let table = load_protolist(f.path()).unwrap();
        assert_eq!(table.len(), 1);
        let app = table.lookup("0x1a").unwrap();
        assert_eq!(app.name, "HTTP");
        assert_eq!(app.productivity, 3);
    }

    #[test]
    fn skips_rows_with_wrong_field_count() {
        let csv = "header\n0x1a,1,HTTP\n0x1b,2,DNS,d,c,1,1,0,r,p\n";
        let f = write_fixture(csv);
        let table = load_protolist(f.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.lookup("0x1a").is_none());
        assert!(table.lookup("0x1b").is_some());
    }

    #[test]
    fn numeric_parse_failure_defaults_to_zero() {
        let csv = "header\n0x1a,not_a_number,HTTP,d,c,bad,1,0,r,p\n";
        let f = write_fixture(csv);
        let table = load_protolist(f.path()).unwrap();
        let app = table.lookup("0x1a").unwrap();
        assert_eq!(app.index, 0);
        assert_eq!(app.productivity, 0);
        assert_eq!(app.risk, 1);
    }
}
