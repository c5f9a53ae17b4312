//! Recipient directory: invoice key → email address.
//!
//! Loaded from a comma separated text file or a spreadsheet. Loading never
//! fails outright; a broken source produces an empty directory and an error
//! diagnostic, and individual bad rows are skipped with a warning.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};

use crate::context::Context;
use crate::error::ErrorKind;

pub const KEY_COLUMN: &str = "InvoiceKey";
pub const EMAIL_COLUMN: &str = "Email";

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];
const KEY_MARKERS: &[&str] = &["key", "invoice", "id"];
const ADDRESS_MARKERS: &[&str] = &["email", "mail", "address"];

#[derive(Debug, thiserror::Error)]
enum DirectoryError {
    #[error("recipients file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl DirectoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unreadable { .. } | Self::Parse { .. } => ErrorKind::ParseError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Delimited,
    Spreadsheet,
}

impl SourceFormat {
    fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
            Self::Spreadsheet
        } else {
            Self::Delimited
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    entries: HashMap<String, String>,
}

impl RecipientDirectory {
    /// Load from `path`, using the first worksheet for spreadsheets.
    pub fn load(path: impl AsRef<Path>, ctx: &Context) -> Self {
        Self::load_from_sheet(path, None, ctx)
    }

    /// Load from `path`, reading the named worksheet for spreadsheets.
    pub fn load_from_sheet(path: impl AsRef<Path>, sheet: Option<&str>, ctx: &Context) -> Self {
        let path = path.as_ref();
        let mut ingest = Ingest::new(ctx);

        let loaded = if !path.is_file() {
            Err(DirectoryError::NotFound(path.to_path_buf()))
        } else {
            match SourceFormat::from_path(path) {
                SourceFormat::Delimited => read_delimited(path, &mut ingest),
                SourceFormat::Spreadsheet => read_spreadsheet(path, sheet, &mut ingest),
            }
        };

        match loaded {
            Ok(()) => {
                ctx.info(format!(
                    "loaded {} recipient(s) from {}",
                    ingest.entries.len(),
                    path.display()
                ));
                Self {
                    entries: ingest.entries,
                }
            }
            Err(err) => {
                ctx.error(format!("{err} ({})", err.kind()));
                Self::default()
            }
        }
    }

    /// Build a directory directly; later pairs overwrite earlier ones.
    pub fn from_entries<K, A>(entries: impl IntoIterator<Item = (K, A)>) -> Self
    where
        K: Into<String>,
        A: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, a)| (k.into(), a.into()))
                .collect(),
        }
    }

    /// Resolve `key`, logging the hit or miss.
    pub fn lookup(&self, key: &str, ctx: &Context) -> Option<&str> {
        match self.entries.get(key.trim()) {
            Some(address) => {
                ctx.info(format!("{key} → {address}"));
                Some(address.as_str())
            }
            None => {
                ctx.warning(format!("no recipient found for {key}"));
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by key.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(k, a)| (k.as_str(), a.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }
}

/// Row sink applying the rejection and duplicate rules shared by both formats.
struct Ingest<'a> {
    entries: HashMap<String, String>,
    warned: HashSet<String>,
    ctx: &'a Context,
}

impl<'a> Ingest<'a> {
    fn new(ctx: &'a Context) -> Self {
        Self {
            entries: HashMap::new(),
            warned: HashSet::new(),
            ctx,
        }
    }

    fn push(&mut self, row: u64, key: &str, address: &str) {
        let (key, address) = (key.trim(), address.trim());
        if key.is_empty() || address.is_empty() {
            self.ctx
                .warning(format!("row {row}: empty key or email, skipped"));
            return;
        }

        let previous = self.entries.insert(key.to_string(), address.to_string());
        if previous.is_some() && self.warned.insert(key.to_string()) {
            self.ctx.warning(format!(
                "row {row}: duplicate key {key}, the last entry wins"
            ));
        }
    }

    fn reject(&self, row: u64, reason: &str) {
        self.ctx.warning(format!("row {row}: {reason}, skipped"));
    }
}

fn read_delimited(path: &Path, ingest: &mut Ingest<'_>) -> Result<(), DirectoryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DirectoryError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut first = true;
    for (index, record) in reader.records().enumerate() {
        let fallback_line = index as u64 + 1;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                if let csv::ErrorKind::Io(io) = err.kind() {
                    return Err(DirectoryError::Unreadable {
                        path: path.to_path_buf(),
                        message: io.to_string(),
                    });
                }
                let line = err
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(fallback_line);
                ingest.reject(line, &err.to_string());
                continue;
            }
        };

        let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
        if record.iter().all(str::is_empty) {
            continue;
        }

        if std::mem::take(&mut first) && looks_like_header(&record) {
            tracing::debug!(line, "skipping header line");
            continue;
        }

        if record.len() < 2 {
            ingest.reject(line, "expected at least two fields");
            continue;
        }

        ingest.push(line, &record[0], &record[1]);
    }

    Ok(())
}

fn looks_like_header(record: &csv::StringRecord) -> bool {
    let (Some(key), Some(address)) = (record.get(0), record.get(1)) else {
        return false;
    };
    let (key, address) = (key.to_ascii_lowercase(), address.to_ascii_lowercase());

    !address.contains('@')
        && KEY_MARKERS.iter().any(|m| key.contains(m))
        && ADDRESS_MARKERS.iter().any(|m| address.contains(m))
}

fn read_spreadsheet(
    path: &Path,
    sheet: Option<&str>,
    ingest: &mut Ingest<'_>,
) -> Result<(), DirectoryError> {
    let parse_error = |message: String| DirectoryError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| DirectoryError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let range = match sheet {
        Some(name) => {
            if !workbook.sheet_names().iter().any(|s| s == name) {
                return Err(parse_error(format!("worksheet '{name}' not found")));
            }
            workbook
                .worksheet_range(name)
                .map_err(|e| parse_error(e.to_string()))?
        }
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| parse_error("workbook has no worksheets".to_string()))?
            .map_err(|e| parse_error(e.to_string()))?,
    };

    ingest_range(&range, ingest).map_err(parse_error)
}

/// Read rows below the first populated row, locating the key and email columns
/// by header name.
fn ingest_range(range: &Range<Data>, ingest: &mut Ingest<'_>) -> Result<(), String> {
    let first_row = range.start().map(|(row, _)| row as u64).unwrap_or(0);
    let mut rows = range.rows().enumerate();

    let header = rows
        .by_ref()
        .map(|(_, row)| row)
        .find(|row| row.iter().any(|cell| !cell_text(cell).is_empty()))
        .ok_or_else(|| "worksheet is empty".to_string())?;

    let column = |name: &str| {
        header
            .iter()
            .position(|cell| cell_text(cell).eq_ignore_ascii_case(name))
    };
    let (Some(key_col), Some(email_col)) = (column(KEY_COLUMN), column(EMAIL_COLUMN)) else {
        return Err(format!(
            "header must contain '{KEY_COLUMN}' and '{EMAIL_COLUMN}' columns"
        ));
    };

    for (index, row) in rows {
        if row.iter().all(|cell| cell_text(cell).is_empty()) {
            continue;
        }
        let text = |col: usize| row.get(col).map(cell_text).unwrap_or_default();
        ingest.push(first_row + index as u64 + 1, &text(key_col), &text(email_col));
    }

    Ok(())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Level, MemorySink};
    use rust_xlsxwriter::{Workbook, Worksheet};
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn recording() -> (Context, MemorySink) {
        let sink = MemorySink::new();
        (Context::new(sink.clone()), sink)
    }

    #[test]
    fn last_duplicate_wins_with_one_warning() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "r.csv", "INV1,a@x.com\nINV2,c@x.com\nINV1,b@x.com\n");
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load(&path, &ctx);

        assert_eq!(directory.lookup("INV1", &ctx), Some("b@x.com"));
        let duplicates: Vec<_> = sink
            .messages(Level::Warning)
            .into_iter()
            .filter(|m| m.contains("duplicate"))
            .collect();
        assert_eq!(duplicates.len(), 1);
    }

    #[test]
    fn repeated_duplicates_warn_once_per_key() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "r.csv",
            "INV1,a@x.com\nINV1,b@x.com\nINV1,c@x.com\nINV2,d@x.com\nINV2,e@x.com\n",
        );
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load(&path, &ctx);

        assert_eq!(directory.entries(), vec![("INV1", "c@x.com"), ("INV2", "e@x.com")]);
        assert_eq!(sink.count(Level::Warning), 2);
    }

    #[test]
    fn header_line_is_skipped_only_when_it_looks_like_one() {
        let dir = TempDir::new().unwrap();
        let with_header = write(&dir, "a.csv", "InvoiceKey,Email\nINV1,a@x.com\n");
        let without = write(&dir, "b.csv", "INVOICE-9,billing@mail.com\nINV1,a@x.com\n");
        let ctx = Context::default();

        let a = RecipientDirectory::load(&with_header, &ctx);
        let b = RecipientDirectory::load(&without, &ctx);

        assert_eq!(a.len(), 1);
        assert_eq!(b.lookup("INVOICE-9", &ctx), Some("billing@mail.com"));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn bad_rows_are_rejected_without_aborting() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "r.csv",
            "\nINV1,a@x.com\nINV2\n,b@x.com\nINV3,\nINV4, d@x.com ,extra\n",
        );
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load(&path, &ctx);

        assert_eq!(directory.entries(), vec![("INV1", "a@x.com"), ("INV4", "d@x.com")]);
        assert_eq!(sink.count(Level::Warning), 3);
        assert_eq!(sink.count(Level::Error), 0);
    }

    #[test]
    fn missing_file_yields_empty_directory() {
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load("/nonexistent/recipients.csv", &ctx);

        assert!(directory.is_empty());
        assert_eq!(sink.count(Level::Error), 1);
        assert_eq!(directory.lookup("INV1", &ctx), None);
    }

    #[test]
    fn unreadable_spreadsheet_yields_empty_directory() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "r.xlsx", "this is not a workbook");
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load(&path, &ctx);

        assert!(directory.is_empty());
        assert_eq!(sink.count(Level::Error), 1);
    }

    #[test]
    fn lookup_logs_hits_and_misses() {
        let directory = RecipientDirectory::from_entries([("INV1", "a@x.com")]);
        let (ctx, sink) = recording();

        assert_eq!(directory.lookup(" INV1 ", &ctx), Some("a@x.com"));
        assert_eq!(directory.lookup("INV2", &ctx), None);

        assert_eq!(sink.count(Level::Info), 1);
        assert_eq!(sink.count(Level::Warning), 1);
    }

    fn sheet(rows: &[&[Data]]) -> Range<Data> {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1) as u32;
        let mut range = Range::new((0, 0), (rows.len() as u32 - 1, width - 1));
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), cell.clone());
            }
        }
        range
    }

    fn s(value: &str) -> Data {
        Data::String(value.to_string())
    }

    #[test]
    fn spreadsheet_columns_are_located_by_name() {
        let range = sheet(&[
            &[Data::Empty, Data::Empty, Data::Empty],
            &[s("Customer"), s("email"), s("INVOICEKEY")],
            &[s("Acme"), s("a@x.com"), s("INV1")],
            &[s("Globex"), s("g@x.com"), Data::Float(1002.0)],
            &[s("Nobody"), Data::Empty, s("INV3")],
        ]);
        let (ctx, sink) = recording();
        let mut ingest = Ingest::new(&ctx);

        ingest_range(&range, &mut ingest).unwrap();

        assert_eq!(ingest.entries.get("INV1").map(String::as_str), Some("a@x.com"));
        assert_eq!(ingest.entries.get("1002").map(String::as_str), Some("g@x.com"));
        assert_eq!(ingest.entries.len(), 2);
        assert_eq!(sink.count(Level::Warning), 1);
    }

    #[test]
    fn spreadsheet_without_required_headers_fails() {
        let range = sheet(&[&[s("Key"), s("Address")], &[s("INV1"), s("a@x.com")]]);
        let ctx = Context::default();
        let mut ingest = Ingest::new(&ctx);

        let err = ingest_range(&range, &mut ingest).unwrap_err();

        assert!(err.contains("InvoiceKey"));
        assert!(ingest.entries.is_empty());
    }

    fn xlsx(dir: &TempDir, build: impl FnOnce(&mut Workbook)) -> PathBuf {
        let mut workbook = Workbook::new();
        build(&mut workbook);
        let path = dir.path().join("recipients.xlsx");
        workbook.save(&path).unwrap();
        path
    }

    fn fill(sheet: &mut Worksheet, rows: &[&[&str]]) {
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate().filter(|(_, v)| !v.is_empty()) {
                sheet.write_string(r as u32, c as u16, *value).unwrap();
            }
        }
    }

    fn two_sheet_workbook(dir: &TempDir) -> PathBuf {
        xlsx(dir, |workbook| {
            let clients = workbook.add_worksheet().set_name("Clients").unwrap();
            fill(
                clients,
                &[
                    &["Customer", "Email", "InvoiceKey"],
                    &["Acme", "a@x.com", "INV1"],
                    &["Globex", "g@x.com", ""],
                ],
            );
            clients.write_number(2, 2, 1002.0).unwrap();

            let archive = workbook.add_worksheet().set_name("Archive").unwrap();
            fill(archive, &[&["InvoiceKey", "Email"], &["INV1", "old@x.com"]]);
        })
    }

    #[test]
    fn spreadsheet_file_reads_first_sheet_by_default() {
        let dir = TempDir::new().unwrap();
        let path = two_sheet_workbook(&dir);
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load_from_sheet(&path, None, &ctx);

        assert_eq!(directory.entries(), vec![("1002", "g@x.com"), ("INV1", "a@x.com")]);
        assert_eq!(sink.count(Level::Error), 0);
    }

    #[test]
    fn spreadsheet_file_reads_named_sheet() {
        let dir = TempDir::new().unwrap();
        let path = two_sheet_workbook(&dir);
        let ctx = Context::default();

        let directory = RecipientDirectory::load_from_sheet(&path, Some("Archive"), &ctx);

        assert_eq!(directory.entries(), vec![("INV1", "old@x.com")]);
    }

    #[test]
    fn missing_named_sheet_yields_empty_directory() {
        let dir = TempDir::new().unwrap();
        let path = two_sheet_workbook(&dir);
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load_from_sheet(&path, Some("Invoices"), &ctx);

        assert!(directory.is_empty());
        let errors = sink.messages(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("worksheet 'Invoices' not found"));
    }

    #[test]
    fn spreadsheet_file_without_required_columns_yields_empty_directory() {
        let dir = TempDir::new().unwrap();
        let path = xlsx(&dir, |workbook| {
            let sheet = workbook.add_worksheet();
            fill(sheet, &[&["Key", "Address"], &["INV1", "a@x.com"]]);
        });
        let (ctx, sink) = recording();

        let directory = RecipientDirectory::load_from_sheet(&path, None, &ctx);

        assert!(directory.is_empty());
        let errors = sink.messages(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'InvoiceKey' and 'Email'"));
    }
}
