//! Invoice discovery.
//!
//! A [`Scanner`] owns the compiled key pattern. [`Scanner::scan`] returns a
//! [`Scan`]: a finite sequence that re-reads the folder every time it is
//! iterated, one glob per eligible extension.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};

use crate::context::Context;
use crate::error::Error;

/// Extensions considered for dispatch, in scan order.
pub const ELIGIBLE_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "odt", "rtf", "xls", "xlsx", "xlsm", "ods",
];

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A file whose name matched the key pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceCandidate {
    pub path: PathBuf,
    pub key: String,
}

impl InvoiceCandidate {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Scanner {
    pattern: Regex,
}

impl Scanner {
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self, Error> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self { pattern })
    }

    /// Leftmost match of the pattern within `file_name`.
    pub fn extract_key(&self, file_name: &str) -> Option<String> {
        self.pattern.find(file_name).map(|m| m.as_str().to_string())
    }

    /// Prepare a scan of `folder` (non-recursive).
    ///
    /// A missing folder yields an empty sequence; the condition is reported to
    /// `ctx` as a warning and exposed via [`Scan::folder_missing`].
    pub fn scan(&self, folder: impl AsRef<Path>, ctx: &Context) -> Scan {
        let folder = folder.as_ref().to_path_buf();
        if !folder.is_dir() {
            ctx.warning(format!("folder not found: {}", folder.display()));
        }

        Scan {
            folder,
            scanner: self.clone(),
            ctx: ctx.clone(),
        }
    }
}

/// Entries of one extension class. An `Err` entry abandons the class.
type ClassEntries = Box<dyn Iterator<Item = Result<PathBuf, String>> + Send>;

/// Opens one extension class of a folder.
type OpenClass = fn(&Path, &'static str) -> Result<ClassEntries, String>;

/// Restartable sequence of [`InvoiceCandidate`]s for one folder.
#[derive(Debug, Clone)]
pub struct Scan {
    folder: PathBuf,
    scanner: Scanner,
    ctx: Context,
}

impl Scan {
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Checked against the filesystem on every call.
    pub fn folder_missing(&self) -> bool {
        !self.folder.is_dir()
    }

    /// Start a fresh enumeration of the folder.
    pub fn iter(&self) -> ScanIter<'_> {
        self.iter_with(glob_class)
    }

    pub fn collect_vec(&self) -> Vec<InvoiceCandidate> {
        self.iter().collect()
    }

    fn iter_with(&self, open: OpenClass) -> ScanIter<'_> {
        ScanIter {
            scan: self,
            folder_missing: self.folder_missing(),
            classes: ELIGIBLE_EXTENSIONS.iter(),
            current: None,
            open,
        }
    }
}

fn glob_class(folder: &Path, extension: &'static str) -> Result<ClassEntries, String> {
    let folder = folder
        .to_str()
        .ok_or("folder path is not valid UTF-8")?;
    let pattern = format!("{}/*.{}", Pattern::escape(folder), extension);
    let paths = glob::glob_with(&pattern, GLOB_OPTIONS).map_err(|e| e.to_string())?;
    Ok(Box::new(paths.map(|entry| entry.map_err(|e| e.to_string()))))
}

impl<'a> IntoIterator for &'a Scan {
    type Item = InvoiceCandidate;
    type IntoIter = ScanIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ScanIter<'a> {
    scan: &'a Scan,
    folder_missing: bool,
    classes: std::slice::Iter<'static, &'static str>,
    current: Option<(&'static str, ClassEntries)>,
    open: OpenClass,
}

impl ScanIter<'_> {
    fn open_next_class(&mut self) -> Option<()> {
        let extension = *self.classes.next()?;
        match (self.open)(&self.scan.folder, extension) {
            Ok(entries) => self.current = Some((extension, entries)),
            Err(err) => self.scan.ctx.warning(format!(
                "skipping *.{extension} in {}: {err}",
                self.scan.folder.display()
            )),
        }
        Some(())
    }
}

impl Iterator for ScanIter<'_> {
    type Item = InvoiceCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        if self.folder_missing {
            return None;
        }

        loop {
            let Some((extension, entries)) = self.current.as_mut() else {
                self.open_next_class()?;
                continue;
            };
            let extension = *extension;

            match entries.next() {
                Some(Ok(path)) => {
                    if !path.is_file() {
                        continue;
                    }
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if let Some(key) = self.scan.scanner.extract_key(name) {
                        return Some(InvoiceCandidate { path, key });
                    }
                    tracing::debug!(file = name, "no key in file name");
                }
                Some(Err(err)) => {
                    // Abandon this extension class only.
                    self.scan
                        .ctx
                        .warning(format!("stopped scanning *.{extension} files: {err}"));
                    self.current = None;
                }
                None => self.current = None,
            }
        }
    }
}
