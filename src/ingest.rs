//! Ingest session
//!
//! Owns the per-category result tables built from one delivery tree and
//! applies the operator's edits to them. Every change to a row re-renders
//! its Preview so the destination path always follows the other fields.

use std::fmt;
use std::io;
use std::path::Path;
use tracing::{Level, debug, info, span, warn};

use crate::classify::CategoryMatcher;
use crate::config::{RuleCatalog, RuleEntry};
use crate::error::{Error, Result};
use crate::metadata::MetadataBuilder;
use crate::probe::ResolutionSource;
use crate::record::{FieldRecord, FieldValue};
use crate::sequence::{FileSequence, walk_sequences};

/// Approval checkbox column
pub const ENABLE_COLUMN: &str = "Enable";
/// Rendered destination path column
pub const PREVIEW_COLUMN: &str = "Preview";
/// Version column filled by version resolution
pub const VERSION_COLUMN: &str = "Version";

/// One sequence and its editable record
#[derive(Debug, Clone)]
pub struct IngestRow {
    pub fields: FieldRecord,
    pub source: FileSequence,
    /// Approved by the operator; new rows start approved
    pub enabled: bool,
}

impl IngestRow {
    fn new(fields: FieldRecord, source: FileSequence) -> Self {
        Self {
            fields,
            source,
            enabled: true,
        }
    }

    /// Columns whose cell text is empty, ignoring the checkbox and Preview
    pub fn empty_columns<'c>(&self, columns: &'c [String]) -> Vec<&'c str> {
        columns
            .iter()
            .map(String::as_str)
            .filter(|c| *c != ENABLE_COLUMN && *c != PREVIEW_COLUMN)
            .filter(|c| self.fields.text(c).is_empty())
            .collect()
    }
}

/// Rows of a single category
#[derive(Debug, Clone)]
pub struct CategoryTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<IngestRow>,
}

impl CategoryTable {
    fn new(rule: &RuleEntry) -> Self {
        Self {
            name: rule.name.clone(),
            columns: rule.output_columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[IngestRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &FieldRecord> {
        self.rows.iter().map(|r| &r.fields)
    }

    pub fn sources(&self) -> impl Iterator<Item = &FileSequence> {
        self.rows.iter().map(|r| &r.source)
    }

    fn row_mut(&mut self, row: usize) -> Result<&mut IngestRow> {
        let category = &self.name;
        self.rows.get_mut(row).ok_or_else(|| Error::RowOutOfRange {
            category: category.clone(),
            row,
        })
    }
}

/// Result tables of one ingest run, in catalog order
#[derive(Debug, Clone, Default)]
pub struct IngestResultSet {
    tables: Vec<CategoryTable>,
}

impl IngestResultSet {
    /// Empty tables for every category of the catalog
    pub fn new(catalog: &RuleCatalog) -> Self {
        Self {
            tables: catalog.rules().iter().map(CategoryTable::new).collect(),
        }
    }

    pub fn tables(&self) -> &[CategoryTable] {
        &self.tables
    }

    pub fn table(&self, category: &str) -> Result<&CategoryTable> {
        self.tables
            .iter()
            .find(|t| t.name == category)
            .ok_or_else(|| Error::UnknownCategory(category.to_string()))
    }

    fn table_mut(&mut self, category: &str) -> Result<&mut CategoryTable> {
        self.tables
            .iter_mut()
            .find(|t| t.name == category)
            .ok_or_else(|| Error::UnknownCategory(category.to_string()))
    }

    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(CategoryTable::len).sum()
    }
}

/// Counters for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub directories: usize,
    pub sequences: usize,
    pub records: usize,
    /// Sequences the chosen category does not accept
    pub skipped: usize,
    /// Unreadable directories and records that failed to build
    pub failed: usize,
}

impl ScanStats {
    pub fn summary(&self) -> String {
        format!(
            "Directories: {}, Sequences: {}, Records: {}, Skipped: {}, Failed: {}",
            self.directories, self.sequences, self.records, self.skipped, self.failed
        )
    }
}

/// Missing cells of approved rows, grouped per category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    missing: Vec<(String, Vec<String>)>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// `(category, ["Row 1 Shot column", ...])` pairs
    pub fn missing(&self) -> &[(String, Vec<String>)] {
        &self.missing
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (category, messages) in &self.missing {
            writeln!(f, "\n{}:", category)?;
            for message in messages {
                writeln!(f, "    - {}", message)?;
            }
        }
        Ok(())
    }
}

/// Outcome of moving rows between categories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveReport {
    pub moved: usize,
    /// Display names of sequences the target category refused
    pub rejected: Vec<String>,
}

/// One ingest run and the edits applied to its results
pub struct IngestSession<'a> {
    catalog: &'a RuleCatalog,
    builder: MetadataBuilder<'a>,
    results: IngestResultSet,
}

impl<'a> IngestSession<'a> {
    pub fn new(
        catalog: &'a RuleCatalog,
        prober: &'a dyn ResolutionSource,
        server: impl Into<String>,
        show: impl AsRef<str>,
    ) -> Self {
        Self {
            catalog,
            builder: MetadataBuilder::new(catalog, prober, server, show),
            results: IngestResultSet::new(catalog),
        }
    }

    pub fn catalog(&self) -> &'a RuleCatalog {
        self.catalog
    }

    pub fn builder(&self) -> &MetadataBuilder<'a> {
        &self.builder
    }

    pub fn results(&self) -> &IngestResultSet {
        &self.results
    }

    pub fn into_results(self) -> IngestResultSet {
        self.results
    }

    /// Classify and build records for every sequence under `root`
    ///
    /// Replaces any previous results. Unreadable directories and records
    /// that fail to build are logged and counted, never fatal. `progress`
    /// is called after each directory.
    pub fn scan<F>(&mut self, root: &Path, mut progress: F) -> Result<ScanStats>
    where
        F: FnMut(&ScanStats),
    {
        let _span = span!(Level::INFO, "ingest_scan").entered();

        if !root.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Source directory not found: {}", root.display()),
            )));
        }

        info!(?root, "Scanning delivery");
        self.results = IngestResultSet::new(self.catalog);
        let matcher = CategoryMatcher::new(self.catalog);
        let mut stats = ScanStats::default();

        for batch in walk_sequences(root) {
            let sequences = match batch {
                Ok(sequences) => sequences,
                Err(e) => {
                    warn!(error = %e, "Failed to read directory, skipping");
                    stats.failed += 1;
                    continue;
                }
            };
            stats.directories += 1;

            for seq in sequences {
                stats.sequences += 1;
                let classification = matcher.classify(&seq);
                let category = classification.category;

                match self
                    .builder
                    .build(category, &seq, classification.shot_match.as_deref())
                {
                    Ok(Some(fields)) => {
                        self.results
                            .table_mut(&category.name)?
                            .rows
                            .push(IngestRow::new(fields, seq));
                        stats.records += 1;
                    }
                    Ok(None) => {
                        debug!(
                            file = %seq.display_name(),
                            category = %category.name,
                            "Category does not accept extension, skipping"
                        );
                        stats.skipped += 1;
                    }
                    Err(e) => {
                        warn!(
                            file = %seq.display_name(),
                            category = %category.name,
                            error = %e,
                            "Failed to build record, skipping"
                        );
                        stats.failed += 1;
                    }
                }
            }

            progress(&stats);
        }

        info!("{}", stats.summary());
        Ok(stats)
    }

    /// Set one cell and re-render the row's Preview
    ///
    /// Preview itself is derived and cannot be set. The row is left
    /// untouched when rendering fails. Returns the new Preview.
    pub fn edit_cell(
        &mut self,
        category: &str,
        row: usize,
        column: &str,
        value: FieldValue,
    ) -> Result<String> {
        let rule = self.catalog.get(category)?;
        let table = self.results.table_mut(category)?;
        if column == PREVIEW_COLUMN {
            return Err(Error::ReadOnlyColumn {
                category: category.to_string(),
                column: column.to_string(),
            });
        }
        if !table.columns.iter().any(|c| c == column) {
            return Err(Error::UnknownColumn {
                category: category.to_string(),
                column: column.to_string(),
            });
        }
        let entry = table.row_mut(row)?;

        let mut fields = entry.fields.clone();
        fields.set(column, value);
        let preview = self.builder.rederive_preview(rule, &fields)?;
        fields.set(PREVIEW_COLUMN, FieldValue::text(preview.as_str()));
        entry.fields = fields;

        debug!(category, row, column, %preview, "Row edited");
        Ok(preview)
    }

    /// Approve or withdraw a row
    pub fn set_enabled(&mut self, category: &str, row: usize, enabled: bool) -> Result<()> {
        self.results.table_mut(category)?.row_mut(row)?.enabled = enabled;
        Ok(())
    }

    /// Move rows to another category, rebuilding them with its rules
    ///
    /// Rows the target refuses stay where they are. Moved rows are appended
    /// to the target in their original order.
    pub fn move_rows(&mut self, from: &str, rows: &[usize], to: &str) -> Result<MoveReport> {
        let target = self.catalog.get(to)?;
        self.results.table(to)?;

        let mut indices = rows.to_vec();
        indices.sort_unstable();
        indices.dedup();

        let source_table = self.results.table(from)?;
        if let Some(&row) = indices.iter().find(|&&i| i >= source_table.len()) {
            return Err(Error::RowOutOfRange {
                category: from.to_string(),
                row,
            });
        }

        // A configured regex is what enables Scan ID derivation in the target
        let shot_match = target.shot_regex.as_ref().map(|re| re.as_str());

        let mut report = MoveReport::default();
        let mut moved = Vec::new();
        let mut rebuilt = Vec::new();
        for &index in &indices {
            let source = &source_table.rows[index].source;
            match self.builder.build(target, source, shot_match) {
                Ok(Some(fields)) => {
                    rebuilt.push(IngestRow::new(fields, source.clone()));
                    moved.push(index);
                }
                Ok(None) => {
                    debug!(file = %source.display_name(), to, "Target does not accept extension");
                    report.rejected.push(source.display_name());
                }
                Err(e) => {
                    warn!(file = %source.display_name(), to, error = %e, "Failed to rebuild moved row");
                    report.rejected.push(source.display_name());
                }
            }
        }

        let source_table = self.results.table_mut(from)?;
        for &index in moved.iter().rev() {
            source_table.rows.remove(index);
        }

        report.moved = rebuilt.len();
        self.results.table_mut(to)?.rows.extend(rebuilt);

        info!(from, to, moved = report.moved, rejected = report.rejected.len(), "Rows moved");
        Ok(report)
    }

    /// Report empty cells of approved rows
    pub fn validate_rows(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        for table in &self.results.tables {
            let messages: Vec<String> = table
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.enabled)
                .flat_map(|(index, row)| {
                    row.empty_columns(&table.columns)
                        .into_iter()
                        .map(move |column| format!("Row {} {} column", index + 1, column))
                })
                .collect();

            if !messages.is_empty() {
                debug!(category = %table.name, missing = messages.len(), "Rows with empty cells");
                report.missing.push((table.name.clone(), messages));
            }
        }

        report
    }

    /// Fill the Version of every complete approved row from published paths
    ///
    /// Returns the number of rows updated. Rows that fail to resolve keep
    /// their current Version.
    pub fn resolve_versions(&mut self, published: &[String]) -> usize {
        let mut resolved = 0;

        for table in &mut self.results.tables {
            if !table.columns.iter().any(|c| c == VERSION_COLUMN) {
                continue;
            }
            let Ok(rule) = self.catalog.get(&table.name) else {
                continue;
            };

            for (index, row) in table.rows.iter_mut().enumerate() {
                if !row.enabled || !row.empty_columns(&table.columns).is_empty() {
                    continue;
                }

                let updated = self
                    .builder
                    .resolve_version(rule, &row.fields, published)
                    .and_then(|version| {
                        let mut fields = row.fields.clone();
                        fields.set(VERSION_COLUMN, FieldValue::text(version));
                        let preview = self.builder.rederive_preview(rule, &fields)?;
                        fields.set(PREVIEW_COLUMN, FieldValue::text(preview));
                        Ok(fields)
                    });

                match updated {
                    Ok(fields) => {
                        row.fields = fields;
                        resolved += 1;
                    }
                    Err(e) => {
                        warn!(category = %table.name, row = index + 1, error = %e, "Failed to resolve version");
                    }
                }
            }
        }

        info!(resolved, "Versions resolved");
        resolved
    }
}
