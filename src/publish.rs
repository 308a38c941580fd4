//! Publishing approved rows
//!
//! Copies each approved sequence to its Preview destination and hands a
//! publish request plus a transfer request to a [`PublishSink`]. Every row
//! produces an outcome; one failing row never stops the batch.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, debug, info, span, warn};

use crate::error::{Error, Result};
use crate::ingest::{CategoryTable, ENABLE_COLUMN, IngestResultSet, IngestRow, PREVIEW_COLUMN};
use crate::sequence::FileSequence;
use crate::transfer::TransferRequest;

const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Sequence and shot the tracking layer should create before publishing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShotRef {
    pub sequence: String,
    pub shot: String,
}

/// Published-file entry for the tracking system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishRequest {
    pub project: String,
    /// Display code, the published file name
    pub code: String,
    pub sg_filepath: String,
    pub sg_source_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shot: Option<ShotRef>,
}

/// Receives the requests of successfully copied rows
pub trait PublishSink {
    fn submit(&mut self, request: &PublishRequest, transfer: &TransferRequest) -> Result<()>;
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    publish: &'a PublishRequest,
    transfer: &'a TransferRequest,
    arguments: String,
}

/// Appends every request to a JSON-lines manifest
pub struct ManifestSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ManifestSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PublishSink for ManifestSink {
    fn submit(&mut self, request: &PublishRequest, transfer: &TransferRequest) -> Result<()> {
        let entry = ManifestEntry {
            publish: request,
            transfer,
            arguments: transfer.arguments(),
        };
        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Result of publishing one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishStatus {
    Published,
    /// Row has empty or "None" cells
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub category: String,
    /// 1-based row number
    pub row: usize,
    pub source: String,
    pub destination: String,
    pub status: PublishStatus,
    pub error: Option<String>,
}

/// Outcomes of a publish batch, in table order
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub outcomes: Vec<PublishOutcome>,
}

impl PublishReport {
    pub fn published(&self) -> impl Iterator<Item = &PublishOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == PublishStatus::Published)
    }

    pub fn unpublished(&self) -> impl Iterator<Item = &PublishOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != PublishStatus::Published)
    }

    /// Log the published and unpublished destinations
    pub fn log_summary(&self) {
        let published: Vec<&str> = self.published().map(|o| o.destination.as_str()).collect();
        if published.is_empty() {
            info!("Published files: none");
        } else {
            info!(count = published.len(), "Published files:\n{}", published.join("\n"));
        }

        let unpublished: Vec<&str> = self.unpublished().map(|o| o.destination.as_str()).collect();
        if !unpublished.is_empty() {
            warn!(count = unpublished.len(), "Unpublished files:\n{}", unpublished.join("\n"));
        }
    }
}

/// Publishes the approved rows of an ingest run
#[derive(Debug, Clone)]
pub struct Publisher {
    show: String,
    server: String,
    allowlist: String,
    transfer_root: Option<PathBuf>,
    user: String,
    machine: String,
}

impl Publisher {
    /// Create a publisher; the show name is stored uppercased
    pub fn new(show: impl AsRef<str>, server: impl Into<String>, allowlist: impl Into<String>) -> Self {
        Self {
            show: show.as_ref().to_uppercase(),
            server: server.into(),
            allowlist: allowlist.into(),
            transfer_root: None,
            user: String::new(),
            machine: String::new(),
        }
    }

    /// Mirror published paths under this root on the transfer target
    ///
    /// Without a root the transfer destination is the published path itself.
    pub fn with_transfer_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.transfer_root = Some(root.into());
        self
    }

    pub fn with_submitter(mut self, user: impl Into<String>, machine: impl Into<String>) -> Self {
        self.user = user.into();
        self.machine = machine.into();
        self
    }

    /// Publish every approved row of every table
    pub fn publish(&self, results: &IngestResultSet, sink: &mut dyn PublishSink) -> PublishReport {
        let _span = span!(Level::INFO, "publish").entered();
        let mut report = PublishReport::default();

        for table in results.tables() {
            for (index, row) in table.rows().iter().enumerate() {
                if !row.enabled {
                    continue;
                }
                report.outcomes.push(self.publish_row(table, index, row, sink));
            }
        }

        let published = report.published().count();
        info!(
            published,
            unpublished = report.outcomes.len() - published,
            "Publish finished"
        );
        report
    }

    fn publish_row(
        &self,
        table: &CategoryTable,
        index: usize,
        row: &IngestRow,
        sink: &mut dyn PublishSink,
    ) -> PublishOutcome {
        let destination = row.fields.text(PREVIEW_COLUMN);
        let mut outcome = PublishOutcome {
            category: table.name().to_string(),
            row: index + 1,
            source: row.source.to_string(),
            destination: destination.clone(),
            status: PublishStatus::Published,
            error: None,
        };

        let blank: Vec<&str> = table
            .columns()
            .iter()
            .map(String::as_str)
            .filter(|c| *c != ENABLE_COLUMN)
            .filter(|c| row.fields.get(c).is_none_or(|v| v.is_blank()))
            .collect();
        if !blank.is_empty() {
            warn!(category = table.name(), row = index + 1, columns = ?blank, "Row incomplete, not published");
            outcome.status = PublishStatus::Incomplete;
            outcome.error = Some(format!("Empty or None cells: {}", blank.join(", ")));
            return outcome;
        }

        match self.copy_and_submit(row, &destination, sink) {
            Ok(()) => {
                info!(source = %row.source, %destination, "Published");
            }
            Err(e) => {
                warn!(source = %row.source, %destination, error = %e, "Publish failed");
                outcome.status = PublishStatus::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    fn copy_and_submit(&self, row: &IngestRow, destination: &str, sink: &mut dyn PublishSink) -> Result<()> {
        let dest_path = Path::new(destination);
        let file_name = dest_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if row.source.display_name() != file_name {
            return Err(Error::Publish {
                path: dest_path.to_path_buf(),
                message: format!("no source sequence named '{}'", file_name),
            });
        }
        let dest_dir = dest_path.parent().unwrap_or_else(|| Path::new(""));

        copy_sequence(&row.source, dest_dir)?;

        let request = PublishRequest {
            project: self.show.clone(),
            code: file_name.to_string(),
            sg_filepath: destination.to_string(),
            sg_source_path: row.source.to_string(),
            shot: self.shot_ref(row),
        };
        let transfer = TransferRequest::new(destination, self.transfer_destination(dest_path), self.allowlist.as_str())
            .with_submitter(self.user.as_str(), self.machine.as_str());

        // Tracking and farm registration are best-effort
        if let Err(e) = sink.submit(&request, &transfer) {
            warn!(%destination, error = %e, "Failed to submit publish request");
        }
        Ok(())
    }

    fn shot_ref(&self, row: &IngestRow) -> Option<ShotRef> {
        let sequence = row.fields.text("Sequence");
        let shot = row.fields.text("Shot");
        let complete = [self.show.as_str(), self.server.as_str(), sequence.as_str(), shot.as_str()]
            .iter()
            .all(|s| !s.is_empty());
        complete.then_some(ShotRef { sequence, shot })
    }

    fn transfer_destination(&self, published: &Path) -> PathBuf {
        match &self.transfer_root {
            Some(root) => root.join(published.strip_prefix("/").unwrap_or(published)),
            None => published.to_path_buf(),
        }
    }
}

/// Copy every member of a sequence into `dest_dir`, keeping file names
///
/// Nothing is copied when any destination file already exists. If a copy
/// fails partway, the files copied by this call are removed again.
pub fn copy_sequence(seq: &FileSequence, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let pairs: Vec<(PathBuf, PathBuf)> = seq
        .paths()
        .into_iter()
        .filter_map(|source| {
            let dest = dest_dir.join(source.file_name()?);
            Some((source, dest))
        })
        .collect();

    if let Some((_, existing)) = pairs.iter().find(|(_, dest)| dest.exists()) {
        return Err(Error::DestinationExists(existing.clone()));
    }

    fs::create_dir_all(dest_dir)?;

    let mut copied = Vec::with_capacity(pairs.len());
    for (source, dest) in pairs {
        if let Err(e) = copy_file(&source, &dest) {
            for path in &copied {
                if let Err(cleanup) = fs::remove_file(path) {
                    warn!(?path, error = %cleanup, "Failed to remove partially published file");
                }
            }
            return Err(e);
        }
        copied.push(dest);
    }

    debug!(sequence = %seq, ?dest_dir, files = copied.len(), "Copied sequence");
    Ok(copied)
}

/// Copy a single file, refusing to replace an existing destination
///
/// The modification time of the source is carried over.
pub fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let src_file = File::open(source)?;
    let dest_file = match OpenOptions::new().write(true).create_new(true).open(dest) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(Error::DestinationExists(dest.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, src_file);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer);

    if let Ok(mtime) = fs::metadata(source).and_then(|m| m.modified()) {
        filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(mtime))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ANNOTATIONS, MOVS, PLATE, RuleCatalog, UNMATCHED};
    use crate::ingest::IngestSession;
    use crate::probe::{FixedResolution, Resolution};
    use crate::record::FieldValue;
    use crate::sequence::find_sequences_in_dir;
    use tempfile::TempDir;

    const PROBE: FixedResolution = FixedResolution(Resolution::new(1920, 1080));

    #[derive(Default)]
    struct RecordingSink {
        requests: Vec<(PublishRequest, TransferRequest)>,
        fail: bool,
    }

    impl PublishSink for RecordingSink {
        fn submit(&mut self, request: &PublishRequest, transfer: &TransferRequest) -> Result<()> {
            self.requests.push((request.clone(), transfer.clone()));
            if self.fail {
                return Err(Error::Publish {
                    path: transfer.source.clone(),
                    message: "tracking offline".into(),
                });
            }
            Ok(())
        }
    }

    /// Source tree plus a catalog whose destinations live under `dest`
    fn fixture() -> (TempDir, PathBuf, RuleCatalog) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("delivery/SEQ_0010");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("SEQ_0010_ab1_plate.1001.exr"), b"frame1").unwrap();
        fs::write(source.join("SEQ_0010_ab1_plate.1002.exr"), b"frame2").unwrap();
        fs::write(source.join("readme.txt"), b"notes").unwrap();

        let dest = temp_dir.path().join("dest");
        let config = RuleCatalog::sample_config().replace("\"/{server}/", &format!("\"{}/{{server}}/", dest.display()));
        let catalog = RuleCatalog::from_toml_str(&config).unwrap();
        (temp_dir, dest, catalog)
    }

    #[test]
    fn test_publish_copies_and_submits() {
        let (temp_dir, dest, catalog) = fixture();
        let mut session = IngestSession::new(&catalog, &PROBE, "studio", "demo");
        session.scan(&temp_dir.path().join("delivery"), |_| {}).unwrap();
        session.set_enabled(UNMATCHED, 0, false).unwrap();

        let publisher = Publisher::new("demo", "studio", "blade01")
            .with_transfer_root("/remote")
            .with_submitter("artist", "ws042");
        let mut sink = RecordingSink::default();
        let report = publisher.publish(session.results(), &mut sink);

        assert_eq!(report.outcomes.len(), 1);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PublishStatus::Published, "{:?}", outcome.error);
        assert_eq!(outcome.category, PLATE);

        let plate_dir = dest.join("studio/DEMO/shots/SEQ/SEQ_0010/plates/ab01/v###");
        assert_eq!(fs::read(plate_dir.join("SEQ_0010_ab1_plate.1001.exr")).unwrap(), b"frame1");
        assert_eq!(fs::read(plate_dir.join("SEQ_0010_ab1_plate.1002.exr")).unwrap(), b"frame2");

        let (request, transfer) = &sink.requests[0];
        assert_eq!(request.project, "DEMO");
        assert_eq!(request.code, "SEQ_0010_ab1_plate.1001-1002.exr");
        assert_eq!(request.sg_filepath, outcome.destination);
        assert_eq!(
            request.shot,
            Some(ShotRef {
                sequence: "SEQ".into(),
                shot: "SEQ_0010".into()
            })
        );
        assert_eq!(transfer.allowlist, "blade01");
        assert!(transfer.destination.starts_with("/remote"));
        assert!(transfer.arguments().starts_with(&outcome.destination));
    }

    #[test]
    fn test_existing_destination_fails_row_only() {
        let (temp_dir, dest, catalog) = fixture();
        let mut session = IngestSession::new(&catalog, &PROBE, "studio", "demo");
        session.scan(&temp_dir.path().join("delivery"), |_| {}).unwrap();
        session
            .edit_cell(UNMATCHED, 0, "Shot", FieldValue::text("misc"))
            .unwrap();
        session
            .edit_cell(UNMATCHED, 0, "Sequence", FieldValue::text("misc"))
            .unwrap();

        let plate_dir = dest.join("studio/DEMO/shots/SEQ/SEQ_0010/plates/ab01/v###");
        fs::create_dir_all(&plate_dir).unwrap();
        fs::write(plate_dir.join("SEQ_0010_ab1_plate.1001.exr"), b"old").unwrap();

        let publisher = Publisher::new("demo", "studio", "blade01");
        let mut sink = RecordingSink::default();
        let report = publisher.publish(session.results(), &mut sink);

        let statuses: Vec<PublishStatus> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![PublishStatus::Failed, PublishStatus::Published]);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("already exists"));
        assert_eq!(fs::read(plate_dir.join("SEQ_0010_ab1_plate.1001.exr")).unwrap(), b"old");
        assert_eq!(sink.requests.len(), 1);
        assert_eq!(report.published().count(), 1);
        assert_eq!(report.unpublished().count(), 1);
    }

    #[test]
    fn test_incomplete_rows_are_not_published() {
        let (temp_dir, _dest, catalog) = fixture();
        let mut session = IngestSession::new(&catalog, &PROBE, "studio", "demo");
        session.scan(&temp_dir.path().join("delivery"), |_| {}).unwrap();
        session.set_enabled(PLATE, 0, false).unwrap();

        let publisher = Publisher::new("demo", "studio", "");
        let mut sink = RecordingSink::default();
        let report = publisher.publish(session.results(), &mut sink);

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].status, PublishStatus::Incomplete);
        assert!(sink.requests.is_empty());
        assert!(session.results().table(MOVS).unwrap().is_empty());
        assert!(session.results().table(ANNOTATIONS).unwrap().is_empty());
    }

    #[test]
    fn test_sink_failure_is_logged_only() {
        let (temp_dir, _dest, catalog) = fixture();
        let mut session = IngestSession::new(&catalog, &PROBE, "studio", "demo");
        session.scan(&temp_dir.path().join("delivery"), |_| {}).unwrap();
        session.set_enabled(UNMATCHED, 0, false).unwrap();

        let publisher = Publisher::new("demo", "studio", "blade01");
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let report = publisher.publish(session.results(), &mut sink);
        assert_eq!(report.outcomes[0].status, PublishStatus::Published);
    }

    #[test]
    fn test_copy_file_preserves_mtime_and_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.exr");
        let dest = temp_dir.path().join("b.exr");
        fs::write(&source, b"pixels").unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, mtime).unwrap();

        copy_file(&source, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");
        let copied = filetime::FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(copied.unix_seconds(), 1_600_000_000);

        assert!(matches!(copy_file(&source, &dest), Err(Error::DestinationExists(_))));
    }

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_copy_sequence_leaves_destination_untouched_on_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in");
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();
        for frame in 1001..=1003 {
            fs::write(source.join(format!("a.{}.exr", frame)), b"new").unwrap();
        }
        fs::write(dest.join("a.1003.exr"), b"old").unwrap();

        let seq = find_sequences_in_dir(&source).unwrap().remove(0);
        let err = copy_sequence(&seq, &dest).unwrap_err();
        assert!(matches!(err, Error::DestinationExists(ref p) if p.ends_with("a.1003.exr")));
        assert_eq!(dir_listing(&dest), vec!["a.1003.exr"]);
        assert_eq!(fs::read(dest.join("a.1003.exr")).unwrap(), b"old");

        // Once the conflict is cleared the row publishes cleanly
        fs::remove_file(dest.join("a.1003.exr")).unwrap();
        let copied = copy_sequence(&seq, &dest).unwrap();
        assert_eq!(copied.len(), 3);
        assert_eq!(dir_listing(&dest), vec!["a.1001.exr", "a.1002.exr", "a.1003.exr"]);
    }

    #[test]
    fn test_copy_sequence_removes_partial_copies() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in");
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        for frame in 1001..=1003 {
            fs::write(source.join(format!("a.{}.exr", frame)), b"px").unwrap();
        }
        let seq = find_sequences_in_dir(&source).unwrap().remove(0);

        // A member vanishing after the scan fails the copy midway
        fs::remove_file(source.join("a.1002.exr")).unwrap();
        assert!(copy_sequence(&seq, &dest).is_err());
        assert!(dir_listing(&dest).is_empty());
    }

    #[test]
    fn test_manifest_sink_writes_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out/manifest.jsonl");
        let request = PublishRequest {
            project: "DEMO".into(),
            code: "a.exr".into(),
            sg_filepath: "/studio/DEMO/a.exr".into(),
            sg_source_path: "/in/a.exr".into(),
            shot: None,
        };
        let transfer = TransferRequest::new("/studio/DEMO/a.exr", "/remote/a.exr", "blade01");

        let mut sink = ManifestSink::open(&path).unwrap();
        sink.submit(&request, &transfer).unwrap();
        sink.submit(&request, &transfer).unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["publish"]["code"], "a.exr");
        assert!(value["publish"].get("shot").is_none());
        assert_eq!(value["arguments"], "/studio/DEMO/a.exr,/remote/a.exr");
    }
}
