//! Metadata builder
//!
//! Turns a classified sequence into the field record shown to the operator
//! and renders its destination path. The same logic runs again, for the
//! Preview field only, whenever the operator edits a row.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, trace};

use crate::config::{RuleCatalog, RuleEntry};
use crate::error::Result;
use crate::probe::ResolutionSource;
use crate::record::{FieldRecord, FieldValue, render_template};
use crate::sequence::FileSequence;

/// Version shown until it is resolved against published files
pub const VERSION_PLACEHOLDER: &str = "v###";

/// Placeholder splitting a template into its versioned prefix
const VERSION_PLACEHOLDER_FIELD: &str = "{Version}";

/// Shot token: text ending in four digits, followed by a separator
static SHOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w\s.-]+\d{4})[-_]").expect("Invalid regex"));

/// Where the sequence name ends: separator + four digits, or separator + letters + four digits
static SEQUENCE_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[_|. ]\d{4}|[_|. ][a-zA-Z]{1,9}\d{4}").expect("Invalid regex")
});

static SCAN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z]{2}[0-9]{1,4}").expect("Invalid regex"));

static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}x\d{4}").expect("Invalid regex"));

static PUBLISHED_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\\/]v(\d+)").expect("Invalid regex"));

/// Extract `(shot, sequence)` from a sequence basename
///
/// Both are empty when the name carries no shot token.
pub fn extract_shot_and_sequence(basename: &str) -> (String, String) {
    let Some(shot) = SHOT_RE.captures(basename).and_then(|c| c.get(1)) else {
        return (String::new(), String::new());
    };

    let sequence = match SEQUENCE_SPLIT_RE.find(basename) {
        Some(m) => &basename[..m.start()],
        None => basename,
    };

    (shot.as_str().to_string(), sequence.to_string())
}

/// Scan ID from the last two-letter + digits token, number padded to two digits
///
/// `"scene_ab7_v001"` gives `"ab07"`.
pub fn scan_id(basename: &str) -> Option<String> {
    let token = SCAN_ID_RE.find_iter(basename).last()?.as_str();
    let (letters, digits) = token.split_at(2);
    let number: u32 = digits.parse().ok()?;
    Some(format!("{}{:02}", letters, number))
}

/// Numeric part of a published `vNNN` token
///
/// Tokens too large for `u64` saturate instead of being ignored.
fn parse_version_number(digits: &str) -> Option<u64> {
    match digits.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => Some(u64::MAX),
        Err(_) => None,
    }
}

/// Frame range as `"NNNN-NNNN"`
pub fn format_frame_range(start: u64, end: u64) -> String {
    format!("{:04}-{:04}", start, end)
}

/// Builds field records for one ingest session
pub struct MetadataBuilder<'a> {
    catalog: &'a RuleCatalog,
    prober: &'a dyn ResolutionSource,
    server: String,
    show: String,
}

impl<'a> MetadataBuilder<'a> {
    /// Create a builder; the show name is stored uppercased
    pub fn new(
        catalog: &'a RuleCatalog,
        prober: &'a dyn ResolutionSource,
        server: impl Into<String>,
        show: impl AsRef<str>,
    ) -> Self {
        Self {
            catalog,
            prober,
            server: server.into(),
            show: show.as_ref().to_uppercase(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn show(&self) -> &str {
        &self.show
    }

    /// Build the record for a sequence placed in `category`
    ///
    /// Returns `Ok(None)` when the category does not accept the sequence's
    /// extension (the fallback category accepts everything). `shot_match`
    /// is the category regex match from classification; Scan ID is only
    /// derived when it is present.
    pub fn build(
        &self,
        category: &RuleEntry,
        seq: &FileSequence,
        shot_match: Option<&str>,
    ) -> Result<Option<FieldRecord>> {
        let extension = seq.extension().trim_start_matches('.');
        if !category.is_fallback() && !category.accepts_extension(&extension.to_lowercase()) {
            trace!(file = %seq.display_name(), category = %category.name, "Extension not accepted");
            return Ok(None);
        }

        let (shot, sequence) = extract_shot_and_sequence(seq.basename());
        let resolution = self.prober.resolution_for_dir(seq.directory());

        let mut fields = FieldRecord::new();
        fields.set("server", FieldValue::text(self.server.as_str()));
        fields.set("Show", FieldValue::text(self.show.as_str()));
        fields.set("Enable", FieldValue::Null);
        fields.set("Sequence", FieldValue::text(sequence));
        fields.set("Shot", FieldValue::text(shot.as_str()));
        fields.set("Dept", FieldValue::Choices(self.catalog.departments().to_vec()));
        fields.set("Type", FieldValue::text(category.category_type.as_str()));
        fields.set(
            "Frame Range",
            FieldValue::text(format_frame_range(seq.start(), seq.end())),
        );
        fields.set("Version", FieldValue::text(VERSION_PLACEHOLDER));
        fields.set("Extension", FieldValue::text(extension));
        fields.set("Res", FieldValue::text(resolution.to_string()));
        fields.set("Preview", FieldValue::text(seq.display_name()));

        let scan = shot_match.and_then(|_| scan_id(seq.basename()));
        fields.set("Scan ID", scan.map_or(FieldValue::Null, FieldValue::Scalar));

        let preview = render_template(category.template_for(&shot), &fields)?;
        debug!(file = %seq.display_name(), category = %category.name, %preview, "Built record");
        fields.set("Preview", FieldValue::text(preview));

        fields.project(&category.output_columns).map(Some)
    }

    /// Render a fresh Preview for an edited row
    ///
    /// Res and Extension are taken from the row's current Preview, which is
    /// then reduced to its file name before the template is applied.
    pub fn rederive_preview(&self, category: &RuleEntry, row: &FieldRecord) -> Result<String> {
        let old_preview = row.text("Preview");
        let path = Path::new(&old_preview);

        let mut fields = row.clone();
        fields.set("server", FieldValue::text(self.server.as_str()));
        fields.set("Show", FieldValue::text(self.show.as_str()));
        fields.set(
            "Res",
            RESOLUTION_RE
                .find(&old_preview)
                .map_or(FieldValue::Null, |m| FieldValue::text(m.as_str())),
        );
        fields.set(
            "Extension",
            FieldValue::text(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default(),
            ),
        );
        fields.set(
            "Preview",
            FieldValue::text(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default(),
            ),
        );

        let shot = row.text("Shot");
        render_template(category.template_for(&shot), &fields)
    }

    /// Next version for a row, given paths that were already published
    ///
    /// Only published paths under the row's unversioned destination prefix
    /// count. Returns `"v001"` when there are none.
    pub fn resolve_version(
        &self,
        category: &RuleEntry,
        row: &FieldRecord,
        published: &[String],
    ) -> Result<String> {
        let prefix_template = category
            .path_template
            .split(VERSION_PLACEHOLDER_FIELD)
            .next()
            .unwrap_or_default();

        let mut fields = row.clone();
        fields.set("server", FieldValue::text(self.server.as_str()));
        fields.set("Show", FieldValue::text(self.show.as_str()));
        let prefix = render_template(prefix_template, &fields)?;

        let latest = published
            .iter()
            .filter(|path| !path.is_empty() && path.contains(&prefix))
            .filter_map(|path| PUBLISHED_VERSION_RE.captures(path))
            .filter_map(|caps| parse_version_number(caps.get(1)?.as_str()))
            .max()
            .unwrap_or(0);

        trace!(%prefix, latest, "Resolved version");
        Ok(format!("v{:03}", latest.saturating_add(1)))
    }
}
