//! Frame sequence collection
//!
//! Groups the files of every directory under a delivery root into frame
//! sequences. Files sharing the same prefix and extension around a trailing
//! frame number (`plate.1001.exr`, `plate.1002.exr`) form one sequence;
//! everything else becomes a one-file sequence.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::Result;

/// A group of sibling files differing only by frame number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSequence {
    directory: PathBuf,
    basename: String,
    extension: String,
    padding: usize,
    frames: BTreeSet<u64>,
    members: Vec<String>,
}

impl FileSequence {
    /// Directory holding the member files
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Name prefix before the frame token, including any trailing separator
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Extension with its leading dot, or empty
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Lowercase extension without the dot
    pub fn extension_lower(&self) -> String {
        self.extension.trim_start_matches('.').to_lowercase()
    }

    /// Frame numbers present on disk
    pub fn frames(&self) -> &BTreeSet<u64> {
        &self.frames
    }

    /// Number of member files
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether this is a true multi-frame sequence
    pub fn is_sequence(&self) -> bool {
        self.members.len() > 1
    }

    /// First frame, 0 for frameless files
    pub fn start(&self) -> u64 {
        self.frames.first().copied().unwrap_or(0)
    }

    /// Last frame, 0 for frameless files
    pub fn end(&self) -> u64 {
        self.frames.last().copied().unwrap_or(0)
    }

    /// Compact frame range such as `1001-1005,1007`, padded to the sequence width
    pub fn frame_range(&self) -> String {
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for &frame in &self.frames {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == frame => *end = frame,
                _ => runs.push((frame, frame)),
            }
        }

        let width = self.padding;
        runs.iter()
            .map(|&(start, end)| {
                if start == end {
                    format!("{:0width$}", start)
                } else {
                    format!("{:0width$}-{:0width$}", start, end)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Name shown to the operator and used as the destination file name
    ///
    /// A one-file sequence keeps its exact on-disk name.
    pub fn display_name(&self) -> String {
        match self.members.as_slice() {
            [single] => single.clone(),
            _ => format!("{}{}{}", self.basename, self.frame_range(), self.extension),
        }
    }

    /// Full paths of all member files, in frame order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| self.directory.join(m)).collect()
    }
}

impl std::fmt::Display for FileSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.directory.join(self.display_name()).display())
    }
}

/// A file name split into prefix, frame token and extension
#[derive(Debug, PartialEq, Eq)]
struct NameParts<'a> {
    basename: &'a str,
    frame: Option<&'a str>,
    extension: &'a str,
}

/// Split `shot_plate.1001.exr` into `shot_plate.`, `1001`, `.exr`
fn split_name(name: &str) -> NameParts<'_> {
    let (stem, extension) = match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    };

    let digits = stem
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();

    if digits == 0 {
        return NameParts {
            basename: stem,
            frame: None,
            extension,
        };
    }

    let (basename, frame) = stem.split_at(stem.len() - digits);
    NameParts {
        basename,
        frame: Some(frame),
        extension,
    }
}

#[derive(Default)]
struct SequenceBuilder {
    padding: Option<usize>,
    frames: BTreeMap<u64, String>,
}

/// Group the files of a single directory into sequences
///
/// Entries are sorted by name before grouping so the result is stable for
/// a given directory content.
pub fn find_sequences_in_dir(dir: &Path) -> Result<Vec<FileSequence>> {
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => debug!(?name, "Skipping non UTF-8 file name"),
        }
    }
    names.sort();

    let mut groups: BTreeMap<(String, String), SequenceBuilder> = BTreeMap::new();
    let mut standalone: Vec<FileSequence> = Vec::new();

    for name in &names {
        let parts = split_name(name);
        let frame = parts.frame.and_then(|f| f.parse::<u64>().ok().map(|n| (f, n)));
        let key = (parts.basename.to_string(), parts.extension.to_string());

        if let Some((token, number)) = frame {
            let builder = groups.entry(key).or_default();
            // "a.1.exr" next to "a.001.exr": keep the first, the other stands alone
            if !builder.frames.contains_key(&number) {
                builder.padding = Some(builder.padding.map_or(token.len(), |p| p.min(token.len())));
                builder.frames.insert(number, name.clone());
                continue;
            }
        }

        let stem = &name[..name.len() - parts.extension.len()];
        standalone.push(FileSequence {
            directory: dir.to_path_buf(),
            basename: stem.to_string(),
            extension: parts.extension.to_string(),
            padding: 0,
            frames: BTreeSet::new(),
            members: vec![name.clone()],
        });
    }

    let mut sequences: Vec<FileSequence> = groups
        .into_iter()
        .map(|((basename, extension), builder)| FileSequence {
            directory: dir.to_path_buf(),
            basename,
            extension,
            padding: builder.padding.unwrap_or(0),
            frames: builder.frames.keys().copied().collect(),
            members: builder.frames.into_values().collect(),
        })
        .chain(standalone)
        .collect();

    sequences.sort_by(|a, b| {
        (a.basename.as_str(), a.extension.as_str()).cmp(&(b.basename.as_str(), b.extension.as_str()))
    });

    trace!(?dir, count = sequences.len(), "Grouped directory into sequences");
    Ok(sequences)
}

/// Walk a delivery root, yielding the sequences of each directory in turn
///
/// Directories are visited depth-first in name order. Symlinked
/// directories are not followed. Each item is one directory's sequences or
/// the error encountered reading it.
pub fn walk_sequences(root: &Path) -> impl Iterator<Item = Result<Vec<FileSequence>>> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_dir() => {
                Some(find_sequences_in_dir(entry.path()))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e.into())),
        })
}
