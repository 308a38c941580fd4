//! Resolution probing
//!
//! A sequence's resolution is read from a representative file in its
//! directory:
//! - DPX plates through their header
//! - Other raster formats (EXR, TIFF, JPEG, PNG) through `image`
//! - Video containers through FFprobe
//!
//! Probing never fails a record. When nothing can be read the default
//! 1920x1080 is used. Each directory is probed once per prober.

pub mod dpx;
pub mod video;

use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::RuleCatalog;
use crate::error::{Error, Result};

/// Frame size of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Source of resolutions for the metadata builder
pub trait ResolutionSource {
    /// Resolution of the media found in a directory
    fn resolution_for_dir(&self, dir: &Path) -> Resolution;
}

/// Probes files on disk
#[derive(Debug, Clone, Default)]
pub struct ResolutionProber {
    raster_extensions: BTreeSet<String>,
    video_extensions: BTreeSet<String>,
    /// Results per directory, including defaults
    cache: RefCell<HashMap<PathBuf, Resolution>>,
}

impl ResolutionProber {
    pub fn new(raster_extensions: BTreeSet<String>, video_extensions: BTreeSet<String>) -> Self {
        Self {
            raster_extensions,
            video_extensions,
            cache: RefCell::default(),
        }
    }

    /// Prober covering the plate, annotation and video extensions of a catalog
    pub fn from_catalog(catalog: &RuleCatalog) -> Self {
        Self::new(catalog.raster_extensions(), catalog.video_extensions())
    }

    /// Pick the file used to probe a directory
    ///
    /// The first raster file by name wins; video files are used only when
    /// the directory holds no raster file.
    pub fn representative_file(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let find = |set: &BTreeSet<String>| {
            names
                .iter()
                .find(|name| set.contains(&lowercase_extension(Path::new(name.as_str()))))
                .map(|name| dir.join(name))
        };

        Ok(find(&self.raster_extensions).or_else(|| find(&self.video_extensions)))
    }

    /// Read the resolution of a single file
    pub fn probe_file(&self, path: &Path) -> Result<Resolution> {
        let ext = lowercase_extension(path);

        if ext == "dpx" {
            return dpx::read_dpx_resolution(path);
        }
        if self.video_extensions.contains(&ext) {
            return video::probe_video_resolution(path);
        }

        let (width, height) = image::image_dimensions(path).map_err(|e| Error::Probe {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Resolution::new(width, height))
    }
}

impl ResolutionProber {
    fn probe_dir(&self, dir: &Path) -> Resolution {
        let path = match self.representative_file(dir) {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!(?dir, "No probeable media, using default resolution");
                return Resolution::default();
            }
            Err(e) => {
                warn!(?dir, error = %e, "Failed to list directory, using default resolution");
                return Resolution::default();
            }
        };

        match self.probe_file(&path) {
            Ok(resolution) => {
                debug!(?path, %resolution, "Probed resolution");
                resolution
            }
            Err(e) => {
                warn!(?path, error = %e, "Failed to probe resolution, using default");
                Resolution::default()
            }
        }
    }
}

impl ResolutionSource for ResolutionProber {
    fn resolution_for_dir(&self, dir: &Path) -> Resolution {
        if let Some(resolution) = self.cache.borrow().get(dir) {
            return *resolution;
        }
        let resolution = self.probe_dir(dir);
        self.cache.borrow_mut().insert(dir.to_path_buf(), resolution);
        resolution
    }
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Returns the same resolution for every directory
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FixedResolution(pub Resolution);

#[cfg(test)]
impl ResolutionSource for FixedResolution {
    fn resolution_for_dir(&self, _dir: &Path) -> Resolution {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn prober() -> ResolutionProber {
        let catalog = RuleCatalog::from_toml_str(&RuleCatalog::sample_config()).unwrap();
        ResolutionProber::from_catalog(&catalog)
    }

    #[test]
    fn test_resolution_display_and_default() {
        assert_eq!(Resolution::default().to_string(), "1920x1080");
        assert_eq!(Resolution::new(4096, 2160).to_string(), "4096x2160");
    }

    #[test]
    fn test_representative_prefers_raster() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["a_ref.mov", "b_plate.1001.exr", "c_still.jpg", "notes.txt"] {
            File::create(temp_dir.path().join(name)).unwrap();
        }
        let picked = prober().representative_file(temp_dir.path()).unwrap();
        assert_eq!(picked, Some(temp_dir.path().join("b_plate.1001.exr")));
    }

    #[test]
    fn test_representative_falls_back_to_video() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("notes.txt")).unwrap();
        File::create(temp_dir.path().join("edit.MOV")).unwrap();
        let picked = prober().representative_file(temp_dir.path()).unwrap();
        assert_eq!(picked, Some(temp_dir.path().join("edit.MOV")));
    }

    #[test]
    fn test_probe_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("board.png");
        image::RgbImage::new(64, 32).save(&path).unwrap();

        assert_eq!(prober().probe_file(&path).unwrap(), Resolution::new(64, 32));
        assert_eq!(
            prober().resolution_for_dir(temp_dir.path()),
            Resolution::new(64, 32)
        );
    }

    #[test]
    fn test_directory_is_read_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("board.png");
        image::RgbImage::new(64, 32).save(&path).unwrap();

        let prober = prober();
        assert_eq!(prober.resolution_for_dir(temp_dir.path()), Resolution::new(64, 32));

        // Later sequences in the same directory reuse the first result
        image::RgbImage::new(16, 8).save(&path).unwrap();
        assert_eq!(prober.resolution_for_dir(temp_dir.path()), Resolution::new(64, 32));

        // A new prober reads the directory again
        assert_eq!(
            self::prober().resolution_for_dir(temp_dir.path()),
            Resolution::new(16, 8)
        );
    }

    #[test]
    fn test_unreadable_media_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = File::create(temp_dir.path().join("broken.exr")).unwrap();
        file.write_all(b"not an image").unwrap();
        drop(file);

        assert_eq!(prober().resolution_for_dir(temp_dir.path()), Resolution::default());
    }

    #[test]
    fn test_empty_or_missing_dir_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(prober().resolution_for_dir(temp_dir.path()), Resolution::default());
        assert_eq!(
            prober().resolution_for_dir(&temp_dir.path().join("missing")),
            Resolution::default()
        );
    }
}
