//! Image discovery and decoding for class-per-directory datasets.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use plant_core::{Error, LabelSet, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::dataset::LabeledImage;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// Image loader for a PlantVillage-style directory tree
pub struct ImageLoader {
    /// Directory with one sub-directory per class
    root_dir: PathBuf,
}

impl ImageLoader {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Decodes an image from disk
    pub fn load_image(path: &Path) -> Result<DynamicImage> {
        if !path.exists() {
            return Err(Error::missing_path("Image file", path));
        }

        image::ImageReader::open(path)
            .map_err(|e| Error::Image(format!("Failed to open {}: {e}", path.display())))?
            .with_guessed_format()
            .map_err(|e| Error::Image(format!("Failed to read {}: {e}", path.display())))?
            .decode()
            .map_err(|e| Error::Image(format!("Failed to decode {}: {e}", path.display())))
    }

    /// Lists image files directly inside `dir`, sorted by path
    pub fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::Input(format!("Not a directory: {}", dir.display())));
        }

        let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        images.sort();

        Ok(images)
    }

    /// Collects every image under class directories whose name is in `labels`.
    ///
    /// Unknown directories are skipped with a warning. Classes are visited
    /// in sorted order so the result is stable across platforms.
    pub fn scan_class_directories(&self, labels: &LabelSet) -> Result<Vec<LabeledImage>> {
        if !self.root_dir.is_dir() {
            return Err(Error::missing_path("Dataset directory", &self.root_dir));
        }

        let mut class_dirs: Vec<PathBuf> = std::fs::read_dir(&self.root_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        class_dirs.sort();

        let mut samples = Vec::new();
        for class_dir in class_dirs {
            let Some(name) = class_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(label) = labels.index_of(name) else {
                warn!("Skipping directory outside the class set: {}", class_dir.display());
                continue;
            };

            let images = Self::scan_directory(&class_dir)?;
            debug!("{name}: {} images", images.len());
            samples.extend(images.into_iter().map(|path| LabeledImage::new(path, label)));
        }

        if samples.is_empty() {
            return Err(Error::Input(format!(
                "No labelled images found under {}",
                self.root_dir.display()
            )));
        }

        Ok(samples)
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Finds the directory whose children are class folders.
///
/// Archives usually wrap the class folders in one or more parent directories;
/// this walks down until a directory with at least one known class is found.
pub fn find_class_root(dir: &Path, labels: &LabelSet) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(0)
        .max_depth(4)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .find(|entry| {
            std::fs::read_dir(entry.path())
                .map(|children| {
                    children.filter_map(|c| c.ok()).any(|c| {
                        c.path().is_dir()
                            && c.file_name().to_str().is_some_and(|n| labels.index_of(n).is_some())
                    })
                })
                .unwrap_or(false)
        })
        .map(|entry| entry.path().to_path_buf())
}
