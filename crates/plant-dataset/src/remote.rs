//! Remote PlantVillage archive: download, unpack and locate class folders.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use plant_core::{Error, LabelSet, Result};
use tracing::info;

use crate::loader::find_class_root;

const ARCHIVE_NAME: &str = "plantvillage.tar.gz";
const EXTRACT_DIR: &str = "plantvillage";

/// A `.tar.gz` copy of the dataset cached under `cache_dir`
#[derive(Debug, Clone)]
pub struct RemoteDataset {
    url: String,
    cache_dir: PathBuf,
}

impl RemoteDataset {
    pub fn new(url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.cache_dir.join(ARCHIVE_NAME)
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.cache_dir.join(EXTRACT_DIR)
    }

    /// Downloads and unpacks when needed, then returns the class-folder root.
    pub fn fetch(&self, labels: &LabelSet) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)?;

        let archive = self.archive_path();
        if archive.exists() {
            info!("Dataset archive already cached at {}", archive.display());
        } else {
            self.download(&archive)?;
        }

        let extract_dir = self.extract_dir();
        if extract_dir.exists() {
            info!("Dataset already extracted at {}", extract_dir.display());
        } else {
            extract_tar_gz(&archive, &extract_dir)?;
        }

        find_class_root(&extract_dir, labels).ok_or_else(|| {
            Error::Input(format!(
                "No PlantVillage class folders found in {}",
                extract_dir.display()
            ))
        })
    }

    fn download(&self, archive: &Path) -> Result<()> {
        info!("Downloading PlantVillage dataset from {}", self.url);

        let response = reqwest::blocking::get(&self.url)
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Input(format!("Failed to download {}: {e}", self.url)))?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::Input(format!("Failed to read response from {}: {e}", self.url)))?;

        // Write to a temporary name so an interrupted download is not mistaken for a cache hit
        let partial = archive.with_extension("partial");
        let mut file = File::create(&partial)?;
        file.write_all(&bytes)?;
        fs::rename(&partial, archive)?;

        info!("Download complete ({} bytes)", bytes.len());
        Ok(())
    }
}

/// Extract tar.gz file
pub fn extract_tar_gz(tar_gz_path: &Path, output_dir: &Path) -> Result<()> {
    info!("Extracting {} to {}", tar_gz_path.display(), output_dir.display());
    let tar_gz = File::open(tar_gz_path)?;
    let decompressor = flate2::read::GzDecoder::new(tar_gz);
    let mut archive = tar::Archive::new(decompressor);

    archive.unpack(output_dir).map_err(|e| {
        let _ = fs::remove_dir_all(output_dir);
        Error::Input(format!("Failed to extract {}: {e}", tar_gz_path.display()))
    })
}
