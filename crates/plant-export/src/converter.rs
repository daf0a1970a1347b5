//! The conversion step of an export, as a swappable collaborator.

use std::path::{Path, PathBuf};

use plant_core::Result;

/// Options forwarded to every converter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Store weights as affine-quantized uint8
    pub quantize: bool,
}

/// Turns a trained artifact into a browser-loadable bundle inside `output_dir`.
pub trait ModelConverter {
    fn name(&self) -> &str;

    /// Returns the path of the bundle's `model.json`.
    fn convert(&self, artifact: &Path, output_dir: &Path, options: &ConversionOptions) -> Result<PathBuf>;
}

impl<C: ModelConverter + ?Sized> ModelConverter for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn convert(&self, artifact: &Path, output_dir: &Path, options: &ConversionOptions) -> Result<PathBuf> {
        (**self).convert(artifact, output_dir, options)
    }
}
