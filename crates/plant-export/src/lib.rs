//! Export of trained plant disease classifiers into browser-loadable bundles.
//!
//! The bundle is a layers-model `model.json` with binary weight shards, plus
//! `labels.json` and `metadata.json` for the frontend. Conversion goes
//! through a [`ModelConverter`]: the in-process [`ShardConverter`] by
//! default, or an [`ExternalConverter`] wrapping a command-line tool.

pub mod converter;
pub mod external;
pub mod metadata;
pub mod pipeline;
pub mod shards;

pub use converter::{ConversionOptions, ModelConverter};
pub use external::{ExternalConverter, DEFAULT_INPUT_FORMAT};
pub use metadata::ModelMetadata;
pub use pipeline::{ExportBundle, ExportPipeline};
pub use shards::ShardConverter;
