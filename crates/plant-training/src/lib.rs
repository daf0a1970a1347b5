//! Model construction and two-phase transfer-learning for plant disease
//! classification.
//!
//! This crate provides:
//! - The MobileNetV2-style classifier and its layer descriptors
//! - Freeze / unfreeze of the extractor as immutable layer plans
//! - Weight transplant between builds via an explicit parameter dictionary
//! - The phase/epoch orchestrator with checkpoint, early stopping and LR decay
//! - Artifact persistence and loading

pub mod artifacts;
pub mod builder;
pub mod burn_engine;
pub mod engine;
pub mod layers;
pub mod model;
pub mod orchestrator;
pub mod params;
pub mod policy;
pub mod run_log;

pub use artifacts::{load_artifact, load_layer_plan, ArtifactLayout};
pub use builder::{ClassifierModel, ModelBuilder};
pub use burn_engine::BurnEngine;
pub use engine::{EpochData, PassSummary, TrainingEngine};
pub use layers::{freeze, unfreeze_tail, ExtractorHandle, LayerDescriptor, LayerKind, LayerPlan, Stage};
pub use model::{categorical_cross_entropy, ClassifierConfig, PlantClassifier};
pub use orchestrator::{OrchestratorState, PhaseReport, TrainingOrchestrator, TrainingReport};
pub use params::{ParamDict, ParamTensor};
pub use policy::{CheckpointPolicy, EarlyStopping, LrDecay, LrDecision, StopDecision};
pub use run_log::{RunEvent, RunLog};
