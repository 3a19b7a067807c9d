//! Anatomica Core - Core types, visualization state, and patient catalog
//!
//! This crate provides the foundational types for the Anatomica pipeline:
//! - Tracked body landmarks and patient anatomical landmarks
//! - Body zones with their adjacency and owned structures
//! - Similarity transforms between tracking and model space
//! - The shared visualization state with per-component write capabilities
//! - Provider interfaces and the local TOML patient catalog

pub mod catalog;
pub mod landmark;
pub mod provider;
pub mod state;
pub mod structure;
pub mod transform;
pub mod zone;

pub use catalog::{CatalogError, PatientCatalog};
pub use landmark::{AnatomicalLandmark, BodyPoint, Landmark, LandmarkError, LandmarkSet, LANDMARK_COUNT};
pub use provider::{PatientLandmarkProvider, StructureProvider};
pub use state::{
    AssetWriter, CalibrationStatus, CalibrationWriter, FetchFailure, SharedState, SliceView,
    TrackingWriter, ViewMode, ViewWriter, VisualizationState, ZoneWriter,
};
pub use structure::{BodySystem, LoadedStructure, Lod, Structure};
pub use transform::SimilarityTransform;
pub use zone::BodyZone;
