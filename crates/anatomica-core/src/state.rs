//! Shared visualization state and per-component write capabilities
//!
//! The state is owned by the hosting session and shared by handle. Each
//! pipeline component receives a writer that can only touch the fields it
//! owns:
//! - [`TrackingWriter`]: tracking flags (landmark source)
//! - [`ZoneWriter`]: current zone, gaze point, neighbors (zone classifier)
//! - [`CalibrationWriter`]: transform and calibration status (registration)
//! - [`AssetWriter`]: loaded structures (zone asset cache)
//! - [`ViewWriter`]: hidden/focused structures, filters, opacity, slicing
//!   (voice interpreter and host surfaces)
//!
//! Every mutation bumps a revision counter so consumers can cheaply detect
//! changes without diffing.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::structure::{BodySystem, LoadedStructure, Lod, Structure};
use crate::transform::SimilarityTransform;
use crate::zone::BodyZone;

/// Registration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStatus {
    #[default]
    Uncalibrated,
    Calibrating,
    Calibrated,
}

/// Clipping plane applied by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceView {
    #[default]
    None,
    Axial,
    Sagittal,
    Coronal,
}

/// How the overlay is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// All visible structures in place on the patient
    #[default]
    Overview,
    /// Camera centred on the focused structure
    Isolated,
    /// Model shown detached from the patient
    External,
}

/// Everything the rendering consumer needs for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationState {
    pub current_zone: BodyZone,
    pub adjacent_zones: Vec<BodyZone>,
    /// HUD anchor point in normalized tracking space
    pub gaze_point: [f32; 3],
    pub transform: SimilarityTransform,
    pub calibration: CalibrationStatus,
    pub calibrated: bool,
    pub calibration_quality: f32,
    pub loaded_structures: HashMap<String, LoadedStructure>,
    pub hidden_structures: BTreeSet<String>,
    pub focused_structure: Option<String>,
    pub active_system_filter: Option<BodySystem>,
    pub global_opacity: f32,
    pub slice_view: SliceView,
    pub view_mode: ViewMode,
    pub tracking_active: bool,
    pub tracking_confidence: f32,
    /// Incremented on every mutation
    pub revision: u64,
}

impl Default for VisualizationState {
    fn default() -> Self {
        let zone = BodyZone::default();
        Self {
            current_zone: zone,
            adjacent_zones: zone.adjacent().to_vec(),
            gaze_point: [0.5, 0.5, 0.0],
            transform: SimilarityTransform::identity(),
            calibration: CalibrationStatus::Uncalibrated,
            calibrated: false,
            calibration_quality: 0.0,
            loaded_structures: HashMap::new(),
            hidden_structures: BTreeSet::new(),
            focused_structure: None,
            active_system_filter: None,
            global_opacity: 1.0,
            slice_view: SliceView::None,
            view_mode: ViewMode::Overview,
            tracking_active: false,
            tracking_confidence: 0.0,
            revision: 0,
        }
    }
}

impl VisualizationState {
    /// Whether the renderer should draw a structure this frame
    pub fn is_visible(&self, code: &str) -> bool {
        let Some(entry) = self.loaded_structures.get(code) else {
            return false;
        };
        if self.hidden_structures.contains(code) {
            return false;
        }
        match self.active_system_filter {
            Some(system) => entry.structure.system == system,
            None => true,
        }
    }
}

/// Handle to the session's visualization state
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<VisualizationState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the whole state for rendering or serialization
    pub fn snapshot(&self) -> VisualizationState {
        self.inner.read().clone()
    }

    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Run a read-only closure against the current state
    pub fn read<R>(&self, f: impl FnOnce(&VisualizationState) -> R) -> R {
        f(&self.inner.read())
    }

    fn write<R>(&self, f: impl FnOnce(&mut VisualizationState) -> R) -> R {
        let mut state = self.inner.write();
        let result = f(&mut state);
        state.revision = state.revision.wrapping_add(1);
        result
    }

    pub fn tracking_writer(&self) -> TrackingWriter {
        TrackingWriter { state: self.clone() }
    }

    pub fn zone_writer(&self) -> ZoneWriter {
        ZoneWriter { state: self.clone() }
    }

    pub fn calibration_writer(&self) -> CalibrationWriter {
        CalibrationWriter { state: self.clone() }
    }

    pub fn asset_writer(&self) -> AssetWriter {
        AssetWriter { state: self.clone() }
    }

    pub fn view_writer(&self) -> ViewWriter {
        ViewWriter { state: self.clone() }
    }
}

/// Landmark source capability
#[derive(Debug, Clone)]
pub struct TrackingWriter {
    state: SharedState,
}

impl TrackingWriter {
    pub fn set_tracking(&self, active: bool, confidence: f32) {
        self.state.write(|s| {
            s.tracking_active = active;
            s.tracking_confidence = confidence.clamp(0.0, 1.0);
        });
    }

    pub fn set_confidence(&self, confidence: f32) {
        self.state.write(|s| s.tracking_confidence = confidence.clamp(0.0, 1.0));
    }
}

/// Zone classifier capability
#[derive(Debug, Clone)]
pub struct ZoneWriter {
    state: SharedState,
}

impl ZoneWriter {
    pub fn set_zone(&self, zone: BodyZone) {
        self.state.write(|s| {
            s.current_zone = zone;
            s.adjacent_zones = zone.adjacent().to_vec();
        });
    }

    pub fn set_gaze_point(&self, gaze: [f32; 3]) {
        self.state.write(|s| s.gaze_point = gaze);
    }
}

/// Registration engine capability
#[derive(Debug, Clone)]
pub struct CalibrationWriter {
    state: SharedState,
}

impl CalibrationWriter {
    /// Drop calibration and mark an attempt as pending
    pub fn begin_calibration(&self) {
        self.state.write(|s| {
            s.calibration = CalibrationStatus::Calibrating;
            s.calibrated = false;
            s.calibration_quality = 0.0;
        });
    }

    pub fn set_uncalibrated(&self, quality: f32) {
        self.state.write(|s| {
            s.calibration = CalibrationStatus::Uncalibrated;
            s.calibrated = false;
            s.calibration_quality = quality.clamp(0.0, 1.0);
        });
    }

    pub fn set_calibrated(&self, transform: SimilarityTransform, quality: f32) {
        self.state.write(|s| {
            s.calibration = CalibrationStatus::Calibrated;
            s.calibrated = true;
            s.transform = transform;
            s.calibration_quality = quality.clamp(0.0, 1.0);
        });
    }

    /// Reset to the session-start state: identity transform, uncalibrated
    pub fn reset(&self) {
        self.state.write(|s| {
            s.calibration = CalibrationStatus::Uncalibrated;
            s.calibrated = false;
            s.calibration_quality = 0.0;
            s.transform = SimilarityTransform::identity();
        });
    }
}

/// Outcome of a failed fetch as applied to the cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// Fresh placeholder removed
    Removed,
    /// Upgrade abandoned, previous mesh kept
    Reverted,
    /// Entry no longer belongs to this fetch
    Stale,
}

/// Zone asset cache capability
#[derive(Debug, Clone)]
pub struct AssetWriter {
    state: SharedState,
}

impl AssetWriter {
    /// Claim a structure for a fetch at `lod`.
    ///
    /// Returns `false` when the entry already has (or is fetching) that LOD or
    /// better. Otherwise inserts a placeholder, or marks an existing lower-LOD
    /// entry as upgrading, and tags it with `request`.
    pub fn begin_fetch(&self, structure: &Structure, lod: Lod, request: u64) -> bool {
        self.state.write(|s| match s.loaded_structures.get_mut(&structure.code) {
            Some(entry) if entry.effective_lod() >= lod => false,
            Some(entry) => {
                entry.is_loading = true;
                entry.requested_lod = lod;
                entry.request = request;
                true
            }
            None => {
                s.loaded_structures.insert(
                    structure.code.clone(),
                    LoadedStructure::placeholder(structure.clone(), lod, request),
                );
                true
            }
        })
    }

    /// Replace a placeholder with the resolved mesh if `request` still owns it
    pub fn complete_fetch(&self, code: &str, request: u64, lod: Lod, mesh_url: String) -> bool {
        self.state.write(|s| match s.loaded_structures.get_mut(code) {
            Some(entry) if entry.request == request => {
                entry.mesh_url = Some(mesh_url);
                entry.lod = lod;
                entry.requested_lod = lod;
                entry.is_loading = false;
                entry.loaded_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    }

    pub fn fail_fetch(&self, code: &str, request: u64) -> FetchFailure {
        self.state.write(|s| {
            let Some(entry) = s.loaded_structures.get_mut(code) else {
                return FetchFailure::Stale;
            };
            if entry.request != request {
                return FetchFailure::Stale;
            }
            if entry.mesh_url.is_some() {
                entry.is_loading = false;
                entry.requested_lod = entry.lod;
                FetchFailure::Reverted
            } else {
                s.loaded_structures.remove(code);
                FetchFailure::Removed
            }
        })
    }

    pub fn evict(&self, code: &str) -> bool {
        self.state.write(|s| s.loaded_structures.remove(code).is_some())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.state.read(|s| s.loaded_structures.contains_key(code))
    }

    pub fn get(&self, code: &str) -> Option<LoadedStructure> {
        self.state.read(|s| s.loaded_structures.get(code).cloned())
    }

    pub fn clear(&self) {
        self.state.write(|s| s.loaded_structures.clear());
    }
}

/// View capability: presentation fields driven by voice and host commands
#[derive(Debug, Clone)]
pub struct ViewWriter {
    state: SharedState,
}

impl ViewWriter {
    pub fn focus(&self, code: &str) {
        self.state.write(|s| {
            s.focused_structure = Some(code.to_string());
            s.hidden_structures.remove(code);
            s.view_mode = ViewMode::Isolated;
        });
    }

    /// Hide every other loaded structure and focus on `code`
    pub fn isolate(&self, code: &str) {
        self.state.write(|s| {
            s.hidden_structures = s
                .loaded_structures
                .keys()
                .filter(|c| c.as_str() != code)
                .cloned()
                .collect();
            s.hidden_structures.remove(code);
            s.focused_structure = Some(code.to_string());
            s.view_mode = ViewMode::Isolated;
        });
    }

    pub fn hide(&self, code: &str) {
        self.state.write(|s| {
            s.hidden_structures.insert(code.to_string());
            if s.focused_structure.as_deref() == Some(code) {
                s.focused_structure = None;
            }
        });
    }

    pub fn show_all(&self) {
        self.state.write(|s| {
            s.hidden_structures.clear();
            s.active_system_filter = None;
            s.focused_structure = None;
            s.view_mode = ViewMode::Overview;
        });
    }

    pub fn filter_system(&self, system: Option<BodySystem>) {
        self.state.write(|s| s.active_system_filter = system);
    }

    pub fn set_slice_view(&self, view: SliceView) {
        self.state.write(|s| s.slice_view = view);
    }

    pub fn set_opacity(&self, opacity: f32) {
        self.state.write(|s| s.global_opacity = opacity.clamp(0.0, 1.0));
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        self.state.write(|s| s.view_mode = mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heart() -> Structure {
        Structure::new("HEART", "Heart", BodySystem::Cardiovascular)
    }

    #[test]
    fn test_writes_bump_revision() {
        let state = SharedState::new();
        let before = state.revision();
        state.view_writer().set_opacity(0.4);
        assert!(state.revision() > before);
        assert_eq!(state.snapshot().global_opacity, 0.4);
    }

    #[test]
    fn test_fetch_lifecycle() {
        let state = SharedState::new();
        let assets = state.asset_writer();

        assert!(assets.begin_fetch(&heart(), Lod::Low, 1));
        assert!(!assets.begin_fetch(&heart(), Lod::Low, 2));
        assert!(assets.get("HEART").unwrap().is_loading);

        // A stale completion never lands
        assert!(!assets.complete_fetch("HEART", 7, Lod::Low, "stale.glb".into()));
        assert!(assets.complete_fetch("HEART", 1, Lod::Low, "heart-low.glb".into()));
        assert!(assets.get("HEART").unwrap().is_ready());

        // Upgrade keeps the low mesh visible, and a failed upgrade reverts to it
        assert!(assets.begin_fetch(&heart(), Lod::High, 3));
        let entry = assets.get("HEART").unwrap();
        assert!(entry.is_loading);
        assert_eq!(entry.mesh_url.as_deref(), Some("heart-low.glb"));
        assert_eq!(assets.fail_fetch("HEART", 3), FetchFailure::Reverted);
        let entry = assets.get("HEART").unwrap();
        assert!(entry.is_ready());
        assert_eq!(entry.lod, Lod::Low);
    }

    #[test]
    fn test_failed_first_fetch_removes_entry() {
        let state = SharedState::new();
        let assets = state.asset_writer();
        assets.begin_fetch(&heart(), Lod::High, 1);
        assert_eq!(assets.fail_fetch("HEART", 1), FetchFailure::Removed);
        assert!(!assets.contains("HEART"));
        assert_eq!(assets.fail_fetch("HEART", 1), FetchFailure::Stale);
    }

    #[test]
    fn test_isolate_and_show_all() {
        let state = SharedState::new();
        let assets = state.asset_writer();
        assets.begin_fetch(&heart(), Lod::High, 1);
        assets.begin_fetch(&Structure::new("AORTA", "Aorta", BodySystem::Cardiovascular), Lod::High, 2);
        assets.begin_fetch(&Structure::new("RIBCAGE", "Ribcage", BodySystem::Skeletal), Lod::High, 3);

        let view = state.view_writer();
        view.isolate("HEART");
        let snap = state.snapshot();
        assert_eq!(snap.focused_structure.as_deref(), Some("HEART"));
        assert_eq!(snap.view_mode, ViewMode::Isolated);
        assert!(snap.hidden_structures.contains("AORTA"));
        assert!(snap.hidden_structures.contains("RIBCAGE"));
        assert!(!snap.hidden_structures.contains("HEART"));

        view.filter_system(Some(BodySystem::Skeletal));
        view.show_all();
        let snap = state.snapshot();
        assert!(snap.hidden_structures.is_empty());
        assert_eq!(snap.active_system_filter, None);
        assert_eq!(snap.focused_structure, None);
        assert_eq!(snap.view_mode, ViewMode::Overview);
    }

    #[test]
    fn test_visibility_respects_filter() {
        let state = SharedState::new();
        state.asset_writer().begin_fetch(&heart(), Lod::High, 1);
        state.view_writer().filter_system(Some(BodySystem::Digestive));
        assert!(!state.snapshot().is_visible("HEART"));
        state.view_writer().filter_system(Some(BodySystem::Cardiovascular));
        assert!(state.snapshot().is_visible("HEART"));
    }
}
