//! Patient catalog - local TOML description of patients, their anatomical
//! landmarks, and segmented structures
//!
//! The catalog serves as the offline provider for both patient landmarks and
//! structures, and as the fallback when the remote catalog is unreachable.

use anyhow::Result;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::landmark::AnatomicalLandmark;
use crate::provider::{PatientLandmarkProvider, StructureProvider};
use crate::structure::{BodySystem, Lod, Structure};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read patient catalog: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse patient catalog: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize patient catalog: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Unknown patient: {0}")]
    UnknownPatient(String),
    #[error("Patient {patient} has no structure {code}")]
    UnknownStructure { patient: String, code: String },
}

/// Reference structures used by the demo patient: (code, name, system, color)
const REFERENCE_STRUCTURES: &[(&str, &str, BodySystem, [f32; 3])] = &[
    ("BRAIN", "Brain", BodySystem::Nervous, [0.93, 0.71, 0.73]),
    ("SKULL", "Skull", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("EYE_LEFT", "Left eye", BodySystem::Nervous, [0.9, 0.9, 0.95]),
    ("EYE_RIGHT", "Right eye", BodySystem::Nervous, [0.9, 0.9, 0.95]),
    ("THYROID", "Thyroid", BodySystem::Endocrine, [0.7, 0.35, 0.4]),
    ("HEART", "Heart", BodySystem::Cardiovascular, [0.8, 0.1, 0.12]),
    ("LUNG_LEFT", "Left lung", BodySystem::Respiratory, [0.95, 0.6, 0.6]),
    ("LUNG_RIGHT", "Right lung", BodySystem::Respiratory, [0.95, 0.6, 0.6]),
    ("AORTA", "Aorta", BodySystem::Cardiovascular, [0.85, 0.05, 0.05]),
    ("TRACHEA", "Trachea", BodySystem::Respiratory, [0.85, 0.75, 0.7]),
    ("ESOPHAGUS", "Esophagus", BodySystem::Digestive, [0.8, 0.55, 0.5]),
    ("RIBCAGE", "Ribcage", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("LIVER", "Liver", BodySystem::Digestive, [0.55, 0.2, 0.15]),
    ("STOMACH", "Stomach", BodySystem::Digestive, [0.85, 0.55, 0.5]),
    ("SPLEEN", "Spleen", BodySystem::Lymphatic, [0.5, 0.15, 0.25]),
    ("PANCREAS", "Pancreas", BodySystem::Endocrine, [0.9, 0.75, 0.5]),
    ("GALLBLADDER", "Gallbladder", BodySystem::Digestive, [0.3, 0.6, 0.3]),
    ("KIDNEY_LEFT", "Left kidney", BodySystem::Urinary, [0.6, 0.2, 0.2]),
    ("KIDNEY_RIGHT", "Right kidney", BodySystem::Urinary, [0.6, 0.2, 0.2]),
    ("SMALL_INTESTINE", "Small intestine", BodySystem::Digestive, [0.9, 0.65, 0.6]),
    ("BLADDER", "Bladder", BodySystem::Urinary, [0.9, 0.8, 0.4]),
    ("COLON", "Colon", BodySystem::Digestive, [0.8, 0.5, 0.45]),
    ("RECTUM", "Rectum", BodySystem::Digestive, [0.75, 0.45, 0.4]),
    ("PELVIC_BONE", "Pelvic bone", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("HUMERUS", "Humerus", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("RADIUS", "Radius", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("ULNA", "Ulna", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("BRACHIAL_ARTERY", "Brachial artery", BodySystem::Cardiovascular, [0.85, 0.05, 0.05]),
    ("FEMUR", "Femur", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("TIBIA", "Tibia", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("FIBULA", "Fibula", BodySystem::Skeletal, [0.95, 0.93, 0.85]),
    ("FEMORAL_ARTERY", "Femoral artery", BodySystem::Cardiovascular, [0.85, 0.05, 0.05]),
];

/// A structure entry in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStructure {
    #[serde(flatten)]
    pub structure: Structure,
    /// Mesh path stem relative to `mesh_base`; defaults to `{patient}/{code}`
    #[serde(default)]
    pub mesh: Option<String>,
}

/// A single patient entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPatient {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "landmark")]
    pub landmarks: Vec<AnatomicalLandmark>,
    #[serde(default, rename = "structure")]
    pub structures: Vec<CatalogStructure>,
}

/// The catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientCatalog {
    #[serde(default = "default_version")]
    pub version: String,
    /// Base URL or directory mesh references are resolved against
    #[serde(default = "default_mesh_base")]
    pub mesh_base: String,
    #[serde(default, rename = "patient")]
    pub patients: Vec<CatalogPatient>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_mesh_base() -> String {
    "./assets/meshes".to_string()
}

impl Default for PatientCatalog {
    fn default() -> Self {
        Self {
            version: default_version(),
            mesh_base: default_mesh_base(),
            patients: Vec::new(),
        }
    }
}

impl PatientCatalog {
    /// Load catalog from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml(&content)?;
        debug!(
            path = %path.display(),
            patients = catalog.patients.len(),
            "Loaded patient catalog"
        );
        Ok(catalog)
    }

    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), CatalogError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Built-in demo patient covering every zone's structures
    pub fn demo() -> Self {
        let landmarks = vec![
            AnatomicalLandmark::new("nose", [0.0, 1.62, 0.10], 0.95),
            AnatomicalLandmark::new("left_shoulder", [-0.19, 1.42, 0.0], 0.9),
            AnatomicalLandmark::new("right_shoulder", [0.19, 1.42, 0.0], 0.9),
            AnatomicalLandmark::new("left_hip", [-0.12, 0.95, 0.0], 0.85),
            AnatomicalLandmark::new("right_hip", [0.12, 0.95, 0.0], 0.85),
        ];
        let structures = REFERENCE_STRUCTURES
            .iter()
            .map(|&(code, name, system, color)| {
                let mut structure = Structure::new(code, name, system);
                structure.color = color;
                CatalogStructure { structure, mesh: None }
            })
            .collect();

        Self {
            version: default_version(),
            mesh_base: default_mesh_base(),
            patients: vec![CatalogPatient {
                id: "demo".to_string(),
                name: Some("Demo patient".to_string()),
                landmarks,
                structures,
            }],
        }
    }

    pub fn patient(&self, id: &str) -> Result<&CatalogPatient, CatalogError> {
        self.patients
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CatalogError::UnknownPatient(id.to_string()))
    }

    /// Resolve the mesh reference for a structure at a level of detail
    ///
    /// Pattern: `{mesh_base}/{stem}.{lod}.glb`
    pub fn resolve_mesh(&self, patient_id: &str, code: &str, lod: Lod) -> Result<String, CatalogError> {
        let patient = self.patient(patient_id)?;
        let entry = patient
            .structures
            .iter()
            .find(|s| s.structure.code == code)
            .ok_or_else(|| CatalogError::UnknownStructure {
                patient: patient_id.to_string(),
                code: code.to_string(),
            })?;
        let stem = entry
            .mesh
            .clone()
            .unwrap_or_else(|| format!("{}/{}", patient_id, code.to_lowercase()));
        Ok(format!(
            "{}/{}.{}.glb",
            self.mesh_base.trim_end_matches('/'),
            stem,
            lod
        ))
    }
}

impl PatientLandmarkProvider for PatientCatalog {
    fn landmarks<'a>(&'a self, patient_id: &'a str) -> BoxFuture<'a, Result<Vec<AnatomicalLandmark>>> {
        async move { Ok(self.patient(patient_id)?.landmarks.clone()) }.boxed()
    }
}

impl StructureProvider for PatientCatalog {
    fn structures<'a>(&'a self, patient_id: &'a str) -> BoxFuture<'a, Result<Vec<Structure>>> {
        async move {
            Ok(self
                .patient(patient_id)?
                .structures
                .iter()
                .map(|s| s.structure.clone())
                .collect())
        }
        .boxed()
    }

    fn mesh_url<'a>(
        &'a self,
        patient_id: &'a str,
        structure_code: &'a str,
        lod: Lod,
    ) -> BoxFuture<'a, Result<String>> {
        async move { Ok(self.resolve_mesh(patient_id, structure_code, lod)?) }.boxed()
    }
}
