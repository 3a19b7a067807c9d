//! Anatomical structures and their cached mesh entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Organ system a structure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySystem {
    Skeletal,
    Muscular,
    Cardiovascular,
    Respiratory,
    Digestive,
    Nervous,
    Urinary,
    Endocrine,
    Lymphatic,
    Reproductive,
}

impl std::fmt::Display for BodySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Skeletal => "skeletal",
            Self::Muscular => "muscular",
            Self::Cardiovascular => "cardiovascular",
            Self::Respiratory => "respiratory",
            Self::Digestive => "digestive",
            Self::Nervous => "nervous",
            Self::Urinary => "urinary",
            Self::Endocrine => "endocrine",
            Self::Lymphatic => "lymphatic",
            Self::Reproductive => "reproductive",
        };
        f.write_str(name)
    }
}

/// Mesh quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lod {
    Low,
    Medium,
    High,
}

impl Lod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl Default for Lod {
    fn default() -> Self {
        Self::High
    }
}

impl std::fmt::Display for Lod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An anatomical entity from the patient's model; immutable per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Stable code, e.g. "HEART"
    pub code: String,
    /// Display name
    pub name: String,
    pub system: BodySystem,
    /// Default RGB color
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    /// Segmented volume in millilitres, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ml: Option<f64>,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_color() -> [f32; 3] {
    [0.8, 0.8, 0.8]
}

fn default_opacity() -> f32 {
    1.0
}

impl Structure {
    pub fn new(code: &str, name: &str, system: BodySystem) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            system,
            color: default_color(),
            volume_ml: None,
            opacity: default_opacity(),
        }
    }
}

/// Cache entry for a structure whose mesh has been requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedStructure {
    pub structure: Structure,
    /// Resolved mesh reference; `None` while the first fetch is in flight
    pub mesh_url: Option<String>,
    /// LOD of `mesh_url`, or the requested LOD before the first fetch lands
    pub lod: Lod,
    /// LOD asked for by the most recent fetch
    pub requested_lod: Lod,
    pub is_loading: bool,
    pub loaded_at: Option<DateTime<Utc>>,
    /// Generation of the fetch that owns this entry
    #[serde(skip)]
    pub request: u64,
}

impl LoadedStructure {
    /// Placeholder inserted before the first fetch for a structure
    pub fn placeholder(structure: Structure, lod: Lod, request: u64) -> Self {
        Self {
            structure,
            mesh_url: None,
            lod,
            requested_lod: lod,
            is_loading: true,
            loaded_at: None,
            request,
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.is_loading && self.mesh_url.is_some()
    }

    /// Best LOD this entry has or is about to have
    pub fn effective_lod(&self) -> Lod {
        if self.is_loading {
            self.lod.max(self.requested_lod)
        } else {
            self.lod
        }
    }
}
