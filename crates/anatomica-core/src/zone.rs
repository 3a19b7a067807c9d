//! Body zones, their adjacency, and the structures each zone owns

use serde::{Deserialize, Serialize};

/// Coarse body region used to scope which structures are streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyZone {
    Head,
    Thorax,
    Abdomen,
    Pelvis,
    UpperLimb,
    LowerLimb,
}

impl BodyZone {
    pub const ALL: [BodyZone; 6] = [
        BodyZone::Head,
        BodyZone::Thorax,
        BodyZone::Abdomen,
        BodyZone::Pelvis,
        BodyZone::UpperLimb,
        BodyZone::LowerLimb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Thorax => "thorax",
            Self::Abdomen => "abdomen",
            Self::Pelvis => "pelvis",
            Self::UpperLimb => "upper_limb",
            Self::LowerLimb => "lower_limb",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|z| z.as_str().eq_ignore_ascii_case(name))
    }

    /// Zones prefetched at low LOD while this zone is active
    pub fn adjacent(&self) -> &'static [BodyZone] {
        match self {
            Self::Head => &[BodyZone::Thorax],
            Self::Thorax => &[BodyZone::Head, BodyZone::Abdomen, BodyZone::UpperLimb],
            Self::Abdomen => &[BodyZone::Thorax, BodyZone::Pelvis],
            Self::Pelvis => &[BodyZone::Abdomen, BodyZone::LowerLimb],
            Self::UpperLimb => &[BodyZone::Thorax],
            Self::LowerLimb => &[BodyZone::Pelvis],
        }
    }

    pub fn is_adjacent_to(&self, other: BodyZone) -> bool {
        self.adjacent().contains(&other)
    }

    /// Structure codes owned by this zone, in load order.
    ///
    /// Lists are disjoint across zones.
    pub fn structure_codes(&self) -> &'static [&'static str] {
        match self {
            Self::Head => &["BRAIN", "SKULL", "EYE_LEFT", "EYE_RIGHT", "THYROID"],
            Self::Thorax => &[
                "HEART",
                "LUNG_LEFT",
                "LUNG_RIGHT",
                "AORTA",
                "TRACHEA",
                "ESOPHAGUS",
                "RIBCAGE",
            ],
            Self::Abdomen => &[
                "LIVER",
                "STOMACH",
                "SPLEEN",
                "PANCREAS",
                "GALLBLADDER",
                "KIDNEY_LEFT",
                "KIDNEY_RIGHT",
                "SMALL_INTESTINE",
            ],
            Self::Pelvis => &["BLADDER", "COLON", "RECTUM", "PELVIC_BONE"],
            Self::UpperLimb => &["HUMERUS", "RADIUS", "ULNA", "BRACHIAL_ARTERY"],
            Self::LowerLimb => &["FEMUR", "TIBIA", "FIBULA", "FEMORAL_ARTERY"],
        }
    }

    pub fn owns(&self, code: &str) -> bool {
        self.structure_codes().contains(&code)
    }

    /// Zone owning a structure code, if any
    pub fn owner_of(code: &str) -> Option<BodyZone> {
        Self::ALL.into_iter().find(|z| z.owns(code))
    }
}

impl Default for BodyZone {
    fn default() -> Self {
        Self::Thorax
    }
}

impl std::fmt::Display for BodyZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
