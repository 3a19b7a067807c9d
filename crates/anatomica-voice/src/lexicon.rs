//! Bilingual (English / French) name tables
//!
//! All lookups operate on text already passed through [`normalize`], so table
//! keys are lower-case ASCII with single spaces.

use anatomica_core::{BodySystem, BodyZone, SliceView};

/// Lower-case, fold French accents and ligatures, turn punctuation into
/// spaces and collapse runs of whitespace
pub fn normalize(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'â' | 'ä' | 'á' => folded.push('a'),
            'é' | 'è' | 'ê' | 'ë' => folded.push('e'),
            'î' | 'ï' | 'í' => folded.push('i'),
            'ô' | 'ö' | 'ó' => folded.push('o'),
            'ù' | 'û' | 'ü' | 'ú' => folded.push('u'),
            'ÿ' => folded.push('y'),
            'ç' => folded.push('c'),
            'œ' => folded.push_str("oe"),
            'æ' => folded.push_str("ae"),
            '%' => folded.push_str(" % "),
            c if c.is_alphanumeric() => folded.push(c),
            _ => folded.push(' '),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Leading words dropped before a name lookup
const FILLERS: &[&str] = &[
    "the", "a", "an", "my", "on", "le", "la", "les", "l", "du", "de", "des", "un", "une", "sur", "au", "aux",
];

/// Trailing politeness dropped before a name lookup
const TRAILERS: &[&str] = &["please", "s il te plait", "s il vous plait", "svp"];

/// Strip fillers and politeness around a captured name
pub fn clean_name(name: &str) -> &str {
    let mut name = name.trim();
    for trailer in TRAILERS {
        if let Some(rest) = name.strip_suffix(trailer) {
            name = rest.trim_end();
        }
    }
    loop {
        let stripped = FILLERS.iter().find_map(|f| {
            name.strip_prefix(f)
                .and_then(|rest| rest.strip_prefix(' '))
        });
        match stripped {
            Some(rest) => name = rest.trim_start(),
            None => return name,
        }
    }
}

const STRUCTURES: &[(&str, &str)] = &[
    // Head
    ("brain", "BRAIN"),
    ("cerveau", "BRAIN"),
    ("skull", "SKULL"),
    ("crane", "SKULL"),
    ("left eye", "EYE_LEFT"),
    ("oeil gauche", "EYE_LEFT"),
    ("right eye", "EYE_RIGHT"),
    ("oeil droit", "EYE_RIGHT"),
    ("thyroid", "THYROID"),
    ("thyroide", "THYROID"),
    // Thorax
    ("heart", "HEART"),
    ("coeur", "HEART"),
    ("left lung", "LUNG_LEFT"),
    ("poumon gauche", "LUNG_LEFT"),
    ("right lung", "LUNG_RIGHT"),
    ("poumon droit", "LUNG_RIGHT"),
    ("aorta", "AORTA"),
    ("aorte", "AORTA"),
    ("trachea", "TRACHEA"),
    ("windpipe", "TRACHEA"),
    ("trachee", "TRACHEA"),
    ("esophagus", "ESOPHAGUS"),
    ("oesophage", "ESOPHAGUS"),
    ("ribcage", "RIBCAGE"),
    ("rib cage", "RIBCAGE"),
    ("ribs", "RIBCAGE"),
    ("cage thoracique", "RIBCAGE"),
    ("cotes", "RIBCAGE"),
    // Abdomen
    ("liver", "LIVER"),
    ("foie", "LIVER"),
    ("stomach", "STOMACH"),
    ("estomac", "STOMACH"),
    ("spleen", "SPLEEN"),
    ("rate", "SPLEEN"),
    ("pancreas", "PANCREAS"),
    ("gallbladder", "GALLBLADDER"),
    ("gall bladder", "GALLBLADDER"),
    ("vesicule biliaire", "GALLBLADDER"),
    ("left kidney", "KIDNEY_LEFT"),
    ("rein gauche", "KIDNEY_LEFT"),
    ("right kidney", "KIDNEY_RIGHT"),
    ("rein droit", "KIDNEY_RIGHT"),
    ("small intestine", "SMALL_INTESTINE"),
    ("intestin grele", "SMALL_INTESTINE"),
    // Pelvis
    ("bladder", "BLADDER"),
    ("vessie", "BLADDER"),
    ("colon", "COLON"),
    ("rectum", "RECTUM"),
    ("pelvic bone", "PELVIC_BONE"),
    ("hip bone", "PELVIC_BONE"),
    ("os iliaque", "PELVIC_BONE"),
    // Upper limb
    ("humerus", "HUMERUS"),
    ("radius", "RADIUS"),
    ("ulna", "ULNA"),
    ("cubitus", "ULNA"),
    ("brachial artery", "BRACHIAL_ARTERY"),
    ("artere brachiale", "BRACHIAL_ARTERY"),
    // Lower limb
    ("femur", "FEMUR"),
    ("tibia", "TIBIA"),
    ("fibula", "FIBULA"),
    ("perone", "FIBULA"),
    ("femoral artery", "FEMORAL_ARTERY"),
    ("artere femorale", "FEMORAL_ARTERY"),
];

const SYSTEMS: &[(&str, BodySystem)] = &[
    ("skeletal", BodySystem::Skeletal),
    ("skeleton", BodySystem::Skeletal),
    ("bones", BodySystem::Skeletal),
    ("squelette", BodySystem::Skeletal),
    ("osseux", BodySystem::Skeletal),
    ("os", BodySystem::Skeletal),
    ("muscular", BodySystem::Muscular),
    ("muscles", BodySystem::Muscular),
    ("musculaire", BodySystem::Muscular),
    ("cardiovascular", BodySystem::Cardiovascular),
    ("vascular", BodySystem::Cardiovascular),
    ("vessels", BodySystem::Cardiovascular),
    ("cardiovasculaire", BodySystem::Cardiovascular),
    ("vaisseaux", BodySystem::Cardiovascular),
    ("respiratory", BodySystem::Respiratory),
    ("respiratoire", BodySystem::Respiratory),
    ("digestive", BodySystem::Digestive),
    ("digestif", BodySystem::Digestive),
    ("nervous", BodySystem::Nervous),
    ("nerveux", BodySystem::Nervous),
    ("urinary", BodySystem::Urinary),
    ("urinaire", BodySystem::Urinary),
    ("endocrine", BodySystem::Endocrine),
    ("endocrinien", BodySystem::Endocrine),
    ("lymphatic", BodySystem::Lymphatic),
    ("lymphatique", BodySystem::Lymphatic),
    ("reproductive", BodySystem::Reproductive),
    ("reproducteur", BodySystem::Reproductive),
];

const ZONES: &[(&str, BodyZone)] = &[
    ("head", BodyZone::Head),
    ("tete", BodyZone::Head),
    ("thorax", BodyZone::Thorax),
    ("chest", BodyZone::Thorax),
    ("poitrine", BodyZone::Thorax),
    ("abdomen", BodyZone::Abdomen),
    ("belly", BodyZone::Abdomen),
    ("ventre", BodyZone::Abdomen),
    ("pelvis", BodyZone::Pelvis),
    ("bassin", BodyZone::Pelvis),
    ("arm", BodyZone::UpperLimb),
    ("arms", BodyZone::UpperLimb),
    ("upper limb", BodyZone::UpperLimb),
    ("bras", BodyZone::UpperLimb),
    ("membre superieur", BodyZone::UpperLimb),
    ("leg", BodyZone::LowerLimb),
    ("legs", BodyZone::LowerLimb),
    ("lower limb", BodyZone::LowerLimb),
    ("jambe", BodyZone::LowerLimb),
    ("jambes", BodyZone::LowerLimb),
    ("membre inferieur", BodyZone::LowerLimb),
];

const SLICES: &[(&str, SliceView)] = &[
    ("axial", SliceView::Axial),
    ("axiale", SliceView::Axial),
    ("transverse", SliceView::Axial),
    ("sagittal", SliceView::Sagittal),
    ("sagittale", SliceView::Sagittal),
    ("coronal", SliceView::Coronal),
    ("coronale", SliceView::Coronal),
    ("frontal", SliceView::Coronal),
    ("frontale", SliceView::Coronal),
    ("none", SliceView::None),
    ("off", SliceView::None),
    ("aucune", SliceView::None),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    let name = clean_name(name);
    table.iter().find(|(key, _)| *key == name).map(|(_, value)| *value)
}

/// Structure code for a spoken name, e.g. "le coeur" -> "HEART"
pub fn resolve_structure(name: &str) -> Option<&'static str> {
    let name = clean_name(name);
    // Also accept the code itself, e.g. "small_intestine" spoken as "small intestine"
    STRUCTURES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, code)| *code)
        .or_else(|| {
            STRUCTURES
                .iter()
                .map(|(_, code)| *code)
                .find(|code| code.eq_ignore_ascii_case(&name.replace(' ', "_")))
        })
}

/// Body system for a spoken name; a trailing "system"/"systeme" is ignored
pub fn resolve_system(name: &str) -> Option<BodySystem> {
    let name = clean_name(name);
    let name = name
        .strip_suffix(" system")
        .or_else(|| name.strip_prefix("systeme "))
        .or_else(|| name.strip_prefix("appareil "))
        .unwrap_or(name);
    lookup(SYSTEMS, name)
}

pub fn resolve_zone(name: &str) -> Option<BodyZone> {
    let name = clean_name(name);
    let name = name.strip_prefix("zone ").unwrap_or(name);
    lookup(ZONES, name).or_else(|| BodyZone::from_name(&name.replace(' ', "_")))
}

pub fn resolve_slice(name: &str) -> Option<SliceView> {
    lookup(SLICES, name)
}
