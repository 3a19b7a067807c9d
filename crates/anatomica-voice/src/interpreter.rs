//! Ordered pattern table turning utterances into commands
//!
//! Rows are evaluated top to bottom and the first row whose pattern matches
//! *and* whose extractor resolves wins. English and French rows for the same
//! intent sit next to each other. Specific phrasings come before catch-alls:
//! "show all" must win over "show <system>", which must win over
//! "show <structure>".

use regex::{Captures, Regex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandTarget, VoiceCommand};
use crate::lexicon::{normalize, resolve_slice, resolve_structure, resolve_system, resolve_zone};
use anatomica_core::SliceView;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid {intent:?} pattern for {language:?}: {source}")]
    PatternError {
        intent: Intent,
        language: Language,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    French,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ShowAll,
    Recalibrate,
    ExternalView,
    WhatIsThis,
    SetOpacity,
    SetSlice,
    Isolate,
    Hide,
    FilterSystem,
    SetZone,
    Focus,
}

type Extractor = fn(&Captures) -> Option<VoiceCommand>;

const RULES: &[(Intent, Language, &str, Extractor)] = &[
    // show all
    (
        Intent::ShowAll,
        Language::English,
        r"^(?:please )?(?:show|display) (?:me )?(?:all|everything)(?: structures)?$|^reset (?:the )?view$",
        |_| Some(VoiceCommand::ShowAll),
    ),
    (
        Intent::ShowAll,
        Language::French,
        r"^(?:(?:montre|affiche)[rz]?(?: moi)? tout|tout (?:montrer|afficher)|reinitialise[rz]? la vue)$",
        |_| Some(VoiceCommand::ShowAll),
    ),
    // recalibrate
    (
        Intent::Recalibrate,
        Language::English,
        r"\b(?:recalibrate|calibrate again|reset calibration)\b",
        |_| Some(VoiceCommand::Recalibrate),
    ),
    (
        Intent::Recalibrate,
        Language::French,
        r"\b(?:recalibre[rz]?|recalibrage|calibre[rz]? a nouveau)\b",
        |_| Some(VoiceCommand::Recalibrate),
    ),
    // external view
    (
        Intent::ExternalView,
        Language::English,
        r"\b(?:external|outside|exterior) view\b|\bview from outside\b",
        |_| Some(VoiceCommand::ExternalView),
    ),
    (
        Intent::ExternalView,
        Language::French,
        r"\bvue (?:externe|exterieure)\b",
        |_| Some(VoiceCommand::ExternalView),
    ),
    // what is this
    (
        Intent::WhatIsThis,
        Language::English,
        r"\bwhat (?:is|s) (?:this|that)\b",
        |_| Some(VoiceCommand::WhatIsThis),
    ),
    (
        Intent::WhatIsThis,
        Language::French,
        r"\bqu est ce que (?:c est|cela|ceci)\b|\bc est quoi\b",
        |_| Some(VoiceCommand::WhatIsThis),
    ),
    // opacity
    (
        Intent::SetOpacity,
        Language::English,
        r"\bopacity (?:to |at )?(\d{1,3})(?: %| percent)?\b",
        opacity,
    ),
    (
        Intent::SetOpacity,
        Language::French,
        r"\bopacite (?:a )?(\d{1,3})(?: %| pour cent| pourcent)?\b",
        opacity,
    ),
    // slice
    (
        Intent::SetSlice,
        Language::English,
        r"\b(?:no|remove|clear) (?:slice|cut|section)\b",
        |_| Some(VoiceCommand::SetSlice(SliceView::None)),
    ),
    (
        Intent::SetSlice,
        Language::French,
        r"\b(?:sans|enleve[rz]? la|supprime[rz]? la|retire[rz]? la) coupe\b",
        |_| Some(VoiceCommand::SetSlice(SliceView::None)),
    ),
    (
        Intent::SetSlice,
        Language::English,
        r"\b(?:slice|cut|section|plane) (?:view )?(\w+)$|\b(\w+) (?:slice|cut|section|plane|view)\b",
        slice,
    ),
    (
        Intent::SetSlice,
        Language::French,
        r"\bcoupe (\w+)$|\bvue (\w+)$",
        slice,
    ),
    // isolate
    (
        Intent::Isolate,
        Language::English,
        r"\bisolate (.+)$",
        |c| structure(c).map(VoiceCommand::Isolate),
    ),
    (
        Intent::Isolate,
        Language::French,
        r"\bisole[rz]? (.+)$",
        |c| structure(c).map(VoiceCommand::Isolate),
    ),
    // hide
    (
        Intent::Hide,
        Language::English,
        r"\bhide (.+)$",
        |c| structure(c).map(VoiceCommand::Hide),
    ),
    (
        Intent::Hide,
        Language::French,
        r"\b(?:cache[rz]?|masque[rz]?) (.+)$",
        |c| structure(c).map(VoiceCommand::Hide),
    ),
    // filter by system
    (
        Intent::FilterSystem,
        Language::English,
        r"\b(?:show|display|filter)(?: only)? (.+)$",
        |c| resolve_system(c.get(1)?.as_str()).map(VoiceCommand::FilterSystem),
    ),
    (
        Intent::FilterSystem,
        Language::French,
        r"\b(?:montre[rz]?|affiche[rz]?|filtre[rz]?)(?: seulement| uniquement)? (.+)$",
        |c| resolve_system(c.get(1)?.as_str()).map(VoiceCommand::FilterSystem),
    ),
    // zone
    (
        Intent::SetZone,
        Language::English,
        r"\b(?:go to|switch to|move to|zone) (.+)$",
        |c| resolve_zone(c.get(1)?.as_str()).map(VoiceCommand::SetZone),
    ),
    (
        Intent::SetZone,
        Language::French,
        r"\b(?:va|aller|allez|passe[rz]?) (?:a |vers )?(.+)$|\bzone (.+)$",
        |c| resolve_zone(first_group(c)?).map(VoiceCommand::SetZone),
    ),
    // focus
    (
        Intent::Focus,
        Language::English,
        r"\b(?:zoom(?: in)?(?: on)?|focus(?: on)?|show(?: me)?|look at) (.+)$",
        |c| structure(c).map(VoiceCommand::Focus),
    ),
    (
        Intent::Focus,
        Language::French,
        r"\b(?:zoome[rz]?|zoom|montre[rz]?(?: moi)?|affiche[rz]?|regarde[rz]?|centre[rz]?) (?:sur )?(.+)$",
        |c| structure(c).map(VoiceCommand::Focus),
    ),
];

fn first_group<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.iter().skip(1).flatten().next().map(|m| m.as_str())
}

fn structure(caps: &Captures) -> Option<String> {
    resolve_structure(caps.get(1)?.as_str()).map(str::to_string)
}

fn opacity(caps: &Captures) -> Option<VoiceCommand> {
    let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
    Some(VoiceCommand::SetOpacity((percent / 100.0).clamp(0.0, 1.0)))
}

fn slice(caps: &Captures) -> Option<VoiceCommand> {
    resolve_slice(first_group(caps)?).map(VoiceCommand::SetSlice)
}

struct Rule {
    intent: Intent,
    language: Language,
    pattern: Regex,
    extract: Extractor,
}

/// A recognized utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognized {
    pub intent: Intent,
    pub language: Language,
    pub command: VoiceCommand,
}

pub struct VoiceInterpreter {
    rules: Vec<Rule>,
}

impl VoiceInterpreter {
    pub fn new() -> Result<Self, VoiceError> {
        let rules = RULES
            .iter()
            .map(|&(intent, language, pattern, extract)| {
                Regex::new(pattern)
                    .map(|pattern| Rule {
                        intent,
                        language,
                        pattern,
                        extract,
                    })
                    .map_err(|source| VoiceError::PatternError {
                        intent,
                        language,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Match an utterance against the table without executing it
    pub fn recognize(&self, text: &str) -> Option<Recognized> {
        let text = normalize(text);
        if text.is_empty() {
            return None;
        }
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(&text) else {
                continue;
            };
            match (rule.extract)(&caps) {
                Some(command) => {
                    return Some(Recognized {
                        intent: rule.intent,
                        language: rule.language,
                        command,
                    })
                }
                None => debug!(intent = ?rule.intent, text = %text, "Pattern matched but name unresolved"),
            }
        }
        None
    }

    pub fn parse(&self, text: &str) -> Option<VoiceCommand> {
        self.recognize(text).map(|r| r.command)
    }

    /// Recognize and apply an utterance. Returns `false` when nothing matched,
    /// in which case the target is untouched.
    pub fn execute<T: CommandTarget + ?Sized>(&self, text: &str, target: &mut T) -> bool {
        self.execute_recognized(text, target).is_some()
    }

    /// Like [`execute`](Self::execute), returning what was recognized
    pub fn execute_recognized<T: CommandTarget + ?Sized>(&self, text: &str, target: &mut T) -> Option<Recognized> {
        match self.recognize(text) {
            Some(recognized) => {
                info!(
                    text = %text,
                    intent = ?recognized.intent,
                    language = ?recognized.language,
                    "Voice command"
                );
                recognized.command.apply(target);
                Some(recognized)
            }
            None => {
                info!(text = %text, "Voice command not recognized");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomica_core::{BodySystem, BodyZone, Lod, SharedState, Structure, ViewMode, ViewWriter};
    use approx::assert_relative_eq;

    struct TestTarget {
        view: ViewWriter,
        recalibrations: usize,
        zone: Option<BodyZone>,
    }

    impl CommandTarget for TestTarget {
        fn view(&self) -> &ViewWriter {
            &self.view
        }

        fn recalibrate(&mut self) {
            self.recalibrations += 1;
        }

        fn set_zone(&mut self, zone: BodyZone) {
            self.zone = Some(zone);
        }
    }

    fn setup() -> (VoiceInterpreter, SharedState, TestTarget) {
        let state = SharedState::new();
        let assets = state.asset_writer();
        for (i, (code, system)) in [
            ("HEART", BodySystem::Cardiovascular),
            ("LIVER", BodySystem::Digestive),
            ("AORTA", BodySystem::Cardiovascular),
        ]
        .into_iter()
        .enumerate()
        {
            assets.begin_fetch(&Structure::new(code, code, system), Lod::High, i as u64);
        }
        let target = TestTarget {
            view: state.view_writer(),
            recalibrations: 0,
            zone: None,
        };
        (VoiceInterpreter::new().unwrap(), state, target)
    }

    #[test]
    fn test_all_patterns_compile() {
        let interpreter = VoiceInterpreter::new().unwrap();
        assert_eq!(interpreter.rules.len(), RULES.len());
    }

    #[test]
    fn test_zoom_on_heart_in_french() {
        let (interpreter, state, mut target) = setup();
        assert!(interpreter.execute("zoom sur le cœur", &mut target));
        let snap = state.snapshot();
        assert_eq!(snap.focused_structure.as_deref(), Some("HEART"));
        assert_eq!(snap.view_mode, ViewMode::Isolated);
    }

    #[test]
    fn test_hide_liver() {
        let (interpreter, state, mut target) = setup();
        assert!(interpreter.execute("hide liver", &mut target));
        assert!(state.snapshot().hidden_structures.contains("LIVER"));
    }

    #[test]
    fn test_show_all_resets_view() {
        let (interpreter, state, mut target) = setup();
        interpreter.execute("isolate the aorta", &mut target);
        interpreter.execute("show the digestive system", &mut target);
        assert!(!state.snapshot().hidden_structures.is_empty());
        assert_eq!(state.snapshot().active_system_filter, Some(BodySystem::Digestive));

        assert!(interpreter.execute("show all", &mut target));
        let snap = state.snapshot();
        assert!(snap.hidden_structures.is_empty());
        assert_eq!(snap.active_system_filter, None);
        assert_eq!(snap.focused_structure, None);
        assert_eq!(snap.view_mode, ViewMode::Overview);
    }

    #[test]
    fn test_opacity_percentage() {
        let (interpreter, state, mut target) = setup();
        assert!(interpreter.execute("opacité 40", &mut target));
        assert_relative_eq!(state.snapshot().global_opacity, 0.4, epsilon = 1e-6);

        assert!(interpreter.execute("set opacity to 250 percent", &mut target));
        assert_eq!(state.snapshot().global_opacity, 1.0);
    }

    #[test]
    fn test_recalibrate_routes_to_target() {
        let (interpreter, _state, mut target) = setup();
        assert!(interpreter.execute("recalibrer", &mut target));
        assert!(interpreter.execute("please recalibrate", &mut target));
        assert_eq!(target.recalibrations, 2);
    }

    #[test]
    fn test_gibberish_leaves_state_untouched() {
        let (interpreter, state, mut target) = setup();
        let before = state.snapshot();
        assert!(!interpreter.execute("gibberish not a command", &mut target));
        assert_eq!(state.snapshot(), before);
        assert!(!interpreter.execute("", &mut target));
    }

    #[test]
    fn test_unknown_name_is_not_recognized() {
        let (interpreter, state, mut target) = setup();
        let before = state.revision();
        assert!(!interpreter.execute("hide the spaceship", &mut target));
        assert!(!interpreter.execute("va vers la lune", &mut target));
        assert_eq!(state.revision(), before);
        assert_eq!(target.zone, None);
    }

    #[test]
    fn test_show_prefers_system_then_structure() {
        let interpreter = VoiceInterpreter::new().unwrap();
        assert_eq!(
            interpreter.parse("show skeletal system"),
            Some(VoiceCommand::FilterSystem(BodySystem::Skeletal))
        );
        assert_eq!(interpreter.parse("show me the heart"), Some(VoiceCommand::Focus("HEART".into())));
        assert_eq!(interpreter.parse("montre le foie"), Some(VoiceCommand::Focus("LIVER".into())));
    }

    #[test]
    fn test_slice_zone_and_view_commands() {
        let interpreter = VoiceInterpreter::new().unwrap();
        assert_eq!(interpreter.parse("coupe sagittale"), Some(VoiceCommand::SetSlice(SliceView::Sagittal)));
        assert_eq!(interpreter.parse("axial view"), Some(VoiceCommand::SetSlice(SliceView::Axial)));
        assert_eq!(interpreter.parse("remove slice"), Some(VoiceCommand::SetSlice(SliceView::None)));
        assert_eq!(interpreter.parse("go to the head"), Some(VoiceCommand::SetZone(BodyZone::Head)));
        assert_eq!(interpreter.parse("zone abdomen"), Some(VoiceCommand::SetZone(BodyZone::Abdomen)));
        assert_eq!(interpreter.parse("passe a la poitrine"), Some(VoiceCommand::SetZone(BodyZone::Thorax)));
        assert_eq!(interpreter.parse("vue externe"), Some(VoiceCommand::ExternalView));
        assert_eq!(interpreter.parse("Qu'est-ce que c'est ?"), Some(VoiceCommand::WhatIsThis));
    }

    #[test]
    fn test_languages_reported() {
        let interpreter = VoiceInterpreter::new().unwrap();
        let r = interpreter.recognize("cache le foie").unwrap();
        assert_eq!(r.language, Language::French);
        assert_eq!(r.intent, Intent::Hide);
        assert_eq!(r.command, VoiceCommand::Hide("LIVER".into()));
    }
}
