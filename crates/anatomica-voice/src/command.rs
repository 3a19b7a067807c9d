//! Structured visualization commands and the surface they act on

use anatomica_core::{BodySystem, BodyZone, SliceView, ViewMode, ViewWriter};
use serde::Serialize;
use tracing::info;

/// A recognized voice command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum VoiceCommand {
    /// Centre the view on one structure
    Focus(String),
    /// Hide every other loaded structure and focus on this one
    Isolate(String),
    Hide(String),
    /// Clear hidden set, system filter and focus; back to overview
    ShowAll,
    FilterSystem(BodySystem),
    SetSlice(SliceView),
    /// Global opacity in 0..1
    SetOpacity(f32),
    Recalibrate,
    ExternalView,
    SetZone(BodyZone),
    /// Acknowledged; no state change
    WhatIsThis,
}

/// Session side of command execution.
///
/// Presentation changes go through the [`ViewWriter`]; calibration and zone
/// changes are routed to the components that own those fields.
pub trait CommandTarget {
    fn view(&self) -> &ViewWriter;

    /// Drop calibration and schedule a new attempt
    fn recalibrate(&mut self);

    /// Pin the current zone
    fn set_zone(&mut self, zone: BodyZone);
}

impl VoiceCommand {
    pub fn apply<T: CommandTarget + ?Sized>(&self, target: &mut T) {
        match self {
            Self::Focus(code) => target.view().focus(code),
            Self::Isolate(code) => target.view().isolate(code),
            Self::Hide(code) => target.view().hide(code),
            Self::ShowAll => target.view().show_all(),
            Self::FilterSystem(system) => target.view().filter_system(Some(*system)),
            Self::SetSlice(view) => target.view().set_slice_view(*view),
            Self::SetOpacity(opacity) => target.view().set_opacity(*opacity),
            Self::Recalibrate => target.recalibrate(),
            Self::ExternalView => target.view().set_view_mode(ViewMode::External),
            Self::SetZone(zone) => target.set_zone(*zone),
            Self::WhatIsThis => info!("Structure query acknowledged"),
        }
    }
}
