//! Anatomica Voice - bilingual voice command interpreter
//!
//! Recognized speech arrives as plain text in English or French. The
//! interpreter normalizes it, runs it through an ordered pattern table and
//! applies the resulting [`VoiceCommand`] to a [`CommandTarget`].

pub mod command;
pub mod interpreter;
pub mod lexicon;

pub use command::{CommandTarget, VoiceCommand};
pub use interpreter::{Intent, Language, Recognized, VoiceError, VoiceInterpreter};
pub use lexicon::normalize;
