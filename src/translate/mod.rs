//! Controller-to-protocol translation

mod translator;

pub use translator::{EventTranslator, PermissionPromptSpec, TranslatedMessage};
