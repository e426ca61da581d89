//! Query translation collaborator backed by Gemini `generateContent`.

pub mod client;
pub mod keys;
pub mod types;

pub use client::{GeminiTranslator, TranslateError, Translator};
pub use keys::KeyRotator;
