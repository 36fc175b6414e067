//! Image generator implementations.

pub mod openai;

pub use openai::OpenAiImageGenerator;
