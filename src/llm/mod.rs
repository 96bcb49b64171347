pub mod gemini;
pub mod media;

pub use gemini::{generate_fused_image, generate_structured_json, GeneratedImage, PromptPart};
