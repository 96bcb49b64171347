use std::env;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub http_timeout_seconds: u64,
    pub max_upload_bytes: usize,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        if gemini_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("GEMINI_API_KEY is required"));
        }

        Ok(Config {
            bind_address: env_string("BIND_ADDRESS", "127.0.0.1:8080"),
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key,
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-2.0-flash-exp"),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.7),
            gemini_top_k: env_i32("GEMINI_TOP_K", 40),
            gemini_top_p: env_f32("GEMINI_TOP_P", 0.95),
            gemini_max_output_tokens: env_i32("GEMINI_MAX_OUTPUT_TOKENS", 4096),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 90),
            max_upload_bytes: env_usize("MAX_UPLOAD_BYTES", 32 * 1024 * 1024),
        })
    }
}

pub const PROJECT_IDEAS_SYSTEM_PROMPT: &str = "You are an experienced academic advisor specializing in guiding Bachelor of Computer Applications (BCA) students with their projects. Your goal is to provide creative, practical, and relevant project ideas tailored to their interests and skills.\n\nGenerate a list of 2-3 distinct project ideas based on the student's input. For each idea, provide:\n1. A clear and concise title.\n2. A detailed description (around 100-150 words) explaining the project's purpose, key features, and potential real-world application or learning value.\n3. An abstract (approx. 50-70 words) summarizing the project's core objectives, methodology, and expected outcomes. It should be a condensed version of the project's essence.\n4. A synopsis (approx. 100-120 words) that elaborates on the project. It should include a brief problem statement, the proposed solution, the scope of the project, and key modules or functionalities to be developed.\n5. A list of 3-5 suggested technologies (languages, frameworks, tools) suitable for a BCA student to implement the project.\n6. Optionally, a few (2-3) potential challenges or advanced features they could explore.\n\nEnsure the ideas are suitable for a BCA curriculum, considering typical timeframes and resource availability. Focus on ideas that allow students to showcase a range of skills learned during their BCA program. Ensure the abstract and synopsis are distinct and serve their respective purposes.\nRespond with JSON only, matching the requested schema.";

pub const FUSION_SYSTEM_PROMPT: &str = "You compose photographs. Follow the instructions attached to each input image. CRITICAL: the response must be an image, NOT TEXT.";
