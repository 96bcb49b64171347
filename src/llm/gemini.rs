use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::error::AppError;
use crate::llm::media::detect_mime_type;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

/// One segment of a multimodal prompt, in the order it is sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    InlineImage { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

fn redact_secret(text: &str, secret: &str) -> String {
    let secret = secret.trim();
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "[redacted]")
}

fn build_safety_settings() -> Vec<Value> {
    let profile = CONFIG.gemini_safety_settings.as_str();
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn prompt_parts_to_json(parts: &[PromptPart]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "text": text }),
            PromptPart::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data
                }
            }),
        })
        .collect()
}

fn summarize_payload_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_payload(payload: &Value, system_prompt_label: Option<&str>) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        let label = system_prompt_label.unwrap_or("inline_system_prompt");
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_payload_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(content) = &candidate.content {
            if let Some(parts) = &content.parts {
                for part in parts {
                    match part {
                        GeminiPart::Text { text } => {
                            text_parts += 1;
                            if text_preview.is_none() && !text.trim().is_empty() {
                                text_preview = Some(truncate_for_log(text, 200));
                            }
                        }
                        GeminiPart::InlineData { inline_data } => {
                            if inline_data.mime_type.starts_with("image/") {
                                image_parts += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::Text { text } = part {
                        if !text.trim().is_empty() {
                            text_parts.push(text);
                        }
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn sniffed_image_mime(data: &str) -> Option<String> {
    let bytes = general_purpose::STANDARD.decode(data).ok()?;
    let mime = detect_mime_type(&bytes)?;
    mime.starts_with("image/").then_some(mime)
}

fn fused_image_from_response(response: GeminiResponse) -> Result<GeneratedImage, AppError> {
    for candidate in response.candidates.unwrap_or_default() {
        let Some(content) = candidate.content else {
            continue;
        };
        let Some(parts) = content.parts else {
            continue;
        };
        for part in parts {
            let GeminiPart::InlineData { inline_data } = part else {
                continue;
            };
            if inline_data.data.trim().is_empty() {
                continue;
            }
            // Some responses label image bytes with a generic MIME type; sniff those.
            let mime_type = if inline_data.mime_type.starts_with("image/") {
                inline_data.mime_type
            } else {
                match sniffed_image_mime(&inline_data.data) {
                    Some(mime) => mime,
                    None => continue,
                }
            };
            return Ok(GeneratedImage {
                mime_type,
                data: inline_data.data,
            });
        }
    }

    Err(AppError::Generation(
        "no image was returned by the model".to_string(),
    ))
}

async fn call_gemini_api(
    model: &str,
    payload: Value,
    system_prompt_label: Option<&str>,
) -> Result<GeminiResponse, AppError> {
    let client = get_http_client();
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
        model, CONFIG.gemini_api_key
    );

    if tracing::enabled!(tracing::Level::DEBUG) {
        let payload_summary = summarize_payload(&payload, system_prompt_label);
        debug!(target: "llm.gemini", model = model, payload = %payload_summary);
    }

    let response = match client.post(&url).json(&payload).send().await {
        Ok(response) => response,
        Err(err) => {
            let err_text = redact_secret(&err.to_string(), &CONFIG.gemini_api_key);
            warn!(
                "Gemini request failed to send: {} (timeout={}, connect={}, status={:?})",
                err_text,
                err.is_timeout(),
                err.is_connect(),
                err.status()
            );
            return Err(AppError::Transport(format!(
                "Gemini request failed: {}",
                err_text
            )));
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        warn!("Gemini API error: status={}, body={}", status, body_summary);
        let detail = message.unwrap_or(body_summary);
        return Err(AppError::Transport(format!(
            "Gemini request failed with status {}: {}",
            status,
            redact_secret(&detail, &CONFIG.gemini_api_key)
        )));
    }

    let value = response
        .json::<GeminiResponse>()
        .await
        .map_err(|err| AppError::Transport(format!("Gemini response decode failed: {}", err)))?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        let response_summary = summarize_response(&value);
        debug!(target: "llm.gemini", model = model, response = %response_summary);
    }
    Ok(value)
}

pub async fn generate_fused_image(
    system_prompt: &str,
    parts: &[PromptPart],
) -> Result<GeneratedImage, AppError> {
    let payload = json!({
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{ "role": "user", "parts": prompt_parts_to_json(parts) }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"]
        },
        "safetySettings": build_safety_settings(),
    });

    let model = &CONFIG.gemini_image_model;
    log_llm_timing("gemini", model, "generate_fused_image", || async {
        let response = call_gemini_api(model, payload, Some("fusion_system_prompt")).await?;
        fused_image_from_response(response)
    })
    .await
}

pub async fn generate_structured_json(
    system_prompt: &str,
    user_prompt: &str,
    response_schema: Value,
    operation: &'static str,
) -> Result<String, AppError> {
    let payload = json!({
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{ "role": "user", "parts": [{ "text": user_prompt }] }],
        "generationConfig": {
            "temperature": CONFIG.gemini_temperature,
            "topK": CONFIG.gemini_top_k,
            "topP": CONFIG.gemini_top_p,
            "maxOutputTokens": CONFIG.gemini_max_output_tokens,
            "responseMimeType": "application/json",
            "responseSchema": response_schema,
        },
        "safetySettings": build_safety_settings(),
    });

    let model = &CONFIG.gemini_model;
    log_llm_timing("gemini", model, operation, || async {
        let response = call_gemini_api(model, payload, Some(operation)).await?;
        Ok(extract_text_from_response(response))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::media::format_data_uri;

    fn response_with_parts(parts: Vec<GeminiPart>) -> GeminiResponse {
        GeminiResponse {
            candidates: Some(vec![GeminiCandidate {
                content: Some(GeminiContent { parts: Some(parts) }),
            }]),
        }
    }

    #[test]
    fn fused_image_requires_an_image_part() {
        let response = response_with_parts(vec![GeminiPart::Text {
            text: "I cannot generate that image.".to_string(),
        }]);
        let err = fused_image_from_response(response).unwrap_err();
        assert!(matches!(err, AppError::Generation(_)));

        let empty = GeminiResponse { candidates: None };
        assert!(matches!(
            fused_image_from_response(empty),
            Err(AppError::Generation(_))
        ));
    }

    #[test]
    fn fused_image_round_trips_into_a_data_uri() {
        let response = response_with_parts(vec![GeminiPart::InlineData {
            inline_data: GeminiInlineData {
                mime_type: "image/png".to_string(),
                data: "AAA".to_string(),
            },
        }]);
        let image = fused_image_from_response(response).expect("image part present");
        assert_eq!(
            format_data_uri(&image.mime_type, &image.data),
            "data:image/png;base64,AAA"
        );
    }

    #[test]
    fn fused_image_sniffs_generic_mime_types() {
        let png_magic = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let encoded = general_purpose::STANDARD.encode(png_magic);
        let response = response_with_parts(vec![GeminiPart::InlineData {
            inline_data: GeminiInlineData {
                mime_type: "application/octet-stream".to_string(),
                data: encoded.clone(),
            },
        }]);
        let image = fused_image_from_response(response).expect("sniffable image");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, encoded);
    }

    #[test]
    fn fused_image_skips_empty_parts_and_keeps_searching() {
        let response = response_with_parts(vec![
            GeminiPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: "image/png".to_string(),
                    data: "   ".to_string(),
                },
            },
            GeminiPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: "image/jpeg".to_string(),
                    data: "BBB".to_string(),
                },
            },
        ]);
        let image = fused_image_from_response(response).expect("second part is usable");
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[test]
    fn extract_text_joins_non_empty_text_parts() {
        let response = response_with_parts(vec![
            GeminiPart::Text {
                text: "first".to_string(),
            },
            GeminiPart::Text {
                text: "   ".to_string(),
            },
            GeminiPart::Text {
                text: "second".to_string(),
            },
        ]);
        assert_eq!(extract_text_from_response(response), "first\nsecond");
    }

    #[test]
    fn response_decodes_from_wire_json() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is the image."},
                        {"inlineData": {"mimeType": "image/png", "data": "AAA"}}
                    ]
                }
            }]
        }"#;
        let response: GeminiResponse = serde_json::from_str(raw).expect("valid wire shape");
        let image = fused_image_from_response(response).expect("image part present");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "AAA");
    }

    #[test]
    fn prompt_parts_serialize_in_order() {
        let parts = vec![
            PromptPart::InlineImage {
                mime_type: "image/png".to_string(),
                data: "AAA".to_string(),
            },
            PromptPart::Text("scene".to_string()),
        ];
        let values = prompt_parts_to_json(&parts);
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0].pointer("/inlineData/mimeType").and_then(|v| v.as_str()),
            Some("image/png")
        );
        assert_eq!(values[1].get("text").and_then(|v| v.as_str()), Some("scene"));
    }

    #[test]
    fn error_body_summary_prefers_nested_message() {
        let (message, _) = summarize_error_body(
            r#"{"error": {"code": 400, "message": "API key not valid"}}"#,
        );
        assert_eq!(message.as_deref(), Some("API key not valid"));

        let (message, summary) = summarize_error_body("not json at all");
        assert!(message.is_none());
        assert_eq!(summary, "not json at all");

        let (message, summary) = summarize_error_body("   ");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }

    #[test]
    fn secrets_are_redacted_from_error_text() {
        let redacted = redact_secret("https://host/path?key=sk-123 failed", "sk-123");
        assert_eq!(redacted, "https://host/path?key=[redacted] failed");
        assert_eq!(redact_secret("unchanged", ""), "unchanged");
    }
}
