use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FUSION_SYSTEM_PROMPT;
use crate::error::AppError;
use crate::llm::media::{format_data_uri, parse_data_uri, DataUri};
use crate::llm::{generate_fused_image, PromptPart};
use crate::utils::timing::{complete_request_timer, start_request_timer};

const REFERENCE_INSTRUCTION: &str =
    "This is the reference image. The final image should use this as the scene or background.";
const FACE_INSTRUCTION: &str = "This is the face image. Take the primary face from this image and seamlessly integrate it into the reference image. Ensure the style and lighting match the reference image.";
const GENERATE_INSTRUCTION: &str = "Generate the fused image.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFusionRequest {
    #[serde(default)]
    pub reference_image: String,
    #[serde(default)]
    pub face_image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFusionResult {
    pub fused_image: String,
}

fn validate_fusion_request(request: &ImageFusionRequest) -> Result<(DataUri, DataUri), AppError> {
    let reference = parse_data_uri(&request.reference_image).ok_or_else(|| {
        AppError::Validation(
            "referenceImage must be a base64 data URI with a MIME type".to_string(),
        )
    })?;
    let face = parse_data_uri(&request.face_image).ok_or_else(|| {
        AppError::Validation("faceImage must be a base64 data URI with a MIME type".to_string())
    })?;
    Ok((reference, face))
}

// Part order matters: each image is followed by the instruction that applies to it.
fn build_fusion_prompt(reference: &DataUri, face: &DataUri) -> Vec<PromptPart> {
    vec![
        PromptPart::InlineImage {
            mime_type: reference.mime_type.clone(),
            data: reference.data.clone(),
        },
        PromptPart::Text(REFERENCE_INSTRUCTION.to_string()),
        PromptPart::InlineImage {
            mime_type: face.mime_type.clone(),
            data: face.data.clone(),
        },
        PromptPart::Text(FACE_INSTRUCTION.to_string()),
        PromptPart::Text(GENERATE_INSTRUCTION.to_string()),
    ]
}

async fn fuse(request: ImageFusionRequest) -> Result<ImageFusionResult, AppError> {
    let (reference, face) = validate_fusion_request(&request)?;
    let parts = build_fusion_prompt(&reference, &face);
    let image = generate_fused_image(FUSION_SYSTEM_PROMPT, &parts).await?;
    info!(
        "Fused image generated ({}, {} base64 chars)",
        image.mime_type,
        image.data.len()
    );
    Ok(ImageFusionResult {
        fused_image: format_data_uri(&image.mime_type, &image.data),
    })
}

pub async fn fuse_images(
    Json(request): Json<ImageFusionRequest>,
) -> Result<Json<ImageFusionResult>, AppError> {
    let mut timer = start_request_timer("fuse");
    let outcome = fuse(request).await;
    match &outcome {
        Ok(_) => complete_request_timer(&mut timer, "success", None),
        Err(err) => complete_request_timer(&mut timer, "error", Some(err.to_string())),
    }
    outcome.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> ImageFusionRequest {
        ImageFusionRequest {
            reference_image: "data:image/jpeg;base64,QUJD".to_string(),
            face_image: "data:image/png;base64,REVG".to_string(),
        }
    }

    #[test]
    fn rejects_missing_reference_image() {
        let request = ImageFusionRequest {
            reference_image: String::new(),
            ..valid_request()
        };
        let err = validate_fusion_request(&request).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_missing_face_image() {
        let request = ImageFusionRequest {
            face_image: String::new(),
            ..valid_request()
        };
        assert!(matches!(
            validate_fusion_request(&request),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn rejects_plain_urls_and_raw_base64() {
        for bad in ["https://example.com/cat.png", "QUJDREVG", "data:;base64,AAAA"] {
            let request = ImageFusionRequest {
                reference_image: bad.to_string(),
                ..valid_request()
            };
            assert!(
                matches!(validate_fusion_request(&request), Err(AppError::Validation(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn accepts_well_formed_data_uris() {
        let (reference, face) = validate_fusion_request(&valid_request()).expect("valid input");
        assert_eq!(reference.mime_type, "image/jpeg");
        assert_eq!(face.mime_type, "image/png");
    }

    #[test]
    fn prompt_interleaves_images_and_instructions_in_order() {
        let (reference, face) = validate_fusion_request(&valid_request()).expect("valid input");
        let parts = build_fusion_prompt(&reference, &face);
        assert_eq!(parts.len(), 5);
        assert_eq!(
            parts[0],
            PromptPart::InlineImage {
                mime_type: "image/jpeg".to_string(),
                data: "QUJD".to_string(),
            }
        );
        assert_eq!(parts[1], PromptPart::Text(REFERENCE_INSTRUCTION.to_string()));
        assert_eq!(
            parts[2],
            PromptPart::InlineImage {
                mime_type: "image/png".to_string(),
                data: "REVG".to_string(),
            }
        );
        assert_eq!(parts[3], PromptPart::Text(FACE_INSTRUCTION.to_string()));
        assert_eq!(parts[4], PromptPart::Text(GENERATE_INSTRUCTION.to_string()));
    }
}
