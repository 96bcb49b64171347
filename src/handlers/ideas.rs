use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::config::PROJECT_IDEAS_SYSTEM_PROMPT;
use crate::error::AppError;
use crate::llm::generate_structured_json;
use crate::utils::timing::{complete_request_timer, start_request_timer};

const MIN_INTERESTS_CHARS: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaRequest {
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub technologies: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdea {
    pub title: String,
    pub description: String,
    pub r#abstract: String,
    pub synopsis: String,
    pub suggested_technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_challenges: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdeaResult {
    pub ideas: Vec<ProjectIdea>,
}

fn validate_idea_request(request: &IdeaRequest) -> Result<(), AppError> {
    if request.interests.trim().chars().count() < MIN_INTERESTS_CHARS {
        return Err(AppError::Validation(format!(
            "interests must be at least {} characters long",
            MIN_INTERESTS_CHARS
        )));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn build_ideas_prompt(request: &IdeaRequest) -> String {
    let mut lines = vec![format!("Interests: {}", request.interests.trim())];
    if let Some(technologies) = non_empty(&request.technologies) {
        lines.push(format!("Preferred Technologies: {}", technologies));
    }
    if let Some(project_type) = non_empty(&request.project_type) {
        lines.push(format!("Preferred Project Type: {}", project_type));
    }
    if let Some(difficulty) = non_empty(&request.difficulty) {
        lines.push(format!("Preferred Difficulty: {}", difficulty));
    }
    format!("Based on the student's input:\n{}", lines.join("\n"))
}

fn ideas_response_schema() -> Value {
    let idea_schema = json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "description": { "type": "STRING" },
            "abstract": { "type": "STRING" },
            "synopsis": { "type": "STRING" },
            "suggestedTechnologies": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            },
            "potentialChallenges": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": ["title", "description", "abstract", "synopsis", "suggestedTechnologies"]
    });

    json!({
        "type": "OBJECT",
        "properties": {
            "ideas": {
                "type": "ARRAY",
                "items": idea_schema
            }
        },
        "required": ["ideas"]
    })
}

// The model is asked for raw JSON, but replies occasionally arrive wrapped in
// code fences or prose; fall back to the outermost object slice.
fn parse_ideas_from_text(raw: &str) -> Option<Vec<ProjectIdea>> {
    let trimmed = raw.trim();
    if let Ok(result) = serde_json::from_str::<IdeaResult>(trimmed) {
        return Some(result.ideas);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<IdeaResult>(&trimmed[start..=end])
        .ok()
        .map(|result| result.ideas)
}

async fn generate(request: IdeaRequest) -> Result<IdeaResult, AppError> {
    validate_idea_request(&request)?;
    let prompt = build_ideas_prompt(&request);
    let raw = generate_structured_json(
        PROJECT_IDEAS_SYSTEM_PROMPT,
        &prompt,
        ideas_response_schema(),
        "generate_project_ideas",
    )
    .await?;

    let ideas = parse_ideas_from_text(&raw).ok_or_else(|| {
        AppError::Generation("the model returned no parsable project ideas".to_string())
    })?;
    info!("Generated {} project idea(s)", ideas.len());
    Ok(IdeaResult { ideas })
}

pub async fn generate_ideas(
    Json(request): Json<IdeaRequest>,
) -> Result<Json<IdeaResult>, AppError> {
    let mut timer = start_request_timer("ideas");
    let outcome = generate(request).await;
    match &outcome {
        Ok(_) => complete_request_timer(&mut timer, "success", None),
        Err(err) => complete_request_timer(&mut timer, "error", Some(err.to_string())),
    }
    outcome.map(Json)
}
