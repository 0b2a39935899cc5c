//! Structured output contract between stage agents and the workflow.
//!
//! Every agent replies with a JSON envelope:
//!
//! ```json
//! {"outcome": "artifact", "artifact": { ... }, "clarification": null}
//! {"outcome": "clarification", "artifact": null, "clarification": {"question": "...", "context": "...", "options": []}}
//! ```
//!
//! The artifact object's shape depends on the stage. [`response_schema`]
//! produces the strict JSON schema sent with the request and
//! [`parse_agent_output`] validates the reply against the same contract.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::model::{AgentStage, ArtifactBody, QuestionDraft, ReviewComment, ReviewVerdict};

/// Result of parsing an agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutput {
    Artifact(ArtifactBody),
    ClarificationNeeded(QuestionDraft),
    ParseError(String),
}

/// Schema name sent alongside [`response_schema`].
pub fn schema_name(stage: AgentStage) -> String {
    match stage {
        AgentStage::ProductDesign | AgentStage::TechDesign | AgentStage::BugInvestigation => {
            "TaskpilotDesign".to_string()
        }
        AgentStage::Implementation => "TaskpilotImplementation".to_string(),
        AgentStage::PrReview => "TaskpilotReview".to_string(),
    }
}

fn strict_object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn artifact_schema(stage: AgentStage) -> Value {
    match stage {
        AgentStage::ProductDesign | AgentStage::TechDesign | AgentStage::BugInvestigation => {
            strict_object(json!({"document": {"type": "string"}}), &["document"])
        }
        AgentStage::Implementation => strict_object(
            json!({
                "summary": {"type": "string"},
                "diff": {"type": "string"},
                "commit_message": {"type": "string"},
            }),
            &["summary", "diff", "commit_message"],
        ),
        AgentStage::PrReview => {
            let comment = strict_object(
                json!({
                    "path": {"type": ["string", "null"]},
                    "line": {"type": ["integer", "null"]},
                    "body": {"type": "string"},
                }),
                &["path", "line", "body"],
            );
            strict_object(
                json!({
                    "verdict": {"type": "string", "enum": ["approve", "request_changes"]},
                    "summary": {"type": "string"},
                    "comments": {"type": "array", "items": comment},
                }),
                &["verdict", "summary", "comments"],
            )
        }
    }
}

/// Strict JSON schema for the reply of `stage`.
pub fn response_schema(stage: AgentStage) -> Value {
    let clarification = strict_object(
        json!({
            "question": {"type": "string"},
            "context": {"type": "string"},
            "options": {"type": "array", "items": {"type": "string"}},
        }),
        &["question", "context", "options"],
    );
    strict_object(
        json!({
            "outcome": {"type": "string", "enum": ["artifact", "clarification"]},
            "artifact": {"anyOf": [artifact_schema(stage), {"type": "null"}]},
            "clarification": {"anyOf": [clarification, {"type": "null"}]},
        }),
        &["outcome", "artifact", "clarification"],
    )
}

/// Pull the JSON document out of a reply that may be wrapped in a code fence.
fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }

    let fence_start = trimmed.find("```")?;
    let after_fence = &trimmed[fence_start + 3..];
    // Skip the info string ("json", or nothing).
    let body_start = after_fence.find('\n')? + 1;
    let info = after_fence[..body_start].trim();
    if !info.is_empty() && !info.eq_ignore_ascii_case("json") {
        return None;
    }
    let body = &after_fence[body_start..];
    let fence_end = body.find("```")?;
    Some(body[..fence_end].trim())
}

#[derive(Deserialize)]
struct DesignFields {
    document: String,
}

#[derive(Deserialize)]
struct ImplementationFields {
    summary: String,
    #[serde(default)]
    diff: String,
    commit_message: String,
}

#[derive(Deserialize)]
struct ReviewFields {
    verdict: ReviewVerdict,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    comments: Vec<ReviewComment>,
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("'{}' must not be empty", field))
    } else {
        Ok(())
    }
}

fn parse_artifact(stage: AgentStage, value: Value) -> Result<ArtifactBody, String> {
    match stage {
        AgentStage::ProductDesign | AgentStage::TechDesign | AgentStage::BugInvestigation => {
            let fields: DesignFields = serde_json::from_value(value)
                .map_err(|e| format!("invalid design artifact: {}", e))?;
            non_empty("document", &fields.document)?;
            Ok(ArtifactBody::Design {
                document: fields.document,
            })
        }
        AgentStage::Implementation => {
            let fields: ImplementationFields = serde_json::from_value(value)
                .map_err(|e| format!("invalid implementation artifact: {}", e))?;
            non_empty("summary", &fields.summary)?;
            non_empty("commit_message", &fields.commit_message)?;
            Ok(ArtifactBody::Implementation {
                summary: fields.summary,
                diff: fields.diff,
                commit_message: fields.commit_message,
            })
        }
        AgentStage::PrReview => {
            let fields: ReviewFields = serde_json::from_value(value)
                .map_err(|e| format!("invalid review artifact: {}", e))?;
            Ok(ArtifactBody::Review {
                verdict: fields.verdict,
                summary: fields.summary,
                comments: fields.comments,
            })
        }
    }
}

fn parse_envelope(stage: AgentStage, raw: &str) -> Result<ParsedOutput, String> {
    let json_text = extract_json(raw).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let mut envelope: Value =
        serde_json::from_str(json_text).map_err(|e| format!("reply is not valid JSON: {}", e))?;
    let object = envelope
        .as_object_mut()
        .ok_or_else(|| "reply is not a JSON object".to_string())?;

    let outcome = object
        .get("outcome")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'outcome' discriminator".to_string())?
        .to_string();

    match outcome.as_str() {
        "artifact" => {
            let artifact = object
                .remove("artifact")
                .filter(|v| !v.is_null())
                .ok_or_else(|| "outcome is 'artifact' but no artifact was given".to_string())?;
            parse_artifact(stage, artifact).map(ParsedOutput::Artifact)
        }
        "clarification" => {
            let clarification = object
                .remove("clarification")
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    "outcome is 'clarification' but no clarification was given".to_string()
                })?;
            let draft: QuestionDraft = serde_json::from_value(clarification)
                .map_err(|e| format!("invalid clarification: {}", e))?;
            non_empty("question", &draft.question)?;
            Ok(ParsedOutput::ClarificationNeeded(draft))
        }
        other => Err(format!("unknown outcome '{}'", other)),
    }
}

/// Validate an agent reply for `stage`.
///
/// Never fails: malformed replies come back as [`ParsedOutput::ParseError`].
pub fn parse_agent_output(stage: AgentStage, raw: &str) -> ParsedOutput {
    parse_envelope(stage, raw).unwrap_or_else(ParsedOutput::ParseError)
}
