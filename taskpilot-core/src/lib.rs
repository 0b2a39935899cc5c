pub mod agent_output;
pub mod llm;
pub mod model;
pub mod prompt;
pub mod recording;

pub use agent_output::{parse_agent_output, response_schema, ParsedOutput};
pub use llm::{
    build_http_client, AgentPrompt, LlmClient, LlmError, OpenAIClient, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_OPENAI_MODEL,
};
pub use model::*;
pub use prompt::build_agent_prompt;
pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, Sanitizer, ServiceType,
    CORRELATION_ID_HEADER,
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short git hash of the build, or "unknown".
pub fn get_service_version() -> String {
    // Release builds inject the hash directly; cargo builds fall back to `built`.
    let hash = option_env!("TASKPILOT_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(git_hash) if git_hash.len() >= 8 => git_hash[..8].to_string(),
        Some(git_hash) => git_hash.to_string(),
        None => "unknown".to_string(),
    }
}
