use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One line of the JSONL recording log.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // RFC 3339
    pub correlation_id: String, // groups a request with its response
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String, // e.g. "POST /graphql", "response_200"
    pub data: serde_json::Value,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    GitHubApiCall,
    OpenAiApiCall,
    TelegramApiCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Which outbound client a recording middleware is attached to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    GitHub,
    OpenAi,
    Telegram,
}

impl ServiceType {
    pub fn event_type(&self) -> EventType {
        match self {
            ServiceType::GitHub => EventType::GitHubApiCall,
            ServiceType::OpenAi => EventType::OpenAiApiCall,
            ServiceType::Telegram => EventType::TelegramApiCall,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
