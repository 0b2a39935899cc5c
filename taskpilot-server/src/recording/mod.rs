//! JSONL recording of outbound HTTP calls.
//!
//! When `RECORDING_ENABLED` is set, every request the GitHub, OpenAI and
//! Telegram clients make passes through [`RecordingMiddleware`], which writes a
//! sanitised request/response pair to the log through [`RecordingLogger`].

pub mod logger;
pub mod middleware;

pub use logger::RecordingLogger;
pub use middleware::RecordingMiddleware;
pub use taskpilot_core::recording::*;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

/// Wrap `client`, adding recording middleware when a logger is configured.
pub fn with_recording(
    client: reqwest::Client,
    logger: Option<&RecordingLogger>,
    service_type: ServiceType,
) -> ClientWithMiddleware {
    let mut builder = ClientBuilder::new(client);
    if let Some(logger) = logger {
        builder = builder.with(RecordingMiddleware::new(
            logger.clone_for_middleware(),
            service_type,
        ));
    }
    builder.build()
}
