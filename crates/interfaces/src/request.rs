use phone_agent_core::{ClientError, TaskRequest};
use serde_json::error::Category;

const TASK_LOG_CHARS: usize = 160;

/// Decode a request body. An empty body reads as `{}` so the caller reports
/// `missing_task` rather than `invalid_json`.
pub fn parse_task_request(body: &[u8]) -> Result<TaskRequest, ClientError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TaskRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| match e.classify() {
        Category::Data => ClientError::InvalidRequest(e.to_string()),
        Category::Syntax | Category::Eof | Category::Io => ClientError::InvalidJson,
    })
}

/// Task text flattened to one line for logs and the `REQUEST` event.
pub fn short_task(task: &str) -> String {
    let flat = task.replace(['\r', '\n'], " ");
    if flat.chars().count() > TASK_LOG_CHARS {
        format!("{}...", flat.chars().take(TASK_LOG_CHARS).collect::<String>())
    } else {
        flat
    }
}
