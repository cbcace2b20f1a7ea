use crate::parse::{parse_answer, split_response};
use crate::prompt::system_prompt;
use async_trait::async_trait;
use phone_agent_core::{ActionSet, PlanContext, PlanOutcome, Planner, PlannerError};
use reqwest::Client;
use serde_json::{json, Value};

/// Planner backed by an OpenAI-compatible `/chat/completions` endpoint
/// serving a vision model.
pub struct OpenAiPlanner {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAiPlanner {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            // Local servers are commonly started with a placeholder key.
            api_key: api_key.filter(|k| !k.is_empty() && k != "EMPTY"),
            model,
            max_tokens: 3000,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Check that the endpoint answers `GET /models`.
    pub async fn probe(&self) -> Result<(), PlannerError> {
        let mut request = self.client.get(format!("{}/models", self.base_url));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| PlannerError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PlannerError::Api(response.status().to_string()));
        }
        Ok(())
    }

    async fn complete(&self, messages: &[Value]) -> Result<String, PlannerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": 0.0,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlannerError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PlannerError::Api(format!("{}: {}", status, text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| PlannerError::Parse(e.to_string()))?;

        let choice = json["choices"]
            .get(0)
            .ok_or_else(|| PlannerError::Parse("No choices in response".to_string()))?;

        Ok(choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

/// Conversation for one planning call. Only the latest screen carries the
/// screenshot.
pub fn build_messages(ctx: &PlanContext<'_>) -> Vec<Value> {
    let screen_info = ctx.observation.screen_info();
    let screenshot = ctx.observation.screenshot.as_deref();
    let mut messages = vec![json!({
        "role": "system",
        "content": system_prompt(ctx.lang, ctx.memory, ctx.max_actions),
    })];

    if ctx.is_first_round() {
        messages.push(user_message(
            &format!("{}\n\n{}", ctx.task, screen_info),
            screenshot,
        ));
        return messages;
    }

    messages.push(user_message(ctx.task, None));
    let last = ctx.history.len() - 1;
    for (i, record) in ctx.history.iter().enumerate() {
        messages.push(json!({
            "role": "assistant",
            "content": format!(
                "<think>{}</think><answer>{}</answer>",
                record.thought, record.answer
            ),
        }));

        let mut text = String::from("** Screen Info **");
        for failed in record.executed.iter().filter(|e| !e.ok) {
            text.push_str(&format!(
                "\n\n{} did not succeed: {}",
                failed.action.kind.name(),
                failed.message.as_deref().unwrap_or("unknown error")
            ));
        }
        if i == last {
            text.push_str(&format!("\n\n{}", screen_info));
            messages.push(user_message(&text, screenshot));
        } else {
            messages.push(user_message(&text, None));
        }
    }
    messages
}

fn user_message(text: &str, screenshot: Option<&str>) -> Value {
    let mut content = Vec::new();
    if let Some(image) = screenshot {
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/png;base64,{}", image) },
        }));
    }
    content.push(json!({ "type": "text", "text": text }));
    json!({ "role": "user", "content": content })
}

#[async_trait]
impl Planner for OpenAiPlanner {
    async fn plan(&self, ctx: &PlanContext<'_>) -> Result<PlanOutcome, PlannerError> {
        let messages = build_messages(ctx);

        let mut content = self.complete(&messages).await?;
        if split_response(&content).1.is_empty() {
            tracing::warn!("Model returned empty action, retrying once");
            content = self.complete(&messages).await?;
        }

        let (thought, answer) = split_response(&content);
        tracing::debug!("Model answer: {}", answer);
        let parsed = parse_answer(&answer).map_err(|e| PlannerError::Parse(e.to_string()))?;

        if parsed.actions.is_empty() {
            return Ok(PlanOutcome::Done {
                result: parsed.finish.unwrap_or_else(|| "Task completed".into()),
                memory: None,
            });
        }

        Ok(PlanOutcome::Actions(ActionSet {
            thought,
            answer,
            actions: parsed.actions,
            finish: parsed.finish,
        }))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
