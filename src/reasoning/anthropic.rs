use async_trait::async_trait;

use super::{ReasoningContext, ReasoningError, ReasoningService};
use crate::anthropic::{AnthropicError, Message, MessageSender, MessagesRequest};

const SYSTEM_PROMPT: &str = "You evaluate one stage of a multi-stage hiring process. \
Respond with ONLY valid JSON, no other text.\n\
Format: {\"decision\": \"advance|reject|escalate|hold\", \"confidence\": <0..1>, \
\"reasoning\": \"<why>\", \"next_action\": \"<what should happen next>\", \
\"requires_human_review\": <bool>, \"updated_belief_state\": {\"core_strengths\": [..], \
\"concerns\": [..], \"hiring_thesis\": \"..\", \"decision_confidence\": <0..1>, \
\"stage_insights\": {\"<stage>\": {\"key_findings\": [..], \"evidence\": [..], \"score\": <0..1>}}, \
\"self_corrections\": [{\"stage\": \"..\", \"original_belief\": \"..\", \"correction\": \"..\", \"impact\": \"..\"}]}}\n\
Keep every earlier self_correction and append new ones when the evidence contradicts \
an earlier belief. Use hold when the stage evidence is missing or incomplete.";

/// Reasoning service backed by the Anthropic Messages API.
pub struct AnthropicReasoner<C> {
    client: C,
    model: String,
    max_tokens: u32,
}

impl<C: MessageSender> AnthropicReasoner<C> {
    pub fn new(client: C, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }

    fn request(&self, context: &ReasoningContext) -> Result<MessagesRequest, ReasoningError> {
        let payload = serde_json::to_string_pretty(context)
            .map_err(|e| ReasoningError::InvalidResponse(format!("unserializable context: {e}")))?;
        Ok(MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![Message {
                role: "user".into(),
                content: format!("Current stage: {}\n\nContext:\n{payload}", context.stage),
            }],
        })
    }
}

impl From<AnthropicError> for ReasoningError {
    fn from(e: AnthropicError) -> Self {
        if e.is_unreachable() {
            ReasoningError::Unreachable(e.to_string())
        } else {
            ReasoningError::InvalidResponse(e.to_string())
        }
    }
}

#[async_trait]
impl<C: MessageSender> ReasoningService for AnthropicReasoner<C> {
    async fn reason(&self, context: &ReasoningContext) -> Result<String, ReasoningError> {
        let req = self.request(context)?;
        let response = self.client.send_message(&req).await?;
        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(
                process_id = %context.process_id,
                "reasoning response truncated at max_tokens"
            );
        }
        Ok(response.text())
    }
}
