//! AI draft generation via rig-core (Anthropic provider).
//!
//! Every generated text is parametrized with the client's business context
//! so drafts read like the tradesperson wrote them. The [`DraftGenerator`]
//! trait keeps engines testable with canned drafts.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::anthropic;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::Config;
use crate::error::GeneratorError;
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::model::{Client, ItemKind};

const MAX_TOKENS: u64 = 1024;

const POST_SYSTEM: &str = "You write Google Business Profile posts for Irish trade businesses \
(electricians, plumbers, roofers and similar). Write in a friendly, plain-spoken voice, as if \
the business owner typed it themselves. Keep posts under 1400 characters, no hashtags, no \
emojis, no salesy cliches. Mention the local area naturally when it fits. Respond with the \
post text only, nothing else.";

const OFFER_SYSTEM: &str = "You write promotional offer posts for Google Business Profiles of \
Irish trade businesses. State the offer plainly, say who it is for and how to claim it, and \
keep it under 1400 characters. No hashtags, no emojis, no pressure tactics. Respond with the \
offer text only, nothing else.";

const REVIEW_SYSTEM: &str = "You draft replies to Google reviews on behalf of Irish trade \
businesses. Thank the reviewer by name, reference something specific from their review, and \
keep it to two or three sentences. For critical reviews stay courteous, acknowledge the \
problem and offer to make it right; never argue. Respond with the reply text only.";

const CAPTION_SYSTEM: &str = "You polish short photo captions for the Google Business Profile \
of an Irish trade business. Keep the caption to one or two sentences, plain-spoken, no \
hashtags or emojis. Respond with the caption text only.";

/// Business facts injected into every generation prompt.
#[derive(Debug, Clone)]
pub struct BusinessContext {
    pub business_name: String,
    pub trade_type: String,
    pub county: String,
    pub summary: Option<String>,
    pub service_areas: Vec<String>,
    pub services: Vec<String>,
}

impl From<&Client> for BusinessContext {
    fn from(client: &Client) -> Self {
        Self {
            business_name: client.business_name.clone(),
            trade_type: client.trade_type.clone(),
            county: client.county.clone(),
            summary: client.site_summary.clone(),
            service_areas: client.service_areas.clone(),
            services: client.services.clone(),
        }
    }
}

impl BusinessContext {
    /// The shared context block prefixed to every user prompt.
    fn block(&self) -> String {
        let mut lines = vec![
            format!("Business: {}", self.business_name),
            format!("Trade: {}", self.trade_type),
            format!("County: {}", self.county),
        ];
        if let Some(summary) = &self.summary {
            lines.push(format!("About: {summary}"));
        }
        if !self.service_areas.is_empty() {
            lines.push(format!("Service areas: {}", self.service_areas.join(", ")));
        }
        if !self.services.is_empty() {
            lines.push(format!("Services: {}", self.services.join(", ")));
        }
        lines.join("\n")
    }
}

/// Draft generation operations used by the engines.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    /// Draft a standard post from the user's brief.
    async fn draft_post(
        &self,
        context: &BusinessContext,
        brief: &str,
    ) -> Result<String, GeneratorError>;

    /// Draft an offer post from the user's brief.
    async fn draft_offer(
        &self,
        context: &BusinessContext,
        brief: &str,
    ) -> Result<String, GeneratorError>;

    /// Regenerate a draft applying the user's edit feedback.
    async fn revise_draft(
        &self,
        context: &BusinessContext,
        kind: ItemKind,
        current_draft: &str,
        feedback: &str,
    ) -> Result<String, GeneratorError>;

    /// Suggest a reply to a customer review.
    async fn suggest_review_reply(
        &self,
        context: &BusinessContext,
        reviewer_name: &str,
        rating: u8,
        review_text: &str,
    ) -> Result<String, GeneratorError>;

    /// Polish a photo caption.
    async fn polish_caption(
        &self,
        context: &BusinessContext,
        raw_caption: &str,
    ) -> Result<String, GeneratorError>;
}

/// rig-core backed generator using the Anthropic provider.
pub struct RigGenerator {
    client: rig::client::Client<anthropic::client::AnthropicExt>,
    model: String,
    retry: RetryPolicy,
}

impl RigGenerator {
    pub fn new(config: &Config) -> Result<Self, GeneratorError> {
        let client = anthropic::Client::new(config.anthropic_api_key.expose_secret())
            .map_err(|e| {
                GeneratorError::RequestFailed(format!("Failed to create Anthropic client: {e}"))
            })?;
        tracing::info!(model = %config.model, "Draft generator ready");
        Ok(Self {
            client,
            model: config.model.clone(),
            retry: RetryPolicy::generation(),
        })
    }

    async fn generate(&self, system: &str, user_prompt: String) -> Result<String, GeneratorError> {
        let text = with_backoff(&self.retry, || {
            let agent = self
                .client
                .agent(&self.model)
                .preamble(system)
                .max_tokens(MAX_TOKENS)
                .build();
            let prompt = user_prompt.clone();
            async move {
                agent
                    .prompt(prompt)
                    .await
                    .map_err(|e| GeneratorError::RequestFailed(e.to_string()))
            }
        })
        .await?;

        let cleaned = clean_response(&text);
        if cleaned.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        debug!(len = cleaned.len(), "Generated draft");
        Ok(cleaned)
    }
}

#[async_trait]
impl DraftGenerator for RigGenerator {
    async fn draft_post(
        &self,
        context: &BusinessContext,
        brief: &str,
    ) -> Result<String, GeneratorError> {
        self.generate(POST_SYSTEM, post_prompt(context, brief)).await
    }

    async fn draft_offer(
        &self,
        context: &BusinessContext,
        brief: &str,
    ) -> Result<String, GeneratorError> {
        self.generate(OFFER_SYSTEM, offer_prompt(context, brief))
            .await
    }

    async fn revise_draft(
        &self,
        context: &BusinessContext,
        kind: ItemKind,
        current_draft: &str,
        feedback: &str,
    ) -> Result<String, GeneratorError> {
        let system = match kind {
            ItemKind::Offer => OFFER_SYSTEM,
            _ => POST_SYSTEM,
        };
        self.generate(system, revise_prompt(context, current_draft, feedback))
            .await
    }

    async fn suggest_review_reply(
        &self,
        context: &BusinessContext,
        reviewer_name: &str,
        rating: u8,
        review_text: &str,
    ) -> Result<String, GeneratorError> {
        self.generate(
            REVIEW_SYSTEM,
            review_prompt(context, reviewer_name, rating, review_text),
        )
        .await
    }

    async fn polish_caption(
        &self,
        context: &BusinessContext,
        raw_caption: &str,
    ) -> Result<String, GeneratorError> {
        self.generate(CAPTION_SYSTEM, caption_prompt(context, raw_caption))
            .await
    }
}

fn post_prompt(context: &BusinessContext, brief: &str) -> String {
    format!(
        "{}\n\nThe owner wants a post about:\n{brief}\n\nWrite the post.",
        context.block()
    )
}

fn offer_prompt(context: &BusinessContext, brief: &str) -> String {
    format!(
        "{}\n\nThe owner wants to run this offer:\n{brief}\n\nWrite the offer post.",
        context.block()
    )
}

fn revise_prompt(context: &BusinessContext, current_draft: &str, feedback: &str) -> String {
    format!(
        "{}\n\nCurrent draft:\n{current_draft}\n\nThe owner asked for this change:\n{feedback}\n\n\
         Rewrite the draft applying the change. Keep everything else.",
        context.block()
    )
}

fn review_prompt(
    context: &BusinessContext,
    reviewer_name: &str,
    rating: u8,
    review_text: &str,
) -> String {
    format!(
        "{}\n\nReview from {reviewer_name} ({rating} stars):\n{review_text}\n\nWrite the reply.",
        context.block()
    )
}

fn caption_prompt(context: &BusinessContext, raw_caption: &str) -> String {
    format!(
        "{}\n\nRough caption:\n{raw_caption}\n\nPolish it.",
        context.block()
    )
}

/// Trim whitespace and strip one pair of wrapping quotes the model
/// sometimes adds.
fn clean_response(text: &str) -> String {
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BusinessContext {
        BusinessContext {
            business_name: "Murphy Electrical".to_string(),
            trade_type: "electrician".to_string(),
            county: "Kildare".to_string(),
            summary: Some("Family-run electrical contractor since 2005".to_string()),
            service_areas: vec!["Naas".to_string(), "Newbridge".to_string()],
            services: vec!["rewiring".to_string(), "EV chargers".to_string()],
        }
    }

    #[test]
    fn context_block_lists_all_facts() {
        let block = context().block();
        assert!(block.contains("Business: Murphy Electrical"));
        assert!(block.contains("Trade: electrician"));
        assert!(block.contains("County: Kildare"));
        assert!(block.contains("About: Family-run"));
        assert!(block.contains("Service areas: Naas, Newbridge"));
        assert!(block.contains("Services: rewiring, EV chargers"));
    }

    #[test]
    fn context_block_skips_empty_facts() {
        let mut ctx = context();
        ctx.summary = None;
        ctx.service_areas.clear();
        let block = ctx.block();
        assert!(!block.contains("About:"));
        assert!(!block.contains("Service areas:"));
        assert!(block.contains("Services:"));
    }

    #[test]
    fn prompts_carry_user_input() {
        let ctx = context();
        assert!(post_prompt(&ctx, "finished a rewire in Naas").contains("finished a rewire"));
        assert!(offer_prompt(&ctx, "10% off EV chargers").contains("10% off"));
        assert!(
            revise_prompt(&ctx, "old draft", "make it shorter").contains("make it shorter")
        );
        let review = review_prompt(&ctx, "Aoife", 5, "Great work");
        assert!(review.contains("Aoife"));
        assert!(review.contains("5 stars"));
        assert!(caption_prompt(&ctx, "new fuse board").contains("new fuse board"));
    }

    #[test]
    fn clean_response_strips_quotes_and_whitespace() {
        assert_eq!(clean_response("  \"A tidy post.\"  "), "A tidy post.");
        assert_eq!(clean_response("No quotes here"), "No quotes here");
        assert_eq!(clean_response("\"unbalanced"), "\"unbalanced");
        assert_eq!(clean_response("   "), "");
    }
}
