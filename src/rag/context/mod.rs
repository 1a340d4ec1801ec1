
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::RagConfig;
use crate::embeddings::estimate_token_count;
use crate::vector::VectorSearchResult;

/// Framing sentence placed ahead of injected context
pub const CONTEXT_PREAMBLE: &str = "Use the following context to help answer the question:";

const SEPARATOR: &str = "\n\n";

/// Context assembled for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagContext {
    pub query: String,
    /// Results that fit within the budget, in rank order
    pub retrieved_documents: Vec<VectorSearchResult>,
    pub context_text: String,
    /// Aligned with `retrieved_documents`
    pub relevance_scores: Vec<f32>,
    pub total_tokens: usize,
    /// Set when a result was dropped for exceeding the budget
    pub truncated: bool,
}

impl RagContext {
    #[inline]
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Builds token-budgeted context blocks and injects them into prompts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindowManager {
    max_context_length: usize,
    context_template: String,
}

impl ContextWindowManager {
    #[inline]
    pub fn new(max_context_length: usize, context_template: impl Into<String>) -> Self {
        Self {
            max_context_length,
            context_template: context_template.into(),
        }
    }

    #[inline]
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.max_context_length, config.context_template.clone())
    }

    #[inline]
    pub fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    /// Walk ranked results greedily until the token budget is exhausted
    #[inline]
    pub fn build_context(&self, results: &[VectorSearchResult], query: &str) -> RagContext {
        let mut context = RagContext::empty(query);
        let mut pieces = Vec::new();

        for result in results {
            let piece = self.format_result(result);
            let cost = estimate_token_count(&piece);

            if context.total_tokens + cost > self.max_context_length {
                debug!(
                    "Context budget reached at {} tokens, dropping '{}' ({} tokens)",
                    context.total_tokens, result.document.id, cost
                );
                context.truncated = true;
                break;
            }

            context.total_tokens += cost;
            context.relevance_scores.push(result.similarity);
            context.retrieved_documents.push(result.clone());
            pieces.push(piece);
        }

        context.context_text = pieces.join(SEPARATOR);
        context
    }

    /// Prefix `prompt` with the framing sentence and context; empty context leaves it as is
    #[inline]
    pub fn inject_context(&self, prompt: &str, context: &RagContext) -> String {
        if context.context_text.is_empty() {
            return prompt.to_string();
        }

        format!(
            "{CONTEXT_PREAMBLE}{SEPARATOR}{}{SEPARATOR}{prompt}",
            context.context_text
        )
    }

    /// Render one result through the template
    #[inline]
    pub fn format_result(&self, result: &VectorSearchResult) -> String {
        let document = &result.document;

        render_template(&self.context_template, |placeholder| match placeholder {
            "content" => Some(document.content.clone()),
            "id" => Some(document.id.clone()),
            "metadata" => Some(
                document
                    .metadata
                    .as_ref()
                    .map_or_else(|| "{}".to_string(), |m| Value::Object(m.clone()).to_string()),
            ),
            "timestamp" => Some(
                document
                    .timestamp
                    .and_then(DateTime::from_timestamp_millis)
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
                    .unwrap_or_default(),
            ),
            _ => None,
        })
    }
}

/// Single-pass `{name}` substitution; substituted text is never rescanned and
/// unknown placeholders are kept verbatim
fn render_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((before, after)) = rest.split_once('{') {
        rendered.push_str(before);

        let substitution = after
            .split_once('}')
            .and_then(|(name, tail)| lookup(name).map(|value| (value, tail)));

        match substitution {
            Some((value, tail)) => {
                rendered.push_str(&value);
                rest = tail;
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }

    rendered.push_str(rest);
    rendered
}
