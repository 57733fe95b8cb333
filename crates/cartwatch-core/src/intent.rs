//! Product-intent extraction from user messages.
//!
//! A chat message like "check onion prices" goes through the LLM once to
//! pull out the product to search for. The model is unreliable — it wraps
//! objects in arrays, fences its JSON in markdown, or fails outright — so
//! every failure path degrades to a whole-message fallback intent instead
//! of erroring out.

use crate::error::Result;
use crate::extract::PayloadShape;
use cartwatch_abstraction::{ModelError, TextModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the user is asking for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIntent {
    /// Whether the message is a product query at all.
    pub is_product: bool,
    /// The main product to search for.
    pub product_name: String,
    /// Rough category (defaults to "groceries").
    pub category: String,
    /// Requested quantity, when the user named one.
    pub quantity: Option<String>,
}

impl ProductIntent {
    /// Fallback intent: treat the whole message as the product name.
    #[must_use]
    pub fn fallback(message: &str) -> Self {
        Self {
            is_product: true,
            product_name: message.trim().to_string(),
            category: "groceries".to_string(),
            quantity: None,
        }
    }
}

/// LLM-backed analyzer for incoming requests.
pub struct IntentAnalyzer {
    model: Arc<dyn TextModel>,
}

impl IntentAnalyzer {
    /// Creates an analyzer over the given text model.
    #[must_use]
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    /// Extracts the product intent from a user message.
    ///
    /// Infallible by design: any model or parse failure yields the
    /// whole-message fallback intent.
    pub async fn extract_intent(&self, message: &str) -> ProductIntent {
        match self.try_extract(message).await {
            Ok(intent) => {
                debug!(product = %intent.product_name, is_product = intent.is_product, "Intent extracted");
                intent
            }
            Err(e) => {
                warn!(error = %e, "Intent extraction failed, using whole message");
                ProductIntent::fallback(message)
            }
        }
    }

    async fn try_extract(&self, message: &str) -> Result<ProductIntent> {
        let prompt = format!(
            "Analyze this shopping message: \"{message}\"\n\n\
             Identify the MAIN product to search for.\n\
             Return ONLY a JSON object (no markdown, no lists).\n\
             Format:\n\
             {{\n\
                 \"is_product\": true,\n\
                 \"product_name\": \"clean name\",\n\
                 \"category\": \"groceries\",\n\
                 \"quantity\": \"e.g. 500g\"\n\
             }}"
        );

        let response = self.model.complete(&prompt).await?;
        let text = strip_code_fences(&response);

        let map = PayloadShape::classify(&text).into_object().ok_or_else(|| {
            ModelError::ModelResponseError("intent reply is not a JSON object".to_string())
        })?;

        let product_name = map
            .get("product_name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| message.trim().to_string(), str::to_string);

        Ok(ProductIntent {
            is_product: map.get("is_product").and_then(serde_json::Value::as_bool).unwrap_or(true),
            product_name,
            category: map
                .get("category")
                .and_then(|v| v.as_str())
                .unwrap_or("groceries")
                .to_string(),
            quantity: map
                .get("quantity")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("not specified"))
                .map(str::to_string),
        })
    }

    /// Closing recommendation line appended to every report.
    #[must_use]
    pub fn recommendation(&self) -> String {
        "Compare the prices above and choose the best deal!".to_string()
    }
}

/// Removes markdown code fences the model likes to wrap JSON in.
fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedModel {
        reply: std::result::Result<String, ModelError>,
    }

    impl CannedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(text.to_string()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(ModelError::RequestError("quota exhausted".to_string())),
            })
        }
    }

    #[async_trait]
    impl TextModel for CannedModel {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, ModelError> {
            self.reply.clone()
        }

        fn model_id(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_extract_intent_from_fenced_json() {
        let model = CannedModel::replying(
            "```json\n{\"is_product\": true, \"product_name\": \"onion\", \
             \"category\": \"groceries\", \"quantity\": \"1kg\"}\n```",
        );
        let analyzer = IntentAnalyzer::new(model);
        let intent = analyzer.extract_intent("check onion prices").await;
        assert!(intent.is_product);
        assert_eq!(intent.product_name, "onion");
        assert_eq!(intent.quantity.as_deref(), Some("1kg"));
    }

    #[tokio::test]
    async fn test_array_wrapped_reply_uses_first_object() {
        let model = CannedModel::replying(
            "[{\"is_product\": true, \"product_name\": \"milk\", \"category\": \"groceries\"}]",
        );
        let analyzer = IntentAnalyzer::new(model);
        let intent = analyzer.extract_intent("milk please").await;
        assert_eq!(intent.product_name, "milk");
        assert_eq!(intent.quantity, None);
    }

    #[tokio::test]
    async fn test_non_product_message() {
        let model = CannedModel::replying(
            "{\"is_product\": false, \"product_name\": \"\", \"category\": \"chitchat\"}",
        );
        let analyzer = IntentAnalyzer::new(model);
        let intent = analyzer.extract_intent("good morning!").await;
        assert!(!intent.is_product);
        // Empty product name falls back to the message itself.
        assert_eq!(intent.product_name, "good morning!");
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_whole_message() {
        let analyzer = IntentAnalyzer::new(CannedModel::failing());
        let intent = analyzer.extract_intent("  check tomato prices  ").await;
        assert!(intent.is_product);
        assert_eq!(intent.product_name, "check tomato prices");
        assert_eq!(intent.category, "groceries");
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back() {
        let analyzer = IntentAnalyzer::new(CannedModel::replying("sure, here you go:"));
        let intent = analyzer.extract_intent("paneer 200g").await;
        assert_eq!(intent.product_name, "paneer 200g");
    }
}
