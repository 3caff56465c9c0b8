use async_trait::async_trait;
use conclave_shared::errors::ConclaveResult;

use super::{StageBody, StageInput, StageOutput};

/// Advisory, idempotent intent analysis (§4.F): flags whether the query
/// needs web evidence and re-selects the remaining plan accordingly before
/// the second stage dispatches (§4.D "can then re-select the plan").
#[derive(Debug, Default)]
pub struct IntentStage;

impl IntentStage {
    pub fn new() -> Self {
        Self
    }

    fn needs_web(query: &str) -> bool {
        let lowered = query.to_lowercase();
        ["latest", "today", "current", "recent", "news", "now"]
            .iter()
            .any(|kw| lowered.contains(kw))
    }

    fn complexity(query: &str) -> u8 {
        match query.split_whitespace().count() {
            0..=5 => 1,
            6..=15 => 2,
            _ => 3,
        }
    }
}

#[async_trait]
impl StageBody for IntentStage {
    async fn run(&self, input: StageInput) -> ConclaveResult<StageOutput> {
        let needs_web = Self::needs_web(&input.query);
        let complexity = Self::complexity(&input.query);

        let mut remaining = vec![
            "retrieval".to_string(),
            "reasoning".to_string(),
            "moderation".to_string(),
        ];
        if needs_web {
            remaining.insert(1, "web_augmentation".to_string());
        }
        remaining.push("response_packaging".to_string());

        Ok(StageOutput {
            context_delta: serde_json::json!({
                "intent": { "needs_web": needs_web, "complexity": complexity },
            }),
            reselect_plan: Some(remaining),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(query: &str) -> StageInput {
        StageInput {
            query: query.to_string(),
            context: serde_json::json!({}),
            retrieval_hits: vec![],
            stage_args: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn flags_web_augmentation_for_time_sensitive_queries() {
        let output = IntentStage::new().run(input("what's the latest rust release")).await.unwrap();
        let remaining = output.reselect_plan.unwrap();
        assert!(remaining.contains(&"web_augmentation".to_string()));
        assert_eq!(remaining.last().unwrap(), "response_packaging");
    }

    #[tokio::test]
    async fn skips_web_augmentation_for_stable_queries() {
        let output = IntentStage::new().run(input("what is rust")).await.unwrap();
        let remaining = output.reselect_plan.unwrap();
        assert!(!remaining.contains(&"web_augmentation".to_string()));
    }

    #[tokio::test]
    async fn longer_queries_score_higher_complexity() {
        let output = IntentStage::new()
            .run(input("explain in detail how the borrow checker enforces lifetime soundness across crate boundaries"))
            .await
            .unwrap();
        assert_eq!(output.context_delta["intent"]["complexity"], 3);
    }
}
