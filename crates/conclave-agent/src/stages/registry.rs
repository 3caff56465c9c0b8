use std::collections::HashMap;
use std::sync::Arc;

use super::StageBody;

/// `StageName -> StageBody` dispatch table (§9 redesign guidance), so
/// adding a specialist agent is registering one more entry rather than
/// widening a `match`.
#[derive(Default)]
pub struct StageRegistry {
    bodies: HashMap<String, Arc<dyn StageBody>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: impl Into<String>, body: Arc<dyn StageBody>) -> &mut Self {
        self.bodies.insert(stage.into(), body);
        self
    }

    pub fn get(&self, stage: &str) -> Option<Arc<dyn StageBody>> {
        self.bodies.get(stage).cloned()
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.bodies.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::IntentStage;

    #[test]
    fn registered_stage_is_retrievable_by_name() {
        let mut registry = StageRegistry::new();
        registry.register("intent", Arc::new(IntentStage::new()));
        assert!(registry.get("intent").is_some());
        assert!(registry.get("retrieval").is_none());
    }
}
