use std::collections::HashMap;
use std::sync::Arc;

use rover_common::StageName;

use super::Graph;
use crate::errors::EngineError;
use crate::stages::Stage;

/// Mapping from stage name to the function that runs it.
#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: HashMap<StageName, Arc<dyn Stage>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.names();
        names.sort_by_key(|n| n.as_str());
        f.debug_struct("StageRegistry").field("stages", &names).finish()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stage` under its own name. A name can only be registered once.
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> Result<&mut Self, EngineError> {
        let name = stage.name();
        if self.stages.contains_key(&name) {
            return Err(EngineError::InvalidGraph(format!(
                "stage '{}' is already registered",
                name
            )));
        }
        self.stages.insert(name, stage);
        Ok(self)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, stage: impl Stage + 'static) -> Result<Self, EngineError> {
        self.register(Arc::new(stage))?;
        Ok(self)
    }

    pub fn get(&self, name: StageName) -> Option<Arc<dyn Stage>> {
        self.stages.get(&name).cloned()
    }

    pub fn names(&self) -> Vec<StageName> {
        self.stages.keys().copied().collect()
    }

    /// Every stage reachable in `graph` must have a registered function.
    pub fn ensure_covers(&self, graph: &Graph) -> Result<(), EngineError> {
        match graph.stages().into_iter().find(|s| !self.stages.contains_key(s)) {
            Some(missing) => Err(EngineError::UnregisteredStage(missing)),
            None => Ok(()),
        }
    }
}
