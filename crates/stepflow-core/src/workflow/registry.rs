//! In-memory workflow registry and bounded execution history.
//!
//! Definitions are keyed by `metadata.name`. A later load of the same name
//! replaces the earlier one; runs already holding the old `Arc` keep it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use stepflow_types::execution::ExecutionResult;
use stepflow_types::workflow::WorkflowDefinition;

pub struct WorkflowRegistry {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
    history: Mutex<VecDeque<ExecutionResult>>,
    history_limit: usize,
}

impl WorkflowRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            definitions: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit,
        }
    }

    /// Register a definition under its name. Returns true when it replaced
    /// an existing one.
    pub fn insert(&self, definition: WorkflowDefinition) -> bool {
        let name = definition.name().to_string();
        self.definitions.insert(name, Arc::new(definition)).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> bool {
        self.definitions.remove(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Append a finished run, evicting the oldest past the limit.
    pub fn record(&self, result: ExecutionResult) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(result);
    }

    /// Finished runs, oldest first.
    pub fn history(&self) -> Vec<ExecutionResult> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().cloned().collect()
    }
}
