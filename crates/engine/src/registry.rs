//! Command registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use batchline_core::Job;

use crate::console::JobConsole;

/// The behavior pair a command contributes to a batch.
#[async_trait]
pub trait JobCommand: Send + Sync {
    /// Stage whatever the job needs before it can be claimed for execution.
    async fn prepare(&self, job: &Job) -> Result<(), anyhow::Error>;

    /// Execute the job. Output written through `console` is duplicated to the
    /// process stdout and the job's persisted transcript.
    async fn run(&self, job: &Job, console: &JobConsole)
        -> Result<serde_json::Value, anyhow::Error>;
}

/// Table mapping command names to their behaviors.
///
/// Held behind an `Arc` and handed to the controller as a constructor
/// dependency; registration normally happens once at process startup.
/// Registering the same name twice replaces the earlier behavior.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Arc<dyn JobCommand>>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Register a command behavior under `command`.
    pub fn register(&self, command: impl Into<String>, behavior: Arc<dyn JobCommand>) {
        let command = command.into();
        tracing::debug!(command = %command, "registering command");
        self.commands
            .write()
            .expect("command registry lock poisoned")
            .insert(command, behavior);
    }

    /// Look up a command behavior.
    pub fn get(&self, command: &str) -> Option<Arc<dyn JobCommand>> {
        self.commands
            .read()
            .expect("command registry lock poisoned")
            .get(command)
            .cloned()
    }

    /// Registered command names, unordered.
    pub fn names(&self) -> Vec<String> {
        self.commands
            .read()
            .expect("command registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCommand;

    #[async_trait]
    impl JobCommand for NoopCommand {
        async fn prepare(&self, _job: &Job) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn run(
            &self,
            _job: &Job,
            _console: &JobConsole,
        ) -> Result<serde_json::Value, anyhow::Error> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = CommandRegistry::new();
        assert!(registry.get("noop").is_none());

        registry.register("noop", Arc::new(NoopCommand));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }

    #[test]
    fn re_register_replaces() {
        let registry = CommandRegistry::new();
        registry.register("noop", Arc::new(NoopCommand));
        registry.register("noop", Arc::new(NoopCommand));
        assert_eq!(registry.names().len(), 1);
    }
}
