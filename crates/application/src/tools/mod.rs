//! Tool registry and execution
//!
//! A tool is a typed Read/Test/Act operation with schema-checked input and
//! the unified result envelope. The registry is pluggable; built-ins cover
//! the stock diagnosis toolbox.

pub mod builtin;
pub mod executor;
pub mod schema;

use crate::registry::DeviceRegistry;
use crate::rpc::RpcEngine;
use crate::telemetry::TelemetrySink;
use crate::topology::TopologyStore;
use async_trait::async_trait;
use domain::change_set::RollbackStep;
use domain::tool::{ToolResult, ToolSpec};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

pub use executor::{InvokeOptions, ToolExecutor};

/// Dependencies a tool may reach during execution
#[derive(Clone)]
pub struct ToolContext {
    pub rpc: Arc<RpcEngine>,
    pub registry: Arc<DeviceRegistry>,
    pub topology: Arc<TopologyStore>,
    pub telemetry: Arc<TelemetrySink>,
    pub session_id: Option<String>,
    pub trace_id: String,
    pub dry_run: bool,
    pub change_set_id: Option<String>,
    pub cancel: CancellationToken,
}

/// Result envelope plus the rollback descriptor Act tools must produce
pub struct ToolOutput {
    pub result: ToolResult,
    pub rollback: Option<RollbackStep>,
}

impl ToolOutput {
    pub fn result_only(result: ToolResult) -> Self {
        Self {
            result,
            rollback: None,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;
    async fn execute(&self, ctx: &ToolContext, args: &serde_json::Value) -> ToolOutput;
}

pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// All built-in tools, optionally narrowed by an enable list
    pub fn with_builtins(enabled: &[String]) -> Self {
        let registry = Self::new();
        for tool in builtin::all() {
            let name = tool.spec().name.clone();
            if enabled.is_empty() || enabled.iter().any(|e| e == &name) {
                registry.register(tool);
            }
        }
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name.clone();
        let mut tools = match self.tools.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = match self.tools.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tools.get(name).cloned()
    }

    /// Specs of every registered tool, sorted by name
    pub fn list(&self) -> Vec<ToolSpec> {
        let tools = match self.tools.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tools.values().map(|t| t.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        match self.tools.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::tool::ToolCategory;

    #[test]
    fn test_builtins_register_all_categories() {
        let registry = ToolRegistry::with_builtins(&[]);
        let specs = registry.list();
        assert!(specs.iter().any(|s| s.category == ToolCategory::Read));
        assert!(specs.iter().any(|s| s.category == ToolCategory::Test));
        assert!(specs.iter().any(|s| s.category == ToolCategory::Act));
        assert!(registry.get("net.ping").is_some());
        assert!(registry.get("wifi.set_channel").is_some());
    }

    #[test]
    fn test_enable_list_narrows() {
        let registry = ToolRegistry::with_builtins(&["net.ping".to_string()]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("net.ping").is_some());
        assert!(registry.get("wifi.set_channel").is_none());
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = ToolRegistry::with_builtins(&[]);
        let names: Vec<_> = registry.list().into_iter().map(|s| s.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
