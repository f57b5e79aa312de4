//! Lazily-connected executors keyed by target name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::OnceCell;

use super::{BackendFactory, Executor, ExecutorError, ExecutorFactory};
use crate::config::{ConfigError, ConfigResult, FleetConfig, MachineTarget, TargetKind};
use crate::security::PathPolicy;
use crate::tools::ExecutorResolver;

struct Connected {
    executor: Arc<dyn Executor>,
    connected_at: DateTime<Utc>,
}

type Slot = Arc<OnceCell<Connected>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineInfo {
    pub name: String,
    pub kind: TargetKind,
    pub host: Option<String>,
    pub is_default: bool,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStat {
    pub name: String,
    pub kind: TargetKind,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub configured: usize,
    pub connected: usize,
    pub connections: Vec<ConnectionStat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub name: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Outcome of [`ConnectionManager::shutdown`]; failures never stop the sweep.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub failures: Vec<(String, ExecutorError)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns at most one live executor per configured target.
///
/// Connections open on first use. Concurrent first uses of the same name
/// share a single connection attempt.
pub struct ConnectionManager {
    order: Vec<String>,
    targets: HashMap<String, MachineTarget>,
    policies: HashMap<String, Arc<PathPolicy>>,
    default: Option<String>,
    factory: Arc<dyn ExecutorFactory>,
    slots: DashMap<String, Slot>,
}

impl ConnectionManager {
    /// Uses the compiled-in backends; a target whose backend is missing is rejected here.
    pub fn new(machines: Vec<MachineTarget>) -> ConfigResult<Self> {
        if let Some(machine) = machines.iter().find(|m| !m.kind.is_available()) {
            return Err(ConfigError::InvalidValue {
                key: format!("machines.{}.kind", machine.name),
                message: format!("{} backend is not compiled in", machine.kind),
            });
        }
        Self::with_factory(machines, Arc::new(BackendFactory))
    }

    pub fn from_config(config: &FleetConfig) -> ConfigResult<Self> {
        Self::new(config.machines.clone())
    }

    pub fn with_factory(
        machines: Vec<MachineTarget>,
        factory: Arc<dyn ExecutorFactory>,
    ) -> ConfigResult<Self> {
        let mut order = Vec::with_capacity(machines.len());
        let mut targets = HashMap::with_capacity(machines.len());
        let mut policies = HashMap::with_capacity(machines.len());

        for machine in machines {
            if targets.contains_key(&machine.name) {
                return Err(ConfigError::InvalidValue {
                    key: format!("machines.{}", machine.name),
                    message: "duplicate machine name".into(),
                });
            }
            policies.insert(machine.name.clone(), Arc::new(machine.path_policy()));
            order.push(machine.name.clone());
            targets.insert(machine.name.clone(), machine);
        }

        let default = order
            .iter()
            .find(|name| targets.get(*name).is_some_and(|t| t.default))
            .or_else(|| order.iter().find(|name| name.as_str() == "local"))
            .or_else(|| order.first())
            .cloned();

        Ok(Self {
            order,
            targets,
            policies,
            default,
            factory,
            slots: DashMap::new(),
        })
    }

    pub fn target(&self, name: &str) -> Option<&MachineTarget> {
        self.targets.get(name)
    }

    /// Explicit default, else a target named `local`, else the first configured.
    pub fn default_machine(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.slots
            .get(name)
            .is_some_and(|slot| slot.initialized())
    }

    /// Returns the live executor for `name`, connecting on first use.
    pub async fn get_executor(&self, name: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        let target = self
            .targets
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownTarget(name.to_string()))?;

        let slot = Arc::clone(self.slots.entry(name.to_string()).or_default().value());
        let connected = slot
            .get_or_try_init(|| async {
                tracing::info!(target_name = %name, kind = %target.kind, "Opening connection");
                let executor = self.factory.create(target).await.inspect_err(|e| {
                    tracing::warn!(target_name = %name, error = %e, "Connection attempt failed");
                })?;
                Ok::<_, ExecutorError>(Connected {
                    executor,
                    connected_at: Utc::now(),
                })
            })
            .await?;
        let executor = Arc::clone(&connected.executor);

        // A concurrent remove may have evicted this slot while it was connecting.
        let still_current = self
            .slots
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
        if !still_current {
            if let Err(e) = executor.close().await {
                tracing::warn!(target_name = %name, error = %e, "Failed to close orphaned executor");
            }
            return Err(ExecutorError::Closed(name.to_string()));
        }
        Ok(executor)
    }

    /// Closes and evicts `name`. Returns whether a live executor was closed.
    pub async fn remove_executor(&self, name: &str) -> Result<bool, ExecutorError> {
        let Some((_, slot)) = self.slots.remove(name) else {
            return Ok(false);
        };
        match slot.get() {
            Some(connected) => {
                tracing::info!(target_name = %name, "Closing connection");
                connected.executor.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every live executor, collecting failures instead of stopping.
    pub async fn shutdown(&self) -> ShutdownReport {
        let names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let results = join_all(names.iter().map(|name| self.remove_executor(name))).await;

        let mut report = ShutdownReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(true) => report.closed.push(name),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(target_name = %name, error = %e, "Failed to close executor");
                    report.failures.push((name, e));
                }
            }
        }
        report
    }

    pub fn list_machines(&self) -> Vec<MachineInfo> {
        self.order
            .iter()
            .filter_map(|name| self.targets.get(name))
            .map(|t| MachineInfo {
                name: t.name.clone(),
                kind: t.kind,
                host: t.host.clone(),
                is_default: self.default.as_deref() == Some(t.name.as_str()),
                connected: self.is_connected(&t.name),
            })
            .collect()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        let mut connections: Vec<ConnectionStat> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let connected = entry.value().get()?;
                Some(ConnectionStat {
                    name: entry.key().clone(),
                    kind: connected.executor.kind(),
                    connected_at: connected.connected_at,
                })
            })
            .collect();
        connections.sort_by(|a, b| a.name.cmp(&b.name));

        ExecutorStats {
            configured: self.targets.len(),
            connected: connections.len(),
            connections,
        }
    }

    /// Connects to every target and runs a trivial health-check command.
    pub async fn test_all_connections(&self) -> Vec<ConnectionTest> {
        let checks = self.order.iter().map(|name| async move {
            let result = match self.get_executor(name).await {
                Ok(executor) => executor.test_connection().await,
                Err(e) => Err(e),
            };
            ConnectionTest {
                name: name.clone(),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });
        join_all(checks).await
    }

    pub fn active_targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .iter()
            .filter(|e| e.value().initialized())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ExecutorResolver for ConnectionManager {
    fn target_names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn default_target(&self) -> Option<String> {
        self.default.clone()
    }

    fn policy(&self, target: &str) -> Option<Arc<PathPolicy>> {
        self.policies.get(target).cloned()
    }

    async fn resolve(&self, target: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        self.get_executor(target).await
    }

    fn active_targets(&self) -> Vec<String> {
        ConnectionManager::active_targets(self)
    }

    async fn release(&self, target: &str) -> Result<(), ExecutorError> {
        self.remove_executor(target).await.map(|_| ())
    }

    fn contains(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }
}
