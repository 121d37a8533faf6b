//! Runtime Builders
//!
//! Turns the loaded [`Config`] into the explicit policy objects handed to the
//! router and orchestrator. Nothing here reads global state.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::types::{Config, parse_task_key};
use crate::ai::{
    BackendRegistry, Branch, HealthCache, Router, RouterConfig, TaskRouting, TemperaturePolicy,
    TimeoutPolicy,
};
use crate::types::Result;

impl Config {
    /// Routing table for one branch
    ///
    /// Only the requested branch is loaded so that backends used exclusively
    /// by the other branch may stay disabled.
    pub fn task_routing(&self, branch: Branch) -> Result<TaskRouting> {
        let mut routing = TaskRouting::new(self.routing.last_resort.clone());
        for (key, candidates) in self.routing.branch(branch) {
            let task = parse_task_key(key, &format!("routing.{}", branch))?;
            routing = routing.with_route(task, branch, candidates.clone())?;
        }
        Ok(routing)
    }

    pub fn timeout_policy(&self) -> Result<TimeoutPolicy> {
        let mut policy = TimeoutPolicy::new(Duration::from_secs(self.llm.timeout_secs));
        for (key, secs) in &self.timeouts.task {
            let task = parse_task_key(key, "timeouts.task")?;
            policy = policy.with_task(task, Duration::from_secs(*secs));
        }
        for (backend, secs) in &self.timeouts.backend {
            policy = policy.with_backend(backend, Duration::from_secs(*secs));
        }
        for (backend, tasks) in &self.timeouts.backend_task {
            for (key, secs) in tasks {
                let task = parse_task_key(key, "timeouts.backend_task")?;
                policy = policy.with_backend_task(backend, task, Duration::from_secs(*secs));
            }
        }
        Ok(policy)
    }

    pub fn temperature_policy(&self) -> Result<TemperaturePolicy> {
        let mut policy = TemperaturePolicy::new(self.llm.temperature);
        for (key, temperature) in &self.llm.task_temperature {
            let task = parse_task_key(key, "llm.task_temperature")?;
            policy = policy.with_task(task, *temperature);
        }
        Ok(policy)
    }

    pub fn router_config(&self) -> Result<RouterConfig> {
        Ok(RouterConfig {
            mode: self.llm.router_mode,
            invalid_response_retries: self.llm.invalid_response_retries,
            timeouts: self.timeout_policy()?,
            temperatures: self.temperature_policy()?,
        })
    }

    pub fn health_cache(&self) -> HealthCache {
        HealthCache::new(Duration::from_secs(self.llm.health_ttl_secs))
    }

    /// Adapters for every enabled backend
    pub fn backend_registry(&self) -> Result<BackendRegistry> {
        BackendRegistry::from_configs(&self.backends)
    }

    /// Router for the configured branch
    pub fn build_router(&self) -> Result<Router> {
        let routing = self.task_routing(self.branch)?;
        let registry = self.backend_registry()?;
        debug!(
            branch = %self.branch,
            backends = ?registry.names(),
            "Building router"
        );
        Router::new(
            routing,
            registry,
            Arc::new(self.health_cache()),
            self.router_config()?,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::ai::{RouteCandidate, Task};
    use crate::config::Config;

    #[test]
    fn test_task_routing_loads_requested_branch_only() {
        let config = Config::default();
        let routing = config.task_routing(crate::ai::Branch::Local).unwrap();
        assert_eq!(
            routing.explicit(Task::Synthesis, crate::ai::Branch::Local),
            &[RouteCandidate::new("ollama_local", "llama3:latest")]
        );
        assert!(routing.explicit(Task::Synthesis, crate::ai::Branch::Server).is_empty());
        assert_eq!(routing.referenced_backends(), vec!["ollama_local"]);
    }

    #[test]
    fn test_timeout_policy_from_config() {
        let mut config = Config::default();
        config.timeouts.task.insert("synthesis".into(), 90);
        config.timeouts.backend.insert("ollama-server".into(), 120);
        config
            .timeouts
            .backend_task
            .entry("ollama_server".into())
            .or_default()
            .insert("synthesis".into(), 300);

        let policy = config.timeout_policy().unwrap();
        assert_eq!(policy.resolve("ollama_server", Task::Synthesis).as_secs(), 300);
        assert_eq!(policy.resolve("ollama_server", Task::TechAnalysis).as_secs(), 120);
        assert_eq!(policy.resolve("ollama_local", Task::Synthesis).as_secs(), 90);
        assert_eq!(policy.resolve("ollama_local", Task::NewsAnalysis).as_secs(), 60);
    }

    #[test]
    fn test_temperature_policy_from_config() {
        let mut config = Config::default();
        config.llm.task_temperature.insert("verifier".into(), 0.0);
        let temps = config.temperature_policy().unwrap();
        assert_eq!(temps.resolve(Task::Verification), 0.0);
        assert_eq!(temps.resolve(Task::Synthesis), 0.2);
    }

    #[test]
    fn test_build_router_default_local() {
        let router = Config::default().build_router().unwrap();
        assert!(router.registry().contains("ollama_local"));
        assert!(!router.registry().contains("deepseek_api"));
    }

    #[test]
    fn test_build_router_server_with_disabled_backends_fails() {
        let config = Config {
            branch: crate::ai::Branch::Server,
            ..Default::default()
        };
        let err = config.build_router().unwrap_err().to_string();
        assert!(err.contains("unknown or disabled backend"));
    }
}
