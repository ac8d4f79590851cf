//! Deployment Registry & state machine (§4.3). Single authoritative in-memory
//! map, guarded by one mutex; holders must never perform I/O while holding it.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::{Deployment, DeploymentState};
use crate::error::{Error, Result};

pub struct Registry {
    deployments: Mutex<HashMap<String, Deployment>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            deployments: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a new record in state `Pending`. Fails with a validation error
    /// if the id is already live.
    pub async fn reserve(&self, deployment: Deployment) -> Result<()> {
        let mut guard = self.deployments.lock().await;
        if guard.contains_key(&deployment.id) {
            return Err(Error::ValidationError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        guard.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    /// Applies a state transition, rejecting any not listed in the transition
    /// table (§4.3), and updates the auxiliary fields passed via `mutate`.
    pub async fn advance(
        &self,
        id: &str,
        new_state: DeploymentState,
        mutate: impl FnOnce(&mut Deployment),
    ) -> Result<Deployment> {
        let mut guard = self.deployments.lock().await;
        let deployment = guard
            .get_mut(id)
            .ok_or(Error::NotFound)?;

        if !deployment.state.can_advance_to(new_state) {
            return Err(Error::ValidationError(format!(
                "invalid transition {} -> {}",
                deployment.state, new_state
            )));
        }

        deployment.state = new_state;
        mutate(deployment);
        Ok(deployment.clone())
    }

    pub async fn get(&self, id: &str) -> Option<Deployment> {
        self.deployments.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Deployment> {
        self.deployments.lock().await.values().cloned().collect()
    }

    /// Removes the record if present; returns whether it existed.
    pub async fn drop_deployment(&self, id: &str) -> bool {
        self.deployments.lock().await.remove(id).is_some()
    }

    pub async fn age_minutes(&self, id: &str) -> Option<i64> {
        let guard = self.deployments.lock().await;
        guard
            .get(id)
            .map(|d| (Utc::now() - d.created_at).num_minutes())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn deployment(id: &str) -> Deployment {
        Deployment {
            id: id.to_string(),
            image: "ex/app:1".to_string(),
            port: 3000,
            env: Map::new(),
            ttl_minutes: 60,
            created_at: Utc::now(),
            state: DeploymentState::Pending,
            container_id: None,
            url: format!("https://sandbox.example.com/{id}/"),
        }
    }

    #[tokio::test]
    async fn reserve_rejects_duplicate_id() {
        let registry = Registry::new();
        registry.reserve(deployment("abc")).await.unwrap();
        let err = registry.reserve(deployment("abc")).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn advance_follows_transition_table() {
        let registry = Registry::new();
        registry.reserve(deployment("abc")).await.unwrap();

        registry
            .advance("abc", DeploymentState::Pulling, |_| {})
            .await
            .unwrap();
        registry
            .advance("abc", DeploymentState::Starting, |_| {})
            .await
            .unwrap();
        let result = registry
            .advance("abc", DeploymentState::Running, |d| {
                d.container_id = Some("c1".to_string());
            })
            .await
            .unwrap();
        assert_eq!(result.state, DeploymentState::Running);
        assert_eq!(result.container_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn advance_rejects_invalid_transition() {
        let registry = Registry::new();
        registry.reserve(deployment("abc")).await.unwrap();
        let err = registry
            .advance("abc", DeploymentState::Running, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn drop_is_idempotent() {
        let registry = Registry::new();
        registry.reserve(deployment("abc")).await.unwrap();
        assert!(registry.drop_deployment("abc").await);
        assert!(!registry.drop_deployment("abc").await);
    }
}
