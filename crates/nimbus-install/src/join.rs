//! The agent join protocol (§4.F): a prospective joiner registers with a
//! controller URL+token and is told either "you are the installer" or
//! "join this installer's IP" (I2: exactly one claims the installer
//! role per operation). Both roles heartbeat to the controller until
//! installation begins; a missed heartbeat is logged, not fatal.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::InstallError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    Installer,
    Joiner { installer_addr: String },
}

/// The controller side of the protocol, as seen by an agent. A real
/// deployment implements this over the installer bundle's control
/// channel; [`InMemoryJoinController`] is a reference implementation
/// used by tests.
#[async_trait]
pub trait JoinController: Send + Sync {
    async fn register(
        &self,
        operation_id: &str,
        token: &str,
        agent_addr: &str,
    ) -> Result<JoinDecision, InstallError>;

    async fn heartbeat(&self, operation_id: &str, agent_addr: &str) -> Result<(), InstallError>;
}

/// Enforces I2 by electing whichever agent registers first for a given
/// operation id as the installer; every later registrant for the same
/// operation id is told to join that installer's address.
pub struct InMemoryJoinController {
    installers: Mutex<HashMap<String, String>>,
}

impl Default for InMemoryJoinController {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJoinController {
    pub fn new() -> InMemoryJoinController {
        InMemoryJoinController {
            installers: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl JoinController for InMemoryJoinController {
    async fn register(
        &self,
        operation_id: &str,
        _token: &str,
        agent_addr: &str,
    ) -> Result<JoinDecision, InstallError> {
        let mut installers = self.installers.lock().unwrap();
        match installers.get(operation_id) {
            Some(installer_addr) if installer_addr == agent_addr => Ok(JoinDecision::Installer),
            Some(installer_addr) => Ok(JoinDecision::Joiner {
                installer_addr: installer_addr.clone(),
            }),
            None => {
                installers.insert(operation_id.to_string(), agent_addr.to_string());
                Ok(JoinDecision::Installer)
            }
        }
    }

    async fn heartbeat(&self, _operation_id: &str, _agent_addr: &str) -> Result<(), InstallError> {
        Ok(())
    }
}

/// Heartbeats to `controller` on `interval` until `cancel` fires. A
/// failed heartbeat is logged and the loop continues — a missed
/// heartbeat does not abort the operation (§4.F).
pub async fn heartbeat_loop(
    controller: std::sync::Arc<dyn JoinController>,
    operation_id: String,
    agent_addr: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = controller.heartbeat(&operation_id, &agent_addr).await {
                    tracing::warn!(%err, operation_id = %operation_id, "heartbeat failed, continuing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_first_registrant_becomes_the_installer() {
        let controller = InMemoryJoinController::new();
        let decision = controller.register("op-1", "token", "10.0.0.1").await.unwrap();
        assert_eq!(decision, JoinDecision::Installer);
    }

    #[tokio::test]
    async fn later_registrants_are_told_to_join_the_installer() {
        let controller = InMemoryJoinController::new();
        controller.register("op-1", "token", "10.0.0.1").await.unwrap();
        let decision = controller.register("op-1", "token", "10.0.0.2").await.unwrap();
        assert_eq!(
            decision,
            JoinDecision::Joiner {
                installer_addr: "10.0.0.1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn only_one_installer_is_elected_across_many_registrants() {
        let controller = InMemoryJoinController::new();
        let mut installer_count = 0;
        for i in 0..5 {
            let addr = format!("10.0.0.{i}");
            if controller.register("op-1", "token", &addr).await.unwrap() == JoinDecision::Installer {
                installer_count += 1;
            }
        }
        assert_eq!(installer_count, 1);
    }

    #[tokio::test]
    async fn heartbeat_loop_stops_on_cancellation() {
        let controller: std::sync::Arc<dyn JoinController> = std::sync::Arc::new(InMemoryJoinController::new());
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = tokio::spawn(async move {
            heartbeat_loop(
                controller,
                "op-1".to_string(),
                "10.0.0.1".to_string(),
                Duration::from_millis(5),
                child,
            )
            .await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
