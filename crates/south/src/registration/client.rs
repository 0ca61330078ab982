//! Registration client: retrying registration and best-effort deregistration.

use std::sync::Arc;

use tokio::sync::watch;

use super::{CoreClient, CoreEndpoint, RetryPolicy, ServiceRecord, ServiceToken};
use crate::service::{ServiceError, ServiceResult};

/// Registers a service with the core, retrying with backoff
#[derive(Clone)]
pub struct RegistrationClient {
    core: Arc<dyn CoreClient>,
    policy: RetryPolicy,
}

impl RegistrationClient {
    pub fn new(core: Arc<dyn CoreClient>, policy: RetryPolicy) -> Self {
        Self { core, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Register `record` at `endpoint`.
    ///
    /// Retries until the policy's attempts are spent. Returns
    /// `ServiceError::ShuttingDown` as soon as `cancel` turns true.
    pub async fn register(
        &self,
        endpoint: &CoreEndpoint,
        record: &ServiceRecord,
        cancel: &mut watch::Receiver<bool>,
    ) -> ServiceResult<ServiceToken> {
        let mut backoff = self.policy.backoff();

        loop {
            if *cancel.borrow() {
                return Err(ServiceError::ShuttingDown);
            }

            let error = match self.core.register(endpoint, record).await {
                Ok(token) => {
                    tracing::info!(
                        service = %record.name,
                        core = %endpoint,
                        token = %token,
                        "Registered with core"
                    );
                    return Ok(token);
                }
                Err(e) => e,
            };

            let Some(delay) = backoff.on_failure() else {
                return Err(ServiceError::Registration {
                    attempts: backoff.attempts(),
                    reason: error.to_string(),
                });
            };

            tracing::warn!(
                service = %record.name,
                core = %endpoint,
                attempt = backoff.attempts(),
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Registration failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(cancel) => {
                    return Err(ServiceError::ShuttingDown);
                }
            }
        }
    }

    /// Ask for configuration change notifications. Failure is logged, not fatal.
    pub async fn register_interest(&self, endpoint: &CoreEndpoint, token: &ServiceToken, category: &str) {
        match self.core.register_interest(endpoint, token, category).await {
            Ok(()) => tracing::debug!(category = %category, "Registered interest in category"),
            Err(e) => tracing::warn!(
                category = %category,
                error = %e,
                "Failed to register interest; configuration changes must be pushed explicitly"
            ),
        }
    }

    /// Remove the registration. Failure is logged, not fatal.
    pub async fn deregister(&self, endpoint: &CoreEndpoint, token: &ServiceToken) {
        match self.core.deregister(endpoint, token).await {
            Ok(()) => tracing::info!(core = %endpoint, token = %token, "Deregistered from core"),
            Err(e) => tracing::warn!(core = %endpoint, token = %token, error = %e, "Failed to deregister from core"),
        }
    }
}

/// Resolves once `cancel` turns true; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl std::fmt::Debug for RegistrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::{CoreCall, InMemoryCore};
    use std::time::Duration;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let core = Arc::new(InMemoryCore::failing(2));
        let client = RegistrationClient::new(core.clone(), fast_policy(5));
        let (_tx, mut cancel) = watch::channel(false);

        let token = client
            .register(
                &CoreEndpoint::new("localhost", 8081),
                &ServiceRecord::southbound("svc", "localhost", 0),
                &mut cancel,
            )
            .await
            .unwrap();

        assert_eq!(token.as_str(), "svc-1");
        assert_eq!(core.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let core = Arc::new(InMemoryCore::failing(10));
        let client = RegistrationClient::new(core.clone(), fast_policy(3));
        let (_tx, mut cancel) = watch::channel(false);

        let err = client
            .register(
                &CoreEndpoint::new("localhost", 8081),
                &ServiceRecord::southbound("svc", "localhost", 0),
                &mut cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Registration { attempts: 3, .. }));
        assert_eq!(core.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_backoff() {
        let core = Arc::new(InMemoryCore::failing(10));
        let client = RegistrationClient::new(
            core.clone(),
            RetryPolicy::default()
                .with_max_attempts(10)
                .with_backoff(Duration::from_secs(60), Duration::from_secs(60)),
        );
        let (tx, mut cancel) = watch::channel(false);

        let register = tokio::spawn(async move {
            client
                .register(
                    &CoreEndpoint::new("localhost", 8081),
                    &ServiceRecord::southbound("svc", "localhost", 0),
                    &mut cancel,
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let result = register.await.unwrap();
        assert!(matches!(result, Err(ServiceError::ShuttingDown)));
        assert_eq!(
            core.calls(),
            vec![CoreCall::Register {
                endpoint: CoreEndpoint::new("localhost", 8081),
                name: "svc".into()
            }]
        );
    }
}
