//! In-process core, for running a service without a management core.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CoreClient, CoreEndpoint, CoreError, CoreResult, ServiceRecord, ServiceToken};

/// A call received by [`InMemoryCore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCall {
    Register { endpoint: CoreEndpoint, name: String },
    Deregister { endpoint: CoreEndpoint, token: ServiceToken },
    Interest { token: ServiceToken, category: String },
}

/// Core client keeping registrations in memory and recording every call
#[derive(Debug, Default)]
pub struct InMemoryCore {
    calls: Mutex<Vec<CoreCall>>,
    registered: Mutex<Vec<(ServiceToken, ServiceRecord)>>,
    /// Number of upcoming `register` calls that fail as unreachable
    failures: AtomicU32,
    next_id: AtomicU32,
}

impl InMemoryCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` registrations fail
    pub fn failing(count: u32) -> Self {
        let core = Self::default();
        core.failures.store(count, Ordering::SeqCst);
        core
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<CoreCall> {
        self.calls.lock().clone()
    }

    /// Services currently registered
    pub fn registered(&self) -> Vec<ServiceRecord> {
        self.registered.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl CoreClient for InMemoryCore {
    async fn register(&self, endpoint: &CoreEndpoint, record: &ServiceRecord) -> CoreResult<ServiceToken> {
        self.calls.lock().push(CoreCall::Register {
            endpoint: endpoint.clone(),
            name: record.name.clone(),
        });

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CoreError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let mut registered = self.registered.lock();
        if registered.iter().any(|(_, r)| r.name == record.name) {
            return Err(CoreError::Rejected {
                status: 409,
                message: format!("service '{}' already registered", record.name),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = ServiceToken(format!("{}-{}", record.name, id));
        registered.push((token.clone(), record.clone()));
        Ok(token)
    }

    async fn deregister(&self, endpoint: &CoreEndpoint, token: &ServiceToken) -> CoreResult<()> {
        self.calls.lock().push(CoreCall::Deregister {
            endpoint: endpoint.clone(),
            token: token.clone(),
        });

        let mut registered = self.registered.lock();
        let before = registered.len();
        registered.retain(|(t, _)| t != token);
        if registered.len() == before {
            return Err(CoreError::Rejected {
                status: 404,
                message: format!("unknown service {}", token),
            });
        }
        Ok(())
    }

    async fn register_interest(
        &self,
        _endpoint: &CoreEndpoint,
        token: &ServiceToken,
        category: &str,
    ) -> CoreResult<()> {
        self.calls.lock().push(CoreCall::Interest {
            token: token.clone(),
            category: category.to_string(),
        });
        Ok(())
    }
}
