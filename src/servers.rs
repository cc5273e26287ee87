//! Remote inference server registry.
//!
//! The backend owns the registry; this keeps a read-through cache and
//! re-fetches after every mutation instead of patching it locally.

use std::cell::RefCell;
use std::rc::Rc;

use async_channel::Sender;

use crate::api::{ApiError, ServerApi, ServerRecord, ServerUpsert};
use crate::app::ConsoleEvent;

pub struct ServerRegistry {
    api: Rc<dyn ServerApi>,
    events: Sender<ConsoleEvent>,
    cache: RefCell<Vec<ServerRecord>>,
}

impl ServerRegistry {
    pub fn new(api: Rc<dyn ServerApi>, events: Sender<ConsoleEvent>) -> Rc<Self> {
        Rc::new(Self {
            api,
            events,
            cache: RefCell::new(Vec::new()),
        })
    }

    /// Cached records from the last successful fetch.
    pub fn servers(&self) -> Vec<ServerRecord> {
        self.cache.borrow().clone()
    }

    fn cached(&self, name: &str) -> Option<ServerRecord> {
        self.cache.borrow().iter().find(|s| s.name == name).cloned()
    }

    pub async fn refresh(&self) -> Result<Vec<ServerRecord>, ApiError> {
        match self.api.servers().await {
            Ok(servers) => {
                log::info!("{} server(s) registered", servers.len());
                *self.cache.borrow_mut() = servers.clone();
                let _ = self
                    .events
                    .try_send(ConsoleEvent::ServersUpdated(servers.clone()));
                Ok(servers)
            }
            Err(e) => {
                log::error!("Listing servers failed: {e}");
                let _ = self
                    .events
                    .try_send(ConsoleEvent::ServersFailed(e.to_string()));
                Err(e)
            }
        }
    }

    fn report(&self, name: &str, error: &ApiError) {
        log::error!("Server {name}: {error}");
        let _ = self.events.try_send(ConsoleEvent::ServerActionFailed {
            name: name.to_string(),
            error: error.to_string(),
        });
    }

    /// Register or update a server, then re-fetch the registry.
    pub async fn upsert(&self, name: &str, base_url: &str, enabled: bool) -> Result<(), ApiError> {
        let record = match validate(name, base_url, enabled) {
            Ok(r) => r,
            Err(e) => {
                self.report(name, &e);
                return Err(e);
            }
        };
        match self.api.upsert_server(&record).await {
            Ok(()) => {
                log::info!("Saved server {} -> {}", record.name, record.base_url);
                let _ = self.refresh().await;
                Ok(())
            }
            Err(e) => {
                self.report(&record.name, &e);
                Err(e)
            }
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), ApiError> {
        if self.cached(name).is_some_and(|s| s.ephemeral) {
            let e = ApiError::InvalidRequest(format!("Server {name} is ephemeral and cannot be removed"));
            self.report(name, &e);
            return Err(e);
        }
        match self.api.delete_server(name).await {
            Ok(()) => {
                log::info!("Removed server {name}");
                let _ = self.refresh().await;
                Ok(())
            }
            Err(e) => {
                self.report(name, &e);
                Err(e)
            }
        }
    }

    /// Flip the cached flag right away, then reconcile with the backend
    /// whether or not the update succeeded.
    pub async fn toggle_enabled(&self, name: &str, base_url: &str, enabled: bool) -> Result<(), ApiError> {
        if !enabled && self.cached(name).is_some_and(|s| s.ephemeral) {
            let e = ApiError::InvalidRequest(format!("Server {name} is ephemeral and cannot be disabled"));
            self.report(name, &e);
            return Err(e);
        }
        let record = match validate(name, base_url, enabled) {
            Ok(r) => r,
            Err(e) => {
                self.report(name, &e);
                return Err(e);
            }
        };

        let flipped = {
            let mut cache = self.cache.borrow_mut();
            match cache.iter_mut().find(|s| s.name == record.name) {
                Some(server) => {
                    server.enabled = enabled;
                    Some(cache.clone())
                }
                None => None,
            }
        };
        if let Some(servers) = flipped {
            let _ = self.events.try_send(ConsoleEvent::ServersUpdated(servers));
        }

        let result = self.api.upsert_server(&record).await;
        if let Err(ref e) = result {
            self.report(&record.name, e);
        } else {
            log::info!(
                "Server {} {}",
                record.name,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        let _ = self.refresh().await;
        result
    }
}

fn validate(name: &str, base_url: &str, enabled: bool) -> Result<ServerUpsert, ApiError> {
    let name = name.trim();
    let base_url = base_url.trim().trim_end_matches('/');
    if name.is_empty() {
        return Err(ApiError::InvalidRequest("Server name is required".into()));
    }
    if base_url.is_empty() {
        return Err(ApiError::InvalidRequest("Server URL is required".into()));
    }
    Ok(ServerUpsert {
        name: name.to_string(),
        base_url: base_url.to_string(),
        enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, server, FakeServerApi};

    #[tokio::test]
    async fn upsert_trims_input_and_resyncs() {
        let api = FakeServerApi::new(vec![server("gpu", "http://gpu:11434", true, false)]);
        let (tx, _rx) = async_channel::unbounded();
        let registry = ServerRegistry::new(api.clone(), tx);

        registry.upsert(" gpu ", "http://gpu:11434/ ", true).await.unwrap();
        assert_eq!(
            api.upserts(),
            vec![ServerUpsert {
                name: "gpu".into(),
                base_url: "http://gpu:11434".into(),
                enabled: true
            }]
        );
        assert_eq!(api.list_calls(), 1);
        assert_eq!(registry.servers().len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_backend() {
        let api = FakeServerApi::new(vec![]);
        let (tx, rx) = async_channel::unbounded();
        let registry = ServerRegistry::new(api.clone(), tx);

        assert!(registry.upsert("", "http://x", true).await.is_err());
        assert!(registry.upsert("x", "  ", true).await.is_err());
        assert!(api.upserts().is_empty());
        assert_eq!(drain(&rx).len(), 2);
    }

    #[tokio::test]
    async fn ephemeral_servers_cannot_be_deleted_or_disabled() {
        let api = FakeServerApi::new(vec![server("env", "http://env:8000", true, true)]);
        let (tx, _rx) = async_channel::unbounded();
        let registry = ServerRegistry::new(api.clone(), tx);
        registry.refresh().await.unwrap();

        assert!(matches!(
            registry.delete("env").await,
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(registry.toggle_enabled("env", "http://env:8000", false).await.is_err());
        assert!(api.deletes().is_empty());
        assert!(api.upserts().is_empty());

        // enabling is still allowed
        registry.toggle_enabled("env", "http://env:8000", true).await.unwrap();
        assert_eq!(api.upserts().len(), 1);
    }

    #[tokio::test]
    async fn toggle_flips_then_reconciles_on_failure() {
        let api = FakeServerApi::new(vec![server("gpu", "http://gpu", true, false)]);
        let (tx, rx) = async_channel::unbounded();
        let registry = ServerRegistry::new(api.clone(), tx);
        registry.refresh().await.unwrap();
        drain(&rx);

        api.fail_upsert(ApiError::Transport("connection refused".into()));
        assert!(registry.toggle_enabled("gpu", "http://gpu", false).await.is_err());

        let events = drain(&rx);
        // optimistic flip, failure report, reconciled list from the backend
        assert!(matches!(&events[0], ConsoleEvent::ServersUpdated(s) if !s[0].enabled));
        assert!(matches!(&events[1], ConsoleEvent::ServerActionFailed { .. }));
        assert!(matches!(&events[2], ConsoleEvent::ServersUpdated(s) if s[0].enabled));
        assert!(registry.servers()[0].enabled);
        assert_eq!(api.list_calls(), 2);
    }

    #[tokio::test]
    async fn delete_resyncs_on_success_only() {
        let api = FakeServerApi::new(vec![server("old", "http://old", true, false)]);
        let (tx, _rx) = async_channel::unbounded();
        let registry = ServerRegistry::new(api.clone(), tx);

        registry.delete("old").await.unwrap();
        assert_eq!(api.deletes(), vec!["old".to_string()]);
        assert_eq!(api.list_calls(), 1);

        api.fail_delete(ApiError::Status {
            status: 404,
            detail: "unknown server".into(),
        });
        assert!(registry.delete("ghost").await.is_err());
        assert_eq!(api.list_calls(), 1);
    }
}
