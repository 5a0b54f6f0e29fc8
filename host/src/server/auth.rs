//! The credential gate.
//!
//! Every inbound call resolves to a principal before any handler runs:
//! admin keys come from configuration, worker keys are the per-worker
//! secrets held in the store. Handlers only ever see the resolved
//! [`Principal`]; raw credential material stays in this module.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use reyestr_db::Db;
use reyestr_lib::Worker;

use crate::interfaces::{HostError, HostResult};
use crate::HostState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolved caller identity, stored as a request extension.
#[derive(Debug, Clone)]
pub enum Principal {
    Admin { name: String },
    Worker(Box<Worker>),
    Anonymous,
}

#[derive(Debug)]
pub struct ApiKeyStore {
    enabled: bool,
    /// Admin key -> admin name.
    admin_keys: DashMap<String, String>,
}

impl ApiKeyStore {
    /// Parse the configured JSON map of admin name to key. An empty or
    /// malformed value leaves the store without admin keys.
    pub fn new(enabled: bool, admin_keys: &str) -> Self {
        let parsed: DashMap<String, String> = DashMap::new();
        if !admin_keys.is_empty() {
            match serde_json::from_str::<std::collections::HashMap<String, String>>(admin_keys) {
                Ok(map) => {
                    for (name, key) in map {
                        parsed.insert(key, name);
                    }
                }
                Err(error) => {
                    warn!("Ignoring malformed admin key map: {error}");
                }
            }
        }
        Self {
            enabled,
            admin_keys: parsed,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn admin_name(&self, key: &str) -> Option<String> {
        self.admin_keys.get(key).map(|entry| entry.value().clone())
    }
}

/// Resolve `X-API-Key` into a [`Principal`] request extension. Unknown
/// non-empty keys are rejected outright; absent keys pass through as
/// anonymous and are judged per endpoint.
pub async fn api_key_auth(
    State(state): State<HostState>,
    mut req: Request,
    next: Next,
) -> Result<Response, HostError> {
    let api_key = extract_api_key(&req);

    let principal = if api_key.is_empty() {
        Principal::Anonymous
    } else if let Some(name) = state.api_keys.admin_name(&api_key) {
        Principal::Admin { name }
    } else if let Some(worker) = state.db.find_worker_by_key(&api_key).await? {
        Principal::Worker(Box::new(worker))
    } else if state.api_keys.is_enabled() {
        warn!("Rejecting unknown API key on {}", req.uri().path());
        return Err(HostError::Unauthorized);
    } else {
        Principal::Anonymous
    };

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

fn extract_api_key<B>(req: &Request<B>) -> String {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Admin endpoints: an admin key, or anything at all when authentication is
/// disabled.
pub fn require_admin(store: &ApiKeyStore, principal: &Principal) -> HostResult<()> {
    if !store.is_enabled() {
        return Ok(());
    }
    match principal {
        Principal::Admin { .. } => Ok(()),
        Principal::Worker(_) => Err(HostError::Forbidden(
            "admin credential required".to_string(),
        )),
        Principal::Anonymous => Err(HostError::Unauthorized),
    }
}

/// Worker endpoints always need a resolved worker identity.
pub fn require_worker(principal: &Principal) -> HostResult<Worker> {
    match principal {
        Principal::Worker(worker) => Ok(*worker.clone()),
        Principal::Admin { .. } => Err(HostError::Forbidden(
            "worker credential required".to_string(),
        )),
        Principal::Anonymous => Err(HostError::Unauthorized),
    }
}

/// Statistics are visible to admins and to the worker they belong to.
pub fn require_admin_or_self(
    store: &ApiKeyStore,
    principal: &Principal,
    worker_id: Uuid,
) -> HostResult<()> {
    match principal {
        Principal::Worker(worker) if worker.id == worker_id => Ok(()),
        Principal::Worker(_) if store.is_enabled() => Err(HostError::Forbidden(
            "workers may only read their own statistics".to_string(),
        )),
        other => require_admin(store, other),
    }
}

/// Any authenticated caller (admin or worker).
pub fn require_authenticated(store: &ApiKeyStore, principal: &Principal) -> HostResult<()> {
    if !store.is_enabled() {
        return Ok(());
    }
    match principal {
        Principal::Admin { .. } | Principal::Worker(_) => Ok(()),
        Principal::Anonymous => Err(HostError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reyestr_lib::WorkerStatus;

    fn worker(id: Uuid) -> Principal {
        Principal::Worker(Box::new(Worker {
            id,
            name: "scraper-1".to_string(),
            host: None,
            api_key: None,
            status: WorkerStatus::Active,
            last_heartbeat: None,
            session_started_at: None,
            total_tasks_completed: 0,
            total_tasks_failed: 0,
            total_documents_downloaded: 0,
            total_documents_registered: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }))
    }

    #[test]
    fn admin_key_map_parses() {
        let store = ApiKeyStore::new(true, r#"{"ops":"reyestr_admin_1"}"#);
        assert_eq!(store.admin_name("reyestr_admin_1").as_deref(), Some("ops"));
        assert!(store.admin_name("other").is_none());

        let empty = ApiKeyStore::new(true, "");
        assert!(empty.admin_name("anything").is_none());

        let malformed = ApiKeyStore::new(true, "not-json");
        assert!(malformed.admin_name("anything").is_none());
    }

    #[test]
    fn role_gates() {
        let store = ApiKeyStore::new(true, "{}");
        let admin = Principal::Admin {
            name: "ops".to_string(),
        };
        let worker_id = Uuid::new_v4();
        let as_worker = worker(worker_id);

        assert!(require_admin(&store, &admin).is_ok());
        assert!(matches!(
            require_admin(&store, &as_worker),
            Err(HostError::Forbidden(_))
        ));
        assert!(matches!(
            require_admin(&store, &Principal::Anonymous),
            Err(HostError::Unauthorized)
        ));

        assert!(require_worker(&as_worker).is_ok());
        assert!(matches!(
            require_worker(&Principal::Anonymous),
            Err(HostError::Unauthorized)
        ));

        assert!(require_admin_or_self(&store, &as_worker, worker_id).is_ok());
        assert!(matches!(
            require_admin_or_self(&store, &as_worker, Uuid::new_v4()),
            Err(HostError::Forbidden(_))
        ));
        assert!(require_admin_or_self(&store, &admin, worker_id).is_ok());
    }

    #[test]
    fn disabled_auth_opens_admin_endpoints_only() {
        let store = ApiKeyStore::new(false, "");
        assert!(require_admin(&store, &Principal::Anonymous).is_ok());
        assert!(require_authenticated(&store, &Principal::Anonymous).is_ok());
        // Worker identity is still mandatory for worker calls.
        assert!(matches!(
            require_worker(&Principal::Anonymous),
            Err(HostError::Unauthorized)
        ));
    }
}
