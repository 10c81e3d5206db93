//! Service-wide credential pool with a persisted rotation cursor.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::KeyValueStore;
use crate::client::{CredentialPool, RotationState};

/// Store key of the saved rotation state.
pub const POOL_STATE_KEY: &str = "credentials:pool";

/// Credential pool shared by all jobs.
///
/// Each run works on a snapshot and commits it back when done, so runs
/// never hold the lock across API calls. Only the rotation state is
/// persisted; keys come from configuration.
pub struct SharedPool {
    pool: Mutex<CredentialPool>,
    store: Arc<dyn KeyValueStore>,
}

impl SharedPool {
    /// Wrap `pool`, restoring the cursor saved in `store` if it still fits.
    pub async fn load(mut pool: CredentialPool, store: Arc<dyn KeyValueStore>) -> Self {
        match store.get(POOL_STATE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<RotationState>(&raw) {
                Ok(state) => {
                    if pool.restore(&state) {
                        info!(cursor = ?state.cursor, "Restored credential rotation state");
                    } else {
                        debug!("Saved rotation state does not match the configured pool");
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring undecodable rotation state"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read rotation state"),
        }

        Self {
            pool: Mutex::new(pool),
            store,
        }
    }

    pub async fn snapshot(&self) -> CredentialPool {
        self.pool.lock().await.clone()
    }

    /// Take over the cursor of a pool returned by a run and persist it.
    pub async fn commit(&self, used: &CredentialPool) {
        let state = used.rotation_state();
        {
            let mut pool = self.pool.lock().await;
            if !pool.restore(&state) {
                return;
            }
        }

        match serde_json::to_string(&state) {
            Ok(json) => {
                if let Err(e) = self.store.put(POOL_STATE_KEY, json).await {
                    warn!(error = %e, "Failed to persist rotation state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode rotation state"),
        }
    }
}
