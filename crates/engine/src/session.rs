//! Per-user session state: remote client, metadata store, key and config.

use std::sync::{Arc, RwLock};

use relaydrive_crypto::EncryptionKey;
use relaydrive_remote::{RemoteStore, TransportClient};
use tracing::info;

use crate::EngineError;
use crate::config::EngineConfig;
use crate::metadata::MetadataStore;

/// Shared handle to a session. Cheap to clone.
///
/// The derived key lives only here, in memory, and is dropped by
/// [`Session::end`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TransportClient,
    metadata: Arc<dyn MetadataStore>,
    key: RwLock<Option<Arc<EncryptionKey>>>,
    config: EngineConfig,
}

impl Session {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        metadata: Arc<dyn MetadataStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let transport = TransportClient::new(store)
            .with_policies(config.upload_retry, config.download_retry);
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                metadata,
                key: RwLock::new(None),
                config,
            }),
        })
    }

    /// Installs the key used to encrypt uploads and decrypt downloads.
    pub fn unlock(&self, key: EncryptionKey) {
        *self.inner.key.write().unwrap() = Some(Arc::new(key));
        info!("session unlocked");
    }

    /// Forgets the key. Transfers already running keep their copy.
    pub fn end(&self) {
        if self.inner.key.write().unwrap().take().is_some() {
            info!("session key dropped");
        }
    }

    pub fn key(&self) -> Option<Arc<EncryptionKey>> {
        self.inner.key.read().unwrap().clone()
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.key.read().unwrap().is_some()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &TransportClient {
        &self.inner.transport
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.inner.metadata
    }
}
