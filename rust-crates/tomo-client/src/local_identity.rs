use crate::{
    Error,
    Result,
    secure_store::SecureStore,
};
use base64::{
    Engine as _,
    engine::general_purpose::STANDARD,
};
use serde::{
    Deserialize,
    Serialize,
};
use solana_sdk::{
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
};
use std::{
    str::FromStr,
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::info;

/// The one key this component owns in the secure store.
pub const IDENTITY_KEY: &str = "@tomo:embedded_wallet";

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    secret_key: String,
    public_key: String,
    created_at: i64,
}

impl StoredIdentity {
    fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|_| Error::SecureStore("stored identity is not readable".to_string()))
    }

    fn public_key(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.public_key).map_err(|_| {
            Error::SecureStore("stored identity has an invalid public key".to_string())
        })
    }

    fn keypair(&self) -> Result<Keypair> {
        let corrupt = || Error::SecureStore("stored identity secret is corrupt".to_string());
        let bytes = STANDARD.decode(&self.secret_key).map_err(|_| corrupt())?;
        let keypair = Keypair::from_bytes(&bytes).map_err(|_| corrupt())?;
        if keypair.pubkey() != self.public_key()? {
            return Err(Error::SecureStore(
                "stored identity secret does not match its public key".to_string(),
            ));
        }
        Ok(keypair)
    }
}

/// Client-held keypair for actions that should not prompt the primary wallet.
///
/// Created lazily, never regenerated while present, removed only by [`clear`].
///
/// [`clear`]: LocalSigningIdentity::clear
pub struct LocalSigningIdentity<S> {
    store: S,
    // held across the store round-trip so concurrent callers share one creation
    loaded: Mutex<Option<Arc<Keypair>>>,
}

impl<S: SecureStore> LocalSigningIdentity<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            loaded: Mutex::new(None),
        }
    }

    pub async fn get_or_create(&self) -> Result<Arc<Keypair>> {
        let mut loaded = self.loaded.lock().await;
        if let Some(keypair) = loaded.as_ref() {
            return Ok(Arc::clone(keypair));
        }

        let keypair = match self.load().await? {
            Some(keypair) => keypair,
            None => {
                let keypair = Keypair::new();
                self.persist(&keypair).await?;
                info!(public_key = %keypair.pubkey(), "local signing identity created");
                keypair
            }
        };

        let keypair = Arc::new(keypair);
        *loaded = Some(Arc::clone(&keypair));
        Ok(keypair)
    }

    /// Never creates.
    pub async fn get(&self) -> Result<Option<Arc<Keypair>>> {
        let mut loaded = self.loaded.lock().await;
        if let Some(keypair) = loaded.as_ref() {
            return Ok(Some(Arc::clone(keypair)));
        }
        let keypair = self.load().await?.map(Arc::new);
        *loaded = keypair.clone();
        Ok(keypair)
    }

    /// Reads only the public half, for display.
    pub async fn public_key(&self) -> Result<Option<Pubkey>> {
        if let Some(keypair) = self.loaded.lock().await.as_ref() {
            return Ok(Some(keypair.pubkey()));
        }
        match self.store.get(IDENTITY_KEY).await? {
            Some(raw) => StoredIdentity::parse(&raw)?.public_key().map(Some),
            None => Ok(None),
        }
    }

    /// Irreversible: anything only this identity controls is forfeited.
    pub async fn clear(&self) -> Result<()> {
        let mut loaded = self.loaded.lock().await;
        self.store.remove(IDENTITY_KEY).await?;
        if let Some(previous) = loaded.take() {
            info!(public_key = %previous.pubkey(), "local signing identity cleared");
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<Keypair>> {
        match self.store.get(IDENTITY_KEY).await? {
            Some(raw) => StoredIdentity::parse(&raw)?.keypair().map(Some),
            None => Ok(None),
        }
    }

    async fn persist(&self, keypair: &Keypair) -> Result<()> {
        let stored = StoredIdentity {
            secret_key: STANDARD.encode(keypair.to_bytes()),
            public_key: keypair.pubkey().to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let blob = serde_json::to_vec(&stored)
            .map_err(|e| Error::SecureStore(format!("failed to encode identity: {e}")))?;
        self.store.set(IDENTITY_KEY, &blob).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::secure_store::InMemorySecureStore;

    fn identity() -> (InMemorySecureStore, LocalSigningIdentity<InMemorySecureStore>) {
        let store = InMemorySecureStore::new();
        (store.clone(), LocalSigningIdentity::new(store))
    }

    #[tokio::test]
    async fn get_or_create__called_twice__same_keypair() {
        // given
        let (_, identity) = identity();

        // when
        let first = identity.get_or_create().await.unwrap();
        let second = identity.get_or_create().await.unwrap();

        // then
        assert_eq!(first.pubkey(), second.pubkey());
    }

    #[tokio::test]
    async fn get_or_create__concurrent_callers__one_persisted_keypair() {
        // given
        let (store, identity) = identity();

        // when
        let (a, b, c) = tokio::join!(
            identity.get_or_create(),
            identity.get_or_create(),
            identity.get_or_create()
        );

        // then
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.pubkey(), b.pubkey());
        assert_eq!(b.pubkey(), c.pubkey());
        let reopened = LocalSigningIdentity::new(store);
        assert_eq!(reopened.get().await.unwrap().unwrap().pubkey(), a.pubkey());
    }

    #[tokio::test]
    async fn get__nothing_stored__none_and_nothing_created() {
        // given
        let (store, identity) = identity();

        // when
        let peeked = identity.get().await.unwrap();

        // then
        assert!(peeked.is_none());
        assert_eq!(store.get(IDENTITY_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear__then_get_or_create__fresh_keypair() {
        // given
        let (_, identity) = identity();
        let original = identity.get_or_create().await.unwrap();

        // when
        identity.clear().await.unwrap();
        let replacement = identity.get_or_create().await.unwrap();

        // then
        assert_ne!(original.pubkey(), replacement.pubkey());
    }

    #[tokio::test]
    async fn public_key__reads_stored_blob_without_loading_secret() {
        // given
        let (store, identity) = identity();
        let created = identity.get_or_create().await.unwrap();

        // when
        let fresh_view = LocalSigningIdentity::new(store);
        let public_key = fresh_view.public_key().await.unwrap();

        // then
        assert_eq!(public_key, Some(created.pubkey()));
    }

    #[tokio::test]
    async fn get_or_create__unreadable_blob__error_not_replaced() {
        // given
        let (store, identity) = identity();
        store.set(IDENTITY_KEY, b"not json").await.unwrap();

        // when
        let result = identity.get_or_create().await;

        // then
        assert!(matches!(result, Err(Error::SecureStore(_))));
        assert_eq!(
            store.get(IDENTITY_KEY).await.unwrap().as_deref(),
            Some(&b"not json"[..])
        );
    }

    #[tokio::test]
    async fn stored_blob__has_expected_fields() {
        // given
        let (store, identity) = identity();
        let keypair = identity.get_or_create().await.unwrap();

        // when
        let raw = store.get(IDENTITY_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        // then
        assert_eq!(json["public_key"], keypair.pubkey().to_string());
        assert!(json["created_at"].as_i64().unwrap() > 0);
        let secret = STANDARD.decode(json["secret_key"].as_str().unwrap()).unwrap();
        assert_eq!(secret.len(), 64);
    }
}
