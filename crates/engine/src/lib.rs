//! The reconciliation engine.
//!
//! `Engine::reconcile` is the single idempotent entry point the periodic
//! driver calls each tick. It observes the remote server's lifecycle state
//! (uninitialized / sealed / unsealed) and drives whichever transition is
//! necessary, then converges the declared policies, auth mounts, secret
//! mounts, and app-role exports. There is no engine-side state variable
//! tracking which branch ran last tick — every tick re-observes.

use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use vaultkeeper_client::{AuthMountKind, ClientError, SecretServer};
use vaultkeeper_config::{AppRoleConfig, AuthMountConfig, Config, SecretMountConfig, UserConfig};
use vaultkeeper_crypto::{random_alphanumeric, CryptoError, KeyWrapper};
use vaultkeeper_exporter::{ExportError, Exporter};
use vaultkeeper_store::{share_key, StoreBackend, StoreError, KEYS_TREE, ROOT_TOKEN_KEY};

const RANDOM_PLACEHOLDER: &str = "*random*";
const RANDOM_VALUE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("initialize response is missing required field: {0}")]
    IncompleteInitializeResponse(&'static str),
}

pub struct Engine {
    server: Arc<dyn SecretServer>,
    store: Arc<dyn StoreBackend>,
    crypto: Arc<dyn KeyWrapper>,
    exporter: Option<Arc<dyn Exporter>>,
    config: Config,
}

impl Engine {
    pub fn new(
        server: Arc<dyn SecretServer>,
        store: Arc<dyn StoreBackend>,
        crypto: Arc<dyn KeyWrapper>,
        exporter: Option<Arc<dyn Exporter>>,
        config: Config,
    ) -> Self {
        Self {
            server,
            store,
            crypto,
            exporter,
            config,
        }
    }

    pub async fn reconcile(&self) -> Result<(), EngineError> {
        let token = if !self.server.is_initialized().await? {
            self.initialize().await?
        } else if self.server.is_sealed().await? {
            self.unseal_from_store().await?;
            self.read_root_token()?
        } else {
            self.read_root_token()?
        };

        self.converge(&token).await
    }

    /// First-ever start-up: the server mints its own key material, which we
    /// persist before unsealing so a crash between initialize and unseal
    /// never loses the only copy of the shares.
    async fn initialize(&self) -> Result<String, EngineError> {
        let share_count = self.config.unlocker.number_keys.clamp(1, 5) as u8;
        let result = self
            .server
            .initialize(share_count, share_count)
            .await?;

        if result.shares.len() != share_count as usize {
            return Err(EngineError::IncompleteInitializeResponse("shares"));
        }

        let wrapped_token = self.crypto.encrypt(&result.root_token)?;
        self.store.put(KEYS_TREE, ROOT_TOKEN_KEY, &wrapped_token)?;

        for (i, share) in result.shares.iter().enumerate() {
            let wrapped_share = self.crypto.encrypt(share)?;
            self.store.put(KEYS_TREE, &share_key(i), &wrapped_share)?;
        }

        for share in &result.shares {
            self.server.unseal(share).await?;
        }

        Ok(result.root_token)
    }

    /// Restart while sealed: the shares already live in the store,
    /// encrypted. Reload and decrypt them in share order before unsealing.
    async fn unseal_from_store(&self) -> Result<(), EngineError> {
        for share in self.collect_shares()?.iter() {
            self.server.unseal(share).await?;
        }
        Ok(())
    }

    fn collect_shares(&self) -> Result<Vec<String>, EngineError> {
        let share_count = self.config.unlocker.number_keys.clamp(1, 5) as usize;
        let mut shares = Vec::with_capacity(share_count);
        for i in 0..share_count {
            let wrapped = self.store.get(KEYS_TREE, &share_key(i))?;
            shares.push(self.crypto.decrypt(&wrapped)?);
        }
        Ok(shares)
    }

    fn read_root_token(&self) -> Result<String, EngineError> {
        let wrapped = self.store.get(KEYS_TREE, ROOT_TOKEN_KEY)?;
        Ok(self.crypto.decrypt(&wrapped)?)
    }

    async fn converge(&self, token: &str) -> Result<(), EngineError> {
        self.ensure_policies(token).await?;
        self.ensure_auth_mounts(token).await?;
        self.ensure_secret_mounts(token).await?;
        if self.exporter.is_some() {
            self.export_app_role_credentials(token).await;
        }
        Ok(())
    }

    async fn ensure_policies(&self, token: &str) -> Result<(), EngineError> {
        for policy in &self.config.provisioner.policies {
            self.server
                .write_policy(&policy.name, &policy.rules, token)
                .await?;
        }
        Ok(())
    }

    async fn ensure_auth_mounts(&self, token: &str) -> Result<(), EngineError> {
        for mount in &self.config.provisioner.auth {
            let kind = match mount.kind.as_str() {
                "approle" => AuthMountKind::AppRole,
                _ => AuthMountKind::Userpass,
            };

            match self.server.enable_auth_method(kind, &mount.path, token).await {
                Ok(()) | Err(ClientError::AlreadyExists) => {}
                Err(other) => return Err(other.into()),
            }

            match kind {
                AuthMountKind::Userpass => self.ensure_users(mount, token).await,
                AuthMountKind::AppRole => self.ensure_app_roles(mount, token).await,
            }
        }
        Ok(())
    }

    async fn ensure_users(&self, mount: &AuthMountConfig, token: &str) {
        for user in &mount.users {
            if let Err(e) = self.create_user(mount, user, token).await {
                tracing::warn!(user = %user.name, mount = %mount.path, error = %e, "failed to provision userpass user, skipping");
            }
        }
    }

    async fn create_user(
        &self,
        mount: &AuthMountConfig,
        user: &UserConfig,
        token: &str,
    ) -> Result<(), ClientError> {
        self.server
            .create_user(&mount.path, &user.name, &user.pass, &user.policies, token)
            .await
    }

    async fn ensure_app_roles(&self, mount: &AuthMountConfig, token: &str) {
        for role in &mount.approles {
            if let Err(e) = self.create_app_role(mount, role, token).await {
                tracing::warn!(role = %role.name, mount = %mount.path, error = %e, "failed to provision app role, skipping");
            }
        }
    }

    async fn create_app_role(
        &self,
        mount: &AuthMountConfig,
        role: &AppRoleConfig,
        token: &str,
    ) -> Result<(), ClientError> {
        self.server
            .create_app_role(
                &mount.path,
                &role.name,
                &role.policies,
                &role.secret_id_ttl,
                &role.token_ttl,
                &role.token_max_ttl,
                token,
            )
            .await
    }

    async fn ensure_secret_mounts(&self, token: &str) -> Result<(), EngineError> {
        for mount in &self.config.provisioner.mounts {
            if let Err(e) = self.ensure_secret_mount(mount, token).await {
                tracing::error!(mount = %mount.path, error = %e, "failed to converge secret mount");
            }
        }
        Ok(())
    }

    async fn ensure_secret_mount(
        &self,
        mount: &SecretMountConfig,
        token: &str,
    ) -> Result<(), EngineError> {
        match self.server.mount_kv_v2(&mount.path, token).await {
            Ok(()) | Err(ClientError::AlreadyExists) => {}
            Err(other) => return Err(other.into()),
        }

        for secret in &mount.secrets {
            let effective_path = format!("{}/{}", secret.path.trim_matches('/'), secret.name);

            let exists = self
                .server
                .read_kv_v2_exists(&mount.path, &effective_path, token)
                .await?;
            if exists {
                continue;
            }

            let data: BTreeMap<String, JsonValue> = secret
                .data
                .iter()
                .map(|(k, v)| (k.clone(), yaml_to_json(&randomize(v))))
                .collect();

            self.server
                .write_kv_v2(&mount.path, &effective_path, &data, token)
                .await?;
        }
        Ok(())
    }

    async fn export_app_role_credentials(&self, token: &str) {
        let exporter = match &self.exporter {
            Some(e) => e.clone(),
            None => return,
        };

        for mount in &self.config.provisioner.auth {
            if mount.kind != "approle" {
                continue;
            }
            for role in &mount.approles {
                let Some(export) = &role.export else {
                    continue;
                };
                if let Err(e) = self
                    .export_one_role(exporter.as_ref(), &mount.path, role, &export.namespace, token)
                    .await
                {
                    tracing::warn!(role = %role.name, namespace = %export.namespace, error = %e, "failed to export app-role credentials, skipping");
                }
            }
        }
    }

    async fn export_one_role(
        &self,
        exporter: &dyn Exporter,
        mount_path: &str,
        role: &AppRoleConfig,
        namespace: &str,
        token: &str,
    ) -> Result<(), EngineError> {
        let role_id = self.server.read_app_role_id(mount_path, &role.name, token).await?;
        let secret_id = self
            .server
            .generate_app_role_secret_id(mount_path, &role.name, token)
            .await?;

        let mut data = BTreeMap::new();
        data.insert("role_id".to_string(), role_id.into_bytes());
        data.insert("secret_id".to_string(), secret_id.into_bytes());

        exporter.upsert_secret(namespace, &role.name, data).await?;
        Ok(())
    }
}

/// Replace every leaf string literal equal to `*random*` with a fresh
/// 32-character alphanumeric string; recurse into nested maps; leave
/// everything else untouched.
fn randomize(value: &YamlValue) -> YamlValue {
    match value {
        YamlValue::String(s) if s == RANDOM_PLACEHOLDER => {
            YamlValue::String(random_alphanumeric(RANDOM_VALUE_LEN))
        }
        YamlValue::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), randomize(v));
            }
            YamlValue::Mapping(out)
        }
        other => other.clone(),
    }
}

fn yaml_to_json(value: &YamlValue) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}
