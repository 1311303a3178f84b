//! Typed facade over the remote secret server's REST API.
//!
//! `VaultSecretServer` wraps the `vaultrs` crate. Vault's HTTP API reports
//! "already exists" and "not found" conditions as plain HTTP status codes
//! inside an otherwise generic error type; this module is the single place
//! that lifts those into the typed [`ClientError`] variants the
//! reconciliation engine matches on. Nothing above this crate inspects an
//! error message.

use async_trait::async_trait;
use std::collections::BTreeMap;
use vaultrs::client::{VaultClient as VrsClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError as VrsError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("object already exists")]
    AlreadyExists,

    #[error("object not found")]
    NotFound,

    #[error("authentication rejected")]
    Unauthenticated,

    #[error("secret server request failed: {0}")]
    Other(String),
}

impl From<VrsError> for ClientError {
    fn from(err: VrsError) -> Self {
        match &err {
            VrsError::APIError { code, .. } => match *code {
                400 => ClientError::AlreadyExists,
                404 => ClientError::NotFound,
                401 | 403 => ClientError::Unauthenticated,
                _ => ClientError::Other(err.to_string()),
            },
            other => {
                let message = other.to_string();
                if message.contains("400 Bad") {
                    ClientError::AlreadyExists
                } else if message.contains("404") {
                    ClientError::NotFound
                } else {
                    ClientError::Other(message)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitializeResult {
    pub root_token: String,
    pub shares: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMountKind {
    Userpass,
    AppRole,
}

impl AuthMountKind {
    fn as_str(self) -> &'static str {
        match self {
            AuthMountKind::Userpass => "userpass",
            AuthMountKind::AppRole => "approle",
        }
    }
}

/// Capability the reconciliation engine depends on. `VaultSecretServer` is
/// the production implementation; tests substitute an in-memory fake.
#[async_trait]
pub trait SecretServer: Send + Sync {
    async fn is_sealed(&self) -> Result<bool, ClientError>;
    async fn is_initialized(&self) -> Result<bool, ClientError>;
    async fn initialize(&self, shares: u8, threshold: u8) -> Result<InitializeResult, ClientError>;
    async fn unseal(&self, share: &str) -> Result<(), ClientError>;

    async fn enable_auth_method(
        &self,
        kind: AuthMountKind,
        mount_path: &str,
        token: &str,
    ) -> Result<(), ClientError>;

    async fn write_policy(&self, name: &str, rules: &str, token: &str) -> Result<(), ClientError>;

    async fn mount_kv_v2(&self, mount_path: &str, token: &str) -> Result<(), ClientError>;

    async fn create_user(
        &self,
        mount_path: &str,
        name: &str,
        password: &str,
        policies: &[String],
        token: &str,
    ) -> Result<(), ClientError>;

    async fn create_app_role(
        &self,
        mount_path: &str,
        name: &str,
        policies: &[String],
        secret_id_ttl: &str,
        token_ttl: &str,
        token_max_ttl: &str,
        token: &str,
    ) -> Result<(), ClientError>;

    async fn read_app_role_id(
        &self,
        mount_path: &str,
        name: &str,
        token: &str,
    ) -> Result<String, ClientError>;

    async fn generate_app_role_secret_id(
        &self,
        mount_path: &str,
        name: &str,
        token: &str,
    ) -> Result<String, ClientError>;

    async fn read_kv_v2_exists(
        &self,
        mount_path: &str,
        path: &str,
        token: &str,
    ) -> Result<bool, ClientError>;

    async fn write_kv_v2(
        &self,
        mount_path: &str,
        path: &str,
        data: &BTreeMap<String, serde_json::Value>,
        token: &str,
    ) -> Result<(), ClientError>;
}

/// Production implementation, backed by the real Vault HTTP API.
pub struct VaultSecretServer {
    endpoint: String,
    timeout: std::time::Duration,
}

impl VaultSecretServer {
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Build a short-lived `vaultrs` client, optionally authenticated with
    /// `token`. A fresh client per call keeps token scoping simple: most
    /// reconciliation calls use the root token minted by `initialize`,
    /// which this controller never persists in memory longer than a tick.
    fn client(&self, token: Option<&str>) -> Result<VrsClient, ClientError> {
        let mut builder = VaultClientSettingsBuilder::default();
        builder.address(&self.endpoint);
        builder.timeout(Some(self.timeout));
        if let Some(token) = token {
            builder.token(token);
        }
        let settings = builder
            .build()
            .map_err(|e| ClientError::Other(e.to_string()))?;
        VrsClient::new(settings).map_err(|e| ClientError::Other(e.to_string()))
    }
}

#[async_trait]
impl SecretServer for VaultSecretServer {
    async fn is_sealed(&self) -> Result<bool, ClientError> {
        let client = self.client(None)?;
        let status = vaultrs::sys::seal_status(&client)
            .await
            .map_err(ClientError::from)?;
        Ok(status.sealed)
    }

    async fn is_initialized(&self) -> Result<bool, ClientError> {
        let client = self.client(None)?;
        vaultrs::sys::is_initialized(&client)
            .await
            .map_err(ClientError::from)
    }

    async fn initialize(&self, shares: u8, threshold: u8) -> Result<InitializeResult, ClientError> {
        let client = self.client(None)?;
        let response = vaultrs::sys::start_initialization(
            &client,
            shares as u64,
            threshold as u64,
            None,
        )
        .await
        .map_err(ClientError::from)?;

        Ok(InitializeResult {
            root_token: response.root_token,
            shares: response.keys,
        })
    }

    async fn unseal(&self, share: &str) -> Result<(), ClientError> {
        let client = self.client(None)?;
        vaultrs::sys::unseal(&client, Some(share.to_string()), None, None)
            .await
            .map_err(ClientError::from)?;
        Ok(())
    }

    async fn enable_auth_method(
        &self,
        kind: AuthMountKind,
        mount_path: &str,
        token: &str,
    ) -> Result<(), ClientError> {
        let client = self.client(Some(token))?;
        vaultrs::sys::auth::enable(&client, mount_path, kind.as_str(), None)
            .await
            .map_err(ClientError::from)?;
        Ok(())
    }

    async fn write_policy(&self, name: &str, rules: &str, token: &str) -> Result<(), ClientError> {
        let client = self.client(Some(token))?;
        vaultrs::sys::policy::set(&client, name, rules)
            .await
            .map_err(ClientError::from)?;
        Ok(())
    }

    async fn mount_kv_v2(&self, mount_path: &str, token: &str) -> Result<(), ClientError> {
        let client = self.client(Some(token))?;
        vaultrs::sys::mount::enable(&client, mount_path, "kv-v2", None)
            .await
            .map_err(ClientError::from)?;
        Ok(())
    }

    async fn create_user(
        &self,
        mount_path: &str,
        name: &str,
        password: &str,
        policies: &[String],
        token: &str,
    ) -> Result<(), ClientError> {
        let client = self.client(Some(token))?;
        vaultrs::auth::userpass::user::set(
            &client,
            mount_path,
            name,
            password,
            Some(vaultrs::api::auth::userpass::requests::SetUserRequestBuilder::default().token_policies(policies.to_vec())),
        )
        .await
        .map_err(ClientError::from)?;
        Ok(())
    }

    async fn create_app_role(
        &self,
        mount_path: &str,
        name: &str,
        policies: &[String],
        secret_id_ttl: &str,
        token_ttl: &str,
        token_max_ttl: &str,
        token: &str,
    ) -> Result<(), ClientError> {
        let client = self.client(Some(token))?;
        vaultrs::auth::approle::role::set(
            &client,
            mount_path,
            name,
            Some(
                vaultrs::api::auth::approle::requests::SetAppRoleRequestBuilder::default()
                    .token_policies(policies.to_vec())
                    .secret_id_ttl(secret_id_ttl)
                    .token_ttl(token_ttl)
                    .token_max_ttl(token_max_ttl),
            ),
        )
        .await
        .map_err(ClientError::from)?;
        Ok(())
    }

    async fn read_app_role_id(
        &self,
        mount_path: &str,
        name: &str,
        token: &str,
    ) -> Result<String, ClientError> {
        let client = self.client(Some(token))?;
        let response = vaultrs::auth::approle::role::read_id(&client, mount_path, name)
            .await
            .map_err(ClientError::from)?;
        Ok(response.role_id)
    }

    async fn generate_app_role_secret_id(
        &self,
        mount_path: &str,
        name: &str,
        token: &str,
    ) -> Result<String, ClientError> {
        let client = self.client(Some(token))?;
        let response =
            vaultrs::auth::approle::role::generate_secret_id(&client, mount_path, name, None)
                .await
                .map_err(ClientError::from)?;
        Ok(response.secret_id)
    }

    async fn read_kv_v2_exists(
        &self,
        mount_path: &str,
        path: &str,
        token: &str,
    ) -> Result<bool, ClientError> {
        let client = self.client(Some(token))?;
        match vaultrs::kv2::read::<serde_json::Value>(&client, mount_path, path).await {
            Ok(_) => Ok(true),
            Err(e) => match ClientError::from(e) {
                ClientError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn write_kv_v2(
        &self,
        mount_path: &str,
        path: &str,
        data: &BTreeMap<String, serde_json::Value>,
        token: &str,
    ) -> Result<(), ClientError> {
        let client = self.client(Some(token))?;
        vaultrs::kv2::set(&client, mount_path, path, data)
            .await
            .map_err(ClientError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_400_maps_to_already_exists() {
        let err = VrsError::APIError {
            code: 400,
            errors: vec!["path is already in use".into()],
        };
        assert!(matches!(ClientError::from(err), ClientError::AlreadyExists));
    }

    #[test]
    fn api_error_404_maps_to_not_found() {
        let err = VrsError::APIError {
            code: 404,
            errors: vec![],
        };
        assert!(matches!(ClientError::from(err), ClientError::NotFound));
    }

    #[test]
    fn auth_mount_kind_uses_vault_method_names() {
        assert_eq!(AuthMountKind::Userpass.as_str(), "userpass");
        assert_eq!(AuthMountKind::AppRole.as_str(), "approle");
    }
}
