//! Exports generated credentials to an external orchestrator.
//!
//! The only concrete exporter is Kubernetes: it creates or updates a
//! `Secret` object in a target namespace from a byte map. Construction
//! chooses between ambient in-cluster credentials (service account token
//! mounted into the pod) and an explicit kubeconfig file, matching the
//! `access` setting carried over from the original deployment's exporter
//! configuration.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to build Kubernetes client: {0}")]
    ClientSetup(String),

    #[error("failed to upsert secret {namespace}/{name}: {source}")]
    Upsert {
        namespace: String,
        name: String,
        source: kube::Error,
    },
}

#[async_trait]
pub trait Exporter: Send + Sync {
    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<(), ExportError>;
}

/// Kubernetes-backed exporter using a typed `Api<Secret>` client.
pub struct KubeExporter {
    client: Client,
}

impl KubeExporter {
    /// Construct a client from the pod's mounted service account.
    pub async fn in_cluster() -> Result<Self, ExportError> {
        let config = Config::incluster()
            .map_err(|e| ExportError::ClientSetup(e.to_string()))?;
        let client =
            Client::try_from(config).map_err(|e| ExportError::ClientSetup(e.to_string()))?;
        Ok(Self { client })
    }

    /// Construct a client from an explicit kubeconfig file.
    pub async fn out_of_cluster(kubeconfig_path: &Path) -> Result<Self, ExportError> {
        let kubeconfig = kube::config::Kubeconfig::read_from(kubeconfig_path)
            .map_err(|e| ExportError::ClientSetup(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| ExportError::ClientSetup(e.to_string()))?;
        let client =
            Client::try_from(config).map_err(|e| ExportError::ClientSetup(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Exporter for KubeExporter {
    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<(), ExportError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k, ByteString(v)))
                    .collect(),
            ),
            ..Default::default()
        };

        secrets
            .patch(
                name,
                &PatchParams::apply("vaultkeeper").force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|source| ExportError::Upsert {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingExporter {
        calls: std::sync::Arc<std::sync::Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Exporter for RecordingExporter {
        async fn upsert_secret(
            &self,
            namespace: &str,
            name: &str,
            _data: BTreeMap<String, Vec<u8>>,
        ) -> Result<(), ExportError> {
            self.calls
                .lock()
                .unwrap()
                .push((namespace.to_string(), name.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn exporter_trait_is_object_safe_and_callable() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let exporter = RecordingExporter {
            calls: calls.clone(),
        };
        let boxed: Box<dyn Exporter> = Box::new(exporter);

        let mut data = BTreeMap::new();
        data.insert("role_id".to_string(), b"abc".to_vec());
        boxed
            .upsert_secret("security", "my-role", data)
            .await
            .unwrap();

        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("security".to_string(), "my-role".to_string())]
        );
    }
}
