//! vaultkeeper: unattended lifecycle controller for a sealed-vault secret server.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use vaultkeeper_client::VaultSecretServer;
use vaultkeeper_config::Config;
use vaultkeeper_crypto::LocalCrypto;
use vaultkeeper_driver::{Driver, DriverConfig};
use vaultkeeper_engine::Engine;
use vaultkeeper_exporter::{Exporter, KubeExporter};
use vaultkeeper_store::SledStore;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = vaultkeeper_telemetry::init_telemetry() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing::info!(
        storage = %config.storage.kind,
        number_keys = config.unlocker.number_keys,
        "configuration loaded"
    );

    let store = Arc::new(SledStore::open(Path::new(&config.storage.boltdb.path))?);
    let crypto = Arc::new(LocalCrypto::load_or_generate(Path::new(&config.encryption.path))?);
    let server = Arc::new(VaultSecretServer::new(
        config.unlocker.url.clone(),
        Duration::from_secs(config.unlocker.request_timeout_secs),
    ));

    let exporter = build_exporter(&config).await?;

    let manager = config.manager.clone();
    let engine = Arc::new(Engine::new(server, store, crypto, exporter, config));

    let driver = Driver::new(
        engine,
        DriverConfig {
            repeat_interval: Duration::from_secs(manager.repeat_interval_secs),
            operation_timeout: Duration::from_secs(manager.operation_timeout_secs),
        },
    );

    driver.run().await?;
    Ok(())
}

async fn build_exporter(
    config: &Config,
) -> Result<Option<Arc<dyn Exporter>>, Box<dyn std::error::Error>> {
    let Some(exporter_config) = &config.exporters else {
        return Ok(None);
    };

    let exporter: Arc<dyn Exporter> = match exporter_config.kubernetes.access.as_str() {
        "in-cluster" => Arc::new(KubeExporter::in_cluster().await?),
        _ => {
            let kubeconfig_path = dirs_kubeconfig_path();
            Arc::new(KubeExporter::out_of_cluster(&kubeconfig_path).await?)
        }
    };

    Ok(Some(exporter))
}

fn dirs_kubeconfig_path() -> std::path::PathBuf {
    std::env::var("KUBECONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
            std::path::PathBuf::from(home).join(".kube").join("config")
        })
}
