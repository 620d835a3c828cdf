//! Sidecar setup: container lifecycle and QR code linking.
//!
//! Brings up the WhatsApp bridge container with an inspect-start-create
//! sequence. Credentials live in a named volume so a paired session survives
//! container restarts and re-creation.

use std::collections::HashMap;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::client::WhatsAppClient;
use super::WhatsAppError;
use crate::config::SidecarConfig;

/// Port the bridge listens on inside the container.
pub const CONTAINER_BRIDGE_PORT: u16 = 3001;

/// Container label marking resources owned by the relay.
const OWNER_LABEL: &str = "wa-relay";

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Ensure the sidecar container is running.
///
/// inspect -> start if stopped -> pull and create if missing.
pub async fn ensure_container(docker: &Docker, config: &SidecarConfig) -> Result<(), WhatsAppError> {
    let name = config.container_name.as_str();

    // Step 1: Check if container already exists
    match docker.inspect_container(name, None).await {
        Ok(info) => {
            let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
            if running {
                info!(container = name, "WhatsApp sidecar already running");
                return Ok(());
            }
            // Container exists but is stopped.
            docker
                .start_container(name, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| {
                    WhatsAppError::SetupFailed(format!("failed to start container: {e}"))
                })?;
            info!(container = name, "WhatsApp sidecar started");
            return Ok(());
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {}
        Err(e) => {
            return Err(WhatsAppError::SetupFailed(format!(
                "failed to inspect container: {e}"
            )));
        }
    }

    // Step 2: Pull the image
    let pull_opts = CreateImageOptions {
        from_image: config.image.as_str(),
        ..Default::default()
    };
    let mut pull_stream = docker.create_image(Some(pull_opts), None, None);
    while let Some(result) = pull_stream.next().await {
        if let Err(e) = result {
            warn!(error = %e, "image pull warning");
        }
    }
    info!(image = %config.image, "WhatsApp sidecar image pulled");

    // Step 3: Create and start
    let container_config = container_config(config);
    let create_opts = CreateContainerOptions {
        name: name.to_owned(),
        platform: None,
    };
    docker
        .create_container(Some(create_opts), container_config)
        .await
        .map_err(|e| WhatsAppError::SetupFailed(format!("failed to create container: {e}")))?;

    docker
        .start_container(name, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| WhatsAppError::SetupFailed(format!("failed to start container: {e}")))?;

    info!(container = name, image = %config.image, "WhatsApp sidecar created and started");
    Ok(())
}

/// Build the container definition: loopback port binding, credentials
/// volume, restart policy and memory limit.
fn container_config(config: &SidecarConfig) -> ContainerConfig<String> {
    let port_key = format!("{CONTAINER_BRIDGE_PORT}/tcp");
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: Some("127.0.0.1".to_owned()),
            host_port: Some(config.port.to_string()),
        }]),
    );

    let memory_bytes = i64::from(config.memory_mb).saturating_mul(BYTES_PER_MB);

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(vec![format!("{}:{}", config.auth_volume, config.auth_mount)]),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(5),
        }),
        memory: Some(memory_bytes),
        ..Default::default()
    };

    let mut labels = HashMap::new();
    labels.insert(OWNER_LABEL.to_owned(), "true".to_owned());

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key, HashMap::new());

    ContainerConfig {
        image: Some(config.image.clone()),
        env: Some(vec![format!("AUTH_DIR={}", config.auth_mount)]),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Run the QR setup flow: ensure container, wait for health, return the
/// pairing code.
///
/// `client` must point at the port the container publishes; config
/// validation checks that `session.bridge_url` matches `sidecar.port`.
/// Returns `Ok(None)` when the sidecar already holds a paired session.
pub async fn setup_qr(
    docker: &Docker,
    config: &SidecarConfig,
    client: &WhatsAppClient,
) -> Result<Option<String>, WhatsAppError> {
    ensure_container(docker, config).await?;

    client.wait_healthy().await?;

    if client.status().await?.connected {
        return Ok(None);
    }
    client.get_qr().await.map(Some)
}
