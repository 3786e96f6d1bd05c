//! The seam between the orchestrator and the host container engine.
//!
//! [`ContainerBackend`] is the operation set the state machine needs;
//! [`DockerBackend`] implements it over bollard. Cleanup operations tolerate
//! NotFound so that resets are idempotent no matter how far a setup got.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    NetworkingConfig, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::network::CreateNetworkOptions;
use bollard::secret::{EndpointIpamConfig, EndpointSettings, Ipam, IpamConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Everything needed to create one node container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name; Diorama uses the nid.
    pub name: String,
    /// Image tag; Diorama uses the program name.
    pub image: String,
    /// Full command: runtime launch command plus per-node arguments.
    pub command: Vec<String>,
    pub working_dir: String,
    /// Static address on the bridge network.
    pub ip_address: Ipv4Addr,
    pub udp_ports: Vec<u16>,
    pub network: String,
}

/// Lifecycle actions the operator can apply to a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    Start,
    Stop,
    Kill,
    Restart,
    Pause,
    Unpause,
    Remove,
}

/// One parsed log line: the engine-supplied timestamp and the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

pub type LogChunkStream = BoxStream<'static, Result<bytes::Bytes>>;

/// Split a raw log blob at newlines; each line is `timestamp SP message`.
pub fn parse_log(bytes: &[u8]) -> Vec<LogEntry> {
    let text = String::from_utf8_lossy(bytes);
    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((timestamp, message)) => LogEntry {
                timestamp: timestamp.to_owned(),
                message: message.to_owned(),
            },
            None => LogEntry {
                timestamp: line.to_owned(),
                message: String::new(),
            },
        })
        .collect()
}

/// The operations the orchestrator performs against the container engine.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Build an image from a context directory containing a Dockerfile.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()>;

    /// Create a container attached to the named bridge network at a static
    /// IPv4 address, with its UDP ports exposed. The container is not
    /// started.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    /// Apply a lifecycle action; silent no-op when the container is gone.
    async fn container_action(&self, name: &str, action: NodeAction) -> Result<()>;

    /// Bulk status query. Containers the engine does not list have no entry.
    async fn container_statuses(&self, names: &[String]) -> Result<HashMap<String, String>>;

    /// Follow-mode log tail with engine timestamps, optionally starting at a
    /// unix timestamp.
    async fn container_logs(&self, name: &str, since: Option<i64>) -> Result<LogChunkStream>;

    /// Create an internal bridge network with an IPAM pool over `subnet`.
    async fn create_network(&self, name: &str, subnet: &str) -> Result<()>;

    async fn remove_network(&self, name: &str) -> Result<()>;

    async fn remove_containers(&self, names: &[String]) -> Result<()>;

    async fn remove_images(&self, tags: &[String]) -> Result<()>;
}

/// [`ContainerBackend`] over the local docker daemon.
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    pub fn connect() -> Result<Self> {
        Ok(DockerBackend {
            docker: Docker::connect_with_local_defaults()
                .context("failed to connect to the docker daemon")?,
        })
    }
}

fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// 304 means the container was already in the requested state.
fn is_not_modified(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()> {
        let mut tar_data = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_data);
            builder
                .append_dir_all(".", context_dir)
                .with_context(|| format!("failed to tar {}", context_dir.display()))?;
            builder.finish()?;
        }

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_owned(),
            t: tag.to_owned(),
            rm: true,
            ..Default::default()
        };

        let tar_body = http_body_util::Either::Left(http_body_util::Full::new(bytes::Bytes::from(
            tar_data,
        )));
        let mut build_stream = self.docker.build_image(options, None, Some(tar_body));
        while let Some(msg) = build_stream.next().await {
            match msg {
                Ok(info) => {
                    if let Some(stream) = &info.stream {
                        tracing::trace!(target: "diorama::build", "{}", stream.trim_end());
                    }
                    if let Some(error) = info.error {
                        bail!("image build for `{tag}` failed: {error}");
                    }
                }
                Err(e) => bail!("image build for `{tag}` failed: {e}"),
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let mut endpoints_config = HashMap::new();
        endpoints_config.insert(
            spec.network.clone(),
            EndpointSettings {
                ipam_config: Some(EndpointIpamConfig {
                    ipv4_address: Some(spec.ip_address.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .udp_ports
            .iter()
            .map(|port| (format!("{port}/udp"), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            hostname: Some(spec.name.clone()),
            working_dir: Some(spec.working_dir.clone()),
            exposed_ports: Some(exposed_ports),
            networking_config: Some(NetworkingConfig { endpoints_config }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .with_context(|| format!("failed to create container `{}`", spec.name))?;
        Ok(())
    }

    async fn container_action(&self, name: &str, action: NodeAction) -> Result<()> {
        let result = match action {
            NodeAction::Start => {
                self.docker
                    .start_container(name, None::<StartContainerOptions<String>>)
                    .await
            }
            NodeAction::Stop => {
                self.docker
                    .stop_container(name, Some(StopContainerOptions { t: 3 }))
                    .await
            }
            NodeAction::Kill => {
                self.docker
                    .kill_container(name, None::<KillContainerOptions<String>>)
                    .await
            }
            NodeAction::Restart => {
                self.docker
                    .restart_container(name, Some(RestartContainerOptions { t: 3 }))
                    .await
            }
            NodeAction::Pause => self.docker.pause_container(name).await,
            NodeAction::Unpause => self.docker.unpause_container(name).await,
            NodeAction::Remove => {
                self.docker
                    .remove_container(
                        name,
                        Some(RemoveContainerOptions {
                            v: true,
                            force: true,
                            link: false,
                        }),
                    )
                    .await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) || is_not_modified(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to {action:?} container `{name}`")),
        }
    }

    async fn container_statuses(&self, names: &[String]) -> Result<HashMap<String, String>> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;

        let mut statuses = HashMap::new();
        for summary in summaries {
            let Some(name) = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_owned())
            else {
                continue;
            };
            if !names.contains(&name) {
                continue;
            }
            let state = summary
                .state
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_owned());
            statuses.insert(name, state);
        }
        Ok(statuses)
    }

    async fn container_logs(&self, name: &str, since: Option<i64>) -> Result<LogChunkStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            since: since.unwrap_or(0),
            tail: "all".to_owned(),
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(name, Some(options))
            .map(|item| match item {
                Ok(output) => Ok(output.into_bytes()),
                Err(e) => Err(anyhow::Error::from(e)),
            })
            .boxed();
        Ok(stream)
    }

    async fn create_network(&self, name: &str, subnet: &str) -> Result<()> {
        let net: Ipv4Network = subnet
            .parse()
            .with_context(|| format!("invalid network subnet `{subnet}`"))?;
        let gateway = net
            .nth(1)
            .with_context(|| format!("subnet `{subnet}` has no usable gateway address"))?;

        let ipam = Ipam {
            driver: Some("default".to_owned()),
            config: Some(vec![IpamConfig {
                subnet: Some(format!("{}/{}", net.network(), net.prefix())),
                gateway: Some(gateway.to_string()),
                ..Default::default()
            }]),
            options: None,
        };

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_owned(),
                driver: "bridge".to_owned(),
                internal: true,
                ipam,
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create network `{name}`"))?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove network `{name}`")),
        }
    }

    async fn remove_containers(&self, names: &[String]) -> Result<()> {
        for name in names {
            let result = self
                .docker
                .remove_container(
                    name,
                    Some(RemoveContainerOptions {
                        v: true,
                        force: true,
                        link: false,
                    }),
                )
                .await;
            match result {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to remove container `{name}`"));
                }
            }
        }
        Ok(())
    }

    async fn remove_images(&self, tags: &[String]) -> Result<()> {
        for tag in tags {
            let result = self
                .docker
                .remove_image(
                    tag,
                    Some(RemoveImageOptions {
                        force: true,
                        noprune: false,
                    }),
                    None,
                )
                .await;
            match result {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to remove image `{tag}`"));
                }
            }
        }
        Ok(())
    }
}
