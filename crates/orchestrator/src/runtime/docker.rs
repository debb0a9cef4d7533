use std::{collections::HashMap, future::Future};

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, Stats, StatsOptions,
        StopContainerOptions,
    },
    errors::Error,
    image::{CreateImageOptions, ListImagesOptions},
    service::{HostConfig, PortBinding},
    Docker,
};
use byte_unit::n_mib_bytes;
use common::config;
use db::deployment::Resources;
use futures_util::{pin_mut, StreamExt, TryStreamExt};
use tracing::{info, instrument, warn};

use super::{ContainerRuntime, ContainerState, LaunchSpec, RuntimeError};

/// [`ContainerRuntime`] implementation backed by a Docker daemon.
pub struct DockerRuntime {
    client: Docker,
    platform: Option<String>,
    stop_timeout: i64,
    log_size_limit: usize,
}

impl DockerRuntime {
    /// Connect to a Docker daemon using the provided runtime configuration.
    pub fn connect(config: &config::Runtime) -> Result<Self, Error> {
        let client = match &config.socket_path {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)?,
            None => Docker::connect_with_socket_defaults()?,
        };

        Ok(Self {
            client,
            platform: config.platform.clone(),
            stop_timeout: config.stop_timeout as i64,
            log_size_limit: config.log_size_limit,
        })
    }

    /// Ensure that the image with the provided name exists.
    ///
    /// If it doesn't, an attempt to pull it from Docker registry will be made.
    async fn ensure_image_exists(&self, image: &str) -> Result<(), Error> {
        let list = self
            .client
            .list_images(Some(ListImagesOptions {
                filters: HashMap::from([("reference", vec![image])]),
                ..Default::default()
            }))
            .await?;

        if list.is_empty() {
            info!(%image, "downloading missing docker image");

            self.client
                .create_image(
                    Some(CreateImageOptions {
                        from_image: image,
                        ..Default::default()
                    }),
                    None,
                    None,
                )
                .map_ok(|_| ())
                .try_collect::<()>()
                .await?;
        }

        Ok(())
    }

    async fn stats(&self, container_id: &str) -> Result<Option<Resources>, Error> {
        let stream = self.client.stats(
            container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        pin_mut!(stream);

        let stats = stream.next().await.transpose()?;

        Ok(stats.as_ref().map(resources))
    }
}

/// Convert a Docker stats sample into a resource usage snapshot.
fn resources(stats: &Stats) -> Resources {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or_default()
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or_default());
    let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1);

    let cpu_percent = if system_delta > 0 {
        cpu_delta as f64 / system_delta as f64 * online_cpus as f64 * 100.0
    } else {
        0.0
    };

    let memory_mb =
        stats.memory_stats.usage.unwrap_or_default() as f64 / n_mib_bytes!(1) as f64;

    Resources {
        cpu_percent,
        memory_mb,
        storage_mb: None,
    }
}

/// Map Docker "no such container" responses into [`RuntimeError::NotFound`].
fn classify(container_id: &str, err: Error) -> RuntimeError {
    match err {
        Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            container_id: container_id.to_string(),
        },
        err => RuntimeError::Docker(err),
    }
}

/// Await container start, discarding the container if it didn't start.
///
/// Container names are derived from leases, so a leftover container
/// would block every later launch of the same lease.
async fn start_or_discard(
    container_id: &str,
    start: impl Future<Output = Result<(), Error>>,
    discard: impl Future<Output = Result<(), RuntimeError>>,
) -> Result<(), RuntimeError> {
    let Err(err) = start.await else {
        return Ok(());
    };

    if let Err(cleanup) = discard.await {
        warn!(container_id, %cleanup, "unable to remove container that failed to start");
    }

    Err(RuntimeError::Docker(err))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip_all, fields(name = %spec.name, image = %spec.image), err)]
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        self.ensure_image_exists(&spec.image).await?;

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();

        for port in &spec.ports {
            let key = format!(
                "{}/{}",
                port.container_port,
                port.protocol.as_deref().unwrap_or("tcp")
            );

            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: port.host_port.map(|port| port.to_string()),
                }]),
            );
        }

        let binds = spec
            .volumes
            .iter()
            .map(|volume| {
                let mode = if volume.read_only { "ro" } else { "rw" };
                format!("{}:{}:{}", volume.host_path, volume.container_path, mode)
            })
            .collect::<Vec<_>>();

        let host_config = HostConfig {
            memory: Some(n_mib_bytes!(spec.memory) as i64),
            nano_cpus: Some((spec.cpu * 1e9) as i64),
            port_bindings: Some(port_bindings),
            binds: Some(binds),
            security_opt: Some(vec![String::from("no-new-privileges")]),
            ..Default::default()
        };

        let cmd = match (&spec.command, &spec.args) {
            (Some(command), Some(args)) => Some(command.iter().chain(args).cloned().collect()),
            (Some(command), None) => Some(command.clone()),
            (None, Some(args)) => Some(args.clone()),
            (None, None) => None,
        };

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: self.platform.clone(),
                }),
                Config {
                    image: Some(spec.image.clone()),
                    cmd,
                    env: Some(
                        spec.env
                            .iter()
                            .map(|(key, value)| format!("{key}={value}"))
                            .collect(),
                    ),
                    labels: Some(spec.labels.clone().into_iter().collect()),
                    exposed_ports: Some(exposed_ports),
                    host_config: Some(host_config),
                    ..Default::default()
                },
            )
            .await?;

        start_or_discard(
            &container.id,
            self.client.start_container::<String>(&container.id, None),
            self.remove(&container.id),
        )
        .await?;

        Ok(container.id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        match self
            .client
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: self.stop_timeout,
                }),
            )
            .await
        {
            // Container is already stopped.
            Err(Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            result => result.map_err(|err| classify(container_id, err)),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|err| classify(container_id, err))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let response = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|err| classify(container_id, err))?;

        let state = response.state.unwrap_or_default();

        if state.running.unwrap_or(false) {
            Ok(ContainerState::Running {
                started_at: state.started_at,
                stats: self
                    .stats(container_id)
                    .await
                    .map_err(|err| classify(container_id, err))?,
            })
        } else {
            Ok(ContainerState::Exited {
                exit_code: state.exit_code.unwrap_or_default(),
            })
        }
    }

    async fn logs(&self, container_id: &str, tail: usize) -> Result<String, RuntimeError> {
        let stream = self.client.logs(
            container_id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                timestamps: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );
        pin_mut!(stream);

        let mut output = String::new();

        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|err| classify(container_id, err))?
        {
            let chunk = chunk.to_string();

            if output.len() + chunk.len() > self.log_size_limit {
                break;
            }

            output.push_str(&chunk);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn discard(flag: &AtomicBool) -> impl Future<Output = Result<(), RuntimeError>> + '_ {
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_start_discards_container() {
        let discarded = AtomicBool::new(false);

        let result = start_or_discard(
            "container",
            async {
                Err(Error::DockerResponseServerError {
                    status_code: 500,
                    message: String::from("port is already allocated"),
                })
            },
            discard(&discarded),
        )
        .await;

        assert!(matches!(
            result,
            Err(RuntimeError::Docker(Error::DockerResponseServerError {
                status_code: 500,
                ..
            }))
        ));
        assert!(discarded.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn started_container_is_kept() {
        let discarded = AtomicBool::new(false);

        start_or_discard("container", async { Ok(()) }, discard(&discarded))
            .await
            .expect("unable to start container");

        assert!(!discarded.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cleanup_failure_keeps_start_error() {
        let result = start_or_discard(
            "container",
            async {
                Err(Error::DockerResponseServerError {
                    status_code: 409,
                    message: String::from("conflict"),
                })
            },
            async {
                Err(RuntimeError::NotFound {
                    container_id: String::from("container"),
                })
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(RuntimeError::Docker(Error::DockerResponseServerError {
                status_code: 409,
                ..
            }))
        ));
    }
}
