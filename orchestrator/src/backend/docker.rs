//! Runs test runner jobs as local Docker containers.
//!
//! Docker has no config maps, so they live in memory and their files are
//! uploaded into each container before it starts.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
        LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
        UploadToContainerOptions, WaitContainerOptions,
    },
    image::CreateImageOptions,
    Docker,
};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::time::Instant;

use super::{BackendError, ConfigMapData, JobBackend, JobOutcome, JobSpec};
use crate::{
    config::{BackendKind, DockerConfig, ServiceConfig},
    util::{tar::tar_with_files, unique_name, SizeConstraintBytesMut},
};

pub struct DockerBackend {
    docker: Docker,
    cfg: DockerConfig,
    wait_timeout: Duration,
    config_maps: DashMap<String, ConfigMapData>,
    /// Deadline of every job started and not yet waited for
    deadlines: DashMap<String, Instant>,
}

/// The limit ending the wait for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitLimit {
    /// The job's own deadline passes first. The job is killed and its
    /// output still reported.
    Deadline(Instant),
    /// The caller stops waiting first.
    WaitTimeout(Instant),
}

impl WaitLimit {
    fn choose(deadline: Option<Instant>, wait_until: Instant) -> WaitLimit {
        match deadline {
            Some(deadline) if deadline < wait_until => WaitLimit::Deadline(deadline),
            _ => WaitLimit::WaitTimeout(wait_until),
        }
    }

    fn instant(&self) -> Instant {
        match *self {
            WaitLimit::Deadline(t) | WaitLimit::WaitTimeout(t) => t,
        }
    }
}

impl DockerBackend {
    pub async fn connect(cfg: &ServiceConfig) -> Result<DockerBackend, BackendError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        tracing::info!("Connected to Docker");
        Ok(Self::new(docker, cfg))
    }

    /// Wrap an existing client. Nothing is sent to the daemon.
    pub fn new(docker: Docker, cfg: &ServiceConfig) -> DockerBackend {
        DockerBackend {
            docker,
            cfg: cfg.docker.clone(),
            wait_timeout: cfg.jobs.wait_timeout(),
            config_maps: DashMap::new(),
            deadlines: DashMap::new(),
        }
    }

    /// Files of the job's config-map volumes, placed at their mount paths.
    /// Paths are relative to the container root.
    fn mounted_files(&self, spec: &JobSpec) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let mut files = Vec::new();
        for mount in &spec.volume_mounts {
            let volume = spec
                .volumes
                .iter()
                .find(|v| v.name == mount.name)
                .ok_or_else(|| {
                    BackendError::Config(format!("mount of unknown volume {}", mount.name))
                })?;
            let data = self
                .config_maps
                .get(&volume.config_map)
                .ok_or_else(|| BackendError::NoSuchConfigMap(volume.config_map.clone()))?;
            let dir = mount.mount_path.trim_matches('/');
            for (file, content) in data.iter() {
                files.push((format!("{}/{}", dir, file), content.clone().into_bytes()));
            }
        }
        Ok(files)
    }

    async fn pull_image(&self, image: &str) -> Result<(), BackendError> {
        let mut progress = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(info) = progress.next().await {
            info?;
        }
        Ok(())
    }

    /// Upload `files` into a created container and start it.
    async fn upload_and_start(
        &self,
        name: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<(), BackendError> {
        let (tar, packing) = tar_with_files(files);
        self.docker
            .upload_to_container(
                name,
                Some(UploadToContainerOptions {
                    path: "/",
                    no_overwrite_dir_non_dir: "false",
                }),
                hyper::Body::wrap_stream(tar),
            )
            .await?;
        // Only checked after a successful upload. A failed upload also
        // breaks the packing task, and the upload error is the one to report.
        packing
            .await
            .map_err(|e| BackendError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn collect_logs(&self, name: &str) -> Result<String, BackendError> {
        let mut output = SizeConstraintBytesMut::new(self.cfg.output_size_limit);
        let mut logs = self.docker.logs(
            name,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    output.append(&message)
                }
                LogOutput::Console { message } => output.append(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(output.into_string())
    }

    async fn exit_code(&self, name: &str) -> Result<Option<i64>, BackendError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?;
        Ok(info.state.and_then(|s| s.exit_code))
    }

    async fn kill(&self, name: &str) {
        if let Err(e) = self
            .docker
            .kill_container(name, None::<KillContainerOptions<String>>)
            .await
        {
            tracing::warn!("Failed to kill container {}: {}", name, e);
        }
    }

    /// Whether a finished container should be removed.
    fn should_remove(&self, success: bool) -> bool {
        if success {
            self.cfg.cleanup_completed_jobs
        } else {
            self.cfg.cleanup_failed_jobs
        }
    }

    async fn cleanup(&self, name: &str, success: bool) {
        if self.should_remove(success) {
            self.remove(name).await;
        }
    }

    async fn remove(&self, name: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!("Failed to remove container {}: {}", name, e);
        }
    }
}

#[async_trait]
impl JobBackend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn is_connected(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn create_config_map(
        &self,
        name: &str,
        data: ConfigMapData,
    ) -> Result<String, BackendError> {
        let name = unique_name(name);
        tracing::debug!("Storing config map {}", name);
        self.config_maps.insert(name.clone(), data);
        Ok(name)
    }

    async fn delete_config_map(&self, name: &str) -> Result<(), BackendError> {
        self.config_maps
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::NoSuchConfigMap(name.to_owned()))
    }

    async fn create_job(&self, spec: JobSpec) -> Result<String, BackendError> {
        let job_name = unique_name(&spec.name);
        let files = self.mounted_files(&spec)?;

        if self.cfg.pull_images {
            tracing::info!("Pulling image {}", spec.image);
            self.pull_image(&spec.image).await?;
        }

        let mut labels = HashMap::new();
        labels.insert("app".to_string(), job_name.clone());

        tracing::info!(image = %spec.image, "Creating container: {}", job_name);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: job_name.clone(),
                }),
                Config::<String> {
                    image: Some(spec.image.clone()),
                    entrypoint: Some(spec.command.clone()),
                    env: Some(
                        spec.env
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, v))
                            .collect(),
                    ),
                    labels: Some(labels),
                    network_disabled: Some(!self.cfg.network_enabled),
                    host_config: Some(bollard::service::HostConfig {
                        memory: self.cfg.mem_limit,
                        nano_cpus: self.cfg.cpu_share.map(|x| (x * 1e9) as i64),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        // The container never ran, so it goes regardless of the cleanup flags
        if let Err(e) = self.upload_and_start(&job_name, files).await {
            tracing::error!("Failed to start container {}: {}", job_name, e);
            self.remove(&job_name).await;
            return Err(e);
        }

        self.deadlines
            .insert(job_name.clone(), Instant::now() + spec.timeout);

        Ok(job_name)
    }

    async fn wait_for_job_completion(&self, job_name: &str) -> Result<JobOutcome, BackendError> {
        tracing::info!("Waiting for job completion: {}", job_name);
        let limit = WaitLimit::choose(
            self.deadlines.remove(job_name).map(|(_, deadline)| deadline),
            Instant::now() + self.wait_timeout,
        );

        let mut waiting = self.docker.wait_container(
            job_name,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        let finished = tokio::time::timeout_at(limit.instant(), waiting.next())
            .await
            .is_ok();
        drop(waiting);

        if !finished {
            self.kill(job_name).await;
            match limit {
                WaitLimit::WaitTimeout(_) => {
                    tracing::error!("Timeout waiting for job completion: {}", job_name);
                    self.cleanup(job_name, false).await;
                    return Ok(JobOutcome::timed_out());
                }
                WaitLimit::Deadline(_) => {
                    tracing::warn!("Job exceeded its deadline: {}", job_name)
                }
            }
        }

        let success = finished && self.exit_code(job_name).await? == Some(0);
        let logs = self.collect_logs(job_name).await?;
        if success {
            tracing::info!("Job completed successfully: {}", job_name);
        } else {
            tracing::warn!("Job failed: {}", job_name);
        }
        self.cleanup(job_name, success).await;

        Ok(JobOutcome { success, logs })
    }
}
