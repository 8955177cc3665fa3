//! Deployment object construction.
//!
//! The pod runs two containers from the host pod's image. The
//! `file-localizer` init container fetches the runtime config bundle and
//! localizes the runnable's files into a scratch volume; the main container
//! then runs the runnable from that directory.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::{CommandConfig, ResourceTuning};
use crate::error::{LaunchError, LaunchResult};
use crate::k8s::{
    Container, Deployment, DeploymentSpec, DownwardApiVolumeFile, EnvVar, LabelSelector,
    ObjectMeta, PodSpec, PodTemplateSpec, ResourceRequirements, Volume, VolumeMount,
};
use crate::resources::{max_heap_for, requirements, translate_resources};
use crate::types::{BundleLocation, EnvironmentMap, ProgramSpecification, RunId};

/// Label carrying the runnable name.
pub const CONTAINER_LABEL: &str = "kestrel.io/container";

/// Annotation carrying the start timeout in milliseconds.
pub const START_TIMEOUT_ANNOTATION: &str = "kestrel.io/start-timeout-millis";

/// Environment variable naming the working directory.
pub const LOCAL_DIR_ENV: &str = "KESTREL_LOCAL_DIR";

/// Environment variable naming the temp directory, relative to the working directory.
pub const TEMP_DIR_ENV: &str = "KESTREL_TEMP_DIR";

/// Environment variable carrying the heap flag.
pub const HEAP_MAX_ENV: &str = "JAVA_HEAPMAX";

/// Name of the init container.
pub const LOCALIZER_CONTAINER: &str = "file-localizer";

const POD_INFO_VOLUME: &str = "pod-info";
const WORKDIR_VOLUME: &str = "workdir";
const TEMP_DIR: &str = "tmp";

/// Read-only snapshot of the pod the launcher runs in.
///
/// New pods inherit its image, identity, volumes and environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub container_image: String,
    #[serde(default)]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub runtime_class_name: Option<String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub container_volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub container_environment: Vec<EnvVar>,
    #[serde(default = "default_pod_info_dir")]
    pub pod_info_dir: String,
    #[serde(default = "default_name_file")]
    pub name_file: String,
    #[serde(default = "default_labels_file")]
    pub labels_file: String,
}

fn default_pod_info_dir() -> String {
    "/etc/podinfo".to_owned()
}

fn default_name_file() -> String {
    "pod.name".to_owned()
}

fn default_labels_file() -> String {
    "pod.labels.properties".to_owned()
}

impl PodInfo {
    /// Snapshot with nothing to inherit besides the image.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        container_image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            container_image: container_image.into(),
            service_account_name: None,
            runtime_class_name: None,
            volumes: Vec::new(),
            container_volume_mounts: Vec::new(),
            container_environment: Vec::new(),
            pod_info_dir: default_pod_info_dir(),
            name_file: default_name_file(),
            labels_file: default_labels_file(),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> LaunchResult<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Scratch working directory for a run.
#[must_use]
pub fn work_dir(run_id: &RunId) -> String {
    format!("/workDir-{run_id}")
}

/// Builds the deployment for a single-runnable program.
#[derive(Debug)]
pub struct DeploymentBuilder<'a> {
    pod_info: &'a PodInfo,
    commands: &'a CommandConfig,
    tuning: &'a ResourceTuning,
}

impl<'a> DeploymentBuilder<'a> {
    #[must_use]
    pub fn new(
        pod_info: &'a PodInfo,
        commands: &'a CommandConfig,
        tuning: &'a ResourceTuning,
    ) -> Self {
        Self {
            pod_info,
            commands,
            tuning,
        }
    }

    /// Build the deployment.
    ///
    /// Fails before doing anything else unless `spec` has exactly one
    /// runnable.
    pub fn build(
        &self,
        meta: ObjectMeta,
        spec: &ProgramSpecification,
        bundle: &BundleLocation,
        run_id: &RunId,
        env: &EnvironmentMap,
        start_timeout: Duration,
    ) -> LaunchResult<Deployment> {
        let runnable = match spec.runnables.len() {
            1 => spec
                .sole_runnable()
                .ok_or_else(|| LaunchError::internal("runnable vanished"))?,
            0 => return Err(LaunchError::config("program has no runnable")),
            count => return Err(LaunchError::TooManyRunnables { count }),
        };

        let resources = requirements(translate_resources(&runnable.resources, self.tuning)?);
        let heap_mb = max_heap_for(&resources, self.tuning)?;
        let work_dir = work_dir(run_id);

        let mut metadata = meta;
        metadata
            .labels
            .insert(CONTAINER_LABEL.to_owned(), runnable.name.clone());
        metadata.annotations.insert(
            START_TIMEOUT_ANNOTATION.to_owned(),
            start_timeout.as_millis().to_string(),
        );

        let mut volumes = self.pod_info.volumes.clone();
        volumes.push(self.pod_info_volume());
        volumes.push(Volume::empty_dir(WORKDIR_VOLUME));

        let mut mounts = self.pod_info.container_volume_mounts.clone();
        mounts.push(VolumeMount::new(POD_INFO_VOLUME, &self.pod_info.pod_info_dir).read_only());
        mounts.push(VolumeMount::new(WORKDIR_VOLUME, &work_dir));

        let mut environment: BTreeMap<String, String> = self
            .pod_info
            .container_environment
            .iter()
            .map(|var| (var.name.clone(), var.value.clone()))
            .collect();
        if let Some(overrides) = env.get(&runnable.name) {
            environment.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        environment.insert(LOCAL_DIR_ENV.to_owned(), work_dir.clone());
        environment.insert(TEMP_DIR_ENV.to_owned(), TEMP_DIR.to_owned());
        environment.insert(HEAP_MAX_ENV.to_owned(), format!("-Xmx{heap_mb}m"));
        let environment: Vec<EnvVar> = environment
            .into_iter()
            .map(|(name, value)| EnvVar { name, value })
            .collect();

        let template = ContainerTemplate {
            image: &self.pod_info.container_image,
            work_dir: &work_dir,
            resources: &resources,
            mounts: &mounts,
            env: &environment,
        };

        let localizer = template.container(
            LOCALIZER_CONTAINER,
            command_with(
                &self.commands.localizer,
                ["bundle", bundle.as_str(), runnable.name.as_str()],
            ),
        );
        let main = template.container(
            &runnable.name,
            command_with(&self.commands.program_launcher, [runnable.name.as_str()]),
        );

        debug!(
            %run_id,
            runnable = %runnable.name,
            heap_mb,
            cpu = ?resources.requests.get(crate::resources::CPU),
            "deployment built"
        );

        Ok(Deployment::new(
            metadata.clone(),
            DeploymentSpec {
                replicas: runnable.resources.instances,
                selector: LabelSelector {
                    match_labels: metadata.labels.clone(),
                },
                template: PodTemplateSpec {
                    metadata,
                    spec: PodSpec {
                        service_account_name: self.pod_info.service_account_name.clone(),
                        runtime_class_name: self.pod_info.runtime_class_name.clone(),
                        init_containers: vec![localizer],
                        containers: vec![main],
                        volumes,
                    },
                },
            },
        ))
    }

    fn pod_info_volume(&self) -> Volume {
        Volume::downward_api(
            POD_INFO_VOLUME,
            vec![
                DownwardApiVolumeFile::field(&self.pod_info.name_file, "metadata.name"),
                DownwardApiVolumeFile::field(&self.pod_info.labels_file, "metadata.labels"),
            ],
        )
    }
}

struct ContainerTemplate<'a> {
    image: &'a str,
    work_dir: &'a str,
    resources: &'a ResourceRequirements,
    mounts: &'a [VolumeMount],
    env: &'a [EnvVar],
}

impl ContainerTemplate<'_> {
    fn container(&self, name: &str, args: Vec<String>) -> Container {
        Container {
            name: name.to_owned(),
            image: self.image.to_owned(),
            working_dir: Some(self.work_dir.to_owned()),
            args,
            env: self.env.to_vec(),
            resources: self.resources.clone(),
            volume_mounts: self.mounts.to_vec(),
        }
    }
}

fn command_with<'a>(command: &[String], args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    command
        .iter()
        .cloned()
        .chain(args.into_iter().map(str::to_owned))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ResourceSpec, RunnableSpec};

    fn tuning() -> ResourceTuning {
        ResourceTuning {
            cpu_multiplier: 1.5,
            memory_multiplier: 1.0,
            reserved_memory_mb: 768,
            heap_min_ratio: 0.5,
        }
    }

    fn pod_info() -> PodInfo {
        let mut info = PodInfo::new("kestrel-master-0", "kestrel", "kestrel/runtime:1.0");
        info.service_account_name = Some("kestrel".to_owned());
        info.volumes.push(Volume::empty_dir("conf"));
        info.container_volume_mounts
            .push(VolumeMount::new("conf", "/etc/kestrel/conf"));
        info.container_environment
            .push(EnvVar::new("LOG_LEVEL", "info"));
        info.container_environment
            .push(EnvVar::new("REGION", "eu-west-1"));
        info
    }

    fn worker_spec() -> ProgramSpecification {
        ProgramSpecification::single(
            "demo",
            RunnableSpec::new("worker", ResourceSpec::new(2, 1024).with_instances(3)),
        )
    }

    fn build(spec: &ProgramSpecification, env: &EnvironmentMap) -> LaunchResult<Deployment> {
        let info = pod_info();
        let commands = CommandConfig::default();
        let tuning = tuning();
        let meta = ObjectMeta {
            name: Some("demo-worker".to_owned()),
            ..ObjectMeta::default()
        };
        DeploymentBuilder::new(&info, &commands, &tuning).build(
            meta,
            spec,
            &BundleLocation::new("memory:///apps/demo/run-1/runtime-config.x.jar"),
            &RunId::new("run-1"),
            env,
            Duration::from_secs(90),
        )
    }

    #[test]
    fn one_init_and_one_main_container_with_equal_resources() {
        let deployment = build(&worker_spec(), &EnvironmentMap::new()).unwrap();
        let pod = deployment.pod_spec();

        assert_eq!(pod.init_containers.len(), 1);
        assert_eq!(pod.containers.len(), 1);
        let init = &pod.init_containers[0];
        let main = &pod.containers[0];
        assert_eq!(init.resources, main.resources);
        assert_eq!(main.resources.requests["cpu"].as_str(), "3000m");
        assert_eq!(main.resources.requests["memory"].as_str(), "1024Mi");
        assert_eq!(init.name, LOCALIZER_CONTAINER);
        assert_eq!(main.name, "worker");
        assert_eq!(deployment.spec.replicas, 3);
    }

    #[test]
    fn container_arguments() {
        let deployment = build(&worker_spec(), &EnvironmentMap::new()).unwrap();
        let pod = deployment.pod_spec();

        assert_eq!(
            pod.init_containers[0].args,
            [
                "/opt/kestrel/bin/kestrel-localize",
                "bundle",
                "memory:///apps/demo/run-1/runtime-config.x.jar",
                "worker"
            ]
        );
        assert_eq!(pod.containers[0].args, ["/opt/kestrel/bin/kestrel-run", "worker"]);
    }

    #[test]
    fn volumes_and_mounts() {
        let deployment = build(&worker_spec(), &EnvironmentMap::new()).unwrap();
        let pod = deployment.pod_spec();

        let names: Vec<_> = pod.volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["conf", "pod-info", "workdir"]);
        let info = &pod.volumes[1].downward_api.as_ref().unwrap().items;
        assert_eq!(info[0].field_ref.field_path, "metadata.name");
        assert_eq!(info[1].field_ref.field_path, "metadata.labels");
        assert!(pod.volumes[2].empty_dir.is_some());

        for container in pod.init_containers.iter().chain(&pod.containers) {
            assert_eq!(container.working_dir.as_deref(), Some("/workDir-run-1"));
            let mounts = &container.volume_mounts;
            assert_eq!(mounts.len(), 3);
            assert_eq!(mounts[1].mount_path, "/etc/podinfo");
            assert!(mounts[1].read_only);
            assert_eq!(mounts[2].mount_path, "/workDir-run-1");
            assert!(!mounts[2].read_only);
        }
        assert_eq!(pod.service_account_name.as_deref(), Some("kestrel"));
    }

    #[test]
    fn environment_is_inherited_then_overridden() {
        let mut env = EnvironmentMap::new();
        env.insert(
            "worker".to_owned(),
            BTreeMap::from([
                ("LOG_LEVEL".to_owned(), "debug".to_owned()),
                ("FEATURE".to_owned(), "on".to_owned()),
            ]),
        );
        let deployment = build(&worker_spec(), &env).unwrap();

        for container in deployment
            .pod_spec()
            .init_containers
            .iter()
            .chain(&deployment.pod_spec().containers)
        {
            assert_eq!(container.env_value("LOG_LEVEL"), Some("debug"));
            assert_eq!(container.env_value("REGION"), Some("eu-west-1"));
            assert_eq!(container.env_value("FEATURE"), Some("on"));
            assert_eq!(container.env_value(LOCAL_DIR_ENV), Some("/workDir-run-1"));
            assert_eq!(container.env_value(TEMP_DIR_ENV), Some("tmp"));
            // 1024 - 768 leaves less than half, so half of 1024.
            assert_eq!(container.env_value(HEAP_MAX_ENV), Some("-Xmx512m"));
        }
    }

    #[test]
    fn labels_annotations_and_selector() {
        let deployment = build(&worker_spec(), &EnvironmentMap::new()).unwrap();

        let labels = &deployment.spec.template.metadata.labels;
        assert_eq!(labels[CONTAINER_LABEL], "worker");
        assert_eq!(
            deployment.spec.template.metadata.annotations[START_TIMEOUT_ANNOTATION],
            "90000"
        );
        assert_eq!(&deployment.spec.selector.match_labels, labels);
        assert_eq!(deployment.name(), "demo-worker");
        assert_eq!(deployment.api_version, "apps/v1");
    }

    #[test]
    fn more_than_one_runnable_is_rejected() {
        let spec = worker_spec()
            .with_runnable(RunnableSpec::new("sidecar", ResourceSpec::new(1, 256)));
        let err = build(&spec, &EnvironmentMap::new()).unwrap_err();
        assert!(matches!(err, LaunchError::TooManyRunnables { count: 2 }));
    }

    #[test]
    fn pod_info_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pod.json");
        std::fs::write(
            &path,
            r#"{
                "name": "master-0",
                "namespace": "kestrel",
                "containerImage": "kestrel/runtime:1.0",
                "volumes": [{"name": "conf", "configMap": {"name": "kestrel-conf"}}],
                "containerEnvironment": [{"name": "A", "value": "1"}]
            }"#,
        )
        .unwrap();

        let info = PodInfo::from_file(&path).unwrap();
        assert_eq!(info.container_image, "kestrel/runtime:1.0");
        assert_eq!(info.pod_info_dir, "/etc/podinfo");
        assert!(info.volumes[0].other.contains_key("configMap"));
    }
}
