//! Launch orchestration.
//!
//! A [`LaunchPreparer`] gathers arguments, environment and tuning for one
//! program, then [`LaunchPreparer::start`] packages the runtime config,
//! builds the deployment and submits it. If any step fails, the
//! application location is deleted before the error is returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, KubeClient, PollingWatcher, ReadinessWatcher};
use crate::config::{CommandConfig, LauncherConfig, ResourceTuning};
use crate::deployment::{DeploymentBuilder, PodInfo};
use crate::error::{LaunchError, LaunchResult};
use crate::k8s::ObjectMeta;
use crate::packager::Packager;
use crate::storage::{Location, LocationFactory};
use crate::types::{EnvironmentMap, LocalFile, ProgramSpecification, RunId, RuntimeArguments};

/// Start timeout used by [`LaunchPreparer::start_default`].
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything launches share.
#[derive(Clone)]
pub struct LaunchContext {
    pub factory: LocationFactory,
    pub cluster: Arc<dyn ClusterClient>,
    pub watcher: Arc<dyn ReadinessWatcher>,
    pub pod_info: PodInfo,
    pub commands: CommandConfig,
    pub tuning: ResourceTuning,
    pub namespace: String,
    /// Root under which each run gets `<program>/<run id>`.
    pub app_root: Location,
}

impl std::fmt::Debug for LaunchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchContext")
            .field("namespace", &self.namespace)
            .field("app_root", &self.app_root)
            .finish_non_exhaustive()
    }
}

impl LaunchContext {
    /// Build a context that talks to the configured Kubernetes API.
    pub fn from_config(
        config: &LauncherConfig,
        factory: LocationFactory,
        pod_info: PodInfo,
    ) -> LaunchResult<Self> {
        let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClient::new(&config.cluster)?);
        let watcher = Arc::new(PollingWatcher::new(
            Arc::clone(&cluster),
            Duration::from_millis(config.cluster.poll_interval_ms),
        ));
        let app_root = factory.create(&config.storage.app_root)?;

        Ok(Self {
            factory,
            cluster,
            watcher,
            pod_info,
            commands: config.commands.clone(),
            tuning: config.resources,
            namespace: config.cluster.namespace.clone(),
            app_root,
        })
    }

    /// Application location of a run.
    #[must_use]
    pub fn app_location(&self, program: &str, run_id: &RunId) -> Location {
        self.app_root.append(program).append(run_id.as_str())
    }
}

/// An option accepted for call-site compatibility that has no effect on
/// Kubernetes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredOption {
    Configuration {
        runnable: Option<String>,
    },
    LogHandler,
    User(String),
    SchedulerQueue(String),
    JvmOptions {
        runnable: Option<String>,
        options: String,
    },
    Debugging {
        suspend: bool,
        runnables: Vec<String>,
    },
    Dependencies(Vec<String>),
    ClassPaths(Vec<String>),
    ApplicationClassPaths(Vec<String>),
    BundlerClassAcceptor,
    MaxRetries {
        runnable: String,
        retries: u32,
    },
    SecureStore,
    LogLevels {
        runnable: Option<String>,
    },
    ClassLoader(String),
}

impl IgnoredOption {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::LogHandler => "log handler",
            Self::User(_) => "user",
            Self::SchedulerQueue(_) => "scheduler queue",
            Self::JvmOptions { .. } => "JVM options",
            Self::Debugging { .. } => "debugging",
            Self::Dependencies(_) => "dependencies",
            Self::ClassPaths(_) => "class paths",
            Self::ApplicationClassPaths(_) => "application class paths",
            Self::BundlerClassAcceptor => "bundler class acceptor",
            Self::MaxRetries { .. } => "max retries",
            Self::SecureStore => "secure store",
            Self::LogLevels { .. } => "log levels",
            Self::ClassLoader(_) => "class loader",
        }
    }
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Prepares and starts one program.
#[derive(Debug)]
pub struct LaunchPreparer {
    context: Arc<LaunchContext>,
    spec: ProgramSpecification,
    run_id: RunId,
    meta: ObjectMeta,
    app_location: Location,
    arguments: RuntimeArguments,
    environments: EnvironmentMap,
    tuning: ResourceTuning,
    resources: Vec<String>,
    ignored: Vec<IgnoredOption>,
}

impl LaunchPreparer {
    /// Create a preparer for a single-runnable program.
    pub fn new(
        context: Arc<LaunchContext>,
        spec: ProgramSpecification,
        run_id: RunId,
        meta: ObjectMeta,
    ) -> LaunchResult<Self> {
        match spec.runnables.len() {
            1 => {}
            0 => return Err(LaunchError::config("program has no runnable")),
            count => return Err(LaunchError::TooManyRunnables { count }),
        }

        let app_location = context.app_location(&spec.name, &run_id);
        let tuning = context.tuning;
        let arguments = RuntimeArguments {
            arguments: Vec::new(),
            runnable_arguments: spec
                .runnables
                .keys()
                .map(|name| (name.clone(), Vec::new()))
                .collect(),
        };

        Ok(Self {
            context,
            spec,
            run_id,
            meta,
            app_location,
            arguments,
            environments: EnvironmentMap::new(),
            tuning,
            resources: Vec::new(),
            ignored: Vec::new(),
        })
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Where this run stores its files.
    #[must_use]
    pub fn app_location(&self) -> &Location {
        &self.app_location
    }

    /// Options that were accepted but have no effect, in call order.
    #[must_use]
    pub fn ignored_options(&self) -> &[IgnoredOption] {
        &self.ignored
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Options that shape the launch
    // ─────────────────────────────────────────────────────────────────────────

    /// Append global program arguments.
    #[must_use]
    pub fn with_application_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.arguments.extend(strings(args));
        self
    }

    /// Append arguments for one runnable.
    #[must_use]
    pub fn with_arguments<I, S>(mut self, runnable: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments
            .runnable_arguments
            .entry(runnable.to_owned())
            .or_default()
            .extend(strings(args));
        self
    }

    /// Set the environment of every runnable, replacing earlier settings.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        for name in self.spec.runnables.keys() {
            self.environments.insert(name.clone(), env.clone());
        }
        self
    }

    /// Set the environment of one runnable, replacing earlier settings.
    #[must_use]
    pub fn with_runnable_env(mut self, runnable: &str, env: BTreeMap<String, String>) -> Self {
        self.environments.insert(runnable.to_owned(), env);
        self
    }

    /// Override the resource tuning.
    #[must_use]
    pub fn with_resource_tuning(mut self, tuning: ResourceTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Localize extra files for every runnable, named after the last path
    /// segment of each URI.
    #[must_use]
    pub fn with_resources<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.extend(strings(uris));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accepted options with no effect
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an option that has no effect here.
    #[must_use]
    pub fn with_option(mut self, option: IgnoredOption) -> Self {
        debug!(run_id = %self.run_id, option = option.name(), "ignoring option");
        self.ignored.push(option);
        self
    }

    #[must_use]
    pub fn with_configuration(self, runnable: Option<&str>) -> Self {
        self.with_option(IgnoredOption::Configuration {
            runnable: runnable.map(str::to_owned),
        })
    }

    #[must_use]
    pub fn add_log_handler(self) -> Self {
        self.with_option(IgnoredOption::LogHandler)
    }

    #[must_use]
    pub fn set_user(self, user: impl Into<String>) -> Self {
        self.with_option(IgnoredOption::User(user.into()))
    }

    #[must_use]
    pub fn set_scheduler_queue(self, queue: impl Into<String>) -> Self {
        self.with_option(IgnoredOption::SchedulerQueue(queue.into()))
    }

    #[must_use]
    pub fn set_jvm_options(self, runnable: Option<&str>, options: impl Into<String>) -> Self {
        self.with_option(IgnoredOption::JvmOptions {
            runnable: runnable.map(str::to_owned),
            options: options.into(),
        })
    }

    #[must_use]
    pub fn enable_debugging<I, S>(self, suspend: bool, runnables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_option(IgnoredOption::Debugging {
            suspend,
            runnables: strings(runnables),
        })
    }

    #[must_use]
    pub fn with_dependencies<I, S>(self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_option(IgnoredOption::Dependencies(strings(classes)))
    }

    #[must_use]
    pub fn with_class_paths<I, S>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_option(IgnoredOption::ClassPaths(strings(paths)))
    }

    #[must_use]
    pub fn with_application_class_paths<I, S>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_option(IgnoredOption::ApplicationClassPaths(strings(paths)))
    }

    #[must_use]
    pub fn with_bundler_class_acceptor(self) -> Self {
        self.with_option(IgnoredOption::BundlerClassAcceptor)
    }

    #[must_use]
    pub fn with_max_retries(self, runnable: &str, retries: u32) -> Self {
        self.with_option(IgnoredOption::MaxRetries {
            runnable: runnable.to_owned(),
            retries,
        })
    }

    #[must_use]
    pub fn add_secure_store(self) -> Self {
        self.with_option(IgnoredOption::SecureStore)
    }

    #[must_use]
    pub fn set_log_levels(self, runnable: Option<&str>) -> Self {
        self.with_option(IgnoredOption::LogLevels {
            runnable: runnable.map(str::to_owned),
        })
    }

    #[must_use]
    pub fn set_class_loader(self, class_name: impl Into<String>) -> Self {
        self.with_option(IgnoredOption::ClassLoader(class_name.into()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Start
    // ─────────────────────────────────────────────────────────────────────────

    /// Start with [`DEFAULT_START_TIMEOUT`].
    pub async fn start_default(self) -> LaunchResult<LaunchHandle> {
        self.start(DEFAULT_START_TIMEOUT).await
    }

    /// Package, build and submit the deployment.
    ///
    /// Returns as soon as the deployment is accepted; readiness is awaited
    /// through the handle. On failure the application location is deleted
    /// and the first error is returned wrapped in [`LaunchError::Start`].
    ///
    /// The sequence runs on its own task. Dropping the returned future does
    /// not interrupt it, and a failure is still cleaned up.
    pub async fn start(self, timeout: Duration) -> LaunchResult<LaunchHandle> {
        tokio::spawn(self.launch_or_clean_up(timeout)).await?
    }

    async fn launch_or_clean_up(self, timeout: Duration) -> LaunchResult<LaunchHandle> {
        match self.launch(timeout).await {
            Ok(handle) => Ok(handle),
            Err(source) => {
                warn!(run_id = %self.run_id, error = %source, "launch failed, cleaning up");
                let cleanup = match self.app_location.delete_recursive().await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(
                            run_id = %self.run_id,
                            location = %self.app_location,
                            error = %e,
                            "failed to delete application location"
                        );
                        Some(Box::new(e))
                    }
                };
                Err(LaunchError::Start {
                    source: Box::new(source),
                    cleanup,
                })
            }
        }
    }

    async fn launch(&self, timeout: Duration) -> LaunchResult<LaunchHandle> {
        let context = &self.context;
        let spec = self.spec_with_resources();

        info!(run_id = %self.run_id, program = %spec.name, location = %self.app_location, "packaging");
        let bundle = Packager::new(&context.factory, &self.app_location)
            .package_and_upload(&spec, &self.arguments, &self.run_id)
            .await?;

        let mut meta = self.meta.clone();
        if meta.name.is_none() {
            meta.name = Some(format!("{}-{}", spec.name, self.run_id).to_lowercase());
        }
        let deployment = DeploymentBuilder::new(&context.pod_info, &context.commands, &self.tuning)
            .build(meta, &spec, &bundle, &self.run_id, &self.environments, timeout)?;

        context
            .cluster
            .create_deployment(&context.namespace, &deployment)
            .await?;
        info!(
            run_id = %self.run_id,
            deployment = deployment.name(),
            namespace = %context.namespace,
            "deployment submitted"
        );

        Ok(LaunchHandle {
            name: deployment.name().to_owned(),
            namespace: context.namespace.clone(),
            run_id: self.run_id.clone(),
            replicas: deployment.spec.replicas,
            timeout,
            watcher: Arc::clone(&context.watcher),
        })
    }

    fn spec_with_resources(&self) -> ProgramSpecification {
        let mut spec = self.spec.clone();
        if self.resources.is_empty() {
            return spec;
        }
        for runnable in spec.runnables.values_mut() {
            for uri in &self.resources {
                let name = uri
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(uri.as_str());
                runnable
                    .local_files
                    .push(LocalFile::new(name, uri.as_str()));
            }
        }
        spec
    }
}

/// Tracks a submitted deployment until it is ready.
///
/// The deployment keeps running if the wait times out.
#[derive(Clone)]
pub struct LaunchHandle {
    name: String,
    namespace: String,
    run_id: RunId,
    replicas: u32,
    timeout: Duration,
    watcher: Arc<dyn ReadinessWatcher>,
}

impl std::fmt::Debug for LaunchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("run_id", &self.run_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LaunchHandle {
    /// Deployment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of the deployment.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The start timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until every replica is ready, bounded by the start timeout.
    pub async fn wait_ready(&self) -> LaunchResult<()> {
        tokio::time::timeout(
            self.timeout,
            self.watcher
                .wait_ready(&self.namespace, &self.name, self.replicas),
        )
        .await
        .map_err(|_| LaunchError::StartTimeout {
            name: self.name.clone(),
            timeout: self.timeout,
        })?
    }
}
