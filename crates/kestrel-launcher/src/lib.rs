//! Kestrel Launcher
//!
//! This crate turns an abstract program specification into a Kubernetes
//! deployment and submits it.
//!
//! # Architecture
//!
//! A launch runs these steps in order:
//!
//! - **Packaging**: local files are resolved against the application
//!   location (copied there when they live elsewhere), then the launch
//!   specification and runtime arguments are zipped and uploaded
//! - **Building**: resources are translated into container requests and a
//!   deployment is assembled with a `file-localizer` init container and the
//!   main container
//! - **Submission**: the deployment is created through a [`ClusterClient`]
//!   and a [`LaunchHandle`] is returned
//!
//! ```text
//! LaunchPreparer::start
//!   ├─▶ Packager ──▶ FileResolver ──▶ object store
//!   ├─▶ DeploymentBuilder
//!   └─▶ ClusterClient::create_deployment ──▶ LaunchHandle
//! ```
//!
//! If any step fails the application location of the run is deleted.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use kestrel_launcher::{
//!     LaunchContext, LaunchPreparer, LauncherConfig, LocationFactory, PodInfo,
//!     ProgramSpecification, ResourceSpec, RunId, RunnableSpec,
//! };
//!
//! let config = LauncherConfig::load()?;
//! let pod_info = PodInfo::from_file("/etc/podinfo/pod.json")?;
//! let context = Arc::new(LaunchContext::from_config(&config, LocationFactory::new(), pod_info)?);
//!
//! let spec = ProgramSpecification::single(
//!     "demo",
//!     RunnableSpec::new("worker", ResourceSpec::new(2, 1024)),
//! );
//! let handle = LaunchPreparer::new(context, spec, RunId::generate(), Default::default())?
//!     .with_application_arguments(["--verbose"])
//!     .start(Duration::from_secs(120))
//!     .await?;
//! handle.wait_ready().await?;
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod controller;
pub mod deployment;
pub mod error;
pub mod k8s;
pub mod packager;
pub mod resolver;
pub mod resources;
pub mod storage;
pub mod types;

// Re-export commonly used types at the crate root
pub use cluster::{ClusterClient, KubeClient, MemoryCluster, PollingWatcher, ReadinessWatcher};
pub use config::{LauncherConfig, ResourceTuning};
pub use controller::{IgnoredOption, LaunchContext, LaunchHandle, LaunchPreparer};
pub use deployment::{DeploymentBuilder, PodInfo};
pub use error::{LaunchError, LaunchResult};
pub use packager::{LaunchSpecDocument, Packager};
pub use resolver::FileResolver;
pub use resources::{compute_max_heap_mb, translate_resources, TranslatedResources};
pub use storage::{Location, LocationFactory};
pub use types::{
    BundleLocation, EnvironmentMap, LocalFile, ProgramSpecification, ResourceSpec, RunId,
    RunnableSpec, RuntimeArguments,
};
