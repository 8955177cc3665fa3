//! Configuration for kestrel-launcher.

use std::collections::HashMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{LaunchError, LaunchResult};

/// Property key for the CPU multiplier.
pub const CPU_MULTIPLIER_KEY: &str = "master.environment.k8s.container.cpu.multiplier";

/// Property key for the memory multiplier.
pub const MEMORY_MULTIPLIER_KEY: &str = "master.environment.k8s.container.memory.multiplier";

/// Property key for memory held back from the Java heap.
pub const RESERVED_MEMORY_MB_KEY: &str = "twill.java.reserved.memory.mb";

/// Property key for the minimum heap ratio.
pub const HEAP_MIN_RATIO_KEY: &str = "twill.java.heap.reserved.min.ratio";

/// Top-level configuration for the launcher.
#[derive(Debug, Clone, Deserialize)]
pub struct LauncherConfig {
    /// Kubernetes API configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Application storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Resource translation tuning. The heap settings have no default.
    pub resources: ResourceTuning,

    /// Commands run inside the launched containers.
    #[serde(default)]
    pub commands: CommandConfig,
}

impl LauncherConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values (none for the heap settings under `[resources]`)
    /// 2. `launcher.toml` in the current directory (if present)
    /// 3. Environment variables with `KESTREL_LAUNCHER_` prefix
    pub fn load() -> LaunchResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file("launcher.toml")))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> LaunchResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(path.as_ref())))
    }

    fn from_figment(figment: Figment) -> LaunchResult<Self> {
        let config: Self = figment
            .merge(Env::prefixed("KESTREL_LAUNCHER_").split("__"))
            .extract()?;
        config.resources.validate()?;
        Ok(config)
    }
}

/// Kubernetes API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the API server.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Namespace deployments are created in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// File holding the service account bearer token.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// PEM file with the API server's CA certificate.
    #[serde(default = "default_ca_path")]
    pub ca_path: PathBuf,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Interval between readiness polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_api_url() -> String {
    "https://kubernetes.default.svc".to_owned()
}

fn default_namespace() -> String {
    "default".to_owned()
}

fn default_token_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}

fn default_ca_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt")
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            namespace: default_namespace(),
            token_path: default_token_path(),
            ca_path: default_ca_path(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Application storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root URI under which each run gets its application location
    /// (e.g., "s3://bucket/kestrel" or "file:///var/lib/kestrel").
    #[serde(default = "default_app_root")]
    pub app_root: String,
}

fn default_app_root() -> String {
    "file:///var/lib/kestrel/apps".to_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            app_root: default_app_root(),
        }
    }
}

/// Commands run inside the launched containers.
///
/// Each command is an argument prefix; the builder appends the runnable's own
/// arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Command of the file localizer run by the init container.
    #[serde(default = "default_localizer")]
    pub localizer: Vec<String>,

    /// Command of the generic program launcher run by the main container.
    #[serde(default = "default_program_launcher")]
    pub program_launcher: Vec<String>,
}

fn default_localizer() -> Vec<String> {
    vec!["/opt/kestrel/bin/kestrel-localize".to_owned()]
}

fn default_program_launcher() -> Vec<String> {
    vec!["/opt/kestrel/bin/kestrel-run".to_owned()]
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            localizer: default_localizer(),
            program_launcher: default_program_launcher(),
        }
    }
}

/// Tuning applied when translating abstract resources into container
/// requests.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ResourceTuning {
    /// Factor applied to virtual cores before requesting CPU.
    #[serde(default = "default_multiplier")]
    pub cpu_multiplier: f64,

    /// Factor applied to memory before requesting it.
    #[serde(default = "default_multiplier")]
    pub memory_multiplier: f64,

    /// Memory in MB held back from the Java heap.
    pub reserved_memory_mb: u64,

    /// Minimum fraction of container memory given to the heap.
    pub heap_min_ratio: f64,
}

const fn default_multiplier() -> f64 {
    1.0
}

impl ResourceTuning {
    /// Tuning with the given heap settings and unit multipliers.
    #[must_use]
    pub const fn new(reserved_memory_mb: u64, heap_min_ratio: f64) -> Self {
        Self {
            cpu_multiplier: default_multiplier(),
            memory_multiplier: default_multiplier(),
            reserved_memory_mb,
            heap_min_ratio,
        }
    }

    /// Parse tuning from string properties as handed over by the master
    /// process configuration.
    ///
    /// Multipliers fall back to `1.0` when absent; the heap settings are
    /// required. Any present value must parse.
    pub fn from_properties(props: &HashMap<String, String>) -> LaunchResult<Self> {
        let cpu_multiplier = parse_optional(props, CPU_MULTIPLIER_KEY)?.unwrap_or(1.0);
        let memory_multiplier = parse_optional(props, MEMORY_MULTIPLIER_KEY)?.unwrap_or(1.0);

        let raw_reserved = props
            .get(RESERVED_MEMORY_MB_KEY)
            .ok_or_else(|| LaunchError::config(format!("missing {RESERVED_MEMORY_MB_KEY}")))?;
        let reserved_memory_mb =
            raw_reserved
                .trim()
                .parse::<u64>()
                .map_err(|_| LaunchError::InvalidMultiplier {
                    key: RESERVED_MEMORY_MB_KEY.to_owned(),
                    value: raw_reserved.clone(),
                })?;

        let heap_min_ratio = parse_optional(props, HEAP_MIN_RATIO_KEY)?
            .ok_or_else(|| LaunchError::config(format!("missing {HEAP_MIN_RATIO_KEY}")))?;

        let tuning = Self {
            cpu_multiplier,
            memory_multiplier,
            reserved_memory_mb,
            heap_min_ratio,
        };
        tuning.validate()?;
        Ok(tuning)
    }

    /// Reject negative or non-finite factors.
    pub fn validate(&self) -> LaunchResult<()> {
        check_factor(CPU_MULTIPLIER_KEY, self.cpu_multiplier)?;
        check_factor(MEMORY_MULTIPLIER_KEY, self.memory_multiplier)?;
        check_factor(HEAP_MIN_RATIO_KEY, self.heap_min_ratio)?;
        Ok(())
    }
}

fn parse_optional(props: &HashMap<String, String>, key: &str) -> LaunchResult<Option<f64>> {
    props
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .map_err(|_| LaunchError::InvalidMultiplier {
                    key: key.to_owned(),
                    value: raw.clone(),
                })
        })
        .transpose()
}

fn check_factor(key: &str, value: f64) -> LaunchResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(LaunchError::InvalidMultiplier {
            key: key.to_owned(),
            value: value.to_string(),
        })
    }
}
