//! Core types describing a program to launch.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one launch attempt.
///
/// Namespaces the scratch working directory, labels and uploaded paths, so
/// two launches in flight must never share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a run ID from a caller-supplied token.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique run ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A file that must be present in the working directory before the program
/// starts.
///
/// This is also the record shape of the localization manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFile {
    /// Name in the working directory (unique within a runnable).
    pub name: String,
    /// Where the bytes live.
    pub uri: String,
    /// Last modification time in epoch milliseconds.
    pub last_modified: i64,
    /// Size in bytes.
    pub size: u64,
    /// Whether the file is a zip archive to expand.
    pub archive: bool,
    /// Entry name pattern for partial expansion, passed through unchanged.
    #[serde(default)]
    pub pattern: Option<String>,
}

impl LocalFile {
    /// Create a plain (non-archive) local file with unknown size and time.
    #[must_use]
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            last_modified: -1,
            size: 0,
            archive: false,
            pattern: None,
        }
    }

    /// Mark this file as an archive to expand.
    #[must_use]
    pub fn archive(mut self) -> Self {
        self.archive = true;
        self
    }

    /// Set the expansion pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Copy of this file pointing at another location.
    #[must_use]
    pub fn relocated(&self, uri: impl Into<String>, last_modified: i64, size: u64) -> Self {
        Self {
            name: self.name.clone(),
            uri: uri.into(),
            last_modified,
            size,
            archive: self.archive,
            pattern: self.pattern.clone(),
        }
    }
}

/// Abstract resource needs of a runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Number of virtual cores.
    pub virtual_cores: u32,
    /// Memory size in MB.
    pub memory_size_mb: u32,
    /// Number of instances (deployment replicas).
    #[serde(default = "default_instances")]
    pub instances: u32,
}

const fn default_instances() -> u32 {
    1
}

impl ResourceSpec {
    /// Create a resource spec for a single instance.
    #[must_use]
    pub const fn new(virtual_cores: u32, memory_size_mb: u32) -> Self {
        Self {
            virtual_cores,
            memory_size_mb,
            instances: 1,
        }
    }

    /// Set the instance count.
    #[must_use]
    pub const fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }
}

/// One named unit of program logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnableSpec {
    /// Runnable name.
    pub name: String,
    /// Resource requirements.
    pub resources: ResourceSpec,
    /// Files to localize, in order.
    #[serde(default)]
    pub local_files: Vec<LocalFile>,
    /// Opaque runnable configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl RunnableSpec {
    /// Create a runnable with no local files.
    #[must_use]
    pub fn new(name: impl Into<String>, resources: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            resources,
            local_files: Vec::new(),
            config: serde_json::Value::Null,
        }
    }

    /// Add a local file.
    #[must_use]
    pub fn with_local_file(mut self, file: LocalFile) -> Self {
        self.local_files.push(file);
        self
    }

    /// Set the opaque configuration.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// The program to launch, keyed by runnable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpecification {
    /// Program name.
    pub name: String,
    /// Runnables by name.
    pub runnables: BTreeMap<String, RunnableSpec>,
}

impl ProgramSpecification {
    /// Create a specification with a single runnable.
    #[must_use]
    pub fn single(name: impl Into<String>, runnable: RunnableSpec) -> Self {
        let mut runnables = BTreeMap::new();
        runnables.insert(runnable.name.clone(), runnable);
        Self {
            name: name.into(),
            runnables,
        }
    }

    /// Add a runnable.
    #[must_use]
    pub fn with_runnable(mut self, runnable: RunnableSpec) -> Self {
        self.runnables.insert(runnable.name.clone(), runnable);
        self
    }

    /// The only runnable, if there is exactly one.
    #[must_use]
    pub fn sole_runnable(&self) -> Option<&RunnableSpec> {
        if self.runnables.len() == 1 {
            self.runnables.values().next()
        } else {
            None
        }
    }
}

/// Arguments handed to the program at start.
///
/// Serialises to the arguments document shape
/// `{"arguments": [...], "runnableArguments": {name: [...]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeArguments {
    /// Global arguments.
    pub arguments: Vec<String>,
    /// Per-runnable arguments.
    pub runnable_arguments: BTreeMap<String, Vec<String>>,
}

/// Per-runnable environment overrides.
pub type EnvironmentMap = HashMap<String, BTreeMap<String, String>>;

/// Reference to an uploaded runtime-config bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleLocation(String);

impl BundleLocation {
    /// Wrap a bundle URI.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Get the URI.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
