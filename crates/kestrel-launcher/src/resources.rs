//! Translation of abstract resource units into container requests.
//!
//! A [`ResourceSpec`] counts virtual cores and megabytes. Containers request
//! CPU in millicores and memory as a quantity; both pass through the
//! configured multipliers. The Java heap budget is derived from the memory
//! that ends up on the container.

use crate::config::ResourceTuning;
use crate::error::{LaunchError, LaunchResult};
use crate::k8s::{Quantity, ResourceRequirements};
use crate::types::ResourceSpec;

/// Resource name for CPU in requests and limits.
pub const CPU: &str = "cpu";

/// Resource name for memory in requests and limits.
pub const MEMORY: &str = "memory";

/// Container-level resource amounts after multipliers are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatedResources {
    /// CPU in millicores.
    pub cpu_millis: u64,
    /// Memory in MiB.
    pub memory_mb: u64,
}

/// Apply the tuning multipliers to a resource spec.
///
/// Both results are truncated towards zero.
pub fn translate_resources(
    spec: &ResourceSpec,
    tuning: &ResourceTuning,
) -> LaunchResult<TranslatedResources> {
    tuning.validate()?;

    let cpu = f64::from(spec.virtual_cores) * 1000.0 * tuning.cpu_multiplier;
    let memory = f64::from(spec.memory_size_mb) * tuning.memory_multiplier;

    Ok(TranslatedResources {
        cpu_millis: cpu.floor() as u64,
        memory_mb: memory.floor() as u64,
    })
}

/// Build container resource requirements from translated amounts.
///
/// Only requests are set; the container may burst up to node capacity.
#[must_use]
pub fn requirements(translated: TranslatedResources) -> ResourceRequirements {
    let mut requirements = ResourceRequirements::default();
    requirements.requests.insert(
        CPU.to_owned(),
        Quantity::new(format!("{}m", translated.cpu_millis)),
    );
    requirements.requests.insert(
        MEMORY.to_owned(),
        Quantity::new(format!("{}Mi", translated.memory_mb)),
    );
    requirements
}

/// Compute the maximum Java heap for a container.
///
/// The heap is everything except the reserved amount, unless that leaves
/// less than `min_heap_ratio` of the total, in which case it is that ratio
/// of the total rounded up.
#[must_use]
pub fn compute_max_heap_mb(total_mb: u64, reserved_mb: u64, min_heap_ratio: f64) -> u64 {
    if total_mb == 0 {
        return 0;
    }

    let remaining = total_mb.saturating_sub(reserved_mb);
    if remaining as f64 / total_mb as f64 >= min_heap_ratio {
        remaining
    } else {
        (total_mb as f64 * min_heap_ratio).ceil() as u64
    }
}

/// Compute the heap budget for the memory carried by `requirements`.
///
/// The memory request is preferred over the limit. Having neither is fatal.
pub fn max_heap_for(
    requirements: &ResourceRequirements,
    tuning: &ResourceTuning,
) -> LaunchResult<u64> {
    let memory = requirements
        .requests
        .get(MEMORY)
        .or_else(|| requirements.limits.get(MEMORY))
        .ok_or(LaunchError::MissingMemory)?;

    Ok(compute_max_heap_mb(
        memory.to_mebibytes()?,
        tuning.reserved_memory_mb,
        tuning.heap_min_ratio,
    ))
}
