//! Bundle mode: what the `file-localizer` init container runs.
//!
//! The runtime config bundle is expanded into `<work_dir>/runtime-config/`.
//! The runnable's resolved local files are then written out as a manifest
//! next to it and localized into the working directory.

use std::path::{Path, PathBuf};

use kestrel_launcher::packager::{LaunchSpecDocument, SPEC_ENTRY};
use kestrel_launcher::LocationFactory;
use tokio::task::spawn_blocking;
use tokio_util::io::SyncIoBridge;
use tracing::info;

use crate::archive::expand_archive;
use crate::error::{LocalizeError, LocalizeResult};
use crate::localize::{localize_manifest, LocalizeSummary};

/// Directory under the working directory the bundle is expanded into.
pub const RUNTIME_CONFIG_DIR: &str = "runtime-config";

/// Path of the manifest written for `runnable`.
#[must_use]
pub fn manifest_path(work_dir: &Path, runnable: &str) -> PathBuf {
    work_dir
        .join(RUNTIME_CONFIG_DIR)
        .join(format!("localize-{runnable}.json"))
}

/// Fetch and expand the bundle, then localize the runnable's files into
/// `work_dir`.
pub async fn localize_bundle(
    factory: &LocationFactory,
    bundle_uri: &str,
    runnable: &str,
    work_dir: &Path,
) -> LocalizeResult<LocalizeSummary> {
    let config_dir = work_dir.join(RUNTIME_CONFIG_DIR);

    info!(bundle = bundle_uri, dir = %config_dir.display(), "expanding runtime config");
    let bridge = SyncIoBridge::new(factory.open(bundle_uri).await?);
    let dest = config_dir.clone();
    spawn_blocking(move || expand_archive(bridge, &dest)).await??;

    let document: LaunchSpecDocument =
        serde_json::from_slice(&tokio::fs::read(config_dir.join(SPEC_ENTRY)).await?)?;
    let spec = document
        .runnable(runnable)
        .ok_or_else(|| LocalizeError::UnknownRunnable {
            name: runnable.to_owned(),
        })?;

    let manifest = manifest_path(work_dir, runnable);
    tokio::fs::write(&manifest, serde_json::to_vec_pretty(&spec.local_files)?).await?;

    localize_manifest(factory, &manifest, work_dir).await
}
