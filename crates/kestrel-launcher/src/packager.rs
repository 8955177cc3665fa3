//! Runtime configuration bundle.
//!
//! The bundle is a zip archive holding the launch specification (with local
//! files rewritten by the resolver) and the runtime arguments. It is uploaded
//! under the application location, where the file localizer picks it up.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::LaunchResult;
use crate::resolver::FileResolver;
use crate::storage::{Location, LocationFactory};
use crate::types::{BundleLocation, ProgramSpecification, RunId, RunnableSpec, RuntimeArguments};

/// Bundle entry holding the [`LaunchSpecDocument`].
pub const SPEC_ENTRY: &str = "launchSpec.json";

/// Bundle entry holding the [`RuntimeArguments`].
pub const ARGUMENTS_ENTRY: &str = "arguments.json";

/// Stem of uploaded bundle names.
pub const BUNDLE_STEM: &str = "runtime-config";

/// Suffix of uploaded bundle names.
pub const BUNDLE_SUFFIX: &str = "jar";

/// The specification document stored in the bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpecDocument {
    /// Program name.
    pub name: String,
    /// Run this bundle belongs to.
    pub run_id: RunId,
    /// URI of the application location.
    pub app_location: String,
    /// Runnables with resolved local files.
    pub runnables: BTreeMap<String, RunnableSpec>,
}

impl LaunchSpecDocument {
    /// Look up a runnable by name.
    #[must_use]
    pub fn runnable(&self, name: &str) -> Option<&RunnableSpec> {
        self.runnables.get(name)
    }
}

/// Packages and uploads runtime configuration bundles.
#[derive(Debug)]
pub struct Packager<'a> {
    factory: &'a LocationFactory,
    app_location: &'a Location,
}

impl<'a> Packager<'a> {
    #[must_use]
    pub fn new(factory: &'a LocationFactory, app_location: &'a Location) -> Self {
        Self {
            factory,
            app_location,
        }
    }

    /// Resolve local files, write both documents, zip and upload them.
    ///
    /// The staging directory is removed on every exit path.
    pub async fn package_and_upload(
        &self,
        spec: &ProgramSpecification,
        args: &RuntimeArguments,
        run_id: &RunId,
    ) -> LaunchResult<BundleLocation> {
        let resolved = FileResolver::new(self.factory, self.app_location)
            .resolve_all(spec)
            .await?;

        let runnables = spec
            .runnables
            .iter()
            .map(|(name, runnable)| {
                let mut runnable = runnable.clone();
                if let Some(files) = resolved.get(name) {
                    runnable.local_files.clone_from(files);
                }
                (name.clone(), runnable)
            })
            .collect();

        let document = LaunchSpecDocument {
            name: spec.name.clone(),
            run_id: run_id.clone(),
            app_location: self.app_location.uri().to_owned(),
            runnables,
        };

        let staging = tempfile::Builder::new().prefix("kestrel-bundle-").tempdir()?;
        tokio::fs::write(
            staging.path().join(SPEC_ENTRY),
            serde_json::to_vec_pretty(&document)?,
        )
        .await?;
        tokio::fs::write(
            staging.path().join(ARGUMENTS_ENTRY),
            serde_json::to_vec_pretty(args)?,
        )
        .await?;

        let archive = staging.path().join(format!("{BUNDLE_STEM}.{BUNDLE_SUFFIX}"));
        {
            let dir = staging.path().to_owned();
            let archive = archive.clone();
            spawn_blocking(move || write_bundle(&dir, &[SPEC_ENTRY, ARGUMENTS_ENTRY], &archive))
                .await??;
        }
        debug!(%run_id, path = %archive.display(), "runtime config archive created");

        let target = self.app_location.temp_file(BUNDLE_STEM, BUNDLE_SUFFIX);
        let mut file = tokio::fs::File::open(&archive).await?;
        let size = target.copy_from(&mut file).await?;

        info!(%run_id, bundle = %target, size, "runtime config uploaded");
        Ok(BundleLocation::new(target.uri()))
    }
}

fn write_bundle(dir: &Path, entries: &[&str], archive: &Path) -> LaunchResult<()> {
    let mut zip = ZipWriter::new(std::fs::File::create(archive)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(*entry, options)?;
        let mut source = std::fs::File::open(dir.join(entry))?;
        std::io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}
