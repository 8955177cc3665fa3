//! Rewriting of local file references against the application location.
//!
//! Files already stored under the application location's scheme are
//! referenced where they are. Everything else is copied under the
//! application location first so the cluster can fetch it.

use std::collections::BTreeMap;

use tracing::debug;
use url::Url;

use crate::error::{LaunchError, LaunchResult};
use crate::storage::{split_suffix, Location, LocationFactory};
use crate::types::{LocalFile, ProgramSpecification};

/// Resolves local files for one application location.
#[derive(Debug)]
pub struct FileResolver<'a> {
    factory: &'a LocationFactory,
    app_location: &'a Location,
}

impl<'a> FileResolver<'a> {
    #[must_use]
    pub fn new(factory: &'a LocationFactory, app_location: &'a Location) -> Self {
        Self {
            factory,
            app_location,
        }
    }

    /// Resolve the local files of every runnable.
    pub async fn resolve_all(
        &self,
        spec: &ProgramSpecification,
    ) -> LaunchResult<BTreeMap<String, Vec<LocalFile>>> {
        let mut resolved = BTreeMap::new();
        for (name, runnable) in &spec.runnables {
            resolved.insert(name.clone(), self.resolve(name, &runnable.local_files).await?);
        }
        Ok(resolved)
    }

    /// Resolve the local files of one runnable, preserving order.
    pub async fn resolve(&self, runnable: &str, files: &[LocalFile]) -> LaunchResult<Vec<LocalFile>> {
        let mut resolved = Vec::with_capacity(files.len());
        for file in files {
            resolved.push(self.resolve_file(runnable, file).await?);
        }
        Ok(resolved)
    }

    async fn resolve_file(&self, runnable: &str, file: &LocalFile) -> LaunchResult<LocalFile> {
        let source =
            Url::parse(&file.uri).map_err(|e| LaunchError::invalid_location(&file.uri, e.to_string()))?;

        let location = if source.scheme() == self.app_location.scheme() {
            self.factory.create(source.as_str())?
        } else {
            debug!(runnable, uri = %source, "copying local file");
            let target = self.copy_target(&source, &file.name);
            let mut reader = self.factory.open(source.as_str()).await?;
            let size = target.copy_from(&mut reader).await?;
            debug!(runnable, uri = %source, target = %target, size, "copied local file");
            target
        };

        let status = location.status().await?;
        Ok(file.relocated(location.uri(), status.last_modified, status.size))
    }

    /// Temp location named after the source, keeping its suffix.
    ///
    /// A source without a suffix borrows the suffix of the local file name
    /// so archive detection keeps working.
    fn copy_target(&self, source: &Url, local_name: &str) -> Location {
        let file_name = source
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or(local_name);

        let (stem, mut suffix) = split_suffix(file_name);
        if suffix.is_empty() {
            suffix = split_suffix(local_name).1;
        }
        self.app_location.temp_file(stem, suffix)
    }
}
