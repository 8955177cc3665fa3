//! Manifest-driven localization.

use std::path::{Component, Path, PathBuf};

use kestrel_launcher::{LocalFile, LocationFactory};
use tokio::task::spawn_blocking;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};

use crate::archive::{expand_archive, ExpandSummary};
use crate::error::{LocalizeError, LocalizeResult};

/// What a localization run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizeSummary {
    /// Plain files copied, in manifest order.
    pub copied: Vec<PathBuf>,
    /// Archives expanded, in manifest order.
    pub expanded: Vec<(PathBuf, ExpandSummary)>,
}

/// Read a manifest of local files.
pub async fn read_manifest(path: &Path) -> LocalizeResult<Vec<LocalFile>> {
    let data = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Localize every file listed in the manifest at `manifest` into `target`.
pub async fn localize_manifest(
    factory: &LocationFactory,
    manifest: &Path,
    target: &Path,
) -> LocalizeResult<LocalizeSummary> {
    let files = read_manifest(manifest).await?;
    info!(
        manifest = %manifest.display(),
        target = %target.display(),
        count = files.len(),
        "localizing files"
    );
    localize_files(factory, &files, target).await
}

/// `name` as a path relative to the target, provided it names something
/// inside it.
fn enclosed_name(name: &str) -> LocalizeResult<PathBuf> {
    let path = Path::new(name);
    let mut components = path.components().peekable();
    if components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_))) {
        Ok(path.to_path_buf())
    } else {
        Err(LocalizeError::UnsafeEntry {
            name: name.to_owned(),
        })
    }
}

/// Localize `files` into `target` in order.
///
/// Archives are expanded into `target/<name>/`, other files are copied to
/// `target/<name>`. A name that is not a plain relative path is rejected
/// with [`LocalizeError::UnsafeEntry`] before its source is opened. The
/// target directory is created if needed. Nothing is cleaned up on failure.
pub async fn localize_files(
    factory: &LocationFactory,
    files: &[LocalFile],
    target: &Path,
) -> LocalizeResult<LocalizeSummary> {
    tokio::fs::create_dir_all(target).await?;

    let mut summary = LocalizeSummary::default();
    for file in files {
        let output = target.join(enclosed_name(&file.name)?);
        let reader = factory.open(&file.uri).await?;

        if file.archive {
            debug!(uri = %file.uri, output = %output.display(), "expanding archive");
            let bridge = SyncIoBridge::new(reader);
            let dest = output.clone();
            let expanded = spawn_blocking(move || expand_archive(bridge, &dest)).await??;
            summary.expanded.push((output, expanded));
        } else {
            debug!(uri = %file.uri, output = %output.display(), "copying file");
            let mut reader = reader;
            let mut out = tokio::fs::File::create(&output).await?;
            tokio::io::copy(&mut reader, &mut out).await?;
            summary.copied.push(output);
        }
    }

    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_plain_files_from_local_paths() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("config.json");
        std::fs::write(&source, br#"{"threads":4}"#).unwrap();
        let uri = url_for(&source);

        let target = tempfile::tempdir().unwrap();
        let nested = target.path().join("a/b");
        let summary = localize_files(
            &LocationFactory::new(),
            &[LocalFile::new("config.json", uri)],
            &nested,
        )
        .await
        .unwrap();

        assert_eq!(summary.copied, [nested.join("config.json")]);
        assert_eq!(
            std::fs::read_to_string(nested.join("config.json")).unwrap(),
            r#"{"threads":4}"#
        );
    }

    #[tokio::test]
    async fn copy_overwrites_existing_file() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("app.conf");
        std::fs::write(&source, "new").unwrap();

        let target = tempfile::tempdir().unwrap();
        std::fs::write(target.path().join("app.conf"), "old and longer").unwrap();

        localize_files(
            &LocationFactory::new(),
            &[LocalFile::new("app.conf", url_for(&source))],
            target.path(),
        )
        .await
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(target.path().join("app.conf")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn missing_source_fails() {
        let target = tempfile::tempdir().unwrap();
        let missing = target.path().join("nope.json");
        let result = localize_files(
            &LocationFactory::new(),
            &[LocalFile::new("nope.json", url_for(&missing))],
            &target.path().join("out"),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn names_escaping_target_are_rejected() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("escaped.txt");
        std::fs::write(&source, "outside").unwrap();

        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("work");

        let err = localize_files(
            &LocationFactory::new(),
            &[LocalFile::new("../escaped.txt", url_for(&source))],
            &target,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LocalizeError::UnsafeEntry { ref name } if name == "../escaped.txt"));
        assert!(!root.path().join("escaped.txt").exists());
    }

    #[test]
    fn only_plain_relative_names_are_enclosed() {
        assert_eq!(
            enclosed_name("lib/app.jar").unwrap(),
            PathBuf::from("lib/app.jar")
        );
        for name in ["/tmp/x", "../x", "lib/../../x", "", "."] {
            assert!(
                matches!(enclosed_name(name), Err(LocalizeError::UnsafeEntry { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    fn url_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}
