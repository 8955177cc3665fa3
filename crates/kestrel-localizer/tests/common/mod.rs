//! Fixtures for localizer integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use bytes::Bytes;
use kestrel_launcher::LocationFactory;
use object_store::memory::InMemory;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// A factory serving `memory://` from a fresh in-memory store.
pub fn memory_factory() -> LocationFactory {
    LocationFactory::new().with_store("memory", "", Arc::new(InMemory::new()))
}

/// Zip archive with the given files and directories.
///
/// Directory names end in `/`.
pub fn zip_of(files: &[(&str, &str)], dirs: &[&str]) -> Vec<u8> {
    let options = SimpleFileOptions::default();
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for dir in dirs {
        zip.add_directory(*dir, options).unwrap();
    }
    for (name, contents) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Store `data` at `uri`.
pub async fn put(factory: &LocationFactory, uri: &str, data: Vec<u8>) {
    factory
        .create(uri)
        .unwrap()
        .put(Bytes::from(data))
        .await
        .unwrap();
}

/// Count files and directories below `root`, excluding `root` itself.
pub fn count_tree(root: &std::path::Path) -> (usize, usize) {
    let mut files = 0;
    let mut dirs = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                dirs += 1;
                pending.push(path);
            } else {
                files += 1;
            }
        }
    }
    (files, dirs)
}
