//! Zip expansion.
//!
//! The fetched stream is read once, front to back, into an anonymous spool
//! file and the entries are expanded from its central directory. Entry sizes
//! written after the data (data descriptors) are therefore handled like any
//! other. The spool is removed when the expansion ends.

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::read::ZipFile;
use zip::ZipArchive;

use crate::error::{LocalizeError, LocalizeResult};

/// Yields the entries of a zip archive in archive order.
#[derive(Debug)]
pub struct ArchiveEntries<R> {
    archive: ZipArchive<R>,
    next: usize,
}

impl<R: Read + Seek> ArchiveEntries<R> {
    /// Reads the central directory of `reader`.
    pub fn new(reader: R) -> LocalizeResult<Self> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
            next: 0,
        })
    }

    /// The next entry, or `None` at the end of the archive.
    ///
    /// The returned entry borrows the archive; drop it before asking for the
    /// next one.
    pub fn next_entry(&mut self) -> LocalizeResult<Option<ArchiveEntry<'_>>> {
        if self.next >= self.archive.len() {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(ArchiveEntry {
            file: self.archive.by_index(index)?,
        }))
    }
}

/// One entry of an archive.
pub struct ArchiveEntry<'a> {
    file: ZipFile<'a>,
}

impl ArchiveEntry<'_> {
    /// Raw entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.file.name()
    }

    /// Whether this is a directory marker.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file.is_dir()
    }

    /// Relative path of the entry, rejecting names that escape the
    /// destination (absolute paths or `..` components).
    pub fn relative_path(&self) -> LocalizeResult<PathBuf> {
        self.file
            .enclosed_name()
            .ok_or_else(|| LocalizeError::UnsafeEntry {
                name: self.file.name().to_owned(),
            })
    }
}

impl Read for ArchiveEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// What an expansion produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandSummary {
    /// Regular files written.
    pub files: usize,
    /// Directory markers created.
    pub directories: usize,
}

/// Copy `reader` to an anonymous temporary file, rewound to the start.
fn spool<R: Read>(mut reader: R) -> LocalizeResult<File> {
    let mut file = tempfile::tempfile()?;
    io::copy(&mut reader, &mut file)?;
    file.rewind()?;
    Ok(file)
}

/// Expand a zip stream into `target`, creating it if needed.
///
/// The stream is consumed exactly once. Existing files are overwritten.
/// Stops at the first error and leaves what was already written in place.
pub fn expand_archive<R: Read>(reader: R, target: &Path) -> LocalizeResult<ExpandSummary> {
    std::fs::create_dir_all(target)?;

    let mut entries = ArchiveEntries::new(spool(reader)?)?;
    let mut summary = ExpandSummary::default();

    while let Some(mut entry) = entries.next_entry()? {
        let output = target.join(entry.relative_path()?);

        if entry.is_dir() {
            std::fs::create_dir_all(&output)?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&output)?;
        io::copy(&mut entry, &mut file)?;
        summary.files += 1;
    }

    debug!(
        target = %target.display(),
        files = summary.files,
        directories = summary.directories,
        "archive expanded"
    );
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use super::*;

    fn archive(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            match contents {
                Some(data) => {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(data.as_bytes()).unwrap();
                }
                None => zip.add_directory(*name, options).unwrap(),
            }
        }
        zip.finish().unwrap().into_inner()
    }

    fn crc32(data: &[u8]) -> u32 {
        let mut crc = !0u32;
        for byte in data {
            crc ^= u32::from(*byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    /// Stored entries whose local headers carry zero sizes and CRCs, with
    /// the real values in a data descriptor after each entry (flag bit 3),
    /// as streaming zip writers produce them.
    fn descriptor_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        const FLAGS: u16 = 0x0008;
        const DOS_DATE: u16 = 22561;

        let mut out = Vec::new();
        let mut central = Vec::new();
        for (name, contents) in entries {
            let offset = out.len() as u32;
            let crc = crc32(contents.as_bytes());
            let size = contents.len() as u32;
            let name_len = name.len() as u16;

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&FLAGS.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&[0; 12]);
            out.extend_from_slice(&name_len.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(contents.as_bytes());

            out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&FLAGS.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&DOS_DATE.to_le_bytes());
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&size.to_le_bytes());
            central.extend_from_slice(&size.to_le_bytes());
            central.extend_from_slice(&name_len.to_le_bytes());
            central.extend_from_slice(&[0; 8]);
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        let central_offset = out.len() as u32;
        let count = entries.len() as u16;
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn entries_arrive_in_archive_order() {
        let data = archive(&[
            ("b.txt", Some("b")),
            ("lib/", None),
            ("lib/a.jar", Some("a")),
        ]);

        let mut entries = ArchiveEntries::new(Cursor::new(data)).unwrap();
        let mut seen = Vec::new();
        while let Some(entry) = entries.next_entry().unwrap() {
            seen.push((entry.name().to_owned(), entry.is_dir()));
        }
        assert_eq!(
            seen,
            [
                ("b.txt".to_owned(), false),
                ("lib/".to_owned(), true),
                ("lib/a.jar".to_owned(), false)
            ]
        );
    }

    #[test]
    fn expands_files_and_directories() {
        let data = archive(&[
            ("conf/", None),
            ("conf/app.conf", Some("key=value")),
            ("empty/", None),
            ("bin/run.sh", Some("#!/bin/sh")),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("libs.zip");

        let summary = expand_archive(Cursor::new(data), &target).unwrap();

        assert_eq!(summary, ExpandSummary { files: 2, directories: 2 });
        assert_eq!(
            std::fs::read_to_string(target.join("conf/app.conf")).unwrap(),
            "key=value"
        );
        assert!(target.join("bin/run.sh").is_file());
        assert!(target.join("empty").is_dir());
    }

    #[test]
    fn expands_archives_with_trailing_sizes() {
        let data = descriptor_archive(&[
            ("app.conf", "key=value"),
            ("lib/a.jar", "jar bytes"),
            ("run.sh", "#!/bin/sh"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("libs.zip");

        let summary = expand_archive(Cursor::new(data), &target).unwrap();

        assert_eq!(summary, ExpandSummary { files: 3, directories: 0 });
        assert_eq!(
            std::fs::read_to_string(target.join("app.conf")).unwrap(),
            "key=value"
        );
        assert_eq!(
            std::fs::read_to_string(target.join("lib/a.jar")).unwrap(),
            "jar bytes"
        );
        assert_eq!(
            std::fs::read_to_string(target.join("run.sh")).unwrap(),
            "#!/bin/sh"
        );
    }

    #[test]
    fn rejects_entries_escaping_target() {
        let data = archive(&[("../evil.sh", Some("rm -rf /"))]);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");

        let err = expand_archive(Cursor::new(data), &target).unwrap_err();
        assert!(matches!(err, LocalizeError::UnsafeEntry { .. }));
        assert!(!dir.path().join("evil.sh").exists());
    }

    #[test]
    fn truncated_archive_is_an_error() {
        let contents = "x".repeat(4096);
        let mut data = archive(&[("a.txt", Some(contents.as_str()))]);
        data.truncate(100);
        let dir = tempfile::tempdir().unwrap();

        assert!(expand_archive(Cursor::new(data), dir.path()).is_err());
    }
}
