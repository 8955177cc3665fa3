//! Kestrel File Localizer
//!
//! Runs as the `file-localizer` init container of every launched pod and
//! makes a runnable's files available in its working directory before the
//! main container starts.
//!
//! Two modes are supported:
//!
//! - **Manifest mode** (`<manifest> <target_dir>`): localize the files
//!   listed in a JSON manifest
//! - **Bundle mode** (`bundle <bundle_uri> <runnable>`): expand the runtime
//!   config bundle, derive the runnable's manifest from it and localize
//!
//! A fetched archive is read once into a spool file and expanded from its
//! central directory.
//! Failures leave partial output behind; the pod's restart policy retries.

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod archive;
pub mod bundle;
pub mod cli;
pub mod error;
pub mod localize;

pub use archive::{expand_archive, ArchiveEntries, ArchiveEntry, ExpandSummary};
pub use bundle::localize_bundle;
pub use cli::Cli;
pub use error::{LocalizeError, LocalizeResult};
pub use localize::{localize_files, localize_manifest, read_manifest, LocalizeSummary};
