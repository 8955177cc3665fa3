//! Command-line interface of `kestrel-localize`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kestrel_launcher::LocationFactory;

use crate::bundle::localize_bundle;
use crate::error::{LocalizeError, LocalizeResult};
use crate::localize::{localize_manifest, LocalizeSummary};

/// Manifest mode takes the two positional arguments; `bundle` is what the
/// init container runs.
#[derive(Debug, Parser)]
#[command(name = "kestrel-localize")]
#[command(about = "Localize a runnable's files before it starts")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
pub struct Cli {
    /// JSON manifest of local files
    #[arg(required = true)]
    pub manifest: Option<PathBuf>,

    /// Directory to localize into
    #[arg(required = true)]
    pub target_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Expand a runtime config bundle and localize a runnable's files
    Bundle {
        /// URI of the runtime config bundle
        bundle_uri: String,

        /// Runnable to localize for
        runnable: String,

        /// Working directory (defaults to the current directory)
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
    },
}

impl Cli {
    /// Run the parsed command.
    pub async fn run(self, factory: &LocationFactory) -> LocalizeResult<LocalizeSummary> {
        match (self.command, self.manifest, self.target_dir) {
            (
                Some(Command::Bundle {
                    bundle_uri,
                    runnable,
                    work_dir,
                }),
                _,
                _,
            ) => localize_bundle(factory, &bundle_uri, &runnable, &work_dir).await,
            (None, Some(manifest), Some(target_dir)) => {
                localize_manifest(factory, &manifest, &target_dir).await
            }
            _ => Err(LocalizeError::config(
                "expected <manifest> <target_dir> or a bundle command",
            )),
        }
    }
}
