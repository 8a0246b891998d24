//! CLI argument definitions for `juno-remote`.
//!
//! Kept apart from the binary so argument parsing can be tested without
//! touching the network or git.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Build Juno firmware remotely and retrieve it.
#[derive(Parser, Debug)]
#[command(name = "juno-remote")]
#[command(version, about)]
#[command(long_about = concat!(
    "Build Juno firmware remotely and retrieve it.\n\n",
    "The build command pushes a generated firmware project to a fresh branch of ",
    "the configured repository, waits for CI to publish a build artifact for that ",
    "branch, then downloads the artifact and extracts the firmware binary.\n\n",
    "Downloads resume from the bytes already on disk, so an interrupted run can ",
    "simply be repeated.",
))]
#[command(after_help = concat!(
    "CONFIGURATION:\n",
    "  Settings are read from juno.toml in the platform configuration directory,\n",
    "  or from the file given with --config. The repository access token may be\n",
    "  supplied through the JUNO_FIRMWARE_TOKEN environment variable.\n\n",
    "EXAMPLES:\n",
    "  Build a project and fetch its firmware:\n",
    "    $ juno-remote build --project ./generated --device esp32\n\n",
    "  Download a large file, resuming any previous attempt:\n",
    "    $ juno-remote fetch https://example.com/toolchain.tar.gz toolchain.tar.gz",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Push a project, wait for CI and retrieve the firmware.
    Build(BuildArgs),

    /// Download a URL with resume and retry.
    Fetch(FetchArgs),
}

/// Arguments for the build command.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Directory holding the generated firmware project.
    #[arg(short, long, value_name = "DIR")]
    pub project: Utf8PathBuf,

    /// Target device identifier.
    #[arg(short, long, value_name = "ID")]
    pub device: Option<String>,

    /// Configuration file [default: platform-specific].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Suppress progress output (errors still shown).
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the fetch command.
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// URL to download.
    pub url: String,

    /// Destination file.
    pub dest: Utf8PathBuf,

    /// Configuration file [default: platform-specific].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Expected size in bytes, used when the server does not report one.
    #[arg(long, value_name = "BYTES")]
    pub size: Option<u64>,

    /// Suppress progress output (errors still shown).
    #[arg(short, long)]
    pub quiet: bool,
}

impl Command {
    /// Returns the `--config` override, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Build(args) => args.config.as_ref(),
            Self::Fetch(args) => args.config.as_ref(),
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
