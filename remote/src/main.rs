//! `juno-remote` CLI entrypoint.
//!
//! `build` runs the publish, watch and fetch pipeline and prints the path of
//! the retrieved firmware on stdout. `fetch` runs a standalone resumable
//! download. Ctrl-C trips a shared cancel token so poll and retry waits end
//! promptly and partial downloads stay resumable.

use camino::Utf8PathBuf;
use clap::Parser;
use juno_remote::cancel::CancelToken;
use juno_remote::cli::{BuildArgs, Cli, Command, FetchArgs};
use juno_remote::config::{ConfigError, JunoConfig, TOKEN_ENV_VAR};
use juno_remote::error::ErrorClass;
use juno_remote::http;
use juno_remote::output::{transfer_summary, write_progress, write_stderr_line};
use juno_remote::pipeline::{PipelineContext, PipelineError, run_pipeline};
use juno_remote::request::{BuildRequest, RequestError};
use juno_remote::transfer::transport::UreqTransport;
use juno_remote::transfer::{ResumableTransfer, TransferError, TransferRequest};
use std::io::Write;
use std::time::Duration;

/// Exit code reported when the run was interrupted.
const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no firmware repository configured; set firmware.repository")]
    MissingRepository,

    #[error("no access token; set JUNO_FIRMWARE_TOKEN or firmware.token")]
    MissingToken,

    #[error("invalid build request: {0}")]
    Request(#[from] RequestError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("download failed: {0}")]
    Transfer(#[from] TransferError),
}

impl RunError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Pipeline(err) => err.class(),
            Self::Transfer(err) => err.class(),
            Self::Config(_) | Self::MissingRepository | Self::MissingToken | Self::Request(_) => {
                ErrorClass::Fatal
            }
        }
    }
}

type Result<T> = std::result::Result<T, RunError>;

fn main() {
    let cli = Cli::parse();
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let env_token = std::env::var(TOKEN_ENV_VAR).ok();
    let run_result = run(&cli, &cancel, env_token, &mut stdout, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn install_interrupt_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
        log::warn!("could not install Ctrl-C handler: {err}");
    }
}

fn run(
    cli: &Cli,
    cancel: &CancelToken,
    env_token: Option<String>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let config = load_config(cli.command.config_path())?;
    match &cli.command {
        Command::Build(args) => run_build(args, &config, cancel, env_token, stdout, stderr),
        Command::Fetch(args) => run_fetch(args, &config, cancel, stdout, stderr),
    }
}

/// Loads the explicit configuration file, or the platform default.
fn load_config(path: Option<&Utf8PathBuf>) -> Result<JunoConfig> {
    let config = match path {
        Some(path) => JunoConfig::load(path.as_std_path())?,
        None => JunoConfig::load_default()?,
    };
    Ok(config)
}

fn run_build(
    args: &BuildArgs,
    config: &JunoConfig,
    cancel: &CancelToken,
    env_token: Option<String>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let repository = config
        .firmware
        .repository
        .as_deref()
        .ok_or(RunError::MissingRepository)?;
    let credential = config
        .resolve_token(env_token)
        .ok_or(RunError::MissingToken)?;
    let request = BuildRequest::new(
        args.project.as_std_path(),
        repository,
        credential,
        args.device.clone(),
    )?;
    let output_dir = config.firmware_dir()?;

    let context = PipelineContext {
        config,
        cancel,
        output_dir: &output_dir,
        quiet: args.quiet,
    };
    let outcome = run_pipeline(&request, &context, stderr)?;
    write_stdout_line(stdout, outcome.binary.display());
    Ok(())
}

fn run_fetch(
    args: &FetchArgs,
    config: &JunoConfig,
    cancel: &CancelToken,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let agent = http::agent(
        Duration::from_secs(config.transfer.connect_timeout_secs),
        Duration::from_secs(config.transfer.response_timeout_secs),
    );
    let transport = UreqTransport::new(agent);
    let transfer = ResumableTransfer::new(&transport, config.retry_policy(), cancel);
    let request =
        TransferRequest::new(&args.url, args.dest.as_std_path()).with_declared_size(args.size);

    write_progress(stderr, args.quiet, format!("Fetching {}...", args.url));
    let outcome = transfer.download(&request)?;
    write_progress(
        stderr,
        args.quiet,
        transfer_summary(&outcome, args.dest.as_std_path()),
    );
    write_stdout_line(stdout, &args.dest);
    Ok(())
}

fn write_stdout_line(stdout: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stdout, "{message}").is_err() {
        log::warn!("could not write result to stdout");
    }
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) if err.class() == ErrorClass::Cancelled => {
            write_stderr_line(stderr, "Interrupted; partial downloads will resume next run.");
            EXIT_CANCELLED
        }
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}

#[cfg(test)]
mod tests;
