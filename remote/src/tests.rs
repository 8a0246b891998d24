//! Tests for the `juno-remote` entrypoint.

use super::*;
use juno_remote::cancel::Cancelled;
use juno_remote::pipeline::{Stage, StageFailure};
use juno_remote::watch::WatchError;
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;

#[fixture]
fn temp() -> TempDir {
    tempfile::tempdir().expect("temp dir")
}

fn write_config(dir: &TempDir, text: &str) -> Utf8PathBuf {
    let path = dir.path().join("juno.toml");
    fs::write(&path, text).expect("write config");
    Utf8PathBuf::from_path_buf(path).expect("utf8 temp path")
}

fn run_cli(
    argv: &[&str],
    cancel: &CancelToken,
    env_token: Option<&str>,
) -> (Result<()>, String, String) {
    let cli = Cli::parse_from(argv);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = run(
        &cli,
        cancel,
        env_token.map(str::to_owned),
        &mut stdout,
        &mut stderr,
    );
    (
        result,
        String::from_utf8(stdout).expect("utf8 stdout"),
        String::from_utf8(stderr).expect("utf8 stderr"),
    )
}

#[test]
fn exit_code_for_run_result_returns_zero_on_success() {
    let mut stderr = Vec::new();
    assert_eq!(exit_code_for_run_result(Ok(()), &mut stderr), 0);
    assert!(stderr.is_empty());
}

#[test]
fn exit_code_for_run_result_prints_error_and_returns_one() {
    let mut stderr = Vec::new();
    let exit_code = exit_code_for_run_result(Err(RunError::MissingRepository), &mut stderr);
    assert_eq!(exit_code, 1);

    let text = String::from_utf8(stderr).expect("stderr was not UTF-8");
    assert!(text.contains("no firmware repository configured"));
}

#[test]
fn cancelled_pipeline_exits_with_130() {
    let err = RunError::Pipeline(PipelineError {
        stage: Stage::Watch,
        source: StageFailure::Watch(WatchError::Cancelled(Cancelled)),
    });

    let mut stderr = Vec::new();
    assert_eq!(exit_code_for_run_result(Err(err), &mut stderr), EXIT_CANCELLED);
    assert!(
        String::from_utf8(stderr)
            .expect("utf8")
            .contains("Interrupted")
    );
}

#[rstest]
fn build_without_repository_is_rejected(temp: TempDir) {
    let config = write_config(&temp, "[ci]\nmax_attempts = 2\n");
    let (result, stdout, _) = run_cli(
        &["juno-remote", "build", "-p", "fw", "-c", config.as_str()],
        &CancelToken::new(),
        Some("ghp_token"),
    );

    assert!(matches!(result, Err(RunError::MissingRepository)));
    assert!(stdout.is_empty());
}

#[rstest]
#[case::no_token(None)]
#[case::blank_token(Some("   "))]
fn build_without_token_is_rejected(temp: TempDir, #[case] env_token: Option<&str>) {
    let config = write_config(
        &temp,
        "[firmware]\nrepository = \"https://github.com/acme/fw\"\n",
    );
    let (result, _, _) = run_cli(
        &["juno-remote", "build", "-p", "fw", "-c", config.as_str()],
        &CancelToken::new(),
        env_token,
    );

    assert!(matches!(result, Err(RunError::MissingToken)));
}

#[rstest]
fn malformed_config_is_reported(temp: TempDir) {
    let config = write_config(&temp, "[ci]\nmax_attempts = 0\n");
    let (result, _, _) = run_cli(
        &["juno-remote", "fetch", "https://x/y", "y", "-c", config.as_str()],
        &CancelToken::new(),
        None,
    );

    let err = result.expect_err("invalid config");
    assert!(err.to_string().contains("ci.max_attempts"));
}

#[rstest]
fn fetch_of_complete_destination_prints_path(temp: TempDir) {
    let config = write_config(&temp, "");
    let dest = temp.path().join("toolchain.tar.gz");
    fs::write(&dest, b"done").expect("write destination");
    let dest = dest.to_str().expect("utf8 dest").to_owned();

    let (result, stdout, stderr) = run_cli(
        &[
            "juno-remote",
            "fetch",
            "https://example.invalid/toolchain.tar.gz",
            &dest,
            "-c",
            config.as_str(),
        ],
        &CancelToken::new(),
        None,
    );

    result.expect("complete destination needs no download");
    assert_eq!(stdout.trim(), dest);
    assert!(stderr.contains("is already complete"));
}

#[rstest]
fn interrupted_fetch_exits_with_130(temp: TempDir) {
    let config = write_config(&temp, "");
    let dest = temp.path().join("toolchain.tar.gz");
    let dest = dest.to_str().expect("utf8 dest").to_owned();
    let cancel = CancelToken::new();
    cancel.cancel();

    let (result, stdout, _) = run_cli(
        &[
            "juno-remote",
            "fetch",
            "https://example.invalid/toolchain.tar.gz",
            &dest,
            "-q",
            "-c",
            config.as_str(),
        ],
        &cancel,
        None,
    );

    assert!(stdout.is_empty());
    let mut stderr = Vec::new();
    assert_eq!(exit_code_for_run_result(result, &mut stderr), EXIT_CANCELLED);
}
