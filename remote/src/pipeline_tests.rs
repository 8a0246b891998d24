//! Unit tests for pipeline orchestration.

use super::*;
use crate::ci::{ArtifactRecord, CiError, MockCiProvider};
use crate::request::Credential;
use crate::test_utils::{
    ExpectedCall, MemoryTransport, StubExecutor, artifact_record, failure_output,
    success_output, success_output_with_stdout, zip_bytes,
};
use rstest::{fixture, rstest};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const REPO: &str = "https://github.com/acme/fw";

struct Harness {
    project: TempDir,
    output: TempDir,
    config: JunoConfig,
    cancel: CancelToken,
}

impl Harness {
    fn request(&self) -> BuildRequest {
        BuildRequest::new(
            self.project.path(),
            REPO,
            Credential::new("ghp_token"),
            Some("esp32".to_owned()),
        )
        .expect("valid request")
    }

    fn context(&self, quiet: bool) -> PipelineContext<'_> {
        PipelineContext {
            config: &self.config,
            cancel: &self.cancel,
            output_dir: self.output.path(),
            quiet,
        }
    }
}

#[fixture]
fn harness() -> Harness {
    let project = tempfile::tempdir().expect("project dir");
    fs::write(project.path().join("CMakeLists.txt"), "project(fw)").expect("write project");
    let mut config = JunoConfig::default();
    config.ci.max_attempts = 3;
    config.ci.poll_interval_secs = 0;
    config.transfer.retry_delay_secs = 0;
    Harness {
        project,
        output: tempfile::tempdir().expect("output dir"),
        config,
        cancel: CancelToken::new(),
    }
}

fn publishing_git() -> StubExecutor {
    StubExecutor::new(vec![
        ExpectedCall::git(vec!["clone"], Ok(success_output())),
        ExpectedCall::git(vec!["checkout", "-b"], Ok(success_output())),
        ExpectedCall::git(vec!["add", "-A"], Ok(success_output())),
        ExpectedCall::git(vec!["-c"], Ok(success_output())),
        ExpectedCall::git(
            vec!["rev-parse", "HEAD"],
            Ok(success_output_with_stdout("feedc0de\n")),
        ),
        ExpectedCall::git(vec!["push", "-u", "origin"], Ok(success_output())),
    ])
}

/// A provider that lists nothing until it has been asked about a branch's
/// workflow run, then lists `archive` as that branch's artifact.
fn provider_for(archive: &[u8]) -> MockCiProvider {
    let seen_branch: Arc<Mutex<Option<String>>> = Arc::default();
    let size = archive.len() as u64;
    let mut provider = MockCiProvider::new();

    let listing_branch = Arc::clone(&seen_branch);
    provider.expect_list_artifacts().returning(move || {
        let branch = listing_branch.lock().expect("branch lock").clone();
        Ok(branch
            .map(|branch| {
                let mut record: ArtifactRecord =
                    artifact_record(11, "firmware", &branch, Some("2026-03-01T10:00:00Z"));
                record.size_in_bytes = size;
                vec![record]
            })
            .unwrap_or_default())
    });
    provider.expect_workflow_runs().returning(move |branch| {
        *seen_branch.lock().expect("branch lock") = Some(branch.to_owned());
        Ok(Vec::new())
    });
    provider
}

fn run(
    harness: &Harness,
    executor: &StubExecutor,
    provider: &MockCiProvider,
    transport: &MemoryTransport,
    quiet: bool,
) -> (Result<BuildOutcome>, String) {
    let mut stderr = Vec::new();
    let collaborators = Collaborators {
        executor,
        provider,
        transport,
        extractor: &ZipExtractor,
    };
    let result = run_pipeline_with(
        &harness.request(),
        &harness.context(quiet),
        collaborators,
        &mut stderr,
    );
    (result, String::from_utf8(stderr).expect("utf8 progress"))
}

#[rstest]
fn full_run_delivers_firmware(harness: Harness) {
    let archive = zip_bytes(&[("build/", ""), ("build/fw.bin", "\u{1}FIRMWARE")]);
    let executor = publishing_git();
    let provider = provider_for(&archive);
    let transport = MemoryTransport::new(archive);

    let (result, progress) = run(&harness, &executor, &provider, &transport, false);
    let outcome = result.expect("pipeline succeeds");

    executor.assert_finished();
    assert_eq!(outcome.branch.commit, "feedc0de");
    assert_eq!(outcome.artifact.id, 11);
    assert_eq!(outcome.binary, harness.output.path().join("firmware.bin"));
    assert_eq!(
        fs::read(&outcome.binary).expect("read firmware"),
        b"\x01FIRMWARE"
    );
    assert!(progress.contains("for esp32"));
    assert!(progress.contains(&format!("Pushed branch {}", outcome.branch.name)));
    assert!(progress.contains("Firmware ready at"));
}

#[rstest]
fn quiet_run_prints_nothing(harness: Harness) {
    let archive = zip_bytes(&[("fw.bin", "bin")]);
    let executor = publishing_git();
    let provider = provider_for(&archive);
    let transport = MemoryTransport::new(archive);

    let (result, progress) = run(&harness, &executor, &provider, &transport, true);

    result.expect("pipeline succeeds");
    assert!(progress.is_empty());
}

#[rstest]
fn publish_failure_stops_the_run(harness: Harness) {
    let executor = StubExecutor::new(vec![ExpectedCall::git(
        vec!["clone"],
        Ok(failure_output("fatal: repository 'https://github.com/acme/fw/' not found")),
    )]);
    let provider = MockCiProvider::new();
    let transport = MemoryTransport::new(Vec::new());

    let (result, _) = run(&harness, &executor, &provider, &transport, true);
    let err = result.expect_err("publish fails");

    assert_eq!(err.stage, Stage::Publish);
    assert_eq!(err.class(), ErrorClass::Process);
    assert!(err.to_string().starts_with("publish stage failed"));
    assert_eq!(transport.head_requests() + transport.body_requests(), 0);
}

#[rstest]
fn missing_artifact_times_out_without_fetching(harness: Harness) {
    let executor = publishing_git();
    let mut provider = MockCiProvider::new();
    provider
        .expect_list_artifacts()
        .times(3)
        .returning(|| Ok(Vec::new()));
    provider.expect_workflow_runs().returning(|_| Ok(Vec::new()));
    let transport = MemoryTransport::new(Vec::new());

    let (result, _) = run(&harness, &executor, &provider, &transport, true);
    let err = result.expect_err("watch times out");

    assert_eq!(err.stage, Stage::Watch);
    assert_eq!(err.class(), ErrorClass::Timeout);
    assert_eq!(transport.body_requests(), 0);
}

#[rstest]
fn rejected_api_token_fails_watch_after_one_poll(harness: Harness) {
    let executor = publishing_git();
    let mut provider = MockCiProvider::new();
    provider.expect_list_artifacts().times(1).returning(|| {
        Err(CiError::Auth {
            url: "https://api.github.com/repos/acme/fw/actions/artifacts".to_owned(),
            status: 401,
        })
    });
    let transport = MemoryTransport::new(Vec::new());

    let (result, _) = run(&harness, &executor, &provider, &transport, true);
    let err = result.expect_err("auth failure");

    assert_eq!(err.stage, Stage::Watch);
    assert_eq!(err.class(), ErrorClass::Auth);
}

#[rstest]
fn archive_without_binary_fails_fetch(harness: Harness) {
    let archive = zip_bytes(&[("build/fw.elf", "elf"), ("build/fw.map", "map")]);
    let executor = publishing_git();
    let provider = provider_for(&archive);
    let transport = MemoryTransport::new(archive);

    let (result, _) = run(&harness, &executor, &provider, &transport, true);
    let err = result.expect_err("no firmware entry");

    assert_eq!(err.stage, Stage::Fetch);
    assert_eq!(err.class(), ErrorClass::NotFound);
    assert!(!harness.output.path().join("firmware.bin").exists());
}

#[rstest]
fn cancellation_surfaces_from_the_watch_stage(harness: Harness) {
    harness.cancel.cancel();
    let executor = publishing_git();
    let provider = MockCiProvider::new();
    let transport = MemoryTransport::new(Vec::new());

    let (result, _) = run(&harness, &executor, &provider, &transport, true);
    let err = result.expect_err("cancelled");

    assert_eq!(err.stage, Stage::Watch);
    assert_eq!(err.class(), ErrorClass::Cancelled);
}

#[rstest]
#[case::publish(Stage::Publish, "publish")]
#[case::watch(Stage::Watch, "watch")]
#[case::fetch(Stage::Fetch, "fetch")]
fn stages_display_lowercase(#[case] stage: Stage, #[case] expected: &str) {
    assert_eq!(stage.to_string(), expected);
}
