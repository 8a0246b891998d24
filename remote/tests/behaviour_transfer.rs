//! BDD tests for resumable transfers.

use juno_remote::cancel::CancelToken;
use juno_remote::test_utils::{BodyFault, MemoryTransport, patterned_bytes};
use juno_remote::transfer::{
    ResumableTransfer, RetryPolicy, TransferError, TransferOutcome, TransferRequest, partial_path,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const URL: &str = "https://api.github.com/repos/acme/fw/actions/artifacts/7/zip";

struct TransferWorld {
    temp: TempDir,
    body: Vec<u8>,
    ignore_range: bool,
    first_fault: Option<BodyFault>,
    every_fault: Option<BodyFault>,
    max_retries: u32,
    offsets: Vec<u64>,
    head_requests: usize,
    result: Option<Result<TransferOutcome, TransferError>>,
}

impl TransferWorld {
    fn destination(&self) -> PathBuf {
        self.temp.path().join("firmware.zip")
    }
}

#[fixture]
fn world() -> TransferWorld {
    TransferWorld {
        temp: tempfile::tempdir().expect("temp dir"),
        body: Vec::new(),
        ignore_range: false,
        first_fault: None,
        every_fault: None,
        max_retries: 5,
        offsets: Vec::new(),
        head_requests: 0,
        result: None,
    }
}

#[given("a remote file of {size} bytes")]
fn given_remote_file(world: &mut TransferWorld, size: usize) {
    world.body = patterned_bytes(size);
}

#[given("a partial download of {bytes} bytes")]
fn given_partial(world: &mut TransferWorld, bytes: usize) {
    let part = partial_path(&world.destination());
    std::fs::write(part, &world.body[..bytes]).expect("write partial");
}

#[given("the server ignores range requests")]
fn given_range_ignored(world: &mut TransferWorld) {
    world.ignore_range = true;
}

#[given("the first body request is reset after {bytes} bytes")]
fn given_first_reset(world: &mut TransferWorld, bytes: usize) {
    world.first_fault = Some(BodyFault::ResetAfter(bytes));
}

#[given("every body request is reset after {bytes} bytes")]
fn given_every_reset(world: &mut TransferWorld, bytes: usize) {
    world.every_fault = Some(BodyFault::ResetAfter(bytes));
}

#[given("a retry limit of {limit}")]
fn given_retry_limit(world: &mut TransferWorld, limit: u32) {
    world.max_retries = limit;
}

#[given("the destination already exists")]
fn given_destination_exists(world: &mut TransferWorld) {
    std::fs::write(world.destination(), &world.body).expect("write destination");
}

#[when("the file is downloaded")]
fn when_downloaded(world: &mut TransferWorld) {
    let mut transport = MemoryTransport::new(world.body.clone());
    if world.ignore_range {
        transport = transport.ignoring_range();
    }
    if let Some(fault) = world.first_fault {
        transport = transport.with_fault(fault);
    }
    if let Some(fault) = world.every_fault {
        transport = transport.always(fault);
    }

    let cancel = CancelToken::new();
    let policy = RetryPolicy {
        max_retries: world.max_retries,
        retry_delay: Duration::ZERO,
    };
    let transfer = ResumableTransfer::new(&transport, policy, &cancel);
    let request = TransferRequest::new(URL, world.destination());
    world.result = Some(transfer.download(&request));
    world.offsets = transport.offsets();
    world.head_requests = transport.head_requests();
}

#[then("the download succeeds")]
fn then_succeeds(world: &mut TransferWorld) {
    let result = world.result.as_ref().expect("download attempted");
    assert!(result.is_ok(), "expected success, got {result:?}");
}

#[then("the destination matches the remote file")]
fn then_destination_matches(world: &mut TransferWorld) {
    let written = std::fs::read(world.destination()).expect("read destination");
    assert_eq!(written.len(), world.body.len());
    assert!(written == world.body, "destination differs from remote file");
    assert!(!partial_path(&world.destination()).exists());
}

#[then("the body requests started at offsets \"{offsets}\"")]
fn then_offsets(world: &mut TransferWorld, offsets: String) {
    let expected: Vec<u64> = offsets
        .split(',')
        .map(|offset| offset.trim().parse().expect("numeric offset"))
        .collect();
    assert_eq!(world.offsets, expected);
}

#[then("exactly {count} body requests were made")]
fn then_body_requests(world: &mut TransferWorld, count: usize) {
    assert_eq!(world.offsets.len(), count);
}

#[then("the download fails because retries were exhausted")]
fn then_retries_exhausted(world: &mut TransferWorld) {
    let result = world.result.as_ref().expect("download attempted");
    assert!(
        matches!(result, Err(TransferError::RetriesExhausted { .. })),
        "expected RetriesExhausted, got {result:?}"
    );
    assert!(!world.destination().exists());
}

#[then("the partial file holds {bytes} bytes")]
fn then_partial_holds(world: &mut TransferWorld, bytes: u64) {
    let part = partial_path(&world.destination());
    let len = std::fs::metadata(part).expect("partial exists").len();
    assert_eq!(len, bytes);
}

#[then("no network requests were made")]
fn then_no_requests(world: &mut TransferWorld) {
    assert_eq!(world.head_requests, 0);
    assert!(world.offsets.is_empty());
}

#[scenario(
    path = "tests/features/resumable_transfer.feature",
    name = "Resume a half-finished download"
)]
fn scenario_resume(world: TransferWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/resumable_transfer.feature",
    name = "Server ignores the range request"
)]
fn scenario_range_ignored(world: TransferWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/resumable_transfer.feature",
    name = "Connection reset mid-body resumes where it stopped"
)]
fn scenario_reset_resumes(world: TransferWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/resumable_transfer.feature",
    name = "Persistent failures exhaust the retry budget"
)]
fn scenario_retries_exhausted(world: TransferWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/resumable_transfer.feature",
    name = "A complete destination needs no network"
)]
fn scenario_complete_destination(world: TransferWorld) {
    let _ = world;
}
