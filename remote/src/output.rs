//! Progress output helpers.
//!
//! User-facing progress is written to a caller-supplied writer (stderr in
//! the CLI) so tests can capture it; diagnostics go through `log`.

use crate::transfer::TransferOutcome;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;

/// Writes `message` and a newline, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort logging; ignore write failures.
    }
}

/// Writes a progress line unless `quiet` is set.
pub fn write_progress(stderr: &mut dyn Write, quiet: bool, message: impl Display) {
    if !quiet {
        write_stderr_line(stderr, message);
    }
}

/// Describes how a transfer to `destination` finished.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use juno_remote::output::transfer_summary;
/// use juno_remote::transfer::TransferOutcome;
///
/// let text = transfer_summary(&TransferOutcome::AlreadyComplete, Path::new("fw.zip"));
/// assert_eq!(text, "fw.zip is already complete");
/// ```
#[must_use]
pub fn transfer_summary(outcome: &TransferOutcome, destination: &Path) -> String {
    let destination = destination.display();
    match outcome {
        TransferOutcome::AlreadyComplete => format!("{destination} is already complete"),
        TransferOutcome::Finalized { bytes } => {
            format!("{destination} completed from a previous partial ({bytes} bytes)")
        }
        TransferOutcome::Downloaded {
            bytes,
            attempts,
            resumed_from,
        } => {
            let mut text = format!("Downloaded {destination} ({bytes} bytes");
            if let Some(offset) = resumed_from {
                text.push_str(&format!(", resumed at byte {offset}"));
            }
            if *attempts > 1 {
                text.push_str(&format!(", {attempts} attempts"));
            }
            text.push(')');
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn quiet_suppresses_progress() {
        let mut stderr = Vec::new();
        write_progress(&mut stderr, true, "hidden");
        assert!(stderr.is_empty());
        write_progress(&mut stderr, false, "shown");
        assert_eq!(String::from_utf8(stderr).expect("utf8"), "shown\n");
    }

    #[rstest]
    #[case::fresh(
        TransferOutcome::Downloaded { bytes: 10, attempts: 1, resumed_from: None },
        "Downloaded fw.zip (10 bytes)"
    )]
    #[case::resumed(
        TransferOutcome::Downloaded { bytes: 10, attempts: 3, resumed_from: Some(4) },
        "Downloaded fw.zip (10 bytes, resumed at byte 4, 3 attempts)"
    )]
    #[case::finalized(
        TransferOutcome::Finalized { bytes: 10 },
        "fw.zip completed from a previous partial (10 bytes)"
    )]
    fn summaries_describe_outcome(#[case] outcome: TransferOutcome, #[case] expected: &str) {
        assert_eq!(transfer_summary(&outcome, Path::new("fw.zip")), expected);
    }
}
