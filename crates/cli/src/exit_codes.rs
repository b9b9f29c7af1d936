//! CLI Exit Code Registry
//!
//! Single source of truth for `gstate` exit codes. Schedulers wrapping
//! `gstate run` branch on these, so they are part of the shell contract.
//!
//! # Exit Code Ranges
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success                                              |
//! | 1    | Diff non-empty (only with `--exit-code`)             |
//! | 2    | Usage error (bad args, missing file, bad `--now`)    |
//! | 3    | Invalid config                                       |
//! | 4    | Fresh-records input could not be parsed              |
//! | 5    | Store unavailable (open or fetch failed)             |
//! | 6    | Batch write failed (partially or totally)            |
//! | 7    | Malformed record (missing identifying field)         |
//! | 8    | Report could not be serialized or written            |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `CliError` construction

use gatherstate_recon::ReconcileError;

/// Success - pass completed (and diff empty, if `--exit-code` was given).
pub const EXIT_SUCCESS: u8 = 0;

/// The pass succeeded and produced added, changed or removed records.
/// Like `git diff --exit-code`, only reported when asked for.
pub const EXIT_CHANGES: u8 = 1;

/// Usage error - bad arguments, unreadable files.
pub const EXIT_USAGE: u8 = 2;

/// Config failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Fresh-records file is not valid JSON / NDJSON / CSV, or rows are not objects.
pub const EXIT_INPUT_PARSE: u8 = 4;

/// Store could not be opened, or the former state could not be fetched.
/// Nothing was written.
pub const EXIT_STORE: u8 = 5;

/// One or both batch writes failed. The two batches are independent, so
/// some mutations may have been applied.
pub const EXIT_PARTIAL_WRITE: u8 = 6;

/// A record is missing one of its identifying fields.
pub const EXIT_MALFORMED_RECORD: u8 = 7;

/// The JSON report (or dump) could not be serialized or written out.
/// The pass itself, if any, has already been applied.
pub const EXIT_OUTPUT: u8 = 8;

/// Map a reconciliation error to its exit code.
pub fn reconcile_exit_code(err: &ReconcileError) -> u8 {
    match err {
        ReconcileError::Record(_) => EXIT_MALFORMED_RECORD,
        ReconcileError::Fetch(_) => EXIT_STORE,
        ReconcileError::Write { .. } => EXIT_PARTIAL_WRITE,
    }
}
