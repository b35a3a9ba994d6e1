//! Shared HTTP constants (headers, limits, field names).

pub(crate) const HEADER_REQUEST_ID: &str = pdfsqueeze_telemetry::REQUEST_ID_HEADER;
pub(crate) const HEADER_ERROR_KIND: &str = "x-pdfsqueeze-error";
pub(crate) const HEADER_PRESET: &str = "x-pdfsqueeze-preset";
pub(crate) const SSE_KEEP_ALIVE_SECS: u64 = 15;
/// Longest a progress stream waits for a run the event bus has never seen.
pub(crate) const UNKNOWN_RUN_WAIT_SECS: u64 = 60;

/// Multipart form field carrying the upload when no field declares a file name.
pub(crate) const FILE_FIELD: &str = "file";
/// Allowance for multipart boundaries and part headers on top of the upload ceiling.
pub(crate) const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
/// Longest client file name kept for logs and type detection.
pub(crate) const MAX_FILE_NAME_LEN: usize = 255;
