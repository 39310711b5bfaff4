/// Tri-valued outcome of a dispatched control request, equivalent to the
/// original `enum SVC_Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcStatus {
    /// Request did not parse: bad token count, bad length, invalid chars.
    BadFmt,
    /// Parsed fine but the operation failed: precondition unmet, lock
    /// contended, I/O error.
    Err,
    /// Operation succeeded, including idempotent no-ops.
    Ok,
}

impl SvcStatus {
    /// HTTP status code this outcome maps to on the `/request/...` route.
    pub fn http_code(self) -> u16 {
        match self {
            SvcStatus::Ok => 200,
            SvcStatus::BadFmt => 400,
            SvcStatus::Err => 500,
        }
    }

    /// Literal response body for this outcome.
    pub fn body(self) -> &'static str {
        match self {
            SvcStatus::Ok => crate::constants::RESP_OK,
            SvcStatus::BadFmt | SvcStatus::Err => crate::constants::RESP_ERR,
        }
    }
}
