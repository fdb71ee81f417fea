use serde::Serialize;
use std::fmt;

/// Category of a crawl failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    /// Connection refused, DNS failure, reset sockets and other network-layer faults
    Network,
    /// The request or page load exceeded its time budget
    Timeout,
    /// The page structure did not match what the extractor expected
    Parse,
    /// The remote side asked us to slow down (HTTP 429)
    RateLimit,
    /// Access refused, captcha walls (HTTP 403)
    Blocked,
    /// Anything not matched by a known pattern
    Unknown,
}

impl ErrorKind {
    /// All kinds, in reporting order
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::Parse,
        ErrorKind::RateLimit,
        ErrorKind::Blocked,
        ErrorKind::Unknown,
    ];

    /// Whether retrying the same request can reasonably succeed
    ///
    /// Parse failures are structural and blocked requests need a human or a
    /// different proxy, so neither is retryable. Unknown errors are treated
    /// optimistically.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Parse | ErrorKind::Blocked)
    }

    /// Short lowercase name used in logs and reports
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Parse => "parse",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Blocked => "blocked",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
