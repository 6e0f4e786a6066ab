//! Typed core errors and the thread-local diagnostic error context.
//!
//! Every fallible internal operation returns `Result<T, CoreError>`. The ABI
//! boundary (see [`crate::abi`]) converts `Err` into the documented sentinel
//! return (negative code, NULL, or a zeroed accessor) and mirrors the error
//! into [`set_error`] so the host can call [`get_last_error`] for diagnostics.
//!
//! The context is thread-local, not process-wide: a process-wide "last
//! error" cannot survive a multi-threaded host without threads stomping on
//! each other's diagnostics.

use std::cell::RefCell;
use std::fmt;

/// Maximum length, in bytes, of a stored error message. Longer messages are
/// truncated; the stored copy is always valid UTF-8 (truncation happens on
/// a char boundary).
pub const MAX_ERROR_MESSAGE_LEN: usize = 255;

/// The kind of failure a core operation encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreErrorKind {
    /// Success: no error. Used as the reset state of the error context.
    Success,
    /// Null where required, empty where required, out-of-range numeric,
    /// malformed path.
    InvalidArgument,
    /// Slot table full, context pool full, cluster table full.
    ResourceExhausted,
    /// Handle does not address a live slot.
    NotFound,
    /// Handle addresses a slot that has since been reused (generation
    /// mismatch).
    Stale,
    /// File open/read/write/map failure.
    IoError,
    /// Header magic/version/checksum mismatch on load.
    CorruptData,
    /// Allocator failure.
    OutOfMemory,
}

impl CoreErrorKind {
    /// The stable numeric code surfaced across the ABI for this kind.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidArgument => -1,
            Self::ResourceExhausted => -2,
            Self::NotFound => -3,
            Self::Stale => -4,
            Self::IoError => -5,
            Self::CorruptData => -6,
            Self::OutOfMemory => -7,
        }
    }
}

impl fmt::Display for CoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::InvalidArgument => "invalid argument",
            Self::ResourceExhausted => "resource exhausted",
            Self::NotFound => "not found",
            Self::Stale => "stale handle",
            Self::IoError => "io error",
            Self::CorruptData => "corrupt data",
            Self::OutOfMemory => "out of memory",
        };
        f.write_str(s)
    }
}

/// A typed core error, carrying an optional bounded human-readable context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {context}", kind = self.kind, context = self.context.as_deref().unwrap_or("<no context>"))]
pub struct CoreError {
    kind: CoreErrorKind,
    context: Option<String>,
}

impl CoreError {
    /// Creates a new error of the given kind with no context.
    #[must_use]
    pub const fn new(kind: CoreErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Attaches (or replaces) a bounded context message, truncating to
    /// [`MAX_ERROR_MESSAGE_LEN`] bytes on a char boundary.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(truncate_to_boundary(context.into(), MAX_ERROR_MESSAGE_LEN));
        self
    }

    /// The kind of this error.
    #[must_use]
    pub const fn kind(&self) -> CoreErrorKind {
        self.kind
    }

    /// Shorthand for the common case.
    #[must_use]
    pub const fn invalid_argument() -> Self {
        Self::new(CoreErrorKind::InvalidArgument)
    }

    #[must_use]
    pub const fn resource_exhausted() -> Self {
        Self::new(CoreErrorKind::ResourceExhausted)
    }

    #[must_use]
    pub const fn not_found() -> Self {
        Self::new(CoreErrorKind::NotFound)
    }

    #[must_use]
    pub const fn stale() -> Self {
        Self::new(CoreErrorKind::Stale)
    }

    #[must_use]
    pub const fn io_error() -> Self {
        Self::new(CoreErrorKind::IoError)
    }

    #[must_use]
    pub const fn corrupt_data() -> Self {
        Self::new(CoreErrorKind::CorruptData)
    }

    #[must_use]
    pub const fn out_of_memory() -> Self {
        Self::new(CoreErrorKind::OutOfMemory)
    }
}

fn truncate_to_boundary(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s
}

#[derive(Debug, Clone)]
struct ErrorState {
    kind: CoreErrorKind,
    message: String,
}

impl Default for ErrorState {
    fn default() -> Self {
        Self {
            kind: CoreErrorKind::Success,
            message: String::new(),
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<ErrorState> = RefCell::new(ErrorState::default());
}

/// Records `kind`/`message` as the calling thread's last error, truncating
/// the message to [`MAX_ERROR_MESSAGE_LEN`] bytes.
pub fn set_error(kind: CoreErrorKind, message: &str) {
    let truncated = truncate_to_boundary(message.to_string(), MAX_ERROR_MESSAGE_LEN);
    LAST_ERROR.with(|cell| {
        let mut state = cell.borrow_mut();
        state.kind = kind;
        state.message = truncated;
    });
    #[cfg(feature = "diagnostics")]
    if kind != CoreErrorKind::Success {
        tracing::debug!(kind = %kind, "core error recorded");
    }
}

/// Records `err` as the calling thread's last error.
pub fn set_error_from(err: &CoreError) {
    let message = err.context.clone().unwrap_or_default();
    set_error(err.kind, &message);
}

/// Returns a snapshot of the calling thread's last error.
#[must_use]
pub fn get_last_error() -> (CoreErrorKind, String) {
    LAST_ERROR.with(|cell| {
        let state = cell.borrow();
        (state.kind, state.message.clone())
    })
}

/// Resets the calling thread's error context to `Success`/empty.
pub fn clear_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = ErrorState::default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_success() {
        clear_error();
        let (kind, msg) = get_last_error();
        assert_eq!(kind, CoreErrorKind::Success);
        assert!(msg.is_empty());
    }

    #[test]
    fn set_and_get_round_trips() {
        set_error(CoreErrorKind::InvalidArgument, "bad path");
        let (kind, msg) = get_last_error();
        assert_eq!(kind, CoreErrorKind::InvalidArgument);
        assert_eq!(msg, "bad path");
        clear_error();
    }

    #[test]
    fn message_is_truncated_with_valid_utf8() {
        let long = "x".repeat(1000);
        set_error(CoreErrorKind::IoError, &long);
        let (_, msg) = get_last_error();
        assert_eq!(msg.len(), MAX_ERROR_MESSAGE_LEN);
        clear_error();
    }

    #[test]
    fn clear_resets_to_success() {
        set_error(CoreErrorKind::Stale, "whatever");
        clear_error();
        let (kind, msg) = get_last_error();
        assert_eq!(kind, CoreErrorKind::Success);
        assert!(msg.is_empty());
    }

    #[test]
    fn error_context_is_per_thread() {
        set_error(CoreErrorKind::NotFound, "main-thread-error");
        let handle = std::thread::spawn(|| {
            let (kind, msg) = get_last_error();
            assert_eq!(kind, CoreErrorKind::Success);
            assert!(msg.is_empty());
        });
        handle.join().unwrap();
        let (kind, _) = get_last_error();
        assert_eq!(kind, CoreErrorKind::NotFound);
        clear_error();
    }

    #[test]
    fn core_error_kind_codes_are_stable() {
        assert_eq!(CoreErrorKind::Success.code(), 0);
        assert_eq!(CoreErrorKind::InvalidArgument.code(), -1);
        assert_eq!(CoreErrorKind::OutOfMemory.code(), -7);
    }

    #[test]
    fn with_context_truncates() {
        let err = CoreError::invalid_argument().with_context("x".repeat(1000));
        assert_eq!(err.context.unwrap().len(), MAX_ERROR_MESSAGE_LEN);
    }
}
