//! Bounded, owned growable byte string.
//!
//! `BoundedString` backs the textual fields the ABI hands back to the host
//! (duplicate-query reports, history-entry listings): an owned buffer with
//! an explicit initial capacity that doubles on growth, and an always
//! null-terminated borrow for handing to C.
//!
//! The "null receiver yields an empty string" behavior from the design
//! notes applies at the ABI boundary, where `BoundedString` is addressed
//! through a raw pointer that the host might pass as NULL; see
//! [`crate::abi`] for the pointer-null checks. This safe type itself is
//! never null.

use std::ffi::CString;

/// An owned, growable byte buffer with doubling capacity growth.
#[derive(Debug, Clone, Default)]
pub struct BoundedString {
    buf: Vec<u8>,
}

impl BoundedString {
    /// Creates an empty buffer with at least `capacity` bytes reserved.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Appends a single character, growing the buffer by doubling if
    /// needed.
    pub fn append_char(&mut self, c: char) {
        let mut tmp = [0u8; 4];
        let encoded = c.encode_utf8(&mut tmp);
        self.append_bytes(encoded.as_bytes());
    }

    /// Appends the bytes of a borrowed C string (excluding its own NUL
    /// terminator), growing the buffer by doubling if needed.
    pub fn append_cstr(&mut self, s: &std::ffi::CStr) {
        self.append_bytes(s.to_bytes());
    }

    /// Appends raw bytes, growing the buffer by doubling if needed.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        let needed = self.buf.len() + bytes.len();
        if needed > self.buf.capacity() {
            let mut new_cap = self.buf.capacity().max(1);
            while new_cap < needed {
                new_cap = new_cap.saturating_mul(2);
            }
            self.buf.reserve(new_cap - self.buf.len());
        }
        self.buf.extend_from_slice(bytes);
    }

    /// The buffered text as a `&str`, replacing invalid UTF-8 is not
    /// performed: callers that only ever append valid UTF-8 (the only
    /// producers in this crate) get a direct view.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf).unwrap_or("")
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if no bytes have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Builds an always null-terminated `CString` borrow of the buffered
    /// text. Interior NUL bytes (which cannot occur in a C string) are
    /// stripped defensively rather than causing a panic or error: this
    /// accessor never fails.
    #[must_use]
    pub fn as_cstr(&self) -> CString {
        let sanitized: Vec<u8> = self.buf.iter().copied().filter(|&b| b != 0).collect();
        // SAFETY-free: `sanitized` has no interior NUL by construction.
        CString::new(sanitized).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_char_and_cstr() {
        let mut s = BoundedString::with_capacity(4);
        s.append_char('h');
        s.append_char('i');
        assert_eq!(s.as_str(), "hi");
        assert_eq!(s.as_cstr().to_str().unwrap(), "hi");
    }

    #[test]
    fn doubling_growth_does_not_lose_data() {
        let mut s = BoundedString::with_capacity(1);
        for _ in 0..1000 {
            s.append_char('a');
        }
        assert_eq!(s.len(), 1000);
        assert!(s.as_str().chars().all(|c| c == 'a'));
    }

    #[test]
    fn empty_buffer_yields_empty_cstr() {
        let s = BoundedString::default();
        assert_eq!(s.as_cstr().to_str().unwrap(), "");
        assert!(s.is_empty());
    }

    #[test]
    fn interior_nul_bytes_are_stripped_not_panicking() {
        let mut s = BoundedString::with_capacity(8);
        s.append_bytes(b"a\0b");
        let c = s.as_cstr();
        assert_eq!(c.to_str().unwrap(), "ab");
    }
}
