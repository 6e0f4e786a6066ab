//! Substrate types and functions shared by every other component: timing,
//! allocation, bounded buffers, a ring queue, substring search, hashing, and
//! checked arithmetic.

pub mod alloc;
pub mod bstring;
pub mod checked;
pub mod checksum;
pub mod hash;
pub mod ring;
pub mod search;
pub mod time;

pub use alloc::{aligned_alloc, aligned_free};
pub use bstring::BoundedString;
pub use checked::{add_size, mul_size};
pub use checksum::rotate_xor_checksum;
pub use hash::fnv1a64;
pub use ring::SpscRingBuffer;
pub use search::{find, MultiPatternMatch, MultiPatternSearcher, MAX_PATTERNS};
pub use time::{millis_f64_to_nanos, nanos_to_millis_f64, now_nanos};
