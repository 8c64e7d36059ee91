//! Per-thread scratch buffer for encode/copy calls.
//!
//! Each thread keeps one buffer that is lent out for the duration of a single
//! call and never retained. A nested borrow on the same thread gets a
//! temporary buffer instead of aliasing the shared one.

use std::cell::RefCell;

/// Default scratch capacity in bytes.
pub const DEFAULT_SCRATCH_SIZE: usize = 32 * 1024;

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with an exclusive buffer of exactly `capacity` bytes.
///
/// The contents are unspecified on entry.
pub fn with_scratch<R>(capacity: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
    let capacity = capacity.max(1);
    SCRATCH.with(|cell| match cell.try_borrow_mut() {
        Ok(mut buf) => {
            if buf.len() != capacity {
                buf.resize(capacity, 0);
            }
            f(&mut buf[..])
        }
        Err(_) => {
            let mut tmp = vec![0u8; capacity];
            f(&mut tmp[..])
        }
    })
}
