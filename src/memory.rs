//! Guest-side allocator exports (`alloc`/`free`) and the raw memory
//! helpers the export wrappers use to move bytes across the boundary.
//!
//! Rust's global allocator needs a [`core::alloc::Layout`] (size *and*
//! alignment) to deallocate, but the exported `free(ptr)` the host calls
//! only ever has a pointer. Every allocation made through [`guest_alloc`]
//! therefore reserves an 8-byte length header just before the pointer it
//! hands back; [`guest_free`] reads that header to reconstruct the
//! original allocation before dropping it. The host never sees the
//! header — it only ever holds the pointer past it.

use std::alloc::{alloc, dealloc, Layout};

const HEADER_LEN: usize = 8;

fn header_layout(total_len: usize) -> Layout {
    Layout::from_size_align(total_len, 8).expect("allocation size overflow")
}

/// Allocate `size` usable bytes and return a pointer past the length
/// header. Returns null if the allocator fails, mirroring `malloc`.
///
/// # Safety
/// The returned pointer must eventually be passed to [`guest_free`]
/// exactly once, and never written past `size` bytes from it.
pub unsafe fn guest_alloc(size: u32) -> *mut u8 {
    let size = size as usize;
    let total = size + HEADER_LEN;
    let layout = header_layout(total);
    let base = alloc(layout);
    if base.is_null() {
        return std::ptr::null_mut();
    }
    (base as *mut u64).write((size as u64).to_le());
    base.add(HEADER_LEN)
}

/// Release a buffer previously returned by [`guest_alloc`].
///
/// # Safety
/// `ptr` must be a still-live pointer returned by [`guest_alloc`], not yet
/// freed, and not read or written again after this call.
pub unsafe fn guest_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let base = ptr.sub(HEADER_LEN);
    let size = u64::from_le((base as *const u64).read()) as usize;
    let layout = header_layout(size + HEADER_LEN);
    dealloc(base, layout);
}

/// Copy `len` bytes starting at `ptr` out of linear memory. Does not take
/// ownership of, or free, the source buffer — per the cross-boundary
/// protocol, the side that allocated an input buffer is the side that
/// frees it.
///
/// # Safety
/// `ptr..ptr+len` must be a valid, readable range for the duration of the
/// call.
pub unsafe fn read_bytes(ptr: u32, len: u32) -> Vec<u8> {
    if ptr == 0 || len == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(ptr as *const u8, len as usize).to_vec()
}

/// Write `bytes` into a freshly [`guest_alloc`]'d buffer and return its
/// pointer; the caller (eventually the host, via [`guest_free`]) owns it.
///
/// # Safety
/// Same obligations as [`guest_alloc`]: the returned pointer must be freed
/// exactly once.
pub unsafe fn alloc_with_bytes(bytes: &[u8]) -> *mut u8 {
    let ptr = guest_alloc(bytes.len() as u32);
    if !ptr.is_null() && !bytes.is_empty() {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
    }
    ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_round_trips() {
        unsafe {
            let ptr = guest_alloc(16);
            assert!(!ptr.is_null());
            for i in 0..16u8 {
                ptr.add(i as usize).write(i);
            }
            let copy = read_bytes(ptr as u32, 16);
            assert_eq!(copy, (0..16u8).collect::<Vec<_>>());
            guest_free(ptr);
        }
    }

    #[test]
    fn alloc_with_bytes_copies_input() {
        unsafe {
            let ptr = alloc_with_bytes(b"hello");
            let copy = read_bytes(ptr as u32, 5);
            assert_eq!(copy, b"hello");
            guest_free(ptr);
        }
    }

    #[test]
    fn zero_length_read_is_empty() {
        unsafe {
            assert_eq!(read_bytes(0, 0), Vec::<u8>::new());
        }
    }
}
