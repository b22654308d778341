//! `extern "C"` entry points the host calls directly.
//!
//! Thin wrappers over [`Runtime`]: each function here does argument
//! marshalling only (reading/writing linear memory, packing `(ptr, len)`
//! results) and delegates everything else. The runtime itself lives in a
//! `thread_local!` singleton because a guest instance runs one script at a
//! time on one thread — `spec.md`'s own non-goal rules out concurrent
//! scripts inside a single instance.

use std::cell::RefCell;
use std::rc::Rc;

use crate::host_bridge::HostImports;
use crate::memory::{alloc_with_bytes, guest_alloc, guest_free, read_bytes};
use crate::runtime::Runtime;

#[cfg(target_arch = "wasm32")]
fn default_imports() -> Rc<dyn HostImports> {
    Rc::new(crate::host_bridge::WasmHostImports)
}

#[cfg(not(target_arch = "wasm32"))]
fn default_imports() -> Rc<dyn HostImports> {
    Rc::new(crate::host_bridge::MockHostImports::new())
}

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new(default_imports()));
}

/// Pack a `(ptr, len)` pair into the `i64` return-value convention this
/// module uses everywhere a `(ptr, len)` needs to cross an `extern "C"`
/// boundary as a single return value: high 32 bits are the length, low 32
/// bits are the pointer.
fn pack_ptr_len(ptr: *mut u8, len: usize) -> i64 {
    (((len as u32) as u64) << 32 | (ptr as u32 as u64)) as i64
}

/// Build the interpreter. Returns `0` on success, `-1` on failure (the
/// sandbox itself failing to construct, which would indicate a bug in
/// this module, not a script problem).
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn init() -> i32 {
    RUNTIME.with(|rt| match rt.borrow_mut().init() {
        Ok(()) => 0,
        Err(_) => -1,
    })
}

/// Destroy and recreate the interpreter, clearing all prior script state.
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn reset() -> i32 {
    RUNTIME.with(|rt| match rt.borrow_mut().reset() {
        Ok(()) => 0,
        Err(_) => -1,
    })
}

/// Evaluate a script with empty `KEYS`/`ARGV`. Returns the packed
/// `(ptr, len)` of an encoded `Reply`, always owned by the guest and
/// released by the host via [`free`].
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn eval(script_ptr: u32, script_len: u32) -> i64 {
    let script = unsafe { read_bytes(script_ptr, script_len) };
    let reply = RUNTIME.with(|rt| rt.borrow_mut().eval(&script));
    let ptr = unsafe { alloc_with_bytes(&reply) };
    pack_ptr_len(ptr, reply.len())
}

/// Evaluate a script against a KEYS/ARGV request frame. `keys_count` is
/// the script's claim about how many of the frame's items are `KEYS`
/// (the rest become `ARGV`).
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn eval_with_args(
    script_ptr: u32,
    script_len: u32,
    args_ptr: u32,
    args_len: u32,
    keys_count: u32,
) -> i64 {
    let script = unsafe { read_bytes(script_ptr, script_len) };
    let args = unsafe { read_bytes(args_ptr, args_len) };
    let reply = RUNTIME.with(|rt| rt.borrow_mut().eval_with_args(&script, &args, keys_count));
    let ptr = unsafe { alloc_with_bytes(&reply) };
    pack_ptr_len(ptr, reply.len())
}

/// Override fuel and/or byte caps. `fuel == 0` leaves the current fuel
/// budget unchanged; the two byte caps always replace (`0` there means
/// unlimited).
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn set_limits(fuel: i64, max_reply_bytes: u32, max_arg_bytes: u32) {
    RUNTIME.with(|rt| rt.borrow_mut().set_limits(fuel, max_reply_bytes, max_arg_bytes));
}

/// Reserve `size` bytes the host can write into before calling `eval`/
/// `eval_with_args`. The guest never frees a buffer it did not allocate
/// for itself, so input buffers allocated here are the host's to release.
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn alloc(size: u32) -> u32 {
    unsafe { guest_alloc(size) as u32 }
}

/// Release a buffer previously returned by [`alloc`] or by `eval`/
/// `eval_with_args`'s packed `(ptr, len)` result.
#[cfg_attr(target_arch = "wasm32", no_mangle)]
pub extern "C" fn free(ptr: u32) {
    unsafe { guest_free(ptr as *mut u8) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn lifecycle_and_eval_round_trip_through_packed_return() {
        assert_eq!(init(), 0);
        let script = b"return 7";
        let script_ptr = unsafe { alloc_with_bytes(script) };
        let packed = eval(script_ptr as u32, script.len() as u32);
        let ptr = (packed as u64 & 0xFFFF_FFFF) as u32;
        let len = ((packed as u64) >> 32) as u32;
        let reply_bytes = unsafe { read_bytes(ptr, len) };
        let mut off = 0;
        assert_eq!(codec::decode_reply(&reply_bytes, &mut off).unwrap(), codec::Reply::Int(7));
        unsafe {
            guest_free(script_ptr);
            free(ptr);
        }
    }

    #[test]
    fn set_limits_then_eval_reports_fuel_exhaustion() {
        assert_eq!(init(), 0);
        set_limits(50, 0, 0);
        let script = b"local i = 0 while true do i = i + 1 end";
        let script_ptr = unsafe { alloc_with_bytes(script) };
        let packed = eval(script_ptr as u32, script.len() as u32);
        let ptr = (packed as u64 & 0xFFFF_FFFF) as u32;
        let len = ((packed as u64) >> 32) as u32;
        let reply_bytes = unsafe { read_bytes(ptr, len) };
        let mut off = 0;
        assert_eq!(
            codec::decode_reply(&reply_bytes, &mut off).unwrap(),
            codec::Reply::Error(b"Script killed by fuel limit".to_vec())
        );
        unsafe {
            guest_free(script_ptr);
            free(ptr);
        }
        set_limits(10_000_000, 0, 0);
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let ptr = alloc(32);
        assert_ne!(ptr, 0);
        free(ptr);
    }
}
