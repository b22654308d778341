//! Raw `extern "C"` host import declarations.
//!
//! Only linked when actually targeting wasm; native builds (including
//! `cargo test`) never reference these symbols, so unit tests exercise the
//! bridge through [`crate::host_bridge::HostImports`] and a mock instead.

/// Unpack a host import's `(ptr, len)` return value, packed into a single
/// `i64` the same way this crate's own exports pack theirs: high 32 bits
/// are the length, low 32 bits are the pointer. `(0, 0)` signals "no
/// reply" from the host side.
pub fn unpack_ptr_len(packed: i64) -> (u32, u32) {
    let ptr = (packed as u64 & 0xFFFF_FFFF) as u32;
    let len = ((packed as u64) >> 32) as u32;
    (ptr, len)
}

#[cfg(target_arch = "wasm32")]
#[link(wasm_import_module = "redis_host")]
extern "C" {
    /// Issue a Redis command built from an encoded argument frame. Errors
    /// raised by the command are propagated into the script as a Lua
    /// error.
    pub fn host_redis_call(ptr: u32, len: u32) -> i64;

    /// Same as `host_redis_call`, but command errors come back as a plain
    /// `{err = ...}` table instead of raising.
    pub fn host_redis_pcall(ptr: u32, len: u32) -> i64;

    /// Emit a log line at the given level (`redis.LOG_*`).
    pub fn host_redis_log(level: u32, ptr: u32, len: u32);

    /// Hex-encoded SHA1 of the given byte range. `(0, 0)` on failure.
    pub fn host_sha1hex(ptr: u32, len: u32) -> i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_ptr_and_len() {
        let packed = ((0x1234u64) << 32) | 0x5678u64;
        assert_eq!(unpack_ptr_len(packed as i64), (0x5678, 0x1234));
    }

    #[test]
    fn zero_packed_is_no_reply() {
        assert_eq!(unpack_ptr_len(0), (0, 0));
    }
}
