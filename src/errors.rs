//! Guest error taxonomy (spec §7).
//!
//! Every entry point renders its failure as exactly one [`Reply::Error`]
//! frame; nothing returns a failure status out of band. Most messages are
//! literal, not formatted, because the host side matches on substrings
//! (e.g. the fuel-bound testable property checks for `"fuel"`).

use thiserror::Error;

use crate::codec::DecodeError;

/// Top-level guest error. Each variant knows the exact reply payload it
/// becomes; see [`GuestError::reply_message`].
#[derive(Debug, Error)]
pub enum GuestError {
    /// No interpreter exists (entry point called before `init`, or after a
    /// `reset` that failed).
    #[error("Lua VM not initialized")]
    NotInitialized,

    /// `luaL_loadbuffer`-equivalent failed. Carries the interpreter's own
    /// message when the interpreter produced one; `None` falls back to the
    /// literal default.
    #[error("script load failed")]
    LoadFailed(Option<String>),

    /// Script execution raised an error (includes fuel exhaustion, which
    /// surfaces here with the literal message `"Script killed by fuel
    /// limit"` set by the fuel hook).
    #[error("script execution failed")]
    ExecFailed(Option<String>),

    /// The top-of-stack return value has no `Reply` representation.
    #[error("unsupported Lua return type")]
    UnsupportedReturnType,

    /// Encoded reply exceeded `max_reply_bytes`.
    #[error("reply exceeds configured limit")]
    ReplyTooLarge,

    /// Inbound KEYS/ARGV frame exceeded `max_arg_bytes`.
    #[error("KEYS/ARGV exceeds configured limit")]
    ArgFrameTooLarge,

    /// KEYS/ARGV frame failed to parse, or `keys_count` exceeded the frame's
    /// item count.
    #[error("invalid KEYS/ARGV encoding")]
    InvalidArgsEncoding(#[from] DecodeError),

    /// Allocating the outbound reply buffer failed.
    #[error("reply encoding failed")]
    ReplyAllocFailed,
}

impl GuestError {
    /// Render the exact bytes `spec.md` §7 and the original source put on
    /// the wire. Only the fuel message is literal-without-prefix by design;
    /// every other message already carries its `"ERR "` prefix, or (for
    /// `LoadFailed`/`ExecFailed` with an interpreter-supplied message) is
    /// passed through verbatim, unprefixed, exactly as the interpreter
    /// produced it.
    pub fn reply_message(&self) -> Vec<u8> {
        match self {
            GuestError::NotInitialized => b"ERR Lua VM not initialized".to_vec(),
            GuestError::LoadFailed(Some(msg)) => msg.clone().into_bytes(),
            GuestError::LoadFailed(None) => b"ERR script load failed".to_vec(),
            GuestError::ExecFailed(Some(msg)) => msg.clone().into_bytes(),
            GuestError::ExecFailed(None) => b"ERR script execution failed".to_vec(),
            GuestError::UnsupportedReturnType => b"ERR unsupported Lua return type".to_vec(),
            GuestError::ReplyTooLarge => b"ERR reply exceeds configured limit".to_vec(),
            GuestError::ArgFrameTooLarge => b"ERR KEYS/ARGV exceeds configured limit".to_vec(),
            GuestError::InvalidArgsEncoding(_) => b"ERR invalid KEYS/ARGV encoding".to_vec(),
            GuestError::ReplyAllocFailed => b"ERR reply encoding failed".to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_initialized_message() {
        assert_eq!(
            GuestError::NotInitialized.reply_message(),
            b"ERR Lua VM not initialized"
        );
    }

    #[test]
    fn load_failed_passes_interpreter_message_through_unprefixed() {
        let err = GuestError::LoadFailed(Some("user_script:1: '=' expected".into()));
        assert_eq!(err.reply_message(), b"user_script:1: '=' expected");
    }

    #[test]
    fn load_failed_default_has_err_prefix() {
        let err = GuestError::LoadFailed(None);
        assert_eq!(err.reply_message(), b"ERR script load failed");
    }

    #[test]
    fn fuel_message_contains_fuel_substring() {
        let err = GuestError::ExecFailed(Some("Script killed by fuel limit".into()));
        let msg = err.reply_message();
        assert!(String::from_utf8_lossy(&msg).contains("fuel"));
    }
}
