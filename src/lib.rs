//! Sandboxed Lua script-execution guest module.
//!
//! Compiled as a `cdylib` targeting `wasm32-wasip1`, this crate embeds a
//! Lua interpreter behind a small export surface (`init`/`reset`/`eval`/
//! `eval_with_args`/`set_limits`/`alloc`/`free`) and a binary reply codec
//! shared with the host on both sides of every call. Three pieces compose
//! the whole thing: [`codec`] (wire format), [`host_bridge`] (the `redis.*`
//! table scripts call out through), and [`runtime`] (interpreter lifecycle,
//! fuel, limits). Everything else is the ambient scaffolding a crate this
//! shape needs: [`errors`], [`limits`], [`memory`], [`sandbox`], [`fuel`],
//! and the four [`auxlibs`].

pub mod auxlibs;
pub mod codec;
pub mod errors;
pub mod exports;
pub mod fuel;
pub mod host_bridge;
pub mod imports;
pub mod limits;
pub mod memory;
pub mod runtime;
pub mod sandbox;

/// ABI version exchanged out of band with the host (not carried on any
/// individual call); bump whenever the export/import table's signatures
/// change in a way that breaks an existing host integration.
pub const ABI_VERSION: u32 = 0;

pub use codec::{DecodeError, Reply};
pub use errors::GuestError;
pub use runtime::Runtime;
