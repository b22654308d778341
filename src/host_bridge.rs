//! The `redis.*` global table: marshals script arguments into host call
//! frames and host replies back into script values.
//!
//! Grounded on the `HostInterface`/`MockHost` split this codebase's sibling
//! execution engine uses to keep host-facing logic unit-testable without a
//! real runtime underneath it: [`HostImports`] is the seam, [`WasmHostImports`]
//! is the real wasm-side implementation, [`MockHostImports`] is an in-memory
//! double used by every test in this module and by `sandbox`'s own tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use mlua::{Lua, Table, Value, Variadic};

use crate::codec::{self, Reply};
use crate::imports::{self, unpack_ptr_len};

const ERR_CALL_REQUIRES_ARGS: &str = "ERR redis.call requires arguments";
const ERR_INVALID_CALL_ARG: &str = "ERR invalid argument to redis.call";
const ERR_EMPTY_HOST_REPLY: &str = "ERR empty reply from host";
const ERR_SHA1_FAILED: &str = "ERR sha1hex failed";
const ERR_LOG_ARGS: &str = "ERR redis.log requires level and message";
const ERR_DECODE_FAILED: &str = "ERR reply decoding failed";

const LOG_DEBUG: i64 = 0;
const LOG_VERBOSE: i64 = 1;
const LOG_NOTICE: i64 = 2;
const LOG_WARNING: i64 = 3;

/// Seam between the `redis.*` Lua functions and whatever actually performs
/// a host call. Operates on already-encoded frames/replies so both
/// implementations share the codec.
pub trait HostImports {
    /// Issue a command; `None` means the host returned an empty reply.
    fn call(&self, frame: &[u8]) -> Option<Vec<u8>>;
    /// Same contract as `call`, used for the non-raising variant.
    fn pcall(&self, frame: &[u8]) -> Option<Vec<u8>>;
    fn log(&self, level: u32, message: &[u8]);
    /// `None` means the host-side hash failed.
    fn sha1hex(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// Real host imports, wired to the `extern "C"` declarations. Only usable
/// on `wasm32`, where guest and host share linear memory and a `(ptr,
/// len)` pair is meaningful across the boundary.
#[cfg(target_arch = "wasm32")]
pub struct WasmHostImports;

#[cfg(target_arch = "wasm32")]
impl HostImports for WasmHostImports {
    fn call(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let packed = unsafe { imports::host_redis_call(frame.as_ptr() as u32, frame.len() as u32) };
        take_host_buffer(packed)
    }

    fn pcall(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let packed = unsafe { imports::host_redis_pcall(frame.as_ptr() as u32, frame.len() as u32) };
        take_host_buffer(packed)
    }

    fn log(&self, level: u32, message: &[u8]) {
        unsafe { imports::host_redis_log(level, message.as_ptr() as u32, message.len() as u32) }
    }

    fn sha1hex(&self, data: &[u8]) -> Option<Vec<u8>> {
        let packed = unsafe { imports::host_sha1hex(data.as_ptr() as u32, data.len() as u32) };
        take_host_buffer(packed)
    }
}

/// Copy a host-owned `(ptr, len)` buffer out of linear memory and release
/// it. The buffer was allocated through the guest's own `alloc` (that's
/// the only allocator whose length-header convention `free` understands),
/// so it's the guest's `free`, not a host import, that releases it. The
/// caller must not read `packed`'s pointer again afterward.
#[cfg(target_arch = "wasm32")]
fn take_host_buffer(packed: i64) -> Option<Vec<u8>> {
    let (ptr, len) = unpack_ptr_len(packed);
    if ptr == 0 || len == 0 {
        return None;
    }
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) }.to_vec();
    unsafe { crate::memory::guest_free(ptr as *mut u8) };
    Some(bytes)
}

/// In-memory double for tests: canned replies queued per call kind, plus a
/// captured log and a configurable SHA1 stand-in.
#[derive(Default)]
pub struct MockHostImports {
    call_replies: RefCell<VecDeque<Option<Vec<u8>>>>,
    pcall_replies: RefCell<VecDeque<Option<Vec<u8>>>>,
    sha1_replies: RefCell<VecDeque<Option<Vec<u8>>>>,
    pub logged: RefCell<Vec<(u32, Vec<u8>)>>,
}

impl MockHostImports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_call_reply(&self, reply: &Reply) {
        let bytes = codec::encode_reply(reply).expect("reply within depth limit");
        self.call_replies.borrow_mut().push_back(Some(bytes));
    }

    pub fn push_pcall_reply(&self, reply: &Reply) {
        let bytes = codec::encode_reply(reply).expect("reply within depth limit");
        self.pcall_replies.borrow_mut().push_back(Some(bytes));
    }

    pub fn push_empty_call_reply(&self) {
        self.call_replies.borrow_mut().push_back(None);
    }

    pub fn push_sha1(&self, hex: &[u8]) {
        self.sha1_replies.borrow_mut().push_back(Some(hex.to_vec()));
    }
}

impl HostImports for MockHostImports {
    fn call(&self, _frame: &[u8]) -> Option<Vec<u8>> {
        self.call_replies.borrow_mut().pop_front().flatten()
    }

    fn pcall(&self, _frame: &[u8]) -> Option<Vec<u8>> {
        self.pcall_replies.borrow_mut().pop_front().flatten()
    }

    fn log(&self, level: u32, message: &[u8]) {
        self.logged.borrow_mut().push((level, message.to_vec()));
    }

    fn sha1hex(&self, _data: &[u8]) -> Option<Vec<u8>> {
        self.sha1_replies.borrow_mut().pop_front().flatten()
    }
}

/// Convert one script argument into the byte string `redis.call` sends to
/// the host: strings and numbers pass through as their textual form,
/// booleans become `"1"`/`"0"`, everything else has no representation.
fn arg_to_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Integer(i) => Some(i.to_string().into_bytes()),
        Value::Number(n) => Some(lua_number_to_bytes(*n)),
        Value::Boolean(b) => Some(if *b { b"1".to_vec() } else { b"0".to_vec() }),
        _ => None,
    }
}

fn lua_number_to_bytes(n: f64) -> Vec<u8> {
    if n == n.trunc() && n.is_finite() {
        format!("{}", n as i64).into_bytes()
    } else {
        format!("{}", n).into_bytes()
    }
}

/// Convert a decoded host reply into a script value. `raise_on_error`
/// threads through every recursive call, matching `call`'s all-levels
/// raising and `pcall`'s all-levels table-wrapping.
fn reply_to_value(lua: &Lua, reply: Reply, raise_on_error: bool) -> mlua::Result<Value> {
    match reply {
        Reply::Null => Ok(Value::Nil),
        Reply::Int(v) => Ok(Value::Number(v as f64)),
        Reply::Bulk(bytes) => Ok(Value::String(lua.create_string(&bytes)?)),
        Reply::Status(bytes) => {
            let table = lua.create_table()?;
            table.set("ok", lua.create_string(&bytes)?)?;
            Ok(Value::Table(table))
        }
        Reply::Error(bytes) => {
            if raise_on_error {
                let message = String::from_utf8_lossy(&bytes).into_owned();
                Err(mlua::Error::RuntimeError(message))
            } else {
                let table = lua.create_table()?;
                table.set("err", lua.create_string(&bytes)?)?;
                Ok(Value::Table(table))
            }
        }
        Reply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                let value = reply_to_value(lua, item, raise_on_error)?;
                table.raw_set((i + 1) as i64, value)?;
            }
            Ok(Value::Table(table))
        }
    }
}

fn redis_call_common(
    lua: &Lua,
    imports: &dyn HostImports,
    args: Variadic<Value>,
    raise_on_error: bool,
) -> mlua::Result<Value> {
    if args.is_empty() {
        return Err(mlua::Error::RuntimeError(ERR_CALL_REQUIRES_ARGS.to_string()));
    }
    let mut argv = Vec::with_capacity(args.len());
    for arg in args.iter() {
        match arg_to_bytes(arg) {
            Some(bytes) => argv.push(bytes),
            None => return Err(mlua::Error::RuntimeError(ERR_INVALID_CALL_ARG.to_string())),
        }
    }
    let frame = codec::build_request(&argv);
    let reply_bytes = if raise_on_error {
        imports.call(&frame)
    } else {
        imports.pcall(&frame)
    };
    let reply_bytes = reply_bytes.ok_or_else(|| mlua::Error::RuntimeError(ERR_EMPTY_HOST_REPLY.to_string()))?;

    let mut offset = 0;
    let reply = codec::decode_reply(&reply_bytes, &mut offset)
        .map_err(|_| mlua::Error::RuntimeError(ERR_DECODE_FAILED.to_string()))?;
    reply_to_value(lua, reply, raise_on_error)
}

fn push_wrapped_table(lua: &Lua, field: &str, message: mlua::String) -> mlua::Result<Value> {
    let table = lua.create_table()?;
    table.set(field, message)?;
    Ok(Value::Table(table))
}

struct RespVersion(Cell<i64>);

/// Build the `redis` global table and install it, wiring every function to
/// the given `imports`.
pub fn register(lua: &Lua, imports: Rc<dyn HostImports>) -> mlua::Result<()> {
    let table: Table = lua.create_table()?;

    let call_imports = imports.clone();
    table.set(
        "call",
        lua.create_function(move |lua, args: Variadic<Value>| {
            redis_call_common(lua, call_imports.as_ref(), args, true)
        })?,
    )?;

    let pcall_imports = imports.clone();
    table.set(
        "pcall",
        lua.create_function(move |lua, args: Variadic<Value>| {
            redis_call_common(lua, pcall_imports.as_ref(), args, false)
        })?,
    )?;

    let log_imports = imports.clone();
    table.set(
        "log",
        lua.create_function(move |_, args: Variadic<Value>| {
            if args.len() < 2 {
                return Err(mlua::Error::RuntimeError(ERR_LOG_ARGS.to_string()));
            }
            let level = match &args[0] {
                Value::Integer(i) => *i as u32,
                Value::Number(n) => *n as u32,
                Value::String(s) => s
                    .to_str()
                    .ok()
                    .and_then(|text| text.trim().parse::<f64>().ok())
                    .map(|n| n as u32)
                    .ok_or_else(|| mlua::Error::RuntimeError(ERR_LOG_ARGS.to_string()))?,
                _ => return Err(mlua::Error::RuntimeError(ERR_LOG_ARGS.to_string())),
            };
            let message = match &args[1] {
                Value::String(s) => s.as_bytes().to_vec(),
                other => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "ERR redis.log message must be a string, got {}",
                        other.type_name()
                    )))
                }
            };
            log_imports.log(level, &message);
            Ok(())
        })?,
    )?;

    let sha1_imports = imports.clone();
    table.set(
        "sha1hex",
        lua.create_function(move |lua, data: mlua::String| {
            let digest = sha1_imports
                .sha1hex(data.as_bytes())
                .ok_or_else(|| mlua::Error::RuntimeError(ERR_SHA1_FAILED.to_string()))?;
            lua.create_string(&digest)
        })?,
    )?;

    table.set(
        "error_reply",
        lua.create_function(|lua, message: mlua::String| push_wrapped_table(lua, "err", message))?,
    )?;

    table.set(
        "status_reply",
        lua.create_function(|lua, message: mlua::String| push_wrapped_table(lua, "ok", message))?,
    )?;

    lua.set_app_data(RespVersion(Cell::new(2)));
    table.set(
        "setresp",
        lua.create_function(|lua, version: i64| {
            let state = lua.app_data_ref::<RespVersion>().expect("RespVersion installed at register");
            let previous = state.0.replace(version);
            Ok(previous as f64)
        })?,
    )?;

    table.set("LOG_DEBUG", LOG_DEBUG)?;
    table.set("LOG_VERBOSE", LOG_VERBOSE)?;
    table.set("LOG_NOTICE", LOG_NOTICE)?;
    table.set("LOG_WARNING", LOG_WARNING)?;

    lua.globals().set("redis", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua_with_mock() -> (Lua, Rc<MockHostImports>) {
        let lua = Lua::new();
        let mock = Rc::new(MockHostImports::new());
        register(&lua, mock.clone() as Rc<dyn HostImports>).unwrap();
        (lua, mock)
    }

    #[test]
    fn call_with_no_args_fails() {
        let (lua, _mock) = lua_with_mock();
        let err = lua.load("return redis.call()").exec().unwrap_err();
        assert!(err.to_string().contains("requires arguments"));
    }

    #[test]
    fn call_decodes_status_reply_as_ok_table() {
        let (lua, mock) = lua_with_mock();
        mock.push_call_reply(&Reply::Status(b"OK".to_vec()));
        let result: Table = lua
            .load("return redis.call('set', 'k', 'v')")
            .eval()
            .unwrap();
        let ok: String = result.get("ok").unwrap();
        assert_eq!(ok, "OK");
    }

    #[test]
    fn call_raises_on_error_reply() {
        let (lua, mock) = lua_with_mock();
        mock.push_call_reply(&Reply::Error(b"ERR no such key".to_vec()));
        let err = lua.load("return redis.call('get', 'missing')").exec().unwrap_err();
        assert!(err.to_string().contains("no such key"));
    }

    #[test]
    fn pcall_wraps_error_reply_instead_of_raising() {
        let (lua, mock) = lua_with_mock();
        mock.push_pcall_reply(&Reply::Error(b"ERR no such key".to_vec()));
        let result: Table = lua
            .load("return redis.pcall('get', 'missing')")
            .eval()
            .unwrap();
        let err: String = result.get("err").unwrap();
        assert_eq!(err, "ERR no such key");
    }

    #[test]
    fn empty_host_reply_fails() {
        let (lua, mock) = lua_with_mock();
        mock.push_empty_call_reply();
        let err = lua.load("return redis.call('x')").exec().unwrap_err();
        assert!(err.to_string().contains("empty reply"));
    }

    #[test]
    fn boolean_argument_encodes_as_one_or_zero() {
        assert_eq!(arg_to_bytes(&Value::Boolean(true)), Some(b"1".to_vec()));
        assert_eq!(arg_to_bytes(&Value::Boolean(false)), Some(b"0".to_vec()));
    }

    #[test]
    fn table_argument_has_no_representation() {
        let lua = Lua::new();
        let t = lua.create_table().unwrap();
        assert_eq!(arg_to_bytes(&Value::Table(t)), None);
    }

    #[test]
    fn setresp_returns_previous_version_and_is_otherwise_inert() {
        let (lua, _mock) = lua_with_mock();
        let previous: i64 = lua.load("return redis.setresp(3)").eval().unwrap();
        assert_eq!(previous, 2);
        let previous2: i64 = lua.load("return redis.setresp(2)").eval().unwrap();
        assert_eq!(previous2, 3);
    }

    #[test]
    fn log_captures_level_and_message() {
        let (lua, mock) = lua_with_mock();
        lua.load("redis.log(redis.LOG_WARNING, 'careful')").exec().unwrap();
        assert_eq!(mock.logged.borrow()[0], (3, b"careful".to_vec()));
    }

    #[test]
    fn log_coerces_a_numeric_string_level() {
        let (lua, mock) = lua_with_mock();
        lua.load("redis.log('3', 'careful')").exec().unwrap();
        assert_eq!(mock.logged.borrow()[0], (3, b"careful".to_vec()));
    }
}
