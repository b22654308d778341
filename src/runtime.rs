//! Guest lifecycle: `init`/`reset`/`eval`/`eval_with_args`/`set_limits`.
//!
//! Owns the interpreter, the fuel counter, and the active [`Limits`]; ties
//! together the sandbox, the codec, and the host bridge into the four
//! operations the exports module calls directly.

use std::rc::Rc;

use mlua::{Lua, Table, Value};

use crate::codec::{self, Reply, MAX_REPLY_DEPTH};
use crate::errors::GuestError;
use crate::fuel::{self, FuelCounter};
use crate::host_bridge::HostImports;
use crate::limits::Limits;
use crate::sandbox;

pub struct Runtime {
    lua: Option<Lua>,
    limits: Limits,
    fuel_counter: Option<FuelCounter>,
    imports: Rc<dyn HostImports>,
}

impl Runtime {
    pub fn new(imports: Rc<dyn HostImports>) -> Self {
        Runtime {
            lua: None,
            limits: Limits::default(),
            fuel_counter: None,
            imports,
        }
    }

    /// Destroy any existing interpreter and build a fresh one.
    pub fn init(&mut self) -> Result<(), GuestError> {
        self.rebuild()
    }

    /// Like `init`, but only valid when an interpreter already exists.
    pub fn reset(&mut self) -> Result<(), GuestError> {
        if self.lua.is_none() {
            return Err(GuestError::NotInitialized);
        }
        self.rebuild()
    }

    fn rebuild(&mut self) -> Result<(), GuestError> {
        self.lua = None;
        self.fuel_counter = None;
        let lua = sandbox::new_sandboxed_lua(self.imports.clone())
            .map_err(|e| GuestError::LoadFailed(Some(format!("sandbox setup failed: {e}"))))?;
        let counter = FuelCounter::new(self.limits.fuel);
        fuel::install(&lua, counter.clone())
            .map_err(|e| GuestError::LoadFailed(Some(format!("fuel hook install failed: {e}"))))?;
        self.lua = Some(lua);
        self.fuel_counter = Some(counter);
        Ok(())
    }

    /// `fuel == 0` keeps the current budget; the byte caps always replace.
    pub fn set_limits(&mut self, fuel: i64, max_reply_bytes: u32, max_arg_bytes: u32) {
        self.limits.apply(fuel, max_reply_bytes, max_arg_bytes);
        if let Some(counter) = &self.fuel_counter {
            counter.reset(self.limits.fuel);
        }
    }

    pub fn eval(&mut self, script: &[u8]) -> Vec<u8> {
        self.run(script, None)
    }

    pub fn eval_with_args(&mut self, script: &[u8], args_frame: &[u8], keys_count: u32) -> Vec<u8> {
        self.run(script, Some((args_frame, keys_count)))
    }

    // The `max_reply_bytes` cap only governs a script's own successful
    // return value (eval()'s steps 6-7); error replies (VM not initialized,
    // load/exec failure, fuel exhaustion) are returned as-is regardless of
    // size, so the cap is enforced inside `eval_inner`'s success path, not
    // uniformly here.
    fn run(&mut self, script: &[u8], args: Option<(&[u8], u32)>) -> Vec<u8> {
        let reply = match self.eval_inner(script, args) {
            Ok(reply) => reply,
            Err(e) => Reply::Error(e.reply_message()),
        };
        codec::encode_reply(&reply).unwrap_or_else(|_| {
            codec::encode_reply(&Reply::Error(GuestError::ReplyTooLarge.reply_message()))
                .expect("error reply always encodes")
        })
    }

    fn eval_inner(&mut self, script: &[u8], args: Option<(&[u8], u32)>) -> Result<Reply, GuestError> {
        let lua = self.lua.as_ref().ok_or(GuestError::NotInitialized)?;

        let frame_len = args.map(|(frame, _)| frame.len()).unwrap_or(0);
        if !self.limits.arg_frame_fits(frame_len) {
            return Err(GuestError::ArgFrameTooLarge);
        }

        if let Some(counter) = &self.fuel_counter {
            counter.reset(self.limits.fuel);
        }

        match args {
            Some((frame, keys_count)) => {
                let items = codec::parse_request(frame, keys_count)?;
                set_keys_argv(lua, &items, keys_count)?;
            }
            None => set_empty_keys_argv(lua)?,
        }

        let function = lua
            .load(script)
            .into_function()
            .map_err(|e| GuestError::LoadFailed(Some(clean_mlua_error(&e))))?;
        let mut results: mlua::MultiValue = function
            .call(())
            .map_err(|e| GuestError::ExecFailed(Some(clean_mlua_error(&e))))?;

        // A script that returns nothing at all (an empty stack, distinct
        // from explicitly returning nil) defaults to a status reply, not
        // a null one.
        let reply = match results.pop_front() {
            Some(value) => lua_value_to_reply(value, 0)?,
            None => Reply::Status(b"OK".to_vec()),
        };

        let encoded_len = codec::encode_reply(&reply).map(|b| b.len()).unwrap_or(usize::MAX);
        if !self.limits.reply_fits(encoded_len) {
            return Err(GuestError::ReplyTooLarge);
        }
        Ok(reply)
    }
}

fn set_keys_argv(lua: &Lua, items: &[Vec<u8>], keys_count: u32) -> Result<(), GuestError> {
    let to_lua_err = |e: mlua::Error| GuestError::ExecFailed(Some(format!("KEYS/ARGV setup failed: {e}")));

    let keys_count = keys_count as usize;
    let keys = lua.create_table().map_err(to_lua_err)?;
    for (i, item) in items[..keys_count].iter().enumerate() {
        let s = lua.create_string(item).map_err(to_lua_err)?;
        keys.raw_set((i + 1) as i64, s).map_err(to_lua_err)?;
    }

    let argv = lua.create_table().map_err(to_lua_err)?;
    for (i, item) in items[keys_count..].iter().enumerate() {
        let s = lua.create_string(item).map_err(to_lua_err)?;
        argv.raw_set((i + 1) as i64, s).map_err(to_lua_err)?;
    }

    lua.globals().set("KEYS", keys).map_err(to_lua_err)?;
    lua.globals().set("ARGV", argv).map_err(to_lua_err)
}

fn set_empty_keys_argv(lua: &Lua) -> Result<(), GuestError> {
    let to_lua_err = |e: mlua::Error| GuestError::ExecFailed(Some(format!("KEYS/ARGV setup failed: {e}")));
    lua.globals().set("KEYS", lua.create_table().map_err(to_lua_err)?).map_err(to_lua_err)?;
    lua.globals().set("ARGV", lua.create_table().map_err(to_lua_err)?).map_err(to_lua_err)
}

/// Convert the script's top-of-stack return value into a `Reply`. Tables
/// are checked for `ok`/`err` fields first (status/error replies), then
/// treated as a 1-indexed sequence; any other type has no representation.
/// `false` becomes `Null` and `true` becomes `Int(1)`, the long-standing
/// convention for boolean returns in this style of embedding.
fn lua_value_to_reply(value: Value, depth: usize) -> Result<Reply, GuestError> {
    if depth > MAX_REPLY_DEPTH {
        return Err(GuestError::ReplyTooLarge);
    }
    match value {
        Value::Nil => Ok(Reply::Null),
        Value::Boolean(false) => Ok(Reply::Null),
        Value::Boolean(true) => Ok(Reply::Int(1)),
        Value::Integer(i) => Ok(Reply::Int(i)),
        Value::Number(n) => Ok(number_to_reply(n)),
        Value::String(s) => Ok(Reply::Bulk(s.as_bytes().to_vec())),
        Value::Table(t) => table_to_reply(t, depth),
        _ => Err(GuestError::UnsupportedReturnType),
    }
}

/// A Lua number is an integer reply iff it equals its own truncation —
/// the only distinction Lua 5.1's single numeric type makes. Anything else
/// falls back to its string form, exactly as `tostring` would render it.
fn number_to_reply(n: f64) -> Reply {
    let truncated = n as i64;
    if n == truncated as f64 {
        Reply::Int(truncated)
    } else {
        Reply::Bulk(format!("{n}").into_bytes())
    }
}

fn table_to_reply(t: Table, depth: usize) -> Result<Reply, GuestError> {
    let to_unsupported = |_| GuestError::UnsupportedReturnType;

    if let Ok(Value::String(s)) = t.get::<_, Value>("ok") {
        return Ok(Reply::Status(s.as_bytes().to_vec()));
    }
    if let Ok(Value::String(s)) = t.get::<_, Value>("err") {
        return Ok(Reply::Error(s.as_bytes().to_vec()));
    }

    let len = t.raw_len();
    let mut items = Vec::with_capacity(len);
    for i in 1..=len {
        let item: Value = t.raw_get(i as i64).map_err(to_unsupported)?;
        if matches!(item, Value::Nil) {
            break;
        }
        items.push(lua_value_to_reply(item, depth + 1)?);
    }
    Ok(Reply::Array(items))
}

fn clean_mlua_error(e: &mlua::Error) -> String {
    match e {
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => clean_mlua_error(cause),
        other => other.to_string(),
    }
}
