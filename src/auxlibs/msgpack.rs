//! `cmsgpack.pack`/`cmsgpack.unpack`, backed by `rmp-serde` over the same
//! `serde_json::Value` intermediate `cjson` uses.

use mlua::{Lua, Value};

use super::{json_to_lua, lua_to_json};

pub fn install(lua: &Lua) -> mlua::Result<()> {
    let table = lua.create_table()?;

    table.set(
        "pack",
        lua.create_function(|lua, value: Value| {
            let json = lua_to_json(&value)?;
            let bytes = rmp_serde::to_vec(&json).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            lua.create_string(&bytes)
        })?,
    )?;

    table.set(
        "unpack",
        lua.create_function(|lua, data: mlua::String| {
            let json: serde_json::Value = rmp_serde::from_slice(data.as_bytes())
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            json_to_lua(lua, &json)
        })?,
    )?;

    lua.globals().set("cmsgpack", table)
}
