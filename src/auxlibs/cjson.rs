//! `cjson.encode`/`cjson.decode`, backed by `serde_json`.

use mlua::{Lua, Value};

use super::{json_to_lua, lua_to_json};

pub fn install(lua: &Lua) -> mlua::Result<()> {
    let table = lua.create_table()?;

    table.set(
        "encode",
        lua.create_function(|_, value: Value| {
            let json = lua_to_json(&value)?;
            serde_json::to_string(&json).map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        })?,
    )?;

    table.set(
        "decode",
        lua.create_function(|lua, text: mlua::String| {
            let json: serde_json::Value = serde_json::from_slice(text.as_bytes())
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            json_to_lua(lua, &json)
        })?,
    )?;

    lua.globals().set("cjson", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_object() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let decoded: mlua::Table = lua
            .load(r#"return cjson.decode(cjson.encode({foo = "bar", n = 3}))"#)
            .eval()
            .unwrap();
        let foo: String = decoded.get("foo").unwrap();
        let n: i64 = decoded.get("n").unwrap();
        assert_eq!(foo, "bar");
        assert_eq!(n, 3);
    }

    #[test]
    fn encodes_sequence_as_array() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let out: String = lua.load("return cjson.encode({1, 2, 3})").eval().unwrap();
        assert_eq!(out, "[1,2,3]");
    }
}
