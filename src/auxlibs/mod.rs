//! The four auxiliary libraries the sandbox exposes as globals:
//! `cjson`, `cmsgpack`, `struct`, and `bit`. None of these come from the
//! interpreter itself; each is registered the way the runtime installs its
//! own host API table, as a plain Lua table of Rust closures.

pub mod bitlib;
pub mod cjson;
pub mod msgpack;
pub mod structlib;

use mlua::{Lua, Value};

/// Convert a Lua value into a `serde_json::Value`, the shared intermediate
/// representation `cjson` and `cmsgpack` both serialize from/into. Lua has
/// no array/object distinction in its table type, so a table is treated as
/// a JSON array only when it is a dense `1..n` sequence with no other
/// keys; everything else becomes a JSON object with string keys.
pub fn lua_to_json(value: &Value) -> mlua::Result<serde_json::Value> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(i) => Ok(serde_json::Value::from(*i)),
        Value::Number(n) => Ok(serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_owned())),
        Value::Table(t) => {
            let len = t.raw_len();
            let is_sequence = len > 0
                && t.clone().pairs::<Value, Value>().count() == len
                && (1..=len).all(|i| t.raw_get::<_, Value>(i as i64).map(|v| !matches!(v, Value::Nil)).unwrap_or(false));
            if is_sequence {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: Value = t.raw_get(i as i64)?;
                    items.push(lua_to_json(&item)?);
                }
                Ok(serde_json::Value::Array(items))
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.clone().pairs::<Value, Value>() {
                    let (k, v) = pair?;
                    let key = match k {
                        Value::String(s) => s.to_str()?.to_owned(),
                        Value::Integer(i) => i.to_string(),
                        Value::Number(n) => n.to_string(),
                        other => {
                            return Err(mlua::Error::RuntimeError(format!(
                                "unsupported table key type {}",
                                other.type_name()
                            )))
                        }
                    };
                    map.insert(key, lua_to_json(&v)?);
                }
                Ok(serde_json::Value::Object(map))
            }
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "cannot encode {} value",
            other.type_name()
        ))),
    }
}

/// The inverse of [`lua_to_json`]. JSON arrays become 1-indexed sequence
/// tables, JSON objects become string-keyed tables.
pub fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s)?)),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set((i + 1) as i64, json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Register all four auxiliary libraries as globals on `lua`.
pub fn install(lua: &Lua) -> mlua::Result<()> {
    cjson::install(lua)?;
    msgpack::install(lua)?;
    structlib::install(lua)?;
    bitlib::install(lua)?;
    Ok(())
}
