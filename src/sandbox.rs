//! Interpreter construction: which standard globals exist, which don't,
//! and what gets registered in their place.
//!
//! Only `base`, `table`, `string`, and `math` are opened. Everything with
//! any capability to touch the outside world, the filesystem, or
//! wall-clock/process entropy is left closed, and then nil'd out again
//! defensively in case a future `mlua` version starts opening more by
//! default than we asked for.

use std::rc::Rc;

use mlua::{Lua, StdLib, Table};

use crate::auxlibs;
use crate::host_bridge::{self, HostImports};

const NON_DETERMINISTIC_GLOBALS: &[&str] = &["io", "os", "debug", "package", "require", "dofile", "loadfile"];

/// Build a fresh interpreter with only the allowed standard libraries,
/// the `redis` host bridge, and the four auxiliary libraries installed.
pub fn new_sandboxed_lua(imports: Rc<dyn HostImports>) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::BASE | StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        mlua::LuaOptions::new(),
    )?;

    disable_non_determinism(&lua)?;
    host_bridge::register(&lua, imports)?;
    auxlibs::install(&lua)?;

    Ok(lua)
}

/// Remove every global the sandbox doesn't allow, plus `math.random` and
/// `math.randomseed` specifically (the rest of `math` is deterministic).
/// Runs even though [`StdLib`] selection above should already guarantee
/// these are absent; this is cheap and keeps the guarantee independent of
/// exactly which libraries `mlua`/Lua decide `StdLib::BASE` implies.
fn disable_non_determinism(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in NON_DETERMINISTIC_GLOBALS {
        globals.set(*name, mlua::Value::Nil)?;
    }
    if let Ok(math) = globals.get::<_, Table>("math") {
        math.set("random", mlua::Value::Nil)?;
        math.set("randomseed", mlua::Value::Nil)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_bridge::MockHostImports;

    fn lua() -> Lua {
        new_sandboxed_lua(Rc::new(MockHostImports::new())).unwrap()
    }

    #[test]
    fn io_os_debug_are_absent() {
        let lua = lua();
        for name in ["io", "os", "debug", "package", "require", "dofile", "loadfile"] {
            let v: mlua::Value = lua.globals().get(name).unwrap();
            assert!(matches!(v, mlua::Value::Nil), "{name} should be nil");
        }
    }

    #[test]
    fn math_random_is_absent_but_math_itself_works() {
        let lua = lua();
        let math: Table = lua.globals().get("math").unwrap();
        let random: mlua::Value = math.get("random").unwrap();
        assert!(matches!(random, mlua::Value::Nil));
        let floor: i64 = lua.load("return math.floor(3.7)").eval().unwrap();
        assert_eq!(floor, 3);
    }

    #[test]
    fn table_and_string_libs_are_available() {
        let lua = lua();
        let upper: String = lua.load("return string.upper('ok')").eval().unwrap();
        assert_eq!(upper, "OK");
        let n: i64 = lua.load("local t = {1,2,3} return #t").eval().unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn aux_libraries_are_present_as_tables() {
        let lua = lua();
        for name in ["cjson", "cmsgpack", "struct", "bit"] {
            let v: mlua::Value = lua.globals().get(name).unwrap();
            assert!(matches!(v, mlua::Value::Table(_)), "{name} should be a table");
        }
    }

    #[test]
    fn redis_table_is_registered() {
        let lua = lua();
        let v: mlua::Value = lua.globals().get("redis").unwrap();
        assert!(matches!(v, mlua::Value::Table(_)));
    }
}
