//! `bit.*`: 32-bit bitwise operations over Lua's double-precision numbers,
//! matching LuaBitOp's wraparound semantics (every result is a signed
//! 32-bit integer, reduced modulo 2^32 from the argument first).

use mlua::{Lua, Variadic};

fn tobit(n: f64) -> i32 {
    (n as i64 as u32) as i32
}

fn tohex(n: i32) -> String {
    format!("{:08x}", n as u32)
}

pub fn install(lua: &Lua) -> mlua::Result<()> {
    let table = lua.create_table()?;

    table.set("tobit", lua.create_function(|_, n: f64| Ok(tobit(n) as i64))?)?;
    table.set("tohex", lua.create_function(|_, n: f64| Ok(tohex(tobit(n))))?)?;
    table.set("bnot", lua.create_function(|_, n: f64| Ok(!tobit(n) as i64))?)?;

    table.set(
        "band",
        lua.create_function(|_, args: Variadic<f64>| {
            Ok(args.iter().fold(-1i32, |acc, n| acc & tobit(*n)) as i64)
        })?,
    )?;
    table.set(
        "bor",
        lua.create_function(|_, args: Variadic<f64>| {
            Ok(args.iter().fold(0i32, |acc, n| acc | tobit(*n)) as i64)
        })?,
    )?;
    table.set(
        "bxor",
        lua.create_function(|_, args: Variadic<f64>| {
            Ok(args.iter().fold(0i32, |acc, n| acc ^ tobit(*n)) as i64)
        })?,
    )?;

    table.set(
        "lshift",
        lua.create_function(|_, (n, shift): (f64, u32)| Ok((tobit(n) << (shift & 31)) as i64))?,
    )?;
    table.set(
        "rshift",
        lua.create_function(|_, (n, shift): (f64, u32)| {
            Ok(((tobit(n) as u32) >> (shift & 31)) as i32 as i64)
        })?,
    )?;
    table.set(
        "arshift",
        lua.create_function(|_, (n, shift): (f64, u32)| Ok((tobit(n) >> (shift & 31)) as i64))?,
    )?;

    table.set(
        "rol",
        lua.create_function(|_, (n, shift): (f64, u32)| {
            Ok((tobit(n) as u32).rotate_left(shift & 31) as i32 as i64)
        })?,
    )?;
    table.set(
        "ror",
        lua.create_function(|_, (n, shift): (f64, u32)| {
            Ok((tobit(n) as u32).rotate_right(shift & 31) as i32 as i64)
        })?,
    )?;

    lua.globals().set("bit", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_reduces_arguments() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let v: i64 = lua.load("return bit.band(0xFF, 0x0F)").eval().unwrap();
        assert_eq!(v, 0x0F);
    }

    #[test]
    fn bnot_wraps_to_32_bits() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let v: i64 = lua.load("return bit.bnot(0)").eval().unwrap();
        assert_eq!(v, -1);
    }

    #[test]
    fn lshift_wraps_modulo_32() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let v: i64 = lua.load("return bit.lshift(1, 31)").eval().unwrap();
        assert_eq!(v, i32::MIN as i64);
    }

    #[test]
    fn tohex_formats_eight_digits() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let v: String = lua.load("return bit.tohex(255)").eval().unwrap();
        assert_eq!(v, "000000ff");
    }
}
