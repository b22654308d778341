//! `struct.pack`/`struct.unpack`: a subset of Roberto Ierusalimschy's
//! `struct` library covering the format characters scripts actually use
//! for wire-level packing (`<`/`>` byte order, `b`/`B`, `h`/`H`, `i`/`I`,
//! `f`, `d`, and `c<n>` fixed-width byte strings).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use mlua::{Lua, Value, Variadic};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

enum Op {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
    Bytes(usize),
}

fn parse_format(fmt: &str) -> Result<Vec<Op>, String> {
    let mut ops = Vec::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' | '>' | '=' | '!' | ' ' => continue,
            'b' => ops.push(Op::I8),
            'B' => ops.push(Op::U8),
            'h' => ops.push(Op::I16),
            'H' => ops.push(Op::U16),
            'i' | 'l' => ops.push(Op::I32),
            'I' | 'L' => ops.push(Op::U32),
            'f' => ops.push(Op::F32),
            'd' => ops.push(Op::F64),
            'c' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(*d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: usize = digits.parse().map_err(|_| "c requires a length".to_string())?;
                ops.push(Op::Bytes(n));
            }
            other => return Err(format!("unsupported struct format character '{other}'")),
        }
    }
    Ok(ops)
}

fn endian_of(fmt: &str) -> Endian {
    match fmt.chars().find(|c| *c == '<' || *c == '>') {
        Some('<') => Endian::Little,
        _ => Endian::Big,
    }
}

fn write_int(buf: &mut Vec<u8>, endian: Endian, bytes: &[u8]) {
    match endian {
        Endian::Little => buf.extend_from_slice(bytes),
        Endian::Big => buf.extend(bytes.iter().rev()),
    }
}

fn pack(format: &str, args: &[Value]) -> mlua::Result<Vec<u8>> {
    let ops = parse_format(format).map_err(mlua::Error::RuntimeError)?;
    let endian = endian_of(format);
    let mut buf = Vec::new();
    let mut args = args.iter();
    for op in ops {
        match op {
            Op::Bytes(n) => {
                let value = args
                    .next()
                    .ok_or_else(|| mlua::Error::RuntimeError("struct.pack: missing argument".into()))?;
                let s = match value {
                    Value::String(s) => s.as_bytes().to_vec(),
                    other => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "struct.pack: expected string, got {}",
                            other.type_name()
                        )))
                    }
                };
                let mut fixed = vec![0u8; n];
                let copy_len = s.len().min(n);
                fixed[..copy_len].copy_from_slice(&s[..copy_len]);
                buf.extend_from_slice(&fixed);
            }
            _ => {
                let value = args
                    .next()
                    .ok_or_else(|| mlua::Error::RuntimeError("struct.pack: missing argument".into()))?;
                let n = match value {
                    Value::Integer(i) => *i as f64,
                    Value::Number(n) => *n,
                    other => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "struct.pack: expected number, got {}",
                            other.type_name()
                        )))
                    }
                };
                match op {
                    Op::I8 => buf.push(n as i8 as u8),
                    Op::U8 => buf.push(n as u8),
                    Op::I16 => {
                        let mut tmp = [0u8; 2];
                        BigEndian::write_i16(&mut tmp, n as i16);
                        write_int(&mut buf, endian, &tmp);
                    }
                    Op::U16 => {
                        let mut tmp = [0u8; 2];
                        BigEndian::write_u16(&mut tmp, n as u16);
                        write_int(&mut buf, endian, &tmp);
                    }
                    Op::I32 => {
                        let mut tmp = [0u8; 4];
                        BigEndian::write_i32(&mut tmp, n as i32);
                        write_int(&mut buf, endian, &tmp);
                    }
                    Op::U32 => {
                        let mut tmp = [0u8; 4];
                        BigEndian::write_u32(&mut tmp, n as u32);
                        write_int(&mut buf, endian, &tmp);
                    }
                    Op::F32 => {
                        let mut tmp = [0u8; 4];
                        BigEndian::write_f32(&mut tmp, n as f32);
                        write_int(&mut buf, endian, &tmp);
                    }
                    Op::F64 => {
                        let mut tmp = [0u8; 8];
                        BigEndian::write_f64(&mut tmp, n);
                        write_int(&mut buf, endian, &tmp);
                    }
                    Op::Bytes(_) => unreachable!(),
                }
            }
        }
    }
    Ok(buf)
}

fn read_int(data: &[u8], endian: Endian, len: usize) -> Vec<u8> {
    let mut tmp = data[..len].to_vec();
    if endian == Endian::Little {
        tmp.reverse();
    }
    tmp
}

fn unpack(lua: &Lua, format: &str, data: &[u8], start: usize) -> mlua::Result<Vec<Value>> {
    let ops = parse_format(format).map_err(mlua::Error::RuntimeError)?;
    let endian = endian_of(format);
    let mut pos = start;
    let mut out = Vec::new();
    for op in ops {
        let size = match op {
            Op::I8 | Op::U8 => 1,
            Op::I16 | Op::U16 => 2,
            Op::I32 | Op::U32 | Op::F32 => 4,
            Op::F64 => 8,
            Op::Bytes(n) => n,
        };
        if data.len().saturating_sub(pos) < size {
            return Err(mlua::Error::RuntimeError("struct.unpack: data too short".into()));
        }
        let slice = &data[pos..pos + size];
        let value = match op {
            Op::I8 => Value::Integer(slice[0] as i8 as i64),
            Op::U8 => Value::Integer(slice[0] as i64),
            Op::I16 => Value::Integer(BigEndian::read_i16(&read_int(slice, endian, 2)) as i64),
            Op::U16 => Value::Integer(BigEndian::read_u16(&read_int(slice, endian, 2)) as i64),
            Op::I32 => Value::Integer(BigEndian::read_i32(&read_int(slice, endian, 4)) as i64),
            Op::U32 => Value::Integer(BigEndian::read_u32(&read_int(slice, endian, 4)) as i64),
            Op::F32 => Value::Number(BigEndian::read_f32(&read_int(slice, endian, 4)) as f64),
            Op::F64 => Value::Number(BigEndian::read_f64(&read_int(slice, endian, 8))),
            Op::Bytes(n) => Value::String(lua.create_string(&slice[..n])?),
        };
        out.push(value);
        pos += size;
    }
    out.push(Value::Integer((pos + 1) as i64));
    Ok(out)
}

pub fn install(lua: &Lua) -> mlua::Result<()> {
    let table = lua.create_table()?;

    table.set(
        "pack",
        lua.create_function(|_, (format, args): (String, Variadic<Value>)| pack(&format, &args))?,
    )?;

    table.set(
        "unpack",
        lua.create_function(|lua, (format, data, pos): (String, mlua::String, Option<i64>)| {
            let start = pos.unwrap_or(1).max(1) as usize - 1;
            unpack(lua, &format, data.as_bytes(), start)
        })?,
    )?;

    lua.globals().set("struct", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_big_endian_u32() {
        let lua = Lua::new();
        install(&lua).unwrap();
        lua.load("local s = struct.pack('>I', 1) local v = struct.unpack('>I', s) assert(v == 1)")
            .exec()
            .unwrap();
    }

    #[test]
    fn packs_and_unpacks_little_endian_i16() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let v: i64 = lua
            .load("local s = struct.pack('<h', -5) return (struct.unpack('<h', s))")
            .eval()
            .unwrap();
        assert_eq!(v, -5);
    }

    #[test]
    fn packs_fixed_length_string() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let s: String = lua
            .load("local s = struct.pack('c3', 'ab') return (struct.unpack('c3', s))")
            .eval()
            .unwrap();
        assert_eq!(s.as_bytes(), b"ab\0");
    }
}
