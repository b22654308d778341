//! Fuel-based preemption.
//!
//! A debug hook fires every [`FUEL_HOOK_STEP`] VM instructions, not on a
//! wall-clock timer — the whole point is deterministic, host-independent
//! limits. When the counter reaches zero the hook raises a Lua error with
//! a fixed message; the VM unwinds through any in-flight `pcall`s exactly
//! like a script-raised error would.

use std::cell::Cell;
use std::rc::Rc;

use mlua::{HookTriggers, Lua};

use crate::limits::FUEL_HOOK_STEP;

pub const FUEL_EXHAUSTED_MESSAGE: &str = "Script killed by fuel limit";

/// Shared fuel counter; cloned into the hook closure and readable by
/// `gas_remaining`-style introspection if ever needed.
#[derive(Clone)]
pub struct FuelCounter(Rc<Cell<i64>>);

impl FuelCounter {
    pub fn new(budget: i64) -> Self {
        FuelCounter(Rc::new(Cell::new(budget)))
    }

    pub fn remaining(&self) -> i64 {
        self.0.get()
    }

    pub fn reset(&self, budget: i64) {
        self.0.set(budget);
    }
}

/// Install the instruction-count hook on `lua`, decrementing `counter` by
/// one step each time it fires and erroring once it runs out.
pub fn install(lua: &Lua, counter: FuelCounter) -> mlua::Result<()> {
    lua.set_hook(
        HookTriggers {
            every_nth_instruction: Some(FUEL_HOOK_STEP),
            ..Default::default()
        },
        move |_lua, _debug| {
            let remaining = counter.remaining() - FUEL_HOOK_STEP as i64;
            counter.0.set(remaining);
            if remaining <= 0 {
                return Err(mlua::Error::RuntimeError(FUEL_EXHAUSTED_MESSAGE.to_string()));
            }
            Ok(())
        },
    );
    Ok(())
}
