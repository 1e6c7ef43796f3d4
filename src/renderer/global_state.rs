// renderer/global_state.rs

use std::fmt;

use crate::asset::Handle;
use crate::renderer::device::{Effect, RenderDevice};
use crate::renderer::material::PropertyValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyMode {
    Apply,
    Undo,
    /// The shader changed while the chain stayed active; blocks writing
    /// shader constants directly must rebind them.
    ChangeEffect,
}

/// Start offset of a captured chain in the frame's global state log.
///
/// Equal indices always denote identical chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainIndex(pub(crate) u32);

impl ChainIndex {
    pub fn get(&self) -> u32 {
        self.0
    }
}

/// A cross-cutting render state override pushed around a group of draws.
///
/// Blocks are captured when a draw is queued and replayed when the queued op
/// is submitted, so they must be able to apply and undo themselves at any
/// later point in the frame.
pub trait GlobalStateBlock: fmt::Debug {
    fn apply(&self, device: &mut dyn RenderDevice, effect: Handle<Effect>, mode: ApplyMode);
}

/// Writes a set of named shader constants, restoring defaults on undo.
#[derive(Debug, Clone, Default)]
pub struct ConstantBlock {
    name: String,
    constants: Vec<(String, PropertyValue, PropertyValue)>,
}

impl ConstantBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: Vec::new(),
        }
    }

    /// Adds a constant written as `value` and restored to `default` on undo.
    pub fn with(
        mut self,
        constant: impl Into<String>,
        value: PropertyValue,
        default: PropertyValue,
    ) -> Self {
        self.constants.push((constant.into(), value, default));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl GlobalStateBlock for ConstantBlock {
    fn apply(&self, device: &mut dyn RenderDevice, effect: Handle<Effect>, mode: ApplyMode) {
        for (constant, value, default) in &self.constants {
            match mode {
                ApplyMode::Apply | ApplyMode::ChangeEffect => {
                    device.set_property(effect, constant, value)
                }
                ApplyMode::Undo => device.set_property(effect, constant, default),
            }
        }
    }
}
