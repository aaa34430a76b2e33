use crate::{ObjectMemory, Value};

/// Per-class stability token for cached method lookups.
///
/// Any change to a class's method dictionary bumps the generation. Call
/// sites that cached a lookup compare generations before trusting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchToken(u32);

impl DispatchToken {
    #[inline]
    pub const fn generation(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// A monomorphic call-site cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineCache {
    class: Value,
    generation: u32,
    target: Value,
}

impl InlineCache {
    /// Cache `target` for receivers of `class`. `None` if `class` is not a
    /// class object.
    pub fn new(
        memory: &ObjectMemory,
        class: Value,
        target: Value,
    ) -> Option<Self> {
        let generation = memory.dispatch_token(class)?.generation();
        Some(Self {
            class,
            generation,
            target,
        })
    }

    /// The cached target, if `receiver_class` matches and the class's
    /// method dictionary has not changed since.
    pub fn lookup(
        &self,
        memory: &ObjectMemory,
        receiver_class: Value,
    ) -> Option<Value> {
        if receiver_class != self.class {
            return None;
        }
        let token = memory.dispatch_token(self.class)?;
        (token.generation() == self.generation).then_some(self.target)
    }

    #[inline]
    pub fn class(&self) -> Value {
        self.class
    }
}
