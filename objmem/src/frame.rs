//! Activation records and the arena that owns them.
//!
//! A [`FrameId`] is a stable, generation-checked handle. While a frame has
//! never been reflected upon, its handle is the only token for it (the
//! frame marker). Materialization attaches a heap context and memoizes it in
//! [`Frame::context`].

use bitflags::bitflags;

use crate::{ProcessId, Value, Visitable, Visitor};

/// pc of a terminated context.
pub const NIL_PC: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

impl FrameId {
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }
}

/// Who a frame returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Nil,
    /// The caller's frame, not yet materialized.
    Marker(FrameId),
    Context(Value),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContextFlags: u8 {
        /// The context was captured by a block or stored into the heap.
        const ESCAPED = 1 << 0;
        /// The sender slot no longer names the original caller.
        const MODIFIED_SENDER = 1 << 1;
    }
}

/// Where a frame currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    OnStack(ProcessId),
    Detached,
}

#[derive(Debug, Clone)]
pub struct Frame {
    /// Home method.
    pub method: Value,
    /// Running closure, or nil for a method activation.
    pub closure: Value,
    pub receiver: Value,
    pub sender: Sender,
    /// Relative to the code's first bytecode, [`NIL_PC`] once terminated.
    pub pc: i64,
    pub sp: usize,
    /// Declared arguments of the running code.
    pub num_args: usize,
    /// Copied values of the running closure.
    pub num_copied: usize,
    /// Capacity of the stack in slots.
    pub frame_size: usize,
    /// Arguments, copied values, temps then operand stack. The length is the
    /// high-water mark; slots past it were never written.
    stack: Vec<Value>,
    /// Memoized materialized context.
    pub context: Option<Value>,
    pub flags: ContextFlags,
    pub placement: Placement,
}

impl Frame {
    /// A frame with no code yet, as produced by reflective instantiation.
    pub fn blank(frame_size: usize) -> Self {
        Self {
            method: Value::NIL,
            closure: Value::NIL,
            receiver: Value::NIL,
            sender: Sender::Nil,
            pc: NIL_PC,
            sp: 0,
            num_args: 0,
            num_copied: 0,
            frame_size,
            stack: Vec::new(),
            context: None,
            flags: ContextFlags::empty(),
            placement: Placement::Detached,
        }
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.pc == NIL_PC && self.sender == Sender::Nil
    }

    #[inline]
    pub fn has_code(&self) -> bool {
        !self.method.is_nil()
    }

    #[inline]
    pub fn high_water(&self) -> usize {
        self.stack.len()
    }

    /// Stack slots up to the high-water mark.
    #[inline]
    pub fn used_slots(&self) -> &[Value] {
        &self.stack
    }

    /// Slot `index`; never-written slots read as nil.
    #[inline]
    pub fn slot(&self, index: usize) -> Value {
        self.stack.get(index).copied().unwrap_or(Value::NIL)
    }

    /// Caller checks `index < frame_size`.
    #[inline]
    pub fn set_slot(&mut self, index: usize, value: Value) {
        debug_assert!(index < self.frame_size);
        if index >= self.stack.len() {
            self.stack.resize(index + 1, Value::NIL);
        }
        self.stack[index] = value;
    }

    /// Mark slots below `sp` as used.
    #[inline]
    pub fn touch_to(&mut self, sp: usize) {
        if sp > self.stack.len() {
            self.stack.resize(sp, Value::NIL);
        }
    }

    /// Forget slots at and above `len`.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.stack.truncate(len);
    }

    /// Receiver, declared arguments, then copied values.
    pub fn arguments(&self) -> Vec<Value> {
        let mut args = Vec::with_capacity(1 + self.num_args + self.num_copied);
        args.push(self.receiver);
        args.extend(
            (0..self.num_args + self.num_copied).map(|i| self.slot(i)),
        );
        args
    }
}

impl Visitable for Frame {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.method);
        visitor.visit(self.closure);
        visitor.visit(self.receiver);
        if let Sender::Context(ctx) = self.sender {
            visitor.visit(ctx);
        }
        for &v in &self.stack {
            visitor.visit(v);
        }
        if let Some(ctx) = self.context {
            visitor.visit(ctx);
        }
    }

    /// The memoized context is identity bookkeeping, not a field.
    #[inline]
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        visitor.visit_mut(&mut self.method);
        visitor.visit_mut(&mut self.closure);
        visitor.visit_mut(&mut self.receiver);
        if let Sender::Context(ctx) = &mut self.sender {
            visitor.visit_mut(ctx);
        }
        for v in &mut self.stack {
            visitor.visit_mut(v);
        }
    }
}

#[derive(Debug, Default)]
struct FrameSlot {
    generation: u32,
    frame: Option<Frame>,
}

/// Owner of every outstanding activation record across all processes.
#[derive(Debug, Default)]
pub struct FrameArena {
    slots: Vec<FrameSlot>,
    free: Vec<u32>,
    live: usize,
}

impl FrameArena {
    pub fn insert(&mut self, frame: Frame) -> FrameId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.frame = Some(frame);
            return FrameId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(FrameSlot {
            generation: 0,
            frame: Some(frame),
        });
        FrameId {
            index,
            generation: 0,
        }
    }

    #[inline]
    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_mut())
    }

    /// Release a frame. Its handle and every copy of it go stale.
    pub fn remove(&mut self, id: FrameId) -> Option<Frame> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let frame = slot.frame.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(frame)
    }

    #[inline]
    pub fn contains(&self, id: FrameId) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn ids(&self) -> Vec<FrameId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.frame.is_some())
            .map(|(i, slot)| FrameId {
                index: i as u32,
                generation: slot.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EdgeCollector;

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut arena = FrameArena::default();
        let a = arena.insert(Frame::blank(16));
        assert!(arena.contains(a));
        assert!(arena.remove(a).is_some());
        assert!(!arena.contains(a));
        let b = arena.insert(Frame::blank(16));
        assert_eq!(a.index(), b.index(), "slot is reused");
        assert!(arena.get(a).is_none(), "old generation must not alias");
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn unwritten_slots_read_nil() {
        let mut frame = Frame::blank(8);
        frame.set_slot(2, Value::from_i64(5));
        assert_eq!(frame.high_water(), 3);
        assert_eq!(frame.slot(0), Value::NIL);
        assert_eq!(frame.slot(2), Value::from_i64(5));
        assert_eq!(frame.slot(7), Value::NIL);
    }

    #[test]
    fn scan_stops_at_high_water() {
        let mut frame = Frame::blank(16);
        frame.set_slot(0, Value::from_oop(1));
        frame.sp = 1;
        let mut collector = EdgeCollector::default();
        frame.visit_edges(&mut collector);
        assert_eq!(collector.edges, vec![Value::from_oop(1)]);
    }

    #[test]
    fn argument_layout() {
        let mut frame = Frame::blank(16);
        frame.receiver = Value::from_i64(10);
        frame.num_args = 1;
        frame.num_copied = 1;
        frame.set_slot(0, Value::from_i64(1));
        frame.set_slot(1, Value::from_i64(2));
        frame.set_slot(2, Value::from_i64(3));
        assert_eq!(
            frame.arguments(),
            vec![Value::from_i64(10), Value::from_i64(1), Value::from_i64(2)]
        );
    }

    #[test]
    fn fresh_blank_is_terminated_like() {
        let frame = Frame::blank(4);
        assert!(frame.is_terminated());
        assert!(!frame.has_code());
    }
}
