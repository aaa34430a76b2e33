//! Execution contexts: live frames that materialize into heap objects on
//! demand, and heap contexts that resume as frames.
//!
//! ```text
//! Unmaterialized ──materialize──▶ Live ──return──▶ Detached ──terminate──▶ Terminated
//!                                   ▲                 │
//!                                   └─────resume──────┘
//! ```

use crate::{
    BlockClosure, Body, CodeKind, ContextFlags, ContextObject, Frame, FrameId, NIL_PC,
    ObjectMemory, Placement, ProcessId, ProcessState, Sender, Value,
    error::{Error, Result, check_index, inconsistency},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Only a marker on an active stack.
    Unmaterialized,
    Live,
    Detached,
    Terminated,
}

/// Reflected contents of a context, for building one from scratch.
#[derive(Debug, Clone)]
pub struct ContextFields {
    pub sender: Value,
    /// Relative to the first bytecode, or [`NIL_PC`].
    pub pc: i64,
    pub sp: usize,
    pub method: Value,
    pub closure: Value,
    pub receiver: Value,
    /// Stack contents below `sp`.
    pub stack: Vec<Value>,
}

/// Shape the running code imposes on a frame.
struct CodeShape {
    num_args: usize,
    num_copied: usize,
    num_temps: usize,
    frame_size: usize,
    bytecodes: usize,
    initial_pc: i64,
}

impl ObjectMemory {
    // ── frame lookup ───────────────────────────────────────────────

    #[track_caller]
    pub(crate) fn live_frame(&self, id: FrameId) -> &Frame {
        match self.frames.get(id) {
            Some(frame) => frame,
            None => inconsistency(format_args!("no live frame for {id:?}")),
        }
    }

    #[track_caller]
    pub(crate) fn live_frame_mut(&mut self, id: FrameId) -> &mut Frame {
        match self.frames.get_mut(id) {
            Some(frame) => frame,
            None => inconsistency(format_args!("no live frame for {id:?}")),
        }
    }

    /// Frame backing `context`.
    pub fn context_frame(&self, context: Value) -> Result<FrameId> {
        match self.body(context)? {
            Body::Context(ContextObject { frame }) => {
                if !self.frames.contains(*frame) {
                    inconsistency(format_args!(
                        "context {context:?} lost its frame {frame:?}"
                    ));
                }
                Ok(*frame)
            }
            _ => Err(Error::BadReceiver("not a context")),
        }
    }

    fn context_frame_ref(&self, context: Value) -> Result<&Frame> {
        let id = self.context_frame(context)?;
        Ok(self.live_frame(id))
    }

    fn context_frame_mut(&mut self, context: Value) -> Result<&mut Frame> {
        let id = self.context_frame(context)?;
        Ok(self.live_frame_mut(id))
    }

    /// The frame registered for `id`, if it is still alive.
    #[inline]
    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id)
    }

    fn shape_of(&self, method: Value, closure: Value) -> Result<CodeShape> {
        let (code, num_copied) = if closure.is_nil() {
            (self.compiled_code(method)?, 0)
        } else {
            match self.body(closure)? {
                Body::Closure(c) => (self.compiled_code(c.block)?, c.copied.len()),
                _ => return Err(Error::BadArgument("not a closure")),
            }
        };
        Ok(CodeShape {
            num_args: code.num_args,
            num_copied,
            num_temps: code.num_temps.max(code.num_args + num_copied),
            frame_size: self.frame_size_of(code),
            bytecodes: code.bytecodes.len(),
            initial_pc: code.initial_pc(),
        })
    }

    // ── calls and returns ──────────────────────────────────────────

    fn push_frame(&mut self, process: ProcessId, mut frame: Frame) -> Result<FrameId> {
        let max = self.settings().max_frame_depth;
        let p = self
            .processes
            .get(process)
            .ok_or(Error::BadArgument("no such process"))?;
        if p.state == ProcessState::Terminated {
            return Err(Error::BadArgument("process is terminated"));
        }
        if p.stack.len() >= max {
            return Err(Error::OutOfBounds {
                index: p.stack.len(),
                size: max,
            });
        }
        frame.sender = match p.stack.last() {
            Some(&caller) => Sender::Marker(caller),
            None => Sender::Nil,
        };
        frame.placement = Placement::OnStack(process);
        let id = self.frames.insert(frame);
        if let Some(p) = self.processes.get_mut(process) {
            p.stack.push(id);
        }
        log::trace!("push frame {id:?} on {process:?}");
        Ok(id)
    }

    /// Activate `method` for `receiver` on top of `process`'s stack.
    pub fn push_method_frame(
        &mut self,
        process: ProcessId,
        method: Value,
        receiver: Value,
        args: &[Value],
    ) -> Result<FrameId> {
        let code = self.compiled_code(method)?;
        if code.kind != CodeKind::Method {
            return Err(Error::BadArgument("not a compiled method"));
        }
        if args.len() != code.num_args {
            return Err(Error::BadArgument("wrong number of arguments"));
        }
        let shape = self.shape_of(method, Value::NIL)?;
        let mut frame = Frame::blank(shape.frame_size);
        frame.method = method;
        frame.receiver = receiver;
        frame.pc = 0;
        frame.num_args = shape.num_args;
        for (i, &arg) in args.iter().enumerate() {
            frame.set_slot(i, arg);
        }
        frame.sp = shape.num_temps;
        frame.touch_to(shape.num_temps);
        self.push_frame(process, frame)
    }

    /// Activate `closure` on top of `process`'s stack.
    pub fn push_block_frame(
        &mut self,
        process: ProcessId,
        closure: Value,
        args: &[Value],
    ) -> Result<FrameId> {
        let Body::Closure(c) = self.body(closure)? else {
            return Err(Error::BadReceiver("not a closure"));
        };
        if args.len() != c.num_args {
            return Err(Error::BadArgument("wrong number of arguments"));
        }
        let (receiver, copied) = (c.receiver, c.copied.clone());
        let home = self.compiled_code(c.block)?.owner;
        let shape = self.shape_of(home, closure)?;
        if shape.num_temps > shape.frame_size {
            return Err(Error::BadArgument("copied values exceed frame size"));
        }
        let mut frame = Frame::blank(shape.frame_size);
        frame.method = home;
        frame.closure = closure;
        frame.receiver = receiver;
        frame.pc = 0;
        frame.num_args = shape.num_args;
        frame.num_copied = shape.num_copied;
        for (i, &v) in args.iter().chain(copied.iter()).enumerate() {
            frame.set_slot(i, v);
        }
        frame.sp = shape.num_temps;
        frame.touch_to(shape.num_temps);
        self.push_frame(process, frame)
    }

    #[inline]
    pub fn top_frame(&self, process: ProcessId) -> Option<FrameId> {
        self.processes.get(process)?.stack.last().copied()
    }

    /// A frame leaving its stack. Unmaterialized frames die with their
    /// marker; materialized ones stay behind, detached from the caller.
    fn detach_frame(&mut self, id: FrameId) {
        let frame = self.live_frame_mut(id);
        if frame.context.is_none() {
            self.frames.remove(id);
            log::trace!("discard frame {id:?}");
        } else {
            frame.placement = Placement::Detached;
            frame.sender = Sender::Nil;
            log::trace!("detach frame {id:?}");
        }
    }

    /// Pop the top frame of `process`.
    pub fn return_frame(&mut self, process: ProcessId) -> Result<FrameId> {
        let p = self
            .processes
            .get_mut(process)
            .ok_or(Error::BadArgument("no such process"))?;
        let id = p.stack.pop().ok_or(Error::BadReceiver("empty stack"))?;
        self.detach_frame(id);
        Ok(id)
    }

    /// Pop every frame above `target`. Returns how many were popped.
    pub fn unwind_to(&mut self, process: ProcessId, target: FrameId) -> Result<usize> {
        let p = self
            .processes
            .get_mut(process)
            .ok_or(Error::BadArgument("no such process"))?;
        let position = p
            .stack
            .iter()
            .rposition(|&f| f == target)
            .ok_or(Error::BadArgument("frame is not on this stack"))?;
        let popped: Vec<FrameId> = p.stack.drain(position + 1..).rev().collect();
        for &id in &popped {
            self.detach_frame(id);
        }
        Ok(popped.len())
    }

    /// Unwind the whole stack; materialized frames end up terminated.
    pub fn terminate_process(&mut self, process: ProcessId) -> Result<()> {
        let p = self
            .processes
            .get_mut(process)
            .ok_or(Error::BadArgument("no such process"))?;
        let frames = core::mem::take(&mut p.stack);
        p.state = ProcessState::Terminated;
        p.suspended_context = Value::NIL;
        for &id in frames.iter().rev() {
            self.detach_frame(id);
            if let Some(frame) = self.frames.get_mut(id) {
                frame.pc = NIL_PC;
            }
        }
        log::debug!("terminated {process:?} with {} frames", frames.len());
        Ok(())
    }

    // ── materialization ────────────────────────────────────────────

    /// The heap context for the frame behind `marker`, created on first use.
    ///
    /// Every later call for the same marker returns the same object.
    pub fn materialize(&mut self, marker: FrameId) -> Value {
        if let Some(context) = self.live_frame(marker).context {
            return context;
        }
        let class = self.specials.context_class;
        let context =
            self.allocate(class, Body::Context(ContextObject { frame: marker }));
        self.live_frame_mut(marker).context = Some(context);
        log::trace!("materialized {marker:?} as {context:?}");
        context
    }

    /// Context of the running activation of `process`.
    pub fn this_context(&mut self, process: ProcessId) -> Result<Value> {
        let top = self
            .top_frame(process)
            .ok_or(Error::BadReceiver("empty stack"))?;
        Ok(self.materialize(top))
    }

    pub fn frame_state(&self, marker: FrameId) -> ContextState {
        let frame = self.live_frame(marker);
        if frame.is_terminated() {
            ContextState::Terminated
        } else {
            match (frame.placement, frame.context) {
                (Placement::OnStack(_), None) => ContextState::Unmaterialized,
                (Placement::OnStack(_), Some(_)) => ContextState::Live,
                (Placement::Detached, _) => ContextState::Detached,
            }
        }
    }

    pub fn context_state(&self, context: Value) -> Result<ContextState> {
        Ok(self.frame_state(self.context_frame(context)?))
    }

    /// Reshape the frame of `context` to the calling convention of the code
    /// it names: receiver, declared arguments, then copied values.
    pub fn get_or_create_frame(&mut self, context: Value) -> Result<FrameId> {
        let id = self.context_frame(context)?;
        let (method, closure) = {
            let frame = self.live_frame(id);
            (frame.method, frame.closure)
        };
        if method.is_nil() {
            return Ok(id);
        }
        let shape = self.shape_of(method, closure)?;
        let frame = self.live_frame_mut(id);
        if frame.num_args == shape.num_args
            && frame.num_copied == shape.num_copied
            && frame.frame_size == shape.frame_size
        {
            return Ok(id);
        }
        frame.num_args = shape.num_args;
        frame.num_copied = shape.num_copied;
        frame.frame_size = shape.frame_size;
        frame.truncate(shape.frame_size);
        let arguments = shape.num_args + shape.num_copied;
        frame.sp = frame.sp.clamp(arguments.min(shape.frame_size), shape.frame_size);
        frame.touch_to(frame.sp);
        log::trace!("reshaped frame {id:?} for {method:?}");
        Ok(id)
    }

    /// Build a detached context from reflected data.
    pub fn synthesize_context(&mut self, fields: &ContextFields) -> Result<Value> {
        let code = self.compiled_code(fields.method)?;
        if code.kind != CodeKind::Method {
            return Err(Error::BadArgument("not a compiled method"));
        }
        let shape = self.shape_of(fields.method, fields.closure)?;
        if fields.pc != NIL_PC && !(0..=shape.bytecodes as i64).contains(&fields.pc) {
            return Err(Error::BadArgument("pc outside the code"));
        }
        if fields.sp > shape.frame_size {
            return Err(Error::OutOfBounds {
                index: fields.sp,
                size: shape.frame_size,
            });
        }
        if fields.stack.len() > fields.sp {
            return Err(Error::BadArgument("more stack values than sp"));
        }
        if !fields.sender.is_nil() {
            self.context_frame(fields.sender)
                .map_err(|_| Error::BadArgument("sender must be a context"))?;
        }

        let context = self.instantiate(self.specials.context_class, shape.frame_size)?;
        let frame = self.context_frame_mut(context)?;
        frame.method = fields.method;
        frame.closure = fields.closure;
        frame.receiver = fields.receiver;
        frame.pc = fields.pc;
        frame.sender = if fields.sender.is_nil() {
            Sender::Nil
        } else {
            Sender::Context(fields.sender)
        };
        for (i, &v) in fields.stack.iter().enumerate() {
            frame.set_slot(i, v);
        }
        frame.sp = fields.sp;
        frame.touch_to(fields.sp);
        self.get_or_create_frame(context)?;
        Ok(context)
    }

    /// Put a detached context back on top of `process`'s stack.
    pub fn resume(&mut self, process: ProcessId, context: Value) -> Result<FrameId> {
        let id = self.context_frame(context)?;
        match self.frame_state(id) {
            ContextState::Detached => (),
            ContextState::Terminated => {
                return Err(Error::BadReceiver("context is terminated"));
            }
            _ => return Err(Error::BadReceiver("context is already running")),
        }
        if !self.live_frame(id).has_code() {
            return Err(Error::BadReceiver("context has no method"));
        }
        self.get_or_create_frame(context)?;
        let max = self.settings().max_frame_depth;
        let p = self
            .processes
            .get_mut(process)
            .ok_or(Error::BadArgument("no such process"))?;
        if p.state == ProcessState::Terminated {
            return Err(Error::BadArgument("process is terminated"));
        }
        if p.stack.len() >= max {
            return Err(Error::OutOfBounds {
                index: p.stack.len(),
                size: max,
            });
        }
        p.stack.push(id);
        self.live_frame_mut(id).placement = Placement::OnStack(process);
        log::trace!("resumed {context:?} on {process:?}");
        Ok(id)
    }

    // ── sender ─────────────────────────────────────────────────────

    /// The sender of `context`, materializing the caller if necessary.
    pub fn sender(&mut self, context: Value) -> Result<Value> {
        let id = self.context_frame(context)?;
        match self.live_frame(id).sender {
            Sender::Nil => Ok(Value::NIL),
            Sender::Context(sender) => Ok(sender),
            Sender::Marker(caller) => {
                let sender = self.materialize(caller);
                self.live_frame_mut(id).sender = Sender::Context(sender);
                Ok(sender)
            }
        }
    }

    fn sender_frame(&self, sender: Sender) -> Result<Option<FrameId>> {
        Ok(match sender {
            Sender::Nil => None,
            Sender::Marker(id) => Some(id),
            Sender::Context(v) => Some(self.context_frame(v)?),
        })
    }

    pub fn set_sender(&mut self, context: Value, sender: Value) -> Result<()> {
        let target = self.context_frame(context)?;
        let Ok(mut cursor) = self.context_frame(sender) else {
            return Err(Error::BadArgument("sender must be a context"));
        };
        loop {
            if cursor == target {
                return Err(Error::BadArgument("sender chain would become cyclic"));
            }
            match self.sender_frame(self.live_frame(cursor).sender)? {
                Some(next) => cursor = next,
                None => break,
            }
        }
        let original = match self.live_frame(target).sender {
            Sender::Marker(caller) => self.live_frame(caller).context,
            Sender::Context(v) => Some(v),
            Sender::Nil => None,
        };
        let frame = self.live_frame_mut(target);
        if original != Some(sender) {
            frame.flags.insert(ContextFlags::MODIFIED_SENDER);
        }
        frame.sender = Sender::Context(sender);
        Ok(())
    }

    pub fn remove_sender(&mut self, context: Value) -> Result<()> {
        let frame = self.context_frame_mut(context)?;
        frame.sender = Sender::Nil;
        frame.flags.remove(ContextFlags::MODIFIED_SENDER);
        Ok(())
    }

    /// Clear pc and sender together. Nothing resumes a terminated context.
    pub fn terminate(&mut self, context: Value) -> Result<()> {
        let frame = self.context_frame_mut(context)?;
        frame.pc = NIL_PC;
        frame.sender = Sender::Nil;
        log::trace!("terminated {context:?}");
        Ok(())
    }

    pub fn is_terminated(&self, context: Value) -> Result<bool> {
        Ok(self.context_frame_ref(context)?.is_terminated())
    }

    /// Senders of `context`, nearest first, skipping terminated ones.
    pub fn sender_chain(&mut self, context: Value) -> Result<Vec<Value>> {
        let mut chain = Vec::new();
        let mut current = self.sender(context)?;
        while !current.is_nil() {
            if !self.is_terminated(current)? {
                chain.push(current);
            }
            current = self.sender(current)?;
        }
        Ok(chain)
    }

    // ── flags ──────────────────────────────────────────────────────

    pub fn context_flags(&self, context: Value) -> Result<ContextFlags> {
        Ok(self.context_frame_ref(context)?.flags)
    }

    pub fn mark_escaped(&mut self, context: Value) -> Result<()> {
        self.context_frame_mut(context)?
            .flags
            .insert(ContextFlags::ESCAPED);
        Ok(())
    }

    // ── slots ──────────────────────────────────────────────────────

    pub fn receiver(&self, context: Value) -> Result<Value> {
        Ok(self.context_frame_ref(context)?.receiver)
    }

    pub fn set_receiver(&mut self, context: Value, receiver: Value) -> Result<()> {
        self.context_frame_mut(context)?.receiver = receiver;
        Ok(())
    }

    pub fn context_method(&self, context: Value) -> Result<Value> {
        Ok(self.context_frame_ref(context)?.method)
    }

    pub fn set_context_method(&mut self, context: Value, method: Value) -> Result<()> {
        match self.compiled_code(method) {
            Ok(code) if code.kind == CodeKind::Method => (),
            _ => return Err(Error::BadArgument("not a compiled method")),
        }
        let frame = self.context_frame_mut(context)?;
        let previous = core::mem::replace(&mut frame.method, method);
        if let Err(err) = self.get_or_create_frame(context) {
            self.context_frame_mut(context)?.method = previous;
            return Err(err);
        }
        Ok(())
    }

    pub fn context_closure(&self, context: Value) -> Result<Value> {
        Ok(self.context_frame_ref(context)?.closure)
    }

    pub fn set_context_closure(&mut self, context: Value, closure: Value) -> Result<()> {
        if !closure.is_nil() && !matches!(self.body(closure), Ok(Body::Closure(_))) {
            return Err(Error::BadArgument("not a closure"));
        }
        let frame = self.context_frame_mut(context)?;
        let previous = core::mem::replace(&mut frame.closure, closure);
        if let Err(err) = self.get_or_create_frame(context) {
            self.context_frame_mut(context)?.closure = previous;
            return Err(err);
        }
        Ok(())
    }

    /// pc as a byte offset into the running method or block, or nil.
    pub fn instruction_pointer(&self, context: Value) -> Result<Value> {
        let frame = self.context_frame_ref(context)?;
        if frame.pc == NIL_PC || !frame.has_code() {
            return Ok(Value::NIL);
        }
        let shape = self.shape_of(frame.method, frame.closure)?;
        Ok(Value::from_i64(frame.pc + shape.initial_pc))
    }

    pub fn set_instruction_pointer(&mut self, context: Value, pc: Value) -> Result<()> {
        if pc.is_nil() {
            self.context_frame_mut(context)?.pc = NIL_PC;
            return Ok(());
        }
        let absolute = pc
            .as_i64()
            .ok_or(Error::BadArgument("pc must be a small integer"))?;
        let frame = self.context_frame_ref(context)?;
        if !frame.has_code() {
            return Err(Error::BadReceiver("context has no method"));
        }
        let shape = self.shape_of(frame.method, frame.closure)?;
        let relative = absolute - shape.initial_pc;
        if !(0..=shape.bytecodes as i64).contains(&relative) {
            return Err(Error::BadArgument("pc outside the code"));
        }
        self.context_frame_mut(context)?.pc = relative;
        Ok(())
    }

    pub fn stack_pointer(&self, context: Value) -> Result<usize> {
        Ok(self.context_frame_ref(context)?.sp)
    }

    /// Move sp; slots dropped below it are cleared.
    pub fn set_stack_pointer(&mut self, context: Value, sp: usize) -> Result<()> {
        let frame = self.context_frame_mut(context)?;
        if sp > frame.frame_size {
            return Err(Error::OutOfBounds {
                index: sp,
                size: frame.frame_size,
            });
        }
        for i in sp..frame.sp.min(frame.high_water()) {
            frame.set_slot(i, Value::NIL);
        }
        frame.sp = sp;
        frame.touch_to(sp);
        Ok(())
    }

    pub fn at_temp(&self, context: Value, index: usize) -> Result<Value> {
        let frame = self.context_frame_ref(context)?;
        check_index(index, frame.frame_size)?;
        Ok(frame.slot(index))
    }

    pub fn at_temp_put(&mut self, context: Value, index: usize, value: Value) -> Result<()> {
        let frame = self.context_frame_mut(context)?;
        check_index(index, frame.frame_size)?;
        frame.set_slot(index, value);
        Ok(())
    }

    pub fn push(&mut self, context: Value, value: Value) -> Result<()> {
        let frame = self.context_frame_mut(context)?;
        if frame.sp >= frame.frame_size {
            return Err(Error::OutOfBounds {
                index: frame.sp,
                size: frame.frame_size,
            });
        }
        let sp = frame.sp;
        frame.set_slot(sp, value);
        frame.sp = sp + 1;
        Ok(())
    }

    pub fn pop(&mut self, context: Value) -> Result<Value> {
        let frame = self.context_frame_mut(context)?;
        if frame.sp == 0 {
            return Err(Error::OutOfBounds { index: 0, size: 0 });
        }
        frame.sp -= 1;
        let sp = frame.sp;
        let value = frame.slot(sp);
        frame.set_slot(sp, Value::NIL);
        Ok(value)
    }

    /// Receiver, arguments and copied values as the calling convention lays
    /// them out.
    pub fn frame_arguments(&self, context: Value) -> Result<Vec<Value>> {
        Ok(self.context_frame_ref(context)?.arguments())
    }

    // ── copying and capture ────────────────────────────────────────

    /// A detached duplicate of `context` with its own frame.
    pub(crate) fn shallow_copy_context(&mut self, context: Value) -> Result<Value> {
        // a copy must not share the caller's marker
        self.sender(context)?;
        let class = self.object(context)?.class;
        let mut frame = self.context_frame_ref(context)?.clone();
        frame.context = None;
        frame.placement = Placement::Detached;
        let id = self.frames.insert(frame);
        let copy = self.allocate(class, Body::Context(ContextObject { frame: id }));
        self.live_frame_mut(id).context = Some(copy);
        Ok(copy)
    }

    /// A closure over the activation behind `frame`, whose context escapes.
    pub fn new_closure(
        &mut self,
        frame: FrameId,
        block: Value,
        num_args: usize,
        copied: Vec<Value>,
    ) -> Result<Value> {
        let code = self.compiled_code(block)?;
        if code.kind != CodeKind::Block || code.num_args != num_args {
            return Err(Error::BadArgument("not a matching compiled block"));
        }
        let receiver = self.live_frame(frame).receiver;
        let outer = self.materialize(frame);
        self.mark_escaped(outer)?;
        let closure = BlockClosure {
            outer_context: outer,
            block,
            receiver,
            num_args,
            copied,
        };
        Ok(self.allocate(self.specials.closure_class, Body::Closure(closure)))
    }
}
