//! Slot-level access to every object kind.
//!
//! `read`/`write` take a logical 0-based slot index and route to the engine
//! that owns the container's representation. Named slots come first, then
//! the indexable part.

use crate::{
    ArrayStorage, Body, CLASS_FORMAT, CLASS_INST_SIZE, CLASS_METHOD_DICT, CLASS_NAME,
    CLASS_SUPERCLASS, CLOSURE_BLOCK, CLOSURE_INST_SIZE, CLOSURE_NUM_ARGS,
    CLOSURE_OUTER_CONTEXT, CLOSURE_RECEIVER, CONTEXT_CLOSURE, CONTEXT_INST_SIZE,
    CONTEXT_METHOD, CONTEXT_PC, CONTEXT_RECEIVER, CONTEXT_SENDER, CONTEXT_SP,
    ClassFormat, CodeKind, CompiledCode, ContextFlags, ContextObject, HeaderFlags,
    ObjectFamily, ObjectMemory, Slot, Value,
    error::{Error, Result, check_index},
};

const LOW_WORD: u64 = 0xFFFF_FFFF;

/// A read that may still need to allocate.
enum Fetched {
    Value(Value),
    Double(f64),
    Integer(i128),
    Context,
}

#[inline]
fn small_usize(value: Value, what: &'static str) -> Result<usize> {
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(Error::BadArgument(what))
}

fn code_slot(code: &CompiledCode, index: usize) -> Value {
    let literals = code.literals.len();
    if index == 0 {
        Value::from_i64(code.header_word())
    } else if index <= literals {
        code.literals[index - 1]
    } else {
        Value::from_i64(code.bytecodes[index - 1 - literals] as i64)
    }
}

impl ObjectMemory {
    // ── shape ──────────────────────────────────────────────────────

    /// Number of slots addressable through [`ObjectMemory::read`].
    /// Immediates have none.
    pub fn size(&self, obj: Value) -> Result<usize> {
        if !obj.is_ref() {
            return Ok(0);
        }
        Ok(match self.body(obj)? {
            Body::Empty => 0,
            Body::Pointers(fields) => fields.len(),
            Body::Array(storage) => storage.len(),
            Body::Native(storage) => storage.len(),
            Body::Float(_) => 2,
            Body::Context(ContextObject { frame }) => {
                CONTEXT_INST_SIZE + self.live_frame(*frame).frame_size
            }
            Body::Closure(c) => CLOSURE_INST_SIZE + c.copied.len(),
            Body::Code(code) => code.slot_count(),
            Body::Class(c) => CLASS_INST_SIZE + c.extra.len(),
        })
    }

    /// Named slots before the indexable part.
    pub fn inst_var_count(&self, obj: Value) -> Result<usize> {
        if !obj.is_ref() {
            return Ok(0);
        }
        Ok(match self.body(obj)? {
            Body::Pointers(fields) => fields.len(),
            Body::Context(_) => CONTEXT_INST_SIZE,
            Body::Closure(_) => CLOSURE_INST_SIZE,
            Body::Class(_) => CLASS_INST_SIZE,
            _ => 0,
        })
    }

    // ── immutability ───────────────────────────────────────────────

    pub fn is_immutable(&self, obj: Value) -> bool {
        match self.object(obj) {
            Ok(object) => object.header.has_flag(HeaderFlags::IMMUTABLE),
            Err(_) => true,
        }
    }

    pub fn set_immutable(&mut self, obj: Value, immutable: bool) -> Result<()> {
        let header = &mut self.object_mut(obj)?.header;
        if immutable {
            header.add_flag(HeaderFlags::IMMUTABLE);
        } else {
            header.remove_flag(HeaderFlags::IMMUTABLE);
        }
        Ok(())
    }

    // ── read ───────────────────────────────────────────────────────

    /// Slot `index` of `obj`. Doubles and wide lanes are boxed on the way out.
    pub fn read(&mut self, obj: Value, index: usize) -> Result<Value> {
        check_index(index, self.size(obj)?)?;
        let fetched = match self.body(obj)? {
            Body::Empty => return Err(Error::OutOfBounds { index, size: 0 }),
            Body::Pointers(fields) => Fetched::Value(fields[index]),
            Body::Array(storage) => match storage.read_slot(index)? {
                Slot::Value(v) => Fetched::Value(v),
                Slot::Double(d) => Fetched::Double(d),
            },
            Body::Native(storage) => {
                Fetched::Integer(storage.read_unsigned(index)? as i128)
            }
            Body::Float(d) => {
                let bits = d.to_bits();
                let word = if index == 0 { bits >> 32 } else { bits & LOW_WORD };
                Fetched::Value(Value::from_i64(word as i64))
            }
            Body::Context(_) => Fetched::Context,
            Body::Closure(c) => Fetched::Value(match index {
                CLOSURE_OUTER_CONTEXT => c.outer_context,
                CLOSURE_BLOCK => c.block,
                CLOSURE_NUM_ARGS => Value::from_i64(c.num_args as i64),
                CLOSURE_RECEIVER => c.receiver,
                i => c.copied[i - CLOSURE_INST_SIZE],
            }),
            Body::Code(code) => Fetched::Value(code_slot(code, index)),
            Body::Class(c) => Fetched::Value(match index {
                CLASS_SUPERCLASS => c.superclass,
                CLASS_METHOD_DICT => c.method_dict,
                CLASS_FORMAT => Value::from_i64(c.format.encode()),
                CLASS_NAME => c.name,
                i => c.extra[i - CLASS_INST_SIZE],
            }),
        };
        Ok(match fetched {
            Fetched::Value(v) => v,
            Fetched::Double(d) => self.box_float(d),
            Fetched::Integer(n) => self.integer_object(n),
            Fetched::Context => return self.read_context(obj, index),
        })
    }

    fn read_context(&mut self, context: Value, index: usize) -> Result<Value> {
        match index {
            CONTEXT_SENDER => self.sender(context),
            CONTEXT_PC => self.instruction_pointer(context),
            CONTEXT_SP => Ok(Value::from_i64(self.stack_pointer(context)? as i64)),
            CONTEXT_METHOD => self.context_method(context),
            CONTEXT_CLOSURE => self.context_closure(context),
            CONTEXT_RECEIVER => self.receiver(context),
            i => self.at_temp(context, i - CONTEXT_INST_SIZE),
        }
    }

    // ── write ──────────────────────────────────────────────────────

    /// Store `value` into slot `index` of `obj`.
    ///
    /// On failure nothing has changed.
    pub fn write(&mut self, obj: Value, index: usize, value: Value) -> Result<()> {
        let object = self.object(obj)?;
        if object.header.has_flag(HeaderFlags::IMMUTABLE) {
            return Err(Error::BadReceiver("object is immutable"));
        }
        if value.is_malformed() {
            return Err(Error::UnsupportedValue("malformed immediate"));
        }
        if value.is_ref() && !self.is_live(value) {
            return Err(Error::UnsupportedValue("dangling reference"));
        }
        let family = object.body.family();
        check_index(index, self.size(obj)?)?;
        match family {
            ObjectFamily::Empty => {
                return Err(Error::OutOfBounds { index, size: 0 });
            }
            ObjectFamily::Pointers => {
                if let Body::Pointers(fields) = self.body_mut(obj)? {
                    fields[index] = value;
                }
            }
            ObjectFamily::Variable => self.write_array(obj, index, value)?,
            ObjectFamily::Native => self.write_lane(obj, index, value)?,
            ObjectFamily::Float => self.write_float_word(obj, index, value)?,
            ObjectFamily::Context => self.write_context(obj, index, value)?,
            ObjectFamily::Closure => self.write_closure(obj, index, value)?,
            ObjectFamily::Code => self.write_code(obj, index, value)?,
            ObjectFamily::Class => self.write_class(obj, index, value)?,
        }
        self.note_escape(value);
        Ok(())
    }

    /// A context stored anywhere outlives its activation's stack discipline.
    fn note_escape(&mut self, value: Value) {
        let Ok(Body::Context(ContextObject { frame })) = self.body(value) else {
            return;
        };
        let frame = *frame;
        self.live_frame_mut(frame).flags.insert(ContextFlags::ESCAPED);
    }

    fn write_array(&mut self, obj: Value, index: usize, value: Value) -> Result<()> {
        let element = self.classify(value)?;
        let Body::Array(slot) = self.body_mut(obj)? else {
            return Err(Error::BadReceiver("not a variable container"));
        };
        // boxing on generalization allocates, so the storage leaves the heap
        // for the duration of the write
        let mut storage = core::mem::replace(slot, ArrayStorage::Empty(0));
        let result = storage.write(index, value, element, |d| self.box_float(d));
        if let Ok(Body::Array(slot)) = self.body_mut(obj) {
            *slot = storage;
        }
        result
    }

    fn write_lane(&mut self, obj: Value, index: usize, value: Value) -> Result<()> {
        let n = match value.as_char() {
            Some(c) => c as i128,
            None => self
                .integer_value(value)
                .ok_or(Error::BadArgument("lane value must be an integer"))?,
        };
        let n = u64::try_from(n)
            .map_err(|_| Error::UnsupportedValue("value exceeds lane width"))?;
        self.native_storage_mut(obj)?.write_unsigned(index, n)
    }

    fn write_float_word(&mut self, obj: Value, index: usize, value: Value) -> Result<()> {
        let word = value
            .as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(Error::UnsupportedValue("float word must fit in 32 bits"))?
            as u64;
        if let Body::Float(d) = self.body_mut(obj)? {
            let bits = d.to_bits();
            let bits = if index == 0 {
                (bits & LOW_WORD) | (word << 32)
            } else {
                (bits & !LOW_WORD) | word
            };
            *d = f64::from_bits(bits);
        }
        Ok(())
    }

    fn write_context(&mut self, context: Value, index: usize, value: Value) -> Result<()> {
        match index {
            CONTEXT_SENDER if value.is_nil() => self.remove_sender(context),
            CONTEXT_SENDER => self.set_sender(context, value),
            CONTEXT_PC => self.set_instruction_pointer(context, value),
            CONTEXT_SP => {
                let sp = small_usize(value, "sp must be a non-negative small integer")?;
                self.set_stack_pointer(context, sp)
            }
            CONTEXT_METHOD => self.set_context_method(context, value),
            CONTEXT_CLOSURE => self.set_context_closure(context, value),
            CONTEXT_RECEIVER => self.set_receiver(context, value),
            i => self.at_temp_put(context, i - CONTEXT_INST_SIZE, value),
        }
    }

    fn write_closure(&mut self, obj: Value, index: usize, value: Value) -> Result<()> {
        let mut num_args = 0;
        match index {
            CLOSURE_OUTER_CONTEXT if !value.is_nil() => {
                self.context_frame(value)
                    .map_err(|_| Error::BadArgument("outer context must be a context"))?;
            }
            CLOSURE_BLOCK if !value.is_nil() => match self.compiled_code(value) {
                Ok(code) if code.kind == CodeKind::Block => (),
                _ => return Err(Error::BadArgument("not a compiled block")),
            },
            CLOSURE_NUM_ARGS => {
                num_args = small_usize(value, "numArgs must be a non-negative small integer")?;
            }
            _ => (),
        }
        if let Body::Closure(c) = self.body_mut(obj)? {
            match index {
                CLOSURE_OUTER_CONTEXT => c.outer_context = value,
                CLOSURE_BLOCK => c.block = value,
                CLOSURE_NUM_ARGS => c.num_args = num_args,
                CLOSURE_RECEIVER => c.receiver = value,
                i => c.copied[i - CLOSURE_INST_SIZE] = value,
            }
        }
        Ok(())
    }

    fn write_code(&mut self, obj: Value, index: usize, value: Value) -> Result<()> {
        let code = self.compiled_code(obj)?;
        let literals = code.literals.len();
        if index == 0 {
            // the header describes the layout, so it can only be rewritten
            // with an equivalent word
            let word = value
                .as_i64()
                .ok_or(Error::BadArgument("header must be a small integer"))?;
            if CompiledCode::decode_header(word)
                != CompiledCode::decode_header(code.header_word())
            {
                return Err(Error::BadArgument("incompatible code header"));
            }
            return Ok(());
        }
        let byte = if index > literals {
            Some(
                value
                    .as_i64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(Error::UnsupportedValue("bytecode must be in 0..=255"))?,
            )
        } else {
            None
        };
        if let Body::Code(code) = self.body_mut(obj)? {
            match byte {
                Some(b) => code.bytecodes[index - 1 - literals] = b,
                None => code.literals[index - 1] = value,
            }
        }
        Ok(())
    }

    fn write_class(&mut self, class: Value, index: usize, value: Value) -> Result<()> {
        let mut format = None;
        match index {
            CLASS_SUPERCLASS if !value.is_nil() => {
                self.class_format(value)
                    .map_err(|_| Error::BadArgument("superclass must be a class"))?;
            }
            CLASS_FORMAT => {
                format = value.as_i64().and_then(ClassFormat::decode);
                if format.is_none() {
                    return Err(Error::BadArgument("not a class format"));
                }
            }
            _ => (),
        }
        if let Body::Class(c) = self.body_mut(class)? {
            match index {
                CLASS_SUPERCLASS => c.superclass = value,
                CLASS_METHOD_DICT => c.method_dict = value,
                CLASS_FORMAT => {
                    if let Some(format) = format {
                        c.format = format;
                    }
                }
                CLASS_NAME => c.name = value,
                i => c.extra[i - CLASS_INST_SIZE] = value,
            }
        }
        if index == CLASS_METHOD_DICT {
            self.invalidate_dispatch(class);
        }
        Ok(())
    }
}
