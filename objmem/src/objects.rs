use crate::{
    ArrayStorage, DispatchToken, FrameId, Header, LaneWidth, NativeStorage,
    Value, Visitable, Visitor,
};

// ── Slot layouts ──────────────────────────────────────────────────────

pub const CLASS_SUPERCLASS: usize = 0;
pub const CLASS_METHOD_DICT: usize = 1;
pub const CLASS_FORMAT: usize = 2;
pub const CLASS_NAME: usize = 3;
pub const CLASS_INST_SIZE: usize = 4;

pub const CONTEXT_SENDER: usize = 0;
pub const CONTEXT_PC: usize = 1;
pub const CONTEXT_SP: usize = 2;
pub const CONTEXT_METHOD: usize = 3;
pub const CONTEXT_CLOSURE: usize = 4;
pub const CONTEXT_RECEIVER: usize = 5;
pub const CONTEXT_INST_SIZE: usize = 6;

pub const CLOSURE_OUTER_CONTEXT: usize = 0;
pub const CLOSURE_BLOCK: usize = 1;
pub const CLOSURE_NUM_ARGS: usize = 2;
pub const CLOSURE_RECEIVER: usize = 3;
pub const CLOSURE_INST_SIZE: usize = 4;

// ── Class formats ─────────────────────────────────────────────────────

/// Shape of a class's instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFormat {
    Empty,
    Fixed(usize),
    Variable,
    Bytes(LaneWidth),
    Float,
    Context,
    Closure,
    Code,
    Class,
}

impl ClassFormat {
    const SHIFT: u32 = 8;

    /// Small-integer encoding stored in the class's format slot.
    pub fn encode(self) -> i64 {
        let (code, inst) = match self {
            Self::Empty => (0, 0),
            Self::Fixed(n) => (1, n),
            Self::Variable => (2, 0),
            Self::Bytes(LaneWidth::W8) => (3, 0),
            Self::Bytes(LaneWidth::W16) => (4, 0),
            Self::Bytes(LaneWidth::W32) => (5, 0),
            Self::Bytes(LaneWidth::W64) => (6, 0),
            Self::Float => (7, 0),
            Self::Context => (8, CONTEXT_INST_SIZE),
            Self::Closure => (9, CLOSURE_INST_SIZE),
            Self::Code => (10, 0),
            Self::Class => (11, CLASS_INST_SIZE),
        };
        ((inst as i64) << Self::SHIFT) | code
    }

    pub fn decode(raw: i64) -> Option<Self> {
        if raw < 0 {
            return None;
        }
        let inst = (raw >> Self::SHIFT) as usize;
        Some(match raw & 0xFF {
            0 => Self::Empty,
            1 => Self::Fixed(inst),
            2 => Self::Variable,
            3 => Self::Bytes(LaneWidth::W8),
            4 => Self::Bytes(LaneWidth::W16),
            5 => Self::Bytes(LaneWidth::W32),
            6 => Self::Bytes(LaneWidth::W64),
            7 => Self::Float,
            8 => Self::Context,
            9 => Self::Closure,
            10 => Self::Code,
            11 => Self::Class,
            _ => return None,
        })
    }
}

// ── Bodies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClassObject {
    pub superclass: Value,
    pub method_dict: Value,
    pub format: ClassFormat,
    pub name: Value,
    /// Remaining class-side fields.
    pub extra: Vec<Value>,
    pub dispatch: DispatchToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Method,
    Block,
}

#[derive(Debug, Clone)]
pub struct CompiledCode {
    pub kind: CodeKind,
    pub num_args: usize,
    /// Temps including arguments.
    pub num_temps: usize,
    pub large_frame: bool,
    pub primitive: u16,
    pub literals: Vec<Value>,
    pub bytecodes: Vec<u8>,
    /// Owning class of a method, home method of a block. Cached outside the
    /// literal frame.
    pub owner: Value,
}

impl CompiledCode {
    const NUM_ARGS_SHIFT: u32 = 24;
    const NUM_TEMPS_SHIFT: u32 = 18;
    const LARGE_FRAME_BIT: i64 = 1 << 17;
    const HAS_PRIMITIVE_BIT: i64 = 1 << 16;
    const NUM_LITERALS_MASK: i64 = 0xFFFF;

    /// Largest counts the header word can encode.
    pub const MAX_ARGS: usize = 0xF;
    pub const MAX_TEMPS: usize = 0x3F;
    pub const MAX_LITERALS: usize = Self::NUM_LITERALS_MASK as usize;

    /// The header word as seen through slot 0.
    pub fn header_word(&self) -> i64 {
        let mut word = ((self.num_args as i64) << Self::NUM_ARGS_SHIFT)
            | ((self.num_temps as i64) << Self::NUM_TEMPS_SHIFT)
            | (self.literals.len() as i64 & Self::NUM_LITERALS_MASK);
        if self.large_frame {
            word |= Self::LARGE_FRAME_BIT;
        }
        if self.primitive != 0 {
            word |= Self::HAS_PRIMITIVE_BIT;
        }
        word
    }

    /// Decoded `(num_args, num_temps, large_frame, num_literals)`.
    pub fn decode_header(word: i64) -> (usize, usize, bool, usize) {
        (
            ((word >> Self::NUM_ARGS_SHIFT) as usize) & Self::MAX_ARGS,
            ((word >> Self::NUM_TEMPS_SHIFT) as usize) & Self::MAX_TEMPS,
            word & Self::LARGE_FRAME_BIT != 0,
            (word & Self::NUM_LITERALS_MASK) as usize,
        )
    }

    /// Byte offset of the first bytecode, counted like the on-disk layout.
    #[inline]
    pub fn initial_pc(&self) -> i64 {
        (1 + self.literals.len() as i64) * 8 + 1
    }

    /// Header, literals, then bytecodes.
    #[inline]
    pub fn slot_count(&self) -> usize {
        1 + self.literals.len() + self.bytecodes.len()
    }
}

#[derive(Debug, Clone)]
pub struct BlockClosure {
    pub outer_context: Value,
    pub block: Value,
    pub receiver: Value,
    pub num_args: usize,
    pub copied: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextObject {
    pub frame: FrameId,
}

#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Pointers(Vec<Value>),
    Array(ArrayStorage),
    Native(NativeStorage),
    Float(f64),
    Context(ContextObject),
    Closure(BlockClosure),
    Code(CompiledCode),
    Class(ClassObject),
}

/// Bodies that may exchange places in a two-way become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFamily {
    Empty,
    Pointers,
    Variable,
    Native,
    Float,
    Context,
    Closure,
    Code,
    Class,
}

impl Body {
    #[inline]
    pub fn family(&self) -> ObjectFamily {
        match self {
            Self::Empty => ObjectFamily::Empty,
            Self::Pointers(_) => ObjectFamily::Pointers,
            Self::Array(_) => ObjectFamily::Variable,
            Self::Native(_) => ObjectFamily::Native,
            Self::Float(_) => ObjectFamily::Float,
            Self::Context(_) => ObjectFamily::Context,
            Self::Closure(_) => ObjectFamily::Closure,
            Self::Code(_) => ObjectFamily::Code,
            Self::Class(_) => ObjectFamily::Class,
        }
    }
}

impl Visitable for Body {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        match self {
            Self::Empty | Self::Native(_) | Self::Float(_) => (),
            Self::Pointers(fields) => {
                fields.iter().for_each(|&v| visitor.visit(v));
            }
            Self::Array(storage) => {
                if let Some(objects) = storage.objects() {
                    objects.iter().for_each(|&v| visitor.visit(v));
                }
            }
            // the frame lives in the arena and is traced from there
            Self::Context(_) => (),
            Self::Closure(closure) => {
                visitor.visit(closure.outer_context);
                visitor.visit(closure.block);
                visitor.visit(closure.receiver);
                closure.copied.iter().for_each(|&v| visitor.visit(v));
            }
            Self::Code(code) => {
                code.literals.iter().for_each(|&v| visitor.visit(v));
                visitor.visit(code.owner);
            }
            Self::Class(class) => {
                visitor.visit(class.superclass);
                visitor.visit(class.method_dict);
                visitor.visit(class.name);
                class.extra.iter().for_each(|&v| visitor.visit(v));
            }
        }
    }

    #[inline]
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        match self {
            Self::Empty | Self::Native(_) | Self::Float(_) => (),
            Self::Pointers(fields) => {
                fields.iter_mut().for_each(|v| visitor.visit_mut(v));
            }
            Self::Array(storage) => {
                if let Some(objects) = storage.objects_mut() {
                    objects.iter_mut().for_each(|v| visitor.visit_mut(v));
                }
            }
            Self::Context(_) => (),
            Self::Closure(closure) => {
                visitor.visit_mut(&mut closure.outer_context);
                visitor.visit_mut(&mut closure.block);
                visitor.visit_mut(&mut closure.receiver);
                closure.copied.iter_mut().for_each(|v| visitor.visit_mut(v));
            }
            Self::Code(code) => {
                code.literals.iter_mut().for_each(|v| visitor.visit_mut(v));
                visitor.visit_mut(&mut code.owner);
            }
            Self::Class(class) => {
                visitor.visit_mut(&mut class.superclass);
                visitor.visit_mut(&mut class.method_dict);
                visitor.visit_mut(&mut class.name);
                class.extra.iter_mut().for_each(|v| visitor.visit_mut(v));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub header: Header,
    pub class: Value,
    pub body: Body,
}

impl Visitable for HeapObject {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.class);
        self.body.visit_edges(visitor);
    }

    #[inline]
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        visitor.visit_mut(&mut self.class);
        self.body.visit_edges_mut(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EdgeCollector;

    #[test]
    fn format_encoding_round_trips() {
        for format in [
            ClassFormat::Empty,
            ClassFormat::Fixed(3),
            ClassFormat::Variable,
            ClassFormat::Bytes(LaneWidth::W16),
            ClassFormat::Context,
            ClassFormat::Class,
        ] {
            assert_eq!(ClassFormat::decode(format.encode()), Some(format));
        }
        assert_eq!(ClassFormat::decode(0xFF), None);
        assert_eq!(ClassFormat::decode(-1), None);
    }

    #[test]
    fn code_header_word() {
        let code = CompiledCode {
            kind: CodeKind::Method,
            num_args: 2,
            num_temps: 5,
            large_frame: true,
            primitive: 0,
            literals: vec![Value::NIL; 3],
            bytecodes: vec![0x70, 0x7C],
            owner: Value::NIL,
        };
        assert_eq!(
            CompiledCode::decode_header(code.header_word()),
            (2, 5, true, 3)
        );
        assert_eq!(code.initial_pc(), 33);
        assert_eq!(code.slot_count(), 6);
    }

    #[test]
    fn primitive_arrays_have_no_edges() {
        let mut storage = ArrayStorage::new(2, true);
        storage.write_raw_longs(0, &[1, 2]).unwrap();
        let body = Body::Array(storage);
        let mut collector = EdgeCollector::default();
        body.visit_edges(&mut collector);
        assert!(collector.edges.is_empty());
    }

    #[test]
    fn closure_edges() {
        let body = Body::Closure(BlockClosure {
            outer_context: Value::from_oop(1),
            block: Value::from_oop(2),
            receiver: Value::from_i64(3),
            num_args: 0,
            copied: vec![Value::from_oop(4)],
        });
        let mut collector = EdgeCollector::default();
        body.visit_edges(&mut collector);
        assert_eq!(
            collector.edges,
            vec![Value::from_oop(1), Value::from_oop(2), Value::from_oop(4)]
        );
        assert_eq!(body.family(), ObjectFamily::Closure);
    }
}
