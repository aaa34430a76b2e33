//! Hook for image serialization.
//!
//! The memory emits each object's logical slots in on-disk order. Compact
//! in-memory encodings (nil tags, unboxed doubles, cached frames) are
//! expanded back into ordinary values first; the file format itself belongs
//! to the writer.

use crate::{
    Body, NoRoots, ObjectMemory, Oop, Slot, Value,
    error::{Error, Result},
};

pub trait ImageWriter {
    /// Opens the record of `oop`, the identity later [`ImageWriter::write_reference`]
    /// calls refer to.
    fn begin_object(&mut self, oop: Oop, class: Value, hash: u32, slots: usize);
    fn write_nil(&mut self);
    fn write_boolean(&mut self, value: bool);
    fn write_char(&mut self, code: u32);
    fn write_small_integer(&mut self, value: i64);
    fn write_float(&mut self, value: f64);
    fn write_reference(&mut self, oop: Oop);
    /// Raw little-endian payload of a byte-lane object or of bytecodes.
    fn write_bytes(&mut self, bytes: &[u8]);
    fn end_object(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum WrittenSlot {
    Begin {
        oop: Oop,
        class: Value,
        hash: u32,
        slots: usize,
    },
    Nil,
    Boolean(bool),
    Char(u32),
    SmallInteger(i64),
    Float(f64),
    Reference(Oop),
    Bytes(Vec<u8>),
    End,
}

/// Keeps everything it is asked to write.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    pub written: Vec<WrittenSlot>,
}

impl ImageWriter for RecordingWriter {
    fn begin_object(&mut self, oop: Oop, class: Value, hash: u32, slots: usize) {
        self.written.push(WrittenSlot::Begin {
            oop,
            class,
            hash,
            slots,
        });
    }

    fn write_nil(&mut self) {
        self.written.push(WrittenSlot::Nil);
    }

    fn write_boolean(&mut self, value: bool) {
        self.written.push(WrittenSlot::Boolean(value));
    }

    fn write_char(&mut self, code: u32) {
        self.written.push(WrittenSlot::Char(code));
    }

    fn write_small_integer(&mut self, value: i64) {
        self.written.push(WrittenSlot::SmallInteger(value));
    }

    fn write_float(&mut self, value: f64) {
        self.written.push(WrittenSlot::Float(value));
    }

    fn write_reference(&mut self, oop: Oop) {
        self.written.push(WrittenSlot::Reference(oop));
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.written.push(WrittenSlot::Bytes(bytes.to_vec()));
    }

    fn end_object(&mut self) {
        self.written.push(WrittenSlot::End);
    }
}

fn write_value(writer: &mut dyn ImageWriter, value: Value) -> Result<()> {
    if let Some(n) = value.as_i64() {
        writer.write_small_integer(n);
    } else if let Some(oop) = value.oop() {
        writer.write_reference(oop);
    } else if value.is_nil() {
        writer.write_nil();
    } else if let Some(b) = value.as_bool() {
        writer.write_boolean(b);
    } else if let Some(c) = value.as_char() {
        writer.write_char(c);
    } else {
        return Err(Error::UnsupportedValue("malformed immediate"));
    }
    Ok(())
}

/// What an object's slots look like before they reach the writer.
enum Layout {
    Slots,
    Array(Vec<Slot>),
    Bytes(Vec<u8>),
    Float(f64),
    Code { prefix: usize, bytecodes: Vec<u8> },
}

impl ObjectMemory {
    /// Emit `obj` through `writer`.
    ///
    /// Contexts resolve their sender first, so a writer never sees a frame
    /// marker.
    pub fn write_object(
        &mut self,
        obj: Value,
        writer: &mut dyn ImageWriter,
    ) -> Result<()> {
        let oop = obj.oop().ok_or(Error::BadReceiver("immediate value"))?;
        let object = self.object(obj)?;
        let (class, hash) = (object.class, object.header.hash());
        let layout = match &object.body {
            Body::Array(storage) => Layout::Array(
                (0..storage.len())
                    .map(|i| storage.read_slot(i))
                    .collect::<Result<_>>()?,
            ),
            Body::Native(storage) => Layout::Bytes(storage.to_le_bytes()),
            Body::Float(d) => Layout::Float(*d),
            Body::Code(code) => Layout::Code {
                prefix: code.slot_count() - code.bytecodes.len(),
                bytecodes: code.bytecodes.clone(),
            },
            _ => Layout::Slots,
        };
        let slots = self.size(obj)?;

        writer.begin_object(oop, class, hash, slots);
        match layout {
            Layout::Slots => {
                for i in 0..slots {
                    let value = self.read(obj, i)?;
                    write_value(writer, value)?;
                }
            }
            Layout::Array(elements) => {
                for slot in elements {
                    match slot {
                        Slot::Value(v) => write_value(writer, v)?,
                        Slot::Double(d) => writer.write_float(d),
                    }
                }
            }
            Layout::Bytes(bytes) => writer.write_bytes(&bytes),
            Layout::Float(d) => writer.write_float(d),
            Layout::Code { prefix, bytecodes } => {
                for i in 0..prefix {
                    let value = self.read(obj, i)?;
                    write_value(writer, value)?;
                }
                writer.write_bytes(&bytecodes);
            }
        }
        writer.end_object();
        Ok(())
    }

    /// Everything reachable once no reachable context still names its
    /// caller by frame marker. Writing a context then allocates nothing.
    fn settled_reachable(&mut self) -> Result<Vec<Value>> {
        loop {
            let before = self.object_count();
            let objects = self.reachable(&mut NoRoots);
            for &obj in &objects {
                if matches!(self.body(obj)?, Body::Context(_)) {
                    self.sender(obj)?;
                }
            }
            if self.object_count() == before {
                return Ok(objects);
            }
        }
    }

    /// Emit every object reachable from the memory's own roots, in
    /// discovery order. Every reference written names an emitted object.
    pub fn write_image(&mut self, writer: &mut dyn ImageWriter) -> Result<usize> {
        let objects = self.settled_reachable()?;
        for &obj in &objects {
            self.write_object(obj, writer)?;
        }
        log::info!("wrote {} objects", objects.len());
        Ok(objects.len())
    }
}
