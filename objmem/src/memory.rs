use crate::{
    ArrayStorage, BlockClosure, Body, ClassFormat, ClassObject, CodeKind,
    CompiledCode, ContextObject, DispatchToken, Element, Frame, FrameArena,
    HASH_MASK, Header, HeapObject, LaneWidth, MemorySettings, NativeStorage,
    Oop, ProcessTable,
    error::{Error, Result},
    value::Value,
};

// ── Special objects ───────────────────────────────────────────────────

/// Classes the memory itself needs to know about.
#[derive(Debug, Clone)]
pub struct SpecialObjects {
    pub metaclass: Value,
    pub object_class: Value,
    pub undefined_object_class: Value,
    pub true_class: Value,
    pub false_class: Value,
    pub small_integer_class: Value,
    pub character_class: Value,
    pub array_class: Value,
    pub byte_array_class: Value,
    pub string_class: Value,
    pub symbol_class: Value,
    pub double_byte_array_class: Value,
    pub word_array_class: Value,
    pub double_word_array_class: Value,
    pub float_class: Value,
    pub large_positive_integer_class: Value,
    pub large_negative_integer_class: Value,
    pub context_class: Value,
    pub closure_class: Value,
    pub method_class: Value,
    pub block_class: Value,
    pub method_dictionary_class: Value,
}

impl SpecialObjects {
    fn null() -> Self {
        Self {
            metaclass: Value::NIL,
            object_class: Value::NIL,
            undefined_object_class: Value::NIL,
            true_class: Value::NIL,
            false_class: Value::NIL,
            small_integer_class: Value::NIL,
            character_class: Value::NIL,
            array_class: Value::NIL,
            byte_array_class: Value::NIL,
            string_class: Value::NIL,
            symbol_class: Value::NIL,
            double_byte_array_class: Value::NIL,
            word_array_class: Value::NIL,
            double_word_array_class: Value::NIL,
            float_class: Value::NIL,
            large_positive_integer_class: Value::NIL,
            large_negative_integer_class: Value::NIL,
            context_class: Value::NIL,
            closure_class: Value::NIL,
            method_class: Value::NIL,
            block_class: Value::NIL,
            method_dictionary_class: Value::NIL,
        }
    }

    pub fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for v in [
            &mut self.metaclass,
            &mut self.object_class,
            &mut self.undefined_object_class,
            &mut self.true_class,
            &mut self.false_class,
            &mut self.small_integer_class,
            &mut self.character_class,
            &mut self.array_class,
            &mut self.byte_array_class,
            &mut self.string_class,
            &mut self.symbol_class,
            &mut self.double_byte_array_class,
            &mut self.word_array_class,
            &mut self.double_word_array_class,
            &mut self.float_class,
            &mut self.large_positive_integer_class,
            &mut self.large_negative_integer_class,
            &mut self.context_class,
            &mut self.closure_class,
            &mut self.method_class,
            &mut self.block_class,
            &mut self.method_dictionary_class,
        ] {
            visitor(v);
        }
    }

    pub fn visit(&self, visitor: &mut dyn FnMut(Value)) {
        let mut copy = self.clone();
        copy.visit_mut(&mut |v| visitor(*v));
    }

    fn native_class(&self, width: LaneWidth) -> Value {
        match width {
            LaneWidth::W8 => self.byte_array_class,
            LaneWidth::W16 => self.double_byte_array_class,
            LaneWidth::W32 => self.word_array_class,
            LaneWidth::W64 => self.double_word_array_class,
        }
    }
}

/// Everything needed to build a compiled method or block.
#[derive(Debug, Clone, Default)]
pub struct CodeSpec {
    pub num_args: usize,
    pub num_temps: usize,
    pub large_frame: bool,
    pub primitive: u16,
    pub literals: Vec<Value>,
    pub bytecodes: Vec<u8>,
}

// ── Object memory ─────────────────────────────────────────────────────

/// The heap of objects and activation records.
///
/// Objects live in an arena addressed by [`Oop`]; frames live in a
/// [`FrameArena`]. Every mutating operation takes `&mut self`, which is the
/// exclusion whole-heap operations rely on.
#[derive(Debug)]
pub struct ObjectMemory {
    settings: MemorySettings,
    pub(crate) objects: Vec<Option<HeapObject>>,
    free: Vec<Oop>,
    pub(crate) frames: FrameArena,
    pub(crate) processes: ProcessTable,
    pub specials: SpecialObjects,
    pub(crate) roots: Vec<Value>,
    hash_state: u32,
}

impl Default for ObjectMemory {
    fn default() -> Self {
        Self::new(MemorySettings::default())
    }
}

impl ObjectMemory {
    pub fn new(settings: MemorySettings) -> Self {
        debug_assert!(settings.validate().is_ok());
        let mut memory = Self {
            objects: Vec::with_capacity(settings.initial_capacity),
            free: Vec::new(),
            frames: FrameArena::default(),
            processes: ProcessTable::new(),
            specials: SpecialObjects::null(),
            roots: Vec::new(),
            hash_state: settings.hash_seed,
            settings,
        };
        memory.bootstrap();
        memory
    }

    fn bootstrap(&mut self) {
        let metaclass = self.allocate(
            Value::NIL,
            Body::Class(ClassObject {
                superclass: Value::NIL,
                method_dict: Value::NIL,
                format: ClassFormat::Class,
                name: Value::NIL,
                extra: Vec::new(),
                dispatch: DispatchToken::default(),
            }),
        );
        self.set_class_unchecked(metaclass, metaclass);
        self.specials.metaclass = metaclass;

        let object = self.allocate_class(Value::NIL, ClassFormat::Empty);
        self.specials.object_class = object;
        self.specials.undefined_object_class = self.allocate_class(object, ClassFormat::Empty);
        self.specials.true_class = self.allocate_class(object, ClassFormat::Empty);
        self.specials.false_class = self.allocate_class(object, ClassFormat::Empty);
        self.specials.small_integer_class = self.allocate_class(object, ClassFormat::Empty);
        self.specials.character_class = self.allocate_class(object, ClassFormat::Empty);
        self.specials.array_class = self.allocate_class(object, ClassFormat::Variable);
        self.specials.byte_array_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W8));
        self.specials.string_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W8));
        self.specials.symbol_class = self.allocate_class(
            self.specials.string_class,
            ClassFormat::Bytes(LaneWidth::W8),
        );
        self.specials.double_byte_array_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W16));
        self.specials.word_array_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W32));
        self.specials.double_word_array_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W64));
        self.specials.float_class = self.allocate_class(object, ClassFormat::Float);
        self.specials.large_positive_integer_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W8));
        self.specials.large_negative_integer_class =
            self.allocate_class(object, ClassFormat::Bytes(LaneWidth::W8));
        self.specials.context_class = self.allocate_class(object, ClassFormat::Context);
        self.specials.closure_class = self.allocate_class(object, ClassFormat::Closure);
        self.specials.method_class = self.allocate_class(object, ClassFormat::Code);
        self.specials.block_class = self.allocate_class(object, ClassFormat::Code);
        self.specials.method_dictionary_class =
            self.allocate_class(object, ClassFormat::Variable);

        let names = [
            (metaclass, "Metaclass"),
            (object, "Object"),
            (self.specials.undefined_object_class, "UndefinedObject"),
            (self.specials.true_class, "True"),
            (self.specials.false_class, "False"),
            (self.specials.small_integer_class, "SmallInteger"),
            (self.specials.character_class, "Character"),
            (self.specials.array_class, "Array"),
            (self.specials.byte_array_class, "ByteArray"),
            (self.specials.string_class, "ByteString"),
            (self.specials.symbol_class, "ByteSymbol"),
            (self.specials.double_byte_array_class, "DoubleByteArray"),
            (self.specials.word_array_class, "WordArray"),
            (self.specials.double_word_array_class, "DoubleWordArray"),
            (self.specials.float_class, "BoxedFloat64"),
            (
                self.specials.large_positive_integer_class,
                "LargePositiveInteger",
            ),
            (
                self.specials.large_negative_integer_class,
                "LargeNegativeInteger",
            ),
            (self.specials.context_class, "Context"),
            (self.specials.closure_class, "FullBlockClosure"),
            (self.specials.method_class, "CompiledMethod"),
            (self.specials.block_class, "CompiledBlock"),
            (self.specials.method_dictionary_class, "MethodDictionary"),
        ];
        for (class, name) in names {
            let symbol = self.new_symbol(name);
            if let Some(Body::Class(c)) = self.body_mut_unchecked(class) {
                c.name = symbol;
            }
        }
        log::debug!("bootstrapped {} objects", self.object_count());
    }

    #[inline]
    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    // ── allocation ─────────────────────────────────────────────────

    fn next_hash(&mut self) -> u32 {
        loop {
            // xorshift32
            let mut x = self.hash_state;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.hash_state = x;
            let hash = x & HASH_MASK;
            if hash != 0 {
                return hash;
            }
        }
    }

    pub fn allocate(&mut self, class: Value, body: Body) -> Value {
        let object = HeapObject {
            header: Header::new(self.next_hash()),
            class,
            body,
        };
        let oop = match self.free.pop() {
            Some(oop) => {
                self.objects[oop as usize] = Some(object);
                oop
            }
            None => {
                self.objects.push(Some(object));
                (self.objects.len() - 1) as Oop
            }
        };
        Value::from_oop(oop)
    }

    /// Drop the object at `oop`. Only the collector may call this.
    pub(crate) fn release(&mut self, oop: Oop) -> Option<HeapObject> {
        let object = self.objects.get_mut(oop as usize)?.take()?;
        self.free.push(oop);
        Some(object)
    }

    fn allocate_class(&mut self, superclass: Value, format: ClassFormat) -> Value {
        self.allocate(
            self.specials.metaclass,
            Body::Class(ClassObject {
                superclass,
                method_dict: Value::NIL,
                format,
                name: Value::NIL,
                extra: Vec::new(),
                dispatch: DispatchToken::default(),
            }),
        )
    }

    fn set_class_unchecked(&mut self, target: Value, class: Value) {
        if let Some(object) = target
            .oop()
            .and_then(|oop| self.objects.get_mut(oop as usize))
            .and_then(Option::as_mut)
        {
            object.class = class;
        }
    }

    fn body_mut_unchecked(&mut self, target: Value) -> Option<&mut Body> {
        let oop = target.oop()?;
        self.objects
            .get_mut(oop as usize)?
            .as_mut()
            .map(|o| &mut o.body)
    }

    // ── lookup ─────────────────────────────────────────────────────

    #[inline]
    pub(crate) fn get(&self, oop: Oop) -> Option<&HeapObject> {
        self.objects.get(oop as usize)?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, oop: Oop) -> Option<&mut HeapObject> {
        self.objects.get_mut(oop as usize)?.as_mut()
    }

    pub fn object(&self, value: Value) -> Result<&HeapObject> {
        let oop = value.oop().ok_or(Error::BadReceiver("immediate value"))?;
        self.get(oop)
            .ok_or(Error::UnsupportedValue("dangling reference"))
    }

    pub fn object_mut(&mut self, value: Value) -> Result<&mut HeapObject> {
        let oop = value.oop().ok_or(Error::BadReceiver("immediate value"))?;
        self.get_mut(oop)
            .ok_or(Error::UnsupportedValue("dangling reference"))
    }

    #[inline]
    pub fn body(&self, value: Value) -> Result<&Body> {
        self.object(value).map(|o| &o.body)
    }

    #[inline]
    pub fn body_mut(&mut self, value: Value) -> Result<&mut Body> {
        self.object_mut(value).map(|o| &mut o.body)
    }

    #[inline]
    pub fn is_live(&self, value: Value) -> bool {
        value.oop().is_some_and(|oop| self.get(oop).is_some())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len() - self.free.len()
    }

    // ── classes and hashes ─────────────────────────────────────────

    pub fn class_of(&self, value: Value) -> Result<Value> {
        if value.is_fixnum() {
            return Ok(self.specials.small_integer_class);
        }
        if value.is_nil() {
            return Ok(self.specials.undefined_object_class);
        }
        match value.as_bool() {
            Some(true) => return Ok(self.specials.true_class),
            Some(false) => return Ok(self.specials.false_class),
            None => (),
        }
        if value.is_char() {
            return Ok(self.specials.character_class);
        }
        if value.is_malformed() {
            return Err(Error::UnsupportedValue("malformed immediate"));
        }
        Ok(self.object(value)?.class)
    }

    pub fn identity_hash(&self, value: Value) -> Result<u32> {
        if let Some(n) = value.as_i64() {
            return Ok(n as u32 & HASH_MASK);
        }
        if let Some(c) = value.as_char() {
            return Ok(c & HASH_MASK);
        }
        if value.is_immediate() {
            if value.is_malformed() {
                return Err(Error::UnsupportedValue("malformed immediate"));
            }
            return Ok((value.raw() as u32) & HASH_MASK);
        }
        Ok(self.object(value)?.header.hash())
    }

    pub fn set_identity_hash(&mut self, value: Value, hash: u32) -> Result<()> {
        if hash & !HASH_MASK != 0 || hash == 0 {
            return Err(Error::BadArgument("identity hash out of range"));
        }
        self.object_mut(value)?.header.set_hash(hash);
        Ok(())
    }

    /// How the storage engine sees `value`.
    pub fn classify(&self, value: Value) -> Result<Element> {
        if let Some(n) = value.as_i64() {
            return Ok(Element::Long(n));
        }
        if value.is_nil() {
            return Ok(Element::Nil);
        }
        if let Some(b) = value.as_bool() {
            return Ok(Element::Boolean(b));
        }
        if let Some(c) = value.as_char() {
            return Ok(Element::Char(c));
        }
        if value.is_malformed() {
            return Err(Error::UnsupportedValue("malformed immediate"));
        }
        match value.oop().and_then(|oop| self.get(oop)) {
            Some(HeapObject {
                body: Body::Float(d),
                ..
            }) => Ok(Element::Double(*d)),
            Some(_) => Ok(Element::Object),
            None => Err(Error::UnsupportedValue("dangling reference")),
        }
    }

    // ── floats and integers ────────────────────────────────────────

    pub fn box_float(&mut self, value: f64) -> Value {
        self.allocate(self.specials.float_class, Body::Float(value))
    }

    pub fn float_value(&self, value: Value) -> Option<f64> {
        match self.body(value).ok()? {
            Body::Float(d) => Some(*d),
            _ => None,
        }
    }

    /// A fixnum, or a large integer for values outside the fixnum range.
    pub fn integer_object(&mut self, n: i128) -> Value {
        if let Some(v) = i64::try_from(n).ok().and_then(Value::try_from_i64) {
            return v;
        }
        let class = if n < 0 {
            self.specials.large_negative_integer_class
        } else {
            self.specials.large_positive_integer_class
        };
        let magnitude = n.unsigned_abs().to_le_bytes();
        let len = magnitude
            .iter()
            .rposition(|&b| b != 0)
            .map_or(1, |i| i + 1);
        self.allocate(
            class,
            Body::Native(NativeStorage::from_bytes(&magnitude[..len])),
        )
    }

    /// Value of a fixnum or a large integer of at most 16 digits.
    pub fn integer_value(&self, value: Value) -> Option<i128> {
        if let Some(n) = value.as_i64() {
            return Some(n as i128);
        }
        let object = self.object(value).ok()?;
        let negative = if object.class == self.specials.large_positive_integer_class
        {
            false
        } else if object.class == self.specials.large_negative_integer_class {
            true
        } else {
            return None;
        };
        let Body::Native(storage) = &object.body else {
            return None;
        };
        let digits = storage.as_bytes()?;
        if digits.len() > 16 {
            return None;
        }
        let mut raw = [0u8; 16];
        raw[..digits.len()].copy_from_slice(digits);
        let magnitude = u128::from_le_bytes(raw);
        if negative {
            0i128.checked_sub_unsigned(magnitude)
        } else {
            i128::try_from(magnitude).ok()
        }
    }

    // ── constructors ───────────────────────────────────────────────

    pub fn new_class(
        &mut self,
        name: &str,
        superclass: Value,
        format: ClassFormat,
    ) -> Result<Value> {
        if !superclass.is_nil() {
            self.class_format(superclass)?;
        }
        let name = self.new_symbol(name);
        let class = self.allocate_class(superclass, format);
        if let Body::Class(c) = self.body_mut(class)? {
            c.name = name;
        }
        Ok(class)
    }

    pub fn class_format(&self, class: Value) -> Result<ClassFormat> {
        match self.body(class)? {
            Body::Class(c) => Ok(c.format),
            _ => Err(Error::BadArgument("not a class")),
        }
    }

    pub fn dispatch_token(&self, class: Value) -> Option<DispatchToken> {
        match self.body(class).ok()? {
            Body::Class(c) => Some(c.dispatch),
            _ => None,
        }
    }

    pub(crate) fn invalidate_dispatch(&mut self, class: Value) {
        if let Ok(Body::Class(c)) = self.body_mut(class) {
            c.dispatch.invalidate();
            log::trace!("invalidated dispatch token of {class:?}");
        }
    }

    /// A new instance of `class` with `size` indexable slots.
    pub fn instantiate(&mut self, class: Value, size: usize) -> Result<Value> {
        let body = match self.class_format(class)? {
            ClassFormat::Empty if size == 0 => Body::Empty,
            ClassFormat::Fixed(n) if size == 0 => Body::Pointers(vec![Value::NIL; n]),
            ClassFormat::Empty | ClassFormat::Fixed(_) => {
                return Err(Error::BadArgument("class is not indexable"));
            }
            ClassFormat::Variable => Body::Array(ArrayStorage::new(
                size,
                self.settings.storage_strategies,
            )),
            ClassFormat::Bytes(width) => Body::Native(NativeStorage::new(width, size)),
            ClassFormat::Float => Body::Float(0.0),
            ClassFormat::Context => {
                let frame_size = if size == 0 {
                    self.settings.small_frame_size
                } else {
                    size
                };
                let frame = self.frames.insert(Frame::blank(frame_size));
                let context =
                    self.allocate(class, Body::Context(ContextObject { frame }));
                if let Some(f) = self.frames.get_mut(frame) {
                    f.context = Some(context);
                }
                return Ok(context);
            }
            ClassFormat::Closure => Body::Closure(BlockClosure {
                outer_context: Value::NIL,
                block: Value::NIL,
                receiver: Value::NIL,
                num_args: 0,
                copied: vec![Value::NIL; size],
            }),
            ClassFormat::Code => {
                return Err(Error::BadArgument("compiled code needs a CodeSpec"));
            }
            ClassFormat::Class => {
                return Err(Error::BadArgument("classes are built with new_class"));
            }
        };
        Ok(self.allocate(class, body))
    }

    pub fn new_array(&mut self, size: usize) -> Result<Value> {
        self.instantiate(self.specials.array_class, size)
    }

    /// An array holding `values`, written through the storage engine.
    pub fn new_array_from(&mut self, values: &[Value]) -> Result<Value> {
        let mut elements = Vec::with_capacity(values.len());
        for &v in values {
            elements.push((v, self.classify(v)?));
        }
        let mut storage =
            ArrayStorage::new(values.len(), self.settings.storage_strategies);
        storage.fill_from_values(&elements, |d| self.box_float(d))?;
        Ok(self.allocate(self.specials.array_class, Body::Array(storage)))
    }

    pub fn new_string(&mut self, s: &str) -> Value {
        self.allocate(
            self.specials.string_class,
            Body::Native(NativeStorage::from_text(s)),
        )
    }

    pub fn new_symbol(&mut self, s: &str) -> Value {
        self.allocate(
            self.specials.symbol_class,
            Body::Native(NativeStorage::from_text(s)),
        )
    }

    pub fn new_native(&mut self, storage: NativeStorage) -> Value {
        let class = self.specials.native_class(storage.width());
        self.allocate(class, Body::Native(storage))
    }

    pub fn new_method(&mut self, spec: CodeSpec, owner: Value) -> Result<Value> {
        self.new_code(CodeKind::Method, spec, owner)
    }

    /// A compiled block whose home is `method`.
    pub fn new_block(&mut self, spec: CodeSpec, method: Value) -> Result<Value> {
        self.compiled_code(method)?;
        self.new_code(CodeKind::Block, spec, method)
    }

    fn new_code(
        &mut self,
        kind: CodeKind,
        spec: CodeSpec,
        owner: Value,
    ) -> Result<Value> {
        if spec.num_temps < spec.num_args {
            return Err(Error::BadArgument("fewer temps than arguments"));
        }
        if spec.num_args > CompiledCode::MAX_ARGS
            || spec.num_temps > CompiledCode::MAX_TEMPS
            || spec.literals.len() > CompiledCode::MAX_LITERALS
        {
            return Err(Error::BadArgument("code header cannot encode this shape"));
        }
        let code = CompiledCode {
            kind,
            num_args: spec.num_args,
            num_temps: spec.num_temps,
            large_frame: spec.large_frame,
            primitive: spec.primitive,
            literals: spec.literals,
            bytecodes: spec.bytecodes,
            owner,
        };
        if code.num_temps > self.frame_size_of(&code) {
            return Err(Error::BadArgument("temps exceed frame size"));
        }
        let class = match kind {
            CodeKind::Method => self.specials.method_class,
            CodeKind::Block => self.specials.block_class,
        };
        Ok(self.allocate(class, Body::Code(code)))
    }

    #[inline]
    pub fn frame_size_of(&self, code: &CompiledCode) -> usize {
        if code.large_frame {
            self.settings.large_frame_size
        } else {
            self.settings.small_frame_size
        }
    }

    pub fn compiled_code(&self, value: Value) -> Result<&CompiledCode> {
        match self.body(value)? {
            Body::Code(code) => Ok(code),
            _ => Err(Error::BadArgument("not compiled code")),
        }
    }

    /// Cached owning class of a method.
    pub fn method_class(&self, method: Value) -> Result<Value> {
        Ok(self.compiled_code(method)?.owner)
    }

    /// Install `class` as the owner of `method`; `class`'s cached lookups
    /// are invalidated.
    pub fn set_method_class(&mut self, method: Value, class: Value) -> Result<()> {
        self.class_format(class)?;
        match self.body_mut(method)? {
            Body::Code(code) if code.kind == CodeKind::Method => code.owner = class,
            _ => return Err(Error::BadReceiver("not a compiled method")),
        }
        self.invalidate_dispatch(class);
        Ok(())
    }

    // ── typed views ────────────────────────────────────────────────

    pub fn array_storage(&self, value: Value) -> Result<&ArrayStorage> {
        match self.body(value)? {
            Body::Array(storage) => Ok(storage),
            _ => Err(Error::BadReceiver("not a variable container")),
        }
    }

    pub fn native_storage(&self, value: Value) -> Result<&NativeStorage> {
        match self.body(value)? {
            Body::Native(storage) => Ok(storage),
            _ => Err(Error::BadReceiver("not a byte-lane container")),
        }
    }

    pub fn native_storage_mut(&mut self, value: Value) -> Result<&mut NativeStorage> {
        match self.body_mut(value)? {
            Body::Native(storage) => Ok(storage),
            _ => Err(Error::BadReceiver("not a byte-lane container")),
        }
    }

    /// Reallocate a byte-lane container at `width`.
    pub fn convert_to_width(&mut self, value: Value, width: LaneWidth) -> Result<()> {
        self.native_storage_mut(value)?.convert_to_width(width);
        Ok(())
    }

    pub fn string_value(&self, value: Value) -> Result<&str> {
        self.native_storage(value)?.as_utf8()
    }

    // ── roots ──────────────────────────────────────────────────────

    /// Register an extra root kept alive and rewritten by whole-heap
    /// operations.
    pub fn add_root(&mut self, value: Value) {
        self.roots.push(value);
    }

    pub fn remove_root(&mut self, value: Value) -> bool {
        match self.roots.iter().position(|&r| r == value) {
            Some(i) => {
                self.roots.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn roots(&self) -> &[Value] {
        &self.roots
    }

    #[inline]
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    #[inline]
    pub fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.processes
    }

    #[inline]
    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    // ── copying ────────────────────────────────────────────────────

    /// A new object with the same class and an independent copy of the body.
    pub fn shallow_copy(&mut self, value: Value) -> Result<Value> {
        let object = self.object(value)?;
        if matches!(object.body, Body::Context(_)) {
            return self.shallow_copy_context(value);
        }
        let (class, body) = (object.class, object.body.clone());
        Ok(self.allocate(class, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageKind;

    fn mk_memory() -> ObjectMemory {
        ObjectMemory::default()
    }

    #[test]
    fn bootstrap_names_classes() {
        let memory = mk_memory();
        let array = memory.specials.array_class;
        let Body::Class(class) = memory.body(array).unwrap() else {
            panic!("Array must be a class");
        };
        assert_eq!(memory.string_value(class.name), Ok("Array"));
        assert_eq!(memory.class_of(array), Ok(memory.specials.metaclass));
        assert_eq!(
            memory.class_of(memory.specials.metaclass),
            Ok(memory.specials.metaclass)
        );
    }

    #[test]
    fn immediates_have_classes() {
        let memory = mk_memory();
        assert_eq!(
            memory.class_of(Value::from_i64(3)),
            Ok(memory.specials.small_integer_class)
        );
        assert_eq!(
            memory.class_of(Value::NIL),
            Ok(memory.specials.undefined_object_class)
        );
        assert_eq!(memory.class_of(Value::TRUE), Ok(memory.specials.true_class));
        assert!(memory.class_of(Value::from_raw(0b11111)).is_err());
    }

    #[test]
    fn hashes_are_nonzero_and_stable() {
        let mut memory = mk_memory();
        let a = memory.new_array(1).unwrap();
        let b = memory.new_array(1).unwrap();
        let ha = memory.identity_hash(a).unwrap();
        assert_ne!(ha, 0);
        assert_eq!(memory.identity_hash(a).unwrap(), ha);
        assert_ne!(ha, memory.identity_hash(b).unwrap());
        assert!(memory.set_identity_hash(a, 0).is_err());
        memory.set_identity_hash(a, 5).unwrap();
        assert_eq!(memory.identity_hash(a), Ok(5));
    }

    #[test]
    fn classify_values() {
        let mut memory = mk_memory();
        let f = memory.box_float(2.5);
        let a = memory.new_array(0).unwrap();
        assert_eq!(memory.classify(f), Ok(Element::Double(2.5)));
        assert_eq!(memory.classify(a), Ok(Element::Object));
        assert_eq!(memory.classify(Value::from_i64(4)), Ok(Element::Long(4)));
        assert_eq!(
            memory.classify(Value::from_oop(999_999)),
            Err(Error::UnsupportedValue("dangling reference"))
        );
    }

    #[test]
    fn new_array_from_picks_storage() {
        let mut memory = mk_memory();
        let a = memory
            .new_array_from(&[Value::from_i64(1), Value::from_i64(2)])
            .unwrap();
        assert_eq!(memory.array_storage(a).unwrap().kind(), StorageKind::Long);
        let b = memory.new_array_from(&[Value::TRUE, Value::NIL]).unwrap();
        assert_eq!(memory.array_storage(b).unwrap().kind(), StorageKind::Boolean);
    }

    #[test]
    fn instantiate_respects_format() {
        let mut memory = mk_memory();
        let object = memory.specials.object_class;
        let point = memory
            .new_class("Point", object, ClassFormat::Fixed(2))
            .unwrap();
        let p = memory.instantiate(point, 0).unwrap();
        assert!(matches!(memory.body(p), Ok(Body::Pointers(f)) if f.len() == 2));
        assert_eq!(
            memory.instantiate(point, 3),
            Err(Error::BadArgument("class is not indexable"))
        );
        let words = memory.instantiate(memory.specials.word_array_class, 3).unwrap();
        assert_eq!(memory.native_storage(words).unwrap().width(), LaneWidth::W32);
    }

    #[test]
    fn large_integers() {
        let mut memory = mk_memory();
        let small = memory.integer_object(12);
        assert_eq!(small, Value::from_i64(12));
        let big = memory.integer_object(u64::MAX as i128);
        assert_eq!(
            memory.class_of(big),
            Ok(memory.specials.large_positive_integer_class)
        );
        assert_eq!(memory.integer_value(big), Some(u64::MAX as i128));
        let neg = memory.integer_object(i64::MIN as i128);
        assert_eq!(memory.integer_value(neg), Some(i64::MIN as i128));
        assert_eq!(memory.integer_value(Value::NIL), None);
    }

    #[test]
    fn code_validation() {
        let mut memory = mk_memory();
        let spec = CodeSpec {
            num_args: 3,
            num_temps: 1,
            ..Default::default()
        };
        assert!(memory.new_method(spec, Value::NIL).is_err());
        let spec = CodeSpec {
            num_temps: 20,
            ..Default::default()
        };
        assert_eq!(
            memory.new_method(spec, Value::NIL),
            Err(Error::BadArgument("temps exceed frame size"))
        );
    }

    #[test]
    fn code_shape_must_fit_the_header() {
        let mut memory = ObjectMemory::new(MemorySettings {
            large_frame_size: 128,
            ..Default::default()
        });
        let spec = CodeSpec {
            num_args: 16,
            num_temps: 16,
            large_frame: true,
            ..Default::default()
        };
        assert_eq!(
            memory.new_method(spec, Value::NIL),
            Err(Error::BadArgument("code header cannot encode this shape"))
        );
        let spec = CodeSpec {
            num_args: 15,
            num_temps: 15,
            large_frame: true,
            ..Default::default()
        };
        let method = memory.new_method(spec, Value::NIL).unwrap();
        let word = memory.compiled_code(method).unwrap().header_word();
        assert_eq!(CompiledCode::decode_header(word), (15, 15, true, 0));
    }

    #[test]
    fn shallow_copy_is_independent() {
        let mut memory = mk_memory();
        let a = memory.new_array_from(&[Value::from_i64(1)]).unwrap();
        let b = memory.shallow_copy(a).unwrap();
        assert_ne!(a, b);
        memory.write(b, 0, Value::TRUE).unwrap();
        assert_eq!(memory.read(a, 0), Ok(Value::from_i64(1)));
        assert_ne!(memory.identity_hash(a), memory.identity_hash(b));
    }
}
