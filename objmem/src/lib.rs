mod accessor;
mod context;
mod dispatch;
mod error;
mod frame;
mod graph;
mod header;
mod lanes;
mod memory;
mod objects;
mod process;
mod settings;
mod storage;
mod substitution;
mod value;
mod visitor;
mod vm;
mod writer;

pub use context::{ContextFields, ContextState};
pub use dispatch::{DispatchToken, InlineCache};
pub use error::{Error, Result};
pub use frame::*;
pub use graph::{CollectionStats, NoRoots, RootProvider};
pub use header::{HASH_BITS, HASH_MASK, Header, HeaderFlags};
pub use lanes::{LaneWidth, NativeStorage};
pub use memory::{CodeSpec, ObjectMemory, SpecialObjects};
pub use objects::*;
pub use process::*;
pub use settings::{MemoryCreateInfo, MemorySettings};
pub use storage::*;
pub use value::*;
pub use visitor::{EdgeCollector, Visitable, Visitor};
pub use vm::{Vm, VmCreateInfo, VmProxy};
pub use writer::{ImageWriter, RecordingWriter, WrittenSlot};
