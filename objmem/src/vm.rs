use std::sync::Arc;

use parking_lot::RwLock;

use crate::{MemoryCreateInfo, ObjectMemory, Result, Value};

#[derive(Debug)]
pub struct VmShared {
    pub memory: RwLock<ObjectMemory>,
}

/// Owner of the shared object memory.
#[derive(Debug)]
pub struct Vm {
    inner: Arc<VmShared>,
}

/// A per-thread handle onto the shared memory.
#[derive(Debug, Clone)]
pub struct VmProxy {
    pub shared: Arc<VmShared>,
}

#[derive(Debug, Default)]
pub struct VmCreateInfo {
    pub memory: MemoryCreateInfo,
}

impl Vm {
    pub fn new(info: VmCreateInfo) -> Result<Self, &'static str> {
        let settings = info.memory.settings()?;
        let inner = VmShared {
            memory: RwLock::new(ObjectMemory::new(settings)),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn new_proxy(&self) -> VmProxy {
        VmProxy {
            shared: self.inner.clone(),
        }
    }
}

impl VmProxy {
    pub fn create_proxy(&self) -> Self {
        self.clone()
    }

    /// Run a query under the shared lock.
    pub fn read<R>(&self, f: impl FnOnce(&ObjectMemory) -> R) -> R {
        f(&self.shared.memory.read())
    }

    /// Run an ordinary mutation under the exclusive lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut ObjectMemory) -> R) -> R {
        f(&mut self.shared.memory.write())
    }

    /// Run a whole-heap operation with every other proxy excluded for its
    /// entire duration.
    pub fn stop_the_world<R>(&self, f: impl FnOnce(&mut ObjectMemory) -> R) -> R {
        let mut memory = self.shared.memory.write();
        log::debug!("stopped the world");
        let result = f(&mut memory);
        log::debug!("resumed the world");
        result
    }

    pub fn become_two_way(&self, from: &[Value], to: &[Value], copy_hash: bool) -> Result<()> {
        self.stop_the_world(|memory| memory.become_two_way(from, to, copy_hash))
    }

    pub fn forward_one_way(&self, from: &[Value], to: &[Value], copy_hash: bool) -> Result<()> {
        self.stop_the_world(|memory| memory.forward_one_way(from, to, copy_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxies_share_one_memory() {
        let vm = Vm::new(VmCreateInfo::default()).unwrap();
        let a = vm.new_proxy();
        let b = a.create_proxy();
        let array = a.write(|memory| memory.new_array(2)).unwrap();
        assert_eq!(b.read(|memory| memory.size(array)), Ok(2));
    }

    #[test]
    fn become_across_threads() {
        let vm = Vm::new(VmCreateInfo::default()).unwrap();
        let proxy = vm.new_proxy();
        let (x, y, holder) = proxy.write(|memory| {
            let x = memory.new_string("x");
            let y = memory.new_string("y");
            let holder = memory.new_array_from(&[x]).unwrap();
            memory.add_root(holder);
            (x, y, holder)
        });

        let worker = proxy.create_proxy();
        std::thread::spawn(move || worker.forward_one_way(&[x], &[y], true))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(proxy.write(|memory| memory.read(holder, 0)), Ok(y));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let info = VmCreateInfo {
            memory: MemoryCreateInfo {
                hash_seed: Some(0),
                ..Default::default()
            },
        };
        assert!(Vm::new(info).is_err());
    }
}
