use crate::{FrameId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Runnable,
    Suspended,
    Terminated,
}

#[derive(Debug)]
pub struct Process {
    pub id: ProcessId,
    pub state: ProcessState,
    /// Frame handles, bottom first.
    pub stack: Vec<FrameId>,
    /// Context to resume from while the stack is empty.
    pub suspended_context: Value,
}

/// Registry of every cooperatively scheduled process.
///
/// Scheduling policy lives elsewhere. The table only knows which stacks
/// exist, so whole-heap operations can reach frames of processes that are
/// not running.
#[derive(Debug)]
pub struct ProcessTable {
    processes: Vec<Process>,
    active: ProcessId,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// A table holding only the main process, which is active.
    pub fn new() -> Self {
        let main = ProcessId(0);
        Self {
            processes: vec![Process {
                id: main,
                state: ProcessState::Runnable,
                stack: Vec::new(),
                suspended_context: Value::NIL,
            }],
            active: main,
        }
    }

    pub fn spawn(&mut self) -> ProcessId {
        let id = ProcessId(self.processes.len() as u32);
        self.processes.push(Process {
            id,
            state: ProcessState::Suspended,
            stack: Vec::new(),
            suspended_context: Value::NIL,
        });
        log::trace!("spawned process {id:?}");
        id
    }

    #[inline]
    pub fn active(&self) -> ProcessId {
        self.active
    }

    /// Make `id` the running process; the previous one becomes suspended.
    pub fn switch_to(&mut self, id: ProcessId) -> Option<()> {
        let next = self.processes.get(id.index())?;
        if next.state == ProcessState::Terminated {
            return None;
        }
        let previous = self.active;
        if let Some(p) = self.processes.get_mut(previous.index()) {
            if p.state == ProcessState::Runnable {
                p.state = ProcessState::Suspended;
            }
        }
        self.processes[id.index()].state = ProcessState::Runnable;
        self.active = id;
        Some(())
    }

    #[inline]
    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.iter_mut()
    }

    /// Every frame handle on every stack.
    pub fn stack_frames(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.processes.iter().flat_map(|p| p.stack.iter().copied())
    }
}
