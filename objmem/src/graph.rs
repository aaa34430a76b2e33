//! Whole-heap graph walks: reachability, instance enumeration and a
//! mark-and-sweep collector.
//!
//! A trace starts from the registered roots, the special objects, every
//! process's suspended context and stack frames, plus whatever an external
//! [`RootProvider`] reports. Reaching a context also reaches its frame.

use ahash::AHashSet;

use crate::{
    Body, ContextObject, EdgeCollector, Frame, FrameId, HeaderFlags, HeapObject,
    ObjectMemory, Oop, Sender, Value, Visitable, Visitor, error::inconsistency,
};

/// Roots held outside the memory, such as an interpreter's registers.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRoots;

impl RootProvider for NoRoots {
    fn visit_roots(&mut self, _visitor: &mut dyn FnMut(&mut Value)) {}
}

impl RootProvider for Vec<Value> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for root in self.iter_mut() {
            visitor(root);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    pub live_objects: usize,
    pub freed_objects: usize,
    pub freed_frames: usize,
}

/// Everything a trace reached. The objects are still marked.
#[derive(Debug, Default)]
pub(crate) struct Trace {
    pub objects: Vec<Oop>,
    pub frames: AHashSet<FrameId>,
}

fn frame_refers_to(frame: &Frame, target: Value) -> bool {
    frame.method == target
        || frame.closure == target
        || frame.receiver == target
        || frame.sender == Sender::Context(target)
        || frame.used_slots().contains(&target)
}

impl ObjectMemory {
    // ── tracing ────────────────────────────────────────────────────

    /// Mark everything reachable. Callers must clear the marks again.
    pub(crate) fn mark_from(&mut self, extra: &mut dyn RootProvider) -> Trace {
        let mut pending = EdgeCollector::default();
        for &root in &self.roots {
            pending.visit(root);
        }
        self.specials.visit(&mut |v| pending.visit(v));
        extra.visit_roots(&mut |v| pending.visit(*v));

        let mut frame_work: Vec<FrameId> = Vec::new();
        for process in self.processes.iter() {
            pending.visit(process.suspended_context);
            frame_work.extend(process.stack.iter().copied());
        }

        let mut trace = Trace::default();
        loop {
            while let Some(id) = frame_work.pop() {
                if !trace.frames.insert(id) {
                    continue;
                }
                let Some(frame) = self.frames.get(id) else {
                    inconsistency(format_args!("traced a dead frame {id:?}"));
                };
                frame.visit_edges(&mut pending);
                if let Sender::Marker(caller) = frame.sender {
                    frame_work.push(caller);
                }
            }

            let Some(value) = pending.edges.pop() else {
                break;
            };
            let Some(oop) = value.oop() else {
                continue;
            };
            let Some(object) = self.get_mut(oop) else {
                inconsistency(format_args!("dangling reference {value:?} in the graph"));
            };
            if object.header.has_flag(HeaderFlags::MARK) {
                continue;
            }
            object.header.add_flag(HeaderFlags::MARK);
            object.visit_edges(&mut pending);
            if let Body::Context(ContextObject { frame }) = object.body {
                frame_work.push(frame);
            }
            trace.objects.push(oop);
        }
        trace
    }

    pub(crate) fn clear_marks(&mut self, objects: &[Oop]) {
        for &oop in objects {
            if let Some(object) = self.get_mut(oop) {
                object.header.remove_flag(HeaderFlags::MARK);
            }
        }
    }

    /// Every object reachable from the roots, in discovery order.
    pub fn reachable(&mut self, extra: &mut dyn RootProvider) -> Vec<Value> {
        let trace = self.mark_from(extra);
        self.clear_marks(&trace.objects);
        trace.objects.into_iter().map(Value::from_oop).collect()
    }

    // ── enumeration ────────────────────────────────────────────────

    fn live_objects(&self) -> impl Iterator<Item = (Value, &HeapObject)> + '_ {
        self.objects.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|object| (Value::from_oop(i as Oop), object))
        })
    }

    /// Every live object, reachable or not.
    pub fn all_instances(&self) -> Vec<Value> {
        self.live_objects().map(|(v, _)| v).collect()
    }

    pub fn all_instances_of(&self, class: Value) -> Vec<Value> {
        self.live_objects()
            .filter(|(_, object)| object.class == class)
            .map(|(v, _)| v)
            .collect()
    }

    pub fn some_instance_of(&self, class: Value) -> Option<Value> {
        self.live_objects()
            .find(|(_, object)| object.class == class)
            .map(|(v, _)| v)
    }

    /// Objects with a field holding `target`. A context counts when its
    /// frame holds it.
    pub fn pointers_to(&self, target: Value) -> Vec<Value> {
        if !target.is_ref() {
            return Vec::new();
        }
        self.live_objects()
            .filter(|(_, object)| {
                let mut edges = EdgeCollector::default();
                object.visit_edges(&mut edges);
                if edges.edges.contains(&target) {
                    return true;
                }
                match object.body {
                    Body::Context(ContextObject { frame }) => self
                        .frames
                        .get(frame)
                        .is_some_and(|f| frame_refers_to(f, target)),
                    _ => false,
                }
            })
            .map(|(v, _)| v)
            .collect()
    }

    // ── collection ─────────────────────────────────────────────────

    /// Reclaim every object unreachable from the roots, together with the
    /// frames only dead contexts still held.
    pub fn collect(&mut self, extra: &mut dyn RootProvider) -> CollectionStats {
        let trace = self.mark_from(extra);
        let mut stats = CollectionStats {
            live_objects: trace.objects.len(),
            ..Default::default()
        };
        for oop in 0..self.objects.len() as Oop {
            match self.get_mut(oop) {
                None => continue,
                Some(object) if object.header.has_flag(HeaderFlags::MARK) => {
                    object.header.remove_flag(HeaderFlags::MARK);
                    continue;
                }
                Some(_) => (),
            }
            let Some(dead) = self.release(oop) else {
                continue;
            };
            stats.freed_objects += 1;
            if let Body::Context(ContextObject { frame }) = dead.body {
                if !trace.frames.contains(&frame) && self.frames.remove(frame).is_some() {
                    stats.freed_frames += 1;
                }
            }
        }
        log::info!(
            "collection: {} live, {} objects freed, {} frames freed",
            stats.live_objects,
            stats.freed_objects,
            stats.freed_frames
        );
        stats
    }
}
