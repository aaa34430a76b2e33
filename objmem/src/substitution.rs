//! Identity substitution.
//!
//! Two-way become exchanges the contents of object pairs in place, so every
//! existing reference observes the other object's state. One-way forwarding
//! rewrites references instead: every reachable field, frame slot and root
//! holding `from[i]` afterwards holds `to[i]`.

use ahash::AHashMap;

use crate::{
    Body, CodeKind, ContextObject, HeaderFlags, NoRoots, ObjectMemory, RootProvider,
    Value, Visitable, Visitor,
    error::{Error, Result, inconsistency},
};

/// Rewrites fields found in the forwarding map.
struct Forwarder<'a> {
    map: &'a AHashMap<Value, Value>,
    replaced: usize,
}

impl Visitor for Forwarder<'_> {
    #[inline]
    fn visit_mut(&mut self, value: &mut Value) {
        if let Some(&to) = self.map.get(value) {
            *value = to;
            self.replaced += 1;
        }
    }
}

impl ObjectMemory {
    // ── two-way ────────────────────────────────────────────────────

    /// Exchange `from[i]` and `to[i]` for every `i`.
    ///
    /// With `copy_hash` each identity keeps its own hash; otherwise hashes
    /// travel with the contents. If any pair is rejected, pairs already
    /// exchanged are swapped back and the error is returned.
    pub fn become_two_way(
        &mut self,
        from: &[Value],
        to: &[Value],
        copy_hash: bool,
    ) -> Result<()> {
        if from.len() != to.len() {
            return Err(Error::BadArgument("become arrays differ in length"));
        }
        for (i, (&a, &b)) in from.iter().zip(to).enumerate() {
            if let Err(err) = self.swap_pair(a, b, copy_hash) {
                for (&a, &b) in from[..i].iter().zip(&to[..i]).rev() {
                    if let Err(undo) = self.swap_pair(a, b, copy_hash) {
                        inconsistency(format_args!(
                            "rolling back become of {a:?} and {b:?} failed: {undo}"
                        ));
                    }
                }
                log::debug!("become rolled back after {i} pairs: {err}");
                return Err(err);
            }
        }
        log::info!("become exchanged {} pairs", from.len());
        Ok(())
    }

    fn swap_pair(&mut self, a: Value, b: Value, copy_hash: bool) -> Result<()> {
        let (Some(ia), Some(ib)) = (a.oop(), b.oop()) else {
            return Err(Error::BadArgument("immediates cannot become"));
        };
        if ia == ib {
            return Ok(());
        }
        let (left, right) = (self.object(a)?, self.object(b)?);
        if left.body.family() != right.body.family() {
            return Err(Error::BadArgument("incompatible become pair"));
        }
        if left.header.has_flag(HeaderFlags::IMMUTABLE)
            || right.header.has_flag(HeaderFlags::IMMUTABLE)
        {
            return Err(Error::BadReceiver("object is immutable"));
        }

        let Some(mut left) = self.objects[ia as usize].take() else {
            return Err(Error::UnsupportedValue("dangling reference"));
        };
        if let Some(right) = self.get_mut(ib) {
            core::mem::swap(&mut left.class, &mut right.class);
            match (&mut left.body, &mut right.body) {
                (Body::Array(l), Body::Array(r)) => l.become_same_kind(r),
                (l, r) => core::mem::swap(l, r),
            }
            if !copy_hash {
                let hash = left.header.hash();
                left.header.set_hash(right.header.hash());
                right.header.set_hash(hash);
            }
        }
        self.objects[ia as usize] = Some(left);

        for identity in [a, b] {
            match self.body(identity)? {
                Body::Context(ContextObject { frame }) => {
                    let frame = *frame;
                    self.live_frame_mut(frame).context = Some(identity);
                }
                Body::Class(_) => self.invalidate_dispatch(identity),
                _ => (),
            }
        }
        log::trace!("swapped {a:?} and {b:?}");
        Ok(())
    }

    // ── one-way ────────────────────────────────────────────────────

    /// Replace every reachable reference to `from[i]` with `to[i]`.
    pub fn forward_one_way(
        &mut self,
        from: &[Value],
        to: &[Value],
        copy_hash: bool,
    ) -> Result<()> {
        self.forward_one_way_with_roots(from, to, copy_hash, &mut NoRoots)
    }

    /// [`ObjectMemory::forward_one_way`], also rewriting `extra`'s roots.
    pub fn forward_one_way_with_roots(
        &mut self,
        from: &[Value],
        to: &[Value],
        copy_hash: bool,
        extra: &mut dyn RootProvider,
    ) -> Result<()> {
        let map = self.forwarding_map(from, to)?;
        if map.is_empty() {
            return Ok(());
        }

        let trace = self.mark_from(extra);
        self.clear_marks(&trace.objects);

        let mut forwarder = Forwarder {
            map: &map,
            replaced: 0,
        };
        let mut stale_classes = Vec::new();
        for &oop in &trace.objects {
            let Some(object) = self.get_mut(oop) else {
                continue;
            };
            let before = match &object.body {
                Body::Class(class) => Some(class.method_dict),
                Body::Code(code) if code.kind == CodeKind::Method => Some(code.owner),
                _ => None,
            };
            object.visit_edges_mut(&mut forwarder);
            match &object.body {
                Body::Class(class) if before != Some(class.method_dict) => {
                    stale_classes.push(Value::from_oop(oop));
                }
                Body::Code(code) if code.kind == CodeKind::Method => {
                    if before != Some(code.owner) {
                        stale_classes.push(code.owner);
                    }
                }
                _ => (),
            }
        }
        for &id in &trace.frames {
            if let Some(frame) = self.frames.get_mut(id) {
                frame.visit_edges_mut(&mut forwarder);
            }
        }
        for root in &mut self.roots {
            forwarder.visit_mut(root);
        }
        self.specials.visit_mut(&mut |v| forwarder.visit_mut(v));
        for process in self.processes.iter_mut() {
            forwarder.visit_mut(&mut process.suspended_context);
        }
        extra.visit_roots(&mut |v| forwarder.visit_mut(v));
        let replaced = forwarder.replaced;

        if copy_hash {
            // in argument order, so the last of several sources sharing a
            // target decides its hash
            for (&source, &target) in from.iter().zip(to) {
                let Some(target) = target.oop().filter(|_| source != target) else {
                    continue;
                };
                let hash = self.object(source)?.header.hash();
                if let Some(object) = self.get_mut(target) {
                    object.header.set_hash(hash);
                }
            }
        }
        for class in stale_classes {
            self.invalidate_dispatch(class);
        }
        log::info!(
            "forwarded {} objects, {replaced} fields rewritten across {} objects and {} frames",
            map.len(),
            trace.objects.len(),
            trace.frames.len()
        );
        Ok(())
    }

    /// Validate the pairs before anything is touched.
    fn forwarding_map(
        &self,
        from: &[Value],
        to: &[Value],
    ) -> Result<AHashMap<Value, Value>> {
        if from.len() != to.len() {
            return Err(Error::BadArgument("forwarding arrays differ in length"));
        }
        let mut map = AHashMap::with_capacity(from.len());
        for (&source, &target) in from.iter().zip(to) {
            if !source.is_ref() {
                return Err(Error::BadArgument("cannot forward an immediate"));
            }
            self.object(source)?;
            if target.is_malformed() {
                return Err(Error::UnsupportedValue("malformed immediate"));
            }
            if target.is_ref() {
                self.object(target)?;
            }
            if source == target {
                continue;
            }
            if map.insert(source, target).is_some_and(|prev| prev != target) {
                return Err(Error::BadArgument("source forwarded to two targets"));
            }
        }
        if map.values().any(|target| map.contains_key(target)) {
            return Err(Error::BadArgument("forwarding would be cyclic"));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodeSpec, ClassFormat, InlineCache, StorageKind};

    fn mk_memory() -> ObjectMemory {
        ObjectMemory::default()
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut memory = mk_memory();
        let a = memory.new_array_from(&[Value::from_i64(1)]).unwrap();
        let b = memory.new_array_from(&[Value::TRUE, Value::FALSE]).unwrap();
        let holder = memory.new_array_from(&[a]).unwrap();
        memory.become_two_way(&[a], &[b], false).unwrap();
        assert_eq!(memory.size(a), Ok(2));
        assert_eq!(memory.read(a, 0), Ok(Value::TRUE));
        assert_eq!(memory.array_storage(b).unwrap().kind(), StorageKind::Long);
        assert_eq!(memory.read(holder, 0), Ok(a), "referrers keep their identity");
    }

    #[test]
    fn become_is_an_involution() {
        let mut memory = mk_memory();
        let a = memory.new_string("left");
        let b = memory.new_string("right");
        let (ha, hb) = (memory.identity_hash(a).unwrap(), memory.identity_hash(b).unwrap());
        for copy_hash in [false, true] {
            memory.become_two_way(&[a], &[b], copy_hash).unwrap();
            memory.become_two_way(&[a], &[b], copy_hash).unwrap();
            assert_eq!(memory.string_value(a), Ok("left"));
            assert_eq!(memory.string_value(b), Ok("right"));
            assert_eq!(memory.identity_hash(a), Ok(ha));
            assert_eq!(memory.identity_hash(b), Ok(hb));
        }
    }

    #[test]
    fn hash_follows_copy_hash() {
        let mut memory = mk_memory();
        let a = memory.new_string("a");
        let b = memory.new_string("b");
        let (ha, hb) = (memory.identity_hash(a).unwrap(), memory.identity_hash(b).unwrap());

        memory.become_two_way(&[a], &[b], true).unwrap();
        assert_eq!(memory.identity_hash(a), Ok(ha), "hash stays with the identity");
        memory.become_two_way(&[a], &[b], true).unwrap();

        memory.become_two_way(&[a], &[b], false).unwrap();
        assert_eq!(memory.identity_hash(a), Ok(hb), "hash travels with the contents");
    }

    #[test]
    fn failed_batch_rolls_back() {
        let mut memory = mk_memory();
        let a = memory.new_string("a");
        let b = memory.new_string("b");
        let c = memory.new_array(1).unwrap();
        let f = memory.box_float(1.0);
        assert_eq!(
            memory.become_two_way(&[a, c], &[b, f], false),
            Err(Error::BadArgument("incompatible become pair"))
        );
        assert_eq!(memory.string_value(a), Ok("a"));
        assert_eq!(memory.string_value(b), Ok("b"));
        assert_eq!(
            memory.become_two_way(&[a, Value::NIL], &[b, Value::TRUE], false),
            Err(Error::BadArgument("immediates cannot become"))
        );
        assert_eq!(memory.string_value(a), Ok("a"));
        assert_eq!(
            memory.become_two_way(&[a], &[], false),
            Err(Error::BadArgument("become arrays differ in length"))
        );
    }

    #[test]
    fn context_pair_keeps_memo() {
        let mut memory = mk_memory();
        let x = memory.instantiate(memory.specials.context_class, 0).unwrap();
        let y = memory.instantiate(memory.specials.context_class, 0).unwrap();
        memory.set_receiver(x, Value::from_i64(1)).unwrap();
        memory.set_receiver(y, Value::from_i64(2)).unwrap();
        let fx = memory.context_frame(x).unwrap();
        memory.become_two_way(&[x], &[y], false).unwrap();
        assert_eq!(memory.receiver(x), Ok(Value::from_i64(2)));
        assert_eq!(memory.context_frame(y), Ok(fx));
        assert_eq!(memory.frame(fx).and_then(|f| f.context), Some(y));
    }

    #[test]
    fn class_pair_invalidates_caches() {
        let mut memory = mk_memory();
        let object = memory.specials.object_class;
        let p = memory.new_class("P", object, ClassFormat::Empty).unwrap();
        let q = memory.new_class("Q", object, ClassFormat::Empty).unwrap();
        let cache = InlineCache::new(&memory, p, Value::TRUE).unwrap();
        memory.become_two_way(&[p], &[q], true).unwrap();
        assert_eq!(cache.lookup(&memory, p), None);
    }

    #[test]
    fn forwarding_rewrites_heap_and_stack() {
        let mut memory = mk_memory();
        let x = memory.new_string("x");
        let y = memory.new_string("y");
        let hx = memory.identity_hash(x).unwrap();
        let holders: Vec<Value> = (0..3)
            .map(|_| memory.new_array_from(&[x]).unwrap())
            .collect();
        for &h in &holders {
            memory.add_root(h);
        }
        let method = memory
            .new_method(
                CodeSpec {
                    num_temps: 1,
                    ..Default::default()
                },
                Value::NIL,
            )
            .unwrap();
        let process = memory.processes().active();
        let id = memory
            .push_method_frame(process, method, Value::NIL, &[])
            .unwrap();
        let ctx = memory.materialize(id);
        memory.push(ctx, x).unwrap();

        memory.forward_one_way(&[x], &[y], true).unwrap();
        for &h in &holders {
            assert_eq!(memory.read(h, 0), Ok(y));
        }
        assert_eq!(memory.at_temp(ctx, 1), Ok(y));
        assert!(memory.pointers_to(x).is_empty());
        assert_eq!(memory.identity_hash(y), Ok(hx));
    }

    #[test]
    fn unreachable_objects_untouched() {
        let mut memory = mk_memory();
        let x = memory.new_string("x");
        let y = memory.new_string("y");
        let orphan = memory.new_array_from(&[x]).unwrap();
        let rooted = memory.new_array_from(&[x]).unwrap();
        memory.add_root(rooted);
        memory.forward_one_way(&[x], &[y], false).unwrap();
        assert_eq!(memory.read(rooted, 0), Ok(y));
        assert_eq!(memory.read(orphan, 0), Ok(x));
    }

    #[test]
    fn extra_roots_are_rewritten() {
        let mut memory = mk_memory();
        let x = memory.new_string("x");
        let mut roots = vec![x, Value::from_i64(4)];
        memory
            .forward_one_way_with_roots(&[x], &[Value::TRUE], false, &mut roots)
            .unwrap();
        assert_eq!(roots, vec![Value::TRUE, Value::from_i64(4)]);
    }

    #[test]
    fn forwarding_validates_first() {
        let mut memory = mk_memory();
        let x = memory.new_string("x");
        let y = memory.new_string("y");
        let rooted = memory.new_array_from(&[x, y]).unwrap();
        memory.add_root(rooted);
        assert_eq!(
            memory.forward_one_way(&[Value::NIL], &[x], false),
            Err(Error::BadArgument("cannot forward an immediate"))
        );
        assert_eq!(
            memory.forward_one_way(&[x, y], &[y, x], false),
            Err(Error::BadArgument("forwarding would be cyclic"))
        );
        assert_eq!(
            memory.forward_one_way(&[x], &[x, y], false),
            Err(Error::BadArgument("forwarding arrays differ in length"))
        );
        assert_eq!(memory.read(rooted, 0), Ok(x));
        assert_eq!(memory.read(rooted, 1), Ok(y));
    }

    #[test]
    fn method_dict_rewrite_invalidates_class() {
        let mut memory = mk_memory();
        let object = memory.specials.object_class;
        let class = memory.new_class("P", object, ClassFormat::Empty).unwrap();
        let old = memory
            .instantiate(memory.specials.method_dictionary_class, 2)
            .unwrap();
        let new = memory
            .instantiate(memory.specials.method_dictionary_class, 2)
            .unwrap();
        memory.write(class, crate::CLASS_METHOD_DICT, old).unwrap();
        memory.add_root(class);
        let cache = InlineCache::new(&memory, class, Value::TRUE).unwrap();
        memory.forward_one_way(&[old], &[new], false).unwrap();
        assert_eq!(memory.read(class, crate::CLASS_METHOD_DICT), Ok(new));
        assert_eq!(cache.lookup(&memory, class), None);
    }

    #[test]
    fn owner_rewrite_invalidates_the_new_owner() {
        let mut memory = mk_memory();
        let object = memory.specials.object_class;
        let old_owner = memory.new_class("A", object, ClassFormat::Empty).unwrap();
        let new_owner = memory.new_class("B", object, ClassFormat::Empty).unwrap();
        let method = memory.new_method(CodeSpec::default(), old_owner).unwrap();
        let holder = memory.new_array_from(&[method, new_owner]).unwrap();
        memory.add_root(holder);
        let cache = InlineCache::new(&memory, new_owner, method).unwrap();
        assert_eq!(cache.lookup(&memory, new_owner), Some(method));

        memory
            .forward_one_way(&[old_owner], &[new_owner], false)
            .unwrap();
        assert_eq!(memory.method_class(method), Ok(new_owner));
        assert_eq!(cache.lookup(&memory, new_owner), None);
    }

    #[test]
    fn shared_target_takes_the_last_sources_hash() {
        let mut memory = mk_memory();
        let a = memory.new_string("a");
        let b = memory.new_string("b");
        let target = memory.new_string("t");
        let holder = memory.new_array_from(&[a, b]).unwrap();
        memory.add_root(holder);
        let hash_b = memory.identity_hash(b).unwrap();

        memory.forward_one_way(&[a, b], &[target, target], true).unwrap();
        assert_eq!(memory.read(holder, 0), Ok(target));
        assert_eq!(memory.read(holder, 1), Ok(target));
        assert_eq!(memory.identity_hash(target), Ok(hash_b));
    }
}
