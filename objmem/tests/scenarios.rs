use objmem::{
    CodeSpec, ContextState, FIXNUM_MAX, FIXNUM_MIN, FrameId, NoRoots, ObjectMemory, ProcessId,
    StorageKind, Value, Vm, VmCreateInfo,
};

fn method(memory: &mut ObjectMemory, num_temps: usize) -> Value {
    memory
        .new_method(
            CodeSpec {
                num_temps,
                bytecodes: vec![0x70; 8],
                ..Default::default()
            },
            Value::NIL,
        )
        .unwrap()
}

fn activate(memory: &mut ObjectMemory, receiver: Value) -> (ProcessId, FrameId) {
    let method = method(memory, 2);
    let process = memory.processes().active();
    let id = memory
        .push_method_frame(process, method, receiver, &[])
        .unwrap();
    (process, id)
}

// ── storage ────────────────────────────────────────────────────────

#[test]
fn first_object_write_widens_a_nil_array() {
    let mut memory = ObjectMemory::default();
    let array = memory.new_array(3).unwrap();
    let a = memory.new_string("a");
    memory.write(array, 0, a).unwrap();

    assert_eq!(memory.array_storage(array).unwrap().kind(), StorageKind::Object);
    assert_eq!(memory.read(array, 0), Ok(a));
    assert_eq!(memory.read(array, 1), Ok(Value::NIL));
    assert_eq!(memory.read(array, 2), Ok(Value::NIL));
    assert_eq!(memory.size(array), Ok(3));
}

#[test]
fn every_kind_reads_back_what_was_written() {
    let mut memory = ObjectMemory::default();
    let cases = [
        (Value::TRUE, StorageKind::Boolean),
        (Value::from_char(0x1F600).unwrap(), StorageKind::Char),
        (Value::from_i64(FIXNUM_MIN), StorageKind::Long),
        (Value::from_i64(FIXNUM_MAX), StorageKind::Long),
    ];
    for (value, kind) in cases {
        let array = memory.new_array(4).unwrap();
        for i in 0..4 {
            memory.write(array, i, value).unwrap();
        }
        memory.write(array, 2, Value::NIL).unwrap();
        assert_eq!(memory.array_storage(array).unwrap().kind(), kind);
        for i in [0, 1, 3] {
            assert_eq!(memory.read(array, i), Ok(value), "{kind:?} slot {i}");
        }
        assert_eq!(memory.read(array, 2), Ok(Value::NIL));
    }

    let array = memory.new_array(2).unwrap();
    let boxed = memory.box_float(-0.25);
    memory.write(array, 1, boxed).unwrap();
    assert_eq!(memory.array_storage(array).unwrap().kind(), StorageKind::Double);
    let read = memory.read(array, 1).unwrap();
    assert_eq!(memory.float_value(read), Some(-0.25));
    assert_eq!(memory.read(array, 0), Ok(Value::NIL));
}

#[test]
fn widening_never_narrows() {
    let mut memory = ObjectMemory::default();
    let array = memory.new_array(5).unwrap();
    memory.write(array, 0, Value::from_i64(1)).unwrap();
    assert_eq!(memory.array_storage(array).unwrap().kind(), StorageKind::Long);
    memory.write(array, 1, Value::TRUE).unwrap();
    assert_eq!(memory.array_storage(array).unwrap().kind(), StorageKind::Object);

    for i in 0..5 {
        memory.write(array, i, Value::from_i64(i as i64)).unwrap();
    }
    assert_eq!(memory.array_storage(array).unwrap().kind(), StorageKind::Object);
    assert_eq!(memory.size(array), Ok(5));
}

// ── contexts ───────────────────────────────────────────────────────

#[test]
fn rematerializing_a_marker_yields_the_same_context() {
    let mut memory = ObjectMemory::default();
    let (_, id) = activate(&mut memory, Value::from_i64(1));
    let first = memory.materialize(id);
    let receiver = memory.new_string("new receiver");
    memory.set_receiver(first, receiver).unwrap();

    let second = memory.materialize(id);
    assert_eq!(first, second);
    assert_eq!(memory.receiver(second), Ok(receiver));
    assert_eq!(memory.frame(id).unwrap().receiver, receiver);
    assert_eq!(memory.frame_state(id), ContextState::Live);
}

#[test]
fn returned_contexts_detach_and_resume() {
    let mut memory = ObjectMemory::default();
    let (process, id) = activate(&mut memory, Value::NIL);
    let ctx = memory.this_context(process).unwrap();
    memory.push(ctx, Value::from_i64(5)).unwrap();
    memory.return_frame(process).unwrap();
    assert_eq!(memory.context_state(ctx), Ok(ContextState::Detached));

    let resumed = memory.resume(process, ctx).unwrap();
    assert_eq!(resumed, id, "resuming reuses the context's frame");
    assert_eq!(memory.context_state(ctx), Ok(ContextState::Live));
    assert_eq!(memory.pop(ctx), Ok(Value::from_i64(5)));
}

// ── substitution ───────────────────────────────────────────────────

/// Three heap holders and one stack slot referring to `x`.
fn referenced_from_everywhere(memory: &mut ObjectMemory, x: Value) -> ([Value; 3], Value) {
    let holders = [
        memory.new_array_from(&[x]).unwrap(),
        memory.new_array_from(&[Value::from_i64(0), x]).unwrap(),
        memory.new_array_from(&[x, Value::TRUE, x]).unwrap(),
    ];
    let all = memory.new_array_from(&holders).unwrap();
    memory.add_root(all);
    let (process, _) = activate(memory, Value::NIL);
    let ctx = memory.this_context(process).unwrap();
    memory.push(ctx, x).unwrap();
    (holders, ctx)
}

#[test]
fn forwarding_reaches_heap_and_stack() {
    let mut memory = ObjectMemory::default();
    let x = memory.new_string("x");
    let y = memory.new_string("y");
    let (holders, ctx) = referenced_from_everywhere(&mut memory, x);
    let sp = memory.stack_pointer(ctx).unwrap();
    let x_hash = memory.identity_hash(x).unwrap();

    memory.forward_one_way(&[x], &[y], true).unwrap();

    assert_eq!(memory.read(holders[0], 0), Ok(y));
    assert_eq!(memory.read(holders[1], 1), Ok(y));
    assert_eq!(memory.read(holders[2], 0), Ok(y));
    assert_eq!(memory.read(holders[2], 2), Ok(y));
    assert_eq!(memory.at_temp(ctx, sp - 1), Ok(y));
    assert!(memory.pointers_to(x).is_empty());
    assert_eq!(memory.identity_hash(y), Ok(x_hash));
}

#[test]
fn two_way_become_keeps_referrers_and_swaps_contents() {
    let mut memory = ObjectMemory::default();
    let x = memory.new_string("x");
    let y = memory.new_string("y");
    let (holders, ctx) = referenced_from_everywhere(&mut memory, x);
    let sp = memory.stack_pointer(ctx).unwrap();

    memory.become_two_way(&[x], &[y], false).unwrap();

    assert_eq!(memory.read(holders[0], 0), Ok(x));
    assert_eq!(memory.at_temp(ctx, sp - 1), Ok(x));
    assert_eq!(memory.string_value(x), Ok("y"));
    assert_eq!(memory.string_value(y), Ok("x"));
}

#[test]
fn become_twice_is_the_identity() {
    let mut memory = ObjectMemory::default();
    let a = memory.new_array_from(&[Value::from_i64(1)]).unwrap();
    let b = memory.new_array(3).unwrap();
    let s = memory.new_string("s");
    memory.write(b, 2, s).unwrap();
    let hashes = (memory.identity_hash(a).unwrap(), memory.identity_hash(b).unwrap());

    for copy_hash in [false, true] {
        memory.become_two_way(&[a], &[b], copy_hash).unwrap();
        memory.become_two_way(&[a], &[b], copy_hash).unwrap();
        assert_eq!(memory.size(a), Ok(1));
        assert_eq!(memory.read(a, 0), Ok(Value::from_i64(1)));
        assert_eq!(memory.size(b), Ok(3));
        assert_eq!(memory.read(b, 2), Ok(s));
        assert_eq!(
            (memory.identity_hash(a).unwrap(), memory.identity_hash(b).unwrap()),
            hashes
        );
    }
}

#[test]
fn forwarding_leaves_unreachable_objects_alone() {
    let mut memory = ObjectMemory::default();
    let x = memory.new_string("x");
    let y = memory.new_string("y");
    let rooted = memory.new_array_from(&[x]).unwrap();
    memory.add_root(rooted);
    let orphan = memory.new_array_from(&[x]).unwrap();

    memory.forward_one_way(&[x], &[y], false).unwrap();
    assert_eq!(memory.read(rooted, 0), Ok(y));
    assert_eq!(memory.read(orphan, 0), Ok(x));
}

#[test]
fn forwarding_never_extends_a_frame() {
    let mut memory = ObjectMemory::default();
    let x = memory.new_string("x");
    let y = memory.new_string("y");
    let (process, id) = activate(&mut memory, x);
    let ctx = memory.this_context(process).unwrap();
    memory.push(ctx, x).unwrap();
    let frame = memory.frame(id).unwrap();
    let (high_water, size) = (frame.high_water(), frame.frame_size);
    assert!(high_water < size);

    memory.forward_one_way(&[x], &[y], false).unwrap();
    let frame = memory.frame(id).unwrap();
    assert_eq!(frame.high_water(), high_water);
    assert_eq!(frame.receiver, y);
    assert_eq!(frame.slot(high_water - 1), y);
    assert!((high_water..size).all(|i| frame.slot(i) == Value::NIL));
}

// ── whole system ───────────────────────────────────────────────────

#[test]
fn collection_after_forwarding_frees_the_old_object() {
    let mut memory = ObjectMemory::default();
    let x = memory.new_string("x");
    let y = memory.new_string("y");
    let holder = memory.new_array_from(&[x]).unwrap();
    memory.add_root(holder);

    memory.forward_one_way(&[x], &[y], false).unwrap();
    memory.collect(&mut NoRoots);
    assert!(!memory.is_live(x));
    assert!(memory.is_live(y));
}

#[test]
fn readers_run_alongside_each_other() {
    let vm = Vm::new(VmCreateInfo::default()).unwrap();
    let proxy = vm.new_proxy();
    let array = proxy.write(|memory| {
        let array = memory.new_array(8).unwrap();
        memory.add_root(array);
        array
    });

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let proxy = proxy.create_proxy();
            std::thread::spawn(move || proxy.read(|memory| memory.size(array)))
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), Ok(8));
    }
}
