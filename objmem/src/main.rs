use clap::{Parser, ValueEnum};
use objmem::{
    CodeSpec, LaneWidth, MemoryCreateInfo, NativeStorage, NoRoots, ObjectMemory, Value, Vm,
    VmCreateInfo,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Storage,
    Lanes,
    Contexts,
    Become,
    Forward,
    Collect,
}

const ALL: [Scenario; 6] = [
    Scenario::Storage,
    Scenario::Lanes,
    Scenario::Contexts,
    Scenario::Become,
    Scenario::Forward,
    Scenario::Collect,
];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenarios to run. All of them when empty.
    #[arg(value_enum)]
    scenarios: Vec<Scenario>,
    #[arg(long)]
    initial_capacity: Option<usize>,
    /// Start every container in object storage.
    #[arg(long)]
    no_strategies: bool,
    #[arg(long)]
    max_frame_depth: Option<usize>,
    #[arg(long)]
    hash_seed: Option<u32>,
}

type DemoResult = Result<(), Box<dyn std::error::Error>>;

fn storage(memory: &mut ObjectMemory) -> DemoResult {
    let array = memory.new_array(3)?;
    println!("new array: {:?}", memory.array_storage(array)?.kind());
    memory.write(array, 0, Value::from_i64(7))?;
    println!("after 7: {:?}", memory.array_storage(array)?.kind());
    let s = memory.new_string("seven");
    memory.write(array, 1, s)?;
    println!("after a string: {:?}", memory.array_storage(array)?.kind());
    for i in 0..memory.size(array)? {
        println!("  [{i}] = {:?}", memory.read(array, i)?);
    }
    Ok(())
}

fn lanes(memory: &mut ObjectMemory) -> DemoResult {
    let storage = NativeStorage::from_bytes(&[0x01, 0x02, 0x03, 0x04]);
    let bytes = memory.new_native(storage);
    println!("bytes: {} slots", memory.size(bytes)?);
    memory.convert_to_width(bytes, LaneWidth::W32)?;
    let word = memory.read(bytes, 0)?;
    println!("as one word: {:?} ({} slots)", word, memory.size(bytes)?);
    memory.write(bytes, 0, Value::from_i64(0xCAFE))?;
    memory.convert_to_width(bytes, LaneWidth::W8)?;
    println!("back to bytes: {:?}", memory.native_storage(bytes)?.to_le_bytes());
    Ok(())
}

fn contexts(memory: &mut ObjectMemory) -> DemoResult {
    let method = memory.new_method(
        CodeSpec {
            num_args: 1,
            num_temps: 2,
            bytecodes: vec![0x70; 4],
            ..Default::default()
        },
        Value::NIL,
    )?;
    let process = memory.processes().active();
    let outer = memory.push_method_frame(process, method, Value::from_i64(1), &[Value::TRUE])?;
    let inner = memory.push_method_frame(process, method, Value::from_i64(2), &[Value::FALSE])?;
    println!("inner before reflection: {:?}", memory.frame_state(inner));

    let ctx = memory.this_context(process)?;
    println!("inner after thisContext: {:?}", memory.frame_state(inner));
    println!("outer is still {:?}", memory.frame_state(outer));
    let chain = memory.sender_chain(ctx)?;
    println!("sender chain length: {}", chain.len());

    memory.return_frame(process)?;
    println!("returned context is {:?}", memory.context_state(ctx)?);
    println!("its receiver is still {:?}", memory.receiver(ctx)?);
    memory.terminate_process(process)?;
    Ok(())
}

fn become_batch(memory: &mut ObjectMemory) -> DemoResult {
    let a = memory.new_string("a");
    let b = memory.new_string("b");
    let c = memory.new_array(1)?;
    let holder = memory.new_array_from(&[a, b])?;
    memory.become_two_way(&[a], &[b], false)?;
    println!("after become: {:?}", memory.string_value(a)?);

    let result = memory.become_two_way(&[a, b], &[b, c], false);
    println!("incompatible batch: {result:?}");
    println!("first pair rolled back: {:?}", memory.string_value(a)?);
    println!("holder still reads {:?}", memory.read(holder, 0)?);
    Ok(())
}

fn forward(memory: &mut ObjectMemory) -> DemoResult {
    let old = memory.new_string("old");
    let new = memory.new_string("new");
    let holders = [
        memory.new_array_from(&[old])?,
        memory.new_array_from(&[old, old])?,
        memory.new_array_from(&[Value::NIL, old])?,
    ];
    let all = memory.new_array_from(&holders)?;
    memory.add_root(all);
    let hash = memory.identity_hash(old)?;

    memory.forward_one_way(&[old], &[new], true)?;
    println!("references left to old: {}", memory.pointers_to(old).len());
    println!("references to new: {}", memory.pointers_to(new).len());
    println!("hash carried over: {}", memory.identity_hash(new)? == hash);
    Ok(())
}

fn collect(memory: &mut ObjectMemory) -> DemoResult {
    let kept = memory.new_string("kept");
    memory.add_root(kept);
    for _ in 0..16 {
        memory.new_array(4)?;
    }
    println!("objects before: {}", memory.object_count());
    let stats = memory.collect(&mut NoRoots);
    println!("{stats:?}");
    println!("objects after: {}", memory.object_count());
    Ok(())
}

fn run(memory: &mut ObjectMemory, scenario: Scenario) -> DemoResult {
    match scenario {
        Scenario::Storage => storage(memory),
        Scenario::Lanes => lanes(memory),
        Scenario::Contexts => contexts(memory),
        Scenario::Become => become_batch(memory),
        Scenario::Forward => forward(memory),
        Scenario::Collect => collect(memory),
    }
}

fn main() -> DemoResult {
    env_logger::init();
    let cli = Cli::parse();

    let vm = Vm::new(VmCreateInfo {
        memory: MemoryCreateInfo {
            initial_capacity: cli.initial_capacity,
            storage_strategies: cli.no_strategies.then_some(false),
            max_frame_depth: cli.max_frame_depth,
            hash_seed: cli.hash_seed,
        },
    })?;
    let proxy = vm.new_proxy();

    let scenarios = if cli.scenarios.is_empty() {
        ALL.to_vec()
    } else {
        cli.scenarios
    };
    for scenario in scenarios {
        println!("── {scenario:?} ──");
        proxy.stop_the_world(|memory| run(memory, scenario))?;
    }
    Ok(())
}
