//! Thin CLI front-end over the `jitdex` library (SPEC_FULL §0): load a
//! DEX file under one class loader, then run one of the call-graph or
//! points-to analyses and print a summary. Not a deliverable in itself,
//! mirroring the teacher's own `examples/` binaries.
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use petgraph::graph::NodeIndex;

use jitdex::analysis::{call_graph, cha_call_graph, points_to};
use jitdex::vm::{MethodEdgeKind, VirtualMachine, VmConfig};
use jitdex::{DexString, JvmMethodHandle, JvmTypeHandle};

#[derive(Parser)]
#[command(name = "jitdex", about = "Static analysis over Android DEX bytecode")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every class loaded from `dex`.
    Classes { dex: PathBuf },
    /// Build a CHA call graph from `entry` and print its edge count.
    Cha { dex: PathBuf, entry: String },
    /// Run the points-to engine from `entry` and print PAG/call-graph
    /// vertex and edge counts.
    PointsTo {
        dex: PathBuf,
        entry: String,
        #[arg(long)]
        on_the_fly: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Classes { dex } => classes(&dex),
        Command::Cha { dex, entry } => cha(&dex, &entry),
        Command::PointsTo { dex, entry, on_the_fly } => run_points_to(&dex, &entry, on_the_fly),
    }
}

fn open(dex: &PathBuf, config: VmConfig) -> Result<(VirtualMachine, jitdex::DexFileHandle)> {
    let mut vm = VirtualMachine::new(config);
    let loader = vm.add_loader(&[]);
    let file = vm
        .add_file(loader, dex)
        .with_context(|| format!("loading {}", dex.display()))?;
    Ok((vm, file))
}

fn classes(dex: &PathBuf) -> Result<()> {
    let (mut vm, file) = open(dex, VmConfig::default())?;
    let classes = vm.load_all_classes(file)?;
    for idx in classes {
        println!("{}", vm.class(idx).jvm_handle);
    }
    Ok(())
}

/// Parses `Lcom/foo/Bar;->methodName:shorty` into a [`JvmMethodHandle`]
/// under `loader`.
fn parse_entry(loader: jitdex::ClassLoaderHandle, entry: &str) -> Result<JvmMethodHandle> {
    let (descriptor, rest) = entry
        .split_once("->")
        .ok_or_else(|| anyhow!("expected Lclass;->name:shorty, got {}", entry))?;
    let (name, shorty) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("expected name:shorty after ->, got {}", rest))?;
    let type_handle = JvmTypeHandle::new(loader, DexString::from(descriptor));
    Ok(JvmMethodHandle::new(type_handle, name, shorty))
}

fn resolve_entry(vm: &mut VirtualMachine, file: jitdex::DexFileHandle, entry: &str) -> Result<NodeIndex> {
    vm.load_all_classes(file)?;
    let jvm = parse_entry(file.loader, entry)?;
    vm.find_method(&jvm, true)
        .with_context(|| format!("resolving entry method {}", entry))
}

fn cha(dex: &PathBuf, entry: &str) -> Result<()> {
    let (mut vm, file) = open(dex, VmConfig::default())?;
    let entry_node = resolve_entry(&mut vm, file, entry)?;
    cha_call_graph::build(&mut vm, &[entry_node])?;
    call_graph::build_all(&mut vm)?;
    let calls = vm
        .method_graph()
        .raw_edges()
        .iter()
        .filter(|e| matches!(e.weight, MethodEdgeKind::Call { .. }))
        .count();
    println!(
        "methods: {}, call edges: {}",
        vm.method_graph().node_count(),
        calls
    );
    Ok(())
}

fn run_points_to(dex: &PathBuf, entry: &str, on_the_fly: bool) -> Result<()> {
    let config = VmConfig {
        on_the_fly_points_to: on_the_fly,
        ..VmConfig::default()
    };
    let (mut vm, file) = open(dex, config)?;
    let entry_node = resolve_entry(&mut vm, file, entry)?;
    let engine = points_to::run(&mut vm, &[entry_node], on_the_fly)?;
    println!(
        "pag vertices: {}, pag edges: {}",
        engine.pag.graph().node_count(),
        engine.pag.graph().edge_count()
    );
    println!(
        "call-graph vertices: {}, call-graph edges: {}",
        engine.call_graph.graph().node_count(),
        engine.call_graph.graph().edge_count()
    );
    Ok(())
}
