use crate::io::load_module;
use async_trait::async_trait;
use clap::Args;
use petgraph::visit::EdgeRef;
use shade_core::cfg::{build_cfg, CfgNode, MethodCfg};
use shade_core::{blocks, MethodBody, MethodId, Module, Partition, PartitionPolicy};
use shade_utils::errors::ObfuscateError;
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct BlocksArgs {
    /// Module file to inspect (JSON).
    pub input: PathBuf,
    /// Method as `Namespace.Type::Name` or a bare method name.
    #[arg(short, long)]
    pub method: String,
    /// Emit the control-flow graph as Graphviz .dot instead of a block listing
    #[arg(long)]
    pub dot: bool,
    /// Partition where the stack depth returns to zero
    #[arg(long)]
    pub stack_balanced: bool,
    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[async_trait]
impl super::Command for BlocksArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = load_module(&self.input)?;
        let id = resolve_method(&module, &self.method)?;
        let method = module.method(id)?;
        let Some(body) = method.body.as_ref() else {
            println!("{} has no body", module.qualified_name(id));
            return Ok(());
        };

        let policy = if self.stack_balanced {
            PartitionPolicy::StackBalanced
        } else {
            PartitionPolicy::Leaders
        };
        let partition = blocks::partition(body, method.returns_void(), policy)?;

        let text = if self.dot {
            let cfg = build_cfg(body, &partition)?;
            generate_dot(body, &partition, &cfg)
        } else {
            list_blocks(body, &partition)
        };

        if let Some(out_path) = self.output {
            fs::write(out_path, &text)?;
        } else {
            print!("{text}");
        }
        Ok(())
    }
}

fn resolve_method(module: &Module, name: &str) -> Result<MethodId, ObfuscateError> {
    module
        .find_qualified(name)
        .or_else(|| module.find_method(name))
        .ok_or_else(|| ObfuscateError::MethodNotFound(name.to_string()))
}

fn list_blocks(body: &MethodBody, partition: &Partition) -> String {
    let mut out = String::new();
    for block in &partition.blocks {
        let _ = writeln!(out, "Block {} ({} instructions)", block.index, block.len());
        for instr in &body.instructions[block.range()] {
            let _ = writeln!(out, "    {instr}");
        }
    }
    out
}

fn generate_dot(body: &MethodBody, partition: &Partition, cfg: &MethodCfg) -> String {
    let mut dot = String::from("digraph CFG {\n");

    // Add nodes
    for node in cfg.graph.node_indices() {
        let label = match cfg.graph[node] {
            CfgNode::Block(index) => {
                let instrs: Vec<String> = partition
                    .blocks
                    .get(index)
                    .map(|block| {
                        body.instructions[block.range()]
                            .iter()
                            .map(|i| i.to_string().replace('"', "\\\""))
                            .collect()
                    })
                    .unwrap_or_default();
                format!("Block_{}\\n{}", index, instrs.join("\\n"))
            }
            ref other => other.to_string(),
        };
        dot.push_str(&format!("    {} [label=\"{}\"];\n", node.index(), label));
    }

    // Add edges
    for edge in cfg.graph.edge_references() {
        dot.push_str(&format!(
            "    {} -> {} [label=\"{}\"];\n",
            edge.source().index(),
            edge.target().index(),
            edge.weight()
        ));
    }

    dot.push_str("}\n");
    dot
}
