use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;

pub mod blocks;
pub mod obfuscate;

#[derive(Subcommand)]
pub enum Cmd {
    /// Obfuscate a module and write `<stem>.Obfuscated_<suffix><ext>`
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Print a method's block partition or its CFG as Graphviz
    Blocks(blocks::BlocksArgs),
}

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Blocks(args) => args.execute().await,
        }
    }
}
