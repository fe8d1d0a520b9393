use clap::Parser;
use link_node::{config::Config, console, console::Report, Node};
use std::{error::Error, path::PathBuf, process::ExitCode};
use tokio::net::TcpListener;
use toml_config::TomlConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Network Link group node")]
struct Args {
    /// Configuration file, defaults to config.toml or link-node/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    let config = match args.config {
        Some(path) => Config::load_toml_file(path)?,
        None => Config::load_first_toml_file(["config.toml", "link-node/config.toml"])?,
    };

    console::init();
    tracing::debug!("{config:?}");

    let address = config.listen_address();
    let listener = TcpListener::bind((address.host.as_str(), address.port)).await?;
    let node = Node::new(config)?;

    if let Err(e) = node.start(listener).await {
        // Printed directly, the terminal UI may not get to render before exit
        eprintln!("{}", Report(&e));
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
