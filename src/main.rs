/* ec2stack (c) 2026 ec2stack authors */
extern crate ec2stack;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use easy_di::{Container, ServiceProvider};
use ec2stack::clouds;
use ec2stack::config::DEFAULT_CONFIG_FILE;
use ec2stack::{Environment, Provider, Workspace};
use log::LevelFilter;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Ec2StackCli {
    #[command(subcommand)]
    command: Option<Ec2StackCommands>,

    /// Send additional debug information to <stderr>
    #[arg(short, long, default_value_t = false, global = true, required = false)]
    debug: bool,

    /// Configuration file; built-in defaults are used when it does not exist
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory the cloud assembly is written to. Overrides output_dir from the config file.
    #[arg(short, long, global = true, required = false)]
    output: Option<PathBuf>,

    /// AWS region to target. Defaults to the AWS CLI environment and profile.
    #[arg(short, long, global = true, required = false)]
    region: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Ec2StackCommands {
    /// Writes the default ec2stack.yml configuration file
    Init {
        /// Overwrite an existing file, keeping a timestamped backup
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Synthesizes the stack into a CloudFormation template (the default)
    Synth {},
    /// Lists the stacks declared by the app
    Ls {},
    /// Resolves the latest machine image and pins it in the configuration file
    PinImage {},
    /// Synthesizes and deploys the stack with AWS CloudFormation
    Deploy {},
    /// Deletes the deployed stack
    Destroy {
        /// Do not ask for confirmation
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
    /// Removes the cloud assembly and ec2stack.yml
    Clean {},
}

fn init_logging(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    if debug {
        builder.filter_level(LevelFilter::Debug);
    } else if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    } else {
        builder.filter_level(LevelFilter::Info);
    }
    let _ = builder.try_init();
}

fn main() -> Result<()> {
    let this = Ec2StackCli::parse();
    init_logging(this.debug);

    let mut container = Container::new();
    let provider: Arc<dyn Provider + Sync + Send> = Arc::new(clouds::aws::Aws);
    container.inject(provider);

    let instance = container
        .find::<Arc<dyn Provider + Sync + Send>>()
        .context("No cloud provider registered")?;

    let workspace = Workspace::new(
        this.config,
        this.output,
        Environment::resolve(this.region.as_deref()),
    );

    let now = Instant::now();

    match this.command.unwrap_or(Ec2StackCommands::Synth {}) {
        Ec2StackCommands::Init { force } => instance.init(&workspace, force)?,
        Ec2StackCommands::Synth {} => instance.synth(&workspace)?,
        Ec2StackCommands::Ls {} => instance.list(&workspace)?,
        Ec2StackCommands::PinImage {} => instance.pin_image(&workspace)?,
        Ec2StackCommands::Deploy {} => instance.deploy(&workspace)?,
        Ec2StackCommands::Destroy { yes } => instance.destroy(&workspace, yes)?,
        Ec2StackCommands::Clean {} => instance.clean(&workspace)?,
    }

    let elapsed = now.elapsed();
    println!("\n⏱️  Command took: {:.2?} 💨", elapsed);
    Ok(())
}
