use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod assembly;
pub mod clouds;
pub mod config;
pub mod construct;
pub mod ec2;
pub mod error;
pub mod iam;
pub mod stack;
pub mod template;

pub use config::Environment;
pub use ec2::CpuType;

/// A cloud backend able to synthesize and hand off the declared stack.
pub trait Provider {
    fn init(&self, workspace: &Workspace, force: bool) -> anyhow::Result<()>;
    fn synth(&self, workspace: &Workspace) -> anyhow::Result<()>;
    fn list(&self, workspace: &Workspace) -> anyhow::Result<()>;
    fn pin_image(&self, workspace: &Workspace) -> anyhow::Result<()>;
    fn deploy(&self, workspace: &Workspace) -> anyhow::Result<()>;
    fn destroy(&self, workspace: &Workspace, yes: bool) -> anyhow::Result<()>;
    fn clean(&self, workspace: &Workspace) -> anyhow::Result<()>;
}

/// Where a command reads its configuration from and writes its output to.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub config_path: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub environment: Environment,
}

impl Workspace {
    pub fn new(config_path: PathBuf, output_dir: Option<PathBuf>, environment: Environment) -> Self {
        Workspace {
            config_path,
            output_dir,
            environment,
        }
    }

    /// The assembly directory: the command line wins over the config file.
    pub fn output_dir(&self, config: &Ec2StackConfig) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ec2StackConfig {
    pub stack_name: String,
    pub output_dir: PathBuf,
    pub network: NetworkOptions,
    pub instance: InstanceOptions,
    pub managed_policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    pub max_azs: u8,
    pub cidr: String,
    /// One NAT gateway per availability zone when unset.
    pub nat_gateways: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    pub name: String,
    pub instance_type: String,
    pub image: ImageOptions,
    pub user_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageOptions {
    /// Resolved by CloudFormation at deploy time, so two deployments may boot different images.
    Latest { cpu_type: CpuType },
    Pinned { ami_id: String, cpu_type: CpuType },
}

pub const DEFAULT_STACK_NAME: &str = "EC2Stack";
pub const DEFAULT_OUTPUT_DIR: &str = "cdk.out";
pub const DEFAULT_INSTANCE_NAME: &str = "TestInstance";
pub const DEFAULT_INSTANCE_TYPE: &str = "t4g.micro";
pub const DEFAULT_MANAGED_POLICY: &str = "AmazonSSMManagedInstanceCore";
pub const DEFAULT_USER_DATA: &str = r#"#!/bin/bash
echo 'User data script executed' > /var/log/user-data.log
"#;

impl Default for Ec2StackConfig {
    fn default() -> Self {
        Ec2StackConfig {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            network: NetworkOptions::default(),
            instance: InstanceOptions::default(),
            managed_policies: vec![DEFAULT_MANAGED_POLICY.to_string()],
        }
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        NetworkOptions {
            max_azs: 2,
            cidr: ec2::DEFAULT_VPC_CIDR.to_string(),
            nat_gateways: None,
        }
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        InstanceOptions {
            name: DEFAULT_INSTANCE_NAME.to_string(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            image: ImageOptions::default(),
            user_data: DEFAULT_USER_DATA.to_string(),
        }
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        ImageOptions::Latest {
            cpu_type: CpuType::Arm64,
        }
    }
}

impl ImageOptions {
    pub fn cpu_type(&self) -> CpuType {
        match self {
            ImageOptions::Latest { cpu_type } | ImageOptions::Pinned { cpu_type, .. } => *cpu_type,
        }
    }
}
