use crate::Ec2StackConfig;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use log::debug;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "ec2stack.yml";

const UNKNOWN_ACCOUNT: &str = "unknown-account";
const UNKNOWN_REGION: &str = "unknown-region";

/// Account and region a stack targets. Unknown values keep the stack
/// environment-agnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Environment { account, region }
    }

    /// Region from the flag, then `CDK_DEFAULT_REGION`, `AWS_REGION`,
    /// `AWS_DEFAULT_REGION`, then the active profile of the AWS CLI config.
    pub fn resolve(region_override: Option<&str>) -> Self {
        Environment::resolve_with(region_override, |key| env::var(key).ok())
    }

    /// [`Environment::resolve`] over an arbitrary variable lookup.
    pub fn resolve_with<F>(region_override: Option<&str>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let region = region_override
            .map(str::to_string)
            .or_else(|| var("CDK_DEFAULT_REGION"))
            .or_else(|| var("AWS_REGION"))
            .or_else(|| var("AWS_DEFAULT_REGION"))
            .or_else(|| region_from_aws_config(&var));
        let account = var("CDK_DEFAULT_ACCOUNT");
        debug!("Resolved environment account={:?} region={:?}", account, region);
        Environment { account, region }
    }

    pub fn is_agnostic(&self) -> bool {
        self.region.is_none()
    }

    /// `aws://<account>/<region>` as recorded in the assembly manifest.
    pub fn name(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or(UNKNOWN_ACCOUNT),
            self.region.as_deref().unwrap_or(UNKNOWN_REGION)
        )
    }
}

/// `AWS_CONFIG_FILE` when set, `~/.aws/config` otherwise.
fn aws_config_path(var: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    match var("AWS_CONFIG_FILE") {
        Some(path) => Some(PathBuf::from(path)),
        None => dirs::home_dir().map(|home| home.join(".aws").join("config")),
    }
}

fn region_from_aws_config(var: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let path = aws_config_path(var)?;
    let contents = fs::read_to_string(&path).ok()?;
    let profile = var("AWS_PROFILE")
        .or_else(|| var("AWS_DEFAULT_PROFILE"))
        .unwrap_or_else(|| "default".to_string());
    debug!("Reading region of profile {} from {}", profile, path.display());
    profile_region(&contents, &profile)
}

/// Reads `region` from a profile section of an AWS CLI config file. The
/// default profile may be written as `[default]` or `[profile default]`.
pub fn profile_region(contents: &str, profile: &str) -> Option<String> {
    let mut in_profile = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') && line.ends_with(']') {
            let section = line[1..line.len() - 1].trim();
            let name = match section.strip_prefix("profile ") {
                Some(name) => name.trim(),
                None if section == "default" => section,
                None => "",
            };
            in_profile = name == profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "region" && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

pub fn config_file_exists(path: &Path) -> bool {
    path.exists()
}

/// Loads the config file, falling back to the built-in defaults when it is absent.
pub fn load_config(path: &Path) -> Result<Ec2StackConfig> {
    if !config_file_exists(path) {
        debug!("{} not found, using defaults", path.display());
        return Ok(Ec2StackConfig::default());
    }
    let f = fs::File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    let config: Ec2StackConfig = serde_yaml::from_reader(f)
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &Ec2StackConfig) -> Result<()> {
    let contents = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    fs::write(path, contents).with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}

/// Copies `path` to `<path>.<timestamp>.bak` and returns the backup location.
pub fn backup_config(path: &Path) -> Result<PathBuf> {
    let current_date = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let backup = path.with_file_name(format!("{}.{}.bak", file_name, current_date));
    fs::copy(path, &backup)
        .with_context(|| format!("Could not back up {} to {}", path.display(), backup.display()))?;
    Ok(backup)
}
