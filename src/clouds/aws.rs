use crate::assembly::CloudAssembly;
use crate::config::{backup_config, config_file_exists, load_config, save_config};
use crate::ec2::MachineImage;
use crate::stack::build_app;
use crate::{Ec2StackConfig, ImageOptions, Provider, Workspace};

use anyhow::{bail, Context, Result};
use log::{debug, info};
use question::{Answer, Question};
use spinners::{Spinner, Spinners};
use std::path::Path;
use xshell::{cmd, Shell};

#[derive(Clone, Debug)]
pub struct Aws;

#[cfg(not(target_os = "windows"))]
const PLATFORM_SPECIFIC_AWS_COMMAND: &str = "aws";

#[cfg(target_os = "windows")]
const PLATFORM_SPECIFIC_AWS_COMMAND: &str = "aws.cmd";

const CHECK_MARK: &str = " \x1b[32m✔\x1b[0m";
const CROSS_MARK: &str = " \x1b[31m✘\x1b[0m";

/// Stops `sp` with a failure mark when `result` is an error, so the spinner
/// frame does not run into the error report.
fn or_fail<T>(sp: &mut Spinner, message: &str, result: Result<T>) -> Result<T> {
    if result.is_err() {
        sp.stop_and_persist(CROSS_MARK, message.to_string());
    }
    result
}

fn region_args(region: Option<&str>) -> Vec<String> {
    match region {
        Some(region) => vec!["--region".to_string(), region.to_string()],
        None => Vec::new(),
    }
}

pub fn ssm_get_parameter_args(parameter: &str, region: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = ["ssm", "get-parameter", "--name", parameter, "--query", "Parameter.Value", "--output", "text"]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
    args.extend(region_args(region));
    args
}

pub fn deploy_args(template_file: &Path, stack_name: &str, region: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "cloudformation".to_string(),
        "deploy".to_string(),
        "--template-file".to_string(),
        template_file.to_string_lossy().to_string(),
        "--stack-name".to_string(),
        stack_name.to_string(),
        "--capabilities".to_string(),
        "CAPABILITY_IAM".to_string(),
        "--no-fail-on-empty-changeset".to_string(),
    ];
    args.extend(region_args(region));
    args
}

pub fn delete_stack_args(stack_name: &str, region: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "cloudformation".to_string(),
        "delete-stack".to_string(),
        "--stack-name".to_string(),
        stack_name.to_string(),
    ];
    args.extend(region_args(region));
    args
}

/// Writes the default ec2stack.yml, backing up an existing one when forced.
fn init(workspace: &Workspace, force: bool) -> Result<()> {
    let path = &workspace.config_path;
    if config_file_exists(path) {
        if !force {
            println!(
                "{} already exists. Use --force to overwrite it.",
                path.display()
            );
            return Ok(());
        }
        let backup = backup_config(path)?;
        info!("Backed up {} to {}", path.display(), backup.display());
    }

    let mut sp = Spinner::new(Spinners::Dots, " Initializing ec2stack config file".into());
    or_fail(
        &mut sp,
        "Could not write ec2stack config file",
        save_config(path, &Ec2StackConfig::default()),
    )?;
    sp.stop_and_persist(
        CHECK_MARK,
        format!("Initialized ec2stack config file: {}", path.display()),
    );
    Ok(())
}

/// Declares the stack from the workspace config and writes the cloud assembly.
pub fn synthesize(workspace: &Workspace) -> Result<CloudAssembly> {
    let config = load_config(&workspace.config_path)?;
    let outdir = workspace.output_dir(&config);
    let app = build_app(&config, &outdir, workspace.environment.clone())
        .with_context(|| format!("Failed to declare stack {}", config.stack_name))?;
    let assembly = app
        .synth()
        .with_context(|| format!("Failed to synthesize into {}", outdir.display()))?;
    Ok(assembly)
}

fn synth(workspace: &Workspace) -> Result<()> {
    let mut sp = Spinner::new(Spinners::Dots, "Synthesizing".into());
    let assembly = or_fail(&mut sp, "Synthesis failed", synthesize(workspace))?;
    let templates: Vec<String> = assembly
        .stacks()
        .iter()
        .map(|stack| assembly.directory().join(stack.template_file()).display().to_string())
        .collect();
    sp.stop_and_persist(
        CHECK_MARK,
        format!("Synthesized to {}", templates.join(", ")),
    );
    Ok(())
}

fn list(workspace: &Workspace) -> Result<()> {
    let config = load_config(&workspace.config_path)?;
    let app = build_app(&config, &workspace.output_dir(&config), workspace.environment.clone())?;
    for stack in app.stacks() {
        println!("{}", stack.id());
    }
    Ok(())
}

/// Resolves the current image id once and stores it in the config, making
/// later synthesis reproducible.
fn pin_image(workspace: &Workspace) -> Result<()> {
    let mut config = load_config(&workspace.config_path)?;
    let cpu_type = config.instance.image.cpu_type();
    let parameter = MachineImage::latest_amazon_linux2023(cpu_type)
        .ssm_parameter_name()
        .context("Latest image has no SSM parameter")?;

    let mut sp = Spinner::new(Spinners::Dots, format!("Resolving {}", parameter));
    let args = ssm_get_parameter_args(&parameter, workspace.environment.region.as_deref());
    let resolved = Shell::new().map_err(anyhow::Error::from).and_then(|sh| {
        debug!("{} {}", PLATFORM_SPECIFIC_AWS_COMMAND, args.join(" "));
        let answer = cmd!(sh, "{PLATFORM_SPECIFIC_AWS_COMMAND} {args...}").quiet().read()?;
        let ami_id = answer.trim().to_string();
        MachineImage::pinned(&ami_id, cpu_type)
            .with_context(|| format!("Unexpected answer from SSM: {}", ami_id))?;
        Ok(ami_id)
    });
    let ami_id = or_fail(&mut sp, &format!("Could not resolve {}", parameter), resolved)?;

    config.instance.image = ImageOptions::Pinned {
        ami_id: ami_id.clone(),
        cpu_type,
    };
    or_fail(
        &mut sp,
        "Could not update the config file",
        save_config(&workspace.config_path, &config),
    )?;
    sp.stop_and_persist(
        CHECK_MARK,
        format!("Pinned {} in {}", ami_id, workspace.config_path.display()),
    );
    Ok(())
}

fn deploy(workspace: &Workspace) -> Result<()> {
    let assembly = synthesize(workspace)?;
    let sh = Shell::new()?;
    let region = workspace.environment.region.clone();

    for stack in assembly.stacks() {
        let template_file = assembly.directory().join(stack.template_file());
        let args = deploy_args(&template_file, &stack.id, region.as_deref());
        let mut sp = Spinner::with_timer(Spinners::Dots, format!("Deploying {}", stack.id));
        debug!("{} {}", PLATFORM_SPECIFIC_AWS_COMMAND, args.join(" "));
        let deployed = cmd!(sh, "{PLATFORM_SPECIFIC_AWS_COMMAND} {args...}")
            .quiet()
            .ignore_stdout()
            .run()
            .with_context(|| format!("Deployment of {} failed", stack.id));
        or_fail(&mut sp, &format!("Could not deploy {}", stack.id), deployed)?;
        sp.stop_and_persist(CHECK_MARK, format!("Deployed {}", stack.id));
    }
    Ok(())
}

fn destroy(workspace: &Workspace, yes: bool) -> Result<()> {
    let config = load_config(&workspace.config_path)?;
    let app = build_app(&config, &workspace.output_dir(&config), workspace.environment.clone())?;
    let stack_ids: Vec<String> = app.stacks().iter().map(|stack| stack.id().to_string()).collect();
    if stack_ids.is_empty() {
        bail!("No stacks declared");
    }

    if !yes {
        let answer = Question::new(&format!("Are you sure you want to delete: {}?", stack_ids.join(", ")))
            .default(Answer::NO)
            .show_defaults()
            .confirm();
        if !matches!(answer, Answer::YES) {
            println!("Nothing deleted.");
            return Ok(());
        }
    }

    let sh = Shell::new()?;
    let region = workspace.environment.region.clone();
    for stack_id in &stack_ids {
        let mut sp = Spinner::new(Spinners::Dots, format!("Deleting stack {}", stack_id));
        let args = delete_stack_args(stack_id, region.as_deref());
        debug!("{} {}", PLATFORM_SPECIFIC_AWS_COMMAND, args.join(" "));
        let deleted = cmd!(sh, "{PLATFORM_SPECIFIC_AWS_COMMAND} {args...}")
            .quiet()
            .run()
            .with_context(|| format!("Deletion of {} failed", stack_id));
        or_fail(&mut sp, &format!("Could not delete {}", stack_id), deleted)?;
        sp.stop_and_persist(
            "🏁",
            format!("Deletion of {} will continue in the background.", stack_id),
        );
    }
    Ok(())
}

fn clean(workspace: &Workspace) -> Result<()> {
    let config = load_config(&workspace.config_path)?;
    let outdir = workspace.output_dir(&config);

    let mut sp = Spinner::new(Spinners::Dots, "Cleaning up generated files".into());
    let removed = Shell::new().map_err(anyhow::Error::from).and_then(|sh| {
        if outdir.exists() {
            sh.remove_path(&outdir)?;
        }
        if config_file_exists(&workspace.config_path) {
            sh.remove_path(&workspace.config_path)?;
        }
        Ok(())
    });
    or_fail(&mut sp, "Could not clean up generated files", removed)?;
    sp.stop_and_persist(CHECK_MARK, "Cleaned up generated files".into());
    Ok(())
}

impl Provider for Aws {
    fn init(&self, workspace: &Workspace, force: bool) -> Result<()> {
        init(workspace, force)
    }

    fn synth(&self, workspace: &Workspace) -> Result<()> {
        synth(workspace)
    }

    fn list(&self, workspace: &Workspace) -> Result<()> {
        list(workspace)
    }

    fn pin_image(&self, workspace: &Workspace) -> Result<()> {
        pin_image(workspace)
    }

    fn deploy(&self, workspace: &Workspace) -> Result<()> {
        deploy(workspace)
    }

    fn destroy(&self, workspace: &Workspace, yes: bool) -> Result<()> {
        destroy(workspace, yes)
    }

    fn clean(&self, workspace: &Workspace) -> Result<()> {
        clean(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONFIG_FILE;
    use crate::Environment;
    use std::path::PathBuf;

    fn workspace(dir: &Path) -> Workspace {
        Workspace::new(
            dir.join(DEFAULT_CONFIG_FILE),
            Some(dir.join("cdk.out")),
            Environment::default(),
        )
    }

    #[test]
    fn test_deploy_args() {
        let args = deploy_args(&PathBuf::from("cdk.out/EC2Stack.template.json"), "EC2Stack", Some("eu-west-1"));
        assert_eq!(
            args,
            vec![
                "cloudformation",
                "deploy",
                "--template-file",
                "cdk.out/EC2Stack.template.json",
                "--stack-name",
                "EC2Stack",
                "--capabilities",
                "CAPABILITY_IAM",
                "--no-fail-on-empty-changeset",
                "--region",
                "eu-west-1",
            ]
        );
    }

    #[test]
    fn test_delete_and_ssm_args_without_region() {
        assert_eq!(
            delete_stack_args("EC2Stack", None),
            vec!["cloudformation", "delete-stack", "--stack-name", "EC2Stack"]
        );
        let args = ssm_get_parameter_args("/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-6.1-arm64", None);
        assert_eq!(args[..4], ["ssm", "get-parameter", "--name", "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-6.1-arm64"]);
        assert!(!args.contains(&"--region".to_string()));
    }

    #[test]
    fn test_or_fail_passes_results_through() {
        let mut sp = Spinner::new(Spinners::Dots, "Working".into());
        assert_eq!(or_fail(&mut sp, "Failed", Ok(7)).unwrap(), 7);

        let failed: Result<()> = Err(anyhow::anyhow!("boom"));
        let err = or_fail(&mut sp, "Failed", failed).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        Aws.init(&workspace, false).unwrap();

        assert!(workspace.config_path.exists());
        let config = load_config(&workspace.config_path).unwrap();
        assert_eq!(config, Ec2StackConfig::default());
        assert_eq!(config.stack_name, "EC2Stack");
        assert_eq!(config.instance.instance_type, "t4g.micro");
        assert_eq!(config.network.max_azs, 2);
    }

    #[test]
    fn test_init_force_keeps_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        std::fs::write(&workspace.config_path, "stack_name: Custom\n").unwrap();

        Aws.init(&workspace, false).unwrap();
        assert_eq!(load_config(&workspace.config_path).unwrap().stack_name, "Custom");

        Aws.init(&workspace, true).unwrap();
        assert_eq!(load_config(&workspace.config_path).unwrap().stack_name, "EC2Stack");
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_synth_then_clean() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        Aws.init(&workspace, false).unwrap();

        let assembly = synthesize(&workspace).unwrap();
        assert_eq!(assembly.directory(), dir.path().join("cdk.out"));
        assert!(dir.path().join("cdk.out").join("EC2Stack.template.json").exists());

        Aws.clean(&workspace).unwrap();
        assert!(!dir.path().join("cdk.out").exists());
        assert!(!workspace.config_path.exists());
    }
}
