//! The EC2 stack: one VPC, one instance on it, and the SSM policy on the
//! instance's role.

use crate::construct::{App, Stack};
use crate::ec2::{Instance, InstanceProps, MachineImage, UserData, Vpc, VpcProps};
use crate::error::Result;
use crate::iam::{ManagedPolicy, PolicyAttachment};
use crate::{Ec2StackConfig, Environment, ImageOptions};

use log::debug;
use std::path::Path;

pub const VPC_ID: &str = "VPC";
pub const STACK_DESCRIPTION: &str = "EC2 instance managed through SSM in its own VPC";

impl ImageOptions {
    pub fn to_machine_image(&self) -> Result<MachineImage> {
        match self {
            ImageOptions::Latest { cpu_type } => Ok(MachineImage::latest_amazon_linux2023(*cpu_type)),
            ImageOptions::Pinned { ami_id, cpu_type } => MachineImage::pinned(ami_id, *cpu_type),
        }
    }
}

/// Id of the construct attaching `policy_name` to the instance role.
pub fn attachment_id(policy_name: &str) -> String {
    let readable: String = policy_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("{}Attachment", readable)
}

pub fn declare_ec2_stack(stack: &mut Stack, config: &Ec2StackConfig) -> Result<()> {
    stack.set_description(STACK_DESCRIPTION);
    let vpc = Vpc::declare(
        stack,
        VPC_ID,
        VpcProps::new(
            config.network.max_azs,
            &config.network.cidr,
            config.network.nat_gateways,
        )?,
    )?;

    let instance = Instance::declare(
        stack,
        &config.instance.name,
        InstanceProps {
            instance_name: config.instance.name.clone(),
            instance_type: config.instance.instance_type.parse()?,
            machine_image: config.instance.image.to_machine_image()?,
            vpc: &vpc,
            user_data: UserData::custom(config.instance.user_data.as_str()),
        },
    )?;

    for policy_name in &config.managed_policies {
        PolicyAttachment::declare(
            stack,
            &attachment_id(policy_name),
            ManagedPolicy::from_aws_managed_policy_name(policy_name)?,
            instance.role(),
        )?;
    }

    debug!("Declared stack {}", stack.id());
    Ok(())
}

/// Builds the app with its single stack, ready for [`App::synth`].
pub fn build_app(config: &Ec2StackConfig, outdir: &Path, environment: Environment) -> Result<App> {
    let mut app = App::new(outdir, environment);
    let stack = app.add_stack(&config.stack_name)?;
    declare_ec2_stack(stack, config)?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::StackArtifact;
    use crate::construct::logical_id;
    use crate::ec2::instance::INSTANCE_FQN;
    use crate::ec2::vpc::VPC_FQN;
    use crate::error::SynthError;
    use crate::iam::POLICY_ATTACHMENT_FQN;
    use crate::template::reference;
    use crate::DEFAULT_MANAGED_POLICY;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn synthesize(config: &Ec2StackConfig) -> StackArtifact {
        let app = build_app(config, Path::new("cdk.out"), Environment::default()).unwrap();
        let assembly = app.assemble().unwrap();
        assert_eq!(assembly.stacks().len(), 1);
        assembly.stacks()[0].clone()
    }

    fn children_with_fqn<'a>(artifact: &'a StackArtifact, fqn: &'a str) -> Vec<&'a str> {
        artifact
            .tree
            .children
            .values()
            .filter(|node| node.fqn() == fqn)
            .map(|node| node.id.as_str())
            .collect()
    }

    #[test]
    fn test_declares_exactly_three_constructs() {
        let app = build_app(&Ec2StackConfig::default(), Path::new("cdk.out"), Environment::default()).unwrap();
        assert_eq!(app.stacks().len(), 1);
        assert_eq!(app.stacks()[0].constructs().count(), 3);

        let artifact = synthesize(&Ec2StackConfig::default());

        assert_eq!(artifact.id, "EC2Stack");
        assert_eq!(artifact.template.description.as_deref(), Some(STACK_DESCRIPTION));
        assert_eq!(artifact.tree.children.len(), 3);
        assert_eq!(children_with_fqn(&artifact, VPC_FQN), vec!["VPC"]);
        assert_eq!(children_with_fqn(&artifact, INSTANCE_FQN), vec!["TestInstance"]);
        assert_eq!(
            children_with_fqn(&artifact, POLICY_ATTACHMENT_FQN),
            vec!["AmazonSSMManagedInstanceCoreAttachment"]
        );

        assert_eq!(artifact.template.resources_of_type("AWS::EC2::VPC").count(), 1);
        assert_eq!(artifact.template.resources_of_type("AWS::EC2::Instance").count(), 1);
        assert_eq!(artifact.template.resources_of_type("AWS::IAM::Role").count(), 1);
    }

    #[test]
    fn test_network_spans_two_azs() {
        let artifact = synthesize(&Ec2StackConfig::default());
        let vpc = artifact.tree.find("VPC").unwrap();
        assert_eq!(vpc.attributes["maxAzs"], json!(2));
        assert_eq!(vpc.attributes["availabilityZones"], json!(2));
    }

    #[test]
    fn test_instance_is_placed_in_the_declared_vpc() {
        let artifact = synthesize(&Ec2StackConfig::default());
        let template = &artifact.template;
        let (vpc_id, _) = template.resources_of_type("AWS::EC2::VPC").next().unwrap();
        let (_, instance) = template.resources_of_type("AWS::EC2::Instance").next().unwrap();

        let subnet_id = instance.get("SubnetId").unwrap()["Ref"].as_str().unwrap();
        let subnet = &template.resources[subnet_id];
        assert_eq!(subnet.resource_type, "AWS::EC2::Subnet");
        assert_eq!(subnet.get("VpcId"), Some(&reference(vpc_id)));
        assert_eq!(subnet.get("MapPublicIpOnLaunch"), Some(&json!(false)));
    }

    #[test]
    fn test_instance_size_architecture_and_user_data() {
        let artifact = synthesize(&Ec2StackConfig::default());
        let (_, instance) = artifact.template.resources_of_type("AWS::EC2::Instance").next().unwrap();

        assert_eq!(instance.get("InstanceType"), Some(&json!("t4g.micro")));
        assert_eq!(instance.get("Tags"), Some(&json!([{ "Key": "Name", "Value": "TestInstance" }])));

        let script = instance.get("UserData").unwrap()["Fn::Base64"].as_str().unwrap();
        assert!(script
            .lines()
            .any(|line| line == "echo 'User data script executed' > /var/log/user-data.log"));

        let node = artifact.tree.find("TestInstance").unwrap();
        assert_eq!(node.attributes["cpuType"], json!("arm64"));
        assert_eq!(node.attributes["instanceType"], json!("t4g.micro"));
        assert_eq!(node.attributes["network"], json!("EC2Stack/VPC"));

        let image_ref = instance.get("ImageId").unwrap()["Ref"].as_str().unwrap();
        let parameter = &artifact.template.parameters[image_ref];
        assert_eq!(
            parameter.default.as_deref(),
            Some("/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-6.1-arm64")
        );
    }

    #[test]
    fn test_policy_is_attached_to_the_instance_role() {
        let artifact = synthesize(&Ec2StackConfig::default());

        let attachment = artifact.tree.find("AmazonSSMManagedInstanceCoreAttachment").unwrap();
        assert_eq!(attachment.attributes["managedPolicyName"], json!(DEFAULT_MANAGED_POLICY));
        assert_eq!(attachment.attributes["target"], json!("EC2Stack/TestInstance/InstanceRole"));

        let role_path = crate::construct::ConstructPath::root("TestInstance")
            .unwrap()
            .child("InstanceRole")
            .child("Resource");
        let role = &artifact.template.resources[&logical_id(&role_path)];
        assert_eq!(role.resource_type, "AWS::IAM::Role");
        let arns = role.get("ManagedPolicyArns").unwrap().as_array().unwrap();
        assert_eq!(arns.len(), 1);
        assert_eq!(
            arns[0]["Fn::Join"][1][2],
            json!(":iam::aws:policy/AmazonSSMManagedInstanceCore")
        );

        let (_, instance) = artifact.template.resources_of_type("AWS::EC2::Instance").next().unwrap();
        assert_eq!(instance.depends_on, vec![logical_id(&role_path)]);
        let (profile_id, profile) = artifact
            .template
            .resources_of_type("AWS::IAM::InstanceProfile")
            .next()
            .unwrap();
        assert_eq!(profile.get("Roles"), Some(&json!([reference(&logical_id(&role_path))])));
        assert_eq!(instance.get("IamInstanceProfile"), Some(&reference(profile_id)));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let first = synthesize(&Ec2StackConfig::default());
        let second = synthesize(&Ec2StackConfig::default());
        assert_eq!(first.template, second.template);
    }

    #[test]
    fn test_duplicate_policy_names_collide() {
        let mut config = Ec2StackConfig::default();
        config.managed_policies.push(DEFAULT_MANAGED_POLICY.to_string());
        let result = build_app(&config, Path::new("cdk.out"), Environment::default());
        assert!(matches!(result, Err(SynthError::DuplicateConstruct { .. })));
    }

    #[test]
    fn test_configured_network_is_honoured() {
        let mut config = Ec2StackConfig::default();
        config.network.max_azs = 3;
        config.network.cidr = "172.16.0.0/16".to_string();
        let app = build_app(
            &config,
            Path::new("cdk.out"),
            Environment::new(None, Some("eu-west-1".to_string())),
        )
        .unwrap();
        let assembly = app.assemble().unwrap();
        let template = &assembly.stacks()[0].template;
        assert_eq!(template.resources_of_type("AWS::EC2::Subnet").count(), 6);
        let (_, vpc) = template.resources_of_type("AWS::EC2::VPC").next().unwrap();
        assert_eq!(vpc.get("CidrBlock"), Some(&json!("172.16.0.0/16")));
    }
}
