use super::machine_image::{CpuType, MachineImage};
use super::user_data::UserData;
use super::vpc::{Subnet, SubnetType, VpcRef};
use crate::construct::{Construct, ConstructPath, RenderContext, Stack};
use crate::error::{Result, SynthError};
use crate::iam::{Role, RoleRef, EC2_SERVICE_PRINCIPAL};
use crate::template::{availability_zone, get_att, name_tag, reference, Resource};

use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

pub const INSTANCE_FQN: &str = "ec2stack.aws_ec2.Instance";
pub const SECURITY_GROUP_FQN: &str = "ec2stack.aws_ec2.SecurityGroup";

/// An EC2 instance type such as `t4g.micro`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceType {
    family: String,
    size: String,
}

impl InstanceType {
    /// Graviton families carry a `g` after the generation digit (`t4g`,
    /// `m7gd`, `c6gn`); `a1` is the first-generation ARM family.
    pub fn architecture(&self) -> CpuType {
        if self.family == "a1" {
            return CpuType::Arm64;
        }
        let attributes = self
            .family
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_start_matches(|c: char| c.is_ascii_digit());
        if attributes.starts_with('g') {
            CpuType::Arm64
        } else {
            CpuType::X86_64
        }
    }
}

impl FromStr for InstanceType {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SynthError::InvalidInstanceType(s.to_string());
        let (family, size) = s.trim().split_once('.').ok_or_else(invalid)?;
        let well_formed = |part: &str| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        };
        if !well_formed(family) || !well_formed(size) || !family.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(invalid());
        }
        Ok(InstanceType {
            family: family.to_string(),
            size: size.to_string(),
        })
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.size)
    }
}

pub struct InstanceProps<'a> {
    pub instance_name: String,
    pub instance_type: InstanceType,
    pub machine_image: MachineImage,
    pub vpc: &'a VpcRef,
    pub user_data: UserData,
}

#[derive(Debug, Clone)]
pub struct Instance {
    path: ConstructPath,
    instance_name: String,
    instance_type: InstanceType,
    machine_image: MachineImage,
    vpc: VpcRef,
    subnet: Subnet,
    user_data: UserData,
    role: Role,
}

#[derive(Debug, Clone)]
pub struct InstanceRef {
    role: RoleRef,
}

impl InstanceRef {
    /// The role created for the instance.
    pub fn role(&self) -> &RoleRef {
        &self.role
    }
}

impl Instance {
    pub fn declare(stack: &mut Stack, id: &str, props: InstanceProps<'_>) -> Result<InstanceRef> {
        let path = ConstructPath::root(id)?;
        stack.check_owner("VPC", props.vpc.stack(), props.vpc.path())?;

        if props.instance_type.architecture() != props.machine_image.cpu_type() {
            return Err(SynthError::InvalidImage(format!(
                "{} image cannot boot on {} ({})",
                props.machine_image.cpu_type(),
                props.instance_type,
                props.instance_type.architecture()
            )));
        }

        let subnet = props
            .vpc
            .subnets(SubnetType::Private)
            .next()
            .cloned()
            .ok_or_else(|| SynthError::InvalidNetwork(format!("{} has no private subnets", props.vpc.path())))?;

        let role = Role::new(path.child("InstanceRole"), EC2_SERVICE_PRINCIPAL);
        let instance_ref = InstanceRef {
            role: RoleRef::new(stack.id(), role.path().clone()),
        };

        stack.declare(Box::new(Instance {
            path,
            instance_name: props.instance_name,
            instance_type: props.instance_type,
            machine_image: props.machine_image,
            vpc: props.vpc.clone(),
            subnet,
            user_data: props.user_data,
            role,
        }))?;
        Ok(instance_ref)
    }

    fn attributes(&self, ctx: &RenderContext<'_>) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("instanceName".to_string(), json!(self.instance_name));
        attributes.insert("instanceType".to_string(), json!(self.instance_type.to_string()));
        attributes.insert("cpuType".to_string(), json!(self.machine_image.cpu_type().to_string()));
        attributes.insert("machineImage".to_string(), self.machine_image.describe());
        attributes.insert("network".to_string(), json!(ctx.node_path(self.vpc.path())));
        attributes.insert("subnet".to_string(), json!(ctx.node_path(self.subnet.path())));
        attributes.insert("role".to_string(), json!(ctx.node_path(self.role.path())));
        attributes.insert("userData".to_string(), json!(self.user_data.script()));
        attributes
    }
}

impl Construct for Instance {
    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let attributes = self.attributes(ctx);
        ctx.add_node(&self.path, INSTANCE_FQN, attributes)?;

        let security_group_path = self.path.child("InstanceSecurityGroup");
        let description = ctx.node_path(&security_group_path);
        ctx.add_node(&security_group_path, SECURITY_GROUP_FQN, Map::new())?;
        let security_group_id = ctx.add_resource(
            &security_group_path.child("Resource"),
            Resource::new("AWS::EC2::SecurityGroup")
                .property("GroupDescription", description)
                .property(
                    "SecurityGroupEgress",
                    json!([{
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow all outbound traffic by default",
                        "IpProtocol": "-1"
                    }]),
                )
                .property("Tags", name_tag(&self.instance_name))
                .property("VpcId", reference(&self.vpc.logical_id())),
        )?;

        let role_id = self.role.render(ctx)?;

        let profile_id = ctx.add_resource(
            &self.path.child("InstanceProfile"),
            Resource::new("AWS::IAM::InstanceProfile").property("Roles", json!([reference(&role_id)])),
        )?;

        let image_id = self.machine_image.render(ctx)?;

        ctx.add_resource(
            &self.path.child("Resource"),
            Resource::new("AWS::EC2::Instance")
                .property("AvailabilityZone", availability_zone(self.subnet.az_index))
                .property("IamInstanceProfile", reference(&profile_id))
                .property("ImageId", image_id)
                .property("InstanceType", self.instance_type.to_string())
                .property("SecurityGroupIds", json!([get_att(&security_group_id, "GroupId")]))
                .property("SubnetId", reference(&self.subnet.logical_id()))
                .property("Tags", name_tag(&self.instance_name))
                .property("UserData", self.user_data.to_template_value())
                .depends_on(role_id),
        )?;

        Ok(())
    }
}
