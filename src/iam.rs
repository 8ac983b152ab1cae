//! IAM: the role an instance assumes and managed-policy attachments on it.

use crate::construct::{Construct, ConstructPath, RenderContext, Stack};
use crate::error::{Result, SynthError};
use crate::template::{join, reference, Resource};

use serde_json::{json, Map, Value};

pub const EC2_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";
pub const ROLE_FQN: &str = "ec2stack.aws_iam.Role";
pub const POLICY_ATTACHMENT_FQN: &str = "ec2stack.aws_iam.ManagedPolicyAttachment";

/// An AWS managed policy, referenced by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    name: String,
}

impl ManagedPolicy {
    pub fn from_aws_managed_policy_name(name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && name.len() <= 128
            && !name.starts_with('/')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "+=,.@-_/".contains(c));
        if !valid {
            return Err(SynthError::InvalidPolicyName(name.to_string()));
        }
        Ok(ManagedPolicy {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `arn:<partition>:iam::aws:policy/<name>`, partition resolved at deploy time.
    pub fn arn(&self) -> Value {
        join(
            "",
            vec![
                json!("arn:"),
                reference("AWS::Partition"),
                json!(format!(":iam::aws:policy/{}", self.name)),
            ],
        )
    }
}

/// A role assumable by one AWS service. Owned by the construct that creates it.
#[derive(Debug, Clone)]
pub struct Role {
    path: ConstructPath,
    assumed_by: String,
}

impl Role {
    pub(crate) fn new(path: ConstructPath, assumed_by: &str) -> Self {
        Role {
            path,
            assumed_by: assumed_by.to_string(),
        }
    }

    pub fn path(&self) -> &ConstructPath {
        &self.path
    }

    /// Renders the role, including every managed policy granted to it during
    /// the prepare pass, and returns its logical id.
    pub(crate) fn render(&self, ctx: &mut RenderContext<'_>) -> Result<String> {
        let mut attributes = Map::new();
        attributes.insert("assumedBy".to_string(), json!(self.assumed_by));
        ctx.add_node(&self.path, ROLE_FQN, attributes)?;

        let mut resource = Resource::new("AWS::IAM::Role").property(
            "AssumeRolePolicyDocument",
            json!({
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": self.assumed_by }
                }],
                "Version": "2012-10-17"
            }),
        );
        let managed_policies = ctx.managed_policies(&self.path);
        if !managed_policies.is_empty() {
            resource = resource.property("ManagedPolicyArns", Value::Array(managed_policies));
        }
        ctx.add_resource(&self.path.child("Resource"), resource)
    }
}

/// Handle to a declared role, valid only within the stack that declared it.
#[derive(Debug, Clone)]
pub struct RoleRef {
    stack: String,
    path: ConstructPath,
}

impl RoleRef {
    pub(crate) fn new(stack: &str, path: ConstructPath) -> Self {
        RoleRef {
            stack: stack.to_string(),
            path,
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn path(&self) -> &ConstructPath {
        &self.path
    }
}

/// Grants a managed policy to a role declared earlier in the same stack.
#[derive(Debug, Clone)]
pub struct PolicyAttachment {
    path: ConstructPath,
    policy: ManagedPolicy,
    role: ConstructPath,
}

impl PolicyAttachment {
    pub fn declare(stack: &mut Stack, id: &str, policy: ManagedPolicy, role: &RoleRef) -> Result<()> {
        let path = ConstructPath::root(id)?;
        stack.check_owner("role", role.stack(), role.path())?;
        stack.declare(Box::new(PolicyAttachment {
            path,
            policy,
            role: role.path().clone(),
        }))
    }
}

impl Construct for PolicyAttachment {
    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn prepare(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        ctx.grant_managed_policy(&self.role, self.policy.arn());
        Ok(())
    }

    fn render(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let mut attributes = Map::new();
        attributes.insert("managedPolicyName".to_string(), json!(self.policy.name()));
        attributes.insert("policyArn".to_string(), self.policy.arn());
        attributes.insert("target".to_string(), json!(ctx.node_path(&self.role)));
        ctx.add_node(&self.path, POLICY_ATTACHMENT_FQN, attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_managed_policy_arn() {
        let policy = ManagedPolicy::from_aws_managed_policy_name("AmazonSSMManagedInstanceCore").unwrap();
        assert_eq!(
            policy.arn(),
            json!({
                "Fn::Join": ["", [
                    "arn:",
                    { "Ref": "AWS::Partition" },
                    ":iam::aws:policy/AmazonSSMManagedInstanceCore"
                ]]
            })
        );
    }

    #[test]
    fn test_managed_policy_names() {
        assert!(ManagedPolicy::from_aws_managed_policy_name("service-role/AmazonEC2RoleforSSM").is_ok());
        for bad in ["", "/Leading", "has space", "semi;colon"] {
            assert!(
                matches!(
                    ManagedPolicy::from_aws_managed_policy_name(bad),
                    Err(SynthError::InvalidPolicyName(_))
                ),
                "{} should be rejected",
                bad
            );
        }
    }
}
