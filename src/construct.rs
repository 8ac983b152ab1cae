//! The explicit builder context used during synthesis.
//!
//! An [`App`] owns its stacks, a [`Stack`] owns its declared constructs, and
//! [`App::synth`] consumes the whole tree. Nothing is registered globally.
//! Rendering runs in two passes over a stack: `prepare` lets constructs leave
//! contributions for others (policy attachments for their role), `render`
//! emits template resources and construct tree nodes.

use crate::assembly::{CloudAssembly, StackArtifact};
use crate::config::Environment;
use crate::error::{Result, SynthError};
use crate::template::{Parameter, Resource, Template, CDK_PATH_METADATA};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const APP_FQN: &str = "ec2stack.App";
pub const STACK_FQN: &str = "ec2stack.Stack";
pub const CONSTRUCT_FQN: &str = "ec2stack.Construct";
pub const CFN_RESOURCE_FQN: &str = "ec2stack.CfnResource";

const HASH_LENGTH: usize = 8;
const HIDDEN_IDS: [&str; 2] = ["Resource", "Default"];

/// Path of a construct relative to its stack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstructPath(Vec<String>);

impl ConstructPath {
    pub fn root(id: &str) -> Result<Self> {
        validate_id(id)?;
        Ok(ConstructPath(vec![id.to_string()]))
    }

    /// Child ids used by the built-in constructs are fixed literals, so only
    /// the ids coming from callers go through [`ConstructPath::root`].
    pub fn child(&self, id: &str) -> Self {
        let mut components = self.0.clone();
        components.push(id.to_string());
        ConstructPath(components)
    }

    pub fn id(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ConstructPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') {
        return Err(SynthError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Stable logical id for a resource at `path`.
///
/// The readable part concatenates the path components (dropping `Resource`
/// and `Default`, and collapsing repeated neighbours); the suffix is the
/// first eight hex digits of the SHA-256 of the full path, so two paths that
/// read the same still get distinct ids.
pub fn logical_id(path: &ConstructPath) -> String {
    allocate_logical_id(path.components())
}

pub fn allocate_logical_id<S: AsRef<str>>(components: &[S]) -> String {
    let full_path = components
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("/");

    let mut hasher = Sha256::new();
    hasher.update(full_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize()).to_uppercase();

    let mut readable: Vec<&str> = Vec::new();
    for component in components.iter().map(AsRef::as_ref) {
        if HIDDEN_IDS.contains(&component) || readable.last() == Some(&component) {
            continue;
        }
        readable.push(component);
    }
    let readable: String = readable
        .concat()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    format!("{}{}", readable, &digest[..HASH_LENGTH])
}

/// Something declared inside a stack.
pub trait Construct: fmt::Debug {
    fn path(&self) -> &ConstructPath;

    fn prepare(&self, _ctx: &mut RenderContext<'_>) -> Result<()> {
        Ok(())
    }

    fn render(&self, ctx: &mut RenderContext<'_>) -> Result<()>;
}

#[derive(Debug)]
pub struct App {
    outdir: PathBuf,
    environment: Environment,
    stacks: Vec<Stack>,
}

impl App {
    pub fn new(outdir: impl AsRef<Path>, environment: Environment) -> Self {
        App {
            outdir: outdir.as_ref().to_path_buf(),
            environment,
            stacks: Vec::new(),
        }
    }

    pub fn add_stack(&mut self, id: &str) -> Result<&mut Stack> {
        validate_id(id)?;
        if self.stacks.iter().any(|stack| stack.id == id) {
            return Err(SynthError::DuplicateStack(id.to_string()));
        }
        debug!("Adding stack {}", id);
        self.stacks.push(Stack::new(id, self.environment.clone()));
        let index = self.stacks.len() - 1;
        Ok(&mut self.stacks[index])
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Renders every stack without touching the filesystem.
    pub fn assemble(self) -> Result<CloudAssembly> {
        let artifacts = self
            .stacks
            .iter()
            .map(Stack::render)
            .collect::<Result<Vec<_>>>()?;
        Ok(CloudAssembly::new(self.outdir, artifacts))
    }

    /// Renders every stack and writes the cloud assembly to the output directory.
    pub fn synth(self) -> Result<CloudAssembly> {
        let assembly = self.assemble()?;
        assembly.write()?;
        info!(
            "Synthesized {} stack(s) to {}",
            assembly.stacks().len(),
            assembly.directory().display()
        );
        Ok(assembly)
    }
}

#[derive(Debug)]
pub struct Stack {
    id: String,
    environment: Environment,
    description: Option<String>,
    constructs: Vec<Box<dyn Construct>>,
}

impl Stack {
    pub(crate) fn new(id: &str, environment: Environment) -> Self {
        Stack {
            id: id.to_string(),
            environment,
            description: None,
            constructs: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sets the template's `Description`.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn constructs(&self) -> impl Iterator<Item = &dyn Construct> {
        self.constructs.iter().map(|construct| construct.as_ref())
    }

    /// Adds a top-level construct; ids are unique among the stack's children.
    pub fn declare(&mut self, construct: Box<dyn Construct>) -> Result<()> {
        let path = construct.path();
        if self.constructs.iter().any(|existing| existing.path() == path) {
            return Err(SynthError::DuplicateConstruct {
                scope: self.id.clone(),
                id: path.id().to_string(),
            });
        }
        debug!("Declared {}/{}", self.id, path);
        self.constructs.push(construct);
        Ok(())
    }

    /// Errors unless a handle created in `owner` may be used in this stack.
    pub(crate) fn check_owner(&self, kind: &'static str, owner: &str, path: &ConstructPath) -> Result<()> {
        if owner != self.id {
            return Err(SynthError::CrossStackReference {
                kind,
                path: format!("{}/{}", owner, path),
                owner: owner.to_string(),
                stack: self.id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn render(&self) -> Result<StackArtifact> {
        let mut ctx = RenderContext::new(&self.id, &self.environment);
        for construct in &self.constructs {
            construct.prepare(&mut ctx)?;
        }
        for construct in &self.constructs {
            construct.render(&mut ctx)?;
        }
        ctx.template.description = self.description.clone();
        Ok(StackArtifact {
            id: self.id.clone(),
            environment: self.environment.clone(),
            template: ctx.template,
            tree: ctx.tree,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructInfo {
    pub fqn: String,
}

/// One node of `tree.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, TreeNode>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(rename = "constructInfo")]
    pub construct_info: ConstructInfo,
}

impl TreeNode {
    pub fn new(id: &str, path: &str, fqn: &str) -> Self {
        TreeNode {
            id: id.to_string(),
            path: path.to_string(),
            children: BTreeMap::new(),
            attributes: Map::new(),
            construct_info: ConstructInfo {
                fqn: fqn.to_string(),
            },
        }
    }

    pub fn fqn(&self) -> &str {
        &self.construct_info.fqn
    }

    pub fn find(&self, relative_path: &str) -> Option<&TreeNode> {
        relative_path
            .split('/')
            .try_fold(self, |node, id| node.children.get(id))
    }
}

/// Mutable state of one stack's render pass.
#[derive(Debug)]
pub struct RenderContext<'a> {
    stack_id: &'a str,
    environment: &'a Environment,
    template: Template,
    tree: TreeNode,
    managed_policies: BTreeMap<ConstructPath, Vec<Value>>,
}

impl<'a> RenderContext<'a> {
    fn new(stack_id: &'a str, environment: &'a Environment) -> Self {
        RenderContext {
            stack_id,
            environment,
            template: Template::default(),
            tree: TreeNode::new(stack_id, stack_id, STACK_FQN),
            managed_policies: BTreeMap::new(),
        }
    }

    pub fn environment(&self) -> &Environment {
        self.environment
    }

    /// Full path of a construct, including the stack id.
    pub fn node_path(&self, path: &ConstructPath) -> String {
        format!("{}/{}", self.stack_id, path)
    }

    pub fn add_node(&mut self, path: &ConstructPath, fqn: &str, attributes: Map<String, Value>) -> Result<()> {
        let full_path = self.node_path(path);
        let (parent_ids, id) = match path.components().split_last() {
            Some((id, parents)) => (parents, id),
            None => return Err(SynthError::InvalidId(String::new())),
        };

        let mut parent = &mut self.tree;
        let mut parent_path = self.stack_id.to_string();
        for parent_id in parent_ids {
            parent_path = format!("{}/{}", parent_path, parent_id);
            parent = parent
                .children
                .entry(parent_id.clone())
                .or_insert_with(|| TreeNode::new(parent_id, &parent_path, CONSTRUCT_FQN));
        }

        if parent.children.contains_key(id) {
            return Err(SynthError::DuplicateConstruct {
                scope: parent_path,
                id: id.clone(),
            });
        }
        let mut node = TreeNode::new(id, &full_path, fqn);
        node.attributes = attributes;
        parent.children.insert(id.clone(), node);
        Ok(())
    }

    /// Adds a CloudFormation resource at `path` and returns its logical id.
    pub fn add_resource(&mut self, path: &ConstructPath, mut resource: Resource) -> Result<String> {
        let logical_id = logical_id(path);
        let full_path = self.node_path(path);

        let mut attributes = Map::new();
        attributes.insert(
            "aws:cdk:cloudformation:type".to_string(),
            Value::String(resource.resource_type.clone()),
        );
        attributes.insert(
            "aws:cdk:cloudformation:logicalId".to_string(),
            Value::String(logical_id.clone()),
        );
        self.add_node(path, CFN_RESOURCE_FQN, attributes)?;

        resource
            .metadata
            .insert(CDK_PATH_METADATA.to_string(), Value::String(full_path));
        debug!("Rendered {} as {}", resource.resource_type, logical_id);
        self.template.resources.insert(logical_id.clone(), resource);
        Ok(logical_id)
    }

    /// Adds a template parameter; re-adding an identical one is a no-op.
    pub fn add_parameter(&mut self, logical_id: &str, parameter: Parameter) -> Result<()> {
        match self.template.parameters.get(logical_id) {
            Some(existing) if *existing == parameter => Ok(()),
            Some(_) => Err(SynthError::DuplicateConstruct {
                scope: format!("{} parameters", self.stack_id),
                id: logical_id.to_string(),
            }),
            None => {
                self.template
                    .parameters
                    .insert(logical_id.to_string(), parameter);
                Ok(())
            }
        }
    }

    pub fn grant_managed_policy(&mut self, role: &ConstructPath, policy_arn: Value) {
        let arns = self.managed_policies.entry(role.clone()).or_default();
        if !arns.contains(&policy_arn) {
            arns.push(policy_arn);
        }
    }

    pub fn managed_policies(&self, role: &ConstructPath) -> Vec<Value> {
        self.managed_policies.get(role).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Bucket {
        path: ConstructPath,
    }

    impl Construct for Bucket {
        fn path(&self) -> &ConstructPath {
            &self.path
        }

        fn render(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
            ctx.add_node(&self.path, "test.Bucket", Map::new())?;
            ctx.add_resource(&self.path.child("Resource"), Resource::new("AWS::S3::Bucket"))?;
            Ok(())
        }
    }

    fn bucket(id: &str) -> Box<dyn Construct> {
        Box::new(Bucket {
            path: ConstructPath::root(id).unwrap(),
        })
    }

    #[test]
    fn test_logical_id_drops_resource_and_appends_hash() {
        let path = ConstructPath::root("VPC").unwrap().child("Resource");
        let id = logical_id(&path);
        assert!(id.starts_with("VPC"));
        assert_eq!(id.len(), "VPC".len() + HASH_LENGTH);
        assert!(id[3..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_logical_id_is_stable_and_path_sensitive() {
        let subnet = ConstructPath::root("VPC").unwrap().child("PublicSubnet1").child("Subnet");
        assert_eq!(logical_id(&subnet), logical_id(&subnet.clone()));
        assert!(logical_id(&subnet).starts_with("VPCPublicSubnet1Subnet"));

        // same readable part, different path
        let a = allocate_logical_id(&["A", "Resource"]);
        let b = allocate_logical_id(&["A", "Default"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_logical_id_strips_non_alphanumerics() {
        let id = allocate_logical_id(&["my-vpc", "Subnet_1"]);
        assert!(id.starts_with("myvpcSubnet1"));
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        assert!(matches!(ConstructPath::root(""), Err(SynthError::InvalidId(_))));
        assert!(matches!(ConstructPath::root("a/b"), Err(SynthError::InvalidId(_))));
    }

    #[test]
    fn test_duplicate_stack_is_rejected() {
        let mut app = App::new("cdk.out", Environment::default());
        app.add_stack("EC2Stack").unwrap();
        assert!(matches!(
            app.add_stack("EC2Stack"),
            Err(SynthError::DuplicateStack(id)) if id == "EC2Stack"
        ));
    }

    #[test]
    fn test_duplicate_construct_is_rejected() {
        let mut app = App::new("cdk.out", Environment::default());
        let stack = app.add_stack("Storage").unwrap();
        stack.declare(bucket("Logs")).unwrap();
        assert!(matches!(
            stack.declare(bucket("Logs")),
            Err(SynthError::DuplicateConstruct { id, .. }) if id == "Logs"
        ));
    }

    #[test]
    fn test_render_builds_tree_and_metadata() {
        let mut app = App::new("cdk.out", Environment::default());
        let stack = app.add_stack("Storage").unwrap();
        stack.declare(bucket("Logs")).unwrap();

        let assembly = app.assemble().unwrap();
        let artifact = assembly.stack("Storage").unwrap();

        let node = artifact.tree.find("Logs/Resource").unwrap();
        assert_eq!(node.path, "Storage/Logs/Resource");
        assert_eq!(node.fqn(), CFN_RESOURCE_FQN);

        let (_, resource) = artifact.template.resources_of_type("AWS::S3::Bucket").next().unwrap();
        assert_eq!(resource.cdk_path(), Some("Storage/Logs/Resource"));
        assert_eq!(artifact.template.description, None);
    }

    #[test]
    fn test_stack_description_lands_in_template() {
        let mut app = App::new("cdk.out", Environment::default());
        let stack = app.add_stack("Storage").unwrap();
        stack.set_description("Log buckets");
        stack.declare(bucket("Logs")).unwrap();

        let assembly = app.assemble().unwrap();
        let template = &assembly.stack("Storage").unwrap().template;
        assert_eq!(template.description.as_deref(), Some("Log buckets"));
        let rendered = serde_json::to_value(template).unwrap();
        assert_eq!(rendered["Description"], "Log buckets");
    }

    #[test]
    fn test_grant_managed_policy_deduplicates() {
        let env = Environment::default();
        let mut ctx = RenderContext::new("EC2Stack", &env);
        let role = ConstructPath::root("Role").unwrap();
        ctx.grant_managed_policy(&role, Value::String("arn".to_string()));
        ctx.grant_managed_policy(&role, Value::String("arn".to_string()));
        assert_eq!(ctx.managed_policies(&role).len(), 1);
    }
}
