//! The cloud assembly: the directory handed to the deployment engine.
//!
//! ```text
//! cdk.out/
//! ├── manifest.json
//! ├── tree.json
//! └── <StackId>.template.json
//! ```

use crate::config::Environment;
use crate::construct::{TreeNode, APP_FQN};
use crate::error::Result;
use crate::template::Template;

use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TREE_FILE: &str = "tree.json";
pub const ASSEMBLY_VERSION: &str = "36.0.0";
pub const TREE_VERSION: &str = "tree-0.1";

#[derive(Debug, Clone)]
pub struct StackArtifact {
    pub id: String,
    pub environment: Environment,
    pub template: Template,
    pub tree: TreeNode,
}

impl StackArtifact {
    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.id)
    }
}

#[derive(Debug, Clone)]
pub struct CloudAssembly {
    directory: PathBuf,
    stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    pub(crate) fn new(directory: PathBuf, stacks: Vec<StackArtifact>) -> Self {
        CloudAssembly { directory, stacks }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn stacks(&self) -> &[StackArtifact] {
        &self.stacks
    }

    pub fn stack(&self, id: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|stack| stack.id == id)
    }

    pub fn template_path(&self, id: &str) -> Option<PathBuf> {
        self.stack(id)
            .map(|stack| self.directory.join(stack.template_file()))
    }

    pub fn manifest(&self) -> Value {
        let mut artifacts = Map::new();
        for stack in &self.stacks {
            artifacts.insert(
                stack.id.clone(),
                json!({
                    "type": "aws:cloudformation:stack",
                    "environment": stack.environment.name(),
                    "properties": { "templateFile": stack.template_file() },
                    "displayName": stack.id,
                }),
            );
        }
        artifacts.insert(
            "Tree".to_string(),
            json!({ "type": "cdk:tree", "properties": { "file": TREE_FILE } }),
        );
        json!({ "version": ASSEMBLY_VERSION, "artifacts": artifacts })
    }

    pub fn tree(&self) -> Result<Value> {
        let mut root = TreeNode::new("App", "", APP_FQN);
        for stack in &self.stacks {
            root.children.insert(stack.id.clone(), stack.tree.clone());
        }
        Ok(json!({ "version": TREE_VERSION, "tree": serde_json::to_value(root)? }))
    }

    pub fn write(&self) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        for stack in &self.stacks {
            write_json(&self.directory.join(stack.template_file()), &serde_json::to_value(&stack.template)?)?;
        }
        write_json(&self.directory.join(MANIFEST_FILE), &self.manifest())?;
        write_json(&self.directory.join(TREE_FILE), &self.tree()?)?;
        Ok(())
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let mut contents = serde_json::to_string_pretty(value)?;
    contents.push('\n');
    fs::write(path, contents)?;
    Ok(())
}
