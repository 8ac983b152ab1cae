use crate::template::base64;

use serde_json::Value;

const LINUX_SHEBANG: &str = "#!/bin/bash";

/// Shell commands run once when the instance first boots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    script: String,
}

impl UserData {
    /// Uses `script` verbatim.
    pub fn custom(script: impl Into<String>) -> Self {
        UserData {
            script: script.into(),
        }
    }

    pub fn for_linux<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut script = String::from(LINUX_SHEBANG);
        for command in commands {
            script.push('\n');
            script.push_str(command.as_ref());
        }
        UserData { script }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn to_template_value(&self) -> Value {
        base64(self.script.clone())
    }
}
