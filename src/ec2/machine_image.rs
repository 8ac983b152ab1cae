use crate::construct::{allocate_logical_id, RenderContext};
use crate::error::{Result, SynthError};
use crate::template::{reference, Parameter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

const AL2023_PARAMETER_PREFIX: &str = "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-6.1";
const IMAGE_ID_PARAMETER_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuType {
    Arm64,
    X86_64,
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CpuType::Arm64 => write!(f, "arm64"),
            CpuType::X86_64 => write!(f, "x86_64"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineImage {
    /// Latest Amazon Linux 2023, looked up from the public SSM parameter at deploy time.
    LatestAmazonLinux2023 { cpu_type: CpuType },
    Pinned { ami_id: String, cpu_type: CpuType },
}

impl MachineImage {
    pub fn latest_amazon_linux2023(cpu_type: CpuType) -> Self {
        MachineImage::LatestAmazonLinux2023 { cpu_type }
    }

    pub fn pinned(ami_id: &str, cpu_type: CpuType) -> Result<Self> {
        let ami_id = ami_id.trim();
        let valid = ami_id
            .strip_prefix("ami-")
            .map(|suffix| {
                (suffix.len() == 8 || suffix.len() == 17)
                    && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
            })
            .unwrap_or(false);
        if !valid {
            return Err(SynthError::InvalidImage(format!("'{}' is not an AMI id", ami_id)));
        }
        Ok(MachineImage::Pinned {
            ami_id: ami_id.to_string(),
            cpu_type,
        })
    }

    pub fn cpu_type(&self) -> CpuType {
        match self {
            MachineImage::LatestAmazonLinux2023 { cpu_type } | MachineImage::Pinned { cpu_type, .. } => *cpu_type,
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, MachineImage::Pinned { .. })
    }

    /// Public SSM parameter holding the current image id, for unpinned images.
    pub fn ssm_parameter_name(&self) -> Option<String> {
        match self {
            MachineImage::LatestAmazonLinux2023 { cpu_type } => {
                Some(format!("{}-{}", AL2023_PARAMETER_PREFIX, cpu_type))
            }
            MachineImage::Pinned { .. } => None,
        }
    }

    pub fn describe(&self) -> Value {
        match self {
            MachineImage::LatestAmazonLinux2023 { cpu_type } => json!({
                "kind": "latest",
                "os": "amazon-linux-2023",
                "cpuType": cpu_type.to_string(),
                "ssmParameter": self.ssm_parameter_name(),
            }),
            MachineImage::Pinned { ami_id, cpu_type } => json!({
                "kind": "pinned",
                "amiId": ami_id,
                "cpuType": cpu_type.to_string(),
            }),
        }
    }

    /// The `ImageId` property value, adding the SSM parameter when needed.
    pub(crate) fn render(&self, ctx: &mut RenderContext<'_>) -> Result<Value> {
        match self {
            MachineImage::Pinned { ami_id, .. } => Ok(Value::String(ami_id.clone())),
            MachineImage::LatestAmazonLinux2023 { .. } => {
                let name = self.ssm_parameter_name().unwrap_or_default();
                let logical_id = format!(
                    "{}Parameter",
                    allocate_logical_id(&["SsmParameterValue", name.as_str()])
                );
                ctx.add_parameter(
                    &logical_id,
                    Parameter {
                        parameter_type: IMAGE_ID_PARAMETER_TYPE.to_string(),
                        default: Some(name),
                    },
                )?;
                Ok(reference(&logical_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_ssm_parameter() {
        let image = MachineImage::latest_amazon_linux2023(CpuType::Arm64);
        assert_eq!(
            image.ssm_parameter_name().as_deref(),
            Some("/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-6.1-arm64")
        );
        assert!(!image.is_pinned());
        assert_eq!(image.describe()["cpuType"], "arm64");
    }

    #[test]
    fn test_pinned_validation() {
        let image = MachineImage::pinned("ami-0123456789abcdef0", CpuType::Arm64).unwrap();
        assert!(image.is_pinned());
        assert_eq!(image.ssm_parameter_name(), None);

        assert!(MachineImage::pinned("ami-12345678", CpuType::X86_64).is_ok());
        for bad in ["", "ami-", "ami-XYZ", "0123456789abcdef0", "ami-0123456789ABCDEF0"] {
            assert!(
                matches!(MachineImage::pinned(bad, CpuType::Arm64), Err(SynthError::InvalidImage(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_cpu_type_yaml_names() {
        assert_eq!(serde_yaml::to_string(&CpuType::Arm64).unwrap().trim(), "arm64");
        assert_eq!(serde_yaml::to_string(&CpuType::X86_64).unwrap().trim(), "x86_64");
    }
}
