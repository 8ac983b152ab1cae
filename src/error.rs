use thiserror::Error;

pub type Result<T, E = SynthError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("invalid construct id '{0}': ids must be non-empty and must not contain '/'")]
    InvalidId(String),
    #[error("there is already a construct with id '{id}' in {scope}")]
    DuplicateConstruct { scope: String, id: String },
    #[error("stack '{0}' is already declared in this app")]
    DuplicateStack(String),
    #[error("{kind} '{path}' belongs to stack '{owner}' and cannot be referenced from stack '{stack}'")]
    CrossStackReference {
        kind: &'static str,
        path: String,
        owner: String,
        stack: String,
    },
    #[error("invalid network options: {0}")]
    InvalidNetwork(String),
    #[error("invalid CIDR block '{0}'")]
    InvalidCidr(String),
    #[error("invalid instance type '{0}'")]
    InvalidInstanceType(String),
    #[error("invalid machine image: {0}")]
    InvalidImage(String),
    #[error("invalid managed policy name '{0}'")]
    InvalidPolicyName(String),
    #[error("failed to write cloud assembly")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize cloud assembly")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::SynthError;

    #[test]
    fn test_duplicate_construct_message() {
        let err = SynthError::DuplicateConstruct {
            scope: "EC2Stack".to_string(),
            id: "VPC".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "there is already a construct with id 'VPC' in EC2Stack"
        );
    }
}
