//! EC2 constructs: the network topology and the compute instance.

pub mod cidr;
pub mod instance;
pub mod machine_image;
pub mod user_data;
pub mod vpc;

pub use cidr::CidrBlock;
pub use instance::{Instance, InstanceProps, InstanceRef, InstanceType};
pub use machine_image::{CpuType, MachineImage};
pub use user_data::UserData;
pub use vpc::{Subnet, SubnetType, Vpc, VpcProps, VpcRef, DEFAULT_VPC_CIDR};
