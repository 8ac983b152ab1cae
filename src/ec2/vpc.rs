//! The VPC construct and its default subnet topology.
//!
//! For every availability zone the VPC gets one public and one private
//! subnet. Public subnets route to an internet gateway; each of the first
//! `nat_gateways` public subnets also hosts a NAT gateway, and private subnets
//! route through those round-robin. Without NAT gateways private subnets have
//! no default route.

use super::cidr::CidrBlock;
use crate::construct::{logical_id, Construct, ConstructPath, RenderContext, Stack};
use crate::error::{Result, SynthError};
use crate::template::{availability_zone, get_att, name_tag, reference, tags, Resource};

use log::warn;
use serde_json::{json, Map, Value};
use std::fmt;

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const VPC_FQN: &str = "ec2stack.aws_ec2.Vpc";
pub const SUBNET_FQN: &str = "ec2stack.aws_ec2.Subnet";

/// Availability zones usable when the stack's region is unknown.
pub const AGNOSTIC_MAX_AZS: u8 = 2;

const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcProps {
    pub max_azs: u8,
    pub cidr: CidrBlock,
    pub nat_gateways: Option<u8>,
}

impl VpcProps {
    pub fn new(max_azs: u8, cidr: &str, nat_gateways: Option<u8>) -> Result<Self> {
        Ok(VpcProps {
            max_azs,
            cidr: cidr.parse()?,
            nat_gateways,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    Public,
    Private,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SubnetType::Public => write!(f, "Public"),
            SubnetType::Private => write!(f, "Private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub subnet_type: SubnetType,
    pub az_index: usize,
    pub cidr: CidrBlock,
    path: ConstructPath,
}

impl Subnet {
    pub fn path(&self) -> &ConstructPath {
        &self.path
    }

    pub fn logical_id(&self) -> String {
        logical_id(&self.path.child("Subnet"))
    }
}

#[derive(Debug, Clone)]
pub struct Vpc {
    path: ConstructPath,
    props: VpcProps,
    az_count: usize,
    nat_count: usize,
    subnets: Vec<Subnet>,
}

/// Handle to a declared VPC, valid only within the stack that declared it.
#[derive(Debug, Clone)]
pub struct VpcRef {
    stack: String,
    path: ConstructPath,
    subnets: Vec<Subnet>,
}

impl VpcRef {
    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn path(&self) -> &ConstructPath {
        &self.path
    }

    pub fn logical_id(&self) -> String {
        logical_id(&self.path.child("Resource"))
    }

    pub fn subnets(&self, subnet_type: SubnetType) -> impl Iterator<Item = &Subnet> {
        self.subnets
            .iter()
            .filter(move |subnet| subnet.subnet_type == subnet_type)
    }
}

impl Vpc {
    pub fn declare(stack: &mut Stack, id: &str, props: VpcProps) -> Result<VpcRef> {
        let path = ConstructPath::root(id)?;
        if props.max_azs == 0 {
            return Err(SynthError::InvalidNetwork("max_azs must be at least 1".to_string()));
        }

        let az_count = if stack.environment().is_agnostic() && props.max_azs > AGNOSTIC_MAX_AZS {
            warn!(
                "{}/{}: region is unknown, using {} availability zones instead of {}",
                stack.id(),
                id,
                AGNOSTIC_MAX_AZS,
                props.max_azs
            );
            usize::from(AGNOSTIC_MAX_AZS)
        } else {
            usize::from(props.max_azs)
        };

        let nat_count = usize::from(props.nat_gateways.unwrap_or(props.max_azs)).min(az_count);
        if let Some(requested) = props.nat_gateways {
            if usize::from(requested) > az_count {
                return Err(SynthError::InvalidNetwork(format!(
                    "{} NAT gateways requested but the VPC only spans {} availability zones",
                    requested, az_count
                )));
            }
        }

        let blocks = props.cidr.split(az_count * 2)?;
        let mut subnets = Vec::with_capacity(az_count * 2);
        for (offset, subnet_type) in [SubnetType::Public, SubnetType::Private].into_iter().enumerate() {
            for az_index in 0..az_count {
                subnets.push(Subnet {
                    subnet_type,
                    az_index,
                    cidr: blocks[offset * az_count + az_index],
                    path: path.child(&format!("{}Subnet{}", subnet_type, az_index + 1)),
                });
            }
        }

        let vpc_ref = VpcRef {
            stack: stack.id().to_string(),
            path: path.clone(),
            subnets: subnets.clone(),
        };
        stack.declare(Box::new(Vpc {
            path,
            props,
            az_count,
            nat_count,
            subnets,
        }))?;
        Ok(vpc_ref)
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("maxAzs".to_string(), json!(self.props.max_azs));
        attributes.insert("availabilityZones".to_string(), json!(self.az_count));
        attributes.insert("cidr".to_string(), json!(self.props.cidr.to_string()));
        attributes.insert("natGateways".to_string(), json!(self.nat_count));
        attributes
    }

    fn render_subnet(
        &self,
        ctx: &mut RenderContext<'_>,
        subnet: &Subnet,
        vpc_id: &str,
    ) -> Result<(String, String)> {
        let subnet_path = ctx.node_path(&subnet.path);
        let mut attributes = Map::new();
        attributes.insert("subnetType".to_string(), json!(subnet.subnet_type.to_string()));
        attributes.insert("cidr".to_string(), json!(subnet.cidr.to_string()));
        attributes.insert("availabilityZoneIndex".to_string(), json!(subnet.az_index));
        ctx.add_node(&subnet.path, SUBNET_FQN, attributes)?;

        let subnet_type = subnet.subnet_type.to_string();
        let subnet_id = ctx.add_resource(
            &subnet.path.child("Subnet"),
            Resource::new("AWS::EC2::Subnet")
                .property("AvailabilityZone", availability_zone(subnet.az_index))
                .property("CidrBlock", subnet.cidr.to_string())
                .property("MapPublicIpOnLaunch", subnet.subnet_type == SubnetType::Public)
                .property("VpcId", reference(vpc_id))
                .property(
                    "Tags",
                    tags(&[
                        ("Name", subnet_path.as_str()),
                        ("aws-cdk:subnet-name", subnet_type.as_str()),
                        ("aws-cdk:subnet-type", subnet_type.as_str()),
                    ]),
                ),
        )?;

        let route_table_id = ctx.add_resource(
            &subnet.path.child("RouteTable"),
            Resource::new("AWS::EC2::RouteTable")
                .property("VpcId", reference(vpc_id))
                .property("Tags", name_tag(&subnet_path)),
        )?;

        let association_id = ctx.add_resource(
            &subnet.path.child("RouteTableAssociation"),
            Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                .property("RouteTableId", reference(&route_table_id))
                .property("SubnetId", reference(&subnet_id)),
        )?;

        Ok((route_table_id, association_id))
    }
}

impl Construct for Vpc {
    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let vpc_path = ctx.node_path(&self.path);
        ctx.add_node(&self.path, VPC_FQN, self.attributes())?;

        let vpc_id = ctx.add_resource(
            &self.path.child("Resource"),
            Resource::new("AWS::EC2::VPC")
                .property("CidrBlock", self.props.cidr.to_string())
                .property("EnableDnsHostnames", true)
                .property("EnableDnsSupport", true)
                .property("InstanceTenancy", "default")
                .property("Tags", name_tag(&vpc_path)),
        )?;

        let igw_id = ctx.add_resource(
            &self.path.child("IGW"),
            Resource::new("AWS::EC2::InternetGateway").property("Tags", name_tag(&vpc_path)),
        )?;

        let attachment_id = ctx.add_resource(
            &self.path.child("VPCGW"),
            Resource::new("AWS::EC2::VPCGatewayAttachment")
                .property("InternetGatewayId", reference(&igw_id))
                .property("VpcId", reference(&vpc_id)),
        )?;

        let mut nat_gateway_ids = Vec::with_capacity(self.nat_count);
        for subnet in self.subnets.iter().filter(|s| s.subnet_type == SubnetType::Public) {
            let (route_table_id, association_id) = self.render_subnet(ctx, subnet, &vpc_id)?;
            let route_id = ctx.add_resource(
                &subnet.path.child("DefaultRoute"),
                Resource::new("AWS::EC2::Route")
                    .property("DestinationCidrBlock", ANY_IPV4)
                    .property("GatewayId", reference(&igw_id))
                    .property("RouteTableId", reference(&route_table_id))
                    .depends_on(attachment_id.clone()),
            )?;

            if subnet.az_index < self.nat_count {
                let subnet_path = ctx.node_path(&subnet.path);
                let eip_id = ctx.add_resource(
                    &subnet.path.child("EIP"),
                    Resource::new("AWS::EC2::EIP")
                        .property("Domain", "vpc")
                        .property("Tags", name_tag(&subnet_path)),
                )?;
                let nat_id = ctx.add_resource(
                    &subnet.path.child("NATGateway"),
                    Resource::new("AWS::EC2::NatGateway")
                        .property("AllocationId", get_att(&eip_id, "AllocationId"))
                        .property("SubnetId", reference(&subnet.logical_id()))
                        .property("Tags", name_tag(&subnet_path))
                        .depends_on(route_id)
                        .depends_on(association_id),
                )?;
                nat_gateway_ids.push(nat_id);
            }
        }

        for subnet in self.subnets.iter().filter(|s| s.subnet_type == SubnetType::Private) {
            let (route_table_id, _) = self.render_subnet(ctx, subnet, &vpc_id)?;
            if nat_gateway_ids.is_empty() {
                continue;
            }
            let nat_id = &nat_gateway_ids[subnet.az_index % nat_gateway_ids.len()];
            ctx.add_resource(
                &subnet.path.child("DefaultRoute"),
                Resource::new("AWS::EC2::Route")
                    .property("DestinationCidrBlock", ANY_IPV4)
                    .property("NatGatewayId", reference(nat_id))
                    .property("RouteTableId", reference(&route_table_id)),
            )?;
        }

        Ok(())
    }
}
