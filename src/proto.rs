//! gRPC protocol definitions for the two node surfaces
//!
//! Every edge node exposes two gRPC surfaces on separate ports:
//!
//! - **EVA** (Edge Virtualization Agent): deployment and lifecycle of
//!   applications and VNFs
//! - **ELA** (Edge Local Agent): traffic policies, network interfaces, DNS
//!   and zones
//!
//! # Example
//!
//! ```ignore
//! use edgectl::proto::eva::application_deployment_service_client::ApplicationDeploymentServiceClient;
//!
//! let mut client = ApplicationDeploymentServiceClient::new(channel);
//! let status = client
//!     .get_status(ApplicationId { id: app_id.into() })
//!     .await?
//!     .into_inner();
//! ```

#![allow(missing_docs)] // Generated code doesn't have docs
#![allow(clippy::doc_overindented_list_items)] // Generated proto docs have formatting issues

/// Edge Virtualization Agent surface
pub mod eva {
    tonic::include_proto!("eva");
}

/// Edge Local Agent surface
pub mod ela {
    tonic::include_proto!("ela");
}
