//! edgectl - controller for a fleet of edge nodes
//!
//! The controller deploys applications and VNFs to edge nodes, drives their
//! lifecycle and pushes traffic policies and DNS settings to them. Units run
//! either directly on the node agent or as Kubernetes Deployments, chosen
//! once per process by the orchestration mode.
//!
//! # Architecture
//!
//! - Every node exposes two gRPC surfaces: EVA (deployment and lifecycle)
//!   and ELA (traffic policy, interfaces, DNS)
//! - Nodes register a gRPC target; the controller reverse-dials it over
//!   mTLS, with the server name pinned to the node ID
//! - The controller runs its own root CA and signs node CSRs
//!
//! # Modules
//!
//! - [`pki`] - Root CA, CSR signing and node identities
//! - [`mtls`] - Client and server TLS configuration from the CA
//! - [`broker`] - Node lookup and connection to a node's surfaces
//! - [`orchestrator`] - Unit lifecycle and policy operations per mode
//! - [`policy`] - Traffic policy translation (node wire format, NetworkPolicy)
//! - [`model`] - Entities and their validation
//! - [`lifecycle`] - Lifecycle status and command vocabulary
//! - [`inventory`] - File-backed node directory and entity store
//! - [`config`] - Controller settings
//! - [`proto`] - gRPC definitions for EVA and ELA
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod broker;
pub mod config;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod model;
pub mod mtls;
pub mod orchestrator;
pub mod pki;
pub mod policy;
pub mod proto;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default port of a node's ELA surface
pub const DEFAULT_ELA_PORT: u16 = 42101;

/// Default port of a node's EVA surface
pub const DEFAULT_EVA_PORT: u16 = 42102;

/// Upper bound on the cores a unit may request
pub const MAX_CORES: u32 = 8;

/// Upper bound on the memory a unit may request, in MB
pub const MAX_MEMORY: u32 = 16384;
