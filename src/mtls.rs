//! mTLS configuration for node connections
//!
//! The controller dials nodes as a TLS client presenting a certificate
//! issued by its own CA, and pins the expected server name of every
//! connection to the node ID. Nodes serve with a certificate for their node
//! ID and require client certificates from the same CA.

use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use zeroize::Zeroizing;

use crate::pki::{self, store, CertificateAuthority, NodeCertRequest};

/// File holding the CA certificate next to a node's serving credentials
pub const CA_FILE: &str = "ca.pem";

/// Controller-side mTLS credentials
#[derive(Clone)]
pub struct ClientMtlsConfig {
    /// Client certificate PEM
    pub client_cert_pem: String,
    /// Client private key PEM (zeroized on drop)
    pub client_key_pem: Zeroizing<String>,
    /// CA certificate PEM for verifying nodes
    pub ca_cert_pem: String,
}

impl std::fmt::Debug for ClientMtlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMtlsConfig").finish_non_exhaustive()
    }
}

impl ClientMtlsConfig {
    /// Create a new client mTLS config
    pub fn new(
        client_cert_pem: String,
        client_key_pem: Zeroizing<String>,
        ca_cert_pem: String,
    ) -> Self {
        Self {
            client_cert_pem,
            client_key_pem,
            ca_cert_pem,
        }
    }

    /// Issue the controller's own credentials from `ca`.
    ///
    /// A fresh key is generated and enrolled through the same CSR path
    /// nodes use.
    pub fn issue(ca: &CertificateAuthority) -> pki::Result<Self> {
        let request = NodeCertRequest::new()?;
        let cert_pem = ca.sign_csr(request.csr_der())?;
        Ok(Self::new(
            cert_pem,
            Zeroizing::new(request.private_key_pem().to_string()),
            ca.ca_cert_pem().to_string(),
        ))
    }

    /// Build a tonic ClientTlsConfig without a pinned server name
    pub fn to_tonic_config(&self) -> ClientTlsConfig {
        let identity = Identity::from_pem(&self.client_cert_pem, &*self.client_key_pem);
        let ca_cert = Certificate::from_pem(&self.ca_cert_pem);

        ClientTlsConfig::new()
            .identity(identity)
            .ca_certificate(ca_cert)
    }
}

/// Copy of `base` that only accepts a server presenting `node_id`
pub fn pin_to_node(base: &ClientTlsConfig, node_id: &str) -> ClientTlsConfig {
    base.clone().domain_name(node_id)
}

/// Node-side mTLS credentials
pub struct ServerMtlsConfig {
    /// Server certificate PEM
    pub server_cert_pem: String,
    /// Server private key PEM (zeroized on drop)
    pub server_key_pem: Zeroizing<String>,
    /// CA certificate PEM for verifying the controller
    pub ca_cert_pem: String,
}

impl ServerMtlsConfig {
    /// Create a new server mTLS config
    pub fn new(
        server_cert_pem: String,
        server_key_pem: Zeroizing<String>,
        ca_cert_pem: String,
    ) -> Self {
        Self {
            server_cert_pem,
            server_key_pem,
            ca_cert_pem,
        }
    }

    /// Issue serving credentials for `node_id` from `ca`
    pub fn issue_for_node(ca: &CertificateAuthority, node_id: &str) -> pki::Result<Self> {
        let key = rcgen::KeyPair::generate().map_err(|e| {
            pki::PkiError::KeyGenerationFailed(format!("failed to generate node key: {}", e))
        })?;
        let cert_pem = ca.new_server_certificate(&key, node_id)?;
        Ok(Self::new(
            cert_pem,
            Zeroizing::new(key.serialize_pem()),
            ca.ca_cert_pem().to_string(),
        ))
    }

    /// Write `cert.pem`, `key.pem` and `ca.pem` into `dir`.
    ///
    /// The directory is restricted to the owner and every file is written
    /// with mode 0600, the same layout as the CA directory.
    pub fn write_to(&self, dir: &Path) -> pki::Result<()> {
        store::ensure_private_dir(dir)?;
        store::write_private(&dir.join(pki::CERT_FILE), self.server_cert_pem.as_bytes())?;
        store::write_private(&dir.join(pki::KEY_FILE), self.server_key_pem.as_bytes())?;
        store::write_private(&dir.join(CA_FILE), self.ca_cert_pem.as_bytes())?;
        Ok(())
    }

    /// Build a tonic ServerTlsConfig requiring client certificates
    pub fn to_tonic_config(&self) -> ServerTlsConfig {
        let identity = Identity::from_pem(&self.server_cert_pem, &*self.server_key_pem);
        let ca_cert = Certificate::from_pem(&self.ca_cert_pem);

        ServerTlsConfig::new()
            .identity(identity)
            .client_ca_root(ca_cert)
    }
}
