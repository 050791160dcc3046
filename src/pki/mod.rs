//! PKI operations for node mTLS
//!
//! The controller runs a self-managed root CA whose key and certificate live
//! in a directory on disk. Nodes generate their own key pairs and send only
//! a CSR; the controller never sees a node private key.
//!
//! # Identity
//!
//! A node certificate's Common Name is derived from the CSR's public key:
//! the base64url (unpadded) MD5 digest of the DER SubjectPublicKeyInfo.
//! Whatever subject the CSR asked for is discarded, so a node cannot choose
//! its own identity and the same key always yields the same identity.
//!
//! # Validity
//!
//! The root is valid for three years. Every certificate the CA issues
//! expires together with the root.

mod shared;
pub(crate) mod store;

pub use shared::SharedAuthority;

use std::net::IpAddr;
use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use md5::{Digest, Md5};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use thiserror::Error;
use ::time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// File holding the CA private key (PKCS#8 PEM, mode 0600)
pub const KEY_FILE: &str = "key.pem";

/// File holding the CA certificate (PEM, mode 0600)
pub const CERT_FILE: &str = "cert.pem";

/// Organization written into the root certificate
pub const ROOT_ORGANIZATION: &str = "Edge Controller Authority";

/// Root certificate lifetime
const ROOT_VALIDITY: Duration = Duration::days(3 * 365);

/// Backdating applied to the root to absorb clock skew between peers
const CLOCK_SKEW: Duration = Duration::seconds(15);

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// CA not initialized
    #[error("CA not initialized")]
    CaNotInitialized,

    /// Invalid CSR
    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Common Name the CA assigns to the holder of `spki_der`
pub fn common_name_for_public_key(spki_der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Md5::digest(spki_der))
}

/// Common Name of a PEM certificate, if it has one
pub fn certificate_common_name(cert_pem: &str) -> Result<Option<String>> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    Ok(common_name(&cert))
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    // Keep the DER INTEGER positive
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes.to_vec())
}

/// Root CA backed by a directory on disk
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone)
    key_pem: Zeroizing<String>,
    /// PEM-encoded CA certificate for distribution
    cert_pem: String,
    /// Root expiry, shared by every issued certificate
    not_after: OffsetDateTime,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load the CA from `dir`, creating whatever is missing.
    ///
    /// An existing, readable key is never replaced. A certificate that is
    /// missing, unreadable or does not belong to the key is regenerated from
    /// the key, so repeated calls on a healthy directory change nothing.
    pub fn init(dir: &Path) -> Result<Self> {
        store::ensure_private_dir(dir)?;
        let key_path = dir.join(KEY_FILE);
        let cert_path = dir.join(CERT_FILE);

        let key = match store::load_key(&key_path)? {
            Some(key) => key,
            None => {
                let key = KeyPair::generate().map_err(|e| {
                    PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
                })?;
                store::store_key(&key_path, &key)?;
                info!(path = %key_path.display(), "Generated CA key");
                key
            }
        };

        let cert_pem = match store::load_certificate(&cert_path)? {
            Some(pem) if certificate_matches_key(&pem, &key) => pem,
            existing => {
                if existing.is_some() {
                    warn!(
                        path = %cert_path.display(),
                        "CA certificate does not match CA key, regenerating"
                    );
                    std::fs::remove_file(&cert_path)?;
                }
                let pem = generate_root(&key)?;
                store::store_certificate(&cert_path, &pem)?;
                info!(path = %cert_path.display(), "Generated CA certificate");
                pem
            }
        };

        Self::from_pem(&cert_pem, &key.serialize_pem())
    }

    /// Build a CA from an already loaded certificate and key
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        if !certificate_matches_key(cert_pem, &key) {
            return Err(PkiError::ParseError(
                "CA certificate does not match CA key".to_string(),
            ));
        }

        let der = parse_pem(cert_pem)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;
        let not_after = cert.validity().not_after.to_datetime();

        Ok(Self {
            key_pem: Zeroizing::new(key_pem.to_string()),
            cert_pem: cert_pem.to_string(),
            not_after,
        })
    }

    /// Get the CA certificate in PEM format (for distribution to nodes)
    pub fn ca_cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Certificates a peer needs to validate what this CA issues, root last
    pub fn ca_chain(&self) -> Vec<String> {
        vec![self.cert_pem.clone()]
    }

    /// Expiry of the root and of every certificate it issues
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }

    /// Sign a DER-encoded CSR and return the certificate in PEM format.
    ///
    /// The subject requested in the CSR is ignored; the Common Name is
    /// derived from the CSR's public key (see the module docs).
    pub fn sign_csr(&self, csr_der: &[u8]) -> Result<String> {
        let (_, csr) = X509CertificationRequest::from_der(csr_der)
            .map_err(|e| PkiError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;
        csr.verify_signature()
            .map_err(|e| PkiError::InvalidCsr(format!("bad CSR signature: {}", e)))?;
        let cn = common_name_for_public_key(csr.certification_request_info.subject_pki.raw);

        let csr_pem = ::pem::encode(&::pem::Pem::new("CERTIFICATE REQUEST", csr_der.to_vec()));
        let mut csr_params = CertificateSigningRequestParams::from_pem(&csr_pem)
            .map_err(|e| PkiError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(cn));
        csr_params.params.distinguished_name = dn;
        csr_params.params.subject_alt_names = Vec::new();
        csr_params.params.is_ca = IsCa::NoCa;
        csr_params.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr_params.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        csr_params.params.serial_number = Some(random_serial());
        csr_params.params.not_before = OffsetDateTime::now_utc();
        csr_params.params.not_after = self.not_after;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;
        let signed_cert = csr_params.signed_by(&issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign certificate: {}", e))
        })?;

        Ok(signed_cert.pem())
    }

    /// Issue a server-auth certificate for `key` with Common Name `sni`
    pub fn new_server_certificate(&self, key: &KeyPair, sni: &str) -> Result<String> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(sni.to_string()));
        params.distinguished_name = dn;

        if let Ok(ip) = sni.parse::<IpAddr>() {
            params.subject_alt_names = vec![SanType::IpAddress(ip)];
        } else if let Ok(name) = Ia5String::try_from(sni.to_string()) {
            params.subject_alt_names = vec![SanType::DnsName(name)];
        }

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(random_serial());
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = self.not_after;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;
        let cert = params.signed_by(key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign server cert: {}", e))
        })?;

        Ok(cert.pem())
    }
}

fn generate_root(key: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ROOT_ORGANIZATION.to_string()),
    );
    params.distinguished_name = dn;

    // Signs leaves only, never intermediates
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.serial_number = Some(random_serial());

    let now = OffsetDateTime::now_utc();
    params.not_before = now - CLOCK_SKEW;
    params.not_after = now + ROOT_VALIDITY;

    let cert = params.self_signed(key).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
    })?;

    Ok(cert.pem())
}

/// True when `cert_pem` parses and carries the public half of `key`
fn certificate_matches_key(cert_pem: &str, key: &KeyPair) -> bool {
    let Ok(der) = parse_pem(cert_pem) else {
        return false;
    };
    match X509Certificate::from_der(&der) {
        Ok((_, cert)) => cert.public_key().subject_public_key.data.as_ref() == key.public_key_raw(),
        Err(_) => false,
    }
}

/// Key pair and CSR generated on the node side
pub struct NodeCertRequest {
    /// The generated key pair PEM (kept private)
    key_pem: Zeroizing<String>,
    /// CSR in DER format (sent to the controller)
    csr_der: Vec<u8>,
}

impl NodeCertRequest {
    /// Generate a new key pair and a CSR for it
    pub fn new() -> Result<Self> {
        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate node key: {}", e))
        })?;
        Self::for_key(&key_pair)
    }

    /// Build a CSR for an existing PEM key
    pub fn from_key_pem(key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse node key: {}", e)))?;
        Self::for_key(&key_pair)
    }

    fn for_key(key_pair: &KeyPair) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();

        let csr = params.serialize_request(key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CSR: {}", e))
        })?;

        Ok(Self {
            key_pem: Zeroizing::new(key_pair.serialize_pem()),
            csr_der: csr.der().as_ref().to_vec(),
        })
    }

    /// Get the CSR in DER format (to send to the controller)
    pub fn csr_der(&self) -> &[u8] {
        &self.csr_der
    }

    /// Get the private key in PEM format (to store locally)
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }
}

/// Verification result for a presented certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    /// Common Name extracted from the certificate
    pub common_name: String,
    /// Whether the certificate is valid
    pub valid: bool,
    /// Reason if invalid
    pub reason: Option<String>,
}

impl VerificationResult {
    fn rejected(reason: &str) -> Self {
        Self {
            common_name: String::new(),
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Verify a certificate was signed by our CA and is within its validity window
pub fn verify_certificate(cert_der: &[u8], ca_cert_pem: &str) -> Result<VerificationResult> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    let ca_cert_der = parse_pem(ca_cert_pem)?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    if cert.verify_signature(Some(ca_cert.public_key())).is_err() {
        return Ok(VerificationResult::rejected("signature verification failed"));
    }

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if now < cert.validity().not_before.timestamp() {
        return Ok(VerificationResult::rejected("certificate not yet valid"));
    }
    if now > cert.validity().not_after.timestamp() {
        return Ok(VerificationResult::rejected("certificate expired"));
    }

    match common_name(&cert) {
        Some(cn) if !cn.is_empty() => Ok(VerificationResult {
            common_name: cn,
            valid: true,
            reason: None,
        }),
        _ => Ok(VerificationResult::rejected("certificate has no common name")),
    }
}
