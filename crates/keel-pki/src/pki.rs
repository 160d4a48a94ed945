//! Certificate generation and signing
//!
//! Roots are self-signed and valid ten times as long as the leaves they
//! sign. A leaf inherits its `notBefore` from its root so the whole
//! tree's validity window is anchored to root issuance time.

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::HashSet;
use std::net::IpAddr;
use thiserror::Error;
use x509_parser::prelude::*;

/// Validity period for leaf certificates (1 year)
pub const LEAF_VALIDITY_DAYS: i64 = 365;

/// Validity period for root CA certificates (10x the leaf window)
pub const ROOT_VALIDITY_DAYS: i64 = LEAF_VALIDITY_DAYS * 10;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate or key parsing error
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

impl From<PkiError> for keel_common::Error {
    fn from(err: PkiError) -> Self {
        keel_common::Error::pki(err.to_string())
    }
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Validate that a persisted cert/key pair is usable: the certificate
/// parses as X.509 and the key parses as a signing key.
pub fn validate_keypair(cert_pem: &str, key_pem: &str) -> Result<()> {
    let der = parse_pem(cert_pem)?;
    X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    KeyPair::from_pem(key_pem)
        .map_err(|e| PkiError::ParseError(format!("failed to parse key: {}", e)))?;
    Ok(())
}

/// Extended key usages a leaf certificate can request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyUsage {
    /// TLS server authentication
    ServerAuth,
    /// TLS client authentication
    ClientAuth,
}

impl From<KeyUsage> for ExtendedKeyUsagePurpose {
    fn from(usage: KeyUsage) -> Self {
        match usage {
            KeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
            KeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        }
    }
}

/// Parameters for one leaf certificate
#[derive(Clone, Debug, Default)]
pub struct LeafConfig {
    /// Subject common name; required
    pub common_name: String,
    /// Subject organization (e.g. "system:masters")
    pub organization: Option<String>,
    /// Extended key usages
    pub usages: Vec<KeyUsage>,
    /// DNS subject-alt-names; duplicates are removed before signing
    pub dns_names: Vec<String>,
    /// IP subject-alt-names; duplicates are removed before signing
    pub ip_addresses: Vec<IpAddr>,
}

/// A root certificate authority that signs leaf certificates
#[derive(Clone)]
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (deserialized per signing operation,
    /// KeyPair is not Clone)
    key_pem: String,
    /// PEM-encoded CA certificate
    cert_pem: String,
}

impl CertificateAuthority {
    /// Create a new self-signed root CA with the given common name
    pub fn new(common_name: &str) -> Result<Self> {
        if common_name.is_empty() {
            return Err(PkiError::CertificateGenerationFailed(
                "commonName is missing".to_string(),
            ));
        }
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ::time::Duration::days(ROOT_VALIDITY_DAYS);

        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e)))?;
        let key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            key_pem,
            cert_pem: cert.pem(),
        })
    }

    /// Load a CA from persisted PEM material, validating both halves
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        validate_keypair(cert_pem, key_pem)?;
        Ok(Self {
            key_pem: key_pem.to_string(),
            cert_pem: cert_pem.to_string(),
        })
    }

    /// The CA certificate in PEM format
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// The CA private key in PEM format
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// The CA certificate's notBefore as a unix timestamp
    pub fn not_before(&self) -> Result<i64> {
        let der = parse_pem(&self.cert_pem)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;
        Ok(cert.validity().not_before.timestamp())
    }

    /// Generate a key pair and signed certificate for the given leaf.
    ///
    /// Returns (certificate PEM, key PEM).
    pub fn issue(&self, config: &LeafConfig) -> Result<(String, String)> {
        if config.common_name.is_empty() {
            return Err(PkiError::CertificateGenerationFailed(
                "commonName is missing".to_string(),
            ));
        }
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(config.common_name.clone()),
        );
        if let Some(org) = &config.organization {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
        }
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = config.usages.iter().map(|u| (*u).into()).collect();

        // Anchor the leaf's window to root issuance time
        let root_not_before = ::time::OffsetDateTime::from_unix_timestamp(self.not_before()?)
            .map_err(|e| PkiError::ParseError(format!("invalid CA notBefore: {}", e)))?;
        params.not_before = root_not_before;
        params.not_after =
            ::time::OffsetDateTime::now_utc() + ::time::Duration::days(LEAF_VALIDITY_DAYS);

        params.subject_alt_names = dedup_sans(config)?;

        let leaf_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate leaf key: {}", e))
        })?;
        let leaf_key_pem = leaf_key.serialize_pem();

        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign leaf cert: {}", e))
        })?;

        Ok((cert.pem(), leaf_key_pem))
    }
}

/// Build the SAN list, dropping duplicate DNS names and IPs while keeping
/// first-occurrence order.
fn dedup_sans(config: &LeafConfig) -> Result<Vec<SanType>> {
    let mut sans = Vec::new();
    let mut seen_dns = HashSet::new();
    for dns in &config.dns_names {
        if !seen_dns.insert(dns.clone()) {
            continue;
        }
        let name = Ia5String::try_from(dns.clone()).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("invalid DNS name '{}': {}", dns, e))
        })?;
        sans.push(SanType::DnsName(name));
    }
    let mut seen_ips = HashSet::new();
    for ip in &config.ip_addresses {
        if seen_ips.insert(*ip) {
            sans.push(SanType::IpAddress(*ip));
        }
    }
    Ok(sans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_leaf() -> LeafConfig {
        LeafConfig {
            common_name: "kube-apiserver".to_string(),
            organization: None,
            usages: vec![KeyUsage::ServerAuth],
            dns_names: vec!["localhost".to_string(), "kubernetes".to_string()],
            ip_addresses: vec!["127.0.0.1".parse().unwrap()],
        }
    }

    #[test]
    fn root_ca_can_be_created_and_reloaded() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        assert!(ca.cert_pem().contains("BEGIN CERTIFICATE"));

        let reloaded = CertificateAuthority::from_pem(ca.cert_pem(), ca.key_pem())
            .expect("CA reload should succeed");
        assert_eq!(reloaded.cert_pem(), ca.cert_pem());
    }

    #[test]
    fn corrupt_material_is_rejected() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        assert!(CertificateAuthority::from_pem("garbage", ca.key_pem()).is_err());
        assert!(CertificateAuthority::from_pem(ca.cert_pem(), "garbage").is_err());
    }

    #[test]
    fn empty_common_name_is_rejected() {
        assert!(CertificateAuthority::new("").is_err());
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        assert!(ca.issue(&LeafConfig::default()).is_err());
    }

    #[test]
    fn leaf_is_signed_by_root() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        let (cert_pem, key_pem) = ca.issue(&server_leaf()).expect("issuance should succeed");

        validate_keypair(&cert_pem, &key_pem).expect("issued pair should validate");

        let leaf_der = parse_pem(&cert_pem).unwrap();
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        let ca_der = parse_pem(ca.cert_pem()).unwrap();
        let (_, root) = X509Certificate::from_der(&ca_der).unwrap();
        leaf.verify_signature(Some(root.public_key()))
            .expect("leaf should verify against root");
    }

    #[test]
    fn leaf_not_before_is_anchored_to_root() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        let (cert_pem, _) = ca.issue(&server_leaf()).expect("issuance should succeed");

        let leaf_der = parse_pem(&cert_pem).unwrap();
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        assert_eq!(
            leaf.validity().not_before.timestamp(),
            ca.not_before().unwrap()
        );
    }

    #[test]
    fn root_window_is_ten_times_leaf_window() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        let ca_der = parse_pem(ca.cert_pem()).unwrap();
        let (_, root) = X509Certificate::from_der(&ca_der).unwrap();
        let days =
            (root.validity().not_after.timestamp() - root.validity().not_before.timestamp())
                / (24 * 60 * 60);
        assert_eq!(days, ROOT_VALIDITY_DAYS);
    }

    #[test]
    fn duplicate_sans_are_removed() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        let config = LeafConfig {
            common_name: "kube-apiserver".to_string(),
            organization: None,
            usages: vec![KeyUsage::ServerAuth],
            dns_names: vec![
                "localhost".to_string(),
                "localhost".to_string(),
                "kubernetes".to_string(),
            ],
            ip_addresses: vec!["127.0.0.1".parse().unwrap(), "127.0.0.1".parse().unwrap()],
        };
        let (cert_pem, _) = ca.issue(&config).expect("issuance should succeed");

        let der = parse_pem(&cert_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let san = cert
            .subject_alternative_name()
            .expect("SAN extension should parse")
            .expect("SAN extension should be present");
        assert_eq!(san.value.general_names.len(), 3);
    }

    #[test]
    fn organization_is_carried_into_subject() {
        let ca = CertificateAuthority::new("kubernetes").expect("CA creation should succeed");
        let config = LeafConfig {
            common_name: "kubernetes-admin".to_string(),
            organization: Some("system:masters".to_string()),
            usages: vec![KeyUsage::ClientAuth],
            ..Default::default()
        };
        let (cert_pem, _) = ca.issue(&config).expect("issuance should succeed");

        let der = parse_pem(&cert_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let org = cert
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap_or("");
        assert_eq!(org, "system:masters");
    }
}
