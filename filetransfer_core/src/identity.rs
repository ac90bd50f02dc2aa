//! Ephemeral TLS identity for one receive session.
//!
//! A fresh Ed25519 key and self-signed certificate are generated on every run
//! and only ever live in memory.

use rcgen::string::Ia5String;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ED25519, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::IpAddr;
use time::{Duration, OffsetDateTime};

use crate::error::{Result, TransferError};

/// Subject organization written into every certificate.
pub const CERT_ORGANIZATION: &str = "filetransfer";

const VALID_FOR_DAYS: i64 = 365;

pub struct SessionIdentity {
    cert: CertificateDer<'static>,
    key: PrivatePkcs8KeyDer<'static>,
    cert_pem: String,
    key_pem: String,
}

impl SessionIdentity {
    /// Generate an identity whose SANs come from the local hostname.
    pub fn generate() -> Result<Self> {
        let host = hostname::get()
            .map_err(|e| TransferError::Identity(format!("hostname lookup failed: {}", e)))?
            .into_string()
            .map_err(|_| TransferError::Identity("hostname is not valid UTF-8".to_string()))?;
        Self::for_hosts(&host)
    }

    /// Generate an identity for a comma separated host list. IP literals become
    /// IP address SANs, everything else a DNS name SAN.
    pub fn for_hosts(hosts: &str) -> Result<Self> {
        let key_pair = KeyPair::generate_for(&PKCS_ED25519)
            .map_err(|e| TransferError::Identity(format!("key generation failed: {}", e)))?;

        let mut params = CertificateParams::default();

        let mut serial: [u8; 16] = rand::random();
        // keep the DER integer positive
        serial[0] &= 0x7f;
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(VALID_FOR_DAYS);

        let mut name = DistinguishedName::new();
        name.push(DnType::OrganizationName, CERT_ORGANIZATION);
        params.distinguished_name = name;

        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.is_ca = IsCa::ExplicitNoCa;
        params.subject_alt_names = subject_alt_names(hosts)?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| TransferError::Identity(format!("certificate encoding failed: {}", e)))?;

        tracing::debug!("Generated session certificate for {:?}", hosts);

        Ok(Self {
            cert: cert.der().clone(),
            key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.cert
    }

    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key.clone_key())
    }

    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }
}

fn subject_alt_names(hosts: &str) -> Result<Vec<SanType>> {
    let mut sans = Vec::new();
    for host in hosts.split(',').map(str::trim).filter(|h| !h.is_empty()) {
        match host.parse::<IpAddr>() {
            Ok(ip) => sans.push(SanType::IpAddress(ip)),
            Err(_) => {
                let dns = Ia5String::try_from(host.to_string()).map_err(|e| {
                    TransferError::Identity(format!("invalid host name {:?}: {}", host, e))
                })?;
                sans.push(SanType::DnsName(dns));
            }
        }
    }
    Ok(sans)
}
