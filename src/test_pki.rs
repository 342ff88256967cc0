//! Throwaway PKI material for unit tests
//!
//! Builds RSA-2048 certificate authorities and TLS server certificates with the
//! extensions webpki insists on (CA basic constraints, keyCertSign, serverAuth, SAN).

use anyhow::{anyhow, Result};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Builder, X509Name, X509};

const X509_VERSION_3: i32 = 2;
const TEST_RSA_KEY_SIZE: u32 = 2048;
const TEST_VALIDITY_DAYS: u32 = 30;

/// A self-signed certificate authority able to issue server certificates
pub(crate) struct TestAuthority {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestAuthority {
    pub fn new(common_name: &str) -> Result<Self> {
        let key = generate_key()?;
        let name = subject(common_name)?;

        let mut builder = base_builder(&key, &name)?;
        builder.set_issuer_name(&name)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()?,
        )?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok(Self {
            key,
            cert: builder.build(),
        })
    }

    /// Issue a TLS server certificate for `host`, signed by this authority
    pub fn issue_server(&self, host: &str) -> Result<(PKey<Private>, X509)> {
        let key = generate_key()?;
        let cert = server_certificate(&key, host, Some((&self.key, &self.cert)))?;
        Ok((key, cert))
    }
}

/// A self-signed TLS server certificate for `host`
pub(crate) fn self_signed_server(host: &str) -> Result<(PKey<Private>, X509)> {
    let key = generate_key()?;
    let cert = server_certificate(&key, host, None)?;
    Ok((key, cert))
}

pub(crate) fn key_pem(key: &PKey<Private>) -> String {
    String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap()
}

pub(crate) fn cert_pem(cert: &X509) -> String {
    String::from_utf8(cert.to_pem().unwrap()).unwrap()
}

fn server_certificate(
    key: &PKey<Private>,
    host: &str,
    issuer: Option<(&PKey<Private>, &X509)>,
) -> Result<X509> {
    let name = subject(host)?;
    let mut builder = base_builder(key, &name)?;

    match issuer {
        Some((_, issuer_cert)) => builder.set_issuer_name(issuer_cert.subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }

    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

    let san = SubjectAlternativeName::new()
        .dns(host)
        .build(&builder.x509v3_context(issuer.map(|(_, cert)| &**cert), None))?;
    builder.append_extension(san)?;

    let signing_key = issuer.map(|(issuer_key, _)| issuer_key).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256())?;

    Ok(builder.build())
}

fn base_builder(key: &PKey<Private>, name: &X509Name) -> Result<X509Builder> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial: Asn1Integer = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    builder.set_subject_name(name)?;
    let not_before: Asn1Time = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after: Asn1Time = Asn1Time::days_from_now(TEST_VALIDITY_DAYS)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(key)?;

    Ok(builder)
}

fn subject(common_name: &str) -> Result<X509Name> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .map_err(|e| anyhow!("Failed to set CN: {}", e))?;
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "TAXII Client Tests")?;
    Ok(name.build())
}

fn generate_key() -> Result<PKey<Private>> {
    let rsa = Rsa::generate(TEST_RSA_KEY_SIZE)
        .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
    PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
}
