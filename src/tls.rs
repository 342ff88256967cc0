//! TLS client configuration
//!
//! Turns the resolved key and trust stores of a connection into a rustls
//! [`ClientConfig`]. Server certificates are checked against the trust store
//! certificates, or against the bundled webpki roots when the trust store holds
//! none. With self-signed trust enabled, a server presenting a single self-signed
//! certificate is also accepted, provided its own signature, validity period and
//! host name check out.

use crate::key_store::CredentialStore;
use anyhow::{anyhow, Context, Result};
use openssl::asn1::Asn1Time;
use openssl::x509::{X509Ref, X509};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::cmp::Ordering;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Build a client configuration from the effective stores of a connection
///
/// The first key entry of `key_store`, with its chain, is offered for client
/// authentication.
pub fn client_config(
    key_store: Option<&CredentialStore>,
    trust_store: Option<&CredentialStore>,
    trust_self_signed: bool,
) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = trust_anchors(trust_store)?;
    let verifier = TrustStoreVerifier::new(roots, Arc::clone(&provider), trust_self_signed)?;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("unable to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let config = match key_store.and_then(CredentialStore::first_key) {
        Some((key, chain)) => {
            if chain.is_empty() {
                return Err(anyhow!("the key store entry has no certificate chain"));
            }
            let certs = chain
                .iter()
                .map(|cert| cert.to_der().map(CertificateDer::from))
                .collect::<Result<Vec<_>, _>>()
                .context("unable to encode the client certificate chain")?;
            let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                key.private_key_to_pkcs8()
                    .context("unable to encode the client private key")?,
            ));
            builder
                .with_client_auth_cert(certs, key_der)
                .context("unable to use the key store for client authentication")?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

fn trust_anchors(trust_store: Option<&CredentialStore>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    if let Some(store) = trust_store {
        for cert in store.trusted_certificates() {
            let der = cert.to_der().context("unable to encode trusted certificate")?;
            roots
                .add(CertificateDer::from(der))
                .context("unable to add trusted certificate")?;
        }
    }

    if roots.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(roots)
}

/// Server certificate verifier backed by the trust store
#[derive(Debug)]
pub struct TrustStoreVerifier {
    anchors: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    trust_self_signed: bool,
}

impl TrustStoreVerifier {
    pub fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
        trust_self_signed: bool,
    ) -> Result<Self> {
        let anchors = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .context("unable to build the trust store verifier")?;

        Ok(Self {
            anchors,
            provider,
            trust_self_signed,
        })
    }
}

impl ServerCertVerifier for TrustStoreVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.trust_self_signed && intermediates.is_empty() {
            match verify_self_signed(end_entity, server_name, now) {
                Ok(()) => {
                    debug!("Accepted self-signed certificate for {:?}", server_name);
                    return Ok(ServerCertVerified::assertion());
                }
                Err(e) => debug!("Certificate is not an acceptable self-signed certificate: {}", e),
            }
        }

        self.anchors
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn verify_self_signed(
    end_entity: &CertificateDer<'_>,
    server_name: &ServerName<'_>,
    now: UnixTime,
) -> Result<(), rustls::Error> {
    let cert = X509::from_der(end_entity.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;

    let self_issued = cert
        .subject_name()
        .try_cmp(cert.issuer_name())
        .map(|ordering| ordering == Ordering::Equal)
        .unwrap_or(false);
    if !self_issued {
        return Err(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        ));
    }

    let signed_by_itself = cert
        .public_key()
        .and_then(|key| cert.verify(&key))
        .unwrap_or(false);
    if !signed_by_itself {
        return Err(rustls::Error::InvalidCertificate(
            CertificateError::BadSignature,
        ));
    }

    check_validity(&cert, now)?;

    if matches_server_name(&cert, server_name) {
        Ok(())
    } else {
        Err(rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName,
        ))
    }
}

fn check_validity(cert: &X509Ref, now: UnixTime) -> Result<(), rustls::Error> {
    let seconds = i64::try_from(now.as_secs())
        .map_err(|_| rustls::Error::General("current time out of range".to_string()))?;
    let now = Asn1Time::from_unix(seconds)
        .map_err(|e| rustls::Error::General(format!("unable to represent current time: {}", e)))?;

    let not_yet_valid = cert
        .not_before()
        .compare(&now)
        .map(|ordering| ordering == Ordering::Greater)
        .unwrap_or(true);
    if not_yet_valid {
        return Err(rustls::Error::InvalidCertificate(
            CertificateError::NotValidYet,
        ));
    }

    let expired = cert
        .not_after()
        .compare(&now)
        .map(|ordering| ordering == Ordering::Less)
        .unwrap_or(true);
    if expired {
        return Err(rustls::Error::InvalidCertificate(CertificateError::Expired));
    }

    Ok(())
}

fn matches_server_name(cert: &X509Ref, server_name: &ServerName<'_>) -> bool {
    let Some(names) = cert.subject_alt_names() else {
        return false;
    };

    match server_name {
        ServerName::DnsName(dns) => {
            let host = dns.as_ref();
            names
                .iter()
                .filter_map(|name| name.dnsname())
                .any(|pattern| dns_name_matches(pattern, host))
        }
        ServerName::IpAddress(ip) => {
            let octets = match IpAddr::from(*ip) {
                IpAddr::V4(v4) => v4.octets().to_vec(),
                IpAddr::V6(v6) => v6.octets().to_vec(),
            };
            names
                .iter()
                .filter_map(|name| name.ipaddress())
                .any(|candidate| candidate == octets.as_slice())
        }
        _ => false,
    }
}

/// Case-insensitive host match with single-label `*.` wildcards
fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    let host = host.trim_end_matches('.');

    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        },
        None => pattern.eq_ignore_ascii_case(host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pki::{cert_pem, key_pem, self_signed_server, TestAuthority};

    fn verifier_for(trusted: &[&X509], trust_self_signed: bool) -> TrustStoreVerifier {
        let mut store = CredentialStore::new();
        for cert in trusted {
            store.add_certificate((*cert).clone());
        }
        let roots = trust_anchors(Some(&store)).unwrap();
        TrustStoreVerifier::new(
            roots,
            Arc::new(rustls::crypto::ring::default_provider()),
            trust_self_signed,
        )
        .unwrap()
    }

    fn verify(verifier: &TrustStoreVerifier, cert: &X509, host: &str) -> Result<(), rustls::Error> {
        let der = CertificateDer::from(cert.to_der().unwrap());
        let name = ServerName::try_from(host).unwrap();
        verifier
            .verify_server_cert(&der, &[], &name, &[], UnixTime::now())
            .map(|_| ())
    }

    #[test]
    fn test_accepts_certificate_issued_by_trusted_ca() {
        let ca = TestAuthority::new("Trusted CA").unwrap();
        let (_, leaf) = ca.issue_server("localhost").unwrap();

        let verifier = verifier_for(&[&ca.cert], false);
        assert!(verify(&verifier, &leaf, "localhost").is_ok());
    }

    #[test]
    fn test_rejects_certificate_from_unrelated_ca() {
        let trusted = TestAuthority::new("Trusted CA").unwrap();
        let unrelated = TestAuthority::new("Unrelated CA").unwrap();
        let (_, leaf) = unrelated.issue_server("localhost").unwrap();

        let verifier = verifier_for(&[&trusted.cert], false);
        assert!(verify(&verifier, &leaf, "localhost").is_err());
    }

    #[test]
    fn test_self_signed_only_when_enabled() {
        let trusted = TestAuthority::new("Trusted CA").unwrap();
        let (_, self_signed) = self_signed_server("localhost").unwrap();

        let strict = verifier_for(&[&trusted.cert], false);
        assert!(verify(&strict, &self_signed, "localhost").is_err());

        let lenient = verifier_for(&[&trusted.cert], true);
        assert!(verify(&lenient, &self_signed, "localhost").is_ok());
    }

    #[test]
    fn test_self_signed_wrong_host_rejected() {
        let trusted = TestAuthority::new("Trusted CA").unwrap();
        let (_, self_signed) = self_signed_server("localhost").unwrap();

        let lenient = verifier_for(&[&trusted.cert], true);
        assert!(verify(&lenient, &self_signed, "taxii.example.com").is_err());
    }

    #[test]
    fn test_ca_issued_certificate_is_not_self_signed() {
        let ca = TestAuthority::new("Unlisted CA").unwrap();
        let (_, leaf) = ca.issue_server("localhost").unwrap();
        let der = CertificateDer::from(leaf.to_der().unwrap());
        let name = ServerName::try_from("localhost").unwrap();

        assert!(verify_self_signed(&der, &name, UnixTime::now()).is_err());
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(dns_name_matches("*.example.com", "taxii.example.com"));
        assert!(dns_name_matches("TAXII.example.com", "taxii.example.com"));
        assert!(!dns_name_matches("*.example.com", "example.com"));
        assert!(!dns_name_matches("*.example.com", "a.b.example.com"));
    }

    #[test]
    fn test_client_config_with_key_store() {
        let ca = TestAuthority::new("Client CA").unwrap();
        let (key, leaf) = ca.issue_server("client.local").unwrap();
        let key_store =
            CredentialStore::from_pem_key(&key_pem(&key), Some(&[cert_pem(&leaf), cert_pem(&ca.cert)]))
                .unwrap();
        let trust_store = CredentialStore::from_trusted_pems(&[cert_pem(&ca.cert)]).unwrap();

        let config = client_config(Some(&key_store), Some(&trust_store), true).unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_client_config_without_stores() {
        let config = client_config(None, None, false).unwrap();
        assert!(!config.client_auth_cert_resolver.has_certs());
    }
}
