use std::sync::Arc;

use log::debug;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::crypto::constant_time_eq;
use crate::{Error, Result};

pub const COMMON_NAME: &str = "LocalSend CLI";
const KEY_BITS: usize = 2048;

/// Ephemeral per-session TLS identity: a fresh RSA key pair and a
/// self-signed certificate that lives at most one day and is never persisted.
/// Peers pin the SHA-256 of the certificate's DER encoding instead of
/// trusting any CA.
pub struct Identity {
    certificate_der: Vec<u8>,
    certificate_pem: String,
    private_key_der: Vec<u8>,
    private_key_pem: String,
    fingerprint: String,
}

impl Identity {
    pub fn generate() -> Result<Self> {
        debug!("Generating {} bit RSA key pair", KEY_BITS);
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(|e| Error::Tls(format!("RSA key generation failed: {}", e)))?;
        let key_doc = key
            .to_pkcs8_der()
            .map_err(|e| Error::Tls(format!("key encoding failed: {}", e)))?;
        let private_key_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Tls(format!("key encoding failed: {}", e)))?
            .to_string();
        let private_key_der = key_doc.as_bytes().to_vec();

        let pkcs8 = PrivatePkcs8KeyDer::from(private_key_der.clone());
        let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(&pkcs8, &PKCS_RSA_SHA256)
            .map_err(|e| Error::Tls(format!("signing key rejected: {}", e)))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| Error::Tls(format!("certificate params: {}", e)))?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, COMMON_NAME);
        // Backdate slightly to tolerate clock skew; total validity stays one day.
        let not_before = time::OffsetDateTime::now_utc() - time::Duration::minutes(5);
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::days(1);

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Tls(format!("self-signing failed: {}", e)))?;
        let certificate_der = cert.der().as_ref().to_vec();
        let certificate_pem = cert.pem();
        let fingerprint = fingerprint_from_der(&certificate_der);
        debug!("Session certificate fingerprint: {}", fingerprint);

        Ok(Self {
            certificate_der,
            certificate_pem,
            private_key_der,
            private_key_pem,
            fingerprint,
        })
    }

    /// Lowercase hex SHA-256 of the certificate DER.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// TLS acceptor configuration presenting this identity's certificate.
    pub fn server_tls_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let cert = CertificateDer::from(self.certificate_der.clone());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.private_key_der.clone()));
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("TLS config: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .map_err(|e| Error::Tls(format!("TLS config: {}", e)))?;
        Ok(Arc::new(config))
    }
}

pub fn fingerprint_from_der(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Client TLS configuration that accepts exactly one certificate: the one
/// whose SHA-256 DER digest matches `expected_fingerprint`. Everything else,
/// CA-signed chains included, fails the handshake before a single HTTP byte
/// is exchanged.
pub fn pinned_client_config(expected_fingerprint: &str) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = FingerprintVerifier::new(expected_fingerprint, provider.clone())?;
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("TLS config: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

#[derive(Debug)]
pub struct FingerprintVerifier {
    expected: Vec<u8>,
    provider: Arc<CryptoProvider>,
}

impl FingerprintVerifier {
    pub fn new(expected_hex: &str, provider: Arc<CryptoProvider>) -> Result<Self> {
        let expected = hex::decode(expected_hex)
            .map_err(|_| Error::Tls("peer fingerprint is not valid hex".to_string()))?;
        if expected.len() != 32 {
            return Err(Error::Tls("peer fingerprint must be SHA-256 sized".to_string()));
        }
        Ok(Self { expected, provider })
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // A pinned peer presents exactly its self-signed certificate.
        if !intermediates.is_empty() {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer,
            ));
        }
        let actual = Sha256::digest(end_entity.as_ref());
        if constant_time_eq(&actual, &self.expected) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
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

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_pin(expected_hex: &str, der: Vec<u8>) -> bool {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = FingerprintVerifier::new(expected_hex, provider).unwrap();
        let cert = CertificateDer::from(der);
        let name = ServerName::try_from("localhost").unwrap();
        verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok()
    }

    #[test]
    fn test_identity_shape() {
        let identity = Identity::generate().unwrap();
        assert_eq!(identity.fingerprint().len(), 64);
        assert!(identity
            .fingerprint()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(identity.certificate_pem().contains("BEGIN CERTIFICATE"));
        assert!(identity.private_key_pem().contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_fingerprint_matches_der_digest() {
        let identity = Identity::generate().unwrap();
        assert_eq!(
            identity.fingerprint(),
            fingerprint_from_der(&identity.certificate_der)
        );
    }

    #[test]
    fn test_pin_accepts_expected_certificate() {
        let identity = Identity::generate().unwrap();
        assert!(verify_pin(
            identity.fingerprint(),
            identity.certificate_der.clone()
        ));
    }

    #[test]
    fn test_pin_rejects_substituted_certificate() {
        let ours = Identity::generate().unwrap();
        let theirs = Identity::generate().unwrap();
        assert!(!verify_pin(
            ours.fingerprint(),
            theirs.certificate_der.clone()
        ));
    }

    #[test]
    fn test_pin_rejects_malformed_fingerprint() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        assert!(FingerprintVerifier::new("zz", provider.clone()).is_err());
        assert!(FingerprintVerifier::new("abcd", provider).is_err());
    }
}
