use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use gatehouse_common::{CertificateConfig, GatehouseError, GatehouseResult};
use gatehouse_routing::HostRouter;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Hostname pattern -> certificate.
pub type CertificateTable = HostRouter<Arc<CertifiedKey>>;

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// Load every configured certificate and bind it under each of its names.
pub fn load_certificate_table(certificates: &[CertificateConfig]) -> GatehouseResult<CertificateTable> {
    ensure_crypto_provider();

    let mut table = HostRouter::new();
    for entry in certificates {
        let key = load_certified_key(&entry.cert, &entry.key)?;
        for name in &entry.names {
            table
                .bind(name, Arc::clone(&key))
                .map_err(|e| GatehouseError::Tls(format!("certificate {}: {}", entry.cert.display(), e)))?;
        }
        info!(cert = %entry.cert.display(), names = ?entry.names, "certificate loaded");
    }
    Ok(table)
}

/// The part of `table` a listener offers. `None` offers everything.
pub fn listener_certificates<V: Clone>(
    table: &HostRouter<V>,
    server_names: Option<&[String]>,
) -> GatehouseResult<HostRouter<V>> {
    match server_names {
        Some(names) => table
            .subset(names)
            .map_err(|e| GatehouseError::Tls(format!("listener server_names: {}", e))),
        None => table
            .subset(&["*"])
            .map_err(|e| GatehouseError::Tls(format!("certificate table: {}", e))),
    }
}

fn load_certified_key(cert: &Path, key: &Path) -> GatehouseResult<Arc<CertifiedKey>> {
    let chain = load_certs(cert)?;
    if chain.is_empty() {
        return Err(GatehouseError::Tls(format!(
            "no certificates found in {}",
            cert.display()
        )));
    }
    let key = load_private_key(key)?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| GatehouseError::Tls(format!("unsupported private key: {}", e)))?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

fn load_certs(path: &Path) -> GatehouseResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| GatehouseError::Tls(format!("failed to open cert file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatehouseError::Tls(format!("failed to parse certs: {}", e)))
}

fn load_private_key(path: &Path) -> GatehouseResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| GatehouseError::Tls(format!("failed to open key file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| GatehouseError::Tls(format!("failed to parse key: {}", e)))?
        .ok_or_else(|| GatehouseError::Tls(format!("no private key found in {}", path.display())))
}

/// Picks a certificate from the client's SNI name during the handshake.
///
/// The table sits behind an `ArcSwap` so a reload can replace it without
/// touching the listener.
pub struct SniResolver {
    certificates: Arc<ArcSwap<CertificateTable>>,
}

impl SniResolver {
    pub fn new(certificates: Arc<ArcSwap<CertificateTable>>) -> Self {
        Self { certificates }
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("certificates", &self.certificates.load().len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let table = self.certificates.load();
        let found = match client_hello.server_name() {
            Some(name) => table.resolve(name),
            None => table.default_binding(),
        };
        if found.is_none() {
            debug!(sni = ?client_hello.server_name(), "no certificate for server name");
        }
        found.cloned()
    }
}

/// Build a TLS acceptor serving certificates out of `certificates`.
pub fn acceptor(certificates: Arc<ArcSwap<CertificateTable>>) -> TlsAcceptor {
    ensure_crypto_provider();

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(certificates)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    TlsAcceptor::from(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};
    use tokio_rustls::TlsConnector;

    /// Accepts whatever the server presents; the tests inspect it afterwards.
    #[derive(Debug)]
    struct AcceptAnyCert;

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }

    /// Write a fresh self-signed certificate for `san` to the temp dir and
    /// return its config entry plus the DER bytes a client should see.
    fn self_signed(tag: &str, san: &str, names: &[&str]) -> (CertificateConfig, Vec<u8>) {
        let generated = rcgen::generate_simple_self_signed(vec![san.to_string()]).unwrap();
        let dir = std::env::temp_dir();
        let stem = format!("gatehouse-tls-{}-{}", std::process::id(), tag);
        let cert = dir.join(format!("{stem}.crt"));
        let key = dir.join(format!("{stem}.key"));
        std::fs::write(&cert, generated.cert.pem()).unwrap();
        std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();

        let entry = CertificateConfig {
            names: names.iter().map(|name| name.to_string()).collect(),
            cert,
            key,
        };
        (entry, generated.cert.der().as_ref().to_vec())
    }

    /// Run one handshake over an in-memory pipe and return the leaf
    /// certificate the server presented, or `None` if the handshake failed.
    async fn presented_certificate(acceptor: &TlsAcceptor, sni: Option<&str>) -> Option<Vec<u8>> {
        let mut config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        config.enable_sni = sni.is_some();
        let connector = TlsConnector::from(Arc::new(config));
        let name = ServerName::try_from(sni.unwrap_or("unnamed.invalid").to_string()).unwrap();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client, server) = tokio::join!(
            connector.connect(name, client_io),
            acceptor.accept(server_io)
        );
        let client = client.ok()?;
        server.ok()?;

        let (_, session) = client.get_ref();
        session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|leaf| leaf.as_ref().to_vec())
    }

    #[tokio::test]
    async fn test_handshake_picks_certificate_by_sni() {
        let (exact, exact_der) = self_signed("sni-exact", "a.example.com", &["a.example.com"]);
        let (fallback, fallback_der) = self_signed("sni-default", "default.invalid", &["*"]);
        let table = load_certificate_table(&[exact, fallback]).unwrap();
        let acceptor = acceptor(Arc::new(ArcSwap::from_pointee(table)));

        let presented = presented_certificate(&acceptor, Some("a.example.com")).await;
        assert_eq!(presented.as_deref(), Some(exact_der.as_slice()));

        let presented = presented_certificate(&acceptor, Some("other.example.net")).await;
        assert_eq!(presented.as_deref(), Some(fallback_der.as_slice()));

        // No SNI at all: the `*` binding is offered.
        let presented = presented_certificate(&acceptor, None).await;
        assert_eq!(presented.as_deref(), Some(fallback_der.as_slice()));
    }

    #[tokio::test]
    async fn test_listener_subset_limits_offered_certificates() {
        let (exact, exact_der) = self_signed("scope-exact", "a.example.com", &["a.example.com"]);
        let (fallback, _) = self_signed("scope-default", "default.invalid", &["*"]);
        let table = load_certificate_table(&[exact, fallback]).unwrap();

        let names = vec!["a.example.com".to_string()];
        let scoped = listener_certificates(&table, Some(names.as_slice())).unwrap();
        let acceptor = acceptor(Arc::new(ArcSwap::from_pointee(scoped)));

        let presented = presented_certificate(&acceptor, Some("a.example.com")).await;
        assert_eq!(presented.as_deref(), Some(exact_der.as_slice()));

        // The `*` certificate was scoped away, so nothing answers these.
        assert_eq!(presented_certificate(&acceptor, Some("other.example.net")).await, None);
        assert_eq!(presented_certificate(&acceptor, None).await, None);
    }

    #[test]
    fn test_missing_files_are_tls_errors() {
        let result = load_certificate_table(&[CertificateConfig {
            names: vec!["example.com".to_string()],
            cert: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
        }]);
        assert!(matches!(result, Err(GatehouseError::Tls(_))));
    }

    #[test]
    fn test_listener_scoping() {
        let table: HostRouter<u32> = {
            let mut table = HostRouter::new();
            table.bind("*.example.com", 1).unwrap();
            table.bind("example.org", 2).unwrap();
            table
        };

        let names = vec!["*.example.com".to_string()];
        let scoped = listener_certificates(&table, Some(names.as_slice())).unwrap();
        assert_eq!(scoped.resolve("a.example.com"), Some(&1));
        assert_eq!(scoped.resolve("example.org"), None);

        let everything = listener_certificates(&table, None).unwrap();
        assert_eq!(everything.len(), 2);

        let unknown = vec!["example.net".to_string()];
        assert!(matches!(
            listener_certificates(&table, Some(unknown.as_slice())),
            Err(GatehouseError::Tls(_))
        ));
    }
}
