//! Mutual-TLS setup for the agent's RPC/HTTP listener (§6): client
//! certificates are required, TLS 1.2 is the floor, and the cipher
//! suite list is `rustls`'s own modern-profile default. Grounded in the
//! `tokio_rustls::TlsAcceptor::from(Arc<rustls::ServerConfig>)` pattern
//! used across the example pack's TLS transports.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{Certificate, PrivateKey, RootCertStore};

use nimbus_health::HealthError;

fn load_certs(path: &Path) -> Result<Vec<Certificate>, HealthError> {
    let file = File::open(path)
        .map_err(|err| HealthError::BadParameter(format!("cannot open {}: {err}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|err| HealthError::BadParameter(format!("invalid cert pem {}: {err}", path.display())))?;
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey, HealthError> {
    let file = File::open(path)
        .map_err(|err| HealthError::BadParameter(format!("cannot open {}: {err}", path.display())))?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(file))
        .map_err(|err| HealthError::BadParameter(format!("invalid key pem {}: {err}", path.display())))?;
    let key = keys
        .pop()
        .ok_or_else(|| HealthError::BadParameter(format!("no private key in {}", path.display())))?;
    Ok(PrivateKey(key))
}

/// Builds the server-side TLS configuration: the listener's own
/// certificate/key, plus a client-cert store built from `ca_cert` so
/// only holders of a certificate signed by that CA can connect.
pub fn build_server_config(
    ca_cert: &Path,
    cert: &Path,
    key: &Path,
) -> Result<Arc<rustls::ServerConfig>, HealthError> {
    let mut roots = RootCertStore::empty();
    for ca in load_certs(ca_cert)? {
        roots
            .add(&ca)
            .map_err(|err| HealthError::BadParameter(format!("invalid CA cert: {err}")))?;
    }
    let client_verifier = AllowAnyAuthenticatedClient::new(roots);

    let certs = load_certs(cert)?;
    let private_key = load_key(key)?;

    let config = rustls::ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .expect("TLS 1.2/1.3 are always supported protocol versions")
        .with_client_cert_verifier(Arc::new(client_verifier))
        .with_single_cert(certs, private_key)
        .map_err(|err| HealthError::BadParameter(format!("invalid server certificate: {err}")))?;

    Ok(Arc::new(config))
}
