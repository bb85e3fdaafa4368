use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig as RustlsConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config::ServerConfig;

/// TLS is on when both `COURTSIDE_TLS_CERT` and `COURTSIDE_TLS_KEY` are set.
pub fn acceptor_for(config: &ServerConfig) -> io::Result<Option<TlsAcceptor>> {
    match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => Ok(None),
        (Some(cert), Some(key)) => load_tls_acceptor(Path::new(cert), Path::new(key)).map(Some),
        _ => Err(io::Error::new(
            ErrorKind::InvalidInput,
            "COURTSIDE_TLS_CERT and COURTSIDE_TLS_KEY must be set together",
        )),
    }
}

/// PEM certificate chain plus private key.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates in {}", cert_path.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("no private key in {}", key_path.display()),
        )
    })?;

    let mut tls = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    tls.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_paths() {
        assert!(acceptor_for(&ServerConfig::default()).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_an_error() {
        let config = ServerConfig {
            tls_cert: Some("/etc/courtside/cert.pem".into()),
            ..ServerConfig::default()
        };
        let err = acceptor_for(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_cert_file() {
        let err = load_tls_acceptor(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
