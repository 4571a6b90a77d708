//! Loading of the TLS certificate chain and private key.

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Whether both PEM files exist; their contents are checked on load.
pub fn material_present(cert: &Path, key: &Path) -> bool {
    cert.exists() && key.exists()
}

pub fn load_server_config(cert: &Path, key: &Path) -> Result<Arc<ServerConfig>> {
    let pem_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| Error::Pem { path, source }
    };

    let chain = CertificateDer::pem_file_iter(cert)
        .map_err(pem_error(cert))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(pem_error(cert))?;
    if chain.is_empty() {
        return Err(Error::NoCertificates(cert.to_path_buf()));
    }
    let key_der = PrivateKeyDer::from_pem_file(key).map_err(pem_error(key))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key_der)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    log::debug!("Loaded TLS material from {} and {}", cert.display(), key.display());
    Ok(Arc::new(config))
}
