use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {0}")]
    Parse(PathBuf),
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Checks that the certificate chain and private key parse before the server
/// commits to TLS. warp reads the files again itself when it binds.
///
/// # Errors
///
/// Returns a [`TlsError`] naming the file that could not be opened or parsed.
pub fn load_tls_paths(cert: &Path, key: &Path) -> Result<TlsPaths, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(cert)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TlsError::Parse(cert.to_path_buf()))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(cert.to_path_buf()));
    }

    rustls_pemfile::private_key(&mut open(key)?)
        .map_err(|_| TlsError::Parse(key.to_path_buf()))?
        .ok_or_else(|| TlsError::NoPrivateKey(key.to_path_buf()))?;

    Ok(TlsPaths {
        cert: cert.to_path_buf(),
        key: key.to_path_buf(),
    })
}
