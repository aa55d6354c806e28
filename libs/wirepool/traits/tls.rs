//! TLS provider boundary
//!
//! The runtime never touches certificates itself: it hands a connected
//! `TcpStream` to a provider and gets back an encrypted byte stream.

use crate::core::config::TlsConfig;
use crate::core::stream::BoxedStream;
use crate::traits::error::Result;
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Wraps a connected socket in TLS
#[async_trait]
pub trait TlsProvider: Send + Sync {
    /// Run the TLS handshake for `server_name` over `stream`
    async fn connect(&self, stream: TcpStream, server_name: &str) -> Result<BoxedStream>;
}

#[cfg(feature = "native-tls")]
pub use native::NativeTlsProvider;

#[cfg(feature = "native-tls")]
mod native {
    use super::*;
    use crate::traits::error::WirePoolError;
    use native_tls::{Certificate, Identity};

    /// [`TlsProvider`] backed by the platform TLS library
    pub struct NativeTlsProvider {
        connector: tokio_native_tls::TlsConnector,
    }

    impl NativeTlsProvider {
        pub fn new(config: &TlsConfig) -> Result<Self> {
            let mut builder = native_tls::TlsConnector::builder();
            builder.danger_accept_invalid_certs(!config.verify_peer);
            builder.danger_accept_invalid_hostnames(!config.verify_peer);

            if let Some(ca_file) = &config.ca_file {
                let pem = std::fs::read(ca_file)?;
                let cert = Certificate::from_pem(&pem).map_err(|e| WirePoolError::Tls(e.to_string()))?;
                builder.add_root_certificate(cert);
            }

            match (&config.cert_file, &config.key_file) {
                (Some(cert_file), Some(key_file)) => {
                    let cert = std::fs::read(cert_file)?;
                    let key = std::fs::read(key_file)?;
                    let identity =
                        Identity::from_pkcs8(&cert, &key).map_err(|e| WirePoolError::Tls(e.to_string()))?;
                    builder.identity(identity);
                }
                (None, None) => {}
                _ => {
                    return Err(WirePoolError::Configuration(
                        "cert_file and key_file must be set together".into(),
                    ))
                }
            }

            let connector = builder.build().map_err(|e| WirePoolError::Tls(e.to_string()))?;
            Ok(Self {
                connector: tokio_native_tls::TlsConnector::from(connector),
            })
        }
    }

    #[async_trait]
    impl TlsProvider for NativeTlsProvider {
        async fn connect(&self, stream: TcpStream, server_name: &str) -> Result<BoxedStream> {
            let tls = self
                .connector
                .connect(server_name, stream)
                .await
                .map_err(|e| WirePoolError::Tls(e.to_string()))?;
            Ok(Box::new(tls))
        }
    }
}

/// Provider the pools use when none is supplied explicitly
///
/// `None` when the crate is built without TLS support; secure targets then
/// fail with `TlsUnavailable`.
pub fn default_provider(config: &TlsConfig) -> Result<Option<std::sync::Arc<dyn TlsProvider>>> {
    #[cfg(feature = "native-tls")]
    {
        Ok(Some(std::sync::Arc::new(NativeTlsProvider::new(config)?)))
    }
    #[cfg(not(feature = "native-tls"))]
    {
        let _ = config;
        Ok(None)
    }
}
