use rustls::pki_types::ServerName;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::conn::TunnelStream;
use crate::log_debug;
use crate::logger::Logger;
use crate::tls;

/// Produces camouflaged tunnel connections: a TCP connect followed by a TLS
/// handshake under the configured SNI. The caller bounds each dial with its
/// own deadline.
pub struct TunnelDialer {
    server_addr: String,
    sni: ServerName<'static>,
    connector: TlsConnector,
    logger: Logger,
}

impl TunnelDialer {
    pub fn new(server_addr: String, sni: &str, logger: Logger) -> anyhow::Result<Self> {
        let sni = ServerName::try_from(sni.to_string())
            .map_err(|e| anyhow::anyhow!("dialer: invalid SNI {:?}: {}", sni, e))?;
        Ok(Self {
            server_addr,
            sni,
            connector: TlsConnector::from(tls::insecure_client_config()),
            logger,
        })
    }

    /// Establish one tunnel connection.
    pub async fn dial(&self) -> anyhow::Result<TunnelStream> {
        let start = Instant::now();

        let tcp = TcpStream::connect(&self.server_addr)
            .await
            .map_err(|e| anyhow::anyhow!("dial: connect {} failed: {}", self.server_addr, e))?;

        let stream = self
            .connector
            .connect(self.sni.clone(), tcp)
            .await
            .map_err(|e| anyhow::anyhow!("dial: TLS handshake with {} failed: {}", self.server_addr, e))?;

        log_debug!(
            self.logger,
            "Tunnel established in {}ms",
            start.elapsed().as_millis()
        );
        Ok(Box::pin(stream))
    }
}
