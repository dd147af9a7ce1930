//! Control connection establishment.
//!
//! Plain TCP connect under the configured timeout, with the socket wrapped
//! in TLS straight away for implicit FTPS.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::types::{FtpConnectionConfig, FtpResponse, FtpSecurityMode};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Open the control connection and return the codec plus the welcome banner.
///
/// Explicit FTPS still starts in plain text here; `AUTH TLS` is issued by
/// the client once the banner is in.
pub async fn connect(
    config: &FtpConnectionConfig,
    connector: Option<&TlsConnector>,
) -> FtpResult<(FtpCodec, FtpResponse)> {
    let addr = format!("{}:{}", config.host, config.port);
    let dur = Duration::from_secs(config.connect_timeout_sec);

    let tcp = timeout(dur, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
    tcp.set_nodelay(true).ok();

    let mut codec = match (config.security, connector) {
        (FtpSecurityMode::Implicit, Some(connector)) => {
            FtpCodec::from_tls(tls::handshake(connector, &config.host, tcp, "Implicit").await?)
        }
        (FtpSecurityMode::Implicit, None) => {
            return Err(FtpError::invalid_config(
                "Implicit FTPS requested without a TLS connector",
            ))
        }
        _ => FtpCodec::from_tcp(tcp),
    };

    let banner = timeout(dur, codec.read_response())
        .await
        .map_err(|_| FtpError::timeout(format!("No banner from {} within {:?}", addr, dur)))??;
    if !banner.is_completion() {
        return Err(FtpError::from_reply(banner.code, &banner.text()));
    }
    Ok((codec, banner))
}
