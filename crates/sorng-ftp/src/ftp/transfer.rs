//! Data-channel management (RFC 959 + RFC 2428).
//!
//! - **PASV** / **EPSV** — server listens, client connects
//! - **PORT** / **EPRT** — client listens, server connects
//!
//! The socket is TLS-wrapped when the control channel is protected.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{FtpCodec, TlsStream};
use crate::ftp::tls;
use crate::ftp::types::DataChannelMode;
use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsConnector;

lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").expect("valid PASV pattern");
    static ref EPSV_RE: Regex = Regex::new(r"\|\|\|(\d+)\|").expect("valid EPSV pattern");
}

/// A connected data socket, plain or TLS-wrapped.
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl AsyncRead for DataStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            DataStream::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

/// Where and how to open the next data channel.
pub struct DataChannelParams<'a> {
    pub mode: DataChannelMode,
    pub host: &'a str,
    pub tls: Option<&'a TlsConnector>,
    pub data_timeout: Duration,
    pub active_bind: Option<&'a str>,
}

/// Pending data channel: passive sockets are already connected, active
/// ones wait for the server to connect after the transfer command is sent.
pub enum PendingData {
    Connected(TcpStream),
    Listening(TcpListener),
}

/// Negotiate the data channel (PASV/EPSV/PORT/EPRT) before RETR/LIST.
pub async fn prepare_data_channel(
    codec: &mut FtpCodec,
    params: &DataChannelParams<'_>,
) -> FtpResult<PendingData> {
    match params.mode {
        DataChannelMode::Passive => {
            let resp = codec.expect_ok("PASV").await?;
            let addr = parse_pasv_response(&resp.text())?;
            connect_data(addr.to_string(), params.data_timeout, "PASV").await
        }
        DataChannelMode::ExtendedPassive => {
            let resp = codec.expect_ok("EPSV").await?;
            let port = parse_epsv_response(&resp.text())?;
            connect_data(
                format!("{}:{}", params.host, port),
                params.data_timeout,
                "EPSV",
            )
            .await
        }
        DataChannelMode::Active => {
            let listener = bind_active(params.active_bind).await?;
            let local = listener.local_addr()?;
            let v4 = match local.ip() {
                IpAddr::V4(v4) => v4,
                IpAddr::V6(_) => return Err(FtpError::data_channel("PORT requires IPv4")),
            };
            let o = v4.octets();
            let cmd = format!(
                "PORT {},{},{},{},{},{}",
                o[0],
                o[1],
                o[2],
                o[3],
                local.port() / 256,
                local.port() % 256
            );
            codec.expect_ok(&cmd).await?;
            Ok(PendingData::Listening(listener))
        }
        DataChannelMode::ExtendedActive => {
            let listener = bind_active(params.active_bind).await?;
            let local = listener.local_addr()?;
            let af = if local.is_ipv4() { 1 } else { 2 };
            codec
                .expect_ok(&format!("EPRT |{}|{}|{}|", af, local.ip(), local.port()))
                .await?;
            Ok(PendingData::Listening(listener))
        }
    }
}

/// Finish opening the data channel once the server accepted the command.
pub async fn finish_data_channel(
    pending: PendingData,
    params: &DataChannelParams<'_>,
) -> FtpResult<DataStream> {
    let tcp = match pending {
        PendingData::Connected(tcp) => tcp,
        PendingData::Listening(listener) => {
            let (tcp, _) = timeout(params.data_timeout, listener.accept())
                .await
                .map_err(|_| FtpError::data_channel("Active data accept timed out"))?
                .map_err(|e| FtpError::data_channel(format!("Active data accept: {}", e)))?;
            tcp
        }
    };

    match params.tls {
        Some(connector) => {
            let tls = tls::handshake(connector, params.host, tcp, "Data channel").await?;
            Ok(DataStream::Tls(Box::new(tls)))
        }
        None => Ok(DataStream::Plain(tcp)),
    }
}

async fn connect_data(addr: String, data_timeout: Duration, what: &str) -> FtpResult<PendingData> {
    let tcp = timeout(data_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("{} data connect timed out", what)))?
        .map_err(|e| FtpError::data_channel(format!("{} data connect to {}: {}", what, addr, e)))?;
    Ok(PendingData::Connected(tcp))
}

async fn bind_active(bind: Option<&str>) -> FtpResult<TcpListener> {
    let bind = bind.unwrap_or("0.0.0.0");
    TcpListener::bind(format!("{}:0", bind))
        .await
        .map_err(|e| FtpError::data_channel(format!("Active bind on {}: {}", bind, e)))
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply.
fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;
    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<FtpResult<Vec<u8>>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}

/// Parse the port out of `229 Entering Extended Passive Mode (|||port|)`.
fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}
