//! Stateful FTP client. Owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` → optional AUTH TLS → USER/PASS → FEAT →
//! OPTS UTF8 → SYST → PWD → TYPE I. Afterwards the mirror only needs
//! CWD, listings and streamed RETR.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataChannelParams, DataStream};
use crate::ftp::types::*;
use chrono::Utc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use uuid::Uuid;

/// A connected FTP client session.
pub struct FtpClient {
    pub id: String,
    pub codec: FtpCodec,
    pub config: FtpConnectionConfig,
    pub info: FtpSessionInfo,
    pub features: ServerFeatures,
    tls: Option<TlsConnector>,
    retrieving: bool,
}

impl FtpClient {
    /// Establish and log in a new FTP session.
    pub async fn connect(config: FtpConnectionConfig) -> FtpResult<Self> {
        if config.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }

        let tls = match config.security {
            FtpSecurityMode::None => None,
            _ => Some(tls::build_tls_connector(config.accept_invalid_certs)?),
        };

        let (mut codec, banner) = connection::connect(&config, tls.as_ref()).await?;

        // ── Explicit FTPS: AUTH TLS ──────────────────────────────
        if config.security == FtpSecurityMode::Explicit {
            let resp = codec.execute("AUTH TLS").await?;
            if !resp.is_completion() {
                return Err(FtpError::tls_failed(format!(
                    "AUTH TLS rejected: {}",
                    resp.text()
                )));
            }
            if let Some(connector) = tls.as_ref() {
                codec = tls::upgrade_to_tls(codec, connector, &config.host).await?;
            }
        }
        if config.security != FtpSecurityMode::None {
            codec.expect_ok("PBSZ 0").await?;
            codec.expect_ok("PROT P").await?;
        }

        // ── Authenticate ─────────────────────────────────────────
        let user_resp = codec.execute(&format!("USER {}", config.username)).await?;
        match user_resp.code {
            331 | 332 => {
                let pass_resp = codec.execute(&format!("PASS {}", config.password)).await?;
                if !pass_resp.is_completion() {
                    return Err(FtpError::auth_failed(format!(
                        "Login failed: {}",
                        pass_resp.text()
                    ))
                    .with_code(pass_resp.code));
                }
            }
            code if (200..300).contains(&code) => {}
            code => {
                return Err(FtpError::auth_failed(format!(
                    "USER rejected: {}",
                    user_resp.text()
                ))
                .with_code(code));
            }
        }

        let features = detect_features(&mut codec).await;

        if config.utf8 && features.utf8 {
            let _ = codec.execute("OPTS UTF8 ON").await;
        }

        let system_type = match codec.execute("SYST").await {
            Ok(r) if r.is_completion() => Some(r.text().trim_start_matches("215 ").to_string()),
            _ => None,
        };

        let cwd = get_pwd(&mut codec).await.unwrap_or_else(|_| "/".into());
        codec.expect_ok("TYPE I").await?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let info = FtpSessionInfo {
            id: id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            security: config.security,
            connected: true,
            current_directory: cwd,
            server_banner: Some(banner.text()),
            system_type,
            connected_at: now,
            last_activity: now,
            bytes_downloaded: 0,
        };

        log::info!(
            "FTP session {} connected to {}:{} ({:?})",
            id,
            config.host,
            config.port,
            config.security
        );

        Ok(Self {
            id,
            codec,
            config,
            info,
            features,
            tls,
            retrieving: false,
        })
    }

    // ─── CWD ────────────────────────────────────────────────────

    /// Change into `path`. A 550 reply is reported as `NotFound`, which is
    /// how servers answer CWD into a directory that does not exist.
    pub async fn cwd(&mut self, path: &str) -> FtpResult<String> {
        let resp = self.codec.execute(&format!("CWD {}", path)).await;
        let resp = self.track(resp)?;
        if !resp.is_completion() {
            let mut err = FtpError::from_reply(resp.code, &resp.text());
            if resp.code == 550 && err.kind == FtpErrorKind::CommandRejected {
                err.kind = FtpErrorKind::NotFound;
            }
            return Err(err);
        }
        let pwd = get_pwd(&mut self.codec).await;
        let pwd = self.track(pwd).unwrap_or_else(|_| path.to_string());
        self.info.current_directory = pwd.clone();
        Ok(pwd)
    }

    /// Send a NOOP to keep the control connection alive.
    pub async fn noop(&mut self) -> FtpResult<()> {
        let resp = self.codec.expect_ok("NOOP").await;
        self.track(resp).map(|_| ())
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// Directory listing, MLSD when configured and advertised, LIST otherwise.
    pub async fn list(&mut self, path: &str) -> FtpResult<Vec<FtpEntry>> {
        let cmd = if self.config.prefer_mlsd && self.features.mlsd {
            format!("MLSD {}", path)
        } else {
            format!("LIST {}", path)
        };
        let data = self.retrieve_data_as_string(&cmd).await;
        let data = self.track(data)?;
        Ok(parser::parse_listing(&data))
    }

    async fn retrieve_data_as_string(&mut self, cmd: &str) -> FtpResult<String> {
        let mut ds = self.open_transfer(cmd).await?;
        let mut buf = Vec::new();
        let read = timeout(self.data_timeout(), ds.read_to_end(&mut buf)).await;
        drop(ds);
        read.map_err(|_| FtpError::timeout(format!("{}: data channel stalled", cmd)))??;
        self.read_completion().await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ─── RETR ───────────────────────────────────────────────────

    /// Start downloading `path`. The returned stream yields the file bytes;
    /// once it is drained (or dropped) call [`Self::finish_retrieve`] or
    /// [`Self::abort_retrieve`] so the control channel is back in sync.
    pub async fn begin_retrieve(&mut self, path: &str) -> FtpResult<DataStream> {
        if self.retrieving {
            return Err(FtpError::protocol_error(
                "A download is already in progress on this session",
            ));
        }
        let resp = self.codec.expect_ok("TYPE I").await;
        self.track(resp)?;
        let ds = self.open_transfer(&format!("RETR {}", path)).await;
        let ds = self.track(ds)?;
        self.retrieving = true;
        Ok(ds)
    }

    /// Consume the transfer-complete reply after the data stream ended.
    pub async fn finish_retrieve(&mut self, bytes: u64) -> FtpResult<()> {
        self.retrieving = false;
        let done = self.read_completion().await;
        self.track(done)?;
        self.info.bytes_downloaded += bytes;
        Ok(())
    }

    /// Abort an unfinished download (ABOR) and drain the replies it causes.
    /// If the server does not answer sensibly the session is marked closed.
    pub async fn abort_retrieve(&mut self) -> FtpResult<()> {
        if !self.retrieving {
            return Ok(());
        }
        self.retrieving = false;
        let result: FtpResult<()> = async {
            self.codec.send_command("ABOR").await?;
            // Either "426 aborted" followed by "226", or a lone "226"/"225".
            for _ in 0..2 {
                let resp = timeout(Duration::from_secs(5), self.codec.read_response())
                    .await
                    .map_err(|_| FtpError::timeout("No reply to ABOR"))??;
                if resp.code == 225 || resp.code == 226 {
                    return Ok(());
                }
            }
            Err(FtpError::protocol_error("Unexpected reply sequence after ABOR"))
        }
        .await;
        if let Err(e) = &result {
            log::warn!("FTP session {}: abort failed, closing: {}", self.id, e);
            self.info.connected = false;
        }
        result
    }

    // ─── QUIT ────────────────────────────────────────────────────

    /// Gracefully close the session.
    pub async fn quit(&mut self) -> FtpResult<()> {
        if self.info.connected {
            let _ = timeout(Duration::from_secs(5), self.codec.execute("QUIT")).await;
        }
        self.info.connected = false;
        log::debug!("FTP session {} closed", self.id);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.info.connected
    }

    // ─── Internals ───────────────────────────────────────────────

    fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.config.data_timeout_sec)
    }

    /// PASV/PORT, send the transfer command, then connect the data socket.
    async fn open_transfer(&mut self, cmd: &str) -> FtpResult<DataStream> {
        let params = DataChannelParams {
            mode: self.config.data_channel_mode,
            host: &self.config.host,
            tls: self.tls.as_ref(),
            data_timeout: Duration::from_secs(self.config.data_timeout_sec),
            active_bind: self.config.active_bind_address.as_deref(),
        };
        let pending = transfer::prepare_data_channel(&mut self.codec, &params).await?;
        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() && !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        transfer::finish_data_channel(pending, &params).await
    }

    async fn read_completion(&mut self) -> FtpResult<()> {
        let done = self.codec.read_response().await?;
        if !done.is_completion() {
            return Err(FtpError::from_reply(done.code, &done.text()));
        }
        Ok(())
    }

    /// Refresh the activity stamp, or mark the session dead on transport errors.
    fn track<T>(&mut self, result: FtpResult<T>) -> FtpResult<T> {
        match &result {
            Ok(_) => self.info.last_activity = Utc::now(),
            Err(e) if e.is_fatal() => {
                log::warn!("FTP session {} lost: {}", self.id, e);
                self.info.connected = false;
            }
            Err(_) => self.info.last_activity = Utc::now(),
        }
        result
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

async fn detect_features(codec: &mut FtpCodec) -> ServerFeatures {
    let resp = match codec.execute("FEAT").await {
        Ok(r) if r.is_completion() => r,
        _ => return ServerFeatures::default(),
    };

    let raw: Vec<String> = resp
        .lines
        .iter()
        .skip(1)
        .filter(|l| !l.starts_with("211"))
        .map(|l| l.trim().to_uppercase())
        .collect();
    let has = |feat: &str| raw.iter().any(|l| l.starts_with(feat));

    ServerFeatures {
        mlsd: has("MLSD") || has("MLST"),
        utf8: has("UTF8"),
        raw_features: raw,
    }
}

async fn get_pwd(codec: &mut FtpCodec) -> FtpResult<String> {
    let resp = codec.expect_ok("PWD").await?;
    parse_pwd(&resp.text())
}

/// Parse `257 "/some/path"` into the path string.
fn parse_pwd(text: &str) -> FtpResult<String> {
    let start = text.find('"');
    let end = text.rfind('"');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(text[s + 1..e].replace("\"\"", "\"")),
        _ => Err(FtpError::protocol_error(format!("Cannot parse PWD: {}", text))),
    }
}
