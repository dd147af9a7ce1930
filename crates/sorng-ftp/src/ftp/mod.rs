//! # sorng-ftp — FTP/FTPS client
//!
//! Implements the parts of the FTP protocol (RFC 959) a read-only mirror
//! needs, with extensions:
//! - **RFC 2228 / 4217** — AUTH TLS / FTPS (Explicit & Implicit)
//! - **RFC 3659** — MLSD, SIZE
//! - **RFC 2389** — FEAT negotiation
//! - **RFC 2428** — EPSV / EPRT
//!
//! Architecture:
//! - `types` — data structures, enums, config
//! - `error` — FTP-specific error type
//! - `protocol` — low-level command/response codec
//! - `connection` — TCP transport + implicit TLS
//! - `tls` — rustls connector and AUTH TLS upgrade
//! - `transfer` — data channel management (PASV/EPSV/PORT/EPRT)
//! - `parser` — Unix/Windows/MLSD listing parsing
//! - `client` — stateful FTP client (login, CWD, LIST, RETR, ABOR)

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod client;
pub mod parser;
pub mod transfer;
pub mod tls;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use transfer::DataStream;
pub use types::*;
