//! # SortOfRemote NG – FTP
//!
//! FTP/FTPS client used as the remote storage backend of the mirror engine:
//!   • Plain FTP, explicit FTPS (AUTH TLS) and implicit FTPS over rustls
//!   • FEAT negotiation, UTF-8 paths, binary transfers
//!   • MLSD / Unix / Windows listing parsing
//!   • PASV, EPSV, PORT and EPRT data channels
//!   • Streamed RETR with clean ABOR handling

pub mod ftp;
