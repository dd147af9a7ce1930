//! TLS for Explicit and Implicit FTPS (RFC 4217), on rustls.
//!
//! One connector is built per session and reused for the control channel
//! and every data channel, so servers that require TLS session reuse on the
//! data connection accept it.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{FtpCodec, ReadHalf, TlsStream, WriteHalf};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Build a connector trusting the platform roots, or anything at all when
/// `accept_invalid_certs` is set.
pub fn build_tls_connector(accept_invalid_certs: bool) -> FtpResult<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            log::warn!("FTPS: skipping unreadable native certificate: {}", err);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        log::debug!("FTPS: loaded {} native roots ({} ignored)", added, ignored);
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Run the client handshake over an established TCP stream.
pub async fn handshake(
    connector: &TlsConnector,
    host: &str,
    tcp: TcpStream,
    what: &str,
) -> FtpResult<TlsStream> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| FtpError::tls_failed(format!("Invalid TLS server name '{}': {}", host, e)))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("{} TLS handshake: {}", what, e)))
}

/// Upgrade a plain control connection after `AUTH TLS` was accepted.
pub async fn upgrade_to_tls(
    codec: FtpCodec,
    connector: &TlsConnector,
    host: &str,
) -> FtpResult<FtpCodec> {
    let tcp = reunite_plain(codec)?;
    let tls = handshake(connector, host, tcp, "Explicit").await?;
    Ok(FtpCodec::from_tls(tls))
}

fn reunite_plain(codec: FtpCodec) -> FtpResult<TcpStream> {
    match (codec.reader, codec.writer) {
        (ReadHalf::Plain(rd), WriteHalf::Plain(wr)) => rd
            .into_inner()
            .reunite(wr)
            .map_err(|e| FtpError::protocol_error(format!("Reunite failed: {}", e))),
        _ => Err(FtpError::protocol_error(
            "Cannot upgrade: connection is already TLS",
        )),
    }
}

/// Verifier used only when the user opted into untrusted certificates.
/// Signatures are still checked so the handshake itself stays sound.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_connector_for_both_trust_modes() {
        assert!(build_tls_connector(true).is_ok());
        assert!(build_tls_connector(false).is_ok());
    }
}
