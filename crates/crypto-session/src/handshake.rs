//! Public-key exchange over a reliable byte stream

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{CryptoError, CryptoResult, Session};

/// Plaintext both sides seal to confirm key agreement
pub const CONFIRM_PLAINTEXT: &[u8] = b"sealink-key-confirm";

/// AAD carried by confirmation records
pub const CONFIRM_AAD: [u8; 2] = [0xFF, 0xFF];

/// Exchange raw public keys and derive keys, leaving the session `Open`
///
/// Both peers write first and then read, so the transport must buffer at
/// least one public key in each direction. Bytes after the peer's key are
/// left unread for the record layer. Any failure closes the session.
pub async fn handshake<T>(session: &mut Session, io: &mut T) -> CryptoResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let remote = match exchange_public_keys(session, io).await {
        Ok(remote) => remote,
        Err(e) => {
            session.close();
            return Err(e);
        }
    };

    session.set_remote_public(&remote)?;
    session.derive_keys()?;
    debug!(session = %session.id().short(), "Handshake complete");
    Ok(())
}

async fn exchange_public_keys<T>(session: &Session, io: &mut T) -> CryptoResult<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    io.write_all(session.public_key_bytes()).await?;
    io.flush().await?;

    let expected = session.curve().public_key_len();
    let mut remote = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
        let n = io.read(&mut remote[filled..]).await?;
        if n == 0 {
            return Err(CryptoError::HandshakeFraming {
                expected,
                actual: filled,
            });
        }
        filled += n;
    }

    Ok(remote)
}

/// Send a fixed confirmation record and wait for the peer's
///
/// Gives the caller explicit key confirmation before application data.
/// A confirmation record that fails to open is [`CryptoError::AuthFailure`].
pub async fn confirm<T>(session: &mut Session, io: &mut T) -> CryptoResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let record = session.seal(CONFIRM_PLAINTEXT, CONFIRM_AAD)?;
    let result = exchange_confirmations(session, io, &record).await;
    if result.is_err() {
        session.close();
    }
    result
}

async fn exchange_confirmations<T>(session: &Session, io: &mut T, record: &[u8]) -> CryptoResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    io.write_all(record).await?;
    io.flush().await?;

    let mut peer_record = vec![0u8; record.len()];
    io.read_exact(&mut peer_record).await?;

    let plaintext = session.open_record(&peer_record)?;
    if plaintext != CONFIRM_PLAINTEXT {
        return Err(CryptoError::AuthFailure);
    }
    Ok(())
}
