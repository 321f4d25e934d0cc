//! Length-delimited sealed records over a byte stream
//!
//! Each frame is `len[4, big-endian] || record`, where `record` is exactly
//! what [`Session::seal`] produced. Any framing, I/O or record error closes
//! the session and shuts the stream down, as does dropping a send or receive
//! future after part of a frame has crossed the stream.

use std::sync::Arc;

use crypto_session::{AAD_SIZE, Session, confirm, handshake};
use shared_protocol::MIN_RECORD_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{TransportError, TransportResult};

/// Largest plaintext a single frame may carry
pub const MAX_PLAINTEXT_SIZE: usize = 1 << 20;

/// Largest record accepted off the wire
pub const MAX_RECORD_SIZE: usize = MAX_PLAINTEXT_SIZE + MIN_RECORD_SIZE;

const LENGTH_PREFIX_SIZE: usize = 4;

type Frame = ([u8; AAD_SIZE], Vec<u8>);

/// An `Open` session bound to the stream it was negotiated over
pub struct SecureChannel<T> {
    session: Session,
    io: T,
}

impl<T> SecureChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the key exchange on `io`, optionally followed by key confirmation
    pub async fn establish(
        mut session: Session,
        mut io: T,
        confirm_keys: bool,
    ) -> TransportResult<Self> {
        handshake(&mut session, &mut io).await?;
        if confirm_keys {
            confirm(&mut session, &mut io).await?;
        }

        debug!(
            session = %session.id().short(),
            curve = %session.curve(),
            suite = %session.suite(),
            "Secure channel established"
        );
        Ok(Self { session, io })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Seal `data` and write it as one frame
    pub async fn send(&mut self, aad: [u8; AAD_SIZE], data: &[u8]) -> TransportResult<()> {
        let result = write_frame(&self.session, &mut self.io, aad, data).await;
        if let Err(e) = &result {
            self.session.close();
            tear_down(&self.session, &mut self.io, e).await;
        }
        result
    }

    /// Read and open the next frame; `None` on a clean end of stream
    pub async fn recv(&mut self) -> TransportResult<Option<Frame>> {
        let result = read_frame(&self.session, &mut self.io).await;
        if let Err(e) = &result {
            self.session.close();
            tear_down(&self.session, &mut self.io, e).await;
        }
        result
    }

    /// Close the session and shut the stream down
    pub async fn close(mut self) -> TransportResult<()> {
        self.session.close();
        self.io.shutdown().await?;
        Ok(())
    }

    pub fn into_parts(self) -> (Session, T) {
        (self.session, self.io)
    }

    /// Split into halves that can be driven from separate tasks
    ///
    /// Both halves share the session and the write side of the stream, so
    /// a failure on either one closes the session and shuts the stream down
    /// for both.
    pub fn split(self) -> (SecureSender<T>, SecureReceiver<T>) {
        let session = Arc::new(self.session);
        let (reader, writer) = tokio::io::split(self.io);
        let writer = Arc::new(Mutex::new(writer));
        (
            SecureSender {
                session: session.clone(),
                writer: writer.clone(),
            },
            SecureReceiver {
                session,
                reader,
                writer,
            },
        )
    }
}

/// Sending half of a split [`SecureChannel`]
pub struct SecureSender<T> {
    session: Arc<Session>,
    writer: Arc<Mutex<WriteHalf<T>>>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SecureSender<T> {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn send(&mut self, aad: [u8; AAD_SIZE], data: &[u8]) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        let result = write_frame(&self.session, &mut *writer, aad, data).await;
        if let Err(e) = &result {
            self.session.abort();
            tear_down(&self.session, &mut *writer, e).await;
        }
        result
    }

    pub async fn shutdown(&mut self) -> TransportResult<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Receiving half of a split [`SecureChannel`]
///
/// A failed frame closes the shared session and shuts down the shared write
/// side, so the sender's next `send` fails too.
pub struct SecureReceiver<T> {
    session: Arc<Session>,
    reader: ReadHalf<T>,
    writer: Arc<Mutex<WriteHalf<T>>>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SecureReceiver<T> {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn recv(&mut self) -> TransportResult<Option<Frame>> {
        let result = read_frame(&self.session, &mut self.reader).await;
        if let Err(e) = &result {
            self.session.abort();
            let mut writer = self.writer.lock().await;
            tear_down(&self.session, &mut *writer, e).await;
        }
        result
    }
}

/// Aborts the session unless disarmed; held while a frame is half written
/// or half read
struct FrameGuard<'a> {
    session: Option<&'a Session>,
}

impl<'a> FrameGuard<'a> {
    fn arm(session: &'a Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn disarm(mut self) {
        self.session = None;
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(session = %session.id().short(), "Frame interrupted");
            session.abort();
        }
    }
}

async fn tear_down<W>(session: &Session, writer: &mut W, error: &TransportError)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    warn!(session = %session.id().short(), "Secure channel failed: {}", error);
    if let Err(e) = writer.shutdown().await {
        warn!(session = %session.id().short(), "Stream shutdown failed: {}", e);
    }
}

async fn write_frame<W>(
    session: &Session,
    writer: &mut W,
    aad: [u8; AAD_SIZE],
    data: &[u8],
) -> TransportResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if data.len() > MAX_PLAINTEXT_SIZE {
        return Err(TransportError::RecordTooLarge {
            size: data.len(),
            max: MAX_PLAINTEXT_SIZE,
        });
    }

    let record = session.seal(data, aad)?;
    let guard = FrameGuard::arm(session);
    writer.write_all(&(record.len() as u32).to_be_bytes()).await?;
    writer.write_all(&record).await?;
    writer.flush().await?;
    guard.disarm();
    Ok(())
}

async fn read_frame<R>(session: &Session, reader: &mut R) -> TransportResult<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }

    let guard = FrameGuard::arm(session);
    reader.read_exact(&mut len_buf[n..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(TransportError::RecordTooLarge {
            size: len,
            max: MAX_RECORD_SIZE,
        });
    }

    let mut record = vec![0u8; len];
    reader.read_exact(&mut record).await?;
    guard.disarm();

    let plaintext = session.open_record(&record)?;
    let mut aad = [0u8; AAD_SIZE];
    aad.copy_from_slice(&record[..AAD_SIZE]);
    Ok(Some((aad, plaintext)))
}
