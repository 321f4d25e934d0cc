//! Byte-stream carriers for the handshake and records

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use quinn::{RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::{TransportError, TransportResult};

/// A QUIC bidirectional stream as one duplex byte stream
pub struct BiStream {
    send: SendStream,
    recv: RecvStream,
}

impl BiStream {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }

    pub fn into_parts(self) -> (SendStream, RecvStream) {
        (self.send, self.recv)
    }
}

impl AsyncRead for BiStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for BiStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.get_mut().send), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.get_mut().send), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.get_mut().send), cx)
    }
}

/// The transport a session actually runs over
pub enum Channel {
    /// A stream on a multiplexed QUIC connection
    Multiplexed(BiStream),
    /// A dedicated TCP connection
    Direct(TcpStream),
}

impl Channel {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Multiplexed(_) => "quic-stream",
            Self::Direct(_) => "tcp",
        }
    }
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Multiplexed(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Direct(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Multiplexed(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Direct(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Multiplexed(stream) => Pin::new(stream).poll_flush(cx),
            Self::Direct(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Multiplexed(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Direct(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Holder for the two interchangeable transports
///
/// Whichever is installed gets used; if both are, the multiplexed stream wins.
#[derive(Default)]
pub struct TransportSlot {
    multiplexed: Option<BiStream>,
    direct: Option<TcpStream>,
}

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_multiplexed(&mut self, stream: BiStream) {
        self.multiplexed = Some(stream);
    }

    pub fn install_direct(&mut self, stream: TcpStream) {
        self.direct = Some(stream);
    }

    pub fn is_empty(&self) -> bool {
        self.multiplexed.is_none() && self.direct.is_none()
    }

    /// Take the installed transport
    pub fn take_channel(&mut self) -> TransportResult<Channel> {
        let channel = if let Some(stream) = self.multiplexed.take() {
            Channel::Multiplexed(stream)
        } else if let Some(stream) = self.direct.take() {
            Channel::Direct(stream)
        } else {
            return Err(TransportError::NotConnected);
        };

        debug!("Using {} transport", channel.kind());
        Ok(channel)
    }
}
