//! Length-prefixed JSON framing: `[u32 big-endian length][payload]`.

use std::io;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChannelError;

pub const HEADER_LEN: usize = 4;
pub const DEFAULT_MAX_FRAME_LEN: usize = 1_000_000;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct MessageChannel<S> {
    stream: S,
    max_frame_len: usize,
    io_timeout: Duration,
}

impl<S> MessageChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Writes header and payload with a single `write_all`.
    pub async fn send<T: Serialize>(&mut self, record: &T) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(record).map_err(ChannelError::Encode)?;
        if payload.len() > self.max_frame_len {
            return Err(ChannelError::MessageTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        let io_timeout = self.io_timeout;
        let write = async {
            self.stream.write_all(&frame).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(io_timeout, write).await {
            Ok(result) => result.map_err(map_io),
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        self.receive_within(self.io_timeout).await
    }

    /// Receives one record, waiting at most `timeout` for the whole frame.
    /// The channel's default timeout is left untouched.
    pub async fn receive_within<T: DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let payload = match tokio::time::timeout(timeout, self.read_frame()).await {
            Ok(payload) => payload?,
            Err(_) => return Err(ChannelError::Timeout),
        };
        serde_json::from_slice(&payload).map_err(ChannelError::Decode)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await.map_err(map_io)?;

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(ChannelError::MessageTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.map_err(map_io)?;
        Ok(payload)
    }
}

fn map_io(err: io::Error) -> ChannelError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ChannelError::PeerClosed,
        _ => ChannelError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, ServerMessage};
    use num_bigint::BigUint;
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_then_receive_delivers_whole_record() {
        let (a, b) = duplex(64);
        let mut left = MessageChannel::new(a);
        let mut right = MessageChannel::new(b);

        // Larger than the duplex buffer, so the reader has to loop.
        let msg = ClientMessage::Register {
            username: "alice".repeat(40),
            v: BigUint::from(3u32).pow(300),
        };
        let sent = msg.clone();
        let writer = tokio::spawn(async move { left.send(&sent).await });

        let received: ClientMessage = right.receive().await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (mut a, b) = duplex(64);
        let mut channel = MessageChannel::new(b).with_max_frame_len(16);
        a.write_all(&1_000u32.to_be_bytes()).await.unwrap();

        let err = channel.receive::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, ChannelError::MessageTooLarge { len: 1000, max: 16 }));
    }

    #[tokio::test]
    async fn oversized_outgoing_record_is_rejected() {
        let (a, _b) = duplex(64);
        let mut channel = MessageChannel::new(a).with_max_frame_len(8);
        let err = channel.send(&ServerMessage::error("too long for eight bytes")).await;
        assert!(matches!(err, Err(ChannelError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn close_mid_frame_is_peer_closed() {
        let (mut a, b) = duplex(64);
        let mut channel = MessageChannel::new(b);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{\"ac").await.unwrap();
        drop(a);

        let err = channel.receive::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, ChannelError::PeerClosed));
    }

    #[tokio::test]
    async fn close_before_header_is_peer_closed() {
        let (a, b) = duplex(64);
        drop(a);
        let mut channel = MessageChannel::new(b);
        let err = channel.receive::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, ChannelError::PeerClosed));
    }

    #[tokio::test]
    async fn malformed_payload_is_decode_error() {
        let (mut a, b) = duplex(64);
        let mut channel = MessageChannel::new(b);
        let payload = b"not json";
        a.write_all(&(payload.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(payload).await.unwrap();

        let err = channel.receive::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (_a, b) = duplex(64);
        let mut channel = MessageChannel::new(b).with_timeout(Duration::from_secs(5));
        let err = channel
            .receive_within::<ClientMessage>(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        assert_eq!(channel.timeout(), Duration::from_secs(5));
    }
}
