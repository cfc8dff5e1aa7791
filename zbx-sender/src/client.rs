use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zbx_metrics::FlushBatch;

use crate::protocol::{
    HEADER_SIZE, ProtocolError, SenderRequest, SenderResponse, decode_header, encode_frame,
};

/// Default bound for a complete exchange with the trapper.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit for the payload length announced by the trapper.
const DEFAULT_MAX_RESPONSE_SIZE: u64 = 1024 * 1024;

/// An error sending a batch to the trapper.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Connecting, writing or reading failed.
    #[error("could not reach the trapper")]
    Transport(#[from] io::Error),

    /// The exchange did not complete within the configured timeout.
    #[error("exchange with the trapper timed out")]
    Timeout,

    /// The trapper answered with a malformed frame or payload.
    #[error("invalid response from the trapper")]
    Protocol(#[from] ProtocolError),

    /// The trapper answered, but did not accept the request.
    #[error("trapper rejected the request: {response} ({info})")]
    Rejected {
        /// The `response` field of the answer.
        response: String,
        /// The `info` field of the answer.
        info: String,
    },
}

/// Client pushing [`FlushBatch`]es to a Zabbix trapper.
///
/// Every call to [`send`](Self::send) opens a new connection, writes one request frame and reads
/// exactly one response frame. The sender does not retry.
#[derive(Clone, Debug)]
pub struct ZabbixSender {
    host: String,
    port: u16,
    timeout: Duration,
    max_response_size: u64,
}

impl ZabbixSender {
    /// Creates a sender for the trapper at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Bounds the complete exchange, including connecting.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rejects responses announcing a payload larger than `max_response_size` bytes.
    pub fn with_max_response_size(mut self, max_response_size: u64) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    /// Returns the configured exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a batch and waits for the acknowledgement.
    ///
    /// Returns the response if the trapper accepted the request. Note that an accepted request
    /// may still contain items the trapper failed to store, see [`SenderResponse::summary`].
    pub async fn send(&self, batch: &FlushBatch) -> Result<SenderResponse, SendError> {
        let payload = SenderRequest::new(batch).to_payload()?;
        let frame = encode_frame(&payload);

        let response = tokio::time::timeout(self.timeout, self.exchange(&frame))
            .await
            .map_err(|_| SendError::Timeout)??;

        if !response.is_success() {
            return Err(SendError::Rejected {
                response: response.response,
                info: response.info,
            });
        }

        Ok(response)
    }

    async fn exchange(&self, frame: &[u8]) -> Result<SenderResponse, SendError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        zbx_log::trace!(host = %self.host, port = self.port, "connected to trapper");

        stream.write_all(frame).await?;
        stream.flush().await?;

        let mut header = [0; HEADER_SIZE];
        let read = read_full(&mut stream, &mut header).await?;
        if read < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: read,
            }
            .into());
        }

        let length = decode_header(&header)?;
        if length > self.max_response_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: length,
                limit: self.max_response_size,
            }
            .into());
        }

        // Bounded by `max_response_size` above.
        let length = length as usize;
        let mut payload = vec![0; length];
        let read = read_full(&mut stream, &mut payload).await?;
        if read < length {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE + length,
                actual: HEADER_SIZE + read,
            }
            .into());
        }

        let response = serde_json::from_slice(&payload).map_err(ProtocolError::Json)?;
        Ok(response)
    }
}

/// Reads until `buf` is full or the stream ends, returning the number of bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
