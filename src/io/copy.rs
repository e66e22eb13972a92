//! Bidirectional splice between a client and its target
//!
//! Relays bytes in both directions until either side closes or errors.
//! Unlike a full-duplex proxy copy that lets each direction drain
//! independently, the relay pair is torn down as a unit: the first
//! direction to finish (orderly close or error) resolves the whole
//! splice, and the caller drops both sockets together.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::buffer::DEFAULT_BUFFER_SIZE;

/// Result of a completed splice
#[derive(Debug, Clone, Copy)]
pub struct SpliceResult {
    /// Bytes transferred from client to target
    pub client_to_target: u64,
    /// Bytes transferred from target to client
    pub target_to_client: u64,
}

impl SpliceResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_target + self.target_to_client
    }
}

/// Splice state machine
struct Splice<'a, C, T>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    client: &'a mut C,
    target: &'a mut T,
    client_to_target: TransferState,
    target_to_client: TransferState,
}

/// State for one direction of transfer
struct TransferState {
    buf: Box<[u8]>,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
}

impl TransferState {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
        }
    }

    fn poll_transfer<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            // If there's data in the buffer, try to write it
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes_transferred += n as u64;

                // If all data written, reset buffer
                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                // No more data to write and read is done
                if !self.write_done {
                    // Flush and shutdown writer
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.write_done = true;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                // Try to read more data
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

impl<'a, C, T> Splice<'a, C, T>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn new(client: &'a mut C, target: &'a mut T, buf_size: usize) -> Self {
        Self {
            client,
            target,
            client_to_target: TransferState::new(buf_size),
            target_to_client: TransferState::new(buf_size),
        }
    }

    fn result(&self) -> SpliceResult {
        SpliceResult {
            client_to_target: self.client_to_target.bytes_transferred,
            target_to_client: self.target_to_client.bytes_transferred,
        }
    }
}

impl<C, T> std::future::Future for Splice<'_, C, T>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Output = io::Result<SpliceResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        // Client -> target direction; either-side completion ends the pair
        match this.client_to_target.poll_transfer(
            cx,
            Pin::new(&mut this.client),
            Pin::new(&mut this.target),
        ) {
            Poll::Ready(Ok(())) => return Poll::Ready(Ok(this.result())),
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => {}
        }

        // Target -> client direction
        match this.target_to_client.poll_transfer(
            cx,
            Pin::new(&mut this.target),
            Pin::new(&mut this.client),
        ) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(this.result())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Splice two streams together until either side closes
///
/// Copies data in both directions simultaneously. The first direction to
/// reach EOF (after flushing what was read) or hit an error resolves the
/// future; dropping the streams afterwards closes both ends together.
///
/// # Arguments
///
/// * `client` - The accepted client stream
/// * `target` - The freshly connected target stream
///
/// # Returns
///
/// Returns the number of bytes transferred in each direction.
pub async fn splice<C, T>(client: &mut C, target: &mut T) -> io::Result<SpliceResult>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    Splice::new(client, target, DEFAULT_BUFFER_SIZE).await
}

/// Splice with a custom buffer size
///
/// Same as [`splice`] but allows specifying a custom per-direction buffer.
pub async fn splice_with_buffer<C, T>(
    client: &mut C,
    target: &mut T,
    buf_size: usize,
) -> io::Result<SpliceResult>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    Splice::new(client, target, buf_size).await
}
