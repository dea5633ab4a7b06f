//! The byte channel the sender runs over.

use std::future::Future;
use std::io;

/// A duplex, message-framed channel to one data center.
///
/// Framing (abridged, intermediate, ...) and the socket itself belong to the
/// implementor: `send` writes one whole MTProto frame and `recv` yields the
/// next whole frame. The sender reads and writes concurrently, so
/// implementations must allow one `send` and one `recv` to be in flight at
/// the same time.
pub trait Connection: Send + Sync + 'static {
    /// Open the channel.
    fn connect(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Write one frame.
    fn send(&self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Read the next frame. An error means the channel is gone.
    fn recv(&self) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Close the channel. Pending `recv` calls should fail afterwards.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// A new, unopened connection to the same endpoint, used on reconnect.
    fn fresh(&self) -> Self
    where
        Self: Sized;
}
