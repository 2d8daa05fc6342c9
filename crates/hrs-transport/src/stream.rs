//! Transport-agnostic duplex stream, the way `zeptohttpc::Stream` wraps
//! a plain or TLS socket behind one type so the H1/H2 clients don't
//! need to care which one they got.

use tokio::io::{AsyncRead, AsyncWrite};

/// Blanket marker for anything the clients can read/write/close.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadWrite>;
