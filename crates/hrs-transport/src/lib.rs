//! Byte-exact HTTP/1.1 and HTTP/2 clients for smuggling probes.
//!
//! Both clients deliberately skip the hygiene a well-behaved HTTP
//! library enforces — that's the point: the detectors need sockets
//! that will carry whatever malformed bytes a probe hands them.

pub mod connect;
pub mod http1;
pub mod http2;
pub mod stream;
pub mod tls;

pub use connect::dial;
pub use http1::Http1Client;
pub use http2::Http2Client;
pub use stream::BoxedStream;
