use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// Type alias for tunnel streams - the pool, acquirer and relay do not care
/// which transport produced them
pub type TunnelStream = Pin<Box<dyn AsyncReadWrite + Send>>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}
