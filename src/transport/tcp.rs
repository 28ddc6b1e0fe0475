use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, SessionError};
use crate::session::retry::{with_retry, RetryPolicy};

/// Connect to a TCP endpoint.
pub async fn connect(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connect, bounding each attempt by `connect_timeout` and retrying per `policy`.
pub async fn connect_with_retry(
    addr: SocketAddr,
    connect_timeout: Duration,
    policy: &RetryPolicy,
) -> Result<TcpStream, Error> {
    with_retry(policy, move || async move {
        match tokio::time::timeout(connect_timeout, connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::Session(SessionError::ConnectFailed(format!(
                "{addr}: {e}"
            )))),
            Err(_) => Err(Error::Session(SessionError::ConnectFailed(format!(
                "{addr}: timed out after {connect_timeout:?}"
            )))),
        }
    })
    .await
}

/// Bind a TCP listener and return it.
pub async fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Accept a single connection from a listener.
pub async fn accept(listener: &TcpListener) -> std::io::Result<(TcpStream, SocketAddr)> {
    let (stream, addr) = listener.accept().await?;
    stream.set_nodelay(true)?;
    Ok((stream, addr))
}
