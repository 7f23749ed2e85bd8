//! Socket helpers shared by the raw-protocol plugins.

use astra_common::CrackError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::plugin::Endpoint;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_NO_AUTH: u8 = 0x00;
const SOCKS_CMD_CONNECT: u8 = 0x01;

/// Open a TCP stream to the endpoint, through its SOCKS5 proxy if one is set.
pub async fn dial(endpoint: &Endpoint<'_>) -> Result<TcpStream, CrackError> {
    let fut = async {
        match endpoint.proxy {
            Some(proxy) => socks5_connect(proxy, endpoint.address).await,
            None => Ok(TcpStream::connect(endpoint.address).await?),
        }
    };
    timeout(endpoint.timeout, fut)
        .await
        .map_err(|_| CrackError::timeout(endpoint.timeout))?
}

async fn socks5_connect(proxy: &str, target: SocketAddr) -> Result<TcpStream, CrackError> {
    let proxy = proxy.strip_prefix("socks5://").unwrap_or(proxy);
    let mut stream = TcpStream::connect(proxy)
        .await
        .map_err(|e| CrackError::transport(format!("proxy {proxy}: {e}")))?;

    stream.write_all(&[SOCKS_VERSION, 1, SOCKS_NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice != [SOCKS_VERSION, SOCKS_NO_AUTH] {
        return Err(CrackError::transport("proxy refused no-auth method"));
    }

    let mut req = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    match target.ip() {
        IpAddr::V4(ip) => {
            req.push(0x01);
            req.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            req.push(0x04);
            req.extend_from_slice(&ip.octets());
        }
    }
    req.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(CrackError::transport(format!("proxy connect failed: code {}", head[1])));
    }
    // drain the bound address
    let rest = match head[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0]) + 2
        }
        other => return Err(CrackError::protocol(format!("proxy address type {other}"))),
    };
    let mut skip = vec![0u8; rest];
    stream.read_exact(&mut skip).await?;

    Ok(stream)
}

pub async fn send(stream: &mut TcpStream, bytes: &[u8], limit: Duration) -> Result<(), CrackError> {
    timeout(limit, stream.write_all(bytes))
        .await
        .map_err(|_| CrackError::timeout(limit))??;
    Ok(())
}

/// Write `request` then read whatever arrives in one read, bounded by `limit`.
pub async fn exchange(
    stream: &mut TcpStream,
    request: &[u8],
    limit: Duration,
) -> Result<Vec<u8>, CrackError> {
    send(stream, request, limit).await?;
    read_some(stream, limit).await
}

/// One read of up to 4 KiB. A closed connection is a transport error.
pub async fn read_some(stream: &mut TcpStream, limit: Duration) -> Result<Vec<u8>, CrackError> {
    let mut buf = vec![0u8; 4096];
    let n = timeout(limit, stream.read(&mut buf))
        .await
        .map_err(|_| CrackError::timeout(limit))??;
    if n == 0 {
        return Err(CrackError::transport("connection closed by peer"));
    }
    buf.truncate(n);
    Ok(buf)
}

/// Read exactly `len` bytes.
pub async fn read_exact(
    stream: &mut TcpStream,
    len: usize,
    limit: Duration,
) -> Result<Vec<u8>, CrackError> {
    let mut buf = vec![0u8; len];
    timeout(limit, stream.read_exact(&mut buf))
        .await
        .map_err(|_| CrackError::timeout(limit))??;
    Ok(buf)
}
