//! 建立到目标的连接。
//!
//! TCP 目标只解析 IPv4 地址，打开一个非阻塞套接字并立即尝试连接。如果连接报告“进行中”，
//! 则等待套接字可读或可写，等待受 `timeout` 限制，就绪后再次调用 connect 以取得结果。
//!
//! unix 域目标直接连接，连接这一步不施加超时。
use crate::config::{Config, Target};
use crate::connection::Connection;
use crate::socket::Socket;
use crate::Error;

use socket2::{Domain, Protocol, SockAddr, SockRef, Type};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::{lookup_host, TcpStream, UnixStream};
use tokio::time::{self, Instant};
use tracing::{debug, instrument};

/// 按照 `config` 建立连接，并将 `config.timeout` 设为连接的读写超时。
pub async fn connect(config: &Config) -> crate::Result<Connection> {
    let target = config.target()?;
    connect_target(&target, config.timeout).await
}

/// 连接到 `target`。
///
/// `timeout` 限制 TCP 建连的等待时间（超时返回 `Error::Timeout`），并作为连接的读写超时。
#[instrument(level = "debug", skip(target, timeout), fields(addr = %target))]
pub async fn connect_target(
    target: &Target,
    timeout: Option<Duration>,
) -> crate::Result<Connection> {
    let socket = match target {
        Target::Tcp { host, port } => Socket::Tcp(connect_tcp(host, *port, timeout).await?),
        Target::UnixPath { path } => {
            Socket::Unix(UnixStream::connect(path).await.map_err(Error::Connect)?)
        }
    };

    debug!("connected");

    let mut connection = Connection::new(socket);
    connection.set_timeout(timeout);
    Ok(connection)
}

async fn connect_tcp(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> crate::Result<TcpStream> {
    let addr = resolve_ipv4(host, port).await?;
    let sockaddr = SockAddr::from(addr);

    let socket = socket2::Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(Error::Connect)?;
    socket.set_nonblocking(true).map_err(Error::Connect)?;

    let pending = match socket.connect(&sockaddr) {
        Ok(()) => {
            debug!(%addr, "connect completed immediately");
            false
        }
        Err(err) if in_progress(&err) => {
            debug!(%addr, "connect in progress, waiting for readiness");
            true
        }
        Err(err) => return Err(Error::Connect(err)),
    };

    // 注册到 Tokio 的反应器上，之后的就绪等待由它完成。
    let stream = TcpStream::from_std(socket.into()).map_err(Error::Connect)?;

    if pending {
        wait_connected(&stream, &sockaddr, timeout).await?;
    }

    Ok(stream)
}

/// 等待进行中的连接完成，再次调用 connect 取得结果。
async fn wait_connected(
    stream: &TcpStream,
    addr: &SockAddr,
    timeout: Option<Duration>,
) -> crate::Result<()> {
    let interest = Interest::READABLE | Interest::WRITABLE;
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        let ready = match deadline {
            Some(deadline) => time::timeout_at(deadline, stream.ready(interest))
                .await
                .map_err(|_| Error::Timeout)?,
            None => stream.ready(interest).await,
        };
        ready.map_err(Error::Connect)?;

        // 仍在进行中时报告 `WouldBlock`，由 `try_io` 清除就绪状态后继续等待同一个截止时间。
        let result = stream.try_io(interest, || match SockRef::from(stream).connect(addr) {
            Err(err) if in_progress(&err) => Err(io::ErrorKind::WouldBlock.into()),
            other => other,
        });

        match result {
            Ok(()) => return Ok(()),
            // 已经连接上，视为成功。
            Err(err) if err.raw_os_error() == Some(libc::EISCONN) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
            Err(err) => return Err(Error::Connect(err)),
        }
    }
}

fn in_progress(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EALREADY)
    )
}

/// 解析 `host`，只取第一个 IPv4 地址。
async fn resolve_ipv4(host: &str, port: u16) -> crate::Result<SocketAddrV4> {
    let addrs = lookup_host((host, port)).await.map_err(Error::Connect)?;

    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(addr) => Some(addr),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| {
            Error::Connect(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IPv4 address found for `{}`", host),
            ))
        })
}
