use crate::cmd::Command;
use crate::reply::{self, Reply};
use crate::socket::Socket;
use crate::Error;

use bytes::{Buf, BytesMut};
use std::future::Future;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

/// 向 RESP 服务器发送命令并读取应答。
///
/// `Connection` 独占一个传输套接字，`disconnect` 之后不再持有任何套接字。
/// 它没有内部同步，同一时刻只应由一个调用方使用；命令与应答严格按调用顺序一一对应。
///
/// 读取应答时，`Connection` 使用内部缓冲区，不断填充直到缓冲了一个完整的应答（包括所有嵌套元素）。
/// 解析后剩余的数据保留在缓冲区中，供下一次 `read` 使用。
///
/// 读写超时由 `Connection` 在每次调用上施加；没有设置超时时，`read` 可能无限期阻塞。
#[derive(Debug)]
pub struct Connection<S = Socket> {
    // 套接字装饰了一个 `BufWriter`，提供写级别的缓冲。`disconnect` 之后为 `None`。
    stream: Option<BufWriter<S>>,

    // 用于读取应答的缓冲区。
    buffer: BytesMut,

    // 每次读、写操作的超时。
    timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// 创建一个新的 `Connection`，由 `socket` 支持。初始没有超时。
    pub fn new(socket: S) -> Connection<S> {
        Connection {
            stream: Some(BufWriter::new(socket)),
            // 默认使用 4KB 读取缓冲区，大的字符串块应答会按需增长。
            buffer: BytesMut::with_capacity(4 * 1024),
            timeout: None,
        }
    }

    /// 是否仍持有套接字。
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 设置之后每次读、写操作的超时。`None` 表示不设截止时间。
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// 关闭套接字。
    ///
    /// 关闭失败会被忽略：无论结果如何，之后 `is_connected` 都返回 `false`。可以重复调用。
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match deadline(self.timeout, stream.shutdown()).await {
                Ok(Ok(())) => debug!("connection closed"),
                Ok(Err(err)) => debug!(cause = %err, "error while closing connection"),
                Err(_) => debug!("timed out while closing connection"),
            }
        }
    }

    /// 将命令编码后完整写入套接字。
    ///
    /// 部分写入由 `write_all` 在内部重试，直到全部写完或发生不可恢复的 I/O 错误。
    /// 写入失败（包括超时）后命令可能只写出了一部分，连接随即被丢弃，之后的调用返回 `Error::NotConnected`。
    pub async fn write(&mut self, cmd: &Command) -> crate::Result<()> {
        let result = self.write_command(cmd).await;
        self.drop_on_error(&result);
        result
    }

    /// 从底层流中读取一个完整的应答。
    ///
    /// 服务器返回的错误作为 `Reply::Error` 正常返回，而不是 `Err`。
    /// 如果对端在一个完整的应答到达之前关闭了连接，返回 `Error::ConnectionReset`。
    ///
    /// 任何失败（超时、I/O 错误、协议错误）之后，流上的位置不再可知，连接随即被丢弃，
    /// 之后的调用返回 `Error::NotConnected`。
    pub async fn read(&mut self) -> crate::Result<Reply> {
        let result = self.read_reply().await;
        self.drop_on_error(&result);
        result
    }

    async fn write_command(&mut self, cmd: &Command) -> crate::Result<()> {
        let bytes = cmd.to_bytes();
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!(len = bytes.len(), "writing command");

        deadline(self.timeout, stream.write_all(&bytes)).await??;
        deadline(self.timeout, stream.flush()).await??;

        Ok(())
    }

    async fn read_reply(&mut self) -> crate::Result<Reply> {
        if self.stream.is_none() {
            return Err(Error::NotConnected);
        }

        loop {
            // 尝试从缓冲数据中解析一个应答。
            if let Some(reply) = self.parse_reply()? {
                trace!(buffered = self.buffer.len(), "read reply");
                return Ok(reply);
            }

            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

            // 缓冲区中没有足够的数据。从套接字中读取更多数据，`0` 表示“流结束”。
            if 0 == deadline(self.timeout, stream.read_buf(&mut self.buffer)).await?? {
                return Err(Error::ConnectionReset);
            }
        }
    }

    /// 读写失败后丢弃套接字与读缓冲区，避免下一次调用把应答与错误的命令配对。
    fn drop_on_error<T>(&mut self, result: &crate::Result<T>) {
        if let Err(err) = result {
            if self.stream.take().is_some() {
                debug!(cause = %err, "dropping connection after error");
            }
            self.buffer.clear();
        }
    }

    /// 写入命令并读取其应答。
    pub async fn call(&mut self, cmd: &Command) -> crate::Result<Reply> {
        self.write(cmd).await?;
        self.read().await
    }

    /// 尝试从缓冲区解析应答。如果尚未缓冲足够的数据，返回 `Ok(None)`。
    fn parse_reply(&mut self) -> crate::Result<Option<Reply>> {
        use reply::Error::Incomplete;

        let mut buf = Cursor::new(&self.buffer[..]);

        // 先确认缓冲了完整的应答，再分配结构去保存它。
        match Reply::check(&mut buf) {
            Ok(_) => {
                let len = buf.position() as usize;

                buf.set_position(0);
                let reply = Reply::parse(&mut buf)?;

                // 从读缓冲区中丢弃已解析的数据。
                self.buffer.advance(len);

                Ok(Some(reply))
            }
            // 预期中的运行时条件：等待更多数据。
            Err(Incomplete) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 在 `timeout` 内完成 `fut`，超时返回 `Error::Timeout`。`None` 表示不设截止时间。
pub(crate) async fn deadline<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> crate::Result<F::Output> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::Timeout),
        None => Ok(fut.await),
    }
}
