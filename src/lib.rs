//! 一个极简的 RESP（Redis 序列化协议）客户端核心。
//!
//! 该库负责在有限的截止时间内建立传输连接、把命令编码为线路格式，以及从字节流中解析应答
//! （状态、错误、整数、字符串块，以及可递归嵌套的数组）。更高层的命令 API、连接池、
//! 流水线与发布/订阅都不在这里实现，由调用方负责。
//!
//! # 布局
//!
//! 主要组件有：
//!
//! * `connector`：解析目标地址，以非阻塞方式打开套接字，并在超时内完成建连，产生一个 `Connection`。
//!
//! * `connection`：持有套接字与超时设置，提供 `write`、`read`、`disconnect` 等生命周期操作。
//!
//! * `cmd`：将有序的二进制安全参数编码为字符串块数组。
//!
//! * `reply`：表示单个应答，并提供按类型字节分派、递归解析嵌套数组的解码器。
//!
//! ```no_run
//! use mini_resp::{connect, Command, Config};
//!
//! # async fn run() -> mini_resp::Result<()> {
//! let mut conn = connect(&Config::tcp("127.0.0.1", 6379)).await?;
//!
//! conn.write(&Command::new("SET").arg("a").arg("b")).await?;
//! let reply = conn.read().await?;
//! println!("{}", reply);
//!
//! conn.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! 该库只支持 unix 平台：unix 域套接字与基于文件描述符的就绪等待都依赖它。

pub mod cmd;
pub use cmd::{build_command, Command, IntoArg};

pub mod config;
pub use config::{Config, Scheme, Target};

mod connection;
pub use connection::Connection;

mod connector;
pub use connector::{connect, connect_target};

pub mod reply;
pub use reply::Reply;

mod socket;
pub use socket::Socket;

use std::io;
use thiserror::Error as ThisError;

/// Redis 服务器监听的默认端口。
///
/// 如果没有指定端口，将使用此端口。
pub const DEFAULT_PORT: u16 = 6379;

/// 大多数函数返回的错误类型。
///
/// 服务器报告的错误不在这里：它们作为 `Reply::Error` 通过正常的应答通道返回。
/// 解析过程中“数据不足”的情况只在 `reply` 内部出现，不会暴露给调用方。
#[derive(Debug, ThisError)]
pub enum Error {
    /// 地址解析失败，或套接字层面的连接失败。
    #[error("connect error: {0}")]
    Connect(#[source] io::Error),

    /// 建连等待或一次读写超过了超时。
    #[error("timed out")]
    Timeout,

    /// 无法识别的应答类型字节。
    #[error("protocol error; invalid reply type byte `{}`", char::from(*.0))]
    Protocol(u8),

    /// 类型字节合法，但应答内容无法解释。
    #[error("{0}")]
    InvalidReply(String),

    #[error("command must have at least one argument")]
    EmptyCommand,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("connection is not established")]
    NotConnected,

    /// 对端在一个完整的应答到达之前关闭了连接。
    #[error("connection reset by peer")]
    ConnectionReset,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<reply::Error> for Error {
    fn from(src: reply::Error) -> Error {
        match src {
            reply::Error::UnknownType(byte) => Error::Protocol(byte),
            reply::Error::Invalid(msg) => Error::InvalidReply(msg),
            reply::Error::Incomplete => Error::ConnectionReset,
        }
    }
}

/// 用于 mini-resp 操作的专用 `Result` 类型。
///
/// 这被定义为一种方便。
pub type Result<T> = std::result::Result<T, Error>;
