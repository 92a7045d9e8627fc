//! 连接配置以及由配置解析出的连接目标。
use crate::{Error, DEFAULT_PORT};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 未指定超时时使用的默认超时。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// 传输方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Unix,
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(src: &str) -> Result<Scheme, Error> {
        match src {
            "tcp" => Ok(Scheme::Tcp),
            "unix" => Ok(Scheme::Unix),
            other => Err(Error::InvalidConfig(format!("unknown scheme `{}`", other))),
        }
    }
}

/// 可识别的连接选项。
///
/// `host`/`port` 在 `scheme` 为 `Tcp` 时使用，`path` 在 `scheme` 为 `Unix` 时使用。
/// `timeout` 限制 TCP 建连的时间，并作为连接的读写超时；`None` 表示不设截止时间。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Config {
    /// 连接到 `host:port` 的 TCP 配置。
    pub fn tcp(host: impl Into<String>, port: u16) -> Config {
        Config {
            host: host.into(),
            port,
            ..Config::default()
        }
    }

    /// 连接到 unix 域套接字 `path` 的配置。
    pub fn unix(path: impl Into<PathBuf>) -> Config {
        Config {
            scheme: Scheme::Unix,
            path: Some(path.into()),
            ..Config::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Config {
        self.timeout = timeout;
        self
    }

    /// 将配置解析为连接目标。每次建连只解析一次。
    pub fn target(&self) -> crate::Result<Target> {
        match self.scheme {
            Scheme::Tcp => Ok(Target::Tcp {
                host: self.host.clone(),
                port: self.port,
            }),
            Scheme::Unix => match &self.path {
                Some(path) => Ok(Target::UnixPath { path: path.clone() }),
                None => Err(Error::InvalidConfig(
                    "unix scheme requires a socket path".into(),
                )),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            scheme: Scheme::Tcp,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            path: None,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// 一次建连尝试的目标地址。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Tcp { host: String, port: u16 },
    UnixPath { path: PathBuf },
}

impl fmt::Display for Target {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Target::Tcp { host, port } => write!(fmt, "tcp://{}:{}", host, port),
            Target::UnixPath { path } => write!(fmt, "unix://{}", path.display()),
        }
    }
}
