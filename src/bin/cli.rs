//! mini-resp 命令行客户端。
//!
//! 向服务器发送一条命令并打印应答。使用 `clap` crate 进行参数解析。

use mini_resp::{connect, Command, Config, DEFAULT_PORT};

use clap::Parser;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "otel")]
// 用于设置 XrayPropagator
use opentelemetry::global;
#[cfg(feature = "otel")]
// 用于配置某些选项，如采样率
use opentelemetry::sdk::trace as sdktrace;
#[cfg(feature = "otel")]
// 用于在服务之间传递相同的 XrayId
use opentelemetry_aws::trace::XrayPropagator;
#[cfg(feature = "otel")]
// `Ext` traits 用于允许 Registry 接受 OpenTelemetry 特定类型（如 `OpenTelemetryLayer`）
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[clap(
    name = "mini-resp-cli",
    version,
    author,
    about = "发送一条 RESP 命令并打印应答"
)]
struct Cli {
    #[clap(name = "hostname", long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// unix 域套接字路径。指定后忽略 hostname 与 port
    #[clap(long)]
    socket: Option<PathBuf>,

    /// 建连与读写超时（毫秒），0 表示不设超时
    #[clap(long, value_parser = duration_from_ms_str, default_value = "5000")]
    timeout: Duration,

    /// 命令名及其参数
    #[clap(required = true)]
    command: Vec<String>,
}

/// CLI 工具的入口点。
///
/// 在这里使用 `flavor = "current_thread"` 是为了避免生成后台线程：每次只处理一个连接。
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), BoxError> {
    set_up_logging()?;

    let cli = Cli::parse();

    let config = match cli.socket {
        Some(path) => Config::unix(path),
        None => Config::tcp(cli.host, cli.port),
    };
    let timeout = Some(cli.timeout).filter(|timeout| !timeout.is_zero());
    let config = config.with_timeout(timeout);

    let command = Command::from_args(cli.command)?;

    // 建立连接
    let mut conn = connect(&config).await?;

    let reply = conn.call(&command).await;
    conn.disconnect().await;

    println!("{}", reply?);

    Ok(())
}

fn duration_from_ms_str(src: &str) -> Result<Duration, ParseIntError> {
    let ms = src.parse::<u64>()?;
    Ok(Duration::from_millis(ms))
}

#[cfg(not(feature = "otel"))]
fn set_up_logging() -> Result<(), BoxError> {
    // 有关更多信息，请参阅 https://docs.rs/tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
}

#[cfg(feature = "otel")]
fn set_up_logging() -> Result<(), BoxError> {
    // 将全局传播器设置为 X-Ray 传播器
    global::set_text_map_propagator(XrayPropagator::default());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(
            sdktrace::config()
                .with_sampler(sdktrace::Sampler::AlwaysOn)
                // 为了将跟踪 ID 转换为与 Xray 兼容的格式，需要此项
                .with_id_generator(sdktrace::XrayIdGenerator::default()),
        )
        .install_simple()?;

    // 使用配置的追踪器创建一个追踪层
    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    // 从 `RUST_LOG` 环境变量中解析 `EnvFilter` 配置
    let filter = EnvFilter::from_default_env();

    tracing_subscriber::registry()
        .with(opentelemetry)
        .with(filter)
        .with(fmt::Layer::default().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
