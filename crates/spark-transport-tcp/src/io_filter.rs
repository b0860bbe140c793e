//! 统一的 I/O 过滤器：对 TLS 与明文连接暴露同一套 `read`/`write_all`/`close` 接口。
//!
//! # 设计背景（Why）
//! - 读者状态机与写路径不应该关心连接是否加密；原始实现用 `wrap`/`unwrap`/
//!   `doneReading`/`close` 四个方法把 TLS 握手、加解密缓冲都封装在过滤器背后。
//!   在 Rust 里，`tokio-rustls` 的 `TlsStream` 本身就在流层面完成了这件事，所以
//!   这里的"过滤器"退化为一个双态枚举，按 `use_ssl` 配置在连接建立时选定，
//!   读写路径此后只看到统一接口。
//! - 握手完成后，读循环与写路径（同步写/推送者）分别运行在不同任务里，且
//!   写路径本身已经用共享锁串行化多个写者。若读、写共用同一把锁，读循环
//!   阻塞等待对端数据时会连带卡住所有写者，这条连接就失去了全双工能力。
//!   [`IoFilter::split`] 把流拆成独立的读半区与写半区：读半区整个生命周期
//!   只属于读循环任务，不需要加锁；写半区仍然放在共享锁后面供同步写与
//!   推送者竞争。
use std::io;
use tokio::io::{self as tio, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use tokio_rustls::TlsStream;

/// 明文或 TLS 承载的字节流，对上层暴露统一的读写/关闭接口。
pub enum IoFilter {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

/// 拆分后的只读半区，整个生命周期归读循环任务独占，不需要额外加锁。
pub enum IoReadHalf {
    Plain(OwnedReadHalf),
    #[cfg(feature = "tls")]
    Tls(Box<tio::ReadHalf<TlsStream<TcpStream>>>),
}

/// 拆分后的只写半区，由连接以共享锁的形式供同步写路径与推送者任务竞争。
pub enum IoWriteHalf {
    Plain(OwnedWriteHalf),
    #[cfg(feature = "tls")]
    Tls(Box<tio::WriteHalf<TlsStream<TcpStream>>>),
}

impl IoFilter {
    pub fn plain(stream: TcpStream) -> Self {
        IoFilter::Plain(stream)
    }

    /// 这条连接是否跑在 TLS 之上。写路径用它在分拆读写半区之前决定该连接是否
    /// 必须走阻塞同步写——TLS 写半区不支持非阻塞 `try_write`（见
    /// [`IoWriteHalf::try_write`]）。
    pub fn is_tls(&self) -> bool {
        match self {
            IoFilter::Plain(_) => false,
            #[cfg(feature = "tls")]
            IoFilter::Tls(_) => true,
        }
    }

    #[cfg(feature = "tls")]
    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        IoFilter::Tls(Box::new(stream))
    }

    /// 读取到 `buf`，语义与 `TcpStream::read` 一致：返回 0 表示对端已发送 EOF。
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            IoFilter::Plain(stream) => stream.read(buf).await,
            #[cfg(feature = "tls")]
            IoFilter::Tls(stream) => stream.read(buf).await,
        }
    }

    /// 写入全部 `buf`，内部处理部分写。
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            IoFilter::Plain(stream) => stream.write_all(buf).await,
            #[cfg(feature = "tls")]
            IoFilter::Tls(stream) => stream.write_all(buf).await,
        }
    }

    /// 优雅关闭：刷新底层缓冲并（对 TLS）发送 close_notify。
    pub async fn close(&mut self) -> io::Result<()> {
        match self {
            IoFilter::Plain(stream) => stream.shutdown().await,
            #[cfg(feature = "tls")]
            IoFilter::Tls(stream) => stream.shutdown().await,
        }
    }

    /// 拆分为独立的读/写半区。明文连接用 `TcpStream::into_split`，保留
    /// `try_write` 的非阻塞自旋能力；TLS 连接用通用的 `tokio::io::split`。
    pub fn split(self) -> (IoReadHalf, IoWriteHalf) {
        match self {
            IoFilter::Plain(stream) => {
                let (read, write) = stream.into_split();
                (IoReadHalf::Plain(read), IoWriteHalf::Plain(write))
            }
            #[cfg(feature = "tls")]
            IoFilter::Tls(stream) => {
                let (read, write) = tio::split(*stream);
                (IoReadHalf::Tls(Box::new(read)), IoWriteHalf::Tls(Box::new(write)))
            }
        }
    }
}

impl IoReadHalf {
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            IoReadHalf::Plain(half) => half.read(buf).await,
            #[cfg(feature = "tls")]
            IoReadHalf::Tls(half) => half.read(buf).await,
        }
    }
}

impl IoWriteHalf {
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            IoWriteHalf::Plain(half) => half.write_all(buf).await,
            #[cfg(feature = "tls")]
            IoWriteHalf::Tls(half) => half.write_all(buf).await,
        }
    }

    /// 尝试一次非阻塞写，返回写入的字节数；用于异步写路径的非阻塞自旋阶段。
    pub fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            IoWriteHalf::Plain(half) => half.try_write(buf),
            #[cfg(feature = "tls")]
            IoWriteHalf::Tls(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "non-blocking try_write is not supported over the TLS filter",
            )),
        }
    }

    /// 优雅关闭：刷新底层缓冲并（对 TLS）发送 close_notify。
    pub async fn close(&mut self) -> io::Result<()> {
        match self {
            IoWriteHalf::Plain(half) => half.shutdown().await,
            #[cfg(feature = "tls")]
            IoWriteHalf::Tls(half) => half.shutdown().await,
        }
    }
}
