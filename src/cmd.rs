//! 命令的表示以及到线路格式的编码。
//!
//! 命令在线路上总是编码为字符串块数组：`*<n>\r\n`，随后每个参数编码为 `$<len>\r\n<bytes>\r\n`。
//! 参数是不透明的字节序列，由于有长度前缀，不需要任何转义。
use crate::reply::put_decimal;
use crate::Error;

use bytes::{BufMut, Bytes, BytesMut};

/// 可以作为命令参数发送的值。
///
/// 非字符串值（整数、浮点数）按其十进制文本形式发送，服务器会自行解析。
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(&self[..])
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for f64 {
    fn into_arg(self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

macro_rules! int_args {
    ($($ty:ty),*) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

int_args!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// 一条命令：有序的、二进制安全的参数序列。
///
/// 第一个参数是命令名。`Command` 由构造保证至少包含一个参数。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// 以命令名创建一条新命令。
    ///
    /// ```
    /// use mini_resp::Command;
    ///
    /// let cmd = Command::new("SET").arg("key").arg(42);
    /// assert_eq!(&cmd.to_bytes()[..], &b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$2\r\n42\r\n"[..]);
    /// ```
    pub fn new(name: impl IntoArg) -> Command {
        Command {
            args: vec![name.into_arg()],
        }
    }

    /// 从参数列表创建命令。列表为空时返回 `Error::EmptyCommand`。
    pub fn from_args<I>(args: I) -> crate::Result<Command>
    where
        I: IntoIterator,
        I::Item: IntoArg,
    {
        let args: Vec<Bytes> = args.into_iter().map(IntoArg::into_arg).collect();

        if args.is_empty() {
            return Err(Error::EmptyCommand);
        }

        Ok(Command { args })
    }

    /// 追加一个参数。
    pub fn arg(mut self, arg: impl IntoArg) -> Command {
        self.args.push(arg.into_arg());
        self
    }

    /// 将一组参数按顺序展开追加到命令中。
    pub fn extend<I>(mut self, args: I) -> Command
    where
        I: IntoIterator,
        I::Item: IntoArg,
    {
        self.args.extend(args.into_iter().map(IntoArg::into_arg));
        self
    }

    /// 命令名，即第一个参数。
    pub fn name(&self) -> &Bytes {
        &self.args[0]
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// 按线路格式编码命令。
    pub fn to_bytes(&self) -> Bytes {
        encode(&self.args)
    }
}

/// 将有序参数列表编码为线路格式。
///
/// 空列表不是合法命令，返回 `Error::EmptyCommand`。
pub fn build_command<A: AsRef<[u8]>>(args: &[A]) -> crate::Result<Bytes> {
    if args.is_empty() {
        return Err(Error::EmptyCommand);
    }

    Ok(encode(args))
}

fn encode<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    // 每个参数的头部（`$<len>\r\n`）加尾部 \r\n 不超过 24 字节
    let capacity = 24 + args.iter().map(|arg| arg.as_ref().len() + 24).sum::<usize>();
    let mut dst = BytesMut::with_capacity(capacity);

    dst.put_u8(b'*');
    put_decimal(&mut dst, args.len() as i64);

    for arg in args {
        let arg = arg.as_ref();

        dst.put_u8(b'$');
        put_decimal(&mut dst, arg.len() as i64);
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }

    dst.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_array_of_bulk_strings() {
        let bytes = build_command(&["SET", "a", "b"]).unwrap();
        assert_eq!(&bytes[..], &b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n"[..]);
    }

    #[test]
    fn arguments_are_binary_safe() {
        let args: [&[u8]; 2] = [b"SET", b"\r\n\0\xff"];
        let bytes = build_command(&args).unwrap();
        assert_eq!(&bytes[..], &b"*2\r\n$3\r\nSET\r\n$4\r\n\r\n\0\xff\r\n"[..]);
    }

    #[test]
    fn empty_arguments_are_encoded_with_zero_length() {
        let bytes = build_command(&["ECHO", ""]).unwrap();
        assert_eq!(&bytes[..], &b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n"[..]);
    }

    #[test]
    fn empty_command_is_rejected() {
        let args: [&str; 0] = [];
        assert!(matches!(build_command(&args), Err(Error::EmptyCommand)));
        assert!(matches!(
            Command::from_args(Vec::<String>::new()),
            Err(Error::EmptyCommand)
        ));
    }

    #[test]
    fn non_string_arguments_use_decimal_text() {
        let cmd = Command::new("INCRBYFLOAT").arg("k").arg(1.5).arg(-3i64).arg(7usize);
        let args: Vec<&[u8]> = cmd.args().iter().map(|a| &a[..]).collect();
        assert_eq!(
            args,
            vec![&b"INCRBYFLOAT"[..], &b"k"[..], &b"1.5"[..], &b"-3"[..], &b"7"[..]]
        );
    }

    #[test]
    fn extend_flattens_in_order() {
        let cmd = Command::new("DEL")
            .extend(vec!["a", "b"])
            .arg("c")
            .extend(vec![b"d".to_vec()]);

        assert_eq!(cmd.name(), "DEL");
        assert_eq!(
            cmd.to_bytes(),
            build_command(&["DEL", "a", "b", "c", "d"]).unwrap()
        );
    }

    #[test]
    fn from_args_matches_builder() {
        let cmd = Command::from_args(vec!["GET", "key"]).unwrap();
        assert_eq!(cmd, Command::new("GET").arg("key"));
    }
}
