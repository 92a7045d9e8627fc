//! 提供表示 RESP 应答的类型，以及从字节数组解析应答、将应答编码回字节的实用工具。
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;
use std::string::FromUtf8Error;

const CRLF: &[u8] = b"\r\n";

/// 服务器返回的一个完整应答。
///
/// `Bulk(None)` 与 `Multi(None)` 分别对应协议中的空字符串块（`$-1`）与空数组（`*-1`）。
/// `Multi` 的元素本身可以是 `Multi`，嵌套深度不受限制。解码、编码、比较、显示与释放
/// 都使用显式栈而不是递归，深度只受内存限制。
#[derive(Clone, Debug)]
pub enum Reply {
    Error(String),             // 服务器报告的错误，作为普通数据返回
    Status(String),            // 状态行
    Integer(i64),              // 整数
    Bulk(Option<Bytes>),       // 字符串块
    Multi(Option<Vec<Reply>>), // 数组
}

#[derive(Debug)]
pub enum Error {
    /// 不足以解析应答的数据
    Incomplete,

    /// 无法识别的类型字节
    UnknownType(u8),

    /// 类型字节合法，但其余内容无法解释
    Invalid(String),
}

impl Reply {
    /// 构造一个非空的字符串块应答。
    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(Some(data.into()))
    }

    /// 构造一个非空的数组应答。
    pub fn multi(items: Vec<Reply>) -> Reply {
        Reply::Multi(Some(items))
    }

    /// 服务器是否以错误应答。
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// 将 `Error` 应答转换为 `Err`，其他应答原样返回。
    ///
    /// 读取应答时不会自动这样做：调用方需要能够区分“服务器回答了一个错误”与“传输或协议失败”。
    pub fn into_result(mut self) -> Result<Reply, String> {
        if let Reply::Error(msg) = &mut self {
            return Err(std::mem::take(msg));
        }

        Ok(self)
    }

    /// 检查是否可以从 `src` 解码一个完整的应答（包括其所有嵌套元素）。
    ///
    /// 成功时游标停在该应答之后。
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        // 每个未完成的数组还差多少个元素
        let mut pending: Vec<usize> = Vec::new();

        'check: loop {
            match get_u8(src)? {
                b'-' | b'+' => {
                    get_line(src)?;
                }
                b':' => {
                    get_decimal(src)?;
                }
                b'$' => {
                    if let Some(len) = get_length(src)? {
                        // 负载不扫描 CR/LF，随后固定跳过 2 字节 (\r\n)。
                        skip(src, len)?;
                        skip(src, 2)?;
                    }
                }
                b'*' => {
                    if let Some(len) = get_length(src)? {
                        if len > 0 {
                            pending.push(len);
                            continue 'check;
                        }
                    }
                }
                actual => return Err(Error::UnknownType(actual)),
            }

            // 一个值已完整。已填满的数组本身也是上一层的一个值。
            while let Some(remaining) = pending.pop() {
                if remaining > 1 {
                    pending.push(remaining - 1);
                    continue 'check;
                }
            }

            return Ok(());
        }
    }

    /// 从 `src` 解析一个应答。通常先用 `check` 确认数据已经完整。
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Reply, Error> {
        // 未完成的数组：还差的元素个数，以及已解析的元素
        let mut stack: Vec<(usize, Vec<Reply>)> = Vec::new();

        'parse: loop {
            let mut reply = match get_u8(src)? {
                b'-' => Reply::Error(get_text(src)?),
                b'+' => Reply::Status(get_text(src)?),
                b':' => Reply::Integer(get_decimal(src)?),
                b'$' => match get_length(src)? {
                    None => Reply::Bulk(None),
                    Some(len) => {
                        if src.remaining() < len {
                            return Err(Error::Incomplete);
                        }

                        let data = Bytes::copy_from_slice(&src.chunk()[..len]);

                        // 跳过负载以及其后的 \r\n
                        skip(src, len)?;
                        skip(src, 2)?;

                        Reply::Bulk(Some(data))
                    }
                },
                b'*' => match get_length(src)? {
                    None => Reply::Multi(None),
                    Some(0) => Reply::Multi(Some(Vec::new())),
                    Some(len) => {
                        // 每个元素至少占用一个字节，容量不会超过剩余数据量
                        let items = Vec::with_capacity(len.min(src.remaining()));
                        stack.push((len, items));
                        continue 'parse;
                    }
                },
                actual => return Err(Error::UnknownType(actual)),
            };

            while let Some((remaining, mut items)) = stack.pop() {
                items.push(reply);

                if remaining > 1 {
                    stack.push((remaining - 1, items));
                    continue 'parse;
                }

                reply = Reply::Multi(Some(items));
            }

            return Ok(reply);
        }
    }

    /// 将应答按线路格式追加到 `dst`。这是 `parse` 的逆操作。
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut stack = vec![std::slice::from_ref(self).iter()];

        while let Some(iter) = stack.last_mut() {
            let reply = match iter.next() {
                Some(reply) => reply,
                None => {
                    stack.pop();
                    continue;
                }
            };

            match reply {
                Reply::Error(msg) => {
                    dst.put_u8(b'-');
                    dst.put_slice(msg.as_bytes());
                    dst.put_slice(CRLF);
                }
                Reply::Status(text) => {
                    dst.put_u8(b'+');
                    dst.put_slice(text.as_bytes());
                    dst.put_slice(CRLF);
                }
                Reply::Integer(val) => {
                    dst.put_u8(b':');
                    put_decimal(dst, *val);
                }
                Reply::Bulk(None) => dst.put_slice(b"$-1\r\n"),
                Reply::Bulk(Some(data)) => {
                    dst.put_u8(b'$');
                    put_decimal(dst, data.len() as i64);
                    dst.put_slice(data);
                    dst.put_slice(CRLF);
                }
                Reply::Multi(None) => dst.put_slice(b"*-1\r\n"),
                Reply::Multi(Some(items)) => {
                    dst.put_u8(b'*');
                    put_decimal(dst, items.len() as i64);
                    stack.push(items.iter());
                }
            }
        }
    }

    fn fmt_multi(fmt: &mut fmt::Formatter, items: &[Reply]) -> fmt::Result {
        // 每层：元素迭代器与该层的缩进
        let mut stack = vec![(items.iter().enumerate(), 0)];

        while let Some((iter, indent)) = stack.last_mut() {
            let indent = *indent;

            let (i, item) = match iter.next() {
                Some(next) => next,
                None => {
                    stack.pop();
                    continue;
                }
            };

            if i > 0 {
                write!(fmt, "\n{:indent$}", "", indent = indent)?;
            }

            let prefix = format!("{}) ", i + 1);
            fmt.write_str(&prefix)?;

            match item {
                Reply::Multi(Some(inner)) if !inner.is_empty() => {
                    stack.push((inner.iter().enumerate(), indent + prefix.len()));
                }
                _ => fmt::Display::fmt(item, fmt)?,
            }
        }

        Ok(())
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        // 先把嵌套数组摊平到一个栈里，避免逐层递归释放
        if let Reply::Multi(Some(items)) = self {
            let mut stack = std::mem::take(items);

            while let Some(mut reply) = stack.pop() {
                if let Reply::Multi(Some(inner)) = &mut reply {
                    stack.append(inner);
                }
            }
        }
    }
}

impl PartialEq for Reply {
    fn eq(&self, other: &Reply) -> bool {
        let mut stack = vec![(self, other)];

        while let Some(pair) = stack.pop() {
            match pair {
                (Reply::Error(a), Reply::Error(b)) | (Reply::Status(a), Reply::Status(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Reply::Integer(a), Reply::Integer(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Reply::Bulk(a), Reply::Bulk(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Reply::Multi(None), Reply::Multi(None)) => {}
                (Reply::Multi(Some(a)), Reply::Multi(Some(b))) => {
                    if a.len() != b.len() {
                        return false;
                    }

                    stack.extend(a.iter().zip(b.iter()));
                }
                _ => return false,
            }
        }

        true
    }
}

impl Eq for Reply {}

impl PartialEq<&str> for Reply {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Reply::Status(s) => s.eq(other),
            Reply::Bulk(Some(s)) => s.eq(other),
            _ => false,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use std::str;

        match self {
            Reply::Error(msg) => write!(fmt, "(error) {}", msg),
            Reply::Status(text) => fmt.write_str(text),
            Reply::Integer(num) => write!(fmt, "(integer) {}", num),
            Reply::Bulk(Some(data)) => match str::from_utf8(data) {
                Ok(string) => write!(fmt, "\"{}\"", string),
                Err(_) => write!(fmt, "{:?}", data),
            },
            Reply::Bulk(None) | Reply::Multi(None) => fmt.write_str("(nil)"),
            Reply::Multi(Some(items)) if items.is_empty() => fmt.write_str("(empty array)"),
            Reply::Multi(Some(items)) => Reply::fmt_multi(fmt, items),
        }
    }
}

/// 以十进制写入整数并追加 \r\n
pub(crate) fn put_decimal(dst: &mut BytesMut, val: i64) {
    dst.put_slice(val.to_string().as_bytes());
    dst.put_slice(CRLF);
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    src.advance(n);
    Ok(())
}

/// 读取以新行终止的有符号十进制数
fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    use atoi::atoi;

    let line = get_line(src)?;

    atoi::<i64>(line).ok_or_else(|| "protocol error; invalid integer".into())
}

/// 读取字符串块或数组的长度。`-1` 表示空值。
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    match get_decimal(src)? {
        -1 => Ok(None),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| format!("protocol error; invalid length {}", len).into()),
    }
}

/// 读取一行文本并去掉首尾的 ASCII 空白与 NUL
fn get_text(src: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let line = get_line(src)?.to_vec();
    let string = String::from_utf8(line)?;

    Ok(string
        .trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
        .to_string())
}

/// 查找以 \r\n 结尾的行，返回不含 \r\n 的内容
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let len = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)?;

    // 找到一行，更新位置到 \n 之后
    src.set_position((start + len + 2) as u64);

    Ok(&buf[start..start + len])
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Invalid(src)
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "protocol error; invalid UTF-8 line".into()
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Incomplete => fmt.write_str("stream ended early"),
            Error::UnknownType(byte) => {
                write!(fmt, "protocol error; invalid reply type byte `{}`", *byte as char)
            }
            Error::Invalid(msg) => fmt.write_str(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 与 `Connection` 相同的方式解析：先 `check`，再从头 `parse`。
    fn decode(src: &[u8]) -> Result<(Reply, usize), Error> {
        let mut buf = Cursor::new(src);
        Reply::check(&mut buf)?;
        let len = buf.position() as usize;

        buf.set_position(0);
        let reply = Reply::parse(&mut buf)?;
        assert_eq!(buf.position() as usize, len);

        Ok((reply, len))
    }

    fn reply(src: &[u8]) -> Reply {
        decode(src).unwrap().0
    }

    #[test]
    fn status_and_error_lines() {
        assert_eq!(reply(b"+OK\r\n"), Reply::Status("OK".into()));
        assert_eq!(reply(b"-ERR bad\r\n"), Reply::Error("ERR bad".into()));
        assert_eq!(reply(b"+  padded \t\r\n"), Reply::Status("padded".into()));
    }

    #[test]
    fn integers() {
        assert_eq!(reply(b":1000\r\n"), Reply::Integer(1000));
        assert_eq!(reply(b":-5\r\n"), Reply::Integer(-5));
        assert_eq!(
            reply(b":9223372036854775807\r\n"),
            Reply::Integer(i64::MAX)
        );
    }

    #[test]
    fn bulk_replies() {
        assert_eq!(reply(b"$-1\r\n"), Reply::Bulk(None));
        assert_eq!(reply(b"$6\r\nfoobar\r\n"), Reply::bulk("foobar"));
        assert_eq!(reply(b"$0\r\n\r\n"), Reply::bulk(""));
    }

    #[test]
    fn bulk_payload_is_binary_safe() {
        let (reply, len) = decode(b"$4\r\n\r\n\0\xff\r\n").unwrap();
        assert_eq!(reply, Reply::bulk(&b"\r\n\0\xff"[..]));
        assert_eq!(len, 10);
    }

    #[test]
    fn null_bulk_reads_no_trailer() {
        let src = b"$-1\r\n:1\r\n";
        let (reply, len) = decode(src).unwrap();
        assert_eq!(reply, Reply::Bulk(None));
        assert_eq!(len, 5);
    }

    #[test]
    fn arrays() {
        assert_eq!(reply(b"*-1\r\n"), Reply::Multi(None));
        assert_eq!(reply(b"*0\r\n"), Reply::multi(vec![]));
        assert_eq!(
            reply(b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"),
            Reply::multi(vec![Reply::bulk("foo"), Reply::bulk("bar")])
        );
        assert_eq!(
            reply(b"*3\r\n:1\r\n$-1\r\n*1\r\n+x\r\n"),
            Reply::multi(vec![
                Reply::Integer(1),
                Reply::Bulk(None),
                Reply::multi(vec![Reply::Status("x".into())]),
            ])
        );
    }

    #[test]
    fn consumes_exactly_one_reply() {
        let src = b"*1\r\n:7\r\n+NEXT\r\n";
        let (reply, len) = decode(src).unwrap();
        assert_eq!(reply, Reply::multi(vec![Reply::Integer(7)]));
        assert_eq!(&src[len..], b"+NEXT\r\n");
    }

    #[test]
    fn unknown_type_byte() {
        match decode(b"@x\r\n") {
            Err(Error::UnknownType(b'@')) => {}
            other => panic!("unexpected {:?}", other),
        }

        // 嵌套元素中的未知类型同样失败
        match decode(b"*2\r\n:1\r\n!x\r\n") {
            Err(Error::UnknownType(b'!')) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_lengths_and_integers() {
        assert!(matches!(decode(b"$-2\r\n"), Err(Error::Invalid(_))));
        assert!(matches!(decode(b"*-7\r\n"), Err(Error::Invalid(_))));
        assert!(matches!(decode(b":\r\n"), Err(Error::Invalid(_))));
        assert!(matches!(decode(b"+\xff\xfe\r\n"), Err(Error::Invalid(_))));
    }

    #[test]
    fn partial_input_is_incomplete() {
        let full: &[u8] = b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";

        for end in 0..full.len() {
            assert!(
                matches!(decode(&full[..end]), Err(Error::Incomplete)),
                "prefix of {} bytes",
                end
            );
        }

        // 行尾只有 \r 时不算完整的一行
        assert!(matches!(decode(b"+OK\r"), Err(Error::Incomplete)));
        assert!(matches!(decode(b"+OK\n"), Err(Error::Incomplete)));
    }

    #[test]
    fn nested_arrays_of_any_depth() {
        for depth in 0..64 {
            let mut expected = Reply::bulk(format!("leaf-{}", depth));
            for level in 0..depth {
                expected = Reply::multi(vec![
                    Reply::Integer(level as i64),
                    expected,
                    Reply::Multi(None),
                ]);
            }

            let mut buf = BytesMut::new();
            expected.encode(&mut buf);

            let (actual, len) = decode(&buf[..]).unwrap();
            assert_eq!(actual, expected);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn deeply_nested_arrays() {
        let depth = 100_000;

        let mut src = b"*1\r\n".repeat(depth);
        src.extend_from_slice(b":1\r\n");

        let mut expected = Reply::Integer(1);
        for _ in 0..depth {
            expected = Reply::multi(vec![expected]);
        }

        let (actual, len) = decode(&src).unwrap();
        assert_eq!(len, src.len());
        assert!(actual == expected);

        let mut buf = BytesMut::new();
        expected.encode(&mut buf);
        assert_eq!(&buf[..], &src[..]);

        let mut wide = BytesMut::new();
        Reply::multi(vec![expected, actual]).encode(&mut wide);
        assert_eq!(wide.len(), 4 + 2 * src.len());
    }

    #[test]
    fn deeply_nested_incomplete_and_invalid() {
        let src = b"*1\r\n".repeat(100_000);
        assert!(matches!(decode(&src), Err(Error::Incomplete)));

        let mut bad = src.clone();
        bad.extend_from_slice(b"?\r\n");
        assert!(matches!(decode(&bad), Err(Error::UnknownType(b'?'))));
    }

    #[test]
    fn deeply_nested_display() {
        let mut reply = Reply::bulk("x");
        for _ in 0..100_000 {
            reply = Reply::multi(vec![reply]);
        }

        let text = reply.to_string();
        assert!(text.starts_with("1) 1) 1) "));
        assert!(text.ends_with("\"x\""));
    }

    #[test]
    fn text_trims_ascii_whitespace_and_nul() {
        assert_eq!(reply(b"+\0 OK\t\0\r\n"), Reply::Status("OK".into()));
        // 非 ASCII 空白保留
        assert_eq!(
            reply("-\u{3000}ERR\u{3000}\r\n".as_bytes()),
            Reply::Error("\u{3000}ERR\u{3000}".into())
        );
    }

    #[test]
    fn encode_matches_wire_format() {
        let mut buf = BytesMut::new();
        Reply::multi(vec![
            Reply::Status("OK".into()),
            Reply::Error("ERR no".into()),
            Reply::Integer(-3),
            Reply::Bulk(None),
            Reply::bulk("hi"),
            Reply::Multi(None),
        ])
        .encode(&mut buf);

        assert_eq!(
            &buf[..],
            &b"*6\r\n+OK\r\n-ERR no\r\n:-3\r\n$-1\r\n$2\r\nhi\r\n*-1\r\n"[..]
        );
    }

    #[test]
    fn error_reply_helpers() {
        let err = Reply::Error("ERR bad".into());
        assert!(err.is_error());
        assert_eq!(err.into_result(), Err("ERR bad".to_string()));
        assert_eq!(Reply::Integer(1).into_result(), Ok(Reply::Integer(1)));
    }

    #[test]
    fn display() {
        assert_eq!(Reply::Status("OK".into()).to_string(), "OK");
        assert_eq!(Reply::Integer(3).to_string(), "(integer) 3");
        assert_eq!(Reply::Bulk(None).to_string(), "(nil)");
        assert_eq!(Reply::multi(vec![]).to_string(), "(empty array)");
        assert_eq!(
            Reply::multi(vec![
                Reply::multi(vec![Reply::bulk("a"), Reply::bulk("b")]),
                Reply::bulk("c"),
            ])
            .to_string(),
            "1) 1) \"a\"\n   2) \"b\"\n2) \"c\""
        );
    }

    #[test]
    fn compares_with_str() {
        assert!(Reply::Status("OK".into()) == "OK");
        assert!(Reply::bulk("bar") == "bar");
        assert!(Reply::Error("OK".into()) != "OK");
    }
}
