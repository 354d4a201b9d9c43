//! Minimal RESP client plumbing for the queue-depth probe.
//!
//! Commands go out in the inline format (space-separated words, CRLF
//! terminated), which every Redis server accepts. Replies are parsed for
//! the four shapes our commands can produce: simple strings, errors,
//! integers, and bulk strings. Arrays never occur for TYPE/LLEN/ZCARD.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
}

/// Encode an inline command: `["LLEN", "jobs"]` → `LLEN jobs\r\n`.
pub(crate) fn encode_inline(parts: &[&str]) -> Vec<u8> {
    let mut out = parts.join(" ").into_bytes();
    out.extend_from_slice(b"\r\n");
    out
}

/// Read and parse a single reply from the stream.
pub(crate) async fn read_reply<R>(reader: &mut R) -> io::Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-reply",
        ));
    }
    let line = line.trim_end_matches(['\r', '\n']);
    let (prefix, rest) = match line.split_at_checked(1) {
        Some(split) => split,
        None => {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "empty reply"));
        }
    };

    match prefix {
        "+" => Ok(Reply::Simple(rest.to_string())),
        "-" => Ok(Reply::Error(rest.to_string())),
        ":" => rest
            .parse::<i64>()
            .map(Reply::Integer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            // Payload plus trailing CRLF.
            let mut buf = vec![0u8; len as usize + 2];
            reader.read_exact(&mut buf).await?;
            buf.truncate(len as usize);
            Ok(Reply::Bulk(Some(
                String::from_utf8_lossy(&buf).into_owned(),
            )))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected reply prefix '{}'", other),
        )),
    }
}
