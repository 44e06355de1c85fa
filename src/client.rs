//! Per-connection state and the resumable request parser.
//!
//! Two request formats share one buffer:
//!
//! ```text
//! inline: SET mykey hello\r\n
//! bulk:   *3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$5\r\nhello\r\n
//! ```
//!
//! The parser keeps its position (`cmd_ty`, `bulk_num`, `bulk_len`) across
//! reads, so a command may arrive split at any byte boundary.

use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};

use socket2::Socket;

use crate::buffer::Buffer;
use crate::error::ProtocolError;
use crate::list::List;
use crate::object::{Gobj, GobjRef, gstr_equal};

/// Bytes pulled from the socket per read.
pub const GODIS_IO_BUF: usize = 1024 * 16;
/// Cap on a single bulk argument length, and on the bulk argument count.
pub const GODIS_MAX_BULK: usize = 1024 * 4;
/// Cap on an unterminated `*<n>` or `$<len>` header line. Inline commands
/// have no line limit.
pub const GODIS_MAX_INLINE: usize = 1024 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    Unknown,
    Inline,
    Bulk,
}

#[derive(Debug)]
pub struct Query {
    buf: Buffer,
    args: Vec<GobjRef>,
    cmd_ty: CmdType,
    /// Bulk arguments still to read for the current command.
    bulk_num: usize,
    /// Declared length of the bulk argument being read, once its `$` line
    /// has been consumed.
    bulk_len: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            buf: Buffer::with_capacity(GODIS_IO_BUF),
            args: Vec::new(),
            cmd_ty: CmdType::Unknown,
            bulk_num: 0,
            bulk_len: None,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.append(bytes);
    }

    /// Advances the state machine over the buffered bytes. `Ok(true)` means
    /// a whole command is ready in `args`; `Ok(false)` means more bytes are
    /// needed.
    pub fn parse(&mut self) -> Result<bool, ProtocolError> {
        if self.buf.is_empty() {
            return Ok(false);
        }
        if self.cmd_ty == CmdType::Unknown {
            self.cmd_ty = if self.buf[0] == b'*' {
                CmdType::Bulk
            } else {
                CmdType::Inline
            };
        }
        match self.cmd_ty {
            CmdType::Inline => self.handle_inline(),
            CmdType::Bulk => self.handle_bulk(),
            CmdType::Unknown => Ok(false),
        }
    }

    /// Hands over the parsed arguments and resets for the next command.
    pub fn take_args(&mut self) -> Vec<GobjRef> {
        let args = mem::take(&mut self.args);
        self.reset();
        args
    }

    pub fn reset(&mut self) {
        self.args.clear();
        self.cmd_ty = CmdType::Unknown;
        self.bulk_num = 0;
        self.bulk_len = None;
    }

    /// End of the pending bulk header line.
    fn header_end(&self) -> Result<Option<usize>, ProtocolError> {
        match self.buf.find_crlf() {
            Some(idx) => Ok(Some(idx)),
            None if self.buf.len() > GODIS_MAX_INLINE => Err(ProtocolError::HeaderTooLong {
                len: self.buf.len(),
                max: GODIS_MAX_INLINE,
            }),
            None => Ok(None),
        }
    }

    fn handle_inline(&mut self) -> Result<bool, ProtocolError> {
        let Some(idx) = self.buf.find_crlf() else {
            return Ok(false);
        };

        let line = &self.buf[..idx];
        self.args = if line.is_empty() {
            Vec::new()
        } else {
            line.split(|b| *b == b' ').map(Gobj::create_str).collect()
        };
        self.buf.consume(idx + 2);
        Ok(true)
    }

    fn handle_bulk(&mut self) -> Result<bool, ProtocolError> {
        if self.bulk_num == 0 {
            let Some(idx) = self.header_end()? else {
                return Ok(false);
            };
            let count = parse_len(&self.buf[1..idx], "multibulk")?;
            if count > GODIS_MAX_BULK {
                return Err(ProtocolError::TooManyArgs {
                    count,
                    max: GODIS_MAX_BULK,
                });
            }
            self.buf.consume(idx + 2);
            if count == 0 {
                return Ok(true);
            }
            self.bulk_num = count;
            self.args = Vec::with_capacity(count);
        }

        while self.bulk_num > 0 {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(idx) = self.header_end()? else {
                        return Ok(false);
                    };
                    if self.buf[0] != b'$' {
                        return Err(ProtocolError::ExpectedDollar(self.buf[0]));
                    }
                    let len = parse_len(&self.buf[1..idx], "bulk")?;
                    if len > GODIS_MAX_BULK {
                        return Err(ProtocolError::BulkTooLong {
                            len,
                            max: GODIS_MAX_BULK,
                        });
                    }
                    self.buf.consume(idx + 2);
                    self.bulk_len = Some(len);
                    len
                }
            };

            if self.buf.len() < len + 2 {
                return Ok(false);
            }
            if &self.buf[len..len + 2] != b"\r\n" {
                return Err(ProtocolError::ExpectedCrlf);
            }
            self.args.push(Gobj::create_str(&self.buf[..len]));
            self.buf.consume(len + 2);
            self.bulk_len = None;
            self.bulk_num -= 1;
        }
        Ok(true)
    }
}

fn parse_len(raw: &[u8], what: &'static str) -> Result<usize, ProtocolError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength {
            what,
            raw: String::from_utf8_lossy(raw).into_owned(),
        })
}

/// A connected peer: its socket, pending input and queued replies.
///
/// Fields drop in order, so parsed arguments and queued replies are
/// released before the socket closes.
#[derive(Debug)]
pub struct Client {
    pub query: Query,
    pub reply: List,
    /// Bytes of the head reply already written.
    pub sent_len: usize,
    fd: RawFd,
    socket: Socket,
}

impl Client {
    pub fn new(socket: Socket) -> Self {
        Self {
            query: Query::new(),
            reply: List::new(gstr_equal),
            sent_len: 0,
            fd: socket.as_raw_fd(),
            socket,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn add_reply(&mut self, obj: GobjRef) {
        self.reply.append(obj);
    }

    /// One non-blocking read into the query buffer. `Ok(0)` is EOF.
    pub fn read_query(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; GODIS_IO_BUF];
        let n = self.socket.read(&mut chunk)?;
        self.query.feed(&chunk[..n]);
        Ok(n)
    }

    /// Writes queued replies until the list drains or the socket would
    /// block. Returns the number of bytes written.
    pub fn write_replies(&mut self) -> io::Result<usize> {
        let mut written = 0;
        while let Some(rep) = self.reply.first().cloned() {
            let buf = rep.str_val().unwrap_or_default();
            if self.sent_len < buf.len() {
                match self.socket.write(&buf[self.sent_len..]) {
                    Ok(0) => {
                        return Err(io::Error::new(io::ErrorKind::WriteZero, "socket closed"));
                    }
                    Ok(n) => {
                        self.sent_len += n;
                        written += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            if self.sent_len >= buf.len() {
                self.reply.pop_front();
                self.sent_len = 0;
            }
        }
        Ok(written)
    }
}
