// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thrift binary protocol over framed transport, restricted to the Scribe
//! `Log` call.
//!
//! Every frame is a 4-byte big-endian length followed by one message. Both
//! directions are implemented so test servers can speak the protocol too.

use crate::error::{Error, Result};
use std::io::{self, Read};

pub const LOG_METHOD: &str = "Log";

/// Upper bound for a reply frame read by the client.
pub const MAX_REPLY_FRAME_SIZE: usize = 64 * 1024;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

const MESSAGE_CALL: u8 = 1;
const MESSAGE_REPLY: u8 = 2;
const MESSAGE_EXCEPTION: u8 = 3;

const TYPE_STOP: u8 = 0;
const TYPE_BOOL: u8 = 2;
const TYPE_BYTE: u8 = 3;
const TYPE_DOUBLE: u8 = 4;
const TYPE_I16: u8 = 6;
const TYPE_I32: u8 = 8;
const TYPE_I64: u8 = 10;
const TYPE_STRING: u8 = 11;
const TYPE_STRUCT: u8 = 12;
const TYPE_MAP: u8 = 13;
const TYPE_SET: u8 = 14;
const TYPE_LIST: u8 = 15;

const MAX_SKIP_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: String,
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    TryLater,
}

impl ResultCode {
    fn as_i32(self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::TryLater => 1,
        }
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn framed() -> Self {
        // length is patched in by finish()
        Writer { buf: vec![0; 4] }
    }

    fn byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn binary(&mut self, value: &[u8]) {
        self.u32(value.len() as u32);
        self.buf.extend_from_slice(value);
    }

    fn message_begin(&mut self, message_type: u8, seqid: i32) {
        self.u32(VERSION_1 | u32::from(message_type));
        self.binary(LOG_METHOD.as_bytes());
        self.i32(seqid);
    }

    fn field_begin(&mut self, field_type: u8, id: i16) {
        self.byte(field_type);
        self.i16(id);
    }

    fn finish(mut self) -> Vec<u8> {
        let len = (self.buf.len() - 4) as u32;
        self.buf[..4].copy_from_slice(&len.to_be_bytes());
        self.buf
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::ProtocolDecode(format!(
                    "unexpected end of message at offset {} (wanted {} bytes)",
                    self.pos, len
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn binary(&mut self) -> Result<&'a [u8]> {
        let len = self.i32()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::ProtocolDecode(format!("negative length {len}")))?;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.binary()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::ProtocolDecode(format!("invalid utf-8 string: {e}")))
    }

    /// Reads a message header, accepting both strict and old-style encodings.
    fn message_begin(&mut self) -> Result<(String, u8, i32)> {
        let first = self.u32()?;
        if first & 0x8000_0000 != 0 {
            if first & VERSION_MASK != VERSION_1 {
                return Err(Error::ProtocolDecode(format!(
                    "bad protocol version {:#x}",
                    first & VERSION_MASK
                )));
            }
            let name = self.string()?;
            let seqid = self.i32()?;
            Ok((name, (first & 0xff) as u8, seqid))
        } else {
            let name_bytes = self.take(first as usize)?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|e| Error::ProtocolDecode(format!("invalid method name: {e}")))?;
            let message_type = self.byte()?;
            let seqid = self.i32()?;
            Ok((name, message_type, seqid))
        }
    }

    fn field_begin(&mut self) -> Result<(u8, i16)> {
        let field_type = self.byte()?;
        if field_type == TYPE_STOP {
            return Ok((TYPE_STOP, 0));
        }
        Ok((field_type, self.i16()?))
    }

    fn skip(&mut self, field_type: u8, depth: usize) -> Result<()> {
        if depth > MAX_SKIP_DEPTH {
            return Err(Error::ProtocolDecode("struct nesting too deep".to_string()));
        }
        match field_type {
            TYPE_BOOL | TYPE_BYTE => {
                self.take(1)?;
            }
            TYPE_I16 => {
                self.take(2)?;
            }
            TYPE_I32 => {
                self.take(4)?;
            }
            TYPE_DOUBLE | TYPE_I64 => {
                self.take(8)?;
            }
            TYPE_STRING => {
                self.binary()?;
            }
            TYPE_STRUCT => loop {
                let (inner, _) = self.field_begin()?;
                if inner == TYPE_STOP {
                    break;
                }
                self.skip(inner, depth + 1)?;
            },
            TYPE_MAP => {
                let key_type = self.byte()?;
                let value_type = self.byte()?;
                let size = self.i32()?;
                for _ in 0..size.max(0) {
                    self.skip(key_type, depth + 1)?;
                    self.skip(value_type, depth + 1)?;
                }
            }
            TYPE_SET | TYPE_LIST => {
                let element_type = self.byte()?;
                let size = self.i32()?;
                for _ in 0..size.max(0) {
                    self.skip(element_type, depth + 1)?;
                }
            }
            other => {
                return Err(Error::ProtocolDecode(format!("unknown field type {other}")));
            }
        }
        Ok(())
    }

    fn log_entry(&mut self) -> Result<LogEntry> {
        let mut category = None;
        let mut message = None;
        loop {
            match self.field_begin()? {
                (TYPE_STOP, _) => break,
                (TYPE_STRING, 1) => category = Some(self.string()?),
                (TYPE_STRING, 2) => message = Some(self.binary()?.to_vec()),
                (other, _) => self.skip(other, 0)?,
            }
        }
        Ok(LogEntry {
            category: category.unwrap_or_default(),
            message: message.unwrap_or_default(),
        })
    }
}

/// Encodes a framed `Log(messages)` call.
pub fn encode_log_call(seqid: i32, entries: &[LogEntry]) -> Vec<u8> {
    let mut writer = Writer::framed();
    writer.message_begin(MESSAGE_CALL, seqid);

    writer.field_begin(TYPE_LIST, 1);
    writer.byte(TYPE_STRUCT);
    writer.i32(entries.len() as i32);
    for entry in entries {
        writer.field_begin(TYPE_STRING, 1);
        writer.binary(entry.category.as_bytes());
        writer.field_begin(TYPE_STRING, 2);
        writer.binary(&entry.message);
        writer.byte(TYPE_STOP);
    }
    writer.byte(TYPE_STOP);

    writer.finish()
}

/// Decodes the body of a `Log` reply frame (without the length prefix).
pub fn decode_log_reply(frame: &[u8], expected_seqid: i32) -> Result<ResultCode> {
    let mut cursor = Cursor::new(frame);
    let (name, message_type, seqid) = cursor.message_begin()?;
    if name != LOG_METHOD {
        return Err(Error::ProtocolDecode(format!(
            "unexpected method {name:?} in reply"
        )));
    }
    if seqid != expected_seqid {
        return Err(Error::ProtocolDecode(format!(
            "out of order reply: expected seqid {expected_seqid}, got {seqid}"
        )));
    }

    match message_type {
        MESSAGE_REPLY => {
            let mut code = None;
            loop {
                match cursor.field_begin()? {
                    (TYPE_STOP, _) => break,
                    (TYPE_I32, 0) => code = Some(cursor.i32()?),
                    (other, _) => cursor.skip(other, 0)?,
                }
            }
            match code {
                Some(0) => Ok(ResultCode::Ok),
                Some(1) => Ok(ResultCode::TryLater),
                Some(other) => Err(Error::ProtocolDecode(format!(
                    "unknown result code {other}"
                ))),
                None => Err(Error::ProtocolDecode(
                    "Log failed: unknown result".to_string(),
                )),
            }
        }
        MESSAGE_EXCEPTION => {
            let mut message = String::new();
            loop {
                match cursor.field_begin()? {
                    (TYPE_STOP, _) => break,
                    (TYPE_STRING, 1) => message = cursor.string()?,
                    (other, _) => cursor.skip(other, 0)?,
                }
            }
            Err(Error::BackendUnavailable(format!(
                "scribe server raised: {message}"
            )))
        }
        other => Err(Error::ProtocolDecode(format!(
            "unexpected message type {other}"
        ))),
    }
}

/// Decodes the body of a `Log` call frame. Used by test servers.
pub fn decode_log_call(frame: &[u8]) -> Result<(i32, Vec<LogEntry>)> {
    let mut cursor = Cursor::new(frame);
    let (name, message_type, seqid) = cursor.message_begin()?;
    if name != LOG_METHOD || message_type != MESSAGE_CALL {
        return Err(Error::ProtocolDecode(format!(
            "expected a Log call, got {name:?} (type {message_type})"
        )));
    }

    let mut entries = Vec::new();
    loop {
        match cursor.field_begin()? {
            (TYPE_STOP, _) => break,
            (TYPE_LIST, 1) => {
                let element_type = cursor.byte()?;
                let size = cursor.i32()?;
                if element_type != TYPE_STRUCT {
                    return Err(Error::ProtocolDecode(format!(
                        "messages must be a list of structs, got element type {element_type}"
                    )));
                }
                for _ in 0..size.max(0) {
                    entries.push(cursor.log_entry()?);
                }
            }
            (other, _) => cursor.skip(other, 0)?,
        }
    }
    Ok((seqid, entries))
}

/// Encodes a framed reply to a `Log` call. Used by test servers.
pub fn encode_log_reply(seqid: i32, code: ResultCode) -> Vec<u8> {
    let mut writer = Writer::framed();
    writer.message_begin(MESSAGE_REPLY, seqid);
    writer.field_begin(TYPE_I32, 0);
    writer.i32(code.as_i32());
    writer.byte(TYPE_STOP);
    writer.finish()
}

/// Reads one frame body from `reader`, refusing frames over `max_size`.
pub fn read_frame<R: Read>(reader: &mut R, max_size: usize) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {max_size}"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}
