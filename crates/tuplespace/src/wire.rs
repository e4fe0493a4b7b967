// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2026 Peerspace Project Contributors
//
// This file is part of Peerspace.
//
// Peerspace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Peerspace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Peerspace. If not, see <https://www.gnu.org/licenses/>.

//! Wire codec.
//!
//! Fixed big-endian layout for the four message payloads: subscribe,
//! unsubscribe, tuple push and append. Patterns and tuples share one
//! header layout; wildcard fields travel as sentinels (`-1` for numeric
//! fields, zero length for key and mimetype, a presence flag for data).
//! Keys travel as their dot-joined text. A push payload is simply a header
//! that must decode concrete.
//!
//! Decoding never panics: every truncation or bad sentinel comes back as
//! [`TupleError::MalformedFrame`] and the kernel logs and drops the frame.

use bytes::{Buf, BufMut};
use peerspace_transport::PeerId;

use crate::error::TupleError;
use crate::key::{KeyPattern, MAX_KEY_LENGTH};
use crate::tuple::{Encoding, TimeVal, Tuple, TuplePattern};

/// Upper bound on the data payload of a single frame (16 MiB).
pub const MAX_DATA_LENGTH: usize = 16 * 1024 * 1024;

/// Upper bound on the mimetype field; the wire carries its length as u16.
pub const MAX_MIMETYPE_LENGTH: usize = u16::MAX as usize;

fn put_time(buf: &mut Vec<u8>, time: Option<TimeVal>) {
    match time {
        Some(t) => {
            buf.put_i64(t.sec);
            buf.put_i32(t.usec);
        }
        None => {
            buf.put_i64(-1);
            buf.put_i32(-1);
        }
    }
}

fn put_counter(buf: &mut Vec<u8>, counter: Option<u32>) {
    match counter {
        Some(c) => buf.put_i64(c as i64),
        None => buf.put_i64(-1),
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), TupleError> {
    if buf.remaining() < n {
        Err(TupleError::MalformedFrame("truncated frame"))
    } else {
        Ok(())
    }
}

fn get_time(buf: &mut &[u8]) -> Result<Option<TimeVal>, TupleError> {
    need(buf, 12)?;
    let sec = buf.get_i64();
    let usec = buf.get_i32();
    if sec == -1 && usec == -1 {
        Ok(None)
    } else {
        Ok(Some(TimeVal { sec, usec }))
    }
}

fn get_counter(buf: &mut &[u8]) -> Result<Option<u32>, TupleError> {
    need(buf, 8)?;
    match buf.get_i64() {
        -1 => Ok(None),
        n if (0..=u32::MAX as i64).contains(&n) => Ok(Some(n as u32)),
        _ => Err(TupleError::MalformedFrame("counter out of range")),
    }
}

fn put_pattern(buf: &mut Vec<u8>, pattern: &TuplePattern) {
    buf.put_i32(pattern.owner.map_or(-1, |p| p.0));
    buf.put_i32(pattern.creator.map_or(-1, |p| p.0));
    put_time(buf, pattern.write_time);
    put_time(buf, pattern.user_time);
    put_time(buf, pattern.expire_time);
    buf.put_i8(match pattern.encoding {
        None => -1,
        Some(Encoding::Text) => 0,
        Some(Encoding::Binary) => 1,
    });
    buf.put_i8(match pattern.is_new {
        None => -1,
        Some(false) => 0,
        Some(true) => 1,
    });
    put_counter(buf, pattern.seqno);
    put_counter(buf, pattern.append_seqno);

    let key = pattern.key.to_wire_string();
    buf.put_u16(key.len() as u16);
    buf.put_slice(key.as_bytes());

    let mimetype = pattern.mimetype.as_deref().unwrap_or("");
    debug_assert!(mimetype.len() <= MAX_MIMETYPE_LENGTH);
    buf.put_u16(mimetype.len() as u16);
    buf.put_slice(mimetype.as_bytes());

    match &pattern.data {
        Some(data) => {
            buf.put_u8(1);
            debug_assert!(data.len() <= MAX_DATA_LENGTH);
            buf.put_u32(data.len() as u32);
            buf.put_slice(data);
        }
        None => buf.put_u8(0),
    }
}

fn get_pattern(buf: &mut &[u8]) -> Result<TuplePattern, TupleError> {
    need(buf, 8)?;
    let owner = match buf.get_i32() {
        -1 => None,
        n => Some(PeerId(n)),
    };
    let creator = match buf.get_i32() {
        -1 => None,
        n => Some(PeerId(n)),
    };
    let write_time = get_time(buf)?;
    let user_time = get_time(buf)?;
    let expire_time = get_time(buf)?;
    need(buf, 2)?;
    let encoding = match buf.get_i8() {
        -1 => None,
        0 => Some(Encoding::Text),
        1 => Some(Encoding::Binary),
        _ => return Err(TupleError::MalformedFrame("bad encoding byte")),
    };
    let is_new = match buf.get_i8() {
        -1 => None,
        0 => Some(false),
        1 => Some(true),
        _ => return Err(TupleError::MalformedFrame("bad read-flag byte")),
    };
    let seqno = get_counter(buf)?;
    let append_seqno = get_counter(buf)?;

    need(buf, 2)?;
    let key_len = buf.get_u16() as usize;
    if key_len > MAX_KEY_LENGTH {
        return Err(TupleError::MalformedFrame("key too long"));
    }
    need(buf, key_len)?;
    let key_text = std::str::from_utf8(&buf[..key_len])
        .map_err(|_| TupleError::MalformedFrame("key not utf-8"))?
        .to_owned();
    buf.advance(key_len);
    let key = KeyPattern::parse(&key_text).map_err(|_| TupleError::MalformedFrame("bad key"))?;

    need(buf, 2)?;
    let mime_len = buf.get_u16() as usize;
    need(buf, mime_len)?;
    let mimetype = if mime_len == 0 {
        None
    } else {
        Some(
            std::str::from_utf8(&buf[..mime_len])
                .map_err(|_| TupleError::MalformedFrame("mimetype not utf-8"))?
                .to_owned(),
        )
    };
    buf.advance(mime_len);

    need(buf, 1)?;
    let data = match buf.get_u8() {
        0 => None,
        1 => {
            need(buf, 4)?;
            let data_len = buf.get_u32() as usize;
            if data_len > MAX_DATA_LENGTH {
                return Err(TupleError::MalformedFrame("data too long"));
            }
            need(buf, data_len)?;
            let data = buf[..data_len].to_vec();
            buf.advance(data_len);
            Some(data)
        }
        _ => return Err(TupleError::MalformedFrame("bad data-presence byte")),
    };

    Ok(TuplePattern {
        owner,
        creator,
        key,
        data,
        mimetype,
        encoding,
        write_time,
        user_time,
        expire_time,
        seqno,
        append_seqno,
        is_new,
    })
}

/// Encode a subscribe payload.
pub fn encode_subscribe(force_resend: bool, pattern: &TuplePattern) -> Vec<u8> {
    let mut buf = Vec::with_capacity(96);
    buf.put_u8(force_resend as u8);
    put_pattern(&mut buf, pattern);
    buf
}

/// Decode a subscribe payload into (force_resend, pattern).
pub fn decode_subscribe(mut bytes: &[u8]) -> Result<(bool, TuplePattern), TupleError> {
    let buf = &mut bytes;
    need(buf, 1)?;
    let force_resend = match buf.get_u8() {
        0 => false,
        1 => true,
        _ => return Err(TupleError::MalformedFrame("bad resend byte")),
    };
    Ok((force_resend, get_pattern(buf)?))
}

/// Encode an unsubscribe payload.
pub fn encode_unsubscribe(pattern: &TuplePattern) -> Vec<u8> {
    let mut buf = Vec::with_capacity(96);
    put_pattern(&mut buf, pattern);
    buf
}

/// Decode an unsubscribe payload.
pub fn decode_unsubscribe(mut bytes: &[u8]) -> Result<TuplePattern, TupleError> {
    get_pattern(&mut bytes)
}

/// Encode a tuple push payload.
pub fn encode_push(tuple: &Tuple) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + tuple.data.len());
    put_pattern(&mut buf, &TuplePattern::from_concrete(tuple));
    buf
}

/// Decode a tuple push payload; the header must be concrete.
///
/// A zero-length mimetype is the wildcard sentinel in patterns; in a push
/// it stands for the empty mimetype.
pub fn decode_push(mut bytes: &[u8]) -> Result<Tuple, TupleError> {
    let mut header = get_pattern(&mut bytes)?;
    header.mimetype.get_or_insert_with(String::new);
    header
        .into_concrete()
        .map_err(|_| TupleError::MalformedFrame("push payload not concrete"))
}

/// Encode an append payload: target header plus the diff bytes.
pub fn encode_append(header: &TuplePattern, diff: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + diff.len());
    put_pattern(&mut buf, header);
    buf.put_u32(diff.len() as u32);
    buf.put_slice(diff);
    buf
}

/// Decode an append payload into (header, diff).
pub fn decode_append(mut bytes: &[u8]) -> Result<(TuplePattern, Vec<u8>), TupleError> {
    let buf = &mut bytes;
    let header = get_pattern(buf)?;
    need(buf, 4)?;
    let diff_len = buf.get_u32() as usize;
    if diff_len > MAX_DATA_LENGTH {
        return Err(TupleError::MalformedFrame("diff too long"));
    }
    need(buf, diff_len)?;
    let diff = buf[..diff_len].to_vec();
    buf.advance(diff_len);
    Ok((header, diff))
}
