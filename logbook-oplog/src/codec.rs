//! Canonical binary encoding of ops, logs and books.
//!
//! The encoding is deterministic: field order is fixed, absent fields are
//! omitted rather than zero-filled, integers are little-endian and strings
//! are length-prefixed UTF-8. Determinism matters because the canonical
//! bytes are the input to both the identity hash of a log and its signature;
//! re-serializing a decoded value must reproduce the input byte for byte.
//!
//! Two layouts share the op encoding:
//!
//! * the *canonical* encoding of a log covers only its ops and children and
//!   is what gets hashed and signed,
//! * the *signed* encoding additionally carries each log's signature and is
//!   what travels over the wire and into the encrypted book blob.

use bytes::BufMut;
use logbook_base::Signature;

use crate::error::{Error, Result};
use crate::log::Log;
use crate::op::{Op, OpKind};

const TAG_KIND: u8 = 0x01;
const TAG_MODEL: u8 = 0x02;
const TAG_TIMESTAMP: u8 = 0x03;
const TAG_REF: u8 = 0x04;
const TAG_PREV: u8 = 0x05;
const TAG_RELATIONS: u8 = 0x06;
const TAG_NAME: u8 = 0x07;
const TAG_AUTHOR_ID: u8 = 0x08;
const TAG_SIZE: u8 = 0x09;
const TAG_NOTE: u8 = 0x0a;
const TAG_END: u8 = 0x00;

const SIGNATURE_LEN: usize = 64;

/// Append the canonical encoding of a single op.
pub(crate) fn encode_op(op: &Op, out: &mut Vec<u8>) {
    out.put_u8(TAG_KIND);
    out.put_u8(op.kind as u8);
    out.put_u8(TAG_MODEL);
    out.put_u32_le(op.model as u32);
    if op.timestamp != 0 {
        out.put_u8(TAG_TIMESTAMP);
        out.put_i64_le(op.timestamp);
    }
    if !op.reference.is_empty() {
        out.put_u8(TAG_REF);
        put_str(&op.reference, out);
    }
    if !op.prev.is_empty() {
        out.put_u8(TAG_PREV);
        put_str(&op.prev, out);
    }
    if !op.relations.is_empty() {
        out.put_u8(TAG_RELATIONS);
        out.put_u32_le(op.relations.len() as u32);
        for relation in &op.relations {
            put_str(relation, out);
        }
    }
    if !op.name.is_empty() {
        out.put_u8(TAG_NAME);
        put_str(&op.name, out);
    }
    if !op.author_id.is_empty() {
        out.put_u8(TAG_AUTHOR_ID);
        put_str(&op.author_id, out);
    }
    if op.size != 0 {
        out.put_u8(TAG_SIZE);
        out.put_i64_le(op.size);
    }
    if !op.note.is_empty() {
        out.put_u8(TAG_NOTE);
        put_str(&op.note, out);
    }
    out.put_u8(TAG_END);
}

/// The canonical encoding of a single op as an owned buffer.
pub(crate) fn op_bytes(op: &Op) -> Vec<u8> {
    let mut out = Vec::new();
    encode_op(op, &mut out);
    out
}

/// Decode a single op. Tags must be strictly ascending; unknown tags,
/// truncated payloads and missing required fields are rejected.
pub(crate) fn decode_op(buf: &mut &[u8]) -> Result<Op> {
    let mut op = Op::default();
    let mut seen_kind = false;
    let mut seen_model = false;
    let mut last_tag = TAG_END;
    loop {
        let tag = get_u8(buf)?;
        if tag == TAG_END {
            break;
        }
        if tag <= last_tag {
            return Err(Error::DecodeFailed("op fields out of order"));
        }
        last_tag = tag;
        match tag {
            TAG_KIND => {
                op.kind = OpKind::try_from(get_u8(buf)?)?;
                seen_kind = true;
            }
            TAG_MODEL => {
                op.model = get_u32(buf)?.try_into()?;
                seen_model = true;
            }
            TAG_TIMESTAMP => op.timestamp = get_i64(buf)?,
            TAG_REF => op.reference = get_str(buf)?,
            TAG_PREV => op.prev = get_str(buf)?,
            TAG_RELATIONS => {
                let count = get_count(buf)?;
                let mut relations = Vec::with_capacity(count);
                for _ in 0..count {
                    relations.push(get_str(buf)?);
                }
                op.relations = relations;
            }
            TAG_NAME => op.name = get_str(buf)?,
            TAG_AUTHOR_ID => op.author_id = get_str(buf)?,
            TAG_SIZE => op.size = get_i64(buf)?,
            TAG_NOTE => op.note = get_str(buf)?,
            _ => return Err(Error::DecodeFailed("unknown op field tag")),
        }
    }
    if !seen_kind || !seen_model {
        return Err(Error::DecodeFailed("op is missing required fields"));
    }
    Ok(op)
}

/// Append the canonical encoding of an op list: a count followed by each op.
/// This is the signing input for a log.
pub(crate) fn encode_ops(ops: &[Op], out: &mut Vec<u8>) {
    out.put_u32_le(ops.len() as u32);
    for op in ops {
        encode_op(op, out);
    }
}

/// The canonical op-list encoding as an owned buffer.
pub(crate) fn ops_bytes(ops: &[Op]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_ops(ops, &mut out);
    out
}

/// Append the canonical encoding of a log: its ops, then its children,
/// recursively. Signatures are not part of the canonical form.
pub(crate) fn encode_log(log: &Log, out: &mut Vec<u8>) {
    encode_ops(log.ops(), out);
    out.put_u32_le(log.logs().len() as u32);
    for child in log.logs() {
        encode_log(child, out);
    }
}

/// Append the signed encoding of a log: ops, signature, children in signed
/// form.
pub(crate) fn encode_signed_log(log: &Log, out: &mut Vec<u8>) {
    encode_ops(log.ops(), out);
    match log.signature() {
        Some(signature) => {
            out.put_u32_le(SIGNATURE_LEN as u32);
            out.extend_from_slice(&signature.to_bytes());
        }
        None => out.put_u32_le(0),
    }
    out.put_u32_le(log.logs().len() as u32);
    for child in log.logs() {
        encode_signed_log(child, out);
    }
}

/// Decode a log from its signed encoding, validating that every log in the
/// tree starts with an init op.
pub(crate) fn decode_signed_log(buf: &mut &[u8]) -> Result<Log> {
    let count = get_count(buf)?;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        ops.push(decode_op(buf)?);
    }
    match ops.first() {
        None => return Err(Error::DecodeFailed("log without ops")),
        Some(op) if op.kind != OpKind::Init => {
            return Err(Error::DecodeFailed("log must begin with an init op"))
        }
        Some(_) => {}
    }

    let sig_len = get_u32(buf)? as usize;
    let signature = match sig_len {
        0 => None,
        SIGNATURE_LEN => {
            let raw: [u8; SIGNATURE_LEN] = get_slice(buf, SIGNATURE_LEN)?
                .try_into()
                .expect("length checked");
            Some(Signature::from_bytes(&raw))
        }
        _ => return Err(Error::DecodeFailed("invalid signature length")),
    };

    let count = get_count(buf)?;
    let mut logs = Vec::with_capacity(count);
    for _ in 0..count {
        logs.push(decode_signed_log(buf)?);
    }

    Ok(Log::assemble(ops, logs, signature))
}

/// Append the book plaintext: author name, author id, then every top-level
/// log in signed form.
pub(crate) fn encode_book(author_name: &str, author_id: &str, logs: &[Log], out: &mut Vec<u8>) {
    put_str(author_name, out);
    put_str(author_id, out);
    out.put_u32_le(logs.len() as u32);
    for log in logs {
        encode_signed_log(log, out);
    }
}

/// Decode the book plaintext back into its parts.
pub(crate) fn decode_book(mut buf: &[u8]) -> Result<(String, String, Vec<Log>)> {
    let buf = &mut buf;
    let author_name = get_str(buf)?;
    let author_id = get_str(buf)?;
    let count = get_count(buf)?;
    let mut logs = Vec::with_capacity(count);
    for _ in 0..count {
        logs.push(decode_signed_log(buf)?);
    }
    if !buf.is_empty() {
        return Err(Error::DecodeFailed("trailing bytes after book"));
    }
    Ok((author_name, author_id, logs))
}

fn put_str(s: &str, out: &mut Vec<u8>) {
    out.put_u32_le(s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    let bytes = get_slice(buf, 1)?;
    Ok(bytes[0])
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    let bytes = get_slice(buf, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("length checked")))
}

fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    let bytes = get_slice(buf, 8)?;
    Ok(i64::from_le_bytes(bytes.try_into().expect("length checked")))
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    let len = get_u32(buf)? as usize;
    let bytes = get_slice(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::DecodeFailed("string is not utf-8"))
}

/// Read a count prefix, bounded by the remaining input so a corrupt count
/// cannot drive a huge allocation.
fn get_count(buf: &mut &[u8]) -> Result<usize> {
    let count = get_u32(buf)? as usize;
    if count > buf.len() {
        return Err(Error::DecodeFailed("count exceeds input"));
    }
    Ok(count)
}

fn get_slice<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::DecodeFailed("unexpected end of input"));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Model;

    fn sample_op() -> Op {
        Op {
            kind: OpKind::Init,
            model: Model::Version,
            timestamp: 100,
            reference: "QmExample".to_string(),
            prev: "QmPrev".to_string(),
            relations: vec!["registry".to_string(), "mirror".to_string()],
            name: "weather".to_string(),
            author_id: "author".to_string(),
            size: 42,
            note: "first commit".to_string(),
        }
    }

    #[test]
    fn test_op_roundtrip() -> anyhow::Result<()> {
        let op = sample_op();
        let bytes = op_bytes(&op);
        let decoded = decode_op(&mut bytes.as_slice())?;
        assert_eq!(decoded, op);
        // re-encoding is byte-identical
        assert_eq!(op_bytes(&decoded), bytes);
        Ok(())
    }

    #[test]
    fn test_sparse_op_omits_fields() -> anyhow::Result<()> {
        let sparse = Op {
            kind: OpKind::Remove,
            model: Model::Version,
            size: 2,
            ..Default::default()
        };
        let bytes = op_bytes(&sparse);
        // kind, model, size and the end marker; nothing else
        assert_eq!(bytes.len(), 1 + 1 + 1 + 4 + 1 + 8 + 1);
        let decoded = decode_op(&mut bytes.as_slice())?;
        assert_eq!(decoded, sparse);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let mut bytes = op_bytes(&sample_op());
        // swap the end marker for a tag from the future
        let last = bytes.len() - 1;
        bytes[last] = 0x2a;
        assert!(matches!(
            decode_op(&mut bytes.as_slice()),
            Err(Error::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = op_bytes(&sample_op());
        for len in 0..bytes.len() - 1 {
            assert!(
                decode_op(&mut &bytes[..len]).is_err(),
                "truncation at {len} must not decode"
            );
        }
    }

    #[test]
    fn test_decode_rejects_out_of_order_fields() {
        // name before ref: tags descending
        let mut bytes = Vec::new();
        bytes.put_u8(TAG_KIND);
        bytes.put_u8(OpKind::Init as u8);
        bytes.put_u8(TAG_MODEL);
        bytes.put_u32_le(Model::Name as u32);
        bytes.put_u8(TAG_NAME);
        put_str("b", &mut bytes);
        bytes.put_u8(TAG_REF);
        put_str("a", &mut bytes);
        bytes.put_u8(TAG_END);
        assert!(matches!(
            decode_op(&mut bytes.as_slice()),
            Err(Error::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_required_fields() {
        let mut bytes = Vec::new();
        bytes.put_u8(TAG_KIND);
        bytes.put_u8(OpKind::Init as u8);
        bytes.put_u8(TAG_END);
        assert!(matches!(
            decode_op(&mut bytes.as_slice()),
            Err(Error::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_huge_count_rejected() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(u32::MAX);
        assert!(decode_signed_log(&mut bytes.as_slice()).is_err());
    }
}
