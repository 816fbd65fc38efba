//! svndiff version 0 windows
//!
//! A delta is the 4-byte header `SVN\0` followed by windows. Each window
//! holds five varints (source offset, source length, target length,
//! instruction length, new-data length), then the instructions, then the
//! new data. An instruction byte carries the opcode in its top two bits and
//! the length in the low six; a zero length means a varint length follows.
//! Source and target copies are followed by a varint offset.

use crate::{DavError, Result};

const HEADER: &[u8; 3] = b"SVN";
const MAX_WINDOW: usize = 100 * 1024;

const OP_SOURCE: u8 = 0;
const OP_TARGET: u8 = 1;
const OP_NEW: u8 = 2;

/// Read a 7-bit big-endian varint, returning the value and the next position.
fn read_varint(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut p = pos;
    loop {
        let byte = *data
            .get(p)
            .ok_or_else(|| DavError::malformed("svndiff varint runs past the end of the data"))?;
        if result > (u64::MAX >> 7) {
            return Err(DavError::malformed("svndiff varint overflows"));
        }
        result = (result << 7) | (byte & 0x7f) as u64;
        p += 1;
        if byte & 0x80 == 0 {
            return Ok((result, p));
        }
    }
}

fn read_len(data: &[u8], pos: usize) -> Result<(usize, usize)> {
    let (value, p) = read_varint(data, pos)?;
    let value = usize::try_from(value).map_err(|_| DavError::malformed("svndiff length too large"))?;
    Ok((value, p))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        groups.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    out.extend(groups.iter().rev());
}

/// Apply a complete svndiff stream to `source`, producing the target text.
pub fn apply(source: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    if delta.len() < 4 || &delta[0..3] != HEADER {
        return Err(DavError::malformed("svndiff data lacks the 'SVN' header"));
    }
    if delta[3] != 0 {
        return Err(DavError::NotImplemented(format!("svndiff version {}", delta[3])));
    }
    let mut pos = 4;
    let mut result = Vec::new();
    while pos < delta.len() {
        let (src_off, p) = read_len(delta, pos)?;
        let (src_len, p) = read_len(delta, p)?;
        let (tgt_len, p) = read_len(delta, p)?;
        let (instr_len, p) = read_len(delta, p)?;
        let (new_data_len, p) = read_len(delta, p)?;
        let instr_start = p;
        let new_data_start = instr_start
            .checked_add(instr_len)
            .ok_or_else(|| DavError::malformed("svndiff window too large"))?;
        let new_data_end = new_data_start
            .checked_add(new_data_len)
            .ok_or_else(|| DavError::malformed("svndiff window too large"))?;
        if new_data_end > delta.len() {
            return Err(DavError::malformed("svndiff window is truncated"));
        }
        let view = src_off
            .checked_add(src_len)
            .and_then(|end| source.get(src_off..end))
            .ok_or_else(|| DavError::malformed("svndiff source view outside the source text"))?;
        let window = apply_window(
            view,
            &delta[instr_start..new_data_start],
            &delta[new_data_start..new_data_end],
            tgt_len,
        )?;
        result.extend_from_slice(&window);
        pos = new_data_end;
    }
    Ok(result)
}

fn apply_window(view: &[u8], instructions: &[u8], new_data: &[u8], tgt_len: usize) -> Result<Vec<u8>> {
    let mut target = Vec::with_capacity(tgt_len);
    let mut ipos = 0usize;
    let mut nd_off = 0usize;
    while ipos < instructions.len() {
        let byte = instructions[ipos];
        let opcode = (byte >> 6) & 0x03;
        let mut length = (byte & 0x3f) as usize;
        ipos += 1;
        if length == 0 {
            let (l, np) = read_len(instructions, ipos)?;
            length = l;
            ipos = np;
        }
        match opcode {
            OP_SOURCE => {
                let (offset, np) = read_len(instructions, ipos)?;
                ipos = np;
                let bytes = offset
                    .checked_add(length)
                    .and_then(|end| view.get(offset..end))
                    .ok_or_else(|| DavError::malformed("svndiff source copy out of range"))?;
                target.extend_from_slice(bytes);
            }
            OP_TARGET => {
                let (offset, np) = read_len(instructions, ipos)?;
                ipos = np;
                if offset >= target.len() {
                    return Err(DavError::malformed("svndiff target copy out of range"));
                }
                // Byte at a time: the copied range may overlap what it produces.
                for i in offset..offset + length {
                    let b = target[i];
                    target.push(b);
                }
            }
            OP_NEW => {
                let bytes = nd_off
                    .checked_add(length)
                    .and_then(|end| new_data.get(nd_off..end))
                    .ok_or_else(|| DavError::malformed("svndiff new data out of range"))?;
                target.extend_from_slice(bytes);
                nd_off += length;
            }
            _ => return Err(DavError::malformed(format!("invalid svndiff opcode {}", opcode))),
        }
    }
    if target.len() != tgt_len {
        return Err(DavError::malformed(format!(
            "svndiff window produced {} bytes, expected {}",
            target.len(),
            tgt_len
        )));
    }
    Ok(target)
}

/// Encode `text` as a delta against the empty source: every window is a
/// single new-data instruction.
pub fn encode_fulltext(text: &[u8]) -> Vec<u8> {
    let mut out = b"SVN\0".to_vec();
    for chunk in text.chunks(MAX_WINDOW) {
        let mut instr = Vec::new();
        if chunk.len() < 0x40 {
            instr.push((OP_NEW << 6) | chunk.len() as u8);
        } else {
            instr.push(OP_NEW << 6);
            write_varint(&mut instr, chunk.len() as u64);
        }
        write_varint(&mut out, 0);
        write_varint(&mut out, 0);
        write_varint(&mut out, chunk.len() as u64);
        write_varint(&mut out, instr.len() as u64);
        write_varint(&mut out, chunk.len() as u64);
        out.extend_from_slice(&instr);
        out.extend_from_slice(chunk);
    }
    out
}
