//! Numeric and byte helpers shared by the compiler and the checker.
//!
//! All arithmetic follows 32-bit C semantics: values are read into a `u32`,
//! widened according to the rule's signedness, and operations wrap.

use super::{ArithOp, Endian, FieldType, MaskOp, NumericType};

/// Widens `raw` to the value a rule compares with.
///
/// Unsigned rules keep `raw` as-is. Signed rules reinterpret the low bits
/// as a signed integer of the type's width. Strings are returned unchanged.
pub fn sign_extend(field_type: FieldType, unsigned: bool, raw: u32) -> i64 {
    if unsigned {
        return i64::from(raw);
    }
    match field_type.numeric().map(NumericType::width) {
        Some(1) => i64::from(raw as u8 as i8),
        Some(2) => i64::from(raw as u16 as i16),
        Some(_) => i64::from(raw as i32),
        None => i64::from(raw),
    }
}

/// Reinterprets the low 32 bits of `v` as the rule's C `int` or
/// `unsigned int`.
pub fn normalize(v: i64, unsigned: bool) -> i64 {
    if unsigned {
        i64::from(v as u32)
    } else {
        i64::from(v as u32 as i32)
    }
}

/// Applies a mask operation in wrapping 32-bit arithmetic.
///
/// Returns `None` for a zero divisor.
pub fn apply_op(op: MaskOp, v: i64, mask: u32, unsigned: bool) -> Option<i64> {
    let a = v as u32;
    let r = match op.op {
        ArithOp::And => a & mask,
        ArithOp::Or => a | mask,
        ArithOp::Xor => a ^ mask,
        ArithOp::Add => a.wrapping_add(mask),
        ArithOp::Sub => a.wrapping_sub(mask),
        ArithOp::Mul => a.wrapping_mul(mask),
        ArithOp::Div => a.checked_div(mask)?,
        ArithOp::Mod => a.checked_rem(mask)?,
    };
    let r = if op.inverted { !r } else { r };
    Some(normalize(i64::from(r), unsigned))
}

/// A read-only view of a buffer starting at a possibly out-of-range offset.
///
/// Bytes before the start or past the end of the buffer read as zero, so
/// nothing here can index outside `buf`.
#[derive(Clone, Copy)]
pub struct Window<'a> {
    buf: &'a [u8],
    start: i64,
}

impl<'a> Window<'a> {
    pub fn new(buf: &'a [u8], start: i64) -> Window<'a> {
        Window { buf, start }
    }

    pub fn byte(&self, i: usize) -> u8 {
        let at = match self.start.checked_add(i as i64) {
            Some(at) if at >= 0 => at,
            _ => return 0,
        };
        usize::try_from(at)
            .ok()
            .and_then(|at| self.buf.get(at))
            .copied()
            .unwrap_or(0)
    }

    /// Number of real (non zero-filled) bytes from the start, capped at
    /// `limit`.
    pub fn available(&self, limit: usize) -> usize {
        if self.start < 0 {
            return 0;
        }
        match usize::try_from(self.start) {
            Ok(start) if start < self.buf.len() => (self.buf.len() - start).min(limit),
            _ => 0,
        }
    }

    /// Copies `n` bytes, zero-filling where the buffer runs out.
    pub fn take(&self, n: usize) -> Vec<u8> {
        (0..n).map(|i| self.byte(i)).collect()
    }
}

/// Decodes a numeric field at `offset` into its raw unsigned bits.
pub fn read_numeric(buf: &[u8], offset: i64, ty: NumericType) -> u32 {
    let w = Window::new(buf, offset);
    match ty.width() {
        1 => u32::from(w.byte(0)),
        2 => {
            let b = [w.byte(0), w.byte(1)];
            u32::from(match ty.endian() {
                Endian::Big => u16::from_be_bytes(b),
                Endian::Little => u16::from_le_bytes(b),
                Endian::Native => u16::from_ne_bytes(b),
            })
        }
        _ => {
            let b = [w.byte(0), w.byte(1), w.byte(2), w.byte(3)];
            match ty.endian() {
                Endian::Big => u32::from_be_bytes(b),
                Endian::Little => u32::from_le_bytes(b),
                Endian::Native => u32::from_ne_bytes(b),
            }
        }
    }
}

/// C `isspace` in the "C" locale.
pub fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}
