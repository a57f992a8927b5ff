//! Tagged-width wire codec for boundary command records.
//!
//! The caller and the kernel may disagree on pointer width: a 32-bit client
//! talking to a 64-bit kernel sends records whose pointer-sized fields are
//! four bytes wide. Rather than shifting raw struct images around, every
//! record crosses the boundary through this codec, which walks the record's
//! field schema and widens or narrows pointer-sized fields in exactly one
//! place, in both directions.

/// Wire layout selected by the caller's pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Caller shares the kernel's pointer width.
    Native,
    /// Caller uses 32-bit pointers; pointer-sized fields are narrowed.
    Compat32,
}

impl WireFormat {
    /// Width of a pointer-sized field in this layout.
    #[inline]
    pub const fn ptr_size(self) -> usize {
        match self {
            WireFormat::Native => 8,
            WireFormat::Compat32 => 4,
        }
    }
}

/// Kinds of fields a record schema may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 32-bit field, same width in both layouts.
    U32,
    /// 64-bit field, same width in both layouts (sizes, handles).
    U64,
    /// Pointer-sized field, narrowed in the compat layout.
    Ptr,
}

impl FieldKind {
    #[inline]
    pub const fn wire_size(self, format: WireFormat) -> usize {
        match self {
            FieldKind::U32 => 4,
            FieldKind::U64 => 8,
            FieldKind::Ptr => format.ptr_size(),
        }
    }
}

/// How a narrowed pointer field extends to the kernel's native width.
///
/// This is a named per-architecture policy, not an incidental detail: the
/// four transferred bytes hold the low-order 32 bits of the value, and where
/// they sit in the widened native image depends on host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrExtend {
    /// Value bytes occupy the low-order end of the native image; the
    /// high-order bytes are zero-filled (little-endian hosts).
    ZeroHigh,
    /// Value bytes occupy the high-order end of the native image; the
    /// low-order bytes are zero-filled (big-endian hosts).
    ZeroLow,
}

/// Policy for the compiled target.
pub const PTR_EXTEND: PtrExtend = if cfg!(target_endian = "little") {
    PtrExtend::ZeroHigh
} else {
    PtrExtend::ZeroLow
};

/// Errors produced while encoding or decoding a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Buffer too short for the next field.
    Truncated,
    /// Pointer value does not fit the caller's pointer width.
    PtrRange,
}

/// Upper bound on any record's wire size; marshaling code stages records
/// in fixed buffers of this size.
pub const MAX_WIRE_SIZE: usize = 64;

/// A record that can cross the boundary in either wire layout.
pub trait WireRecord: Sized {
    /// Field schema in wire order.
    const SCHEMA: &'static [FieldKind];

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<(), WireError>;
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError>;

    /// Total wire size of this record under `format`.
    fn wire_size(format: WireFormat) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < Self::SCHEMA.len() {
            total += Self::SCHEMA[i].wire_size(format);
            i += 1;
        }
        total
    }
}

/// Sequential field writer over a byte buffer.
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    format: WireFormat,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8], format: WireFormat) -> Self {
        Self { buf, pos: 0, format }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.put(&value.to_ne_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), WireError> {
        self.put(&value.to_ne_bytes())
    }

    /// Write a pointer-sized field, narrowing it under the compat layout.
    ///
    /// A value that does not fit the caller's pointer width is an error:
    /// the kernel must never hand a 32-bit client a truncated address.
    pub fn put_ptr(&mut self, value: u64) -> Result<(), WireError> {
        match self.format {
            WireFormat::Native => self.put(&value.to_ne_bytes()),
            WireFormat::Compat32 => {
                if value > u32::MAX as u64 {
                    return Err(WireError::PtrRange);
                }
                let native = value.to_ne_bytes();
                let narrow = match PTR_EXTEND {
                    PtrExtend::ZeroHigh => &native[..4],
                    PtrExtend::ZeroLow => &native[4..],
                };
                self.put(narrow)
            }
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }
}

/// Sequential field reader over a byte buffer.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    format: WireFormat,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], format: WireFormat) -> Self {
        Self { buf, pos: 0, format }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_ne_bytes(raw))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_ne_bytes(raw))
    }

    /// Read a pointer-sized field, zero-extending it under the compat
    /// layout according to [`PTR_EXTEND`].
    pub fn get_ptr(&mut self) -> Result<u64, WireError> {
        match self.format {
            WireFormat::Native => self.get_u64(),
            WireFormat::Compat32 => {
                let bytes = self.take(4)?;
                let mut native = [0u8; 8];
                match PTR_EXTEND {
                    PtrExtend::ZeroHigh => native[..4].copy_from_slice(bytes),
                    PtrExtend::ZeroLow => native[4..].copy_from_slice(bytes),
                }
                Ok(u64::from_ne_bytes(native))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ptr_round_trip_native() {
        let mut buf = [0u8; 8];
        let mut w = WireWriter::new(&mut buf, WireFormat::Native);
        w.put_ptr(0xDEAD_BEEF_CAFE_F00D).unwrap();
        let mut r = WireReader::new(&buf, WireFormat::Native);
        assert_eq!(r.get_ptr().unwrap(), 0xDEAD_BEEF_CAFE_F00D);
    }

    #[test]
    fn compat_ptr_is_four_bytes_and_zero_extends() {
        let mut buf = [0xAAu8; 8];
        let mut w = WireWriter::new(&mut buf, WireFormat::Compat32);
        w.put_ptr(0x1234_5678).unwrap();
        assert_eq!(w.written(), 4);
        let mut r = WireReader::new(&buf[..4], WireFormat::Compat32);
        assert_eq!(r.get_ptr().unwrap(), 0x0000_0000_1234_5678);
    }

    #[test]
    fn compat_ptr_rejects_wide_values() {
        let mut buf = [0u8; 8];
        let mut w = WireWriter::new(&mut buf, WireFormat::Compat32);
        assert_eq!(w.put_ptr(1 << 32), Err(WireError::PtrRange));
    }

    #[test]
    fn short_buffer_is_truncated() {
        let mut buf = [0u8; 3];
        let mut w = WireWriter::new(&mut buf, WireFormat::Native);
        assert_eq!(w.put_u32(7), Err(WireError::Truncated));
        let mut r = WireReader::new(&buf, WireFormat::Native);
        assert_eq!(r.get_u32(), Err(WireError::Truncated));
    }

    proptest! {
        #[test]
        fn compat_ptr_round_trip(value in any::<u32>()) {
            let mut buf = [0u8; 4];
            let mut w = WireWriter::new(&mut buf, WireFormat::Compat32);
            w.put_ptr(value as u64).unwrap();
            let mut r = WireReader::new(&buf, WireFormat::Compat32);
            prop_assert_eq!(r.get_ptr().unwrap(), value as u64);
        }

        #[test]
        fn u64_round_trip_both_formats(value in any::<u64>()) {
            for format in [WireFormat::Native, WireFormat::Compat32] {
                let mut buf = [0u8; 8];
                let mut w = WireWriter::new(&mut buf, format);
                w.put_u64(value).unwrap();
                let mut r = WireReader::new(&buf, format);
                prop_assert_eq!(r.get_u64().unwrap(), value);
            }
        }
    }
}
