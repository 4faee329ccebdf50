//! MSB-first bit packing for the TC string.

use crate::error::TcfError;

#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the low `bits` bits of `value`, most significant first.
    pub fn write(&mut self, value: u64, bits: usize) -> Result<(), TcfError> {
        if bits < 64 && value >> bits != 0 {
            return Err(TcfError::Overflow { value, bits });
        }
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    pub fn write_bool(&mut self, bit: bool) {
        self.push_bit(bit);
    }

    fn push_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[self.len / 8] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    pub fn bit_len(&self) -> usize {
        self.len
    }

    /// The written bits, zero-padded to a byte boundary.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn read(&mut self, bits: usize) -> Result<u64, TcfError> {
        if self.pos + bits > self.bytes.len() * 8 {
            return Err(TcfError::Truncated(self.pos));
        }
        let mut value = 0u64;
        for _ in 0..bits {
            let byte = self.bytes[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | u64::from(bit);
            self.pos += 1;
        }
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, TcfError> {
        Ok(self.read(1)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_most_significant_bit_first() {
        let mut w = BitWriter::new();
        w.write(2, 6).unwrap();
        w.write_bool(true);
        w.write(1, 3).unwrap();
        assert_eq!(w.bit_len(), 10);
        assert_eq!(w.into_bytes(), vec![0b0000_1010, 0b0100_0000]);
    }

    #[test]
    fn rejects_values_wider_than_the_field() {
        let mut w = BitWriter::new();
        assert_eq!(w.write(64, 6), Err(TcfError::Overflow { value: 64, bits: 6 }));
    }

    #[test]
    fn reader_reports_truncation() {
        let bytes = [0b1010_0000];
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(3).unwrap(), 0b101);
        assert_eq!(r.read(6), Err(TcfError::Truncated(3)));
    }
}
