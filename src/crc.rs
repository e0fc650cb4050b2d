/*
    FluxFox
    https://github.com/dbalsom/fluxfox

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/crc.rs

    Implements the CRC-16/CCITT-FALSE accumulator used to protect sector ID and data fields.
*/

pub const CRC16_POLY: u16 = 0x1021;
pub const CRC16_INIT: u16 = 0xFFFF;

const CRC16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            }
            else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-16/CCITT-FALSE (polynomial 0x1021, initial value 0xFFFF, MSB-first,
/// no final XOR).
///
/// Appending the big-endian CRC of a message to the message and continuing to push
/// yields a residual of 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Crc16 {
    crc: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { crc: CRC16_INIT }
    }

    /// Create an accumulator continuing from a previous CRC value.
    pub fn with_value(crc: u16) -> Self {
        Self { crc }
    }

    #[inline]
    pub fn push(&mut self, byte: u8) {
        let index = ((self.crc >> 8) ^ byte as u16) as usize;
        self.crc = (self.crc << 8) ^ CRC16_TABLE[index];
    }

    pub fn push_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.push(byte);
        }
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.crc
    }

    pub fn reset(&mut self) {
        self.crc = CRC16_INIT;
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate the CRC of a buffer in one shot.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.push_slice(data);
    crc.value()
}

/// Return a tuple of the recorded (trailing big-endian) and calculated CRC of `data`.
pub fn crc16_bytes(data: &[u8]) -> (u16, u16) {
    let split = data.len().saturating_sub(2);
    let recorded = match &data[split..] {
        [hi, lo] => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    };
    (recorded, crc16(&data[..split]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise reference implementation
    fn crc16_bitwise(data: &[u8]) -> u16 {
        let mut crc = CRC16_INIT;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                if crc & 0x8000 != 0 {
                    crc = (crc << 1) ^ CRC16_POLY;
                }
                else {
                    crc <<= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_residual() {
        let mut msg = b"123456789".to_vec();
        let crc = crc16(&msg);
        msg.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(crc16(&msg), 0);

        let (recorded, calculated) = crc16_bytes(&msg);
        assert_eq!(recorded, calculated);
    }

    #[test]
    fn test_incremental_matches_table() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut crc = Crc16::default();
        for chunk in data.chunks(7) {
            crc.push_slice(chunk);
        }
        assert_eq!(crc.value(), crc16_bitwise(&data));
    }

    #[test]
    fn test_reset() {
        let mut crc = Crc16::new();
        crc.push_slice(&[0xA1, 0xA1, 0xA1, 0xFE]);
        assert_ne!(crc.value(), CRC16_INIT);
        crc.reset();
        assert_eq!(crc.value(), CRC16_INIT);
        assert_eq!(Crc16::with_value(0xCDB4).value(), 0xCDB4);
    }

    #[test]
    fn test_idam_crc() {
        // A1 A1 A1 FE is the standard MFM IDAM CRC preamble
        assert_eq!(crc16(&[0xA1, 0xA1, 0xA1]), 0xCDB4);
    }
}
