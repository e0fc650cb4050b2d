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

    chs.rs

    Defines the sector ID type
*/
use std::fmt::Display;

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;

/// A structure representing the four components of a sector ID field:
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s)
///  - Sector Size (n)
///
/// A [DiskChsn] is decoded from the address mark of a sector and may differ from the physical
/// location the sector was read at.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskChsn {
    c: u16,
    h: u8,
    s: u8,
    n: u8,
}

impl Display for DiskChsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{} s:{:3} n:{}]", self.c, self.h, self.s, self.n)
    }
}

impl From<(u16, u8, u8, u8)> for DiskChsn {
    fn from((c, h, s, n): (u16, u8, u8, u8)) -> Self {
        Self::new(c, h, s, n)
    }
}

impl DiskChsn {
    /// Create a new DiskChsn structure from the four sector ID components.
    pub fn new(c: u16, h: u8, s: u8, n: u8) -> Self {
        Self { c, h, s, n }
    }

    /// Return all four sector ID components.
    #[inline]
    pub fn get(&self) -> (u16, u8, u8, u8) {
        (self.c, self.h, self.s, self.n)
    }
    /// Return the cylinder (c) field.
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head (h) field.
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the sector id (s) field.
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }
    /// Return the size (n) field.
    #[inline]
    pub fn n(&self) -> u8 {
        self.n
    }
    /// Return the size of the 'n' parameter in bytes.
    #[inline]
    pub fn n_size(&self) -> usize {
        DiskChsn::n_to_bytes(self.n)
    }

    /// Convert the value of the sector size field (n) into bytes. Sizes beyond
    /// [MAXIMUM_SECTOR_SIZE] are capped.
    #[inline]
    pub fn n_to_bytes(n: u8) -> usize {
        // Large shifts push the size out of the word entirely.
        match 128usize.checked_shl(n as u32) {
            Some(size) if size != 0 && size <= MAXIMUM_SECTOR_SIZE => size,
            _ => MAXIMUM_SECTOR_SIZE,
        }
    }

    /// Convert a size in bytes into a valid sector size field value (n)
    #[inline]
    pub fn bytes_to_n(size: usize) -> u8 {
        let mut n = 0;
        let mut size = size;
        while size > 128 {
            size >>= 1;
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_n_sizes() {
        assert_eq!(DiskChsn::n_to_bytes(0), 128);
        assert_eq!(DiskChsn::n_to_bytes(2), 512);
        assert_eq!(DiskChsn::n_to_bytes(7), 8192);
        assert_eq!(DiskChsn::n_to_bytes(0xFF), MAXIMUM_SECTOR_SIZE);
        assert_eq!(DiskChsn::bytes_to_n(512), 2);
    }

    #[test]
    fn test_n_sizes_never_wrap() {
        for n in 6..=u8::MAX {
            assert_eq!(DiskChsn::n_to_bytes(n), MAXIMUM_SECTOR_SIZE, "n = {}", n);
        }
        assert_eq!(DiskChsn::new(0, 0, 1, 64).n_size(), MAXIMUM_SECTOR_SIZE);
    }
}
