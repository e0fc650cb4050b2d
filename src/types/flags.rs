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

    flags.rs

    Defines common bitflags
*/

use bitflags::bitflags;

bitflags! {
    /// Drive interface lines observed to be driven as differential pairs during a capture.
    /// Single-ended floppy interfaces drive none of these; ST-506 drives a differential
    /// read data pair; ESDI adds differential read clock and write clock pairs.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[rustfmt::skip]
    pub struct SignalLines: u8 {
        #[doc = "Read data is a differential pair"]
        const READ_DATA     = 0b0000_0001;
        #[doc = "Write data is a differential pair"]
        const WRITE_DATA    = 0b0000_0010;
        #[doc = "Read clock is a differential pair"]
        const READ_CLOCK    = 0b0000_0100;
        #[doc = "Write clock is a differential pair"]
        const WRITE_CLOCK   = 0b0000_1000;
    }
}

impl SignalLines {
    /// Return the number of differential pairs present in this sample.
    pub fn differential_count(&self) -> u32 {
        self.bits().count_ones()
    }
}
