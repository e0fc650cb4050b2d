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

    src/detect/mod.rs

    Encoding and drive detection.
*/

//! Detection of the track encoding and the drive a capture was taken from.
//!
//! The [EncodingClassifier] consumes recovered bits and reports the line code they were
//! written with. The [InterfaceProfiler] combines that result with timing and signaling
//! evidence into a [DriveProfile].

pub mod classifier;
pub mod profiler;

pub use classifier::{
    Classification,
    ClassifierConfig,
    ClassifierState,
    EncodingClassifier,
    EncodingScore,
    EncodingScoreboard,
    SampleWindow,
};
pub use profiler::{DriveProfile, InterfaceProfiler, ProfilerConfig, RotationEvidence, StepEvidence, SubScore};
