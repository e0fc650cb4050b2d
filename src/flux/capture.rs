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

    src/flux/capture.rs

    Defines the FluxEvent and FluxCapture types consumed by the recovery pipeline.
*/
use crate::RecoveryError;

/// The native capture resolution in nanoseconds per tick.
pub const DEFAULT_TICK_NS: f64 = 5.0;

/// A single flux transition, stored as the number of capture ticks since the previous
/// transition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxEvent {
    pub ticks: u32,
}

impl From<u32> for FluxEvent {
    fn from(ticks: u32) -> Self {
        FluxEvent { ticks }
    }
}

impl FluxEvent {
    pub fn new(ticks: u32) -> Self {
        FluxEvent { ticks }
    }

    /// Return the interval in seconds at the given tick resolution.
    #[inline]
    pub fn seconds(&self, tick_ns: f64) -> f64 {
        self.ticks as f64 * tick_ns * 1e-9
    }

    /// Return the interval in whole nanoseconds at the given tick resolution.
    #[inline]
    pub fn nanos(&self, tick_ns: f64) -> u64 {
        (self.ticks as f64 * tick_ns).round() as u64
    }
}

/// A struct containing statistics about a single capture.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RevolutionStats {
    /// The number of flux transitions in the capture.
    pub flux_count: usize,
    /// The time between the first two index pulses in seconds, if two were captured.
    pub index_time: Option<f64>,
    /// The sum of all intervals in seconds.
    pub duration: f64,
    /// The mean interval in seconds.
    pub mean_interval: f64,
    /// The duration of the first flux transition.
    pub first_ft: f64,
    /// The duration of the last flux transition.
    pub last_ft: f64,
}

/// An ordered sequence of [FluxEvent]s plus the index pulse timestamps bounding one or more
/// revolutions. Index timestamps are in ticks from the start of the capture.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxCapture {
    events: Vec<FluxEvent>,
    index_times: Vec<u64>,
    tick_ns: f64,
}

impl FluxCapture {
    /// Create a new capture. Index timestamps must be non-decreasing and the tick resolution
    /// positive.
    pub fn new(events: Vec<FluxEvent>, index_times: Vec<u64>, tick_ns: f64) -> Result<Self, RecoveryError> {
        if !(tick_ns > 0.0) {
            return Err(RecoveryError::ParameterError(format!("invalid tick resolution {}", tick_ns)));
        }
        if index_times.windows(2).any(|w| w[1] < w[0]) {
            return Err(RecoveryError::ParameterError(
                "index timestamps are not in order".to_string(),
            ));
        }
        Ok(FluxCapture {
            events,
            index_times,
            tick_ns,
        })
    }

    /// Create a new capture from raw tick intervals.
    pub fn from_ticks(ticks: &[u32], index_times: Vec<u64>, tick_ns: f64) -> Result<Self, RecoveryError> {
        Self::new(ticks.iter().copied().map(FluxEvent::from).collect(), index_times, tick_ns)
    }

    /// Create a new capture from intervals and index times in seconds, quantized to `tick_ns`.
    pub fn from_seconds(deltas: &[f64], index_times: &[f64], tick_ns: f64) -> Result<Self, RecoveryError> {
        if !(tick_ns > 0.0) {
            return Err(RecoveryError::ParameterError(format!("invalid tick resolution {}", tick_ns)));
        }
        let to_ticks = |s: f64| (s * 1e9 / tick_ns).round().max(0.0);
        let events = deltas
            .iter()
            .map(|&d| FluxEvent::new(to_ticks(d).min(u32::MAX as f64) as u32))
            .collect();
        let index = index_times.iter().map(|&t| to_ticks(t) as u64).collect();
        Self::new(events, index, tick_ns)
    }

    pub fn events(&self) -> &[FluxEvent] {
        &self.events
    }

    pub fn index_times(&self) -> &[u64] {
        &self.index_times
    }

    pub fn tick_ns(&self) -> f64 {
        self.tick_ns
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over the intervals of the capture in seconds.
    pub fn delta_iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.events.iter().map(move |e| e.seconds(self.tick_ns))
    }

    /// Return the total duration of all intervals in ticks.
    pub fn duration_ticks(&self) -> u64 {
        self.events.iter().map(|e| e.ticks as u64).sum()
    }

    /// Return the periods between successive index pulses in seconds.
    pub fn index_periods(&self) -> Vec<f64> {
        self.index_times
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 * self.tick_ns * 1e-9)
            .collect()
    }

    /// Return the number of complete revolutions bounded by index pulses.
    pub fn revolution_count(&self) -> usize {
        self.index_times.len().saturating_sub(1)
    }

    /// Split the capture into one capture per index-bounded revolution. A transition belongs to
    /// the revolution in which it occurred. Captures with fewer than two index pulses are
    /// returned whole.
    pub fn revolutions(&self) -> Vec<FluxCapture> {
        if self.index_times.len() < 2 {
            return vec![self.clone()];
        }

        let mut revs: Vec<Vec<FluxEvent>> = vec![Vec::new(); self.revolution_count()];
        let mut time = 0u64;
        let mut rev = 0usize;
        for event in &self.events {
            time += event.ticks as u64;
            if time <= self.index_times[0] {
                continue;
            }
            while rev + 1 < self.index_times.len() && time > self.index_times[rev + 1] {
                rev += 1;
            }
            if rev + 1 >= self.index_times.len() {
                break;
            }
            revs[rev].push(*event);
        }

        log::debug!(
            "FluxCapture::revolutions(): Split {} transitions into {} revolutions",
            self.events.len(),
            revs.len()
        );

        revs.into_iter()
            .enumerate()
            .map(|(i, events)| FluxCapture {
                events,
                index_times: vec![0, self.index_times[i + 1] - self.index_times[i]],
                tick_ns: self.tick_ns,
            })
            .collect()
    }

    /// Retrieve statistics about the capture.
    pub fn stats(&self) -> RevolutionStats {
        let duration = self.duration_ticks() as f64 * self.tick_ns * 1e-9;
        RevolutionStats {
            flux_count: self.events.len(),
            index_time: self.index_periods().first().copied(),
            duration,
            mean_interval: if self.events.is_empty() {
                0.0
            }
            else {
                duration / self.events.len() as f64
            },
            first_ft: self.events.first().map(|e| e.seconds(self.tick_ns)).unwrap_or(0.0),
            last_ft: self.events.last().map(|e| e.seconds(self.tick_ns)).unwrap_or(0.0),
        }
    }
}
