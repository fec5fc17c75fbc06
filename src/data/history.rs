//! Bounded rolling history of readings.
//!
//! Each channel keeps at most `capacity` values. Inserting past capacity
//! drops the oldest value first, so memory stays constant no matter how long
//! a session streams.

use std::collections::VecDeque;

use super::reading::Channel;

/// Default number of values kept per channel.
pub const HISTORY_CAPACITY: usize = 100;

/// Largest capacity a configuration may ask for.
pub const MAX_HISTORY_CAPACITY: usize = 100_000;

/// Summary statistics over the values currently held by a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistoryStats {
    /// Smallest value.
    pub min: f32,
    /// Largest value.
    pub max: f32,
    /// Arithmetic mean.
    pub mean: f32,
    /// Most recently pushed value.
    pub latest: f32,
    /// Number of values the statistics cover.
    pub count: usize,
}

/// Fixed-capacity FIFO of values for a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    values: VecDeque<f32>,
    capacity: usize,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `capacity` values.
    ///
    /// Only the default capacity is allocated up front; larger buffers grow
    /// as values arrive.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Append a value, evicting the oldest one when over capacity.
    pub fn push(&mut self, value: f32) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Points for plotting, indexed by position in the buffer.
    pub fn snapshot(&self) -> Vec<(usize, f32)> {
        self.values.iter().copied().enumerate().collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<f32> {
        self.values.iter().copied().collect()
    }

    /// Remove every value.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of values held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of values held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest value still held.
    pub fn first(&self) -> Option<f32> {
        self.values.front().copied()
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<f32> {
        self.values.back().copied()
    }

    /// Compute min/max/mean over the held values.
    pub fn stats(&self) -> Option<HistoryStats> {
        let latest = self.latest()?;
        let (mut min, mut max, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0.0f64);
        for &value in &self.values {
            min = min.min(value);
            max = max.max(value);
            sum += value as f64;
        }

        Some(HistoryStats {
            min,
            max,
            mean: (sum / self.values.len() as f64) as f32,
            latest,
            count: self.values.len(),
        })
    }
}

/// Rolling history for both channels.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    temperature: SampleBuffer,
    humidity: SampleBuffer,
}

impl HistoryBuffer {
    /// Create a history holding at most `capacity` values per channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            temperature: SampleBuffer::new(capacity),
            humidity: SampleBuffer::new(capacity),
        }
    }

    /// Get the buffer for a channel.
    pub fn channel(&self, channel: Channel) -> &SampleBuffer {
        match channel {
            Channel::Temperature => &self.temperature,
            Channel::Humidity => &self.humidity,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut SampleBuffer {
        match channel {
            Channel::Temperature => &mut self.temperature,
            Channel::Humidity => &mut self.humidity,
        }
    }

    /// Append a value to a channel.
    pub fn push(&mut self, channel: Channel, value: f32) {
        self.channel_mut(channel).push(value);
    }

    /// Plot points for a channel.
    pub fn snapshot(&self, channel: Channel) -> Vec<(usize, f32)> {
        self.channel(channel).snapshot()
    }

    /// Empty a single channel.
    pub fn clear(&mut self, channel: Channel) {
        self.channel_mut(channel).clear();
    }

    /// Empty both channels.
    pub fn clear_all(&mut self) {
        self.temperature.clear();
        self.humidity.clear();
    }

    /// Number of values held for a channel.
    pub fn len(&self, channel: Channel) -> usize {
        self.channel(channel).len()
    }

    /// Statistics for a channel, `None` when it is empty.
    pub fn stats(&self, channel: Channel) -> Option<HistoryStats> {
        self.channel(channel).stats()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}
