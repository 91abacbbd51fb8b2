//! Sample-rate independent time unit
//!
//! One second is 56,448,000 jiffies, which divides evenly by every common
//! sample rate (44.1k and 48k families up to 384k).

/// Jiffies per second
pub const PER_SECOND: u64 = 56_448_000;
/// Jiffies per millisecond
pub const PER_MS: u64 = PER_SECOND / 1000;

/// Jiffies per sample at `sample_rate`, or 0 for a zero rate
#[must_use]
pub fn per_sample(sample_rate: u32) -> u64 {
    PER_SECOND.checked_div(u64::from(sample_rate)).unwrap_or(0)
}

/// Convert jiffies to whole milliseconds
#[must_use]
pub fn to_ms(jiffies: u64) -> u64 {
    jiffies / PER_MS
}

/// Convert milliseconds to jiffies
#[must_use]
pub fn from_ms(ms: u64) -> u64 {
    ms.saturating_mul(PER_MS)
}

/// Convert a sample count to jiffies
#[must_use]
pub fn from_samples(samples: u64, sample_rate: u32) -> u64 {
    samples.saturating_mul(per_sample(sample_rate))
}

/// Convert jiffies to whole samples
#[must_use]
pub fn to_samples(jiffies: u64, sample_rate: u32) -> u64 {
    jiffies.checked_div(per_sample(sample_rate)).unwrap_or(0)
}
