//! Noise reduction for raw ADC samples.
//!
//! [`trimmed_mean`] drops the most extreme low and high sample in a single
//! pass, without sorting. The extremes are tracked as running min/max:
//! whenever a new sample displaces one of them, the displaced value joins
//! the sum, so only the final min and max stay out of it.

use crate::FilterError;

/// Below this many samples there is nothing worth trimming
const MIN_TRIM_SAMPLES: usize = 5;

/// Outlier trimmed mean of `samples`.
///
/// With fewer than five samples this is a plain mean, computed in integer
/// arithmetic and truncated before conversion, the same as the ADC sketch
/// this replaced did. Larger windows divide the trimmed sum in floating
/// point.
pub fn trimmed_mean(samples: &[i32]) -> Result<f64, FilterError> {
    let count = samples.len();
    if count == 0 {
        log::error!("Cannot average an empty sample window");
        return Err(FilterError::InvalidInput);
    }

    if count < MIN_TRIM_SAMPLES {
        let amount: i64 = samples.iter().map(|&s| s as i64).sum();
        return Ok((amount / count as i64) as f64);
    }

    let (mut min, mut max) = if samples[0] < samples[1] {
        (samples[0], samples[1])
    } else {
        (samples[1], samples[0])
    };

    let mut amount: i64 = 0;
    for &sample in &samples[2..] {
        if sample < min {
            amount += min as i64;
            min = sample;
        } else if sample > max {
            amount += max as i64;
            max = sample;
        } else {
            amount += sample as i64;
        }
    }

    Ok(amount as f64 / (count - 2) as f64)
}

/// Fixed window of the most recent `N` samples. Starts zero filled, so
/// the window is always "full"; `push` overwrites the oldest slot.
#[derive(Debug, Clone)]
pub struct SampleRing<const N: usize> {
    samples: [i32; N],
    cursor: usize,
}

impl<const N: usize> Default for SampleRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SampleRing<N> {
    pub const fn new() -> Self {
        Self {
            samples: [0; N],
            cursor: 0,
        }
    }

    pub fn push(&mut self, sample: i32) {
        if N == 0 {
            return;
        }
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % N;
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Next slot to be written
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Storage order, not arrival order
    pub fn as_slice(&self) -> &[i32] {
        &self.samples
    }

    /// Trimmed mean over the whole window
    pub fn average(&self) -> Result<f64, FilterError> {
        trimmed_mean(&self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sort based reference: drop true min and max
    fn exact(samples: &[i32]) -> f64 {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let inner = &sorted[1..sorted.len() - 1];
        inner.iter().map(|&s| s as f64).sum::<f64>() / inner.len() as f64
    }

    #[test]
    fn empty_is_invalid() {
        assert_eq!(trimmed_mean(&[]), Err(FilterError::InvalidInput));
    }

    #[test]
    fn single_sample() {
        assert_eq!(trimmed_mean(&[5]), Ok(5.0));
    }

    #[test]
    fn short_windows_truncate() {
        // 7 / 2 = 3 in integer math
        assert_eq!(trimmed_mean(&[3, 4]), Ok(3.0));
        assert_eq!(trimmed_mean(&[1, 2, 2, 2]), Ok(1.0));
    }

    #[test]
    fn ascending_drops_ends() {
        let samples = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(trimmed_mean(&samples), Ok(5.5));
        assert_eq!(exact(&samples), 5.5);
    }

    #[test]
    fn spikes_are_rejected() {
        let samples = [512, 510, 1023, 511, 0, 513, 509, 512];
        let mean = trimmed_mean(&samples).unwrap();
        assert!((mean - exact(&samples)).abs() < 1e-9);
        assert!((mean - 511.1666).abs() < 1e-3);
    }

    #[test]
    fn matches_sorted_reference() {
        let windows: [&[i32]; 4] = [
            &[0, 10, 5, -5, 5],
            &[1023, 0, 400, 401, 399, 402],
            &[7, 7, 7, 1, 7, 9],
            &[10, 9, 8, 7, 6, 5, 4, 3, 2, 1],
        ];
        for samples in windows {
            let mean = trimmed_mean(samples).unwrap();
            assert!((mean - exact(samples)).abs() < 1e-9, "{samples:?}");
        }
    }

    #[test]
    fn constant_signal() {
        assert_eq!(trimmed_mean(&[300; 40]), Ok(300.0));
    }

    #[test]
    fn ring_starts_zeroed() {
        let ring = SampleRing::<40>::new();
        assert_eq!(ring.capacity(), 40);
        assert_eq!(ring.cursor(), 0);
        assert!(ring.as_slice().iter().all(|&s| s == 0));
        assert_eq!(ring.average(), Ok(0.0));
    }

    #[test]
    fn ring_wraps_and_overwrites_oldest() {
        let mut ring = SampleRing::<5>::new();
        for s in 1..=5 {
            ring.push(s);
        }
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.as_slice(), &[1, 2, 3, 4, 5]);

        ring.push(6);
        ring.push(7);
        assert_eq!(ring.cursor(), 2);
        assert_eq!(ring.as_slice(), &[6, 7, 3, 4, 5]);
    }

    #[test]
    fn ring_cursor_stays_in_range() {
        let mut ring = SampleRing::<40>::new();
        for s in 0..1000 {
            ring.push(s);
            assert!(ring.cursor() < ring.capacity());
        }
    }
}
