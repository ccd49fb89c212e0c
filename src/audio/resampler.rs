//! Sample-rate conversion between the device and backend rates
//!
//! Three paths: identity when rates match, block averaging when the input
//! rate is an integer multiple of the output rate (the 48k -> 16k mic path),
//! and linear interpolation for everything else (the 24k -> 48k playback
//! path). Block averaging doubles as a cheap low-pass for speech.

/// Converts mono i16 audio between two fixed sample rates
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    from: u32,
    to: u32,
}

impl Resampler {
    /// Create a resampler for the given rate pair
    #[must_use]
    pub const fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// Input rate in Hz
    #[must_use]
    pub const fn input_rate(&self) -> u32 {
        self.from
    }

    /// Output rate in Hz
    #[must_use]
    pub const fn output_rate(&self) -> u32 {
        self.to
    }

    /// Convert a chunk of samples to the output rate.
    ///
    /// A trailing partial block is dropped on the integer-factor path; chunk
    /// sizes are expected to be multiples of the factor.
    #[must_use]
    pub fn process(&self, input: &[i16]) -> Vec<i16> {
        if self.from == self.to {
            return input.to_vec();
        }

        if self.from % self.to == 0 {
            let factor = (self.from / self.to) as usize;
            return downsample_mean(input, factor);
        }

        interpolate(input, self.from, self.to)
    }
}

/// Average each block of `factor` samples into one output sample
#[allow(clippy::cast_possible_truncation)]
fn downsample_mean(input: &[i16], factor: usize) -> Vec<i16> {
    input
        .chunks_exact(factor)
        .map(|block| {
            let sum: i64 = block.iter().map(|&s| i64::from(s)).sum();
            #[allow(clippy::cast_precision_loss)]
            let mean = sum as f64 / block.len() as f64;
            mean.round() as i16
        })
        .collect()
}

/// Linear interpolation across the full input span
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn interpolate(input: &[i16], from: u32, to: u32) -> Vec<i16> {
    if input.is_empty() {
        return Vec::new();
    }

    let n_out = (input.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    if n_out == 0 {
        return Vec::new();
    }
    if input.len() == 1 || n_out == 1 {
        return vec![input[0]; n_out];
    }

    let scale = (input.len() - 1) as f64 / (n_out - 1) as f64;
    (0..n_out)
        .map(|i| {
            let pos = i as f64 * scale;
            let lo = pos.floor() as usize;
            let hi = lo.min(input.len() - 2) + 1;
            let frac = pos - lo as f64;
            let sample =
                f64::from(input[lo]).mul_add(1.0 - frac, f64::from(input[hi]) * frac);
            sample.round() as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_match() {
        let r = Resampler::new(24_000, 24_000);
        let input = vec![1, -2, 3, -4, 5];
        assert_eq!(r.process(&input), input);
    }

    #[test]
    fn integer_factor_is_block_mean() {
        let r = Resampler::new(48_000, 16_000);
        // factor 3: each output sample is the mean of three inputs
        let input = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(r.process(&input), vec![2, 5]);
    }

    #[test]
    fn trailing_partial_block_is_dropped() {
        let r = Resampler::new(48_000, 16_000);
        let input = vec![3, 3, 3, 9, 9, 9, 100];
        assert_eq!(r.process(&input), vec![3, 9]);
    }

    #[test]
    fn block_mean_rounds_to_nearest() {
        let r = Resampler::new(32_000, 16_000);
        // factor 2: mean of (1, 2) is 1.5, rounds to 2
        assert_eq!(r.process(&[1, 2]), vec![2]);
        assert_eq!(r.process(&[-1, -2]), vec![-2]);
    }

    #[test]
    fn interpolation_preserves_endpoints() {
        let r = Resampler::new(24_000, 48_000);
        let input = vec![0, 100, -50, 32_000];
        let out = r.process(&input);
        assert_eq!(out.len(), input.len() * 2);
        assert_eq!(out[0], input[0]);
        assert_eq!(*out.last().unwrap(), *input.last().unwrap());
    }

    #[test]
    fn interpolation_of_constant_signal_is_constant() {
        let r = Resampler::new(24_000, 48_000);
        let out = r.process(&[700; 64]);
        assert_eq!(out.len(), 128);
        assert!(out.iter().all(|&s| s == 700));
    }

    #[test]
    fn interpolation_of_ramp_is_monotonic() {
        let r = Resampler::new(24_000, 48_000);
        let input: Vec<i16> = (0..100).map(|i| i * 10).collect();
        let out = r.process(&input);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(Resampler::new(48_000, 16_000).process(&[]).is_empty());
        assert!(Resampler::new(24_000, 48_000).process(&[]).is_empty());
    }
}
