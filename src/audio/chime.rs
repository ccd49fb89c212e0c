//! Synthesized UI tones
//!
//! Short cues played through conversation playback: a rising triad when the
//! gateway comes online and a two-note blip for inbound notifications.

/// Startup cue: C5, E5, G5 rising
#[must_use]
pub fn startup_chime(sample_rate: u32) -> Vec<i16> {
    let mut samples = Vec::new();
    for freq in [523.25, 659.25, 783.99] {
        samples.extend(tone(sample_rate, freq, 0.12, 0.35));
    }
    samples
}

/// Notification cue: two short A5 blips
#[must_use]
pub fn notification_chime(sample_rate: u32) -> Vec<i16> {
    let mut samples = Vec::new();
    samples.extend(tone(sample_rate, 880.0, 0.08, 0.3));
    samples.extend(vec![0; (sample_rate / 20) as usize]);
    samples.extend(tone(sample_rate, 880.0, 0.08, 0.3));
    samples
}

/// Sine tone with a short linear fade at both ends to avoid clicks
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn tone(sample_rate: u32, frequency: f64, duration_secs: f64, amplitude: f64) -> Vec<i16> {
    let num_samples = (f64::from(sample_rate) * duration_secs) as usize;
    let fade = (f64::from(sample_rate) * 0.005) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f64 / f64::from(sample_rate);
            let mut value =
                amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin();

            if i < fade {
                value *= i as f64 / fade as f64;
            } else if i >= num_samples - fade {
                value *= (num_samples - i) as f64 / fade as f64;
            }

            (value * 32_767.0) as i16
        })
        .collect()
}
