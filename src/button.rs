//! Push-to-talk button input
//!
//! The button is a GPIO line exposed through sysfs; the input loop polls
//! its level and derives press/release edges. A device without a button
//! gets the no-op implementation and runs headless.

use std::path::PathBuf;

use crate::config::ButtonConfig;

/// Source of the push-to-talk line level
pub trait TalkButton: Send {
    /// Current level, debounced by the caller's poll cadence
    fn is_pressed(&mut self) -> bool;
}

/// sysfs GPIO line
pub struct GpioButton {
    path: PathBuf,
    active_low: bool,
    warned: bool,
}

impl GpioButton {
    /// Create a reader for the given value file
    #[must_use]
    pub const fn new(path: PathBuf, active_low: bool) -> Self {
        Self {
            path,
            active_low,
            warned: false,
        }
    }
}

impl TalkButton for GpioButton {
    fn is_pressed(&mut self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let high = raw.trim() == "1";
                if self.active_low { !high } else { high }
            }
            Err(e) => {
                if !self.warned {
                    self.warned = true;
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "cannot read button line, treating as released"
                    );
                }
                false
            }
        }
    }
}

/// Headless fallback: never pressed
pub struct NoButton;

impl TalkButton for NoButton {
    fn is_pressed(&mut self) -> bool {
        false
    }
}

/// Build the button reader described by the configuration
#[must_use]
pub fn from_config(config: &ButtonConfig) -> Box<dyn TalkButton> {
    config.gpio_value_path.as_ref().map_or_else(
        || {
            tracing::info!("no button configured, running headless");
            Box::new(NoButton) as Box<dyn TalkButton>
        },
        |path| Box::new(GpioButton::new(path.clone(), config.active_low)) as Box<dyn TalkButton>,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn gpio_level_respects_active_low() {
        let dir = std::env::temp_dir().join(format!("btn-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("value");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0").unwrap();

        let mut low = GpioButton::new(path.clone(), true);
        assert!(low.is_pressed());

        let mut high = GpioButton::new(path.clone(), false);
        assert!(!high.is_pressed());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_line_reads_released() {
        let mut button = GpioButton::new(PathBuf::from("/nonexistent/gpio/value"), true);
        assert!(!button.is_pressed());
        assert!(!button.is_pressed());
    }

    #[test]
    fn no_button_is_never_pressed() {
        assert!(!NoButton.is_pressed());
    }
}
