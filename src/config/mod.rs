//! Configuration module for the test bench.
//!
//! # Module Structure
//!
//! - `loader`: loading and saving `BenchSettings` as JSON
//!
//! # Settings Flow
//!
//! 1. `SettingsManager` loads `config/bench.json` (or an explicit path)
//! 2. `BenchSettings::validate` rejects inconsistent values
//! 3. The sequence runner receives the settings by value and threads them
//!    through every stage; nothing reads a module-wide constant

pub mod loader;

use crate::error::ConfigError;
use crate::models::Peripheral;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Part name the reference product is programmed as.
pub const DEFAULT_TARGET_DEVICE: &str = "EFR32FG12PXXXF1024";

/// Firmware image and the flash offset it is written at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub path: String,
    #[serde(default)]
    pub offset: u32,
}

impl ImageSpec {
    pub fn new(path: impl Into<String>, offset: u32) -> Self {
        ImageSpec {
            path: path.into(),
            offset,
        }
    }
}

/// Acceptance band of an analog rail check. Both bounds are exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageBand {
    pub channel: u32,
    pub range_hint: u32,
    pub lower: i64,
    pub upper: i64,
    /// Rail name used in log messages.
    pub label: String,
}

impl Default for VoltageBand {
    fn default() -> Self {
        VoltageBand {
            channel: 1,
            range_hint: 0,
            lower: 70_000,
            upper: 72_000,
            label: "3.3V".to_string(),
        }
    }
}

impl VoltageBand {
    /// True when `raw` lies strictly between the bounds.
    pub fn accepts(&self, raw: i64) -> bool {
        raw > self.lower && raw < self.upper
    }
}

/// Toggle for a check that may be switched off administratively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalCheck {
    /// Run the check at all.
    pub enabled: bool,
    /// Require it to pass for the device to be accepted.
    pub gating: bool,
}

impl OptionalCheck {
    pub const fn informative() -> Self {
        OptionalCheck {
            enabled: true,
            gating: false,
        }
    }

    pub const fn disabled() -> Self {
        OptionalCheck {
            enabled: false,
            gating: false,
        }
    }
}

/// One physical test board: a fixture controller and its programmer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub enabled: bool,
    pub programmer_serial: String,
    /// Operator-facing device numbers for sockets 1..=N.
    pub dut_numbers: Vec<u32>,
}

impl Default for BoardSettings {
    fn default() -> Self {
        BoardSettings {
            enabled: true,
            programmer_serial: String::new(),
            dut_numbers: Vec::new(),
        }
    }
}

/// Complete bench configuration carried through the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    pub slots_per_bank: u32,
    /// Delay between socket power-on and debug-line routing.
    pub settle_delay_ms: u64,
    /// Upper bound for any single hardware call.
    pub call_timeout_ms: u64,
    /// Run one worker per board instead of visiting boards one at a time.
    pub parallel: bool,

    pub target_device: String,
    pub swd_speed_khz: u32,
    pub erase_before_download: bool,
    pub bootstrap_image: ImageSpec,
    pub test_firmware_image: ImageSpec,
    pub production_image: ImageSpec,

    pub voltage: VoltageBand,
    pub gnss: OptionalCheck,
    pub radio: OptionalCheck,

    pub boards: Vec<BoardSettings>,
}

impl Default for BenchSettings {
    fn default() -> Self {
        BenchSettings {
            slots_per_bank: 3,
            settle_delay_ms: 1000,
            call_timeout_ms: 10_000,
            parallel: true,
            target_device: DEFAULT_TARGET_DEVICE.to_string(),
            swd_speed_khz: 5000,
            erase_before_download: false,
            bootstrap_image: ImageSpec::new("firmware/bootloader.s37", 0),
            test_firmware_image: ImageSpec::new("firmware/railtest.hex", 0),
            production_image: ImageSpec::new("firmware/production.hex", 0),
            voltage: VoltageBand::default(),
            gnss: OptionalCheck::informative(),
            radio: OptionalCheck::disabled(),
            boards: Vec::new(),
        }
    }
}

impl BenchSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Toggle of an administratively switchable peripheral, if it is one.
    pub fn optional_check(&self, peripheral: Peripheral) -> Option<OptionalCheck> {
        match peripheral {
            Peripheral::Gnss => Some(self.gnss),
            Peripheral::Radio => Some(self.radio),
            _ => None,
        }
    }

    /// Peripherals the peripheral stage runs, in order.
    pub fn enabled_peripherals(&self) -> Vec<Peripheral> {
        Peripheral::ALL
            .iter()
            .copied()
            .filter(|p| self.optional_check(*p).map_or(true, |check| check.enabled))
            .collect()
    }

    pub fn enabled_boards(&self) -> impl Iterator<Item = &BoardSettings> {
        self.boards.iter().filter(|b| b.enabled)
    }

    /// Check value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots_per_bank == 0 {
            return Err(ConfigError::ValidationFailed(
                "slots_per_bank must be at least 1".to_string(),
            ));
        }

        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "call_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // Exclusive bounds: lower + 1 must still be below upper
        if self.voltage.upper - self.voltage.lower < 2 {
            return Err(ConfigError::ValidationFailed(format!(
                "voltage band ({}, {}) accepts no value",
                self.voltage.lower, self.voltage.upper
            )));
        }

        if self.target_device.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "target_device must not be empty".to_string(),
            ));
        }

        for (name, check) in [("gnss", self.gnss), ("radio", self.radio)] {
            if check.gating && !check.enabled {
                return Err(ConfigError::ConflictDetected(format!(
                    "{} check is gating but disabled",
                    name
                )));
            }
        }

        for (i, board) in self.boards.iter().enumerate() {
            if !board.dut_numbers.is_empty() && board.dut_numbers.len() != self.slots_per_bank as usize {
                return Err(ConfigError::ValidationFailed(format!(
                    "board {} lists {} DUT numbers for {} slots",
                    i + 1,
                    board.dut_numbers.len(),
                    self.slots_per_bank
                )));
            }
        }

        Ok(())
    }
}

/// Loads and persists `BenchSettings`.
pub struct SettingsManager;

impl SettingsManager {
    /// Default settings location relative to the working directory.
    pub const DEFAULT_PATH: &'static str = "config/bench.json";

    /// Load settings from `path`, or defaults if the file doesn't exist.
    ///
    /// An unparsable file logs a warning and falls back to defaults; a file
    /// that parses but fails validation is an error.
    pub fn load(path: &Path) -> Result<BenchSettings, ConfigError> {
        let settings = match loader::load_settings_from_file(path) {
            Ok(settings) => settings,
            Err(ConfigError::FileNotFound(_)) => {
                log::info!("[Config] {} not found, using defaults", path.display());
                BenchSettings::default()
            }
            Err(ConfigError::InvalidJson(e)) => {
                log::warn!(
                    "[Config] Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                );
                BenchSettings::default()
            }
            Err(e) => return Err(e),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn save(settings: &BenchSettings, path: &Path) -> Result<(), ConfigError> {
        settings.validate()?;
        loader::save_settings_to_file(settings, path)
    }

    /// Settings file to load: `explicit` if given, else [`Self::DEFAULT_PATH`]
    /// if it exists, else the per-user file if it exists.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        let user = match loader::get_user_settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                log::debug!("[Config] No per-user settings location: {}", e);
                None
            }
        };
        choose_path(explicit, Path::new(Self::DEFAULT_PATH), user)
    }
}

fn choose_path(explicit: Option<&Path>, local: &Path, user: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if local.exists() {
        return local.to_path_buf();
    }
    match user {
        Some(user) if user.exists() => user,
        _ => local.to_path_buf(),
    }
}
