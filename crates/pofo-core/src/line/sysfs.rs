//! Linux sysfs GPIO line driver.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::traits::{Direction, Level, Line, LineDriver, LineError, check_direction};
use crate::config::PinConfig;

const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

struct Pin {
    number: u32,
    direction: Option<Direction>,
    value: Option<File>,
    exported_here: bool,
}

/// The four lines mapped onto sysfs GPIO pins.
pub struct SysfsLines {
    root: PathBuf,
    pins: [Pin; 4],
}

impl SysfsLines {
    pub fn new(pins: &PinConfig) -> Self {
        Self::with_root(DEFAULT_GPIO_ROOT, pins)
    }

    /// Use a sysfs tree rooted somewhere other than `/sys/class/gpio`.
    pub fn with_root(root: impl AsRef<Path>, pins: &PinConfig) -> Self {
        let pin = |line| Pin {
            number: pins.pin(line),
            direction: None,
            value: None,
            exported_here: false,
        };
        Self {
            root: root.as_ref().to_path_buf(),
            pins: [
                pin(Line::InputClock),
                pin(Line::InputData),
                pin(Line::OutputClock),
                pin(Line::OutputData),
            ],
        }
    }

    pub fn pin(&self, line: Line) -> u32 {
        self.pins[line.index()].number
    }

    fn pin_dir(&self, number: u32) -> PathBuf {
        self.root.join(format!("gpio{}", number))
    }

    fn unavailable(number: u32, e: std::io::Error) -> LineError {
        LineError::Unavailable {
            pin: number,
            message: e.to_string(),
        }
    }

    fn export(&self, number: u32) -> Result<bool, LineError> {
        if self.pin_dir(number).exists() {
            return Ok(false);
        }
        fs::write(self.root.join("export"), number.to_string())
            .map_err(|e| Self::unavailable(number, e))?;
        debug!(pin = number, "Exported GPIO");
        Ok(true)
    }

    fn value_file(&mut self, line: Line) -> Result<&mut File, LineError> {
        let pin = &mut self.pins[line.index()];
        pin.value
            .as_mut()
            .ok_or(LineError::Unconfigured { line })
    }
}

impl LineDriver for SysfsLines {
    #[instrument(level = "debug", skip(self))]
    fn configure(&mut self, line: Line, direction: Direction) -> Result<(), LineError> {
        let number = self.pin(line);
        let exported = self.export(number)?;
        let dir = self.pin_dir(number);

        let mode = match direction {
            Direction::Input => "in",
            Direction::Output => "out",
        };
        fs::write(dir.join("direction"), mode).map_err(|e| Self::unavailable(number, e))?;

        let value = OpenOptions::new()
            .read(true)
            .write(direction == Direction::Output)
            .open(dir.join("value"))
            .map_err(|e| Self::unavailable(number, e))?;

        let pin = &mut self.pins[line.index()];
        pin.direction = Some(direction);
        pin.value = Some(value);
        pin.exported_here |= exported;
        info!(line = %line, pin = number, direction = %direction, "Configured line");
        Ok(())
    }

    fn read(&mut self, line: Line) -> Result<Level, LineError> {
        check_direction(line, self.pins[line.index()].direction, Direction::Input)?;
        let file = self.value_file(line)?;
        let mut buf = [0u8; 1];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        Ok(Level::from(buf[0] == b'1'))
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), LineError> {
        check_direction(line, self.pins[line.index()].direction, Direction::Output)?;
        let file = self.value_file(line)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(if level.is_high() { b"1" } else { b"0" })?;
        Ok(())
    }

    /// Float the outputs and unexport the pins this driver exported.
    fn release(&mut self) -> Result<(), LineError> {
        for line in Line::ALL {
            let number = self.pin(line);
            let dir = self.pin_dir(number);
            let pin = &mut self.pins[line.index()];
            pin.value = None;
            if pin.direction.take() == Some(Direction::Output)
                && let Err(e) = fs::write(dir.join("direction"), "in")
            {
                warn!(pin = number, error = %e, "Failed to float output");
            }
            if std::mem::take(&mut pin.exported_here) {
                fs::write(self.root.join("unexport"), number.to_string())
                    .map_err(|e| Self::unavailable(number, e))?;
                debug!(pin = number, "Unexported GPIO");
            }
        }
        Ok(())
    }
}

impl Drop for SysfsLines {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release GPIO lines");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake sysfs tree with every pin already exported.
    fn fake_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("pofo-sysfs-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        for pin in 2..=5 {
            let dir = root.join(format!("gpio{}", pin));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("direction"), "in").unwrap();
            fs::write(dir.join("value"), "0").unwrap();
        }
        root
    }

    fn configured(root: &Path) -> SysfsLines {
        let mut lines = SysfsLines::with_root(root, &PinConfig::default());
        for line in Line::ALL {
            lines.configure(line, line.direction()).unwrap();
        }
        lines
    }

    #[test]
    fn test_configure_writes_direction() {
        let root = fake_root("direction");
        let _lines = configured(&root);
        assert_eq!(fs::read_to_string(root.join("gpio4/direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(root.join("gpio2/direction")).unwrap(), "in");
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_write_and_read_value() {
        let root = fake_root("value");
        let mut lines = configured(&root);

        lines.write(Line::OutputData, Level::High).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio5/value")).unwrap(), "1");

        assert_eq!(lines.read(Line::InputData).unwrap(), Level::Low);
        fs::write(root.join("gpio3/value"), "1\n").unwrap();
        assert_eq!(lines.read(Line::InputData).unwrap(), Level::High);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_release_floats_outputs() {
        let root = fake_root("release");
        let mut lines = configured(&root);
        lines.release().unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio4/direction")).unwrap(), "in");
        assert!(matches!(
            lines.write(Line::OutputClock, Level::Low),
            Err(LineError::Unconfigured { .. })
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_pin_unavailable() {
        let root = std::env::temp_dir().join(format!("pofo-sysfs-missing-{}", std::process::id()));
        fs::create_dir_all(&root).unwrap();
        let mut lines = SysfsLines::with_root(&root, &PinConfig::default());
        // The fake export file accepts the write but no gpio directory appears.
        let err = lines.configure(Line::InputClock, Direction::Input).unwrap_err();
        assert!(matches!(err, LineError::Unavailable { pin: 2, .. }));
        fs::remove_dir_all(&root).unwrap();
    }
}
