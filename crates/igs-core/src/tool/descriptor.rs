//! Plain-data tool descriptions and configure-time validation.

use crate::error::ToolConfigError;
use crate::sample::Transform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Highest physical port number accepted at configure time. Devices with
/// fewer ports re-check at attach time.
pub const MAX_PORT: u32 = 12;

/// Channels per port on multiplexed ports.
pub const CHANNELS_PER_PORT: u32 = 2;

/// How the device addresses a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSpec {
    /// Wired tool on a physical port, optionally on a sub-channel.
    Port {
        /// Port number, `1..=MAX_PORT`.
        port: u32,
        /// Sub-channel for split ports.
        #[serde(default)]
        channel: Option<u32>,
    },
    /// Passive or wireless tool described by an SROM definition file.
    Srom {
        /// Path to the `.rom` file.
        path: PathBuf,
    },
    /// Rigid body defined in the device's own configuration.
    RigidBody {
        /// Rigid body name.
        name: String,
    },
    /// Tool addressed by a free-form name (marker, bird, socket stream).
    Named {
        /// Tool name.
        name: String,
    },
    /// Video imager tool.
    Video {
        /// Tool name.
        name: String,
        /// Frame width in pixels.
        width: u32,
        /// Frame height in pixels.
        height: u32,
        /// Channels per pixel.
        channels: u32,
    },
}

impl ToolSpec {
    /// Whether the tool delivers frames rather than transforms.
    pub fn is_video(&self) -> bool {
        matches!(self, ToolSpec::Video { .. })
    }
}

/// Everything needed to configure one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Driver the tool was configured for.
    pub driver_type: String,
    /// Device addressing.
    pub spec: ToolSpec,
    /// User-chosen identifier. Derived from `spec` when absent.
    pub name: Option<String>,
    /// Tool tip offset applied after the raw device transform.
    pub calibration: Transform,
}

impl ToolDescriptor {
    /// Descriptor with identity calibration and no explicit name.
    pub fn new(driver_type: impl Into<String>, spec: ToolSpec) -> Self {
        Self {
            driver_type: driver_type.into(),
            spec,
            name: None,
            calibration: Transform::identity(),
        }
    }

    /// Set the identifier explicitly.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the calibration transform.
    #[must_use]
    pub fn with_calibration(mut self, calibration: Transform) -> Self {
        self.calibration = calibration;
        self
    }

    /// Identifier this descriptor configures to.
    pub fn derive_identifier(&self) -> String {
        if let Some(name) = &self.name {
            return name.trim().to_string();
        }
        match &self.spec {
            ToolSpec::Port {
                port,
                channel: None,
            } => format!("port-{port}"),
            ToolSpec::Port {
                port,
                channel: Some(ch),
            } => format!("port-{port}-{ch}"),
            ToolSpec::Srom { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ToolSpec::RigidBody { name } | ToolSpec::Named { name } => name.trim().to_string(),
            ToolSpec::Video { name, .. } => name.trim().to_string(),
        }
    }

    /// Validate the descriptor and return the identifier it configures to.
    pub fn validate(&self) -> Result<String, ToolConfigError> {
        match &self.spec {
            ToolSpec::Port { port, channel } => {
                if *port == 0 || *port > MAX_PORT {
                    return Err(ToolConfigError::PortOutOfRange {
                        port: *port,
                        max: MAX_PORT,
                    });
                }
                if let Some(ch) = channel {
                    if *ch >= CHANNELS_PER_PORT {
                        return Err(ToolConfigError::ChannelOutOfRange {
                            channel: *ch,
                            max: CHANNELS_PER_PORT,
                        });
                    }
                }
            }
            ToolSpec::Srom { path } => check_srom(path)?,
            ToolSpec::Video {
                name,
                width,
                height,
                channels,
            } => {
                if *width == 0 || *height == 0 || *channels == 0 {
                    return Err(ToolConfigError::InvalidGeometry {
                        name: name.clone(),
                        width: *width,
                        height: *height,
                        channels: *channels,
                    });
                }
            }
            ToolSpec::RigidBody { .. } | ToolSpec::Named { .. } => {}
        }

        let id = self.derive_identifier();
        if id.is_empty() {
            return Err(ToolConfigError::EmptyIdentifier);
        }
        Ok(id)
    }
}

fn check_srom(path: &Path) -> Result<(), ToolConfigError> {
    let reject = |reason: &str| ToolConfigError::DefinitionFile {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };
    let is_rom = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("rom"))
        .unwrap_or(false);
    if !is_rom {
        return Err(reject("expected a .rom extension"));
    }
    if !path.is_file() {
        return Err(reject("file does not exist"));
    }
    Ok(())
}

/// Configured tool as seen by a device strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    /// Identifier assigned at configure time.
    pub id: String,
    /// Descriptor the tool was configured from.
    pub descriptor: ToolDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn port(port: u32, channel: Option<u32>) -> ToolDescriptor {
        ToolDescriptor::new("polaris", ToolSpec::Port { port, channel })
    }

    #[test]
    fn identifiers_are_derived_from_spec() {
        assert_eq!(port(3, None).derive_identifier(), "port-3");
        assert_eq!(port(3, Some(1)).derive_identifier(), "port-3-1");
        assert_eq!(
            ToolDescriptor::new(
                "polaris",
                ToolSpec::Srom {
                    path: "/tools/pointer-8700340.rom".into()
                }
            )
            .derive_identifier(),
            "pointer-8700340"
        );
        assert_eq!(
            port(3, None).with_name(" probe ").derive_identifier(),
            "probe"
        );
    }

    #[test]
    fn port_and_channel_ranges() {
        assert!(port(1, None).validate().is_ok());
        assert!(port(MAX_PORT, Some(1)).validate().is_ok());
        assert_eq!(
            port(0, None).validate(),
            Err(ToolConfigError::PortOutOfRange {
                port: 0,
                max: MAX_PORT
            })
        );
        assert!(matches!(
            port(2, Some(2)).validate(),
            Err(ToolConfigError::ChannelOutOfRange { channel: 2, .. })
        ));
    }

    #[test]
    fn srom_must_exist_with_rom_extension() {
        let dir = std::env::temp_dir();
        let missing = ToolDescriptor::new(
            "polaris",
            ToolSpec::Srom {
                path: dir.join("igs-core-missing-tool.rom"),
            },
        );
        assert!(matches!(
            missing.validate(),
            Err(ToolConfigError::DefinitionFile { .. })
        ));

        let wrong_ext = ToolDescriptor::new(
            "polaris",
            ToolSpec::Srom {
                path: "tool.txt".into(),
            },
        );
        assert!(matches!(
            wrong_ext.validate(),
            Err(ToolConfigError::DefinitionFile { .. })
        ));

        let path = dir.join(format!("igs-core-{}.rom", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"SROM").unwrap();
        let present = ToolDescriptor::new("polaris", ToolSpec::Srom { path: path.clone() });
        assert_eq!(
            present.validate().unwrap(),
            format!("igs-core-{}", std::process::id())
        );
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn empty_names_and_degenerate_video_are_rejected() {
        let unnamed = ToolDescriptor::new(
            "micron",
            ToolSpec::Named {
                name: "   ".into(),
            },
        );
        assert_eq!(unnamed.validate(), Err(ToolConfigError::EmptyIdentifier));

        let video = ToolDescriptor::new(
            "imager",
            ToolSpec::Video {
                name: "us".into(),
                width: 0,
                height: 480,
                channels: 1,
            },
        );
        assert!(matches!(
            video.validate(),
            Err(ToolConfigError::InvalidGeometry { .. })
        ));
    }
}
