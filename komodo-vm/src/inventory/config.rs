//! Hardware configuration descriptors.
//!
//! A configuration names every node of the partition and how the I/O tree
//! hangs together; `InventoryManager::import_configuration` drives node
//! creation from it. The descriptors are plain serde data so front-ends
//! can keep them in JSON files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::error::InventoryError;

use super::InventoryManager;

/// Default working-segment size for MSPs the configuration leaves
/// unsized.
const DEFAULT_WORKING_SIZE: u64 = 256 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfiguration {
    #[serde(default)]
    pub system_processor: Option<SystemProcessorConfig>,
    #[serde(default)]
    pub main_storage_processors: Vec<MainStorageConfig>,
    #[serde(default)]
    pub instruction_processors: Vec<InstructionProcessorConfig>,
    #[serde(default)]
    pub input_output_processors: Vec<InputOutputProcessorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProcessorConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainStorageConfig {
    pub name: String,
    #[serde(default)]
    pub working_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionProcessorConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputOutputProcessorConfig {
    pub name: String,
    #[serde(default)]
    pub channel_modules: Vec<ChannelModuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelModuleConfig {
    pub name: String,
    pub index: usize,
    #[serde(default)]
    pub word_oriented: bool,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceConfig {
    FileSystemDisk {
        name: String,
        index: usize,
        #[serde(default)]
        image: Option<PathBuf>,
    },
    ScratchDisk {
        name: String,
        index: usize,
        block_size: u64,
        block_count: u64,
    },
    FileSystemTape {
        name: String,
        index: usize,
        #[serde(default)]
        image: Option<PathBuf>,
    },
}

impl DeviceConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::FileSystemDisk { name, .. } | Self::ScratchDisk { name, .. } | Self::FileSystemTape { name, .. } => {
                name
            }
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::FileSystemDisk { index, .. } | Self::ScratchDisk { index, .. } | Self::FileSystemTape { index, .. } => {
                *index
            }
        }
    }
}

impl InventoryManager {
    /// Build the partition a configuration describes: processors first,
    /// then the I/O tree, then the UPI mail slots.
    pub fn import_configuration(&self, config: &HardwareConfiguration) -> Result<(), InventoryError> {
        if let Some(sp) = &config.system_processor {
            self.create_system_processor(&sp.name)?;
        }
        for msp in &config.main_storage_processors {
            self.create_main_storage_processor(&msp.name, msp.working_size.unwrap_or(DEFAULT_WORKING_SIZE))?;
        }
        for iop in &config.input_output_processors {
            self.create_input_output_processor(&iop.name)?;
        }
        for ip in &config.instruction_processors {
            self.create_instruction_processor(&ip.name)?;
        }

        for iop in &config.input_output_processors {
            for cm in &iop.channel_modules {
                let kind = if cm.word_oriented { ChannelKind::Word } else { ChannelKind::Byte };
                self.create_channel_module(kind, &cm.name, &iop.name, cm.index)?;
                for device in &cm.devices {
                    match device {
                        DeviceConfig::FileSystemDisk { name, image, .. } => {
                            self.create_file_system_disk_device(name)?;
                            if let Some(image) = image {
                                self.connect(&cm.name, device.index(), name)?;
                                self.mount(name, image)?;
                                continue;
                            }
                        }
                        DeviceConfig::ScratchDisk {
                            name,
                            block_size,
                            block_count,
                            ..
                        } => {
                            self.create_scratch_disk_device(name, *block_size, *block_count)?;
                        }
                        DeviceConfig::FileSystemTape { name, image, .. } => {
                            self.create_file_system_tape_device(name)?;
                            if let Some(image) = image {
                                self.connect(&cm.name, device.index(), name)?;
                                self.mount(name, image)?;
                                continue;
                            }
                        }
                    }
                    self.connect(&cm.name, device.index(), device.name())?;
                }
            }
        }

        self.setup_upi_communications()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_round_trips_through_json() {
        let config = HardwareConfiguration {
            system_processor: Some(SystemProcessorConfig { name: "SP0".into() }),
            main_storage_processors: vec![MainStorageConfig {
                name: "MSP0".into(),
                working_size: Some(1 << 16),
            }],
            instruction_processors: vec![InstructionProcessorConfig { name: "IP0".into() }],
            input_output_processors: vec![InputOutputProcessorConfig {
                name: "IOP0".into(),
                channel_modules: vec![ChannelModuleConfig {
                    name: "CHM0".into(),
                    index: 0,
                    word_oriented: false,
                    devices: vec![DeviceConfig::ScratchDisk {
                        name: "DISK0".into(),
                        index: 0,
                        block_size: 128,
                        block_count: 64,
                    }],
                }],
            }],
        };

        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: HardwareConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.input_output_processors[0].channel_modules[0].devices[0].name(), "DISK0");
    }
}
