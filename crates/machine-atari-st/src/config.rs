//! Configuration for the Atari ST machine crate.

use thiserror::Error;

/// TOS image size for the STF/FM ROM sockets at 0xFC0000.
pub const TOS_192K: usize = 192 * 1024;

/// TOS image size for the later 0xE00000 socket.
pub const TOS_256K: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StModel {
    /// The only model the core fully emulates.
    St,
    MegaSt,
    Ste,
}

/// Installed RAM. All options are powers of two, which the bus decode
/// relies on for masking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RamSize {
    Kb512,
    #[default]
    Mb1,
    Mb2,
    Mb4,
}

impl RamSize {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Kb512 => 512 * 1024,
            Self::Mb1 => 1024 * 1024,
            Self::Mb2 => 2 * 1024 * 1024,
            Self::Mb4 => 4 * 1024 * 1024,
        }
    }

    /// Decode the 0..3 configuration index used by the persisted config.
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        match index {
            0 => Self::Kb512,
            2 => Self::Mb2,
            3 => Self::Mb4,
            _ => Self::Mb1,
        }
    }
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("TOS image is {0} bytes; expected 192 KiB or 256 KiB")]
    BadTosSize(usize),
    #[error("model not supported by this core")]
    UnsupportedModel,
}

#[derive(Clone)]
pub struct MachineConfig {
    pub model: StModel,
    pub ram: RamSize,
    pub tos: Vec<u8>,
    pub sample_rate: u32,
    pub debug: bool,
}

impl MachineConfig {
    pub fn new(tos: Vec<u8>) -> Self {
        Self {
            model: StModel::St,
            ram: RamSize::Mb1,
            tos,
            sample_rate: 48_000,
            debug: false,
        }
    }

    /// ROM base address implied by the TOS image size.
    pub fn tos_base(&self) -> Result<u32, MachineError> {
        match self.tos.len() {
            TOS_192K => Ok(0xFC_0000),
            TOS_256K => Ok(0xE0_0000),
            other => Err(MachineError::BadTosSize(other)),
        }
    }
}
