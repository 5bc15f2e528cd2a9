//! ATA PIO block driver: port-level register definitions, IDENTIFY
//! parsing, the controller state machine, and a [`crate::block::BlockDevice`]
//! adapter over it.

pub mod identify;
#[cfg(test)]
mod mock;
pub mod pio;
pub mod ports;

pub use identify::IdentifyInfo;
pub use pio::{AtaController, DeviceRecord};
pub use ports::PortIo;
#[cfg(target_arch = "x86_64")]
pub use ports::HardwarePorts;

use crate::block::{BlockDevice, BlockError};

/// Adapts one device slot of an [`AtaController`] to [`BlockDevice`],
/// behind a lock since the controller's port access is inherently
/// stateful (select cursor, in-flight transfer).
pub struct AtaBlockDevice<P: PortIo> {
    controller: spin::Mutex<AtaController<P>>,
    device_index: usize,
}

impl<P: PortIo> AtaBlockDevice<P> {
    pub fn new(controller: AtaController<P>, device_index: usize) -> Self {
        AtaBlockDevice { controller: spin::Mutex::new(controller), device_index }
    }
}

impl<P: PortIo> BlockDevice for AtaBlockDevice<P> {
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        self.controller.lock().read(self.device_index, buf, block_num, 1)
    }

    fn write_block(&self, block_num: u64, buf: &[u8]) -> Result<(), BlockError> {
        self.controller.lock().write(self.device_index, buf, block_num, 1)
    }

    fn block_size(&self) -> usize {
        512
    }

    fn num_blocks(&self) -> u64 {
        self.controller
            .lock()
            .device_record(self.device_index)
            .map(|d| d.total_sectors())
            .unwrap_or(0)
    }
}
