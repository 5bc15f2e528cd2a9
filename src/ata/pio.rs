//! Synchronous ATA PIO controller: device probing, IDENTIFY, and the
//! per-sector LBA28/LBA48 transfer state machine.
//!
//! Every wait is a bounded busy-spin; there is no interrupt handling
//! and no retry after a timeout or device error.

use super::identify;
use super::ports::{self, reg, PortIo};
use crate::block::BlockError;
use alloc::vec::Vec;

/// Index into [`AtaController::devices`]: primary master/slave, then
/// secondary master/slave.
const CHANNEL_BASES: [(u16, u16); 2] = [(ports::PRIMARY_BASE, ports::PRIMARY_CONTROL), (ports::SECONDARY_BASE, ports::SECONDARY_CONTROL)];

fn device_channel(idx: usize) -> usize {
    idx / 2
}

fn device_is_slave(idx: usize) -> bool {
    idx % 2 == 1
}

/// Everything learned about a live device at `init` time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceRecord {
    pub lba28_sectors: u32,
    pub lba48_sectors: u64,
    pub udma_modes: u16,
    pub logical_sector_size: u32,
}

impl DeviceRecord {
    pub fn total_sectors(&self) -> u64 {
        if self.lba48_sectors > 0 {
            self.lba48_sectors
        } else {
            self.lba28_sectors as u64
        }
    }

    pub fn supports_lba48(&self) -> bool {
        self.lba48_sectors > 0
    }
}

/// Owns up to four devices (primary/secondary x master/slave) behind
/// one set of ports, plus the "currently selected device" cursor a
/// real ATA channel exposes.
pub struct AtaController<P: PortIo> {
    ports: P,
    pub(crate) devices: [Option<DeviceRecord>; 4],
    selected: Option<usize>,
}

impl<P: PortIo> AtaController<P> {
    pub fn new(ports: P) -> Self {
        AtaController { ports, devices: [None, None, None, None], selected: None }
    }

    fn command_base(idx: usize) -> u16 {
        CHANNEL_BASES[device_channel(idx)].0
    }

    fn control_base(idx: usize) -> u16 {
        CHANNEL_BASES[device_channel(idx)].1
    }

    fn settle(&mut self, idx: usize) {
        for _ in 0..4 {
            self.ports.in8(Self::control_base(idx));
        }
    }

    fn select(&mut self, idx: usize, lba_top_nibble: u8) {
        if self.selected == Some(idx) {
            return;
        }
        let base = if device_is_slave(idx) { ports::SELECT_SLAVE_LBA } else { ports::SELECT_MASTER_LBA };
        self.ports.out8(Self::command_base(idx) + reg::DRIVE_SELECT, base | (lba_top_nibble & 0xF));
        self.settle(idx);
        self.selected = Some(idx);
    }

    fn status(&mut self, idx: usize) -> u8 {
        self.ports.in8(Self::command_base(idx) + reg::STATUS)
    }

    fn poll(&mut self, idx: usize, want_drq: bool) -> Result<u8, BlockError> {
        for _ in 0..ports::POLL_BUDGET {
            let status = self.status(idx);
            if status & (ports::STATUS_ERR | ports::STATUS_DF) != 0 {
                return Err(BlockError::IoError);
            }
            let bsy_clear = status & ports::STATUS_BSY == 0;
            if bsy_clear && (!want_drq || status & ports::STATUS_DRQ != 0) {
                return Ok(status);
            }
        }
        Err(BlockError::Timeout)
    }

    /// Probe all four device slots, running IDENTIFY on each. Returns
    /// the number of live devices found and selects device 0 if any
    /// are present.
    pub fn init(&mut self) -> usize {
        let mut found = 0;
        for idx in 0..4 {
            // Force re-selection: identify runs unconditionally, even
            // if `idx` happens to already be `self.selected`.
            self.selected = None;
            if let Some(info) = self.identify_one(idx) {
                self.devices[idx] = Some(DeviceRecord {
                    lba28_sectors: info.lba28_sectors,
                    lba48_sectors: info.lba48_sectors,
                    udma_modes: info.udma_modes,
                    logical_sector_size: info.logical_sector_size,
                });
                found += 1;
                log::info!("ata: device {} identified, {} sectors", idx, self.devices[idx].unwrap().total_sectors());
            }
        }
        self.selected = None;
        if let Some(idx) = (0..4).find(|&i| self.devices[i].is_some()) {
            self.select(idx, 0);
        }
        found
    }

    fn identify_one(&mut self, idx: usize) -> Option<identify::IdentifyInfo> {
        self.select(idx, 0);
        let base = Self::command_base(idx);
        self.ports.out8(base + reg::SECTOR_COUNT, 0);
        self.ports.out8(base + reg::LBA_LOW, 0);
        self.ports.out8(base + reg::LBA_MID, 0);
        self.ports.out8(base + reg::LBA_HIGH, 0);
        self.ports.out8(base + reg::COMMAND, ports::CMD_IDENTIFY);

        if self.status(idx) == 0 {
            return None;
        }

        if self.poll(idx, false).is_err() {
            return None;
        }

        let mid = self.ports.in8(base + reg::LBA_MID);
        let hi = self.ports.in8(base + reg::LBA_HIGH);
        if mid != 0 || hi != 0 {
            return None; // non-ATA device
        }

        if self.poll(idx, true).is_err() {
            return None;
        }

        let mut words = [0u16; 256];
        for w in words.iter_mut() {
            *w = self.ports.in16(base + reg::DATA);
        }
        Some(identify::parse(&words))
    }

    fn device(&self, idx: usize) -> Result<DeviceRecord, BlockError> {
        self.devices.get(idx).copied().flatten().ok_or(BlockError::DeviceNotReady)
    }

    /// Public counterpart of `device`, for callers outside this module
    /// (the [`super::AtaBlockDevice`] adapter) that need device geometry
    /// without going through a read or write.
    pub fn device_record(&self, idx: usize) -> Result<DeviceRecord, BlockError> {
        self.device(idx)
    }

    /// Read `sector_count` logical sectors starting at `lba` into `buf`.
    pub fn read(&mut self, idx: usize, buf: &mut [u8], lba: u64, sector_count: u32) -> Result<(), BlockError> {
        self.transfer(idx, Some(buf), None, lba, sector_count)
    }

    /// Write `sector_count` logical sectors starting at `lba` from `data`.
    pub fn write(&mut self, idx: usize, data: &[u8], lba: u64, sector_count: u32) -> Result<(), BlockError> {
        self.transfer(idx, None, Some(data), lba, sector_count)
    }

    fn transfer(
        &mut self,
        idx: usize,
        mut read_buf: Option<&mut [u8]>,
        write_data: Option<&[u8]>,
        lba: u64,
        sector_count: u32,
    ) -> Result<(), BlockError> {
        let dev = self.device(idx)?;
        let total = dev.total_sectors();
        if lba + sector_count as u64 > total {
            return Err(BlockError::OutOfBounds);
        }

        let is_write = write_data.is_some();
        let use_lba28 = lba < dev.lba28_sectors as u64 && sector_count <= 255;

        if use_lba28 {
            self.program_lba28(idx, lba, sector_count, is_write);
        } else if dev.supports_lba48() {
            self.program_lba48(idx, lba, sector_count, is_write);
        } else {
            return Err(BlockError::IoError);
        }

        let words_per_sector = dev.logical_sector_size as usize / 2;
        let sector_bytes = dev.logical_sector_size as usize;

        for sector in 0..sector_count as usize {
            self.poll(idx, true)?;
            let base = Self::command_base(idx);
            if let Some(data) = write_data {
                let start = sector * sector_bytes;
                let chunk = &data[start..start + sector_bytes];
                for w in chunk.chunks_exact(2) {
                    self.ports.out16(base + reg::DATA, u16::from_le_bytes([w[0], w[1]]));
                }
            } else {
                let mut words = Vec::with_capacity(words_per_sector);
                for _ in 0..words_per_sector {
                    words.push(self.ports.in16(base + reg::DATA));
                }
                if let Some(buf) = read_buf.as_deref_mut() {
                    let start = sector * sector_bytes;
                    for (i, w) in words.iter().enumerate() {
                        let b = w.to_le_bytes();
                        buf[start + i * 2] = b[0];
                        buf[start + i * 2 + 1] = b[1];
                    }
                }
            }

            if is_write {
                self.ports.out8(base + reg::COMMAND, ports::CMD_CACHE_FLUSH);
                self.poll(idx, false)?;
            } else {
                self.settle(idx);
            }
        }
        Ok(())
    }

    fn program_lba28(&mut self, idx: usize, lba: u64, count: u32, is_write: bool) {
        let top_nibble = ((lba >> 24) & 0xF) as u8;
        self.select(idx, top_nibble);
        let base = Self::command_base(idx);
        self.ports.out8(base + reg::SECTOR_COUNT, count as u8);
        self.ports.out8(base + reg::LBA_LOW, lba as u8);
        self.ports.out8(base + reg::LBA_MID, (lba >> 8) as u8);
        self.ports.out8(base + reg::LBA_HIGH, (lba >> 16) as u8);
        let cmd = if is_write { ports::CMD_WRITE_SECTORS } else { ports::CMD_READ_SECTORS };
        self.ports.out8(base + reg::COMMAND, cmd);
    }

    fn program_lba48(&mut self, idx: usize, lba: u64, count: u32, is_write: bool) {
        self.select(idx, 0);
        let base = Self::command_base(idx);
        let count16 = if count == 65536 { 0 } else { count as u16 };
        self.ports.out8(base + reg::SECTOR_COUNT, (count16 >> 8) as u8);
        self.ports.out8(base + reg::SECTOR_COUNT, count16 as u8);
        self.ports.out8(base + reg::LBA_LOW, (lba >> 24) as u8);
        self.ports.out8(base + reg::LBA_LOW, lba as u8);
        self.ports.out8(base + reg::LBA_MID, (lba >> 32) as u8);
        self.ports.out8(base + reg::LBA_MID, (lba >> 8) as u8);
        self.ports.out8(base + reg::LBA_HIGH, (lba >> 40) as u8);
        self.ports.out8(base + reg::LBA_HIGH, (lba >> 16) as u8);
        let cmd = if is_write { ports::CMD_WRITE_SECTORS_EXT } else { ports::CMD_READ_SECTORS_EXT };
        self.ports.out8(base + reg::COMMAND, cmd);
    }
}
