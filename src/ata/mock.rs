//! A simulated two-channel, four-drive ATA bus, standing in for real
//! hardware ports in tests. Understands just enough of the real
//! register protocol (IDENTIFY, LBA28/LBA48 addressing via the
//! high-order-byte latch convention, the sector-at-a-time DRQ
//! handshake) to drive [`super::pio::AtaController`] through its real
//! code paths.

#![cfg(test)]

use super::ports::{self, reg, PortIo};
use alloc::vec;
use alloc::vec::Vec;

pub struct MockDrive {
    sectors: Vec<[u8; 512]>,
}

impl MockDrive {
    pub fn new(sector_count: usize) -> Self {
        MockDrive { sectors: vec![[0u8; 512]; sector_count] }
    }
}

#[derive(Default, Clone, Copy)]
struct Latch {
    prev: u8,
    cur: u8,
}

impl Latch {
    fn write(&mut self, value: u8) {
        self.prev = self.cur;
        self.cur = value;
    }
}

#[derive(Default, Clone, Copy)]
struct ChannelLatches {
    sector_count: Latch,
    lba_low: Latch,
    lba_mid: Latch,
    lba_high: Latch,
}

enum PendingOp {
    None,
    Transfer { words: Vec<u16>, cursor: usize, is_write: bool, drive_idx: usize, next_lba: u64, sectors_left: u32 },
}

pub struct MockPorts {
    drives: [Option<MockDrive>; 4],
    selected: [usize; 2],
    select_byte: [u8; 2],
    latches: [ChannelLatches; 2],
    pending: [PendingOp; 2],
}

impl MockPorts {
    pub fn new() -> Self {
        MockPorts {
            drives: [None, None, None, None],
            selected: [0, 0],
            select_byte: [0, 0],
            latches: [ChannelLatches::default(), ChannelLatches::default()],
            pending: [PendingOp::None, PendingOp::None],
        }
    }

    /// Attach a drive at slot `idx` (0..4: primary master/slave, then
    /// secondary master/slave).
    pub fn attach(&mut self, idx: usize, drive: MockDrive) {
        self.drives[idx] = Some(drive);
    }

    fn channel_of(port: u16) -> usize {
        if port == ports::PRIMARY_CONTROL || (ports::PRIMARY_BASE..=ports::PRIMARY_BASE + 7).contains(&port) {
            0
        } else {
            1
        }
    }

    fn reg_of(port: u16) -> Option<u16> {
        if port == ports::PRIMARY_CONTROL || port == ports::SECONDARY_CONTROL {
            None
        } else if (ports::PRIMARY_BASE..=ports::PRIMARY_BASE + 7).contains(&port) {
            Some(port - ports::PRIMARY_BASE)
        } else {
            Some(port - ports::SECONDARY_BASE)
        }
    }

    fn drive_idx(&self, ch: usize) -> usize {
        ch * 2 + self.selected[ch]
    }

    fn decode_lba(&self, ch: usize, is_ext: bool) -> (u64, u32) {
        let l = &self.latches[ch];
        if is_ext {
            let lba = (l.lba_low.prev as u64) << 24
                | (l.lba_low.cur as u64)
                | (l.lba_mid.prev as u64) << 32
                | (l.lba_mid.cur as u64) << 8
                | (l.lba_high.prev as u64) << 40
                | (l.lba_high.cur as u64) << 16;
            let count16 = ((l.sector_count.prev as u32) << 8) | l.sector_count.cur as u32;
            let count = if count16 == 0 { 65536 } else { count16 };
            (lba, count)
        } else {
            let lba = ((self.select_byte[ch] & 0xF) as u64) << 24
                | (l.lba_high.cur as u64) << 16
                | (l.lba_mid.cur as u64) << 8
                | (l.lba_low.cur as u64);
            let count = if l.sector_count.cur == 0 { 256 } else { l.sector_count.cur as u32 };
            (lba, count)
        }
    }

    fn read_sector_words(drive: &MockDrive, lba: u64) -> Vec<u16> {
        drive.sectors[lba as usize].chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
    }

    fn identify_words(drive: &MockDrive) -> Vec<u16> {
        let mut words = vec![0u16; 256];
        let total = drive.sectors.len() as u64;
        let lba28 = total.min(0x0FFF_FFFF) as u32;
        words[60] = lba28 as u16;
        words[61] = (lba28 >> 16) as u16;
        words[100] = total as u16;
        words[101] = (total >> 16) as u16;
        words[102] = (total >> 32) as u16;
        words[103] = (total >> 48) as u16;
        words
    }

    fn dispatch_command(&mut self, ch: usize, cmd: u8) {
        let drive_idx = self.drive_idx(ch);
        if self.drives[drive_idx].is_none() {
            self.pending[ch] = PendingOp::None;
            return;
        }
        match cmd {
            ports::CMD_IDENTIFY => {
                let words = Self::identify_words(self.drives[drive_idx].as_ref().unwrap());
                self.pending[ch] =
                    PendingOp::Transfer { words, cursor: 0, is_write: false, drive_idx, next_lba: 0, sectors_left: 0 };
            }
            ports::CMD_READ_SECTORS | ports::CMD_READ_SECTORS_EXT => {
                let (lba, count) = self.decode_lba(ch, cmd == ports::CMD_READ_SECTORS_EXT);
                let words = Self::read_sector_words(self.drives[drive_idx].as_ref().unwrap(), lba);
                self.pending[ch] = PendingOp::Transfer {
                    words,
                    cursor: 0,
                    is_write: false,
                    drive_idx,
                    next_lba: lba + 1,
                    sectors_left: count - 1,
                };
            }
            ports::CMD_WRITE_SECTORS | ports::CMD_WRITE_SECTORS_EXT => {
                let (lba, count) = self.decode_lba(ch, cmd == ports::CMD_WRITE_SECTORS_EXT);
                self.pending[ch] = PendingOp::Transfer {
                    words: vec![0u16; 256],
                    cursor: 0,
                    is_write: true,
                    drive_idx,
                    next_lba: lba,
                    sectors_left: count,
                };
            }
            ports::CMD_CACHE_FLUSH => self.pending[ch] = PendingOp::None,
            _ => {}
        }
    }

    fn advance_after_read(&mut self, ch: usize) {
        let (drive_idx, next_lba, sectors_left) = match &self.pending[ch] {
            PendingOp::Transfer { drive_idx, next_lba, sectors_left, .. } => (*drive_idx, *next_lba, *sectors_left),
            PendingOp::None => return,
        };
        if sectors_left == 0 {
            self.pending[ch] = PendingOp::None;
            return;
        }
        let words = Self::read_sector_words(self.drives[drive_idx].as_ref().unwrap(), next_lba);
        self.pending[ch] = PendingOp::Transfer {
            words,
            cursor: 0,
            is_write: false,
            drive_idx,
            next_lba: next_lba + 1,
            sectors_left: sectors_left - 1,
        };
    }

    fn commit_write(&mut self, ch: usize) {
        let (drive_idx, lba, words, sectors_left) = match core::mem::replace(&mut self.pending[ch], PendingOp::None) {
            PendingOp::Transfer { drive_idx, next_lba, words, sectors_left, .. } => (drive_idx, next_lba, words, sectors_left),
            PendingOp::None => return,
        };
        let mut bytes = [0u8; 512];
        for (i, w) in words.iter().enumerate() {
            let b = w.to_le_bytes();
            bytes[i * 2] = b[0];
            bytes[i * 2 + 1] = b[1];
        }
        self.drives[drive_idx].as_mut().unwrap().sectors[lba as usize] = bytes;
        let remaining = sectors_left - 1;
        if remaining > 0 {
            self.pending[ch] = PendingOp::Transfer {
                words: vec![0u16; 256],
                cursor: 0,
                is_write: true,
                drive_idx,
                next_lba: lba + 1,
                sectors_left: remaining,
            };
        }
    }
}

impl PortIo for MockPorts {
    fn out8(&mut self, port: u16, value: u8) {
        let ch = Self::channel_of(port);
        let reg = match Self::reg_of(port) {
            Some(r) => r,
            None => return, // control-block write; no-op in the mock
        };
        match reg {
            reg::SECTOR_COUNT => self.latches[ch].sector_count.write(value),
            reg::LBA_LOW => self.latches[ch].lba_low.write(value),
            reg::LBA_MID => self.latches[ch].lba_mid.write(value),
            reg::LBA_HIGH => self.latches[ch].lba_high.write(value),
            reg::DRIVE_SELECT => {
                self.select_byte[ch] = value;
                self.selected[ch] = ((value >> 4) & 1) as usize;
            }
            reg::COMMAND => self.dispatch_command(ch, value),
            _ => {}
        }
    }

    fn in8(&mut self, port: u16) -> u8 {
        let ch = Self::channel_of(port);
        let is_status = Self::reg_of(port).map(|r| r == reg::STATUS).unwrap_or(true);
        if !is_status {
            return 0;
        }
        let drive_idx = self.drive_idx(ch);
        if self.drives[drive_idx].is_none() {
            return 0;
        }
        match &self.pending[ch] {
            PendingOp::None => 0,
            PendingOp::Transfer { .. } => ports::STATUS_DRQ,
        }
    }

    fn out16(&mut self, port: u16, value: u16) {
        let ch = Self::channel_of(port);
        if Self::reg_of(port) != Some(reg::DATA) {
            return;
        }
        let mut commit = false;
        if let PendingOp::Transfer { words, cursor, is_write, .. } = &mut self.pending[ch] {
            if *is_write {
                if *cursor < words.len() {
                    words[*cursor] = value;
                }
                *cursor += 1;
                commit = *cursor >= words.len();
            }
        }
        if commit {
            self.commit_write(ch);
        }
    }

    fn in16(&mut self, port: u16) -> u16 {
        let ch = Self::channel_of(port);
        if Self::reg_of(port) != Some(reg::DATA) {
            return 0;
        }
        let mut advance = false;
        let word = match &mut self.pending[ch] {
            PendingOp::Transfer { words, cursor, .. } => {
                let w = words.get(*cursor).copied().unwrap_or(0);
                *cursor += 1;
                advance = *cursor >= words.len();
                w
            }
            PendingOp::None => 0,
        };
        if advance {
            self.advance_after_read(ch);
        }
        word
    }
}
