//! Extraction of the fields this driver cares about from a 256-word
//! IDENTIFY DEVICE response.

/// Fields pulled out of an IDENTIFY response, enough to drive sector
/// addressing and geometry decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentifyInfo {
    /// Total addressable sectors under 28-bit LBA (0 if unsupported).
    pub lba28_sectors: u32,
    /// Total addressable sectors under 48-bit LBA (0 if unsupported).
    pub lba48_sectors: u64,
    /// Raw UDMA support/active word (word 88); not acted on beyond
    /// being recorded, DMA transfer is out of scope.
    pub udma_modes: u16,
    /// Logical sector size in bytes (falls back to 512 when the
    /// extended physical/logical sector size words report nothing).
    pub logical_sector_size: u32,
}

pub fn parse(words: &[u16; 256]) -> IdentifyInfo {
    let lba28_sectors = (words[60] as u32) | ((words[61] as u32) << 16);
    let lba48_sectors = (words[100] as u64)
        | ((words[101] as u64) << 16)
        | ((words[102] as u64) << 32)
        | ((words[103] as u64) << 48);
    let udma_modes = words[88];

    // Word 106 bit 12 set means words 117-118 give the logical sector
    // size in 32-bit units; otherwise the legacy 512-byte sector size
    // applies.
    let word106 = words[106];
    let logical_sector_size = if word106 & (1 << 12) != 0 {
        ((words[117] as u32) | ((words[118] as u32) << 16)) * 2
    } else {
        512
    };

    IdentifyInfo { lba28_sectors, lba48_sectors, udma_modes, logical_sector_size }
}
