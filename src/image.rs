//! The RAM mirror of the persisted flash region, carved into windows.
//!
//! The mirror is what the host actually reads and writes through the block
//! interface; flash only ever sees it wholesale, through [`DiskImage::flush_dirty`].

use crate::fat::dir::DirEntry;
use crate::fat::{table, FIRST_CLUSTER, SECTOR_SIZE};
use crate::storage::{EraseError, Flash};
use crate::util::Bits;

use log::warn;

/// Size of the mirror (and of the flash region behind it).
pub const IMAGE_SIZE: usize = 0x4000;

/// Window offsets within the mirror. Only the first sector of each FAT and
/// of the root directory is populated; the remaining sectors of those
/// regions read back as zeros straight from the dispatcher.
pub const FAT1_OFFSET: usize = 0x000;
pub const FAT2_OFFSET: usize = 0x200;
pub const ROOT_OFFSET: usize = 0x400;
pub const FILE_OFFSET: usize = 0x600;

/// Bytes (and whole sectors) available to the rendered file.
pub const FILE_WINDOW_SIZE: usize = IMAGE_SIZE - FILE_OFFSET;
pub const FILE_WINDOW_SECTORS: usize = FILE_WINDOW_SIZE / SECTOR_SIZE;

/// Dirty tracking granularity: one bit per flash page of the mirror.
pub const PAGE_SIZE: usize = 512;
pub const NUM_PAGES: usize = IMAGE_SIZE / PAGE_SIZE;

/// Directory entries that fit in the populated root sector.
const ROOT_WINDOW_ENTRIES: usize = (FILE_OFFSET - ROOT_OFFSET) / 32;

pub struct DiskImage {
    data: [u8; IMAGE_SIZE],
    dirty: u32,
}

impl DiskImage {
    pub fn new() -> Self {
        Self {
            data: [0; IMAGE_SIZE],
            dirty: 0,
        }
    }

    /// Copies the persisted region into the mirror.
    pub fn load<F: Flash>(&mut self, flash: &F) {
        debug_assert!(flash.region_size() >= IMAGE_SIZE);
        flash.read(0, &mut self.data);
    }

    pub fn zero(&mut self) {
        for b in self.data.iter_mut() {
            *b = 0;
        }
    }

    // -- windows --------------------------------------------------------

    pub fn fat1(&self) -> &[u8] {
        &self.data[FAT1_OFFSET..FAT2_OFFSET]
    }

    pub fn fat2(&self) -> &[u8] {
        &self.data[FAT2_OFFSET..ROOT_OFFSET]
    }

    pub fn root(&self) -> &[u8] {
        &self.data[ROOT_OFFSET..FILE_OFFSET]
    }

    pub fn root_mut(&mut self) -> &mut [u8] {
        &mut self.data[ROOT_OFFSET..FILE_OFFSET]
    }

    pub fn file_window(&self) -> &[u8] {
        &self.data[FILE_OFFSET..]
    }

    pub fn file_window_mut(&mut self) -> &mut [u8] {
        &mut self.data[FILE_OFFSET..]
    }

    /// The mirror from `offset` to its end; parse sources are addressed
    /// this way because a host is free to park the file at any cluster of
    /// the data window.
    pub fn bytes_from(&self, offset: usize) -> &[u8] {
        &self.data[offset..]
    }

    /// Mirror offset backing the given cluster, when it falls inside the
    /// file window.
    pub fn cluster_offset(&self, cluster: u16) -> Option<usize> {
        let c = cluster as usize;
        let first = FIRST_CLUSTER as usize;

        if c >= first && c < first + FILE_WINDOW_SECTORS {
            Some(FILE_OFFSET + (c - first) * SECTOR_SIZE)
        } else {
            None
        }
    }

    /// Replaces one sector's worth of bytes at `offset` when they differ
    /// from what the mirror holds, marking the covering page dirty.
    /// Returns whether anything changed.
    pub fn replace_sector(&mut self, offset: usize, block: &[u8]) -> bool {
        debug_assert_eq!(block.len(), SECTOR_SIZE);

        if &self.data[offset..offset + block.len()] == block {
            return false;
        }

        self.data[offset..offset + block.len()].copy_from_slice(block);
        self.mark_dirty_at(offset);

        true
    }

    // -- dirty map ------------------------------------------------------

    pub fn mark_dirty(&mut self, page: usize) {
        debug_assert!(page < NUM_PAGES);
        self.dirty.set_bit(page as u32, true);
    }

    pub fn mark_dirty_at(&mut self, offset: usize) {
        self.mark_dirty(offset / PAGE_SIZE);
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty = !0;
    }

    pub fn clear_all_dirty(&mut self) {
        self.dirty = 0;
    }

    pub fn any_dirty(&self) -> bool {
        self.dirty != 0
    }

    // -- root directory helpers -----------------------------------------

    /// Scans the populated root sector for the `CONFIG.TXT` entry.
    pub fn find_config_entry(&self) -> Option<(usize, DirEntry)> {
        let root = self.root();

        for k in 0..ROOT_WINDOW_ENTRIES {
            let entry = DirEntry::from_slice(&root[k * 32..(k + 1) * 32]).ok()?;
            if entry.is_config_txt() {
                return Some((k, entry));
            }
        }

        None
    }

    /// Installs the canonical `CONFIG.TXT` entry at index 0 (cluster 2,
    /// the given size) and wipes any stray copies the host may have left
    /// at other indices, so the file exists exactly once.
    pub fn write_canonical_entry(&mut self, size: u32) {
        let root = self.root_mut();

        let mut arr = [0u8; 32];
        DirEntry::config_txt(size).into_arr(&mut arr);
        root[0..32].copy_from_slice(&arr);

        for k in 1..ROOT_WINDOW_ENTRIES {
            let slot = &mut root[k * 32..(k + 1) * 32];
            let dup = DirEntry::from_slice(slot)
                .map(|e| e.is_config_txt())
                .unwrap_or(false);
            if dup {
                for b in slot.iter_mut() {
                    *b = 0;
                }
            }
        }
    }

    // -- FAT helpers ----------------------------------------------------

    /// Rebuilds FAT 1 for a contiguous file of `size` bytes at cluster 2
    /// and mirrors it into FAT 2.
    pub fn rebuild_fat(&mut self, size: u32) {
        let (fat1, fat2) = self.data[FAT1_OFFSET..ROOT_OFFSET].split_at_mut(FAT2_OFFSET);

        table::update_fat_chain(fat1, size);
        fat2.copy_from_slice(fat1);
    }

    // -- persistence ----------------------------------------------------

    /// Persists the mirror when anything is dirty: one region erase, then
    /// the full mirror programmed as little-endian halfwords.
    ///
    /// The supported parts expose the region as a single coarse sector, so
    /// there is nothing to gain from per-page erases; a port to
    /// page-erasable flash may decompose inside its [`Flash`] impl as long
    /// as the programmed content comes out the same.
    ///
    /// A failed program leaves the mirror as the source of truth and
    /// programming continues; a failed erase aborts the cycle with the
    /// dirty map intact so the caller can retry later.
    pub fn flush_dirty<F: Flash>(
        &mut self,
        flash: &mut F,
    ) -> Result<(), EraseError<F::EraseErr>> {
        if !self.any_dirty() {
            return Ok(());
        }

        flash.unlock();

        if let Err(e) = flash.erase_region() {
            flash.lock();
            return Err(e);
        }

        for (i, pair) in self.data.chunks_exact(2).enumerate() {
            let halfword = u16::from_le_bytes([pair[0], pair[1]]);
            if let Err(e) = flash.program_halfword(i * 2, halfword) {
                warn!("program failed at {:#06X}: {:?}", i * 2, e);
            }
        }

        flash.lock();
        self.clear_all_dirty();

        Ok(())
    }
}

#[cfg(test)]
mod image {
    use super::*;
    use crate::storage::test_flash::RamFlash;
    use std::assert_eq as eq;

    #[test]
    fn windows_line_up() {
        eq!(FILE_WINDOW_SIZE, 0x3A00);
        eq!(FILE_WINDOW_SECTORS, 29);
        eq!(NUM_PAGES, 32);
    }

    #[test]
    fn cluster_offsets() {
        let img = DiskImage::new();

        eq!(img.cluster_offset(2), Some(0x600));
        eq!(img.cluster_offset(5), Some(0x600 + 3 * 512));
        eq!(img.cluster_offset(30), Some(0x600 + 28 * 512));
        eq!(img.cluster_offset(31), None);
        eq!(img.cluster_offset(1), None);
        eq!(img.cluster_offset(0), None);
    }

    #[test]
    fn fat_mirroring() {
        let mut img = DiskImage::new();
        img.rebuild_fat(512 * 3);

        eq!(img.fat1(), img.fat2());
        eq!(table::entry(img.fat1(), 2), 3);
        eq!(table::entry(img.fat1(), 4), table::END_OF_CHAIN);
    }

    #[test]
    fn canonical_entry_dedup() {
        let mut img = DiskImage::new();

        // Plant a stray copy at index 3, as a host shuffling clusters might.
        let mut arr = [0u8; 32];
        DirEntry::config_txt(99).into_arr(&mut arr);
        img.root_mut()[3 * 32..4 * 32].copy_from_slice(&arr);

        img.write_canonical_entry(24);

        let (idx, entry) = img.find_config_entry().unwrap();
        eq!(idx, 0);
        eq!(entry.file_size, 24);
        eq!(entry.cluster_num(), 2);
        assert!(img.root()[3 * 32..4 * 32].iter().all(|&b| b == 0));
    }

    #[test]
    fn flush_is_a_noop_when_clean() {
        let mut img = DiskImage::new();
        let mut flash = RamFlash::blank();

        img.flush_dirty(&mut flash).unwrap();
        assert!(flash.mem.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn flush_programs_the_mirror() {
        let mut img = DiskImage::new();
        let mut flash = RamFlash::blank();

        img.file_window_mut()[0] = 0xAB;
        img.mark_dirty_at(FILE_OFFSET);
        img.flush_dirty(&mut flash).unwrap();

        eq!(flash.mem[FILE_OFFSET], 0xAB);
        eq!(flash.mem[FILE_OFFSET + 1], 0x00);
        assert!(!img.any_dirty());
        assert!(flash.locked);
    }

    #[test]
    fn erase_failure_keeps_dirty() {
        let mut img = DiskImage::new();
        let mut flash = RamFlash::blank();
        flash.fail_erase = true;

        img.mark_dirty(0);
        assert!(img.flush_dirty(&mut flash).is_err());
        assert!(img.any_dirty());
        assert!(flash.locked);
    }

    #[test]
    fn load_copies_flash() {
        let mut flash = RamFlash::blank();
        flash.mem[0x123] = 0x42;

        let mut img = DiskImage::new();
        img.load(&flash);
        eq!(img.bytes_from(0x123)[0], 0x42);
    }
}
