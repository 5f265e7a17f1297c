//! The engine: one owned value tying the mirror, the registry and the
//! parser together behind the block-device face the USB transport calls.
//!
//! The contract with the integrator is strictly cooperative: `read_block`
//! and `write_blocks` only touch RAM and may run from interrupt context;
//! `init` and `process` are the only paths that reach flash and belong in
//! the main loop. The two sides must not overlap; the engine takes no
//! locks of its own.

use crate::config::parse::{self, LineSlots, LINE_CAP};
use crate::config::registry::Registry;
use crate::config::{render, PrintFn, UpdateFn, ValidateFn};
use crate::fat::boot_sector::BootSector;
use crate::fat::{self, DATA_START_SECTOR, FAT1_SECTOR, FAT2_SECTOR, ROOT_SECTOR, SECTOR_SIZE};
use crate::image::{
    DiskImage, FAT1_OFFSET, FAT2_OFFSET, FILE_OFFSET, FILE_WINDOW_SECTORS, ROOT_OFFSET,
};
use crate::storage::{Clock, Flash};

use generic_array::GenericArray;
use typenum::consts::U512;

use log::{debug, info, trace, warn};

/// How long the host must stay quiet before a burst of writes is taken as
/// complete and pushed through validation and flash.
pub const QUIESCE_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BlockIoError {
    /// The buffer does not cover the advertised number of sectors.
    ShortBuffer { expected: usize, got: usize },
}

pub struct ConfigDisk<'v, F: Flash, C: Clock> {
    flash: F,
    clock: C,

    image: DiskImage,
    registry: Registry<'v>,

    slots: LineSlots,
    cleaned: [u8; LINE_CAP],
    staging: [u8; SECTOR_SIZE],

    // Deferred-flush state: armed by every host write, disarmed by a
    // successful flush.
    pending: bool,
    last_write_ms: u32,

    initialized: bool,
}

impl<'v, F: Flash, C: Clock> ConfigDisk<'v, F, C> {
    pub fn new(flash: F, clock: C) -> Self {
        Self {
            flash,
            clock,

            image: DiskImage::new(),
            registry: Registry::new(),

            slots: LineSlots::new(),
            cleaned: [0; LINE_CAP],
            staging: [0; SECTOR_SIZE],

            pending: false,
            last_write_ms: 0,

            initialized: false,
        }
    }

    /// Adds a configuration entry. All registration happens before
    /// [`init`](Self::init); later calls are refused so the served file
    /// and the registry can never disagree.
    pub fn register_entry(
        &mut self,
        name: &str,
        default: &'v str,
        comment: &str,
        validate: Option<ValidateFn>,
        update: Option<UpdateFn>,
        print: Option<PrintFn>,
    ) -> bool {
        if self.initialized {
            warn!("entry {:?} registered after init; refused", name);
            return false;
        }

        self.registry.register(name, default, comment, validate, update, print)
    }

    pub fn sector_count(&self) -> u32 {
        fat::TOTAL_SECTORS
    }

    pub fn sector_size(&self) -> u32 {
        SECTOR_SIZE as u32
    }

    /// Brings the volume up from whatever flash holds: a parseable file is
    /// revalidated in place, anything else gets the defaults rendered
    /// fresh. Either way the deferred flush is armed, so the normalized
    /// form lands back in flash shortly after.
    pub fn init(&mut self) {
        self.image.load(&self.flash);
        self.image.clear_all_dirty();
        self.initialized = true;

        match self.image.find_config_entry() {
            Some((idx, entry)) => {
                debug!(
                    "CONFIG.TXT at root index {} (cluster {}, {} bytes)",
                    idx,
                    entry.cluster_num(),
                    entry.file_size,
                );
                self.revalidate(entry.cluster_num());
                self.arm();
            }
            None => {
                info!("no CONFIG.TXT in the persisted image; rendering defaults");
                self.image.zero();
                self.rebuild(0);
                self.arm();
            }
        }
    }

    // -- block interface (RAM only; interrupt-safe) ---------------------

    /// Serves one sector to the host. Everything outside the populated
    /// windows reads as zeros.
    pub fn read_block(&self, sector: u32, out: &mut GenericArray<u8, U512>) {
        trace!("read sector {}", sector);

        if sector == 0 {
            BootSector::ramdisk().write(out);
            return;
        }

        let out = out.as_mut_slice();
        for b in out.iter_mut() {
            *b = 0;
        }

        match sector {
            FAT1_SECTOR => out.copy_from_slice(&self.image.fat1()[..SECTOR_SIZE]),
            FAT2_SECTOR => out.copy_from_slice(&self.image.fat2()[..SECTOR_SIZE]),
            ROOT_SECTOR => out.copy_from_slice(&self.image.root()[..SECTOR_SIZE]),

            s if s >= DATA_START_SECTOR => {
                let rel = (s - DATA_START_SECTOR) as usize;
                if rel < FILE_WINDOW_SECTORS {
                    let off = rel * SECTOR_SIZE;
                    out.copy_from_slice(&self.image.file_window()[off..off + SECTOR_SIZE]);
                }
            }

            _ => {}
        }
    }

    /// Accepts `count` sectors from the host. Window sectors land in the
    /// mirror (filtered, for the data area); everything is staged first so
    /// the transport's buffer can be reused immediately. Every request,
    /// accepted or not, (re)arms the deferred flush.
    pub fn write_blocks(&mut self, sector: u32, count: u32, buf: &[u8]) -> Result<(), BlockIoError> {
        let expected = count as usize * SECTOR_SIZE;
        if buf.len() < expected {
            return Err(BlockIoError::ShortBuffer { expected, got: buf.len() });
        }

        for i in 0..count as usize {
            self.staging.copy_from_slice(&buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            self.dispatch_write(sector + i as u32);
        }

        self.arm();
        Ok(())
    }

    fn dispatch_write(&mut self, sector: u32) {
        match sector {
            FAT1_SECTOR => {
                if self.image.replace_sector(FAT1_OFFSET, &self.staging) {
                    trace!("host rewrote FAT 1");
                }
            }
            FAT2_SECTOR => {
                if self.image.replace_sector(FAT2_OFFSET, &self.staging) {
                    trace!("host rewrote FAT 2");
                }
            }
            ROOT_SECTOR => {
                if self.image.replace_sector(ROOT_OFFSET, &self.staging) {
                    trace!("host rewrote the root directory");
                }
            }

            s if s >= DATA_START_SECTOR => {
                if !self.accept_data_write(s) {
                    debug!("rejected hostile write at sector {}", s);
                    return;
                }

                let rel = (s - DATA_START_SECTOR) as usize;
                if rel >= FILE_WINDOW_SECTORS {
                    trace!("write at sector {} has no backing store; discarded", s);
                    return;
                }

                self.image.replace_sector(FILE_OFFSET + rel * SECTOR_SIZE, &self.staging);
            }

            // Boot-sector and filler writes carry nothing we serve back.
            _ => trace!("discarding write at sector {}", sector),
        }
    }

    /// The hostile-write filter. Hosts probe freshly mounted volumes with
    /// metadata shadows (macOS `._*` resource forks, deleted-entry
    /// carcasses) and love reallocating recently freed clusters; those
    /// writes must not be allowed to shred the one real file.
    fn accept_data_write(&self, sector: u32) -> bool {
        let wc = fat::sector_to_cluster(sector);

        // Cluster 2 is the canonical home every future read is served
        // from: only recognizable content may land there, no matter what
        // the directory currently says.
        if wc == fat::FIRST_CLUSTER {
            return self.registry.matches_prefix(&self.staging);
        }

        let cc = self
            .image
            .find_config_entry()
            .map(|(_, e)| e.cluster_num())
            .unwrap_or(0);

        // Wherever the host's directory says the file lives right now is
        // fair game; that is the cluster real edits arrive at.
        if cc > 0 && wc == cc {
            return true;
        }

        let in_window = (wc as usize) <= fat::FIRST_CLUSTER as usize + FILE_WINDOW_SECTORS;
        let image_has_config = self.registry.matches_prefix(self.image.file_window());

        if in_window && image_has_config && looks_like_dot_file(&self.staging) {
            return false;
        }

        true
    }

    // -- main-loop side (may block on flash) ----------------------------

    /// Drives the deferred flush: once the host has been quiet for
    /// [`QUIESCE_MS`], the submitted file is revalidated and the mirror is
    /// persisted. A failed erase leaves everything armed for a retry on
    /// the next call.
    pub fn process(&mut self) {
        if !self.pending {
            return;
        }

        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_write_ms) < QUIESCE_MS {
            return;
        }

        if let Some((_, entry)) = self.image.find_config_entry() {
            if entry.file_size > 0 {
                let illegal = self.revalidate(entry.cluster_num());
                if illegal {
                    debug!("host submission needed normalization");
                }
            }
        }

        match self.image.flush_dirty(&mut self.flash) {
            Ok(()) => {
                self.pending = false;
            }
            Err(e) => {
                warn!("erase failed; keeping the flush pending: {:?}", e);
            }
        }
    }

    fn arm(&mut self) {
        self.last_write_ms = self.clock.now_ms();
        self.pending = true;
    }

    // -- parse & normalize ----------------------------------------------

    /// Full validation pass: pick the most credible copy of the file,
    /// parse it, run the callbacks, and rewrite the canonical form.
    /// Returns whether anything had to be corrected.
    fn revalidate(&mut self, host_cluster: u16) -> bool {
        let src = self.select_source(host_cluster);

        {
            let Self { ref image, ref mut slots, .. } = *self;
            slots.split(image.bytes_from(src));
        }

        let outcome = {
            let Self { ref registry, ref slots, ref mut cleaned, .. } = *self;
            parse::apply_entries(registry, slots, cleaned)
        };

        self.rebuild(outcome.force_defaults);
        outcome.illegal
    }

    /// Decides where to parse from. The host may have parked the file at
    /// any cluster it liked, but the canonical window is what future reads
    /// serve, and flash is the last resort; whichever of the three first
    /// looks like our file wins. When none do, the host's candidate is
    /// parsed anyway and the defaults take over.
    fn select_source(&mut self, host_cluster: u16) -> usize {
        if let Some(off) = self.image.cluster_offset(host_cluster) {
            if self.registry.matches_prefix(self.image.bytes_from(off)) {
                return off;
            }
        }

        if self.registry.matches_prefix(self.image.file_window()) {
            return FILE_OFFSET;
        }

        info!("nothing recognizable in RAM; reloading the persisted image");
        self.image.load(&self.flash);

        if self.registry.matches_prefix(self.image.file_window()) {
            return FILE_OFFSET;
        }

        self.image.cluster_offset(host_cluster).unwrap_or(FILE_OFFSET)
    }

    /// Rewrites the canonical on-disk state from the registry: file bytes
    /// at the window start (zero-padded), directory entry at index 0
    /// pinned to cluster 2, both FATs rebuilt, everything marked dirty.
    fn rebuild(&mut self, force_defaults: u8) {
        let len = {
            let Self { ref registry, ref mut slots, ref mut image, .. } = *self;

            let window = image.file_window_mut();
            for b in window.iter_mut() {
                *b = 0;
            }

            render::render(registry, force_defaults, slots.scratch(), window)
        };

        self.image.write_canonical_entry(len as u32);
        self.image.rebuild_fat(len as u32);
        self.image.mark_all_dirty();

        debug!("canonical file rebuilt: {} bytes", len);
    }
}

fn looks_like_dot_file(block: &[u8]) -> bool {
    // 0x00: resource-fork padding; 0x05: deleted-entry sentinel; a leading
    // '.' with a non-NUL successor is a `._*`/`.DS_Store`-style shadow.
    block[0] == 0x00 || block[0] == 0x05 || (block[0] == b'.' && block[1] != 0)
}
