//! Benchmarks for the host-facing hot paths: serving sector reads and
//! digesting a complete edit (write, revalidate, rebuild, flush).

extern crate criterion;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use cfgdisk::storage::{Clock, EraseError, Flash, ProgramError};
use cfgdisk::ConfigDisk;

use generic_array::GenericArray;
use typenum::consts::U512;

const REGION: usize = 0x4000;

struct BenchFlash {
    mem: Vec<u8>,
}

impl Flash for BenchFlash {
    type ProgramErr = ();
    type EraseErr = ();

    fn unlock(&mut self) {}
    fn lock(&mut self) {}

    fn erase_region(&mut self) -> Result<(), EraseError<()>> {
        for b in self.mem.iter_mut() {
            *b = 0xFF;
        }
        Ok(())
    }

    fn program_halfword(&mut self, offset: usize, value: u16) -> Result<(), ProgramError<()>> {
        let bytes = value.to_le_bytes();
        self.mem[offset] = bytes[0];
        self.mem[offset + 1] = bytes[1];
        Ok(())
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) {
        buffer.copy_from_slice(&self.mem[offset..offset + buffer.len()]);
    }

    fn region_size(&self) -> usize {
        REGION
    }
}

/// Leaps past the quiescent window on every query so each `process` call
/// does real work.
struct SprintClock {
    now: u32,
}

impl Clock for SprintClock {
    fn now_ms(&mut self) -> u32 {
        self.now = self.now.wrapping_add(600);
        self.now
    }
}

fn fresh_disk() -> ConfigDisk<'static, BenchFlash, SprintClock> {
    let mut disk = ConfigDisk::new(
        BenchFlash { mem: vec![0xFF; REGION] },
        SprintClock { now: 0 },
    );

    disk.register_entry("brightness", "50", "#(0~100)", None, None, None);
    disk.register_entry("contrast", "10", "#(0~20)", None, None, None);
    disk.register_entry("gamma", "22", "#x10", None, None, None);
    disk.init();
    disk.process();

    disk
}

fn bench_sector_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("sector reads");

    let disk = fresh_disk();
    let served_sectors: u32 = 64 + 29;

    group.throughput(Throughput::Bytes(served_sectors as u64 * 512));
    group.bench_function("sweep the served range", |b| {
        b.iter(|| {
            let mut out: GenericArray<u8, U512> = GenericArray::default();
            let mut checksum: u64 = 0;

            for sector in 0..served_sectors {
                disk.read_block(sector, &mut out);
                checksum = checksum.wrapping_add(out.as_slice()[0] as u64);
            }

            checksum
        })
    });

    group.finish();
}

fn bench_edit_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("edit cycle");

    let mut disk = fresh_disk();

    let mut block = [0u8; 512];
    let line = b"brightness=75\t#(0~100)\r\n";
    block[..line.len()].copy_from_slice(line);

    group.throughput(Throughput::Bytes(512));
    group.bench_function("write + validate + flush", |b| {
        b.iter(|| {
            disk.write_blocks(64, 1, &block).unwrap();
            disk.process();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_sector_reads, bench_edit_cycle);
criterion_main!(benches);
