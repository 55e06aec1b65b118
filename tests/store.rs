use sastore::Error;
use sastore::area::{AreaLayout, StorageArea};
use sastore::medium::flash::NorMedium;
use sastore::medium::ram::RamMedium;
use sastore::medium::{Medium, Props};
use sastore::store::{
    CompactionPolicy, NoCompaction, RecordHandle, RecordView, Store, StoreConfig,
};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Keeps records whose payload starts with `b'A'` and logs every move.
#[derive(Default)]
struct KeepA {
    moved: Vec<(u16, u16)>,
}

impl<M: Medium> CompactionPolicy<M> for KeepA {
    fn keep(&mut self, record: &mut RecordView<'_, M>) -> bool {
        let mut tag = [0u8; 1];
        record.read(0, &mut tag).unwrap() == 1 && tag[0] == b'A'
    }

    fn relocated(&mut self, from: &RecordHandle, to: &RecordHandle) {
        self.moved.push((from.sector(), to.sector()));
    }
}

fn nor_layout(erase_size: u32, erase_blocks: u32) -> AreaLayout {
    AreaLayout {
        write_size: 8,
        erase_size,
        erase_blocks,
        props: Props::LIMITED_OVERWRITE,
    }
}

fn collect_payloads<M: Medium, P: CompactionPolicy<M>>(
    store: &mut Store<'_, M, P>,
) -> Vec<(u16, Vec<u8>)> {
    let mut out = Vec::new();
    let mut cursor = None;
    loop {
        match store.next_record(cursor.as_ref()) {
            Ok(rec) => {
                let mut buf = vec![0u8; rec.len() as usize];
                store.read_record(&rec, 0, &mut buf).unwrap();
                out.push((rec.sector(), buf));
                cursor = Some(rec);
            }
            Err(Error::NotFound) => return out,
            Err(e) => panic!("iteration failed: {e:?}"),
        }
    }
}

#[test]
fn round_trip_single_record() {
    let mut backing = [0xFFu8; 4096];
    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 4096), nor_layout(4096, 1)).unwrap();
    let mut store = Store::persistent(
        area,
        StoreConfig {
            sector_size: 1024,
            sector_count: 4,
            spare_sectors: 2,
            crc_skip: 0,
            cookie: &[],
        },
        NoCompaction,
    );
    store.mount().unwrap();
    assert_eq!((store.current_sector(), store.write_offset()), (0, 0));

    store.append(&[b"hello"]).unwrap();
    assert_eq!((store.current_sector(), store.write_offset()), (0, 24));

    let rec = store.next_record(None).unwrap();
    assert_eq!((rec.sector(), rec.location(), rec.len()), (0, 0, 5));
    assert_eq!(store.is_valid(&rec), Ok(true));

    let mut buf = [0u8; 5];
    assert_eq!(store.read_record(&rec, 0, &mut buf), Ok(5));
    assert_eq!(&buf, b"hello");
}

#[test]
fn wrap_increments_wrap_counter() {
    let mut backing = [0xFFu8; 4096];
    let area = StorageArea::new(
        RamMedium::new(&mut backing, 8),
        AreaLayout {
            write_size: 8,
            erase_size: 1024,
            erase_blocks: 4,
            props: Props::FULL_OVERWRITE,
        },
    )
    .unwrap();
    let mut store = Store::circular(
        area,
        StoreConfig {
            sector_size: 1024,
            sector_count: 4,
            spare_sectors: 2,
            crc_skip: 0,
            cookie: &[],
        },
    );
    store.mount().unwrap();

    let payload: [u8; 16] = core::array::from_fn(|i| i as u8);
    // Each frame occupies 32 bytes, so 32 appends fill one sector exactly.
    let mut appended = 0u32;
    while appended < 128 {
        match store.append(&[&payload]) {
            Ok(_) => appended += 1,
            Err(Error::NoSpace) => store.advance().unwrap(),
            Err(e) => panic!("append failed: {e:?}"),
        }
    }
    assert_eq!(store.current_sector(), 3);
    assert_eq!(store.write_offset(), 1024);
    assert_eq!(store.wrap_count(), 0);

    // The 129th record wraps the head back to sector zero.
    assert_eq!(store.append(&[&payload]), Err(Error::NoSpace));
    store.advance().unwrap();
    store.append(&[&payload]).unwrap();
    assert_eq!(store.current_sector(), 0);
    assert_eq!(store.wrap_count(), 1);
}

#[test]
fn invalidate_via_prefix_update() {
    let mut backing = [0xFFu8; 2048];
    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 512), nor_layout(512, 4)).unwrap();
    let mut store = Store::circular(
        area,
        StoreConfig {
            sector_size: 512,
            sector_count: 4,
            spare_sectors: 0,
            crc_skip: 1,
            cookie: &[],
        },
    );
    store.mount().unwrap();

    let rec = store.append(&[&[0xFF, 0xAA, 0xBB, 0xCC]]).unwrap();
    store.update_record(&rec, &[0x00]).unwrap();

    // The CRC covers only bytes 1.., so the record still scans as valid;
    // a liveness filter looking at byte 0 now sees it cleared.
    assert_eq!(store.is_valid(&rec), Ok(true));
    let mut buf = [0u8; 4];
    store.read_record(&rec, 0, &mut buf).unwrap();
    assert_eq!(buf, [0x00, 0xAA, 0xBB, 0xCC]);

    let rescanned = store.next_record(None).unwrap();
    assert_eq!(rescanned.location(), rec.location());
}

const PCB_CFG: StoreConfig<'static> = StoreConfig {
    sector_size: 1024,
    sector_count: 8,
    spare_sectors: 4,
    crc_skip: 0,
    cookie: &[],
};

/// Appends `A<i>` (live) and `B<i>` (dead) into the current sector.
fn fill_sector<M: Medium, P: CompactionPolicy<M>>(store: &mut Store<'_, M, P>, i: u8) {
    store.append(&[b"A", &[i]]).unwrap();
    store.append(&[b"B", &[i]]).unwrap();
}

#[test]
fn compact_moves_live_records_only() {
    let mut backing = [0xFFu8; 8192];
    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 8)).unwrap();
    let mut store = Store::persistent(area, PCB_CFG, KeepA::default());
    store.mount().unwrap();

    for i in 0u8..4 {
        fill_sector(&mut store, i);
        if i < 3 {
            store.compact().unwrap();
        }
    }
    assert_eq!(store.current_sector(), 3);

    // This compact slides the head to sector 4 and rescues sector 0, which
    // just fell out of the iteration window.
    store.compact().unwrap();
    assert_eq!(store.current_sector(), 4);
    assert_eq!(store.policy().unwrap().moved, vec![(0, 4)]);

    let payloads = collect_payloads(&mut store);
    // A0 survives exactly once, rewritten into sector 4; B0 is gone.
    let a0: Vec<_> = payloads.iter().filter(|(_, p)| p == b"A\x00").collect();
    assert_eq!(a0.len(), 1);
    assert_eq!(a0[0].0, 4);
    assert!(!payloads.iter().any(|(_, p)| p == b"B\x00"));

    // A full cycle of compacts rescues every live record and retires every
    // dead one; the erase block that held sector 0's originals is reclaimed.
    for _ in 0..4 {
        store.compact().unwrap();
    }
    assert_eq!(store.current_sector(), 0);
    let payloads = collect_payloads(&mut store);
    for i in 0u8..4 {
        let live: Vec<_> = payloads
            .iter()
            .filter(|(_, p)| p == &[b'A', i].to_vec())
            .collect();
        assert_eq!(live.len(), 1, "A{i} must survive exactly once");
    }
    assert!(!payloads.iter().any(|(_, p)| p[0] == b'B'));
    assert_eq!(
        store.policy().unwrap().moved,
        vec![(0, 4), (1, 5), (2, 6), (3, 7), (4, 0)]
    );
}

#[test]
fn recovery_after_copies_landed() {
    let mut backing = [0xFFu8; 8192];
    {
        let area =
            StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 8)).unwrap();
        let mut store = Store::persistent(area, PCB_CFG, KeepA::default());
        store.mount().unwrap();
        for i in 0u8..4 {
            fill_sector(&mut store, i);
            if i < 3 {
                store.compact().unwrap();
            }
        }
        // The compact whose erase tail the "power loss" swallows: copies
        // from sector 0 land in sector 4, the source stays behind.
        store.compact().unwrap();
        assert_eq!(store.policy().unwrap().moved, vec![(0, 4)]);
        // Dropped without unmount: power loss.
    }

    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 8)).unwrap();
    let mut store = Store::persistent(area, PCB_CFG, KeepA::default());
    store.mount().unwrap();

    // Recovery found keepable records in the at-risk window and re-ran the
    // compact from the recovered head.
    assert_eq!(store.current_sector(), 5);
    assert_eq!(store.policy().unwrap().moved, vec![(1, 5)]);

    let payloads = collect_payloads(&mut store);
    for i in 0u8..4 {
        let live: Vec<_> = payloads
            .iter()
            .filter(|(_, p)| p == &[b'A', i].to_vec())
            .collect();
        assert_eq!(live.len(), 1, "A{i} must survive exactly once");
    }
}

#[test]
fn recovery_after_lost_moves() {
    let mut backing = [0xFFu8; 8192];
    {
        // Build the same log with a circular store, then advance once more:
        // the medium now looks exactly like a compact that moved the head
        // but lost power before copying anything.
        let area =
            StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 8)).unwrap();
        let mut store = Store::circular(area, PCB_CFG);
        store.mount().unwrap();
        for i in 0u8..4 {
            fill_sector(&mut store, i);
            if i < 3 {
                store.advance().unwrap();
            }
        }
        store.advance().unwrap();
        assert_eq!(store.current_sector(), 4);
    }

    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 8)).unwrap();
    let mut store = Store::persistent(area, PCB_CFG, KeepA::default());
    store.mount().unwrap();

    // The scan cannot see the empty head sector, so the head recovers one
    // sector back; recovery still finds the unmoved records and compacts.
    assert_eq!(store.current_sector(), 4);
    assert_eq!(store.policy().unwrap().moved, vec![(0, 4)]);

    let payloads = collect_payloads(&mut store);
    for i in 0u8..4 {
        let live: Vec<_> = payloads
            .iter()
            .filter(|(_, p)| p == &[b'A', i].to_vec())
            .collect();
        assert_eq!(live.len(), 1, "A{i} must survive exactly once");
    }
}

#[test]
fn append_skips_bad_write_block() {
    let mut backing = [0xFFu8; 4096];
    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 4)).unwrap();
    let mut store = Store::circular(
        area,
        StoreConfig {
            sector_size: 1024,
            sector_count: 4,
            spare_sectors: 0,
            crc_skip: 0,
            cookie: &[],
        },
    );
    store.mount().unwrap();

    store.area_mut().medium_mut().fail_next_write_at(0);
    let rec = store.append(&[b"hello"]).unwrap();

    // The engine stepped one write block past the defective word.
    assert_eq!(rec.location(), 8);
    assert_eq!(store.write_offset(), 32);

    // The skipped block reads as erased and iteration resyncs across it.
    let mut skipped = [0u8; 8];
    store.area_mut().read(0, &mut skipped).unwrap();
    assert_eq!(skipped, [0xFF; 8]);

    let found = store.next_record(None).unwrap();
    assert_eq!(found.location(), 8);
    let mut buf = [0u8; 5];
    store.read_record(&found, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn append_order_is_preserved() {
    let mut backing = [0xFFu8; 8192];
    let area = StorageArea::new(
        RamMedium::new(&mut backing, 8),
        AreaLayout {
            write_size: 8,
            erase_size: 2048,
            erase_blocks: 4,
            props: Props::FULL_OVERWRITE,
        },
    )
    .unwrap();
    let mut store = Store::circular(
        area,
        StoreConfig {
            sector_size: 2048,
            sector_count: 4,
            spare_sectors: 0,
            crc_skip: 0,
            cookie: &[],
        },
    );
    store.mount().unwrap();

    let mut rng = StdRng::seed_from_u64(0x5A5701E);
    let mut written: Vec<Vec<u8>> = Vec::new();
    for i in 0u8..40 {
        let len = rng.gen_range(1..=64);
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[1..]);
        payload[0] = i;
        match store.append(&[&payload]) {
            Ok(_) => written.push(payload),
            Err(Error::NoSpace) => {
                store.advance().unwrap();
                store.append(&[&payload]).unwrap();
                written.push(payload);
            }
            Err(e) => panic!("append failed: {e:?}"),
        }
    }

    let read: Vec<Vec<u8>> = collect_payloads(&mut store)
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    assert_eq!(read, written);
}

#[test]
fn mount_is_deterministic() {
    let mut backing = [0xFFu8; 4096];
    let area = StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 4)).unwrap();
    let mut store = Store::circular(
        area,
        StoreConfig {
            sector_size: 1024,
            sector_count: 4,
            spare_sectors: 0,
            crc_skip: 0,
            cookie: b"cookie99",
        },
    );
    store.mount().unwrap();
    for i in 0u8..7 {
        store.append(&[&[i; 21]]).unwrap();
    }
    let first = (
        store.current_sector(),
        store.write_offset(),
        store.wrap_count(),
    );
    store.unmount().unwrap();
    store.mount().unwrap();
    let second = (
        store.current_sector(),
        store.write_offset(),
        store.wrap_count(),
    );
    assert_eq!(first, second);

    // A write in between moves the head; a further remount sees it again.
    store.append(&[b"more"]).unwrap();
    let third = (
        store.current_sector(),
        store.write_offset(),
        store.wrap_count(),
    );
    store.unmount().unwrap();
    store.mount().unwrap();
    assert_eq!(
        third,
        (
            store.current_sector(),
            store.write_offset(),
            store.wrap_count(),
        )
    );
}

#[cfg(feature = "std")]
#[test]
fn disk_store_survives_remount() {
    use sastore::medium::disk::FileMedium;

    let path = std::env::temp_dir().join(format!("sastore-disk-{}.bin", std::process::id()));
    let layout = AreaLayout {
        write_size: 64,
        erase_size: 4096,
        erase_blocks: 2,
        props: Props::FULL_OVERWRITE,
    };
    let cfg = StoreConfig {
        sector_size: 4096,
        sector_count: 2,
        spare_sectors: 0,
        crc_skip: 0,
        cookie: b"diskring",
    };

    {
        let medium = FileMedium::create(&path, 8192).unwrap();
        let area = StorageArea::verified(medium, layout).unwrap();
        let mut store = Store::circular(area, cfg);
        store.mount().unwrap();
        store.append(&[b"first"]).unwrap();
        store.append(&[b"second"]).unwrap();
        store.unmount().unwrap();
    }

    let file = std::fs::File::options()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    let area = StorageArea::verified(FileMedium::new(file, 8192), layout).unwrap();
    let mut store = Store::circular(area, cfg);
    store.mount().unwrap();

    let payloads = collect_payloads(&mut store);
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0].1, b"first");
    assert_eq!(payloads[1].1, b"second");

    std::fs::remove_file(&path).ok();
}

#[test]
fn wipe_resets_the_medium() {
    let mut backing = [0xFFu8; 4096];
    {
        let area =
            StorageArea::new(NorMedium::new(&mut backing, 8, 1024), nor_layout(1024, 4)).unwrap();
        let mut store = Store::circular(
            area,
            StoreConfig {
                sector_size: 1024,
                sector_count: 4,
                spare_sectors: 0,
                crc_skip: 0,
                cookie: &[],
            },
        );
        store.mount().unwrap();
        store.append(&[b"doomed"]).unwrap();
        store.unmount().unwrap();
        store.wipe().unwrap();
    }
    assert_eq!(backing, [0xFF; 4096]);
}
