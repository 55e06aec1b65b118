use super::eeprom::EepromMedium;
use super::flash::NorMedium;
use super::ram::RamMedium;
use super::*;

#[test]
fn props_erased_value() {
    assert_eq!(Props::FULL_OVERWRITE.erased_value(), 0xFF);
    assert_eq!((Props::FULL_OVERWRITE | Props::ZERO_ERASE).erased_value(), 0x00);
    assert!(Props::LIMITED_OVERWRITE.overwritable());
    assert!(!Props::LIMITED_OVERWRITE.erase_before_write());
    assert!(Props::empty().erase_before_write());
}

#[test]
fn ram_read_write_erase() {
    let mut backing = [0u8; 256];
    let mut ram = RamMedium::new(&mut backing, 8);

    ram.writev(0, &[&[0xDE, 0xAD], &[0xBE, 0xEF]]).unwrap();
    let mut buf = [0u8; 4];
    ram.readv(0, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF]);

    ram.erase(0, 1).unwrap();
    ram.readv(0, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0xFF; 4]);
}

#[test]
fn ram_out_of_bounds() {
    let mut backing = [0u8; 64];
    let mut ram = RamMedium::new(&mut backing, 8);
    assert_eq!(ram.writev(64, &[&[0u8]]), Err(Error::InvalidRange));
    assert_eq!(ram.readv(60, &mut [&mut [0u8; 8]]), Err(Error::InvalidRange));
    assert_eq!(ram.erase(8, 1), Err(Error::InvalidRange));
}

#[test]
fn eeprom_zero_erase() {
    let mut backing = [0xAAu8; 128];
    let mut eeprom = EepromMedium::new_zero_erase(&mut backing, 32);
    assert_eq!(eeprom.props().erased_value(), 0x00);
    assert_eq!(eeprom.write_block(), 1);

    eeprom.erase(0, 4).unwrap();
    let mut buf = [0xFFu8; 128];
    eeprom.readv(0, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0x00; 128]);
}

#[test]
fn nor_write_is_logical_and() {
    let mut backing = [0xFFu8; 256];
    let mut nor = NorMedium::new(&mut backing, 4, 64);

    nor.writev(0, &[&[0xF0, 0x0F, 0xFF, 0xFF]]).unwrap();
    // Same-word rewrite may only clear bits.
    nor.writev(0, &[&[0xCC, 0xFF, 0x00, 0xFF]]).unwrap();
    let mut buf = [0u8; 4];
    nor.readv(0, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0xC0, 0x0F, 0x00, 0xFF]);
}

#[test]
fn nor_erase_counts_blocks() {
    let mut backing = [0x00u8; 256];
    let mut nor = NorMedium::new(&mut backing, 4, 64);

    nor.erase(1, 2).unwrap();
    assert_eq!(nor.erase_count(0), 0);
    assert_eq!(nor.erase_count(1), 1);
    assert_eq!(nor.erase_count(2), 1);

    let mut buf = [0u8; 64];
    nor.readv(64, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0xFF; 64]);
    nor.readv(0, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0x00; 64]);
}

#[test]
fn nor_write_fault_is_one_shot() {
    let mut backing = [0xFFu8; 128];
    let mut nor = NorMedium::new(&mut backing, 4, 64);

    nor.fail_next_write_at(8);
    assert_eq!(nor.writev(8, &[&[0u8; 4]]), Err(Error::Io));
    // The array is untouched and the fault is disarmed.
    let mut buf = [0u8; 4];
    nor.readv(8, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0xFF; 4]);
    nor.writev(8, &[&[0u8; 4]]).unwrap();
    nor.readv(8, &mut [&mut buf]).unwrap();
    assert_eq!(buf, [0x00; 4]);
}

#[test]
fn nor_answers_xip() {
    let mut backing = [0xFFu8; 64];
    let base = backing.as_ptr() as usize;
    let mut nor = NorMedium::new(&mut backing, 4, 64);
    assert_eq!(nor.ioctl(Ioctl::XipAddress), Ok(IoctlValue::XipAddress(base)));
}

#[test]
fn borrowed_medium_is_a_medium() {
    fn capacity_of<M: Medium>(m: &M) -> u32 {
        m.capacity()
    }
    let mut backing = [0u8; 64];
    let mut ram = RamMedium::new(&mut backing, 8);
    assert_eq!(capacity_of(&(&mut ram)), 64);
}
