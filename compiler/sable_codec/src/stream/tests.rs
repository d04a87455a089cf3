use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

fn reader(writer: TypeWriter) -> TypeReader {
    TypeReader::new(Arc::from(writer.into_bytes()), 0)
}

#[test]
fn small_values_take_one_byte() {
    let mut writer = TypeWriter::new();
    writer.put_uv(0);
    writer.put_uv(127);
    writer.put_sv(-1);
    writer.put_sv(63);
    assert_eq!(writer.bytes_written(), 4);
}

#[test]
fn leb128_continuation_bits() {
    let mut writer = TypeWriter::new();
    writer.put_uv(300);
    assert_eq!(writer.as_bytes(), &[0xac, 0x02]);
}

#[test]
fn fixed_width_is_little_endian() {
    let mut writer = TypeWriter::new();
    writer.put_u2(0x0102);
    writer.put_u4(0x0304_0506);
    assert_eq!(writer.as_bytes(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);

    let mut reader = reader(writer);
    assert_eq!(reader.get_u2(), Ok(0x0102));
    assert_eq!(reader.get_u4(), Ok(0x0304_0506));
}

#[test]
fn truncated_varint_reports_end() {
    let mut reader = TypeReader::new(Arc::from(vec![0x80u8, 0x80]), 0);
    assert_eq!(
        reader.get_uv(),
        Err(StreamError::UnexpectedEnd { position: 2 })
    );
}

#[test]
fn overlong_varint_reports_overflow() {
    let mut bytes = vec![0xffu8; 10];
    bytes.push(0x01);
    let mut reader = TypeReader::new(Arc::from(bytes), 0);
    assert_eq!(reader.get_uv(), Err(StreamError::Overflow { position: 0 }));
}

#[test]
fn u32_reads_reject_wide_values() {
    let mut writer = TypeWriter::new();
    writer.put_uv(u64::from(u32::MAX) + 1);
    let mut reader = reader(writer);
    assert!(matches!(
        reader.get_uv_u32(),
        Err(StreamError::OutOfRange { target: "u32", .. })
    ));
}

/// Seeking back restores the exact read position.
#[test]
fn save_seek_restore() {
    let mut writer = TypeWriter::new();
    writer.put_uv(1);
    writer.put_uv(1000);
    writer.put_uv(2);
    let mut reader = reader(writer);

    assert_eq!(reader.get_uv(), Ok(1));
    let saved = reader.byte_index();
    reader.set_byte_index(saved + 2);
    assert_eq!(reader.get_uv(), Ok(2));
    reader.set_byte_index(saved);
    assert_eq!(reader.get_uv(), Ok(1000));
}

proptest! {
    #[test]
    fn unsigned_varints_read_back(values in prop::collection::vec(any::<u64>(), 0..32)) {
        let mut writer = TypeWriter::new();
        for &value in &values {
            writer.put_uv(value);
        }
        let mut reader = reader(writer);
        for &value in &values {
            prop_assert_eq!(reader.get_uv(), Ok(value));
        }
        prop_assert!(reader.get_u1().is_err());
    }

    #[test]
    fn signed_varints_read_back(values in prop::collection::vec(any::<i64>(), 0..32)) {
        let mut writer = TypeWriter::new();
        for &value in &values {
            writer.put_sv(value);
        }
        let mut reader = reader(writer);
        for &value in &values {
            prop_assert_eq!(reader.get_sv(), Ok(value));
        }
    }
}
