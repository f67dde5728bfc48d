use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::Result;

/// Where each section of the body starts, and how many entries the global
/// data tables and the change form store hold.
///
/// Offsets are logical positions: bytes of the uncompressed header and
/// screenshot plus bytes of the (decompressed) body.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[brw(little)]
pub struct FileLocationTable {
    pub form_id_array_count_offset: u32,
    pub unknown_table3_offset: u32,
    pub global_data_table1_offset: u32,
    pub global_data_table2_offset: u32,
    pub change_forms_offset: u32,
    pub global_data_table3_offset: u32,
    pub global_data_table1_count: u32,
    pub global_data_table2_count: u32,
    pub global_data_table3_count: u32,
    pub change_form_count: u32,
    pub unused: [u32; 15],
}

impl FileLocationTable {
    pub const BYTE_SIZE: usize = 25 * 4;

    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self> {
        let bytes = c.read_bytes(Self::BYTE_SIZE)?;
        let table = <Self as BinRead>::read(&mut Cursor::new(bytes))?;
        Ok(table)
    }

    pub fn write(&self, out: &mut ByteSink) -> Result<()> {
        let mut buf = Cursor::new(Vec::with_capacity(Self::BYTE_SIZE));
        BinWrite::write(self, &mut buf)?;
        out.write_bytes(buf.get_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_one_hundred_bytes_little_endian() {
        let table = FileLocationTable {
            form_id_array_count_offset: 0x0102_0304,
            change_form_count: 7,
            ..Default::default()
        };
        let mut out = ByteSink::new();
        table.write(&mut out).unwrap();
        assert_eq!(out.len(), FileLocationTable::BYTE_SIZE);
        assert_eq!(&out.as_slice()[..4], &[4, 3, 2, 1]);
        assert_eq!(&out.as_slice()[36..40], &[7, 0, 0, 0]);

        let back = FileLocationTable::read(&mut ByteCursor::new(out.as_slice())).unwrap();
        assert_eq!(back, table);
    }
}
