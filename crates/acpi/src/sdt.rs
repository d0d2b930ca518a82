//! System Description Table (SDT) header and checksum validation.
//!
//! The 36-byte header at the start of every ACPI table (RSDT, XSDT, MADT,
//! FADT, HPET, MCFG, ...). The core never interprets a table body — that's
//! the AML interpreter's job — but it does need the header to locate tables
//! by signature and to validate the checksum before handing a pointer
//! onward.

/// Standard ACPI System Description Table header, byte-exact.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct SdtHeader {
    /// 4-byte ASCII signature identifying the table type (e.g. `b"FACP"`).
    pub signature: [u8; 4],
    /// Total length of the table, including this header, in bytes.
    pub length: u32,
    /// Revision of the table structure.
    pub revision: u8,
    /// Checksum byte; the entire table (header included) must sum to zero
    /// modulo 256.
    pub checksum: u8,
    /// OEM-supplied identification string.
    pub oem_id: [u8; 6],
    /// OEM-supplied table identification string.
    pub oem_table_id: [u8; 8],
    /// OEM-supplied revision number.
    pub oem_revision: u32,
    /// Vendor ID of the utility that created the table.
    pub creator_id: u32,
    /// Revision of the utility that created the table.
    pub creator_revision: u32,
}

impl SdtHeader {
    /// Size of an SDT header in bytes.
    pub const SIZE: usize = 36;

    /// Reads an `SdtHeader` from the start of `data`.
    ///
    /// Returns `None` if `data` is shorter than [`Self::SIZE`].
    #[must_use]
    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        // SAFETY: `SdtHeader` is `#[repr(C, packed)]` with only integer and
        // byte-array fields, so any 36-byte sequence is a valid bit
        // pattern; the read is unaligned-safe because the struct is packed.
        Some(unsafe { (data.as_ptr().cast::<SdtHeader>()).read_unaligned() })
    }

    /// Validates that `table` (header plus body, `self.length` bytes long)
    /// sums to zero modulo 256, per the ACPI checksum rule.
    #[must_use]
    pub fn checksum_valid(table: &[u8]) -> bool {
        table.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table(signature: [u8; 4], extra: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; SdtHeader::SIZE];
        buf[0..4].copy_from_slice(&signature);
        let len = (SdtHeader::SIZE + extra.len()) as u32;
        buf[4..8].copy_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(extra);
        let sum = buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        buf[9] = buf[9].wrapping_sub(sum);
        buf
    }

    #[test]
    fn reads_signature_and_length() {
        let table = sample_table(*b"FACP", &[1, 2, 3]);
        let header = SdtHeader::read_from(&table).unwrap();
        assert_eq!(header.signature, *b"FACP");
        assert_eq!({ header.length }, table.len() as u32);
    }

    #[test]
    fn checksum_accepts_balanced_table_and_rejects_corruption() {
        let mut table = sample_table(*b"APIC", &[9, 9, 9]);
        assert!(SdtHeader::checksum_valid(&table));
        table[10] ^= 0xFF;
        assert!(!SdtHeader::checksum_valid(&table));
    }

    #[test]
    fn short_slice_is_rejected() {
        assert!(SdtHeader::read_from(&[0u8; 10]).is_none());
    }
}
