//! Root System Description Pointer (RSDP) validation.
//!
//! Spec §4.1/§6: the loader block carries an opaque ACPI root table pointer
//! plus a version tag (1 or 2). [`Rsdp::parse`] is the one place that
//! pointer is ever dereferenced by the core, to confirm it actually is an
//! RSDP and to read out the RSDT/XSDT address the rest of boot needs.

use aurora_core::addr::PhysAddr;

const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";

/// Errors returned while validating an RSDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsdpError {
    /// The 8-byte signature did not match `"RSD PTR "`.
    BadSignature,
    /// The ACPI 1.0 (20-byte) checksum did not sum to zero.
    BadChecksumV1,
    /// The ACPI 2.0+ (36-byte) extended checksum did not sum to zero.
    BadChecksumV2,
    /// The revision byte named a version this crate does not understand.
    UnsupportedRevision(u8),
}

/// A validated Root System Description Pointer.
#[derive(Debug, Clone, Copy)]
pub struct Rsdp {
    /// ACPI revision: 0 for ACPI 1.0 (RSDT only), 2 for ACPI 2.0+ (XSDT
    /// available). Matches the version tag the loader block carries.
    pub revision: u8,
    /// Physical address of the RSDT (32-bit table pointer).
    pub rsdt_address: PhysAddr,
    /// Physical address of the XSDT, when `revision >= 2`.
    pub xsdt_address: Option<PhysAddr>,
}

impl Rsdp {
    /// Parses and validates an RSDP from its raw bytes.
    ///
    /// `bytes` must cover at least the 20-byte ACPI 1.0 structure; if
    /// `revision >= 2` it must cover the full 36-byte ACPI 2.0+ structure.
    ///
    /// # Errors
    ///
    /// See [`RsdpError`].
    pub fn parse(bytes: &[u8]) -> Result<Self, RsdpError> {
        if bytes.len() < 20 || bytes[0..8] != RSDP_SIGNATURE {
            return Err(RsdpError::BadSignature);
        }
        if !checksum_zero(&bytes[0..20]) {
            return Err(RsdpError::BadChecksumV1);
        }

        let revision = bytes[15];
        let rsdt_address = PhysAddr::new_truncate(u64::from(u32::from_le_bytes(
            bytes[16..20].try_into().expect("slice is exactly 4 bytes"),
        )));

        match revision {
            0 => Ok(Self {
                revision,
                rsdt_address,
                xsdt_address: None,
            }),
            2 => {
                if bytes.len() < 36 {
                    return Err(RsdpError::BadChecksumV2);
                }
                if !checksum_zero(&bytes[0..36]) {
                    return Err(RsdpError::BadChecksumV2);
                }
                let xsdt_address = u64::from_le_bytes(
                    bytes[24..32].try_into().expect("slice is exactly 8 bytes"),
                );
                Ok(Self {
                    revision,
                    rsdt_address,
                    xsdt_address: Some(PhysAddr::new_truncate(xsdt_address)),
                })
            }
            other => Err(RsdpError::UnsupportedRevision(other)),
        }
    }

    /// Returns the most capable table pointer available: the XSDT if
    /// present, otherwise the RSDT.
    #[must_use]
    pub fn preferred_table(&self) -> (PhysAddr, bool) {
        match self.xsdt_address {
            Some(addr) => (addr, true),
            None => (self.rsdt_address, false),
        }
    }
}

fn checksum_zero(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_v1(rsdt: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        buf[0..8].copy_from_slice(&RSDP_SIGNATURE);
        buf[15] = 0;
        buf[16..20].copy_from_slice(&rsdt.to_le_bytes());
        let sum = buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        buf[8] = buf[8].wrapping_sub(sum);
        buf
    }

    fn sample_v2(rsdt: u32, xsdt: u64) -> Vec<u8> {
        let mut buf = sample_v1(rsdt);
        buf[15] = 2;
        // Re-derive the v1 checksum now that revision changed.
        buf[8] = 0;
        let sum1 = buf[0..20].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        buf[8] = buf[8].wrapping_sub(sum1);

        buf.resize(36, 0);
        buf[20..24].copy_from_slice(&36u32.to_le_bytes());
        buf[24..32].copy_from_slice(&xsdt.to_le_bytes());
        let sum2 = buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        buf[32] = buf[32].wrapping_sub(sum2);
        buf
    }

    #[test]
    fn parses_acpi_v1() {
        let bytes = sample_v1(0x1000);
        let rsdp = Rsdp::parse(&bytes).unwrap();
        assert_eq!(rsdp.revision, 0);
        assert_eq!(rsdp.rsdt_address.as_u64(), 0x1000);
        assert!(rsdp.xsdt_address.is_none());
        assert_eq!(rsdp.preferred_table(), (PhysAddr::new(0x1000), false));
    }

    #[test]
    fn parses_acpi_v2_and_prefers_xsdt() {
        let bytes = sample_v2(0x1000, 0x2000);
        let rsdp = Rsdp::parse(&bytes).unwrap();
        assert_eq!(rsdp.xsdt_address, Some(PhysAddr::new(0x2000)));
        assert_eq!(rsdp.preferred_table(), (PhysAddr::new(0x2000), true));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut bytes = sample_v1(0x1000);
        bytes[0] = b'X';
        assert_eq!(Rsdp::parse(&bytes), Err(RsdpError::BadSignature));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut bytes = sample_v1(0x1000);
        bytes[10] ^= 0xFF;
        assert_eq!(Rsdp::parse(&bytes), Err(RsdpError::BadChecksumV1));
    }

    #[test]
    fn unsupported_revision_is_rejected() {
        let mut bytes = sample_v1(0x1000);
        bytes[15] = 9;
        let sum = bytes[0..20].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        bytes[8] = bytes[8].wrapping_sub(sum);
        assert_eq!(Rsdp::parse(&bytes), Err(RsdpError::UnsupportedRevision(9)));
    }
}
