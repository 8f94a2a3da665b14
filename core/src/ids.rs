//! Hierarchical exposure identifier encoding.
//!
//! Composite identifiers are built by left-shifting a parent id and OR-ing
//! in the child id. Downstream joins rely on the decomposition law: a child
//! composite right-shifted by its field width equals its parent composite.
//! Field widths are a deployment-wide contract, so they are explicit here
//! and validated up front rather than living as shift literals at call
//! sites.

use serde::{Deserialize, Serialize};

/// Width of the exposure-sequence field (exposure 0 or 1 within a visit).
pub const EXPOSURE_BITS: u32 = 1;
/// Default width of the ccd field.
pub const DEFAULT_CCD_BITS: u32 = 8;
/// Default width of the amplifier field.
pub const DEFAULT_AMP_BITS: u32 = 6;

/// Errors that can occur while encoding hierarchical identifiers.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An identifier does not fit in its configured field width.
    #[error("{component} {value} does not fit in {bits} bits")]
    ComponentOutOfRange {
        component: &'static str,
        value: u64,
        bits: u32,
    },
    /// The configured widths leave no room for a visit id in 64 bits.
    #[error("Id scheme uses {child_bits} bits below the visit field; no room left for a visit id")]
    SchemeTooWide { child_bits: u32 },
}

/// Bit widths for the composite exposure identifier hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdScheme {
    /// Width of the ccd field in `ccdExposureId`.
    #[serde(default = "default_ccd_bits")]
    pub ccd_bits: u32,
    /// Width of the amplifier field in `ampExposureId`.
    #[serde(default = "default_amp_bits")]
    pub amp_bits: u32,
}

impl Default for IdScheme {
    fn default() -> Self {
        IdScheme {
            ccd_bits: DEFAULT_CCD_BITS,
            amp_bits: DEFAULT_AMP_BITS,
        }
    }
}

impl IdScheme {
    /// Number of bits left for the visit id once every child field is packed.
    fn visit_bits(&self) -> u32 {
        64u32.saturating_sub(EXPOSURE_BITS + self.ccd_bits + self.amp_bits)
    }

    /// Fails fast when the widths cannot host a usable visit id.
    pub fn validate(&self) -> Result<(), Error> {
        let child_bits = EXPOSURE_BITS + self.ccd_bits + self.amp_bits;
        if self.ccd_bits == 0 || self.amp_bits == 0 || child_bits >= 64 {
            return Err(Error::SchemeTooWide { child_bits });
        }
        Ok(())
    }

    /// Encodes the focal-plane exposure id: `(visitId << 1) | exposureId`.
    pub fn fpa_exposure_id(&self, visit_id: u64, exposure: u64) -> Result<u64, Error> {
        check_width("exposureId", exposure, EXPOSURE_BITS)?;
        check_width("visitId", visit_id, self.visit_bits())?;
        Ok((visit_id << EXPOSURE_BITS) | exposure)
    }

    /// Encodes the ccd exposure id: `(fpaExposureId << ccd_bits) | ccdId`.
    pub fn ccd_exposure_id(&self, fpa_exposure_id: u64, ccd_id: u64) -> Result<u64, Error> {
        check_width("ccdId", ccd_id, self.ccd_bits)?;
        Ok((fpa_exposure_id << self.ccd_bits) | ccd_id)
    }

    /// Encodes the amplifier exposure id: `(ccdExposureId << amp_bits) | ampId`.
    pub fn amp_exposure_id(&self, ccd_exposure_id: u64, amp_id: u64) -> Result<u64, Error> {
        check_width("ampId", amp_id, self.amp_bits)?;
        Ok((ccd_exposure_id << self.amp_bits) | amp_id)
    }

    /// Recovers the ccd exposure id from an amplifier exposure id.
    pub fn ccd_of_amp(&self, amp_exposure_id: u64) -> u64 {
        amp_exposure_id >> self.amp_bits
    }

    /// Recovers the focal-plane exposure id from a ccd exposure id.
    pub fn fpa_of_ccd(&self, ccd_exposure_id: u64) -> u64 {
        ccd_exposure_id >> self.ccd_bits
    }

    /// Recovers the visit id from a focal-plane exposure id.
    pub fn visit_of_fpa(fpa_exposure_id: u64) -> u64 {
        fpa_exposure_id >> EXPOSURE_BITS
    }
}

fn check_width(component: &'static str, value: u64, bits: u32) -> Result<(), Error> {
    if bits >= 64 || value < (1u64 << bits) {
        Ok(())
    } else {
        Err(Error::ComponentOutOfRange {
            component,
            value,
            bits,
        })
    }
}

fn default_ccd_bits() -> u32 {
    DEFAULT_CCD_BITS
}

fn default_amp_bits() -> u32 {
    DEFAULT_AMP_BITS
}
