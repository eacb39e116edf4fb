// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::types::{Error, Format, Modifier, Result};
use std::str;

// from drm_fourcc.h and gbm.h
mod consts {
    macro_rules! fourcc_code {
        ($a:literal, $b:literal, $c:literal, $d:literal) => {
            ($a as u32) | (($b as u32) << 8) | (($c as u32) << 16) | (($d as u32) << 24)
        };
    }

    macro_rules! fourcc_mod_code {
        ($vendor:ident, $val:expr) => {
            (($vendor as u64) << 56) | (($val as u64) & ((1 << 56) - 1))
        };
    }

    macro_rules! nvidia_block_linear_2d {
        ($c:literal, $s:literal, $g:literal, $k:literal, $h:literal) => {
            fourcc_mod_code!(
                DRM_FORMAT_MOD_VENDOR_NVIDIA,
                0x10 | ($h & 0xf)
                    | (($k & 0xff) << 12)
                    | (($g & 0x3) << 20)
                    | (($s & 0x1) << 22)
                    | (($c & 0x7) << 23)
            )
        };
    }

    pub const GBM_BO_FORMAT_XRGB8888: u32 = 0;
    pub const GBM_BO_FORMAT_ARGB8888: u32 = 1;

    pub const DRM_FORMAT_XRGB8888: u32 = fourcc_code!('X', 'R', '2', '4');
    pub const DRM_FORMAT_ARGB8888: u32 = fourcc_code!('A', 'R', '2', '4');
    pub const DRM_FORMAT_XBGR8888: u32 = fourcc_code!('X', 'B', '2', '4');
    pub const DRM_FORMAT_ABGR8888: u32 = fourcc_code!('A', 'B', '2', '4');

    const DRM_FORMAT_MOD_VENDOR_NONE: u64 = 0;
    pub const DRM_FORMAT_MOD_VENDOR_NVIDIA: u64 = 0x03;
    const DRM_FORMAT_RESERVED: u64 = (1u64 << 56) - 1;

    pub const DRM_FORMAT_MOD_INVALID: u64 =
        fourcc_mod_code!(DRM_FORMAT_MOD_VENDOR_NONE, DRM_FORMAT_RESERVED);
    pub const DRM_FORMAT_MOD_LINEAR: u64 = fourcc_mod_code!(DRM_FORMAT_MOD_VENDOR_NONE, 0);

    // the widest block-linear layout: no compression, 2D sector layout, all GOB kinds,
    // page kinds and block heights
    pub const DRM_FORMAT_MOD_NVIDIA_BLOCK_LINEAR_2D_MASK: u64 =
        nvidia_block_linear_2d!(0x0, 0x1, 0x3, 0xff, 0xf);

    pub const DRM_FORMAT_MOD_NVIDIA_VENDOR_BITS: u64 =
        fourcc_mod_code!(DRM_FORMAT_MOD_VENDOR_NVIDIA, 0);
}

/// Legacy GBM BO format for XRGB8888.
pub const BO_FORMAT_XRGB8888: Format = Format(consts::GBM_BO_FORMAT_XRGB8888);
/// Legacy GBM BO format for ARGB8888.
pub const BO_FORMAT_ARGB8888: Format = Format(consts::GBM_BO_FORMAT_ARGB8888);

/// `DRM_FORMAT_XRGB8888`.
pub const XRGB8888: Format = Format(consts::DRM_FORMAT_XRGB8888);
/// `DRM_FORMAT_ARGB8888`.
pub const ARGB8888: Format = Format(consts::DRM_FORMAT_ARGB8888);
/// `DRM_FORMAT_XBGR8888`.
pub const XBGR8888: Format = Format(consts::DRM_FORMAT_XBGR8888);
/// `DRM_FORMAT_ABGR8888`.
pub const ABGR8888: Format = Format(consts::DRM_FORMAT_ABGR8888);

/// `DRM_FORMAT_MOD_INVALID`.
pub const MOD_INVALID: Modifier = Modifier(consts::DRM_FORMAT_MOD_INVALID);
/// `DRM_FORMAT_MOD_LINEAR`.
pub const MOD_LINEAR: Modifier = Modifier(consts::DRM_FORMAT_MOD_LINEAR);

/// The modifier bits that are safe to import on this device.
///
/// A modifier is importable when it sets no bit outside of this mask.  The mask covers the
/// block-linear parameter space and the low two vendor bits, so compression and bits above
/// the low two of the vendor field are rejected.  The vendor field itself is not compared.
pub const ACCEPTED_MODIFIER_MASK: u64 = consts::DRM_FORMAT_MOD_NVIDIA_BLOCK_LINEAR_2D_MASK;

/// The bits identifying the NVIDIA modifier vendor.
#[cfg_attr(not(feature = "vendor"), allow(dead_code))]
pub(crate) const NVIDIA_VENDOR_BITS: u64 = consts::DRM_FORMAT_MOD_NVIDIA_VENDOR_BITS;

const SUPPORTED_FORMATS: [Format; 4] = [XRGB8888, ARGB8888, XBGR8888, ABGR8888];

/// The bits per pixel of every buffer allocated by the dumb strategy.
pub(crate) const DUMB_BPP: u32 = 32;

/// Converts a legacy GBM BO format to its DRM fourcc equivalent.
///
/// Every other format is returned unchanged.
pub fn canonicalize(fmt: Format) -> Format {
    match fmt.0 {
        consts::GBM_BO_FORMAT_XRGB8888 => XRGB8888,
        consts::GBM_BO_FORMAT_ARGB8888 => ARGB8888,
        _ => fmt,
    }
}

/// Returns true if a modifier only uses bits within [`ACCEPTED_MODIFIER_MASK`].
pub fn is_importable(modifier: Modifier) -> bool {
    modifier.0 & !ACCEPTED_MODIFIER_MASK == 0
}

/// Returns the importable modifiers of a modifier list, in their original order.
pub fn filter_modifiers(mods: &[Modifier]) -> Result<Vec<Modifier>> {
    let mut kept = Vec::new();
    kept.try_reserve_exact(mods.len())?;

    kept.extend(mods.iter().copied().filter(|&m| is_importable(m)));

    Ok(kept)
}

pub fn is_supported(fmt: Format) -> bool {
    SUPPORTED_FORMATS.contains(&canonicalize(fmt))
}

pub fn memory_plane_count(fmt: Format, _modifier: Modifier) -> Result<u32> {
    // there is no multi-planar modifier support
    if is_supported(fmt) {
        Ok(1)
    } else {
        Error::unsupported()
    }
}

pub fn fourcc(fmt: Format) -> String {
    let bytes = fmt.0.to_le_bytes();
    match str::from_utf8(&bytes) {
        Ok(s) if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => format!("'{s}'"),
        _ => format!("0x{:x}", fmt.0),
    }
}

pub fn name(fmt: Format) -> Option<&'static str> {
    let name = match fmt.0 {
        consts::DRM_FORMAT_XRGB8888 => "XRGB8888",
        consts::DRM_FORMAT_ARGB8888 => "ARGB8888",
        consts::DRM_FORMAT_XBGR8888 => "XBGR8888",
        consts::DRM_FORMAT_ABGR8888 => "ABGR8888",
        _ => {
            return None;
        }
    };

    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drm_fourcc::{DrmFourcc, DrmModifier};

    #[test]
    fn consts() {
        assert_eq!(consts::DRM_FORMAT_XRGB8888, DrmFourcc::Xrgb8888 as u32);
        assert_eq!(consts::DRM_FORMAT_ARGB8888, DrmFourcc::Argb8888 as u32);
        assert_eq!(consts::DRM_FORMAT_XBGR8888, DrmFourcc::Xbgr8888 as u32);
        assert_eq!(consts::DRM_FORMAT_ABGR8888, DrmFourcc::Abgr8888 as u32);
        assert_eq!(consts::DRM_FORMAT_MOD_INVALID, u64::from(DrmModifier::Invalid));
        assert_eq!(consts::DRM_FORMAT_MOD_LINEAR, u64::from(DrmModifier::Linear));
        assert_eq!(ACCEPTED_MODIFIER_MASK, 0x0300_0000_007f_f01f);
        assert_eq!(NVIDIA_VENDOR_BITS, 0x0300_0000_0000_0000);
    }

    #[test]
    fn canonicalize() {
        assert_eq!(super::canonicalize(BO_FORMAT_XRGB8888), XRGB8888);
        assert_eq!(super::canonicalize(BO_FORMAT_ARGB8888), ARGB8888);

        for fmt in [XRGB8888, ARGB8888, XBGR8888, ABGR8888, Format(0x1234_5678)] {
            assert_eq!(super::canonicalize(fmt), fmt);
        }

        for fmt in [BO_FORMAT_XRGB8888, BO_FORMAT_ARGB8888, XBGR8888, Format(2)] {
            let once = super::canonicalize(fmt);
            assert_eq!(super::canonicalize(once), once);
        }
    }

    #[test]
    fn is_importable() {
        assert!(super::is_importable(MOD_LINEAR));
        assert!(super::is_importable(Modifier(ACCEPTED_MODIFIER_MASK)));
        // block linear, 2D sectors, gob kind 2, page kind 0xfe, block height 4
        assert!(super::is_importable(Modifier(0x0300_0000_006f_e014)));

        assert!(!super::is_importable(MOD_INVALID));
        // compressed
        assert!(!super::is_importable(Modifier(ACCEPTED_MODIFIER_MASK | (1 << 23))));
        // vendor bits above the mask
        assert!(!super::is_importable(Modifier(0x0400_0000_0000_0000)));
        // bit 5 is outside of the block-linear fields
        assert!(!super::is_importable(Modifier(1 << 5)));

        // the vendor field is masked, not compared, so intel x-tiled fits
        assert!(super::is_importable(Modifier(0x0100_0000_0000_0001)));
    }

    #[test]
    fn filter_modifiers() {
        let compressed = Modifier(ACCEPTED_MODIFIER_MASK | (2 << 23));
        let block_linear = Modifier(0x0300_0000_0060_1015);
        let input = [compressed, MOD_LINEAR, MOD_INVALID, block_linear, compressed];

        let kept = super::filter_modifiers(&input).unwrap();
        assert_eq!(kept, vec![MOD_LINEAR, block_linear]);

        // kept is a subsequence of input
        let mut iter = input.iter();
        for m in &kept {
            assert!(iter.any(|i| i == m));
        }
        for m in &input {
            assert_eq!(kept.contains(m), super::is_importable(*m));
        }

        assert!(super::filter_modifiers(&[compressed, MOD_INVALID])
            .unwrap()
            .is_empty());
        assert!(super::filter_modifiers(&[]).unwrap().is_empty());
    }

    #[test]
    fn is_supported() {
        for fmt in SUPPORTED_FORMATS {
            assert!(super::is_supported(fmt));
        }
        assert!(super::is_supported(BO_FORMAT_XRGB8888));
        assert!(!super::is_supported(Format(DrmFourcc::Nv12 as u32)));
    }

    #[test]
    fn memory_plane_count() {
        assert_eq!(super::memory_plane_count(XRGB8888, MOD_LINEAR).unwrap(), 1);
        assert!(matches!(
            super::memory_plane_count(Format(DrmFourcc::Nv12 as u32), MOD_LINEAR),
            Err(Error::Unsupported)
        ));
    }

    #[test]
    fn fourcc() {
        assert_eq!(super::fourcc(XRGB8888), String::from("'XR24'"));
        assert_eq!(
            super::fourcc(Format(0xffffffff)),
            String::from("0xffffffff")
        );
        assert_eq!(super::fourcc(BO_FORMAT_ARGB8888), String::from("0x1"));
    }

    #[test]
    fn name() {
        assert_eq!(super::name(XRGB8888), Some("XRGB8888"));
        assert_eq!(super::name(BO_FORMAT_XRGB8888), None);
    }
}
