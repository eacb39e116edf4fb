// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::bo::Bo;
use super::device::Device;
use super::formats::{self, MOD_LINEAR};
use super::types::{Format, Modifier, Result, Usage};
use log::{debug, warn};
use std::rc::Rc;

/// A surface.
///
/// A surface records the parameters shared by the BOs it produces, including the modifiers
/// that are safe to allocate with.
pub struct Surface {
    device: Rc<Device>,
    width: u32,
    height: u32,
    format: Format,
    usage: Usage,
    modifiers: Option<Vec<Modifier>>,
}

fn single(modifier: Modifier) -> Result<Vec<Modifier>> {
    let mut mods = Vec::new();
    mods.try_reserve_exact(1)?;
    mods.push(modifier);

    Ok(mods)
}

impl Surface {
    /// Creates a surface.
    ///
    /// Without a modifier list, a scanout surface is restricted to `DRM_FORMAT_MOD_LINEAR`.
    /// With one, only the importable modifiers are kept, and the result may be empty.  A list
    /// consisting of `DRM_FORMAT_MOD_INVALID` alone can never be satisfied.  It is diagnosed
    /// and kept as is so that the failure surfaces at allocation time.
    pub fn new(
        device: Rc<Device>,
        width: u32,
        height: u32,
        format: Format,
        usage: Usage,
        modifiers: Option<&[Modifier]>,
    ) -> Result<Self> {
        let modifiers = match modifiers {
            None if usage.contains(Usage::SCANOUT) => Some(single(MOD_LINEAR)?),
            None => None,
            Some(&[modifier]) if modifier.is_invalid() => {
                warn!("only the invalid modifier is specified");
                Some(single(modifier)?)
            }
            Some(mods) => {
                let kept = formats::filter_modifiers(mods)?;
                if kept.len() < mods.len() {
                    debug!("dropped {} unimportable modifiers", mods.len() - kept.len());
                }
                Some(kept)
            }
        };

        let surf = Self {
            device,
            width,
            height,
            format: formats::canonicalize(format),
            usage,
            modifiers,
        };

        Ok(surf)
    }

    /// Returns the width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the canonical format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns the usage BOs are allocated with.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Returns the modifier list, or `None` if the surface has none.
    pub fn modifiers(&self) -> Option<&[Modifier]> {
        self.modifiers.as_deref()
    }

    /// Allocates a BO with the surface parameters.
    pub fn create_bo(&self) -> Result<Bo> {
        Bo::new(
            self.device.clone(),
            self.width,
            self.height,
            self.format,
            self.usage,
            self.modifiers().unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Builder;
    use crate::testing::FakeCard;
    use crate::types::Error;
    use crate::{ACCEPTED_MODIFIER_MASK, BO_FORMAT_ARGB8888, MOD_INVALID, XRGB8888};

    fn device() -> Rc<Device> {
        Builder::new()
            .card(Rc::new(FakeCard::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn scanout_without_modifiers() {
        let surf = Surface::new(device(), 64, 64, XRGB8888, Usage::SCANOUT, None).unwrap();
        assert_eq!(surf.modifiers(), Some(&[MOD_LINEAR][..]));

        let surf = Surface::new(
            device(),
            64,
            64,
            XRGB8888,
            Usage::SCANOUT | Usage::RENDERING,
            None,
        )
        .unwrap();
        assert_eq!(surf.modifiers(), Some(&[MOD_LINEAR][..]));
    }

    #[test]
    fn no_modifiers() {
        let surf = Surface::new(device(), 64, 64, XRGB8888, Usage::RENDERING, None).unwrap();
        assert_eq!(surf.modifiers(), None);
        assert_eq!(surf.width(), 64);
        assert_eq!(surf.height(), 64);
        assert_eq!(surf.usage(), Usage::RENDERING);
    }

    #[test]
    fn filtered_modifiers() {
        let compressed = Modifier(ACCEPTED_MODIFIER_MASK | (1 << 23));
        let block_linear = Modifier(0x0300_0000_0060_1015);
        let mods = [compressed, block_linear, MOD_INVALID, MOD_LINEAR];

        let surf = Surface::new(
            device(),
            64,
            64,
            BO_FORMAT_ARGB8888,
            Usage::SCANOUT,
            Some(&mods),
        )
        .unwrap();
        assert_eq!(surf.format(), crate::ARGB8888);
        assert_eq!(surf.modifiers(), Some(&[block_linear, MOD_LINEAR][..]));
    }

    #[test]
    fn all_modifiers_rejected() {
        let compressed = Modifier(ACCEPTED_MODIFIER_MASK | (1 << 23));

        let surf = Surface::new(
            device(),
            64,
            64,
            XRGB8888,
            Usage::RENDERING,
            Some(&[compressed, compressed]),
        )
        .unwrap();
        assert_eq!(surf.modifiers().map(<[Modifier]>::len), Some(0));

        let surf =
            Surface::new(device(), 64, 64, XRGB8888, Usage::SCANOUT, Some(&[])).unwrap();
        assert_eq!(surf.modifiers().map(<[Modifier]>::len), Some(0));
    }

    #[test]
    fn only_invalid_modifier() {
        let surf = Surface::new(
            device(),
            64,
            64,
            XRGB8888,
            Usage::RENDERING,
            Some(&[MOD_INVALID]),
        )
        .unwrap();
        assert_eq!(surf.modifiers(), Some(&[MOD_INVALID][..]));

        // invalid among others is filtered
        let surf = Surface::new(
            device(),
            64,
            64,
            XRGB8888,
            Usage::RENDERING,
            Some(&[MOD_INVALID, MOD_LINEAR]),
        )
        .unwrap();
        assert_eq!(surf.modifiers(), Some(&[MOD_LINEAR][..]));
    }

    #[test]
    fn create_bo() {
        let surf = Surface::new(
            device(),
            32,
            32,
            XRGB8888,
            Usage::WRITE | Usage::SCANOUT,
            None,
        )
        .unwrap();
        let bo = surf.create_bo().unwrap();
        assert_eq!(bo.width(), 32);
        assert_eq!(bo.modifier(), MOD_LINEAR);

        let surf = Surface::new(device(), 32, 32, XRGB8888, Usage::SCANOUT, None).unwrap();
        assert!(matches!(surf.create_bo(), Err(Error::Unsupported)));
    }
}
