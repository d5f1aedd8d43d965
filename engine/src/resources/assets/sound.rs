// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{
    allocators::MemoryProperties,
    resources::{AssetBuffer, AssetLoader, AssetType, LoadError, SizeEstimate},
};

pub const SOUND_BANK_TYPE_TAG: [u8; 4] = *b"rbnk";

/// Identifies a sound bank loaded by [`SoundBanks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankHandle(pub u64);

/// The audio system sound banks are loaded into. The engine only keeps the
/// handle, the bank's contents live in the audio system.
pub trait SoundBanks {
    /// Loads the bank, returning None if the audio system couldn't.
    fn load_bank(&self, path: &str, data: &[u8]) -> Option<BankHandle>;
    fn unload_bank(&self, handle: BankHandle) -> bool;
}

/// The loaded form of a sound bank file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundBank {
    pub handle: BankHandle,
}

impl AssetBuffer<'_> {
    pub fn sound_bank(&self) -> Option<&SoundBank> {
        // Safety: SoundLoader places a SoundBank first.
        unsafe { self.root::<SoundBank>(AssetType::Sound) }
    }
}

/// Hands bank files over to a [`SoundBanks`] implementation, and stores the
/// resulting handle in the asset buffer.
pub struct SoundLoader<'s> {
    banks: &'s dyn SoundBanks,
}

impl<'s> SoundLoader<'s> {
    pub fn new(banks: &'s dyn SoundBanks) -> SoundLoader<'s> {
        SoundLoader { banks }
    }
}

impl AssetLoader for SoundLoader<'_> {
    fn pattern(&self) -> &'static str {
        "rbnk"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Sound
    }

    fn loaded_asset_size(&self, _: &str, _: &[u8], properties: MemoryProperties) -> Result<u64, LoadError> {
        let mut estimate = SizeEstimate::new(properties);
        estimate.add::<SoundBank>();
        Ok(estimate.total())
    }

    fn load_asset(&self, path: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError> {
        let Some(handle) = self.banks.load_bank(path, raw) else {
            tracing::error!("could not load sound bank {path:?}");
            return Err(LoadError::ExternalResource);
        };
        let mut cursor = buffer.cursor();
        cursor.place(SoundBank { handle })?;
        cursor.finish()?;
        buffer.set_loaded(AssetType::Sound);
        Ok(())
    }

    fn free_asset(&self, buffer: &mut AssetBuffer) -> bool {
        let Some(handle) = buffer.sound_bank().map(|bank| bank.handle) else {
            return false;
        };
        // The handle is dead after unloading, the audio system may reuse it.
        buffer.forget_loaded();
        self.banks.unload_bank(handle)
    }
}
