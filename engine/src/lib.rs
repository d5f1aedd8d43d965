// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Memory management and asset loading for games: allocators with
//! pluggable bounds checking and tracking, fixed-capacity containers that
//! live inside those allocators' memory, and loaders which lay out assets
//! from packed files into single contiguous buffers.

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocators;
pub mod collections;
pub mod geom;
pub mod hash;
pub mod resources;

#[cfg(test)]
mod test_platform;
