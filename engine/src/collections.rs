// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fixed-capacity containers which store their elements inline, in the same
//! allocation as their header. They're either allocated from a
//! [`MemoryArena`](crate::allocators::MemoryArena) with `new_in`, or
//! constructed in place in preallocated memory with `emplace`, which is how
//! assets are laid out in their buffers.

mod sarray;
mod shashmap;
mod squeue;

pub use sarray::SArray;
pub use shashmap::{
    capacity_for, HashMapEntry, SHashMap, END_OF_LIST, LOAD_FACTOR_MULTIPLIER, MAX_LOAD_FACTOR,
};
pub use squeue::SQueue;
