// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

mod io;

use core::ffi::c_void;

pub use io::*;

/// "Platform abstraction layer": a trait for using platform-dependent features
/// from the engine without depending on any platform directly.
///
/// All the functions have a `&self` parameter, so that the methods can access
/// some (possibly internally mutable) state, but still keeping the platform
/// object as widely usable as possible (a "platform" is about as global an
/// object as you get). None of these functions are (supposed to be) hot, and
/// this trait is object safe, so using &dyn [`Pal`] should be fine
/// performance-wise.
pub trait Pal {
    /// Open a file for reading. Returns None if the file can't be read.
    fn open_file(&self, path: &str) -> Option<FileHandle>;

    /// Open a file for writing, creating it if it does not exist, and
    /// truncating it if it does. Returns None if the file can't be written.
    fn create_file(&self, path: &str) -> Option<FileHandle>;

    /// Close a file opened with [`Pal::open_file`] or [`Pal::create_file`].
    /// Reads started on the file must have been polled to completion (or
    /// cancelled) before closing.
    fn close_file(&self, file: FileHandle);

    /// Returns the size of the file in bytes, or None if the size could not
    /// be queried.
    fn file_size(&self, file: FileHandle) -> Option<u64>;

    /// Write `bytes` into the file starting at `first_byte`. Returns the
    /// amount of bytes written, None on failure. Writing is only used by
    /// tools, so it's synchronous.
    fn write_file(&self, file: FileHandle, first_byte: u64, bytes: &[u8]) -> Option<usize>;

    /// Start an asynchronous read operation to fill `buffer` from the `file` at
    /// offset `first_byte`.
    ///
    /// ## Safety
    ///
    /// The returned [`FileReadTask`] must not be dropped, but instead be passed
    /// to [`Pal::poll_file_read`] or [`Pal::cancel_file_read`]. This rule
    /// ensures that the `buffer` passed into this function is not accessed
    /// while it's still being written to, as the buffer's mutable borrow would
    /// end after dropping the [`FileReadTask`], which is unsafe!
    #[must_use]
    fn begin_file_read<'a>(
        &self,
        file: FileHandle,
        first_byte: u64,
        buffer: &'a mut [u8],
    ) -> FileReadTask<'a>;

    /// Returns true if the read operation has finished, successfully or not,
    /// i.e. if [`Pal::poll_file_read`] would not return the task back.
    fn is_file_read_finished(&self, task: &FileReadTask) -> bool;

    /// Poll if a read has completed successfully, returning the buffer
    /// containing the data if it has. If not, but the read is still being
    /// processed, the task is returned back, to be polled again later. If the
    /// read fails, an `Err(None)` is returned.
    ///
    /// ## Safety
    ///
    /// The `Err(Some(task))` result from this function implies that the read is
    /// still processing. The returned [`FileReadTask`] must be dealt with
    /// according to the rules explained in [`Pal::begin_file_read`].
    fn poll_file_read<'a>(
        &self,
        task: FileReadTask<'a>,
    ) -> Result<&'a mut [u8], Option<FileReadTask<'a>>>;

    /// Cancel a read operation, returning the buffer once the platform is
    /// guaranteed to not write into it anymore. The cancel is best-effort: the
    /// contents of the buffer are unspecified, the read may have finished
    /// anyway.
    fn cancel_file_read<'a>(&self, task: FileReadTask<'a>) -> &'a mut [u8];

    /// Allocate the given amount of bytes (returning a null pointer on error).
    /// Not called often from the engine, memory is allocated in big chunks, so
    /// this can be slow and defensively implemented. The returned pointer must
    /// be aligned to at least 64 bytes.
    fn malloc(&self, size: usize) -> *mut c_void;

    /// Free the memory allocated by [`Pal::malloc`]. Not called often from the
    /// engine, memory is allocated in big chunks, so this can be slow and
    /// defensively implemented.
    ///
    /// ## Safety
    ///
    /// - `ptr` must have been returned by [`Pal::malloc`] of the same platform,
    ///   and `size` must be the size passed into that call.
    /// - Since the implementation is free to free the memory, the memory
    ///   pointed at by the given pointer shouldn't be accessed after calling
    ///   this.
    unsafe fn free(&self, ptr: *mut c_void, size: usize);
}

/// Polls the read until it finishes, i.e. the "wait until finished" variant of
/// [`Pal::poll_file_read`]. Returns None if the read failed.
pub fn blocking_read_file<'a>(platform: &dyn Pal, mut task: FileReadTask<'a>) -> Option<&'a mut [u8]> {
    loop {
        match platform.poll_file_read(task) {
            Ok(buffer) => return Some(buffer),
            Err(Some(still_pending)) => task = still_pending,
            Err(None) => return None,
        }
    }
}
