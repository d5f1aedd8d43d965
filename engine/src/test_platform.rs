// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::RefCell, ffi::c_void};

use alloc::{string::String, vec::Vec};
use platform_abstraction_layer::{FileHandle, FileReadTask, Pal};

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct VeryAlignedThing([u8; 64]);
const VERY_ALIGNED_THING: VeryAlignedThing = VeryAlignedThing([0; 64]);

/// A platform for tests: memory comes from leaked Vecs, and files are
/// byte vectors kept in memory. File reads finish immediately.
#[derive(Default)]
pub struct TestPlatform {
    files: RefCell<Vec<(String, Vec<u8>)>>,
}

impl TestPlatform {
    pub fn new() -> TestPlatform {
        TestPlatform::default()
    }

    /// Adds (or replaces) a file, readable with [`Pal::open_file`].
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let mut files = self.files.borrow_mut();
        if let Some((_, existing)) = files.iter_mut().find(|(name, _)| name == path) {
            *existing = contents.to_vec();
        } else {
            files.push((String::from(path), contents.to_vec()));
        }
    }

    /// Returns the contents of a file, e.g. one written with
    /// [`Pal::write_file`].
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.files.borrow();
        files
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, contents)| contents.clone())
    }

    fn free_impl(&self, ptr: *mut c_void, size: usize) {
        let vec_ptr = ptr as *mut VeryAlignedThing;
        let count = size.div_ceil(size_of::<VeryAlignedThing>());
        // Safety: ptr was allocated by a Vec<VeryAlignedThing> of length and
        // capacity `count` in malloc, so the requirements of
        // Vec::from_raw_parts are upheld.
        let byte_vec: Vec<VeryAlignedThing> = unsafe { Vec::from_raw_parts(vec_ptr, count, count) };
        drop(byte_vec);
    }
}

impl Pal for TestPlatform {
    fn open_file(&self, path: &str) -> Option<FileHandle> {
        let files = self.files.borrow();
        let index = files.iter().position(|(name, _)| name == path)?;
        Some(FileHandle::new(index as u64))
    }

    fn create_file(&self, path: &str) -> Option<FileHandle> {
        self.add_file(path, &[]);
        self.open_file(path)
    }

    fn close_file(&self, _file: FileHandle) {}

    fn file_size(&self, file: FileHandle) -> Option<u64> {
        let files = self.files.borrow();
        let (_, contents) = files.get(file.inner() as usize)?;
        Some(contents.len() as u64)
    }

    fn write_file(&self, file: FileHandle, first_byte: u64, bytes: &[u8]) -> Option<usize> {
        let mut files = self.files.borrow_mut();
        let (_, contents) = files.get_mut(file.inner() as usize)?;
        let start = first_byte as usize;
        let end = start + bytes.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(bytes);
        Some(bytes.len())
    }

    fn begin_file_read<'a>(
        &self,
        file: FileHandle,
        first_byte: u64,
        buffer: &'a mut [u8],
    ) -> FileReadTask<'a> {
        // Reads happen right away, a failed read is signaled by task id 0.
        let files = self.files.borrow();
        let start = first_byte as usize;
        let succeeded = match files.get(file.inner() as usize) {
            Some((_, contents)) if start + buffer.len() <= contents.len() => {
                buffer.copy_from_slice(&contents[start..start + buffer.len()]);
                true
            }
            _ => false,
        };
        FileReadTask::new(file, succeeded as u64, buffer)
    }

    fn is_file_read_finished(&self, _task: &FileReadTask) -> bool {
        true
    }

    fn poll_file_read<'a>(
        &self,
        task: FileReadTask<'a>,
    ) -> Result<&'a mut [u8], Option<FileReadTask<'a>>> {
        let succeeded = task.task_id() == 1;
        // Safety: the read was done synchronously in begin_file_read.
        let buffer = unsafe { task.into_inner() };
        if succeeded {
            Ok(buffer)
        } else {
            Err(None)
        }
    }

    fn cancel_file_read<'a>(&self, task: FileReadTask<'a>) -> &'a mut [u8] {
        // Safety: the read was done synchronously in begin_file_read.
        unsafe { task.into_inner() }
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        let count = size.div_ceil(size_of::<VeryAlignedThing>());
        let byte_vec: Vec<VeryAlignedThing> = alloc::vec![VERY_ALIGNED_THING; count];
        let vec_ptr: *mut VeryAlignedThing = byte_vec.leak().as_mut_ptr();
        vec_ptr as *mut c_void
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize) {
        self.free_impl(ptr, size);
    }
}
