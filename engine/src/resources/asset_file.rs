// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::panic::Location;

use alloc::vec::Vec;
use platform_abstraction_layer::{blocking_read_file, FileHandle, Pal};

use crate::allocators::{ArenaBox, MemoryArena};

use super::{
    deserialize::{deserialize, Deserialize},
    LoadError,
};

/// The version written into new asset files, and the only one the loaders
/// accept.
pub const ASSET_FILE_VERSION: u32 = 1;

/// The size of [`FileHeader`] in the file.
pub const HEADER_SIZE: usize = <FileHeader as Deserialize>::SERIALIZED_SIZE;

/// The fixed-size header at the start of every packed asset file. The
/// meta-data region follows right after it, and the binary blob after the
/// meta-data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub type_tag: [u8; 4],
    pub version: u32,
    pub meta_data_size: u32,
    pub binary_blob_size: u32,
}

/// Reads the regions of a packed asset file from its raw bytes. The
/// meta-data must be loaded first: it's what validates the header.
#[derive(Debug)]
pub struct BinaryAssetFile<'a> {
    raw: &'a [u8],
    header: Option<FileHeader>,
}

impl<'a> BinaryAssetFile<'a> {
    pub fn new(raw: &'a [u8]) -> BinaryAssetFile<'a> {
        BinaryAssetFile { raw, header: None }
    }

    /// Returns the file's type tag, if the file is long enough to have one.
    pub fn peek_type_tag(raw: &[u8]) -> Option<[u8; 4]> {
        let tag = raw.get(0..4)?;
        Some([tag[0], tag[1], tag[2], tag[3]])
    }

    /// Reads and validates the header, returning the meta-data region,
    /// starting at `base + HEADER_SIZE`.
    pub fn load_meta_data(&mut self, expected_tag: &[u8; 4]) -> Result<&'a [u8], LoadError> {
        if self.raw.len() < HEADER_SIZE {
            return Err(LoadError::Truncated);
        }
        let header = deserialize::<FileHeader>(self.raw, &mut 0);
        if &header.type_tag != expected_tag {
            return Err(LoadError::WrongFileType {
                expected: *expected_tag,
                found: header.type_tag,
            });
        }
        if header.version != ASSET_FILE_VERSION {
            return Err(LoadError::UnsupportedVersion(header.version));
        }
        let meta_end = HEADER_SIZE + header.meta_data_size as usize;
        let blob_end = meta_end + header.binary_blob_size as usize;
        if self.raw.len() < blob_end {
            return Err(LoadError::Truncated);
        }
        self.header = Some(header);
        Ok(&self.raw[HEADER_SIZE..meta_end])
    }

    /// Returns the binary blob region, starting at `base + HEADER_SIZE +
    /// meta_data_size`.
    pub fn load_binary_data(&self) -> Result<&'a [u8], LoadError> {
        let Some(header) = self.header else {
            return Err(LoadError::Malformed(
                "binary data requested before the meta-data was loaded",
            ));
        };
        let start = HEADER_SIZE + header.meta_data_size as usize;
        let end = start + header.binary_blob_size as usize;
        Ok(&self.raw[start..end])
    }

    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }
}

/// Writes a complete packed asset file: the header, the meta-data and the
/// binary blob.
#[cfg(any(test, feature = "asset-conditioning"))]
pub fn write_asset_file(type_tag: [u8; 4], meta_data: &[u8], binary_blob: &[u8]) -> Vec<u8> {
    use super::serialize::serialize;
    let header = FileHeader {
        type_tag,
        version: ASSET_FILE_VERSION,
        meta_data_size: meta_data.len() as u32,
        binary_blob_size: binary_blob.len() as u32,
    };
    let mut file = alloc::vec![0; HEADER_SIZE];
    serialize(&header, &mut file, &mut 0);
    file.extend_from_slice(meta_data);
    file.extend_from_slice(binary_blob);
    file
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    #[error("the file is not open")]
    NotOpen,
    #[error("the file is opened read-only")]
    ReadOnly,
    #[error("the file is opened write-only")]
    WriteOnly,
    #[error("read or write out of the file's bounds")]
    OutOfBounds,
    #[error("the platform could not open, read or write the file")]
    Platform,
    #[error("could not allocate memory for the file's contents")]
    OutOfMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    fn readable(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    fn writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Where the bytes of a packed asset come from. `read` and `write` continue
/// from where the previous one ended, `read_at` doesn't move the position.
pub trait AssetFile {
    fn open_for_read(&mut self) -> Result<(), FileError>;
    /// Opens the file for writing, discarding its old contents.
    fn open_for_write(&mut self) -> Result<(), FileError>;
    fn open_for_read_write(&mut self) -> Result<(), FileError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn size(&self) -> Result<u64, FileError>;
    /// Reads into the whole buffer, or fails.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FileError>;
    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> Result<usize, FileError>;
    fn write(&mut self, bytes: &[u8]) -> Result<usize, FileError>;
}

/// Reads the whole file into a new allocation from the arena.
#[track_caller]
pub fn read_asset_file<'a>(
    file: &mut dyn AssetFile,
    arena: &'a dyn MemoryArena,
) -> Result<ArenaBox<'a, [u8]>, FileError> {
    profiling::function_scope!();
    let size = usize::try_from(file.size()?).map_err(|_| FileError::OutOfBounds)?;
    let ptr = arena
        .allocate_raw(size, 1, "asset file contents", Location::caller())
        .ok_or(FileError::OutOfMemory)?;
    // Safety: the allocation is `size` bytes. It's zeroed here so that the
    // slice is initialized even if the read fails.
    let mut contents = unsafe {
        ptr.write_bytes(0, size);
        ArenaBox::from_raw_parts(
            core::ptr::NonNull::slice_from_raw_parts(ptr, size),
            arena,
            Location::caller(),
        )
    };
    file.read_at(&mut contents, 0)?;
    Ok(contents)
}

fn check_write(mode: Option<OpenMode>) -> Result<(), FileError> {
    match mode {
        None => Err(FileError::NotOpen),
        Some(mode) if !mode.writable() => {
            tracing::error!("tried to write into a file opened read-only");
            Err(FileError::ReadOnly)
        }
        Some(_) => Ok(()),
    }
}

fn check_read(mode: Option<OpenMode>) -> Result<(), FileError> {
    match mode {
        None => Err(FileError::NotOpen),
        Some(mode) if !mode.readable() => Err(FileError::WriteOnly),
        Some(_) => Ok(()),
    }
}

/// An asset file in memory, e.g. a file that's already been read, or one that
/// is being packed.
#[derive(Debug, Default)]
pub struct MemoryAssetFile {
    bytes: Vec<u8>,
    mode: Option<OpenMode>,
    position: usize,
}

impl MemoryAssetFile {
    pub fn new(bytes: Vec<u8>) -> MemoryAssetFile {
        MemoryAssetFile {
            bytes,
            mode: None,
            position: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn open(&mut self, mode: OpenMode) -> Result<(), FileError> {
        self.mode = Some(mode);
        self.position = 0;
        Ok(())
    }
}

impl AssetFile for MemoryAssetFile {
    fn open_for_read(&mut self) -> Result<(), FileError> {
        self.open(OpenMode::Read)
    }

    fn open_for_write(&mut self) -> Result<(), FileError> {
        self.bytes.clear();
        self.open(OpenMode::Write)
    }

    fn open_for_read_write(&mut self) -> Result<(), FileError> {
        self.open(OpenMode::ReadWrite)
    }

    fn close(&mut self) {
        self.mode = None;
    }

    fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    fn size(&self) -> Result<u64, FileError> {
        if self.mode.is_none() {
            return Err(FileError::NotOpen);
        }
        Ok(self.bytes.len() as u64)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FileError> {
        let read = self.read_at(buffer, self.position as u64)?;
        self.position += read;
        Ok(read)
    }

    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> Result<usize, FileError> {
        check_read(self.mode)?;
        let start = usize::try_from(offset).map_err(|_| FileError::OutOfBounds)?;
        let src = start
            .checked_add(buffer.len())
            .and_then(|end| self.bytes.get(start..end))
            .ok_or(FileError::OutOfBounds)?;
        buffer.copy_from_slice(src);
        Ok(buffer.len())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, FileError> {
        check_write(self.mode)?;
        let end = self.position + bytes.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(bytes.len())
    }
}

/// An asset file read and written through the platform's file API.
pub struct DiskFile<'p> {
    platform: &'p dyn Pal,
    path: &'p str,
    file: Option<FileHandle>,
    mode: Option<OpenMode>,
    position: u64,
}

impl<'p> DiskFile<'p> {
    pub fn new(platform: &'p dyn Pal, path: &'p str) -> DiskFile<'p> {
        DiskFile {
            platform,
            path,
            file: None,
            mode: None,
            position: 0,
        }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    fn open(&mut self, mode: OpenMode) -> Result<(), FileError> {
        self.close();
        let file = match mode {
            OpenMode::Write => self.platform.create_file(self.path),
            OpenMode::Read | OpenMode::ReadWrite => self.platform.open_file(self.path),
        };
        let Some(file) = file else {
            tracing::debug!("could not open {:?} ({mode:?})", self.path);
            return Err(FileError::Platform);
        };
        self.file = Some(file);
        self.mode = Some(mode);
        self.position = 0;
        Ok(())
    }
}

impl AssetFile for DiskFile<'_> {
    fn open_for_read(&mut self) -> Result<(), FileError> {
        self.open(OpenMode::Read)
    }

    fn open_for_write(&mut self) -> Result<(), FileError> {
        self.open(OpenMode::Write)
    }

    fn open_for_read_write(&mut self) -> Result<(), FileError> {
        self.open(OpenMode::ReadWrite)
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            self.platform.close_file(file);
        }
        self.mode = None;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn size(&self) -> Result<u64, FileError> {
        let file = self.file.ok_or(FileError::NotOpen)?;
        self.platform.file_size(file).ok_or(FileError::Platform)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FileError> {
        let read = self.read_at(buffer, self.position)?;
        self.position += read as u64;
        Ok(read)
    }

    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> Result<usize, FileError> {
        check_read(self.mode)?;
        let file = self.file.ok_or(FileError::NotOpen)?;
        if offset + buffer.len() as u64 > self.size()? {
            return Err(FileError::OutOfBounds);
        }
        let len = buffer.len();
        let task = self.platform.begin_file_read(file, offset, buffer);
        match blocking_read_file(self.platform, task) {
            Some(_) => Ok(len),
            None => Err(FileError::Platform),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, FileError> {
        check_write(self.mode)?;
        let file = self.file.ok_or(FileError::NotOpen)?;
        let written = self
            .platform
            .write_file(file, self.position, bytes)
            .ok_or(FileError::Platform)?;
        self.position += written as u64;
        Ok(written)
    }
}

impl Drop for DiskFile<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use crate::{
        allocators::{
            Arena, FreeListAllocator, MemoryArea, MemoryArena, NoBoundsChecking, NoMemoryTracking,
        },
        resources::LoadError,
        test_platform::TestPlatform,
    };

    use super::{
        read_asset_file, write_asset_file, AssetFile, BinaryAssetFile, DiskFile, FileError,
        MemoryAssetFile, HEADER_SIZE,
    };

    #[test]
    fn regions_follow_the_header() {
        let raw = write_asset_file(*b"rtex", &[1, 2, 3], &[4, 5]);
        assert_eq!(HEADER_SIZE + 5, raw.len());
        let mut file = BinaryAssetFile::new(&raw);
        assert!(file.load_binary_data().is_err());
        assert_eq!(Ok(&[1, 2, 3][..]), file.load_meta_data(b"rtex"));
        assert_eq!(Ok(&[4, 5][..]), file.load_binary_data());
    }

    #[test]
    fn bad_headers_are_rejected() {
        let raw = write_asset_file(*b"rtex", &[1, 2, 3], &[4, 5]);
        assert_eq!(
            Err(LoadError::WrongFileType {
                expected: *b"ranm",
                found: *b"rtex"
            }),
            BinaryAssetFile::new(&raw).load_meta_data(b"ranm"),
        );
        assert_eq!(
            Err(LoadError::Truncated),
            BinaryAssetFile::new(&raw[..raw.len() - 1]).load_meta_data(b"rtex"),
        );
        let mut future = raw.clone();
        future[4] = 2;
        assert_eq!(
            Err(LoadError::UnsupportedVersion(2)),
            BinaryAssetFile::new(&future).load_meta_data(b"rtex"),
        );
    }

    #[test]
    fn memory_file_reads_and_writes() {
        let mut file = MemoryAssetFile::default();
        assert_eq!(Err(FileError::NotOpen), file.write(&[1]));
        file.open_for_write().unwrap();
        assert_eq!(Ok(3), file.write(&[1, 2, 3]));
        assert_eq!(Err(FileError::WriteOnly), file.read(&mut [0; 1]));
        file.close();

        file.open_for_read().unwrap();
        assert_eq!(Err(FileError::ReadOnly), file.write(&[4]));
        let mut buffer = [0; 2];
        assert_eq!(Ok(2), file.read(&mut buffer));
        assert_eq!([1, 2], buffer);
        assert_eq!(Err(FileError::OutOfBounds), file.read(&mut buffer));
        assert_eq!(Ok(1), file.read_at(&mut buffer[..1], 2));
        assert_eq!(3, buffer[0]);
    }

    #[test]
    fn disk_file_round_trip() {
        let platform = TestPlatform::new();
        let mut file = DiskFile::new(&platform, "assets/hello.rtex");
        assert_eq!(Err(FileError::Platform), file.open_for_read());

        file.open_for_write().unwrap();
        file.write(&[1, 2, 3, 4]).unwrap();
        file.write(&[5]).unwrap();
        file.close();
        assert_eq!(Some(vec![1, 2, 3, 4, 5]), platform.file_contents("assets/hello.rtex"));

        file.open_for_read().unwrap();
        assert_eq!(Ok(5), file.size());
        let mut buffer = [0; 2];
        file.read_at(&mut buffer, 3).unwrap();
        assert_eq!([4, 5], buffer);
        assert_eq!(Err(FileError::OutOfBounds), file.read_at(&mut buffer, 4));
        assert_eq!(Err(FileError::ReadOnly), file.write(&[0]));

        let area = MemoryArea::new(&platform, 1024).unwrap();
        let arena: Arena<FreeListAllocator, NoBoundsChecking, NoMemoryTracking> =
            Arena::new(FreeListAllocator::new(area.add_sub_area(1024).unwrap()).unwrap());
        {
            let contents = read_asset_file(&mut file, &arena).unwrap();
            assert_eq!(&[1, 2, 3, 4, 5], &contents[..]);
        }
        assert_eq!(0, arena.num_allocations());
    }
}
