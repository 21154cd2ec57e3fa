//! Virtual File System -- capability-interface facade over mounted filesystems.
//!
//! Mount points are a flat table mapping a path prefix to a backing
//! filesystem instance; routing a path picks the longest matching prefix and
//! delegates there. The only backing filesystem today is the in-memory
//! [`crate::fs::tmpfs::TmpFs`] mounted at `/`, but the table shape lets
//! another filesystem mount alongside it without touching callers.

use crate::fs::file::{DirEntry, FileDescriptor, FileFlags, FileType, OpenFile, SeekFrom};
use crate::fs::tmpfs::TmpFs;
use crate::sync::mutex::Mutex;
use alloc::string::String;
use alloc::vec::Vec;

const MAX_OPEN_FILES: usize = 256;

static VFS: Mutex<Option<VfsState>> = Mutex::new(None);

struct VfsState {
    open_files: Vec<Option<OpenFile>>,
    next_fd: FileDescriptor,
    mounts: Vec<MountPoint>,
}

struct MountPoint {
    prefix: String,
    fs: TmpFs,
}

/// Filesystem operation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    NoSpace,
    IoError,
    InvalidPath,
    TooManyOpenFiles,
    BadFd,
}

/// Split a path into (parent_dir, filename). "/a/b" -> ("/a", "b"); "/a" -> ("/", "a").
fn split_parent_name(path: &str) -> Result<(&str, &str), FsError> {
    let path = path.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        return Err(FsError::InvalidPath);
    }
    match path.rfind('/') {
        Some(0) => Ok(("/", &path[1..])),
        Some(pos) => Ok((&path[..pos], &path[pos + 1..])),
        None => Err(FsError::InvalidPath),
    }
}

/// Pick the mount whose prefix is the longest match for `path`.
fn find_mount<'a>(mounts: &'a mut [MountPoint], path: &str) -> Option<(&'a mut TmpFs, String)> {
    let mut best: Option<usize> = None;
    for (i, mp) in mounts.iter().enumerate() {
        if path == mp.prefix || path.starts_with(mp.prefix.as_str()) {
            if best.map_or(true, |b: usize| mounts[b].prefix.len() < mp.prefix.len()) {
                best = Some(i);
            }
        }
    }
    let idx = best?;
    let prefix_len = mounts[idx].prefix.len();
    let relative = if mounts[idx].prefix == "/" {
        String::from(path)
    } else {
        String::from(&path[prefix_len..])
    };
    let relative = if relative.is_empty() { String::from("/") } else { relative };
    Some((&mut mounts[idx].fs, relative))
}

/// Initialize the VFS and mount an empty tmpfs at `/`. Reserves fds 0-2.
pub fn init() {
    let mut vfs = VFS.lock();
    let mut state = VfsState {
        open_files: Vec::new(),
        next_fd: 3, // 0=stdin, 1=stdout, 2=stderr
        mounts: Vec::new(),
    };
    for _ in 0..3 {
        state.open_files.push(None);
    }
    state.mounts.push(MountPoint { prefix: String::from("/"), fs: TmpFs::new() });
    *vfs = Some(state);

    crate::serial_println!("[OK] VFS initialized (tmpfs mounted at /)");
}

/// Mount a fresh in-memory filesystem at `prefix`.
pub fn mount(prefix: &str) -> Result<(), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    if state.mounts.iter().any(|mp| mp.prefix == prefix) {
        return Err(FsError::AlreadyExists);
    }
    state.mounts.push(MountPoint { prefix: String::from(prefix), fs: TmpFs::new() });
    Ok(())
}

/// Unmount the filesystem at `prefix`. The root mount can't be removed.
pub fn unmount(prefix: &str) -> Result<(), FsError> {
    if prefix == "/" {
        return Err(FsError::PermissionDenied);
    }
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let pos = state.mounts.iter().position(|mp| mp.prefix == prefix).ok_or(FsError::NotFound)?;
    state.mounts.remove(pos);
    Ok(())
}

/// Open a file by path with the given flags, creating it if `flags.create`
/// is set and it doesn't exist. Returns a file descriptor on success.
pub fn open(path: &str, flags: FileFlags) -> Result<FileDescriptor, FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;

    let active_count = state.open_files.iter().filter(|e| e.is_some()).count();
    if active_count >= MAX_OPEN_FILES {
        return Err(FsError::TooManyOpenFiles);
    }

    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;

    let (inode, file_type, size) = match fs.resolve(&relative) {
        Ok(found) => {
            if flags.truncate && flags.write {
                fs.truncate(found.0, 0)?;
                (found.0, found.1, 0)
            } else {
                found
            }
        }
        Err(FsError::NotFound) if flags.create => {
            let (parent_path, filename) = split_parent_name(&relative)?;
            let (parent_inode, parent_type, _) = fs.resolve(parent_path)?;
            if parent_type != FileType::Directory {
                return Err(FsError::NotADirectory);
            }
            let inode = fs.create(parent_inode, filename, FileType::Regular)?;
            (inode, FileType::Regular, 0)
        }
        Err(e) => return Err(e),
    };

    let fd = state.next_fd;
    state.next_fd += 1;
    let position = if flags.append { size } else { 0 };

    let file = OpenFile { fd, path: String::from(path), file_type, flags, position, inode };
    if let Some(slot) = state.open_files.iter_mut().find(|e| e.is_none()) {
        *slot = Some(file);
    } else {
        state.open_files.push(Some(file));
    }
    Ok(fd)
}

/// Close an open file descriptor, releasing its slot in the open file table.
pub fn close(fd: FileDescriptor) -> Result<(), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;

    for entry in state.open_files.iter_mut() {
        if let Some(file) = entry {
            if file.fd == fd {
                *entry = None;
                return Ok(());
            }
        }
    }
    Err(FsError::BadFd)
}

/// Read bytes from an open file into `buf`. Returns the number of bytes read (0 at EOF).
pub fn read(fd: FileDescriptor, buf: &mut [u8]) -> Result<usize, FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;

    let file = state.open_files.iter().flatten().find(|f| f.fd == fd).ok_or(FsError::BadFd)?;
    if !file.flags.read {
        return Err(FsError::PermissionDenied);
    }
    let path = file.path.clone();
    let inode = file.inode;
    let position = file.position;

    let (fs, _) = find_mount(&mut state.mounts, &path).ok_or(FsError::IoError)?;
    let n = fs.read(inode, position, buf)?;

    let file = state.open_files.iter_mut().flatten().find(|f| f.fd == fd).ok_or(FsError::BadFd)?;
    file.position += n as u32;
    Ok(n)
}

/// Write bytes from `buf` to an open file. Returns the number of bytes written.
pub fn write(fd: FileDescriptor, buf: &[u8]) -> Result<usize, FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;

    let file = state.open_files.iter().flatten().find(|f| f.fd == fd).ok_or(FsError::BadFd)?;
    if !file.flags.write {
        return Err(FsError::PermissionDenied);
    }
    let path = file.path.clone();
    let inode = file.inode;
    let position = if file.flags.append { u32::MAX } else { file.position };

    let (fs, _) = find_mount(&mut state.mounts, &path).ok_or(FsError::IoError)?;
    let offset = if position == u32::MAX {
        fs.resolve(&path).map(|(_, _, size)| size).unwrap_or(0)
    } else {
        position
    };
    let n = fs.write(inode, offset, buf)?;

    let file = state.open_files.iter_mut().flatten().find(|f| f.fd == fd).ok_or(FsError::BadFd)?;
    file.position = offset + n as u32;
    Ok(n)
}

/// Seek within an open file to `offset` relative to `whence`. Returns the new position.
pub fn seek(fd: FileDescriptor, whence: SeekFrom) -> Result<u32, FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let file = state.open_files.iter().flatten().find(|f| f.fd == fd).ok_or(FsError::BadFd)?;
    let path = file.path.clone();
    let position = file.position;

    let size = {
        let (fs, _) = find_mount(&mut state.mounts, &path).ok_or(FsError::IoError)?;
        fs.resolve(&path).map(|(_, _, size)| size).unwrap_or(0)
    };

    let new_pos = match whence {
        SeekFrom::Start(offset) => offset,
        SeekFrom::Current(offset) => {
            if offset < 0 {
                position.checked_sub((-offset) as u32).ok_or(FsError::InvalidPath)?
            } else {
                position + offset as u32
            }
        }
        SeekFrom::End(offset) => {
            if offset < 0 {
                size.checked_sub((-offset) as u32).ok_or(FsError::InvalidPath)?
            } else {
                size + offset as u32
            }
        }
    };

    let file = state.open_files.iter_mut().flatten().find(|f| f.fd == fd).ok_or(FsError::BadFd)?;
    file.position = new_pos;
    Ok(new_pos)
}

/// Truncate the file at `path` to `len` bytes.
pub fn truncate(path: &str, len: u32) -> Result<(), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;
    let (inode, file_type, _) = fs.resolve(&relative)?;
    if file_type != FileType::Regular {
        return Err(FsError::IsADirectory);
    }
    fs.truncate(inode, len)
}

/// Get file info by path. Returns `(file_type, size)`.
pub fn stat(path: &str) -> Result<(FileType, u32), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;
    let (_, file_type, size) = fs.resolve(&relative)?;
    Ok((file_type, size))
}

/// Create a directory at `path`.
pub fn mkdir(path: &str) -> Result<(), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;
    let (parent_path, dirname) = split_parent_name(&relative)?;
    let (parent_inode, parent_type, _) = fs.resolve(parent_path)?;
    if parent_type != FileType::Directory {
        return Err(FsError::NotADirectory);
    }
    fs.create(parent_inode, dirname, FileType::Directory)?;
    Ok(())
}

/// Delete a file or empty directory at `path`.
pub fn unlink(path: &str) -> Result<(), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;
    let (parent_path, name) = split_parent_name(&relative)?;
    let (parent_inode, _, _) = fs.resolve(parent_path)?;
    fs.delete(parent_inode, name)
}

/// Rename/move `from` to `to`. Both must resolve within the same mount.
pub fn rename(from: &str, to: &str) -> Result<(), FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;

    let (fs, from_relative) = find_mount(&mut state.mounts, from).ok_or(FsError::NotFound)?;
    let (_, to_relative) = find_mount(&mut state.mounts, to).ok_or(FsError::NotFound)?;

    let (from_parent_path, from_name) = split_parent_name(&from_relative)?;
    let (to_parent_path, to_name) = split_parent_name(&to_relative)?;

    let (from_parent_inode, _, _) = fs.resolve(from_parent_path)?;
    let (to_parent_inode, to_parent_type, _) = fs.resolve(to_parent_path)?;
    if to_parent_type != FileType::Directory {
        return Err(FsError::NotADirectory);
    }

    let (inode, file_type, size) = fs.resolve(&from_relative)?;
    let new_inode = fs.create(to_parent_inode, to_name, file_type)?;
    if file_type == FileType::Regular {
        let mut buf = alloc::vec![0u8; size as usize];
        fs.read(inode, 0, &mut buf)?;
        fs.write(new_inode, 0, &buf)?;
    }
    fs.delete(from_parent_inode, from_name)?;
    Ok(())
}

/// List entries in the directory at `path`.
pub fn listdir(path: &str) -> Result<Vec<DirEntry>, FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;
    let (inode, file_type, _) = fs.resolve(&relative)?;
    if file_type != FileType::Directory {
        return Err(FsError::NotADirectory);
    }
    fs.readdir(inode)
}

/// Read an entire file into a freshly-allocated `Vec<u8>`.
pub fn read_file_to_vec(path: &str) -> Result<Vec<u8>, FsError> {
    let mut vfs = VFS.lock();
    let state = vfs.as_mut().ok_or(FsError::IoError)?;
    let (fs, relative) = find_mount(&mut state.mounts, path).ok_or(FsError::NotFound)?;
    let (inode, file_type, size) = fs.resolve(&relative)?;
    if file_type != FileType::Regular {
        return Err(FsError::IsADirectory);
    }
    let mut buf = alloc::vec![0u8; size as usize];
    fs.read(inode, 0, &mut buf)?;
    Ok(buf)
}

/// List all current mount point prefixes.
pub fn list_mounts() -> Vec<String> {
    let vfs = VFS.lock();
    if let Some(ref state) = *vfs {
        state.mounts.iter().map(|mp| mp.prefix.clone()).collect()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_create_write_read_close() {
        init();
        let fd = open("/hello.txt", FileFlags::CREATE_WRITE).unwrap();
        write(fd, b"hi").unwrap();
        close(fd).unwrap();

        let fd = open("/hello.txt", FileFlags::READ_ONLY).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(read(fd, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
        close(fd).unwrap();
    }

    #[test]
    fn mkdir_and_listdir() {
        init();
        mkdir("/sub").unwrap();
        let fd = open("/sub/a.txt", FileFlags::CREATE_WRITE).unwrap();
        close(fd).unwrap();
        let entries = listdir("/sub").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[test]
    fn unlink_missing_file_fails() {
        init();
        assert!(unlink("/nope.txt").is_err());
    }
}
