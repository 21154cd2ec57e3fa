//! In-memory filesystem backing the VFS root.
//!
//! Every byte lives in a `Vec<u8>` inside an inode table indexed by inode
//! number; directories hold child name→inode pairs. Nothing here survives a
//! reboot — that's the point, filesystem persistence is explicitly out of
//! scope for this kernel.

use crate::fs::file::{DirEntry, FileType};
use crate::fs::vfs::FsError;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

const ROOT_INODE: u32 = 0;

enum NodeKind {
    File(Vec<u8>),
    Directory(Vec<(String, u32)>),
}

struct Node {
    kind: NodeKind,
}

pub struct TmpFs {
    nodes: Vec<Option<Node>>,
}

impl TmpFs {
    pub fn new() -> Self {
        TmpFs {
            nodes: alloc::vec![Some(Node { kind: NodeKind::Directory(Vec::new()) })],
        }
    }

    fn dir_children(&self, inode: u32) -> Result<&Vec<(String, u32)>, FsError> {
        match self.nodes.get(inode as usize).and_then(|n| n.as_ref()) {
            Some(Node { kind: NodeKind::Directory(children) }) => Ok(children),
            Some(_) => Err(FsError::NotADirectory),
            None => Err(FsError::NotFound),
        }
    }

    fn dir_children_mut(&mut self, inode: u32) -> Result<&mut Vec<(String, u32)>, FsError> {
        match self.nodes.get_mut(inode as usize).and_then(|n| n.as_mut()) {
            Some(Node { kind: NodeKind::Directory(children) }) => Ok(children),
            Some(_) => Err(FsError::NotADirectory),
            None => Err(FsError::NotFound),
        }
    }

    /// Resolve `/a/b/c` to its inode, starting at the root.
    pub fn resolve(&self, path: &str) -> Result<(u32, FileType, u32), FsError> {
        let mut current = ROOT_INODE;
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok((ROOT_INODE, FileType::Directory, 0));
        }
        for component in trimmed.split('/') {
            let children = self.dir_children(current)?;
            let (_, child) = children
                .iter()
                .find(|(name, _)| name == component)
                .ok_or(FsError::NotFound)?;
            current = *child;
        }
        let (file_type, size) = self.stat_inode(current)?;
        Ok((current, file_type, size))
    }

    fn stat_inode(&self, inode: u32) -> Result<(FileType, u32), FsError> {
        match self.nodes.get(inode as usize).and_then(|n| n.as_ref()) {
            Some(Node { kind: NodeKind::File(data) }) => Ok((FileType::Regular, data.len() as u32)),
            Some(Node { kind: NodeKind::Directory(_) }) => Ok((FileType::Directory, 0)),
            None => Err(FsError::NotFound),
        }
    }

    pub fn create(&mut self, parent: u32, name: &str, file_type: FileType) -> Result<u32, FsError> {
        if self.dir_children(parent)?.iter().any(|(n, _)| n == name) {
            return Err(FsError::AlreadyExists);
        }
        let node = Node {
            kind: match file_type {
                FileType::Regular => NodeKind::File(Vec::new()),
                FileType::Directory => NodeKind::Directory(Vec::new()),
            },
        };
        self.nodes.push(Some(node));
        let inode = (self.nodes.len() - 1) as u32;
        self.dir_children_mut(parent)?.push((name.to_string(), inode));
        Ok(inode)
    }

    pub fn delete(&mut self, parent: u32, name: &str) -> Result<(), FsError> {
        let children = self.dir_children_mut(parent)?;
        let pos = children
            .iter()
            .position(|(n, _)| n == name)
            .ok_or(FsError::NotFound)?;
        let (_, inode) = children.remove(pos);
        if let Some(Node { kind: NodeKind::Directory(c) }) =
            self.nodes.get(inode as usize).and_then(|n| n.as_ref())
        {
            if !c.is_empty() {
                // Put the entry back; the directory isn't actually empty.
                self.dir_children_mut(parent)?.push((name.to_string(), inode));
                return Err(FsError::NoSpace);
            }
        }
        self.nodes[inode as usize] = None;
        Ok(())
    }

    pub fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let data = match self.nodes.get(inode as usize).and_then(|n| n.as_ref()) {
            Some(Node { kind: NodeKind::File(data) }) => data,
            Some(_) => return Err(FsError::IsADirectory),
            None => return Err(FsError::NotFound),
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    pub fn write(&mut self, inode: u32, offset: u32, buf: &[u8]) -> Result<usize, FsError> {
        let data = match self.nodes.get_mut(inode as usize).and_then(|n| n.as_mut()) {
            Some(Node { kind: NodeKind::File(data) }) => data,
            Some(_) => return Err(FsError::IsADirectory),
            None => return Err(FsError::NotFound),
        };
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    pub fn truncate(&mut self, inode: u32, len: u32) -> Result<(), FsError> {
        match self.nodes.get_mut(inode as usize).and_then(|n| n.as_mut()) {
            Some(Node { kind: NodeKind::File(data) }) => {
                data.resize(len as usize, 0);
                Ok(())
            }
            Some(_) => Err(FsError::IsADirectory),
            None => Err(FsError::NotFound),
        }
    }

    pub fn readdir(&self, inode: u32) -> Result<Vec<DirEntry>, FsError> {
        let children = self.dir_children(inode)?;
        let mut out = Vec::with_capacity(children.len());
        for (name, child) in children {
            let (file_type, size) = self.stat_inode(*child)?;
            out.push(DirEntry { name: name.clone(), file_type, size });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read_round_trips() {
        let mut fs = TmpFs::new();
        let inode = fs.create(ROOT_INODE, "hello.txt", FileType::Regular).unwrap();
        fs.write(inode, 0, b"hi").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(fs.read(inode, 0, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn delete_nonempty_directory_fails() {
        let mut fs = TmpFs::new();
        let dir = fs.create(ROOT_INODE, "d", FileType::Directory).unwrap();
        fs.create(dir, "f", FileType::Regular).unwrap();
        assert!(fs.delete(ROOT_INODE, "d").is_err());
    }

    #[test]
    fn resolve_nested_path() {
        let mut fs = TmpFs::new();
        let dir = fs.create(ROOT_INODE, "d", FileType::Directory).unwrap();
        fs.create(dir, "f", FileType::Regular).unwrap();
        let (_, file_type, _) = fs.resolve("/d/f").unwrap();
        assert_eq!(file_type, FileType::Regular);
    }
}
