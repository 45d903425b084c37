//! Inode to object-key mapping.
//!
//! FUSE identifies files by `u64` inodes while the bucket identifies them by
//! key, so the table keeps a bidirectional mapping. Directory keys carry
//! their trailing `/`; the root is the empty key at inode 1.

use std::collections::HashMap;

pub const ROOT_INODE: u64 = 1;

pub struct InodeTable {
    key_to_inode: HashMap<String, u64>,
    inode_to_key: HashMap<u64, String>,
    next_inode: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            key_to_inode: HashMap::new(),
            inode_to_key: HashMap::new(),
            next_inode: 2,
        };
        table.key_to_inode.insert(String::new(), ROOT_INODE);
        table.inode_to_key.insert(ROOT_INODE, String::new());
        table
    }

    /// Get the inode for a key, allocating one if needed.
    pub fn get_or_create(&mut self, key: &str) -> u64 {
        if let Some(&ino) = self.key_to_inode.get(key) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.key_to_inode.insert(key.to_string(), ino);
        self.inode_to_key.insert(ino, key.to_string());
        ino
    }

    pub fn get_inode(&self, key: &str) -> Option<u64> {
        self.key_to_inode.get(key).copied()
    }

    pub fn get_key(&self, inode: u64) -> Option<&str> {
        self.inode_to_key.get(&inode).map(String::as_str)
    }

    /// Drop the mapping for a deleted object.
    pub fn remove(&mut self, inode: u64) {
        if let Some(key) = self.inode_to_key.remove(&inode) {
            self.key_to_inode.remove(&key);
        }
    }

    /// Re-point an inode after a rename.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(ino) = self.key_to_inode.remove(from) {
            self.key_to_inode.insert(to.to_string(), ino);
            self.inode_to_key.insert(ino, to.to_string());
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_inode_one() {
        let table = InodeTable::new();
        assert_eq!(table.get_inode(""), Some(ROOT_INODE));
        assert_eq!(table.get_key(ROOT_INODE), Some(""));
    }

    #[test]
    fn allocation_is_stable() {
        let mut table = InodeTable::new();
        let a = table.get_or_create("docs/readme.txt");
        let b = table.get_or_create("docs/readme.txt");
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INODE);
        assert_eq!(table.get_key(a), Some("docs/readme.txt"));
    }

    #[test]
    fn remove_clears_both_directions() {
        let mut table = InodeTable::new();
        let ino = table.get_or_create("gone.txt");
        table.remove(ino);
        assert_eq!(table.get_inode("gone.txt"), None);
        assert_eq!(table.get_key(ino), None);
    }

    #[test]
    fn rename_keeps_the_inode() {
        let mut table = InodeTable::new();
        let ino = table.get_or_create("old.txt");
        table.rename("old.txt", "new.txt");
        assert_eq!(table.get_inode("new.txt"), Some(ino));
        assert_eq!(table.get_inode("old.txt"), None);
        assert_eq!(table.get_key(ino), Some("new.txt"));
    }
}
