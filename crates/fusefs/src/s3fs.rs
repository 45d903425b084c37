//! FUSE filesystem over the primary binding of a logical bucket.
//!
//! Maps FUSE callbacks onto object-storage calls. Keys ending in `/` and
//! prefixes with children are directories; everything else is a file. Writes
//! accumulate in per-handle buffers and upload whole objects on flush,
//! because whole-object encryption leaves no room for partial updates.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle;

use common::crypto::Pipeline;
use common::store::{BackendClient, PutOpts};
use common::Binding;

use crate::attr_cache::{AttrCache, CachedAttr, DEFAULT_TTL};
use crate::errno::errno_for;
use crate::inode_table::{InodeTable, ROOT_INODE};

/// TTL handed back to the kernel with attributes and entries.
const REPLY_TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 512;

/// Buffer accumulating writes on one open handle until flush.
///
/// While `dirty` is set, reads on the same handle answer from here instead
/// of the backend.
pub(crate) struct WriteBuffer {
    key: String,
    data: Vec<u8>,
    dirty: bool,
}

impl WriteBuffer {
    fn new(key: String, dirty: bool) -> Self {
        Self {
            key,
            data: Vec::new(),
            dirty,
        }
    }

    /// Append-only write discipline: append at the end, zero-pad sparse
    /// extensions, refuse rewinds.
    ///
    /// In-place updates would need a download-decrypt-modify-upload cycle
    /// the adapter deliberately does not do, so `offset < len` is `ESPIPE`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<u32, libc::c_int> {
        let len = self.data.len() as u64;
        if offset < len {
            return Err(libc::ESPIPE);
        }
        if offset > len {
            self.data.resize(offset as usize, 0);
        }
        self.data.extend_from_slice(data);
        self.dirty = true;
        Ok(data.len() as u32)
    }

    fn read_at(&self, offset: u64, size: u32) -> Vec<u8> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Vec::new();
        }
        let end = (offset + size as u64).min(len) as usize;
        self.data[offset as usize..end].to_vec()
    }
}

/// The mounted filesystem.
pub struct S3Fs {
    rt: Handle,
    client: Arc<BackendClient>,
    bucket: String,
    pipeline: Option<Arc<Pipeline>>,
    inodes: RwLock<InodeTable>,
    write_buffers: RwLock<HashMap<u64, WriteBuffer>>,
    next_fh: AtomicU64,
    attrs: AttrCache,
    read_only: bool,
}

fn is_dir_key(key: &str) -> bool {
    key.is_empty() || key.ends_with('/')
}

impl S3Fs {
    pub fn new(
        rt: Handle,
        client: Arc<BackendClient>,
        bucket: impl Into<String>,
        pipeline: Option<Arc<Pipeline>>,
        read_only: bool,
    ) -> Self {
        Self::with_attr_ttl(rt, client, bucket, pipeline, read_only, DEFAULT_TTL)
    }

    pub fn with_attr_ttl(
        rt: Handle,
        client: Arc<BackendClient>,
        bucket: impl Into<String>,
        pipeline: Option<Arc<Pipeline>>,
        read_only: bool,
        attr_ttl: Duration,
    ) -> Self {
        Self {
            rt,
            client,
            bucket: bucket.into(),
            pipeline,
            inodes: RwLock::new(InodeTable::new()),
            write_buffers: RwLock::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            attrs: AttrCache::new(attr_ttl),
            read_only,
        }
    }

    /// Mount the primary binding of a logical bucket.
    pub fn from_binding(rt: Handle, binding: &Binding, read_only: bool) -> Self {
        Self::new(
            rt,
            binding.client.clone(),
            binding.bucket.clone(),
            binding.pipeline.clone(),
            read_only,
        )
    }

    fn key_for(&self, ino: u64) -> Option<String> {
        self.inodes
            .read()
            .unwrap()
            .get_key(ino)
            .map(str::to_string)
    }

    fn make_attr(&self, ino: u64, is_dir: bool, size: u64, mtime: SystemTime) -> FileAttr {
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: if is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            perm: if is_dir { 0o755 } else { 0o644 },
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// File attributes with the decrypted size, through the metadata cache.
    ///
    /// Plaintext bindings answer from HeadObject. Encrypted bindings must
    /// fetch and decrypt to learn the real size; the cache bounds how often
    /// that happens.
    pub(crate) fn file_attr(&self, key: &str) -> Result<CachedAttr, libc::c_int> {
        if let Some(hit) = self.attrs.get(key) {
            return Ok(hit);
        }

        let attr = match &self.pipeline {
            None => {
                let info = self
                    .rt
                    .block_on(self.client.head(&self.bucket, key))
                    .map_err(|err| errno_for(&err))?;
                CachedAttr {
                    size: info.size,
                    mtime: SystemTime::from(info.last_modified),
                    is_dir: false,
                }
            }
            Some(pipeline) => {
                let fetched = self
                    .rt
                    .block_on(self.client.get(&self.bucket, key, None))
                    .map_err(|err| errno_for(&err))?;
                let plaintext = pipeline.decrypt(&fetched.bytes).map_err(|err| {
                    tracing::warn!(key, error = %err, "decryption failed during attr probe");
                    libc::EIO
                })?;
                CachedAttr {
                    size: plaintext.len() as u64,
                    mtime: SystemTime::from(fetched.info.last_modified),
                    is_dir: false,
                }
            }
        };

        self.attrs.insert(key, attr.clone());
        Ok(attr)
    }

    /// Resolve a directory entry: explicit marker, then file, then implicit
    /// directory (prefix with children).
    pub(crate) fn lookup_child(
        &self,
        parent_key: &str,
        name: &str,
    ) -> Result<(String, bool), libc::c_int> {
        let file_key = format!("{parent_key}{name}");
        let dir_key = format!("{file_key}/");

        if self
            .rt
            .block_on(self.client.head(&self.bucket, &dir_key))
            .is_ok()
        {
            return Ok((dir_key, true));
        }

        if self
            .rt
            .block_on(self.client.head(&self.bucket, &file_key))
            .is_ok()
        {
            return Ok((file_key, false));
        }

        let probe = self
            .rt
            .block_on(self.client.list_probe(&self.bucket, &dir_key, 1))
            .map_err(|err| errno_for(&err))?;
        if !probe.objects.is_empty() {
            return Ok((dir_key, true));
        }

        Err(libc::ENOENT)
    }

    /// Read a window of an object.
    ///
    /// Without a pipeline the backend serves the byte range directly. With
    /// one, the whole object is fetched and decrypted, then sliced: layered
    /// AEAD gives no random access into ciphertext.
    pub(crate) fn read_object(
        &self,
        key: &str,
        offset: u64,
        size: u32,
    ) -> Result<Vec<u8>, libc::c_int> {
        match &self.pipeline {
            None => {
                let fetched = self
                    .rt
                    .block_on(
                        self.client
                            .get(&self.bucket, key, Some(offset..offset + size as u64)),
                    )
                    .map_err(|err| errno_for(&err))?;
                Ok(fetched.bytes.to_vec())
            }
            Some(pipeline) => {
                let fetched = self
                    .rt
                    .block_on(self.client.get(&self.bucket, key, None))
                    .map_err(|err| errno_for(&err))?;
                let plaintext = pipeline.decrypt(&fetched.bytes).map_err(|err| {
                    tracing::warn!(key, error = %err, "decryption failed");
                    libc::EIO
                })?;
                let len = plaintext.len() as u64;
                if offset >= len {
                    return Ok(Vec::new());
                }
                let end = (offset + size as u64).min(len) as usize;
                Ok(plaintext[offset as usize..end].to_vec())
            }
        }
    }

    /// Encrypt (when configured) and upload, then refresh the metadata
    /// cache with the plaintext size.
    fn upload(&self, key: &str, data: &[u8]) -> Result<(), libc::c_int> {
        let payload = match &self.pipeline {
            Some(pipeline) => Bytes::from(pipeline.encrypt(data).map_err(|err| {
                tracing::warn!(key, error = %err, "encryption failed");
                libc::EIO
            })?),
            None => Bytes::copy_from_slice(data),
        };

        self.rt
            .block_on(self.client.put(&self.bucket, key, payload, PutOpts::default()))
            .map_err(|err| errno_for(&err))?;

        self.attrs.insert(
            key,
            CachedAttr {
                size: data.len() as u64,
                mtime: SystemTime::now(),
                is_dir: false,
            },
        );
        Ok(())
    }

    /// Allocate a file handle with a write buffer attached.
    pub(crate) fn register_write_handle(&self, key: &str, dirty: bool) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.write_buffers
            .write()
            .unwrap()
            .insert(fh, WriteBuffer::new(key.to_string(), dirty));
        fh
    }

    pub(crate) fn write_handle(
        &self,
        fh: u64,
        offset: i64,
        data: &[u8],
        flags: i32,
    ) -> Result<u32, libc::c_int> {
        if offset < 0 {
            return Err(libc::EINVAL);
        }
        let mut buffers = self.write_buffers.write().unwrap();
        let buffer = buffers.get_mut(&fh).ok_or(libc::EBADF)?;
        let offset = if flags & libc::O_APPEND != 0 {
            buffer.data.len() as u64
        } else {
            offset as u64
        };
        buffer.write_at(offset, data)
    }

    /// Serve a read from the handle's buffer if it has unflushed writes.
    pub(crate) fn read_dirty_handle(&self, fh: u64, offset: u64, size: u32) -> Option<Vec<u8>> {
        let buffers = self.write_buffers.read().unwrap();
        buffers
            .get(&fh)
            .filter(|buffer| buffer.dirty)
            .map(|buffer| buffer.read_at(offset, size))
    }

    /// Upload the handle's buffer if dirty, then mark it clean.
    pub(crate) fn flush_handle(&self, fh: u64) -> Result<(), libc::c_int> {
        let pending = {
            let buffers = self.write_buffers.read().unwrap();
            buffers
                .get(&fh)
                .filter(|buffer| buffer.dirty)
                .map(|buffer| (buffer.key.clone(), buffer.data.clone()))
        };

        if let Some((key, data)) = pending {
            self.upload(&key, &data)?;
            if let Some(buffer) = self.write_buffers.write().unwrap().get_mut(&fh) {
                buffer.dirty = false;
            }
            tracing::debug!(key, bytes = data.len(), "flushed write buffer");
        }
        Ok(())
    }

    fn drop_handle(&self, fh: u64) {
        self.write_buffers.write().unwrap().remove(&fh);
    }

    /// List one directory level: subdirectories from common prefixes, files
    /// from leaf keys. Entries belonging to deeper levels are skipped.
    pub(crate) fn dir_entries(&self, dir_key: &str) -> Result<Vec<(String, bool)>, libc::c_int> {
        let listing = self
            .rt
            .block_on(self.client.list(&self.bucket, dir_key, true))
            .map_err(|err| errno_for(&err))?;

        let mut entries = Vec::new();
        for prefix in &listing.common_prefixes {
            let name = prefix
                .strip_prefix(dir_key)
                .unwrap_or(prefix)
                .trim_end_matches('/');
            if !name.is_empty() && !name.contains('/') {
                entries.push((name.to_string(), true));
            }
        }
        for object in &listing.objects {
            if object.key == dir_key || object.key.ends_with('/') {
                continue;
            }
            let name = object.key.strip_prefix(dir_key).unwrap_or(&object.key);
            if !name.is_empty() && !name.contains('/') {
                entries.push((name.to_string(), false));
            }
        }
        Ok(entries)
    }

    /// Create a directory marker: an empty object whose key ends in `/`.
    /// Markers carry no payload and are stored unencrypted.
    pub(crate) fn make_dir_marker(&self, dir_key: &str) -> Result<(), libc::c_int> {
        self.rt
            .block_on(
                self.client
                    .put(&self.bucket, dir_key, Bytes::new(), PutOpts::default()),
            )
            .map_err(|err| errno_for(&err))
    }

    pub(crate) fn remove_file(&self, key: &str) -> Result<(), libc::c_int> {
        self.rt
            .block_on(self.client.delete(&self.bucket, key))
            .map_err(|err| errno_for(&err))?;
        self.attrs.invalidate(key);
        Ok(())
    }

    /// Remove a directory, refusing unless only the marker itself remains.
    pub(crate) fn remove_dir(&self, dir_key: &str) -> Result<(), libc::c_int> {
        let probe = self
            .rt
            .block_on(self.client.list_probe(&self.bucket, dir_key, 2))
            .map_err(|err| errno_for(&err))?;
        if probe.objects.iter().any(|object| object.key != dir_key) {
            return Err(libc::ENOTEMPTY);
        }

        self.rt
            .block_on(self.client.delete(&self.bucket, dir_key))
            .map_err(|err| errno_for(&err))?;
        self.attrs.invalidate(dir_key);
        Ok(())
    }

    /// Rename as server-side copy + delete. If the delete fails the copy is
    /// removed again on a best-effort basis and the rename fails.
    pub(crate) fn rename_key(&self, from: &str, to: &str) -> Result<(), libc::c_int> {
        self.rt
            .block_on(self.client.copy(&self.bucket, from, to))
            .map_err(|err| errno_for(&err))?;

        if let Err(err) = self.rt.block_on(self.client.delete(&self.bucket, from)) {
            let _ = self.rt.block_on(self.client.delete(&self.bucket, to));
            return Err(errno_for(&err));
        }

        self.attrs.invalidate(from);
        self.attrs.invalidate(to);
        Ok(())
    }

    fn parent_child_key(&self, parent: u64, name: &OsStr) -> Result<(String, String), libc::c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        let parent_key = self.key_for(parent).ok_or(libc::ENOENT)?;
        if !is_dir_key(&parent_key) {
            return Err(libc::ENOTDIR);
        }
        let child = format!("{parent_key}{name}");
        Ok((parent_key, child))
    }
}

impl Filesystem for S3Fs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let (parent_key, _) = match self.parent_child_key(parent, name) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };
        let name = name.to_str().unwrap_or_default();

        match self.lookup_child(&parent_key, name) {
            Ok((key, true)) => {
                let ino = self.inodes.write().unwrap().get_or_create(&key);
                let attr = self.make_attr(ino, true, 0, SystemTime::now());
                reply.entry(&REPLY_TTL, &attr, 0)
            }
            Ok((key, false)) => match self.file_attr(&key) {
                Ok(cached) => {
                    let ino = self.inodes.write().unwrap().get_or_create(&key);
                    let attr = self.make_attr(ino, false, cached.size, cached.mtime);
                    reply.entry(&REPLY_TTL, &attr, 0)
                }
                Err(errno) => reply.error(errno),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        if ino == ROOT_INODE {
            let attr = self.make_attr(ROOT_INODE, true, 0, SystemTime::now());
            return reply.attr(&REPLY_TTL, &attr);
        }

        let key = match self.key_for(ino) {
            Some(key) => key,
            None => return reply.error(libc::ENOENT),
        };

        if is_dir_key(&key) {
            let attr = self.make_attr(ino, true, 0, SystemTime::now());
            return reply.attr(&REPLY_TTL, &attr);
        }

        match self.file_attr(&key) {
            Ok(cached) => {
                let attr = self.make_attr(ino, false, cached.size, cached.mtime);
                reply.attr(&REPLY_TTL, &attr)
            }
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match size {
            Some(0) => {
                if self.read_only {
                    return reply.error(libc::EROFS);
                }
                let key = match self.key_for(ino) {
                    Some(key) => key,
                    None => return reply.error(libc::ENOENT),
                };
                if let Err(errno) = self.upload(&key, &[]) {
                    return reply.error(errno);
                }
            }
            // Truncating to anything else is an in-place update.
            Some(_) => return reply.error(libc::ESPIPE),
            None => {}
        }
        self.getattr(req, ino, fh, reply)
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir_key = match self.key_for(ino) {
            Some(key) => key,
            None => return reply.error(libc::ENOENT),
        };
        if !is_dir_key(&dir_key) {
            return reply.error(libc::ENOTDIR);
        }

        let children = match self.dir_entries(&dir_key) {
            Ok(children) => children,
            Err(errno) => return reply.error(errno),
        };

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for (name, is_dir) in children {
            let child_key = if is_dir {
                format!("{dir_key}{name}/")
            } else {
                format!("{dir_key}{name}")
            };
            let child_ino = self.inodes.write().unwrap().get_or_create(&child_key);
            let kind = if is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((child_ino, kind, name));
        }

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok()
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let key = match self.key_for(ino) {
            Some(key) => key,
            None => return reply.error(libc::ENOENT),
        };

        let write_mode = flags & (libc::O_WRONLY | libc::O_RDWR) != 0;
        if write_mode {
            if self.read_only {
                return reply.error(libc::EROFS);
            }
            // Opening for write needs no existence check; the object is
            // created whole on flush.
            let fh = self.register_write_handle(&key, false);
            return reply.opened(fh, 0);
        }

        // Opening for read validates existence.
        if let Err(errno) = self.file_attr(&key) {
            return reply.error(errno);
        }
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        reply.opened(fh, 0)
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }

        if let Some(data) = self.read_dirty_handle(fh, offset as u64, size) {
            return reply.data(&data);
        }

        let key = match self.key_for(ino) {
            Some(key) => key,
            None => return reply.error(libc::ENOENT),
        };

        match self.read_object(&key, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if self.read_only {
            return reply.error(libc::EROFS);
        }
        match self.write_handle(fh, offset, data, flags) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.flush_handle(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let result = self.flush_handle(fh);
        self.drop_handle(fh);
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if self.read_only {
            return reply.error(libc::EROFS);
        }
        let (_, file_key) = match self.parent_child_key(parent, name) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };

        // Dirty from the start so an untouched new file still materialises
        // as an empty object on close.
        let fh = self.register_write_handle(&file_key, true);
        let ino = self.inodes.write().unwrap().get_or_create(&file_key);
        let attr = self.make_attr(ino, false, 0, SystemTime::now());
        reply.created(&REPLY_TTL, &attr, 0, fh, 0)
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        if self.read_only {
            return reply.error(libc::EROFS);
        }
        let (_, child) = match self.parent_child_key(parent, name) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };
        let dir_key = format!("{child}/");

        if let Err(errno) = self.make_dir_marker(&dir_key) {
            return reply.error(errno);
        }

        let ino = self.inodes.write().unwrap().get_or_create(&dir_key);
        let attr = self.make_attr(ino, true, 0, SystemTime::now());
        reply.entry(&REPLY_TTL, &attr, 0)
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if self.read_only {
            return reply.error(libc::EROFS);
        }
        let (_, file_key) = match self.parent_child_key(parent, name) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };

        if let Err(errno) = self.remove_file(&file_key) {
            return reply.error(errno);
        }

        let mut inodes = self.inodes.write().unwrap();
        if let Some(ino) = inodes.get_inode(&file_key) {
            inodes.remove(ino);
        }
        reply.ok()
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if self.read_only {
            return reply.error(libc::EROFS);
        }
        let (_, child) = match self.parent_child_key(parent, name) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };
        let dir_key = format!("{child}/");

        if let Err(errno) = self.remove_dir(&dir_key) {
            return reply.error(errno);
        }

        let mut inodes = self.inodes.write().unwrap();
        if let Some(ino) = inodes.get_inode(&dir_key) {
            inodes.remove(ino);
        }
        reply.ok()
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        if self.read_only {
            return reply.error(libc::EROFS);
        }
        let (_, from_key) = match self.parent_child_key(parent, name) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };
        let (_, to_key) = match self.parent_child_key(newparent, newname) {
            Ok(keys) => keys,
            Err(errno) => return reply.error(errno),
        };

        if let Err(errno) = self.rename_key(&from_key, &to_key) {
            return reply.error(errno);
        }

        self.inodes.write().unwrap().rename(&from_key, &to_key);
        reply.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{CryptoConfig, CryptoLayerConfig, MultiSourceString};
    use common::store::{MemoryBackend, ObjectBackend};
    use tokio::runtime::Runtime;

    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    fn pipeline() -> Arc<Pipeline> {
        Arc::new(
            Pipeline::from_config(&CryptoConfig {
                id: "test".into(),
                layers: vec![CryptoLayerConfig {
                    algorithm: "chacha20poly1305".into(),
                    keyset: MultiSourceString::inline(KEY),
                    params: HashMap::new(),
                }],
            })
            .unwrap(),
        )
    }

    fn test_fs(encrypted: bool) -> (Runtime, S3Fs, Arc<MemoryBackend>) {
        let rt = Runtime::new().unwrap();
        let (client, store) = BackendClient::in_memory("test");
        let fs = S3Fs::new(
            rt.handle().clone(),
            Arc::new(client),
            "phys",
            encrypted.then(pipeline),
            false,
        );
        (rt, fs, store)
    }

    fn seed(rt: &Runtime, store: &MemoryBackend, key: &str, body: &[u8]) {
        rt.block_on(store.put(
            "phys",
            key,
            Bytes::copy_from_slice(body),
            PutOpts::default(),
        ))
        .unwrap();
    }

    fn seed_encrypted(rt: &Runtime, store: &MemoryBackend, key: &str, body: &[u8]) {
        let sealed = pipeline().encrypt(body).unwrap();
        seed(rt, store, key, &sealed);
    }

    #[test]
    fn buffer_appends_sequentially() {
        let mut buffer = WriteBuffer::new("k".into(), false);
        assert_eq!(buffer.write_at(0, b"abc").unwrap(), 3);
        assert_eq!(buffer.write_at(3, b"de").unwrap(), 2);
        assert_eq!(buffer.data, b"abcde");
        assert!(buffer.dirty);
    }

    #[test]
    fn buffer_pads_sparse_extension_with_zeros() {
        let mut buffer = WriteBuffer::new("k".into(), false);
        buffer.write_at(0, b"ab").unwrap();
        buffer.write_at(5, b"z").unwrap();
        assert_eq!(buffer.data, b"ab\0\0\0z");
    }

    #[test]
    fn buffer_rejects_rewind_with_espipe() {
        let mut buffer = WriteBuffer::new("k".into(), false);
        buffer.write_at(0, b"abcde").unwrap();
        assert_eq!(buffer.write_at(2, b"X"), Err(libc::ESPIPE));
        assert_eq!(buffer.data, b"abcde");
    }

    #[test]
    fn buffer_read_back_returns_written_bytes() {
        let mut buffer = WriteBuffer::new("k".into(), false);
        buffer.write_at(0, b"hello world").unwrap();
        assert_eq!(buffer.read_at(0, 11), b"hello world");
        assert_eq!(buffer.read_at(6, 5), b"world");
        assert_eq!(buffer.read_at(6, 100), b"world");
        assert!(buffer.read_at(20, 4).is_empty());
    }

    #[test]
    fn dirty_handle_reads_come_from_the_buffer() {
        // No object exists in the store, so a backend read would fail: the
        // answer can only have come from the buffer.
        let (_rt, fs, _store) = test_fs(true);
        let fh = fs.register_write_handle("draft.txt", false);
        fs.write_handle(fh, 0, b"buffered", 0).unwrap();

        let data = fs.read_dirty_handle(fh, 0, 8).expect("dirty buffer serves reads");
        assert_eq!(data, b"buffered");

        // A clean handle defers to the backend path.
        let clean = fs.register_write_handle("clean.txt", false);
        assert!(fs.read_dirty_handle(clean, 0, 8).is_none());
    }

    #[test]
    fn write_handle_honours_append_flag() {
        let (_rt, fs, _store) = test_fs(false);
        let fh = fs.register_write_handle("log.txt", false);
        fs.write_handle(fh, 0, b"one", 0).unwrap();
        fs.write_handle(fh, 0, b"two", libc::O_APPEND).unwrap();
        assert_eq!(fs.read_dirty_handle(fh, 0, 10).unwrap(), b"onetwo");
    }

    #[test]
    fn flush_uploads_ciphertext_and_caches_plaintext_size() {
        let (rt, fs, store) = test_fs(true);
        let fh = fs.register_write_handle("doc.txt", false);
        fs.write_handle(fh, 0, b"abc", 0).unwrap();
        fs.write_handle(fh, 3, b"de", 0).unwrap();
        fs.flush_handle(fh).unwrap();

        let raw = store.raw("phys", "doc.txt").expect("object uploaded");
        assert_ne!(&raw[..], b"abcde");
        assert!(raw.len() > 5);

        // E5: stat straight after close reports the plaintext size.
        let attr = fs.file_attr("doc.txt").unwrap();
        assert_eq!(attr.size, 5);

        // Flushing a clean handle is a no-op.
        fs.flush_handle(fh).unwrap();
        let _ = rt;
    }

    #[test]
    fn file_attr_reports_decrypted_size_and_caches_it() {
        let (rt, fs, store) = test_fs(true);
        seed_encrypted(&rt, &store, "secret.bin", b"0123456789");

        let attr = fs.file_attr("secret.bin").unwrap();
        assert_eq!(attr.size, 10);
        assert!(!attr.is_dir);

        // Within the TTL the cache answers even if the backend object is
        // gone, proving no round trip happened.
        rt.block_on(store.delete("phys", "secret.bin")).unwrap();
        assert_eq!(fs.file_attr("secret.bin").unwrap().size, 10);

        // Invalidation forces the next probe back to the backend.
        fs.attrs.invalidate("secret.bin");
        assert_eq!(fs.file_attr("secret.bin"), Err(libc::ENOENT));
    }

    #[test]
    fn lookup_prefers_marker_then_file_then_prefix() {
        let (rt, fs, store) = test_fs(false);
        seed(&rt, &store, "both/", b"");
        seed(&rt, &store, "both", b"file body");
        seed(&rt, &store, "plain.txt", b"x");
        seed(&rt, &store, "implicit/child.txt", b"y");

        assert_eq!(fs.lookup_child("", "both").unwrap(), ("both/".into(), true));
        assert_eq!(
            fs.lookup_child("", "plain.txt").unwrap(),
            ("plain.txt".into(), false)
        );
        assert_eq!(
            fs.lookup_child("", "implicit").unwrap(),
            ("implicit/".into(), true)
        );
        assert_eq!(fs.lookup_child("", "missing"), Err(libc::ENOENT));
    }

    #[test]
    fn read_object_decrypts_and_slices() {
        let (rt, fs, store) = test_fs(true);
        seed_encrypted(&rt, &store, "hello.txt", b"hello world");

        assert_eq!(fs.read_object("hello.txt", 0, 11).unwrap(), b"hello world");
        assert_eq!(fs.read_object("hello.txt", 6, 5).unwrap(), b"world");
        assert_eq!(fs.read_object("hello.txt", 6, 100).unwrap(), b"world");
        assert!(fs.read_object("hello.txt", 50, 4).unwrap().is_empty());
    }

    #[test]
    fn read_object_uses_ranges_when_unencrypted() {
        let (rt, fs, store) = test_fs(false);
        seed(&rt, &store, "plain.bin", b"0123456789");
        assert_eq!(fs.read_object("plain.bin", 2, 3).unwrap(), b"234");
    }

    #[test]
    fn corrupted_object_reads_as_eio() {
        let (rt, fs, store) = test_fs(true);
        seed(&rt, &store, "broken", b"not really ciphertext");
        assert_eq!(fs.read_object("broken", 0, 10), Err(libc::EIO));
        assert_eq!(fs.file_attr("broken"), Err(libc::EIO));
    }

    #[test]
    fn dir_markers_are_not_encrypted() {
        let (_rt, fs, store) = test_fs(true);
        fs.make_dir_marker("docs/").unwrap();
        assert_eq!(store.raw("phys", "docs/").unwrap().len(), 0);
    }

    #[test]
    fn rmdir_refuses_non_empty_directories() {
        let (rt, fs, store) = test_fs(false);
        seed(&rt, &store, "dir/", b"");
        seed(&rt, &store, "dir/child.txt", b"x");

        assert_eq!(fs.remove_dir("dir/"), Err(libc::ENOTEMPTY));
        assert!(store.contains("phys", "dir/"));

        rt.block_on(store.delete("phys", "dir/child.txt")).unwrap();
        fs.remove_dir("dir/").unwrap();
        assert!(!store.contains("phys", "dir/"));
    }

    #[test]
    fn rename_copies_then_deletes() {
        let (rt, fs, store) = test_fs(false);
        seed(&rt, &store, "old.txt", b"content");

        fs.rename_key("old.txt", "new.txt").unwrap();
        assert!(!store.contains("phys", "old.txt"));
        assert_eq!(
            &rt.block_on(store.get("phys", "new.txt", None)).unwrap().bytes[..],
            b"content"
        );
    }

    #[test]
    fn rename_of_missing_source_fails() {
        let (_rt, fs, _store) = test_fs(false);
        assert_eq!(fs.rename_key("ghost", "anywhere"), Err(libc::ENOENT));
    }

    #[test]
    fn dir_entries_split_files_and_subdirectories() {
        let (rt, fs, store) = test_fs(false);
        seed(&rt, &store, "a.txt", b"1");
        seed(&rt, &store, "dir/", b"");
        seed(&rt, &store, "dir/inner.txt", b"2");
        seed(&rt, &store, "deep/sub/leaf.txt", b"3");

        let mut root = fs.dir_entries("").unwrap();
        root.sort();
        assert_eq!(
            root,
            vec![
                ("a.txt".to_string(), false),
                ("deep".to_string(), true),
                ("dir".to_string(), true),
            ]
        );

        let dir = fs.dir_entries("dir/").unwrap();
        assert_eq!(dir, vec![("inner.txt".to_string(), false)]);
    }

    #[test]
    fn remove_file_invalidates_the_attr_cache() {
        let (rt, fs, store) = test_fs(false);
        seed(&rt, &store, "cached.txt", b"12345");

        assert_eq!(fs.file_attr("cached.txt").unwrap().size, 5);
        fs.remove_file("cached.txt").unwrap();
        assert_eq!(fs.file_attr("cached.txt"), Err(libc::ENOENT));
    }
}
