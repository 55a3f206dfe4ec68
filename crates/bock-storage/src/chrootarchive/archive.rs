//! Layer archive codec.
//!
//! Layers are tar streams, optionally gzip or zstd compressed. Unpacking
//! applies the layer as a diff on top of what is already under the root:
//! whiteout entries delete, everything else overwrites.

use std::collections::HashSet;
use std::fs::{self, Permissions};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use tar::EntryType;
use walkdir::WalkDir;

use bock_common::{BockError, BockResult};

use super::TarOptions;

/// Prefix marking a deletion in a layer.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Prefix of whiteout metadata entries that do not name a file.
pub const WHITEOUT_META_PREFIX: &str = ".wh..wh.";

/// Marks a directory whose lower-layer contents are hidden.
pub const WHITEOUT_OPAQUE_DIR: &str = ".wh..wh..opq";

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b, 0x08];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// A boxed byte stream that can be handed to another thread.
pub type Stream<'a> = Box<dyn Read + Send + 'a>;

/// Decompression and unpacking of layer archives.
pub trait ArchiveCodec: Send + Sync {
    /// Wrap `stream` in a decompressor matching its envelope, or pass it
    /// through if it is not compressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be read or the decoder fails
    /// to initialise.
    fn decompress<'a>(&self, stream: Stream<'a>) -> BockResult<Stream<'a>>;

    /// Apply an uncompressed layer under `root` and return the number of
    /// bytes unpacked.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is malformed or an entry cannot be
    /// written.
    fn unpack_layer(&self, root: &Path, layer: &mut dyn Read, options: &TarOptions)
    -> BockResult<u64>;
}

/// The tar codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarCodec;

impl ArchiveCodec for TarCodec {
    fn decompress<'a>(&self, stream: Stream<'a>) -> BockResult<Stream<'a>> {
        decompress_stream(stream)
    }

    fn unpack_layer(
        &self,
        root: &Path,
        layer: &mut dyn Read,
        options: &TarOptions,
    ) -> BockResult<u64> {
        self.unpack_layer_keeping(root, layer, options, &[])
    }
}

impl TarCodec {
    /// Like [`ArchiveCodec::unpack_layer`], but whiteouts and opaque
    /// directories never remove the paths in `keep`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is malformed, a whiteout names
    /// something outside its own directory, or an entry cannot be written.
    pub fn unpack_layer_keeping(
        &self,
        root: &Path,
        layer: &mut dyn Read,
        options: &TarOptions,
        keep: &[PathBuf],
    ) -> BockResult<u64> {
        Unpacker::new(root, options, keep)?.run(layer)
    }
}

/// Detect the compression envelope by magic bytes.
///
/// # Errors
///
/// Returns an error if the head of the stream cannot be read.
pub fn decompress_stream<'a>(stream: Stream<'a>) -> BockResult<Stream<'a>> {
    let mut reader = BufReader::new(stream);
    let head = reader.fill_buf()?;
    let gzip = head.starts_with(GZIP_MAGIC);
    let zstd = head.starts_with(ZSTD_MAGIC);

    if gzip {
        tracing::debug!("Layer is gzip compressed");
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    } else if zstd {
        tracing::debug!("Layer is zstd compressed");
        Ok(Box::new(zstd::stream::read::Decoder::with_buffer(reader)?))
    } else {
        Ok(Box::new(reader))
    }
}

/// Resolve an entry name against the root: leading `/` is dropped and `..`
/// never climbs above the root. Returns `None` for the root itself.
#[must_use]
pub fn clean_entry_path(name: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                clean.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

struct Unpacker<'o> {
    root: &'o Path,
    options: &'o TarOptions,
    excludes: Vec<glob::Pattern>,
    keep: &'o [PathBuf],
    unpacked: HashSet<PathBuf>,
}

impl<'o> Unpacker<'o> {
    fn new(root: &'o Path, options: &'o TarOptions, keep: &'o [PathBuf]) -> BockResult<Self> {
        let excludes = options
            .exclude_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| BockError::Config {
                    message: format!("invalid exclude pattern {p:?}: {e}"),
                })
            })
            .collect::<BockResult<_>>()?;

        Ok(Self {
            root,
            options,
            excludes,
            keep,
            unpacked: HashSet::new(),
        })
    }

    fn run(mut self, layer: &mut dyn Read) -> BockResult<u64> {
        let mut archive = tar::Archive::new(layer);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_unpack_xattrs(true);
        archive.set_overwrite(true);

        let mut size = 0;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let kind = entry.header().entry_type();
            if kind.is_pax_global_extensions() {
                continue;
            }

            let Some(rel) = clean_entry_path(&entry.path()?) else {
                continue;
            };
            if self.is_excluded(&rel) {
                tracing::trace!(path = %rel.display(), "Excluded");
                continue;
            }

            size += entry.header().size()?;

            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
                self.apply_whiteout(&rel, &name, target)?;
                continue;
            }

            self.unpack_entry(&mut entry, &rel, kind)?;
            self.unpacked.insert(rel);
        }

        tracing::debug!(root = %self.root.display(), size, "Layer unpacked");
        Ok(size)
    }

    fn is_excluded(&self, rel: &Path) -> bool {
        rel.ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| self.excludes.iter().any(|p| p.matches_path(a)))
    }

    fn apply_whiteout(&self, rel: &Path, name: &str, target: &str) -> BockResult<()> {
        let parent = rel.parent().unwrap_or(Path::new(""));
        if name == WHITEOUT_OPAQUE_DIR {
            return self.make_opaque(&self.root.join(parent));
        }
        if name.starts_with(WHITEOUT_META_PREFIX) {
            return Ok(());
        }

        // the deleted path must be a direct child of the whiteout's directory
        let deleted = clean_entry_path(&parent.join(target))
            .filter(|p| p.parent() == Some(parent))
            .ok_or_else(|| BockError::Config {
                message: format!("invalid whiteout {}", rel.display()),
            })?;

        let path = self.root.join(deleted);
        if self.is_kept(&path) {
            return Ok(());
        }
        remove_path(&path)
    }

    fn is_kept(&self, path: &Path) -> bool {
        self.keep.iter().any(|k| k == path)
    }

    /// Remove everything under `dir` that this layer did not put there.
    fn make_opaque(&self, dir: &Path) -> BockResult<()> {
        let mut walker = WalkDir::new(dir).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|io| io.kind() == ErrorKind::NotFound) => {
                    continue;
                }
                Err(e) => {
                    return Err(BockError::fs("walk", dir, e.into()));
                }
            };
            let rel = entry.path().strip_prefix(self.root).unwrap_or(entry.path());
            if self.unpacked.contains(rel) {
                continue;
            }
            if self.is_kept(entry.path()) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            remove_path(entry.path())?;
        }
        Ok(())
    }

    fn unpack_entry<R: Read>(
        &self,
        entry: &mut tar::Entry<'_, R>,
        rel: &Path,
        kind: EntryType,
    ) -> BockResult<()> {
        let target = self.root.join(rel);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BockError::fs("create directory", parent, e))?;
        }

        // only a directory may be unpacked over a directory
        if let Ok(existing) = fs::symlink_metadata(&target) {
            if !(existing.is_dir() && kind.is_dir()) {
                remove_path(&target)?;
            }
        }

        if kind.is_hard_link() {
            let link = entry
                .link_name()?
                .and_then(|l| clean_entry_path(&l))
                .ok_or_else(|| BockError::Config {
                    message: format!("hard link {} has no target", rel.display()),
                })?;
            let source = self.root.join(link);
            fs::hard_link(&source, &target).map_err(|e| BockError::fs("link", &target, e))?;
            return Ok(());
        }

        entry
            .unpack(&target)
            .map_err(|e| BockError::fs("unpack", &target, e))?;

        if !self.options.no_lchown {
            self.chown_entry(entry.header(), &target, kind)?;
        }
        Ok(())
    }

    /// Give the entry its owner, translated to host ids. Changing owner
    /// clears setuid/setgid, so the mode is applied again afterwards.
    fn chown_entry(&self, header: &tar::Header, target: &Path, kind: EntryType) -> BockResult<()> {
        let uid = self.options.uid_maps.to_host(header_id(header.uid()?)?)?;
        let gid = self.options.gid_maps.to_host(header_id(header.gid()?)?)?;

        std::os::unix::fs::lchown(target, Some(uid), Some(gid))
            .map_err(|e| BockError::fs("change ownership of", target, e))?;

        if !kind.is_symlink() {
            fs::set_permissions(target, Permissions::from_mode(header.mode()?))
                .map_err(|e| BockError::fs("change mode of", target, e))?;
        }
        Ok(())
    }
}

fn header_id(raw: u64) -> BockResult<u32> {
    u32::try_from(raw).map_err(|_| BockError::Config {
        message: format!("archive owner id {raw} exceeds 32 bits"),
    })
}

fn remove_path(path: &Path) -> BockResult<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BockError::fs("remove", path, e)),
    }
}
