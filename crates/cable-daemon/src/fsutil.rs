//! Directory-relative filesystem primitives (C2).
//!
//! Every multi-step operation is expressed against an already-open
//! directory file descriptor rather than a path, so renames and links
//! cannot be reinterpreted by a concurrent rename of an ancestor
//! directory. `DirHandle` owns one such fd and closes it (releasing any
//! advisory lock) on drop.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::fcntl::{self, FlockArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

use cable_proto::{DCREAT_MODE, FCREAT_MODE};

use crate::error::FsError;

/// An open, directory-relative file descriptor.
pub struct DirHandle {
    fd: OwnedFd,
}

impl DirHandle {
    /// Open `path` as a directory, following symlinks (used once at
    /// startup for the queue roots).
    pub fn open(path: &Path) -> Result<Self, FsError> {
        let fd = fcntl::open(path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())?;
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Open a child entry of this directory as a directory, without
    /// following a trailing symlink (mirrors `O_NOFOLLOW`).
    pub fn open_subdir(&self, name: &str) -> Result<Self, FsError> {
        let fd = fcntl::openat(
            self.raw(),
            name,
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_NOFOLLOW,
            Mode::empty(),
        )?;
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// `mkdirat(self, name, mode)`. `EEXIST` is left for the caller to
    /// tolerate (recovering from a crashed prior attempt).
    pub fn mkdir(&self, name: &str, mode: u32) -> Result<(), FsError> {
        nix::sys::stat::mkdirat(
            Some(self.raw()),
            name,
            Mode::from_bits_truncate(mode),
        )
        .map_err(FsError::from)
    }

    /// True iff `name` exists in this directory (`faccessat F_OK`).
    pub fn exists(&self, name: &str) -> bool {
        unistd::faccessat(
            Some(self.raw()),
            name,
            unistd::AccessFlags::F_OK,
            unistd::AtFlags::AT_SYMLINK_NOFOLLOW,
        )
        .is_ok()
    }

    /// Create-or-truncate `name`, write `body` plus a trailing newline,
    /// close. A short write is reported as [`FsError::Malformed`], never
    /// silently dropped.
    pub fn write_line(&self, name: &str, body: &str) -> Result<(), FsError> {
        let fd = fcntl::openat(
            self.raw(),
            name,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::from_bits_truncate(FCREAT_MODE),
        )?;
        let file = unsafe { OwnedFd::from_raw_fd(fd) };
        let mut line = String::with_capacity(body.len() + 1);
        line.push_str(body);
        line.push('\n');
        let written = unistd::write(&file, line.as_bytes())?;
        if written != line.len() {
            return Err(FsError::Malformed);
        }
        Ok(())
    }

    /// Create an empty sentinel file if it is not already present.
    pub fn create_empty(&self, name: &str) -> Result<(), FsError> {
        match fcntl::openat(
            self.raw(),
            name,
            OFlag::O_WRONLY | OFlag::O_CREAT,
            Mode::from_bits_truncate(FCREAT_MODE),
        ) {
            Ok(fd) => {
                let _ = unsafe { OwnedFd::from_raw_fd(fd) };
                Ok(())
            }
            Err(e) => Err(FsError::from(e)),
        }
    }

    /// Read one line (no embedded NUL, bounded at `max_len` bytes),
    /// requiring EOF immediately after the trailing newline.
    pub fn read_line(&self, name: &str, max_len: usize) -> Result<String, FsError> {
        let fd = fcntl::openat(self.raw(), name, OFlag::O_RDONLY, Mode::empty())?;
        let file = unsafe { OwnedFd::from_raw_fd(fd) };
        let mut buf = vec![0u8; max_len + 2];
        let n = unistd::read(self.raw_of(&file), &mut buf)?;
        if n == 0 || n > max_len + 1 {
            return Err(FsError::Malformed);
        }
        if buf[n - 1] != b'\n' {
            return Err(FsError::Malformed);
        }
        // require EOF immediately after
        let mut probe = [0u8; 1];
        if unistd::read(self.raw_of(&file), &mut probe)? != 0 {
            return Err(FsError::Malformed);
        }
        let line = std::str::from_utf8(&buf[..n - 1]).map_err(|_| FsError::Malformed)?;
        Ok(line.to_string())
    }

    fn raw_of(&self, fd: &OwnedFd) -> RawFd {
        fd.as_raw_fd()
    }

    /// `renameat(self, from, self, to)`.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        fcntl::renameat(Some(self.raw()), from, Some(self.raw()), to).map_err(FsError::from)
    }

    /// `linkat(self, from, self, to)`. Returns `Ok(true)` if the link
    /// was newly created, `Ok(false)` if `to` already existed.
    pub fn link(&self, from: &str, to: &str) -> Result<bool, FsError> {
        match unistd::linkat(
            Some(self.raw()),
            from,
            Some(self.raw()),
            to,
            unistd::LinkatFlags::NoSymlinkFollow,
        ) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::EEXIST) => Ok(false),
            Err(e) => Err(FsError::from(e)),
        }
    }

    /// `futimens(self, NULL)`: bump mtime to wake the watcher.
    pub fn touch(&self) -> Result<(), FsError> {
        nix::sys::stat::futimens(self.raw(), &nix::sys::time::TimeSpec::UTIME_NOW, &nix::sys::time::TimeSpec::UTIME_NOW)
            .map_err(FsError::from)
    }

    /// Non-blocking exclusive advisory lock. `EWOULDBLOCK` maps to
    /// [`FsError::Busy`], never a hard error.
    pub fn try_lock(&self) -> Result<Lock<'_>, FsError> {
        match fcntl::flock(self.raw(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Lock {
                dir: self,
                active: true,
            }),
            Err(nix::errno::Errno::EWOULDBLOCK) => Err(FsError::Busy),
            Err(e) => Err(FsError::from(e)),
        }
    }
}

/// A held advisory lock on a [`DirHandle`]. Released on [`Lock::unlock`]
/// or on drop, whichever comes first — the `snd`/`rcp` handlers release
/// explicitly before touching the directory mtime so the spawned `loop`
/// child does not observe the handler's lock.
pub struct Lock<'a> {
    dir: &'a DirHandle,
    active: bool,
}

impl Lock<'_> {
    pub fn unlock(mut self) -> Result<(), FsError> {
        fcntl::flock(self.dir.raw(), FlockArg::Unlock)?;
        self.active = false;
        Ok(())
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        if self.active {
            let _ = fcntl::flock(self.dir.raw(), FlockArg::Unlock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_line_roundtrip() {
        let dir = tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        handle.write_line("hostname", "abcdefghijklmnop.onion").unwrap();
        let got = handle.read_line("hostname", 64).unwrap();
        assert_eq!(got, "abcdefghijklmnop.onion");
    }

    #[test]
    fn create_empty_is_idempotent() {
        let dir = tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        handle.create_empty("peer.req").unwrap();
        handle.create_empty("peer.req").unwrap();
        assert!(handle.exists("peer.req"));
    }

    #[test]
    fn link_reports_new_vs_existing() {
        let dir = tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        handle.create_empty("peer.ok").unwrap();
        assert!(handle.link("peer.ok", "recv.req").unwrap());
        assert!(!handle.link("peer.ok", "recv.req").unwrap());
    }

    #[test]
    fn try_lock_then_second_lock_is_busy() {
        let dir = tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        let other = DirHandle::open(dir.path()).unwrap();
        let lock = handle.try_lock().unwrap();
        assert!(matches!(other.try_lock(), Err(FsError::Busy)));
        lock.unlock().unwrap();
        assert!(other.try_lock().is_ok());
    }

    #[test]
    fn rename_moves_subdirectory() {
        let dir = tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        handle.mkdir("a.new", DCREAT_MODE).unwrap();
        handle.rename("a.new", "a").unwrap();
        assert!(handle.exists("a"));
        assert!(!handle.exists("a.new"));
    }

    #[test]
    fn read_line_rejects_missing_trailing_newline() {
        let dir = tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad"), "no-newline").unwrap();
        assert!(matches!(handle.read_line("bad", 64), Err(FsError::Malformed)));
    }
}
