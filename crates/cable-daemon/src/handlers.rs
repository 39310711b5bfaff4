//! Per-command state machine handlers (C5).
//!
//! Each handler opens the message directory relative to its queue root,
//! takes the non-blocking advisory lock, performs its precondition
//! checks and mutations, and lets the lock drop on return. Every
//! failure mode collapses to [`SvcStatus::Err`] — spec §4.5 downgrades
//! any system-call failure, contended lock or precondition miss to a
//! soft error; only [`crate::dispatch`] produces [`SvcStatus::BadFmt`].

use cable_proto::{
    DCREAT_MODE, DEL_SUFFIX, MAC_LENGTH, NEW_SUFFIX, F_ACK_MAC, F_ACK_REQ, F_HOSTNAME, F_PEER_OK,
    F_PEER_REQ, F_RECV_MAC, F_RECV_OK, F_RECV_REQ, F_SEND_MAC, F_SEND_OK, F_USERNAME,
};
use cable_proto::SvcStatus;
use tracing::info;

use crate::fsutil::DirHandle;

/// `msg(msgid, hostname, username)` — in RQUEUE.
pub fn handle_msg(rqueue: &DirHandle, msgid: &str, hostname: &str, username: &str) -> SvcStatus {
    if rqueue.exists(msgid) {
        return SvcStatus::Ok;
    }

    let new_name = format!("{msgid}{NEW_SUFFIX}");
    match rqueue.mkdir(&new_name, DCREAT_MODE) {
        Ok(()) => {}
        Err(e) if e.is_eexist() => {} // recovering from a crashed prior attempt
        Err(e) => {
            info!(%msgid, error = %e, "msg: mkdir .new failed");
            return SvcStatus::Err;
        }
    }

    let dir = match rqueue.open_subdir(&new_name) {
        Ok(d) => d,
        Err(e) => {
            info!(%msgid, error = %e, "msg: open .new failed");
            return SvcStatus::Err;
        }
    };
    let _lock = match dir.try_lock() {
        Ok(l) => l,
        Err(e) => {
            info!(%msgid, error = %e, "msg: lock contended");
            return SvcStatus::Err;
        }
    };

    if dir.write_line(F_HOSTNAME, hostname).is_err() {
        return SvcStatus::Err;
    }
    if dir.write_line(F_USERNAME, username).is_err() {
        return SvcStatus::Err;
    }
    if dir.create_empty(F_PEER_REQ).is_err() {
        return SvcStatus::Err;
    }

    match rqueue.rename(&new_name, msgid) {
        Ok(()) => SvcStatus::Ok,
        Err(e) => {
            info!(%msgid, error = %e, "msg: rename .new onto final name failed");
            SvcStatus::Err
        }
    }
}

/// `snd(msgid, mac)` — in RQUEUE. Precondition: `peer.ok` present.
pub fn handle_snd(rqueue: &DirHandle, msgid: &str, mac: &str) -> SvcStatus {
    let dir = match rqueue.open_subdir(msgid) {
        Ok(d) => d,
        Err(e) => {
            info!(%msgid, error = %e, "snd: open message dir failed");
            return SvcStatus::Err;
        }
    };
    let lock = match dir.try_lock() {
        Ok(l) => l,
        Err(e) => {
            info!(%msgid, error = %e, "snd: lock contended");
            return SvcStatus::Err;
        }
    };

    if !dir.exists(F_PEER_OK) {
        return SvcStatus::Err;
    }

    // First write wins: a second `snd` with a different MAC is still
    // `Ok` (idempotent on the already-completed state) but does not
    // overwrite the stored MAC. See SPEC_FULL.md Open Questions.
    if !dir.exists(F_SEND_MAC) && dir.write_line(F_SEND_MAC, mac).is_err() {
        return SvcStatus::Err;
    }

    match dir.link(F_PEER_OK, F_RECV_REQ) {
        Ok(true) => {
            // Unlock before the touch: the `loop` child the touch wakes
            // takes the same lock, so releasing first is what makes the
            // touch visible to it promptly.
            if lock.unlock().is_err() {
                return SvcStatus::Err;
            }
            match dir.touch() {
                Ok(()) => SvcStatus::Ok,
                Err(e) => {
                    info!(%msgid, error = %e, "snd: touch failed after linking recv.req");
                    SvcStatus::Err
                }
            }
        }
        Ok(false) => SvcStatus::Ok, // recv.req already existed, nothing further
        Err(e) => {
            info!(%msgid, error = %e, "snd: link peer.ok -> recv.req failed");
            SvcStatus::Err
        }
    }
}

/// `rcp(msgid, mac)` — in QUEUE. Precondition: `send.ok` present and
/// `recv.mac` equals `mac`.
pub fn handle_rcp(queue: &DirHandle, msgid: &str, mac: &str) -> SvcStatus {
    let dir = match queue.open_subdir(msgid) {
        Ok(d) => d,
        Err(e) => {
            info!(%msgid, error = %e, "rcp: open message dir failed");
            return SvcStatus::Err;
        }
    };
    let lock = match dir.try_lock() {
        Ok(l) => l,
        Err(e) => {
            info!(%msgid, error = %e, "rcp: lock contended");
            return SvcStatus::Err;
        }
    };

    if !dir.exists(F_SEND_OK) {
        return SvcStatus::Err;
    }

    let recv_mac = match dir.read_line(F_RECV_MAC, MAC_LENGTH) {
        Ok(s) => s,
        Err(_) => return SvcStatus::Err,
    };
    if recv_mac != mac {
        return SvcStatus::Err;
    }

    match dir.link(F_SEND_OK, F_ACK_REQ) {
        Ok(true) => {
            if lock.unlock().is_err() {
                return SvcStatus::Err;
            }
            match dir.touch() {
                Ok(()) => SvcStatus::Ok,
                Err(e) => {
                    info!(%msgid, error = %e, "rcp: touch failed after linking ack.req");
                    SvcStatus::Err
                }
            }
        }
        Ok(false) => SvcStatus::Ok,
        Err(e) => {
            info!(%msgid, error = %e, "rcp: link send.ok -> ack.req failed");
            SvcStatus::Err
        }
    }
}

/// `ack(msgid, mac)` — in RQUEUE. Precondition: `recv.ok` present and
/// `ack.mac` equals `mac`. Tombstones the directory on success.
pub fn handle_ack(rqueue: &DirHandle, msgid: &str, mac: &str) -> SvcStatus {
    let dir = match rqueue.open_subdir(msgid) {
        Ok(d) => d,
        Err(e) => {
            info!(%msgid, error = %e, "ack: open message dir failed");
            return SvcStatus::Err;
        }
    };
    let _lock = match dir.try_lock() {
        Ok(l) => l,
        Err(e) => {
            info!(%msgid, error = %e, "ack: lock contended");
            return SvcStatus::Err;
        }
    };

    if !dir.exists(F_RECV_OK) {
        return SvcStatus::Err;
    }

    let ack_mac = match dir.read_line(F_ACK_MAC, MAC_LENGTH) {
        Ok(s) => s,
        Err(_) => return SvcStatus::Err,
    };
    if ack_mac != mac {
        return SvcStatus::Err;
    }

    let del_name = format!("{msgid}{DEL_SUFFIX}");
    match rqueue.rename(msgid, &del_name) {
        Ok(()) => SvcStatus::Ok,
        Err(e) => {
            info!(%msgid, error = %e, "ack: rename onto tombstone failed");
            SvcStatus::Err
        }
    }
}

/// `ver` — health probe, no state change.
pub fn handle_ver() -> SvcStatus {
    SvcStatus::Ok
}
