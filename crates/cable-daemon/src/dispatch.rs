//! Control-request dispatcher (C6): tokenizes and validates the path
//! suffix after `/<username>/request/`, then routes to a C5 handler.

use cable_proto::{
    is_b32, is_hex, is_host, MAC_LENGTH, MSGID_LENGTH, USERNAME_LENGTH,
};
use cable_proto::SvcStatus;

use crate::fsutil::DirHandle;
use crate::handlers;

/// Reject empty, over-long, or slash-malformed requests before
/// tokenizing; `//` and leading/trailing `/` are rejected per spec §4.6.
fn well_formed(s: &str) -> bool {
    !s.is_empty() && s.len() < 256 && !s.contains("//") && !s.starts_with('/') && !s.ends_with('/')
}

/// Dispatch one `<request>` suffix against the given queue roots.
/// `queue` backs `rcp`; `rqueue` backs `msg`/`snd`/`ack`.
pub fn dispatch_request(suffix: &str, queue: &DirHandle, rqueue: &DirHandle) -> SvcStatus {
    if !well_formed(suffix) {
        return SvcStatus::BadFmt;
    }

    let tokens: Vec<&str> = suffix.split('/').collect();
    if tokens.len() > 5 {
        return SvcStatus::BadFmt;
    }

    match tokens.as_slice() {
        ["ver"] => handlers::handle_ver(),
        ["msg", msgid, hostname, username] => {
            if !is_hex(MSGID_LENGTH, msgid)
                || !is_host(hostname)
                || !is_b32(USERNAME_LENGTH, username)
            {
                return SvcStatus::BadFmt;
            }
            handlers::handle_msg(rqueue, msgid, hostname, username)
        }
        ["snd", msgid, mac] => {
            if !is_hex(MSGID_LENGTH, msgid) || !is_hex(MAC_LENGTH, mac) {
                return SvcStatus::BadFmt;
            }
            handlers::handle_snd(rqueue, msgid, mac)
        }
        ["rcp", msgid, mac] => {
            if !is_hex(MSGID_LENGTH, msgid) || !is_hex(MAC_LENGTH, mac) {
                return SvcStatus::BadFmt;
            }
            handlers::handle_rcp(queue, msgid, mac)
        }
        ["ack", msgid, mac] => {
            if !is_hex(MSGID_LENGTH, msgid) || !is_hex(MAC_LENGTH, mac) {
                return SvcStatus::BadFmt;
            }
            handlers::handle_ack(rqueue, msgid, mac)
        }
        _ => SvcStatus::BadFmt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MSGID: &str = "0123456789abcdef0123456789abcdef01234567";

    fn roots() -> (tempfile::TempDir, tempfile::TempDir, DirHandle, DirHandle) {
        let q = tempdir().unwrap();
        let rq = tempdir().unwrap();
        let qh = DirHandle::open(q.path()).unwrap();
        let rqh = DirHandle::open(rq.path()).unwrap();
        (q, rq, qh, rqh)
    }

    #[test]
    fn ver_dispatches_ok() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(dispatch_request("ver", &qh, &rqh), SvcStatus::Ok);
    }

    #[test]
    fn ver_with_extra_token_is_badfmt() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(dispatch_request("ver/x", &qh, &rqh), SvcStatus::BadFmt);
    }

    #[test]
    fn leading_or_trailing_slash_is_badfmt() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(dispatch_request("/ver", &qh, &rqh), SvcStatus::BadFmt);
        assert_eq!(dispatch_request("ver/", &qh, &rqh), SvcStatus::BadFmt);
    }

    #[test]
    fn embedded_double_slash_is_badfmt() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(
            dispatch_request(&format!("msg/{MSGID}//abcdefghijklmnopqrstuvwxyz234567"), &qh, &rqh),
            SvcStatus::BadFmt
        );
    }

    #[test]
    fn msg_routes_to_rqueue() {
        let (_q, rq, qh, rqh) = roots();
        let status = dispatch_request(
            &format!("msg/{MSGID}/abcdefghijklmnop.onion/abcdefghijklmnopqrstuvwxyz234567"),
            &qh,
            &rqh,
        );
        assert_eq!(status, SvcStatus::Ok);
        assert!(rq.path().join(MSGID).join("hostname").exists());
    }

    #[test]
    fn msg_with_bad_hostname_is_badfmt() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(
            dispatch_request(
                &format!("msg/{MSGID}/not-a-host/abcdefghijklmnopqrstuvwxyz234567"),
                &qh,
                &rqh
            ),
            SvcStatus::BadFmt
        );
    }

    #[test]
    fn unknown_command_is_badfmt() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(dispatch_request("frobnicate/x", &qh, &rqh), SvcStatus::BadFmt);
    }

    #[test]
    fn empty_suffix_is_badfmt() {
        let (_q, _rq, qh, rqh) = roots();
        assert_eq!(dispatch_request("", &qh, &rqh), SvcStatus::BadFmt);
    }
}
