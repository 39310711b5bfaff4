//! Wire-format constants shared by the request dispatcher, state machine
//! and HTTP front.

/// Version string embedded in every status-bearing HTTP response body.
pub const VERSION: &str = "LIBERTE CABLE 3.0";

/// Length of a message id in lowercase hex characters.
pub const MSGID_LENGTH: usize = 40;

/// Length of a local username in base-32 characters.
pub const USERNAME_LENGTH: usize = 32;

/// Length of a MAC in lowercase hex characters.
pub const MAC_LENGTH: usize = 128;

/// Length of a Tor `.onion` hostname label, in base-32 characters.
pub const TOR_HOSTNAME_LENGTH: usize = 16;

/// Length of an I2P `.b32.i2p` hostname label, in base-32 characters.
pub const I2P_HOSTNAME_LENGTH: usize = 52;

/// Suffix marking a message directory under construction.
pub const NEW_SUFFIX: &str = ".new";

/// Suffix marking a tombstoned message directory.
pub const DEL_SUFFIX: &str = ".del";

/// Directory creation mode requested before the process umask is applied.
pub const DCREAT_MODE: u32 = 0o777;

/// File creation mode requested before the process umask is applied.
pub const FCREAT_MODE: u32 = 0o666;

/// Literal response body for a successful request dispatch.
pub const RESP_OK: &str = "LIBERTE CABLE 3.0\n";

/// Literal response body for a failed request dispatch.
pub const RESP_ERR: &str = "LIBERTE CABLE 3.0: ERROR\n";

/// Slot file names inside a message directory (spec §3).
pub const F_HOSTNAME: &str = "hostname";
pub const F_USERNAME: &str = "username";
pub const F_PEER_REQ: &str = "peer.req";
pub const F_PEER_OK: &str = "peer.ok";
pub const F_SEND_MAC: &str = "send.mac";
pub const F_SEND_OK: &str = "send.ok";
pub const F_RECV_REQ: &str = "recv.req";
pub const F_RECV_MAC: &str = "recv.mac";
pub const F_RECV_OK: &str = "recv.ok";
pub const F_ACK_REQ: &str = "ack.req";
pub const F_ACK_MAC: &str = "ack.mac";

/// Static artifact names served over HTTP (spec §6).
pub const F_CA_PEM: &str = "ca.pem";
pub const F_VERIFY_PEM: &str = "verify.pem";
pub const F_MESSAGE_ENC: &str = "message.enc";
pub const F_SPEER_SIG: &str = "speer.sig";
pub const F_RPEER_SIG: &str = "rpeer.sig";
pub const F_USERNAME_FILE: &str = "username";
