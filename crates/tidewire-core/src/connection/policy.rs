// ── Close-code policy ──
//
// Decides what an unexpected close means. Normal closes end the session
// quietly, protocol and credential failures are terminal, and everything
// else earns one delayed reconnect attempt.

use serde::Serialize;
use strum::Display;

/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// The connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum CloseClass {
    /// 1000 / 1001: the peer meant to close.
    Normal,
    /// Protocol violation or rejected credentials; reconnecting cannot help.
    Fatal,
    /// Anything else, including abnormal drops.
    Retryable,
}

pub fn classify_close(code: u16) -> CloseClass {
    match code {
        1000 | 1001 => CloseClass::Normal,
        // protocol error, unsupported data, invalid payload, policy
        // violation, missing extension, unauthorized, forbidden
        1002 | 1003 | 1007 | 1008 | 1010 | 4001 | 4003 => CloseClass::Fatal,
        _ => CloseClass::Retryable,
    }
}
