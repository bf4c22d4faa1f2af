//! WebSocket close codes.
use std::collections::BTreeSet;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const GOING_AWAY: u16 = 1001;
pub const NO_STATUS: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const INTERNAL_ERROR: u16 = 1011;
/// Close code used to reject a handshake or an unmatched path.
pub const FORBIDDEN: u16 = 403;

/// Human readable reason for a registered close code.
pub fn reason(code: u16) -> Option<&'static str> {
    let reason = match code {
        1000 => "Normal Closure",
        1001 => "Going Away",
        1002 => "Protocol Error",
        1003 => "Unsupported Type",
        1005 => "No Status Code [Internal]",
        1006 => "Connection Closed Abnormally [Internal]",
        1007 => "Invalid Data",
        1008 => "Policy Violation",
        1009 => "Message Too Big",
        1010 => "Extension Required",
        1011 => "Internal Error",
        1015 => "TLS Failure [Internal]",
        _ => return None,
    };
    Some(reason)
}

/// Close codes a WebSocket view absorbs when the client disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCodes {
    All,
    Only(BTreeSet<u16>),
}

impl CloseCodes {
    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    pub fn only(codes: impl IntoIterator<Item = u16>) -> Self {
        Self::Only(codes.into_iter().collect())
    }

    pub fn contains(&self, code: u16) -> bool {
        match self {
            Self::All => true,
            Self::Only(codes) => codes.contains(&code),
        }
    }
}

impl Default for CloseCodes {
    fn default() -> Self {
        Self::only([NORMAL_CLOSURE, GOING_AWAY])
    }
}
