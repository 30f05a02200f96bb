//! Control protocol responses
//!
//! Defines reply codes and formatting.

pub const HANDLE_OPENED: u16 = 150;
pub const OK: u16 = 200;
pub const READY: u16 = 220;
pub const GOODBYE: u16 = 221;
pub const CALLER_ACCEPTED: u16 = 230;
pub const TOO_MANY_SESSIONS: u16 = 421;
pub const LOCAL_ERROR: u16 = 450;
pub const INDEX_UNAVAILABLE: u16 = 451;
pub const SYNTAX_ERROR: u16 = 500;
pub const ALREADY_EXISTS: u16 = 521;
pub const NOT_AUTHENTICATED: u16 = 530;
pub const NOT_FOUND: u16 = 550;
pub const PERMISSION_DENIED: u16 = 553;
pub const INVALID_RENAME: u16 = 554;
pub const OWNERSHIP_CONFLICT: u16 = 555;

/// Format a reply line
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Reply code at the start of a reply line, if any.
pub fn reply_code(line: &str) -> Option<u16> {
    line.get(..3)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_read_back() {
        let line = format_response(PERMISSION_DENIED, "no");
        assert_eq!(line, "553 no\r\n");
        assert_eq!(reply_code(&line), Some(PERMISSION_DENIED));
        assert_eq!(reply_code("ok"), None);
    }
}
