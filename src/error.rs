///
/// Error type for the sink write path.
///
/// Everything else in this crate reports failures through the statement's
/// stored status code; only [`Sink::push`](crate::statement::Sink::push)
/// surfaces a hard error, because a bulk producer has no status channel to
/// poll per element.
///

use std::ffi::CStr;
use std::os::raw::c_int;

use libsqlite3_sys::sqlite3_errstr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("sqlite error {rc}: {message}")]
pub struct SqliteError {
    /// The engine status code that caused the failure.
    pub rc: c_int,
    /// The engine's description of that status code.
    pub message: String,
}

impl SqliteError {
    pub(crate) fn from_rc(rc: c_int) -> SqliteError {
        let message = unsafe { CStr::from_ptr(sqlite3_errstr(rc)) }
            .to_string_lossy()
            .into_owned();
        SqliteError { rc, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsqlite3_sys::SQLITE_ERROR;

    #[test]
    fn test_error_carries_status_text() {
        let err = SqliteError::from_rc(SQLITE_ERROR);
        assert_eq!(err.rc, SQLITE_ERROR);
        assert!(!err.message.is_empty());
        assert!(err.to_string().contains(&err.message));
    }
}
