///
/// Multi-statement script execution.
///

use std::os::raw::{c_char, c_int};
use std::ptr;

use libsqlite3_sys::{sqlite3, sqlite3_finalize, SQLITE_DONE, SQLITE_OK, SQLITE_ROW};

use crate::blocking::{blocking_prepare_v2, blocking_step};

/// Executes a script that may contain several statements, ignoring any
/// result rows, and returns the engine status code. The script is compiled
/// and run statement by statement so that non-nul-terminated slices are
/// accepted; execution stops at the first statement that fails to compile
/// or run to completion.
///
/// # Safety
///
/// `db` must be a valid connection.
pub unsafe fn exec_rc(db: *mut sqlite3, script: &str) -> c_int {
    let bytes = script.as_bytes();
    let mut cur = bytes.as_ptr() as *const c_char;
    let end = unsafe { cur.add(bytes.len()) };

    while cur < end {
        // Compile the next available statement.
        let mut stmt = ptr::null_mut();
        let left = unsafe { end.offset_from(cur) } as c_int;
        let mut rc = unsafe { blocking_prepare_v2(db, cur, left, &mut stmt, &mut cur) };
        if rc == SQLITE_OK {
            if stmt.is_null() {
                continue; // Whitespace or comments only, skip.
            }
            // Drain the statement, ignoring all rows, until it is done.
            loop {
                rc = unsafe { blocking_step(stmt) };
                if rc != SQLITE_ROW {
                    break;
                }
            }
        }
        // Always finalize, even on error, so no handle leaks.
        unsafe { sqlite3_finalize(stmt) };
        if rc != SQLITE_OK && rc != SQLITE_DONE {
            return rc;
        }
    }
    SQLITE_OK
}

/// Executes a script that may contain several statements, ignoring any
/// result rows. Returns true if every statement compiled and ran to
/// completion.
///
/// # Safety
///
/// `db` must be a valid connection.
pub unsafe fn exec(db: *mut sqlite3, script: &str) -> bool {
    unsafe { exec_rc(db, script) == SQLITE_OK }
}
