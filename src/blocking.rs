///
/// Blocking wrappers for the shared-cache SQLite API.
///
/// Under shared-cache locking, sqlite3_step(), sqlite3_prepare_v2() and
/// sqlite3_exec() never block on a table lock held by another connection;
/// they return SQLITE_LOCKED immediately. The wrappers here register for an
/// unlock-notify callback, block the calling thread until the lock holder
/// finishes its transaction, and retry the original call.
///
/// Pattern adapted from https://www.sqlite.org/unlock_notify.html
///

use std::os::raw::{c_char, c_int, c_void};
use std::sync::{Condvar, Mutex};

use libsqlite3_sys::{
    sqlite3, sqlite3_db_handle, sqlite3_exec, sqlite3_prepare_v2, sqlite3_reset, sqlite3_step,
    sqlite3_stmt, sqlite3_unlock_notify, SQLITE_LOCKED, SQLITE_OK,
};

/// Passed as the user-context pointer when registering for an unlock-notify
/// callback. One instance is created per wait and discarded afterwards.
struct UnlockNotification {
    /// True after the unlock event has occurred. Only ever set by the
    /// notification callback, and only while the mutex is held.
    fired: Mutex<bool>,
    cond: Condvar,
}

/// Unlock-notify callback registered with SQLite. The engine invokes it from
/// an arbitrary thread with a batch of contexts, one per blocked waiter.
unsafe extern "C" fn unlock_notify_cb(ap_arg: *mut *mut c_void, n_arg: c_int) {
    for i in 0..n_arg as usize {
        let un = unsafe { &*(*ap_arg.add(i) as *const UnlockNotification) };
        let mut fired = un.fired.lock().unwrap();
        *fired = true;
        un.cond.notify_all();
    }
}

/// Assumes an SQLite call on `db` has just returned SQLITE_LOCKED. Registers
/// for an unlock-notify callback and blocks until it is delivered, then
/// returns SQLITE_OK; the caller should retry the failed operation.
///
/// If the registration itself reports that blocking would deadlock the
/// system, returns SQLITE_LOCKED without waiting. The caller must not retry
/// and should roll back the current transaction instead.
unsafe fn wait_for_unlock_notify(db: *mut sqlite3) -> c_int {
    let un = UnlockNotification {
        fired: Mutex::new(false),
        cond: Condvar::new(),
    };

    let rc = unsafe {
        sqlite3_unlock_notify(
            db,
            Some(unlock_notify_cb),
            &un as *const UnlockNotification as *mut c_void,
        )
    };
    debug_assert!(rc == SQLITE_LOCKED || rc == SQLITE_OK);

    if rc == SQLITE_OK {
        tracing::trace!("waiting for unlock-notify");
        // The callback may already have fired; check the flag under the
        // mutex before waiting, and re-check after every wakeup.
        let mut fired = un.fired.lock().unwrap();
        while !*fired {
            fired = un.cond.wait(fired).unwrap();
        }
    } else {
        tracing::debug!("unlock-notify registration reported deadlock");
    }

    rc
}

/// Works like sqlite3_step(), except that when a required shared-cache lock
/// is held by another connection this function blocks until the lock becomes
/// available instead of returning SQLITE_LOCKED.
///
/// A SQLITE_LOCKED return from this function means the system would have
/// deadlocked; the caller should roll back the current transaction and try
/// again later.
///
/// # Safety
///
/// `stmt` must be a valid prepared-statement handle, or null (the engine
/// rejects null with SQLITE_MISUSE).
pub unsafe fn blocking_step(stmt: *mut sqlite3_stmt) -> c_int {
    loop {
        let rc = unsafe { sqlite3_step(stmt) };
        if rc != SQLITE_LOCKED {
            return rc;
        }
        let rc = unsafe { wait_for_unlock_notify(sqlite3_db_handle(stmt)) };
        if rc != SQLITE_OK {
            return rc;
        }
        // The lock failure leaves the compiled program intact, but the
        // engine requires a reset before the step can be retried.
        unsafe { sqlite3_reset(stmt) };
    }
}

/// Works like sqlite3_prepare_v2(), except that it blocks rather than
/// returning SQLITE_LOCKED when another connection holds a required
/// shared-cache lock. See [`blocking_step`] for the deadlock contract.
///
/// # Safety
///
/// `db` must be a valid connection; `sql` must point to `n_sql` readable
/// bytes; `out_stmt` must be a valid out-pointer; `out_tail` may be null.
pub unsafe fn blocking_prepare_v2(
    db: *mut sqlite3,
    sql: *const c_char,
    n_sql: c_int,
    out_stmt: *mut *mut sqlite3_stmt,
    out_tail: *mut *const c_char,
) -> c_int {
    loop {
        let rc = unsafe { sqlite3_prepare_v2(db, sql, n_sql, out_stmt, out_tail) };
        if rc != SQLITE_LOCKED {
            return rc;
        }
        let rc = unsafe { wait_for_unlock_notify(db) };
        if rc != SQLITE_OK {
            return rc;
        }
    }
}

/// Row callback used by [`blocking_exec`]; matches the sqlite3_exec()
/// callback signature.
pub type ExecCallback =
    unsafe extern "C" fn(*mut c_void, c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;

/// Works like sqlite3_exec(), except that it blocks rather than returning
/// SQLITE_LOCKED when another connection holds a required shared-cache lock.
/// See [`blocking_step`] for the deadlock contract.
///
/// # Safety
///
/// `db` must be a valid connection and `sql` a nul-terminated string;
/// `callback`, `arg` and `errmsg` follow the sqlite3_exec() contract.
pub unsafe fn blocking_exec(
    db: *mut sqlite3,
    sql: *const c_char,
    callback: Option<ExecCallback>,
    arg: *mut c_void,
    errmsg: *mut *mut c_char,
) -> c_int {
    loop {
        let rc = unsafe { sqlite3_exec(db, sql, callback, arg, errmsg) };
        if rc != SQLITE_LOCKED {
            return rc;
        }
        let rc = unsafe { wait_for_unlock_notify(db) };
        if rc != SQLITE_OK {
            return rc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    use libsqlite3_sys::{sqlite3_close, sqlite3_finalize, sqlite3_open, SQLITE_DONE, SQLITE_ROW};

    fn open_memory() -> *mut sqlite3 {
        let name = CString::new(":memory:").unwrap();
        let mut db = ptr::null_mut();
        let rc = unsafe { sqlite3_open(name.as_ptr(), &mut db) };
        assert_eq!(rc, SQLITE_OK);
        db
    }

    #[test]
    fn test_callback_sets_fired_flag() {
        let un = UnlockNotification {
            fired: Mutex::new(false),
            cond: Condvar::new(),
        };
        let mut arg = &un as *const UnlockNotification as *mut c_void;
        unsafe { unlock_notify_cb(&mut arg, 1) };
        assert!(*un.fired.lock().unwrap());
    }

    #[test]
    fn test_blocking_step_uncontended() {
        let db = open_memory();
        let sql = "select 1";
        let mut stmt = ptr::null_mut();
        let rc = unsafe {
            blocking_prepare_v2(
                db,
                sql.as_ptr() as *const c_char,
                sql.len() as c_int,
                &mut stmt,
                ptr::null_mut(),
            )
        };
        assert_eq!(rc, SQLITE_OK);
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_ROW);
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_DONE);
        unsafe { sqlite3_finalize(stmt) };
        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_blocking_prepare_reports_tail() {
        let db = open_memory();
        let sql = "select 1; select 2";
        let mut stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        let rc = unsafe {
            blocking_prepare_v2(
                db,
                sql.as_ptr() as *const c_char,
                sql.len() as c_int,
                &mut stmt,
                &mut tail,
            )
        };
        assert_eq!(rc, SQLITE_OK);
        assert!(!stmt.is_null());
        // The tail points just past the first statement's semicolon.
        let consumed = unsafe { tail.offset_from(sql.as_ptr() as *const c_char) };
        assert_eq!(consumed, "select 1;".len() as isize);
        unsafe { sqlite3_finalize(stmt) };
        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_blocking_exec_runs_script() {
        let db = open_memory();
        let sql = CString::new("create table t(x); insert into t values (1);").unwrap();
        let rc = unsafe {
            blocking_exec(db, sql.as_ptr(), None, ptr::null_mut(), ptr::null_mut())
        };
        assert_eq!(rc, SQLITE_OK);
        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }
}
