///
/// Prepared statements with blocking execution and typed rows.
///
/// A [`Statement`] exclusively owns one compiled statement handle. Every
/// engine call that can report a shared-cache lock goes through the blocking
/// wrappers, and all typed parameter/row traffic goes through the marshalling
/// traits. The wrapper stores the engine's last status code; apart from the
/// sink write path, nothing here raises an error.
///

use std::ffi::CStr;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int};
use std::ptr;

use libsqlite3_sys::{
    sqlite3, sqlite3_clear_bindings, sqlite3_errstr, sqlite3_finalize, sqlite3_reset,
    sqlite3_stmt, SQLITE_DONE, SQLITE_ERROR, SQLITE_OK, SQLITE_ROW,
};

use crate::blocking::{blocking_prepare_v2, blocking_step};
use crate::error::SqliteError;
use crate::marshal::{Bind, BindTarget, Params, Row};

/// Exclusive owner of one compiled statement handle.
///
/// The handle is finalized exactly once, on drop; moving a `Statement`
/// transfers ownership, and overwriting one finalizes the handle it held.
/// A `Statement` is not `Send`: it must be driven from one thread at a time.
pub struct Statement {
    stmt: *mut sqlite3_stmt,
    rc: c_int,
}

impl Statement {
    /// Compiles the first statement found in `sql` and requires the rest of
    /// the input to be compile-clean: if the remainder contains a second
    /// meaningful statement, that statement is discarded and the status is
    /// forced to an error, while the first compiled statement stays usable.
    /// Trailing whitespace and comments are fine.
    ///
    /// # Safety
    ///
    /// `db` must be a valid connection that outlives the returned statement.
    pub unsafe fn new(db: *mut sqlite3, sql: &str) -> Statement {
        unsafe { Statement::prepare(db, sql, true) }
    }

    /// Compiles the first statement found in `sql` and never inspects the
    /// remaining text.
    ///
    /// # Safety
    ///
    /// `db` must be a valid connection that outlives the returned statement.
    pub unsafe fn new_first_only(db: *mut sqlite3, sql: &str) -> Statement {
        unsafe { Statement::prepare(db, sql, false) }
    }

    unsafe fn prepare(db: *mut sqlite3, sql: &str, must_compile_all: bool) -> Statement {
        let bytes = sql.as_bytes();
        let start = bytes.as_ptr() as *const c_char;
        let end = unsafe { start.add(bytes.len()) };

        let mut stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        let mut rc = unsafe {
            blocking_prepare_v2(db, start, bytes.len() as c_int, &mut stmt, &mut tail)
        };

        if rc == SQLITE_OK && must_compile_all {
            // One compiled statement per instance is the supported contract;
            // the remainder may only contain whitespace and comments.
            let mut cur = tail;
            while rc == SQLITE_OK && !cur.is_null() && cur < end {
                let mut extra = ptr::null_mut();
                let left = unsafe { end.offset_from(cur) } as c_int;
                rc = unsafe { blocking_prepare_v2(db, cur, left, &mut extra, &mut cur) };
                if !extra.is_null() {
                    unsafe { sqlite3_finalize(extra) };
                    rc = SQLITE_ERROR;
                }
            }
        }

        Statement { stmt, rc }
    }

    /// Clears accumulated execution state so the statement can run again.
    /// Bound parameter values are kept.
    pub fn reset(&mut self) {
        unsafe { sqlite3_reset(self.stmt) };
        self.rc = if self.stmt.is_null() { SQLITE_ERROR } else { SQLITE_OK };
    }

    /// Sets every parameter back to its unbound (NULL) default.
    pub fn clear_binds(&mut self) {
        if !self.stmt.is_null() {
            unsafe { sqlite3_clear_bindings(self.stmt) };
        }
    }

    /// Resets the statement and binds a parameter tuple, instructing the
    /// engine to copy variable-length data immediately. Returns false if any
    /// bind fails.
    pub fn bind_copy<P: Params>(&mut self, params: P) -> bool {
        self.reset();
        self.rc = unsafe { params.bind_all(self.stmt, true) };
        self.rc == SQLITE_OK
    }

    /// Resets the statement and binds a parameter tuple without copying
    /// variable-length data. Returns false if any bind fails.
    ///
    /// # Safety
    ///
    /// Every byte buffer reachable through `params` must stay valid through
    /// every step taken before the parameter is rebound, the bindings are
    /// cleared, or the statement is finalized.
    pub unsafe fn bind<P: Params>(&mut self, params: P) -> bool {
        self.reset();
        self.rc = unsafe { params.bind_all(self.stmt, false) };
        self.rc == SQLITE_OK
    }

    /// Resets the statement and binds one named or positioned parameter,
    /// copying variable-length data. The target can be a 1-based position
    /// or a parameter name such as `":x"`.
    pub fn set_copy<T: BindTarget, V: Bind>(&mut self, target: T, value: V) -> bool {
        self.reset();
        let pos = unsafe { target.resolve(self.stmt) };
        self.rc = unsafe { value.bind(self.stmt, pos, true) };
        self.rc == SQLITE_OK
    }

    /// Resets the statement and binds one named or positioned parameter
    /// without copying variable-length data.
    ///
    /// # Safety
    ///
    /// Same buffer-lifetime obligation as [`Statement::bind`].
    pub unsafe fn set<T: BindTarget, V: Bind>(&mut self, target: T, value: V) -> bool {
        self.reset();
        let pos = unsafe { target.resolve(self.stmt) };
        self.rc = unsafe { value.bind(self.stmt, pos, false) };
        self.rc == SQLITE_OK
    }

    /// Resets and runs the statement expecting no result rows. Returns true
    /// only on completion; a produced row or an error returns false and is
    /// left in the status.
    pub fn run(&mut self) -> bool {
        unsafe { sqlite3_reset(self.stmt) };
        self.rc = unsafe { blocking_step(self.stmt) };
        self.rc == SQLITE_DONE
    }

    /// Advances the statement once and reads the row if one was produced.
    /// Returns `None` when there are no more rows or an error occurred; the
    /// status distinguishes the two.
    ///
    /// View columns (`&str`, `&[u8]`) borrow from the statement and keep it
    /// borrowed until the row is dropped.
    pub fn get_row<'s, R: Row<'s>>(&'s mut self) -> Option<R> {
        self.rc = unsafe { blocking_step(self.stmt) };
        if self.rc == SQLITE_ROW {
            Some(unsafe { R::read(self.stmt) })
        } else {
            None
        }
    }

    /// Resets the statement and returns an iterator over its rows. The query
    /// re-runs from the beginning each time `rows()` is called; when the
    /// iterator stops, check [`Statement::done`] to tell completion from an
    /// error.
    ///
    /// Only owned row types can be iterated; view columns are limited to
    /// [`Statement::get_row`].
    ///
    /// ```ignore
    /// let mut stmt = unsafe { Statement::new(db, "select name, age from users;") };
    /// for (name, age) in stmt.rows::<(String, i64)>() {
    ///     println!("{name} is {age}");
    /// }
    /// ```
    pub fn rows<R>(&mut self) -> Rows<'_, R>
    where
        R: for<'s> Row<'s>,
    {
        self.reset();
        Rows {
            stmt: self,
            _cols: PhantomData,
        }
    }

    /// Returns a sink that turns each pushed tuple into a bind-and-run
    /// execution. The one hard-failure path of this type: a failed element
    /// is reported as an error carrying the engine's status text, since a
    /// bulk producer has no status field to poll per element.
    pub fn sink(&mut self) -> Sink<'_> {
        Sink { stmt: self }
    }

    /// True if the last operation reported success.
    pub fn ok(&self) -> bool {
        self.rc == SQLITE_OK
    }

    /// True if the last advance ran to completion.
    pub fn done(&self) -> bool {
        self.rc == SQLITE_DONE
    }

    /// The engine status code of the last operation.
    pub fn rc(&self) -> c_int {
        self.rc
    }

    /// Human-readable description of the last status code.
    pub fn errstr(&self) -> &'static str {
        unsafe { CStr::from_ptr(sqlite3_errstr(self.rc)) }
            .to_str()
            .unwrap_or("unknown error")
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // finalize is a no-op on null.
        unsafe { sqlite3_finalize(self.stmt) };
    }
}

/// Iterator over a statement's rows. Each `next()` advances the statement
/// once; iteration stops at the first non-row status.
pub struct Rows<'stmt, R> {
    stmt: &'stmt mut Statement,
    _cols: PhantomData<R>,
}

impl<R> Iterator for Rows<'_, R>
where
    R: for<'s> Row<'s>,
{
    type Item = R;

    fn next(&mut self) -> Option<R> {
        self.stmt.rc = unsafe { blocking_step(self.stmt.stmt) };
        if self.stmt.rc == SQLITE_ROW {
            Some(unsafe { R::read(self.stmt.stmt) })
        } else {
            None
        }
    }
}

/// Output sink over a statement: each pushed tuple is bound and executed.
pub struct Sink<'stmt> {
    stmt: &'stmt mut Statement,
}

impl Sink<'_> {
    /// Clears old bindings, binds `row` and runs the statement once.
    /// Fails if any bind fails, if the run errors, or if the statement
    /// unexpectedly produces a row.
    pub fn push<P: Params>(&mut self, row: P) -> Result<(), SqliteError> {
        self.stmt.clear_binds();
        self.stmt.reset();
        // The tuple outlives the run below, so reference binding is sound
        // here even for borrowed byte buffers.
        self.stmt.rc = unsafe { row.bind_all(self.stmt.stmt, false) };
        if self.stmt.rc != SQLITE_OK || !self.stmt.run() {
            return Err(SqliteError::from_rc(self.stmt.rc));
        }
        Ok(())
    }
}
