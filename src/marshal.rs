///
/// Typed marshalling between Rust values and statement columns.
///
/// A closed, compile-time mapping: every supported semantic type implements
/// [`Column`] (read from a zero-based result column) and/or [`Bind`] (write
/// to a one-based parameter slot), and tuples of those types implement
/// [`Row`] and [`Params`] for whole-row reads and whole-list binds. No
/// runtime reflection and no dynamic dispatch; the registry is fixed at
/// compile time.
///

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uchar, c_void};

use libsqlite3_sys::{
    sqlite3_bind_blob64, sqlite3_bind_double, sqlite3_bind_int, sqlite3_bind_int64,
    sqlite3_bind_null, sqlite3_bind_parameter_index, sqlite3_bind_text64, sqlite3_bind_zeroblob,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_double, sqlite3_column_int,
    sqlite3_column_int64, sqlite3_column_text, sqlite3_column_type, sqlite3_stmt, sqlite3_uint64,
    SQLITE_NULL, SQLITE_OK, SQLITE_STATIC, SQLITE_TRANSIENT, SQLITE_UTF8,
};

/// Non-null empty-text surrogate. Binding a zero-length string must still
/// produce an empty TEXT value; passing a null data pointer to the bind call
/// would produce SQL NULL instead.
static NOTHING: c_char = 0;

/// Reads one typed value out of the current result row.
///
/// Owned implementations (`i32`, `i64`, `f64`, `String`, `Vec<u8>`,
/// `Option<T>`) copy out of the engine and stay valid past the next step.
/// The view implementations (`&str`, `&[u8]`) borrow the engine's column
/// buffer and are only valid until the next step, reset or finalize; their
/// lifetime parameter ties them to the statement borrow that produced them.
pub trait Column<'s>: Sized {
    /// Reads the value at zero-based column `pos`.
    ///
    /// # Safety
    ///
    /// `stmt` must be a valid statement handle whose most recent step
    /// produced a row.
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self;
}

/// Returns the column's text bytes, or an empty slice for NULL or
/// zero-length values. Never builds a slice from a null pointer.
unsafe fn text_slice<'a>(stmt: *mut sqlite3_stmt, pos: c_int) -> &'a [u8] {
    let data = unsafe { sqlite3_column_text(stmt, pos) };
    let len = unsafe { sqlite3_column_bytes(stmt, pos) };
    if data.is_null() || len <= 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len as usize) }
    }
}

/// Returns the column's blob bytes, or an empty slice for NULL or
/// zero-length values.
unsafe fn blob_slice<'a>(stmt: *mut sqlite3_stmt, pos: c_int) -> &'a [u8] {
    let data = unsafe { sqlite3_column_blob(stmt, pos) } as *const u8;
    let len = unsafe { sqlite3_column_bytes(stmt, pos) };
    if data.is_null() || len <= 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len as usize) }
    }
}

impl<'s> Column<'s> for i32 {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        unsafe { sqlite3_column_int(stmt, pos) }
    }
}

impl<'s> Column<'s> for i64 {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        unsafe { sqlite3_column_int64(stmt, pos) }
    }
}

impl<'s> Column<'s> for f64 {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        unsafe { sqlite3_column_double(stmt, pos) }
    }
}

impl<'s> Column<'s> for String {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        String::from_utf8_lossy(unsafe { text_slice(stmt, pos) }).into_owned()
    }
}

impl<'s> Column<'s> for Vec<u8> {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        unsafe { blob_slice(stmt, pos) }.to_vec()
    }
}

/// Non-owning text view; valid only until the next step, reset or finalize.
impl<'s> Column<'s> for &'s str {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        std::str::from_utf8(unsafe { text_slice(stmt, pos) }).unwrap_or("")
    }
}

/// Non-owning blob view; valid only until the next step, reset or finalize.
impl<'s> Column<'s> for &'s [u8] {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        unsafe { blob_slice(stmt, pos) }
    }
}

impl<'s, T: Column<'s>> Column<'s> for Option<T> {
    unsafe fn read(stmt: *mut sqlite3_stmt, pos: c_int) -> Self {
        if unsafe { sqlite3_column_type(stmt, pos) } == SQLITE_NULL {
            None
        } else {
            Some(unsafe { T::read(stmt, pos) })
        }
    }
}

/// Reads an ordered, fixed-arity row: component k is read from column k.
pub trait Row<'s>: Sized {
    /// # Safety
    ///
    /// Same contract as [`Column::read`]; the row must have at least as many
    /// columns as the tuple has components.
    unsafe fn read(stmt: *mut sqlite3_stmt) -> Self;
}

macro_rules! impl_row {
    ($($col:ident $idx:tt),+) => {
        impl<'s, $($col: Column<'s>),+> Row<'s> for ($($col,)+) {
            unsafe fn read(stmt: *mut sqlite3_stmt) -> Self {
                ($(unsafe { <$col as Column<'s>>::read(stmt, $idx) },)+)
            }
        }
    };
}

impl_row!(A 0);
impl_row!(A 0, B 1);
impl_row!(A 0, B 1, C 2);
impl_row!(A 0, B 1, C 2, D 3);
impl_row!(A 0, B 1, C 2, D 3, E 4);
impl_row!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_row!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_row!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Binds one typed value to a statement parameter.
pub trait Bind {
    /// Binds the value at one-based parameter `pos`. `copy` selects the
    /// binding mode for byte buffers: true instructs the engine to
    /// duplicate the bytes immediately (safe for transient buffers), false
    /// makes it reference the caller's buffer without copying.
    ///
    /// # Safety
    ///
    /// `stmt` must be a valid statement handle. In no-copy mode the buffer
    /// must stay valid for as long as the engine can still read it, that is
    /// through every step taken before the parameter is rebound, cleared or
    /// finalized; this is the caller's obligation and is not checked.
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, copy: bool) -> c_int;
}

impl Bind for i32 {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, _copy: bool) -> c_int {
        unsafe { sqlite3_bind_int(stmt, pos, *self) }
    }
}

impl Bind for i64 {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, _copy: bool) -> c_int {
        unsafe { sqlite3_bind_int64(stmt, pos, *self) }
    }
}

impl Bind for f64 {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, _copy: bool) -> c_int {
        unsafe { sqlite3_bind_double(stmt, pos, *self) }
    }
}

impl Bind for &str {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, copy: bool) -> c_int {
        let mode = if copy { SQLITE_TRANSIENT() } else { SQLITE_STATIC() };
        // Force a non-null pointer so a zero-length string binds as empty
        // TEXT rather than SQL NULL.
        let data = if self.is_empty() {
            &NOTHING as *const c_char
        } else {
            self.as_ptr() as *const c_char
        };
        unsafe {
            sqlite3_bind_text64(
                stmt,
                pos,
                data,
                self.len() as sqlite3_uint64,
                mode,
                SQLITE_UTF8 as c_uchar,
            )
        }
    }
}

impl Bind for String {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, copy: bool) -> c_int {
        unsafe { self.as_str().bind(stmt, pos, copy) }
    }
}

impl Bind for &[u8] {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, copy: bool) -> c_int {
        if self.is_empty() {
            // There is no non-null empty pointer contract for blobs; a
            // zero-length zeroblob produces the empty BLOB value.
            return unsafe { sqlite3_bind_zeroblob(stmt, pos, 0) };
        }
        let mode = if copy { SQLITE_TRANSIENT() } else { SQLITE_STATIC() };
        unsafe {
            sqlite3_bind_blob64(
                stmt,
                pos,
                self.as_ptr() as *const c_void,
                self.len() as sqlite3_uint64,
                mode,
            )
        }
    }
}

impl Bind for Vec<u8> {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, copy: bool) -> c_int {
        unsafe { self.as_slice().bind(stmt, pos, copy) }
    }
}

/// Marker that binds SQL NULL.
pub struct Null;

impl Bind for Null {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, _copy: bool) -> c_int {
        unsafe { sqlite3_bind_null(stmt, pos) }
    }
}

impl<T: Bind> Bind for Option<T> {
    unsafe fn bind(&self, stmt: *mut sqlite3_stmt, pos: c_int, copy: bool) -> c_int {
        match self {
            Some(value) => unsafe { value.bind(stmt, pos, copy) },
            None => unsafe { sqlite3_bind_null(stmt, pos) },
        }
    }
}

/// Binds an ordered, fixed-arity parameter list: component k is bound at
/// one-based position k+1, stopping at the first non-OK status.
pub trait Params {
    /// # Safety
    ///
    /// Same contract as [`Bind::bind`].
    unsafe fn bind_all(&self, stmt: *mut sqlite3_stmt, copy: bool) -> c_int;
}

impl Params for () {
    unsafe fn bind_all(&self, _stmt: *mut sqlite3_stmt, _copy: bool) -> c_int {
        SQLITE_OK
    }
}

macro_rules! impl_params {
    ($($par:ident $idx:tt),+) => {
        impl<$($par: Bind),+> Params for ($($par,)+) {
            unsafe fn bind_all(&self, stmt: *mut sqlite3_stmt, copy: bool) -> c_int {
                $(
                    // Parameters are one-indexed.
                    let rc = unsafe { self.$idx.bind(stmt, $idx + 1, copy) };
                    if rc != SQLITE_OK {
                        return rc;
                    }
                )+
                SQLITE_OK
            }
        }
    };
}

impl_params!(A 0);
impl_params!(A 0, B 1);
impl_params!(A 0, B 1, C 2);
impl_params!(A 0, B 1, C 2, D 3);
impl_params!(A 0, B 1, C 2, D 3, E 4);
impl_params!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_params!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_params!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// A bind target: either a one-based parameter position given directly, or
/// a parameter name resolved through the engine's name lookup.
pub trait BindTarget {
    /// Resolves to a one-based parameter position on `stmt`. Unresolvable
    /// names map to position 0, which the engine rejects with a range error.
    ///
    /// # Safety
    ///
    /// `stmt` must be a valid statement handle or null.
    unsafe fn resolve(&self, stmt: *mut sqlite3_stmt) -> c_int;
}

impl BindTarget for c_int {
    unsafe fn resolve(&self, _stmt: *mut sqlite3_stmt) -> c_int {
        *self
    }
}

impl BindTarget for usize {
    unsafe fn resolve(&self, _stmt: *mut sqlite3_stmt) -> c_int {
        *self as c_int
    }
}

impl BindTarget for &str {
    unsafe fn resolve(&self, stmt: *mut sqlite3_stmt) -> c_int {
        match CString::new(*self) {
            Ok(name) => unsafe { sqlite3_bind_parameter_index(stmt, name.as_ptr()) },
            Err(_) => 0,
        }
    }
}

impl BindTarget for String {
    unsafe fn resolve(&self, stmt: *mut sqlite3_stmt) -> c_int {
        unsafe { self.as_str().resolve(stmt) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    use libsqlite3_sys::{
        sqlite3, sqlite3_close, sqlite3_exec, sqlite3_finalize, sqlite3_open, SQLITE_DONE,
        SQLITE_ROW,
    };

    use crate::blocking::{blocking_prepare_v2, blocking_step};

    fn open_memory() -> *mut sqlite3 {
        let name = CString::new(":memory:").unwrap();
        let mut db = ptr::null_mut();
        let rc = unsafe { sqlite3_open(name.as_ptr(), &mut db) };
        assert_eq!(rc, SQLITE_OK);
        db
    }

    fn exec(db: *mut sqlite3, sql: &str) {
        let sql = CString::new(sql).unwrap();
        let rc = unsafe { sqlite3_exec(db, sql.as_ptr(), None, ptr::null_mut(), ptr::null_mut()) };
        assert_eq!(rc, SQLITE_OK);
    }

    fn prepare(db: *mut sqlite3, sql: &str) -> *mut libsqlite3_sys::sqlite3_stmt {
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
        stmt
    }

    #[test]
    fn test_scalar_roundtrip() {
        let db = open_memory();
        exec(db, "create table t(i integer, f real, s text, b blob)");

        let stmt = prepare(db, "insert into t values (?, ?, ?, ?)");
        let params = (42i64, 2.5f64, "hello", vec![1u8, 2, 3]);
        assert_eq!(unsafe { params.bind_all(stmt, true) }, SQLITE_OK);
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_DONE);
        unsafe { sqlite3_finalize(stmt) };

        let stmt = prepare(db, "select i, f, s, b from t");
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_ROW);
        let (i, f, s, b): (i64, f64, String, Vec<u8>) = unsafe { Row::read(stmt) };
        assert_eq!(i, 42);
        assert_eq!(f, 2.5);
        assert_eq!(s, "hello");
        assert_eq!(b, vec![1, 2, 3]);
        unsafe { sqlite3_finalize(stmt) };

        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_view_columns_borrow_row() {
        let db = open_memory();
        exec(db, "create table t(s text, b blob)");
        exec(db, "insert into t values ('view', x'beef')");

        let stmt = prepare(db, "select s, b from t");
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_ROW);
        let (s, b): (&str, &[u8]) = unsafe { Row::read(stmt) };
        assert_eq!(s, "view");
        assert_eq!(b, &[0xbe, 0xef]);
        unsafe { sqlite3_finalize(stmt) };

        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_nullable_roundtrip() {
        let db = open_memory();
        exec(db, "create table t(x integer, y text)");

        let stmt = prepare(db, "insert into t values (?, ?)");
        let params = (None::<i64>, Some("present"));
        assert_eq!(unsafe { params.bind_all(stmt, true) }, SQLITE_OK);
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_DONE);
        unsafe { sqlite3_finalize(stmt) };

        let stmt = prepare(db, "select x, y from t");
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_ROW);
        let (x, y): (Option<i64>, Option<String>) = unsafe { Row::read(stmt) };
        assert_eq!(x, None);
        assert_eq!(y, Some("present".to_string()));
        unsafe { sqlite3_finalize(stmt) };

        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_empty_string_and_blob_are_not_null() {
        let db = open_memory();
        exec(db, "create table t(s text, b blob)");

        let stmt = prepare(db, "insert into t values (?, ?)");
        let params = ("", Vec::<u8>::new());
        assert_eq!(unsafe { params.bind_all(stmt, true) }, SQLITE_OK);
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_DONE);
        unsafe { sqlite3_finalize(stmt) };

        let stmt = prepare(db, "select s, b from t");
        assert_eq!(unsafe { blocking_step(stmt) }, SQLITE_ROW);
        let (s, b): (Option<String>, Option<Vec<u8>>) = unsafe { Row::read(stmt) };
        assert_eq!(s, Some(String::new()));
        assert_eq!(b, Some(Vec::new()));
        unsafe { sqlite3_finalize(stmt) };

        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_params_short_circuit_on_bad_position() {
        let db = open_memory();
        exec(db, "create table t(x integer)");

        // Only one parameter slot; the second bind must fail with a range
        // error and stop the composition there.
        let stmt = prepare(db, "insert into t values (?)");
        let params = (1i64, 2i64);
        let rc = unsafe { params.bind_all(stmt, true) };
        assert_ne!(rc, SQLITE_OK);
        unsafe { sqlite3_finalize(stmt) };

        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }

    #[test]
    fn test_bind_target_name_lookup() {
        let db = open_memory();
        let stmt = prepare(db, "select :a + :b");
        assert_eq!(unsafe { ":a".resolve(stmt) }, 1);
        assert_eq!(unsafe { ":b".resolve(stmt) }, 2);
        assert_eq!(unsafe { ":missing".resolve(stmt) }, 0);
        assert_eq!(unsafe { 2i32.resolve(stmt) }, 2);
        unsafe { sqlite3_finalize(stmt) };
        assert_eq!(unsafe { sqlite3_close(db) }, SQLITE_OK);
    }
}
