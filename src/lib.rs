///
/// blocking-sqlite - Blocking shared-cache SQLite with typed rows
///
/// Makes SQLite's non-blocking, callback-driven shared-cache locking behave
/// like simple synchronous calls, and marshals typed parameter and row
/// tuples in and out of prepared statements without runtime reflection.
///
/// Architecture:
/// - `blocking`: one-shot unlock-notify waits plus retry loops around
///   step/prepare/exec. Transient lock failures are absorbed; a would-be
///   deadlock is surfaced as SQLITE_LOCKED and must not be retried.
/// - `marshal`: compile-time type registry mapping Rust types to column
///   reads and parameter binds, with nullable wrapping via `Option` and
///   tuple composition for whole rows and parameter lists.
/// - `statement`: single-owner prepared-statement wrapper with binding,
///   one-shot execution, typed row fetch, row iteration and a bulk-write
///   sink.
/// - `script`: multi-statement script execution ignoring result rows.
///
/// Connections are external: this crate never opens or closes them, it only
/// passes the handle through. Bundled SQLite is compiled with
/// SQLITE_ENABLE_UNLOCK_NOTIFY; the blocking behavior only engages under
/// shared-cache locking.
///

pub mod blocking;
pub mod error;
pub mod marshal;
pub mod script;
pub mod statement;

pub use blocking::{blocking_exec, blocking_prepare_v2, blocking_step};
pub use error::SqliteError;
pub use marshal::{Bind, BindTarget, Column, Null, Params, Row};
pub use script::{exec, exec_rc};
pub use statement::{Rows, Sink, Statement};
