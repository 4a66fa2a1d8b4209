//! rollcall-engine — Attendance flows on top of the roster store.
//!
//! [`AttendanceEngine`] drives the student side (join, enroll, verify,
//! ticket); [`RosterManager`] the teacher side (classes, imports, exports).

pub mod config;
pub mod engine;
pub mod import;
pub mod management;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError};
pub use engine::{AttendanceEngine, AttendanceTicket, Transition, Verification, DEFAULT_MATCH_THRESHOLD};
pub use import::{export_table, parse_students, ParsedImport, Table, EXPORT_HEADERS};
pub use management::{ImportReport, RosterManager};
