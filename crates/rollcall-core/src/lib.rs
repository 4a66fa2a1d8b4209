//! rollcall-core — Roster model, error taxonomy and the feature service boundary.
//!
//! Face descriptors come from a [`FeatureService`]; the baseline
//! [`ThumbnailExtractor`] runs behind a [`FeatureWorker`] thread.

pub mod error;
pub mod features;
pub mod roster;
pub mod thumbnail;
pub mod types;

pub use error::{ErrorKind, RosterError};
pub use features::{DescriptorExtractor, FeatureError, FeatureService, FeatureWorker};
pub use roster::{
    AttendanceState, Class, ClassSnapshot, ClassStatus, EnrollmentState, NewStudent, RosterStats,
    Student,
};
pub use thumbnail::ThumbnailExtractor;
pub use types::{CapturedImage, Descriptor, ImageRef};
