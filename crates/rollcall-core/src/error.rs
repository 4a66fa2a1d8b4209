use thiserror::Error;

/// Every recoverable outcome of a roster, engine or import operation.
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("no face detected in the captured image")]
    NoFaceDetected,
    #[error("more than one face detected in the captured image")]
    MultipleFacesDetected,
    #[error("face does not match the enrolled reference (distance {distance:.3} > threshold {threshold:.3})")]
    FaceMismatch { distance: f32, threshold: f32 },
    #[error("student already has a reference face")]
    AlreadyEnrolled,
    #[error("attendance already marked")]
    AlreadyMarked,
    #[error("student has no reference face")]
    NotEnrolled,
    #[error("class not found: {0}")]
    ClassNotFound(String),
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("write could not be reconciled after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("import is missing required column(s): {}", missing.join(", "))]
    ImportSchemaInvalid { missing: Vec<String> },
    #[error("join code already in use: {0}")]
    JoinCodeTaken(String),
    #[error("duplicate student id in roster: {0}")]
    DuplicateExternalId(String),
    #[error("duplicate sequence number in roster: {0}")]
    DuplicateSequenceNumber(u32),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("feature service failed: {0}")]
    FeatureService(String),
    #[error("store unavailable: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Flat classification of [`RosterError`] for matching and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoFaceDetected,
    MultipleFacesDetected,
    FaceMismatch,
    AlreadyEnrolled,
    AlreadyMarked,
    NotEnrolled,
    NotFound,
    Conflict,
    ImportSchemaInvalid,
    JoinCodeTaken,
    DuplicateRecord,
    InvalidField,
    FeatureService,
    Store,
}

impl RosterError {
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFaceDetected => ErrorKind::NoFaceDetected,
            Self::MultipleFacesDetected => ErrorKind::MultipleFacesDetected,
            Self::FaceMismatch { .. } => ErrorKind::FaceMismatch,
            Self::AlreadyEnrolled => ErrorKind::AlreadyEnrolled,
            Self::AlreadyMarked => ErrorKind::AlreadyMarked,
            Self::NotEnrolled => ErrorKind::NotEnrolled,
            Self::ClassNotFound(_) | Self::StudentNotFound(_) | Self::ImageNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::ImportSchemaInvalid { .. } => ErrorKind::ImportSchemaInvalid,
            Self::JoinCodeTaken(_) => ErrorKind::JoinCodeTaken,
            Self::DuplicateExternalId(_) | Self::DuplicateSequenceNumber(_) => {
                ErrorKind::DuplicateRecord
            }
            Self::InvalidField { .. } => ErrorKind::InvalidField,
            Self::FeatureService(_) => ErrorKind::FeatureService,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// True when the capture itself was unusable and a new capture may succeed.
    pub fn is_capture_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NoFaceDetected | ErrorKind::MultipleFacesDetected | ErrorKind::FaceMismatch
        )
    }

    /// Message shown to the person at the camera or dashboard.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 14] = [
        ErrorKind::NoFaceDetected,
        ErrorKind::MultipleFacesDetected,
        ErrorKind::FaceMismatch,
        ErrorKind::AlreadyEnrolled,
        ErrorKind::AlreadyMarked,
        ErrorKind::NotEnrolled,
        ErrorKind::NotFound,
        ErrorKind::Conflict,
        ErrorKind::ImportSchemaInvalid,
        ErrorKind::JoinCodeTaken,
        ErrorKind::DuplicateRecord,
        ErrorKind::InvalidField,
        ErrorKind::FeatureService,
        ErrorKind::Store,
    ];

    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::NoFaceDetected => "No face detected. Look straight at the camera and try again.",
            ErrorKind::MultipleFacesDetected => {
                "More than one face in view. Make sure only you are in the frame and try again."
            }
            ErrorKind::FaceMismatch => "Face does not match your reference photo. Please capture again.",
            ErrorKind::AlreadyEnrolled => "Your reference face is already registered.",
            ErrorKind::AlreadyMarked => "You have already checked in for this class.",
            ErrorKind::NotEnrolled => "Register your reference face before checking in.",
            ErrorKind::NotFound => "Class or student not found. Check the join code and student ID.",
            ErrorKind::Conflict => "The roster is busy with other check-ins. Please retry in a moment.",
            ErrorKind::ImportSchemaInvalid => {
                "The file must contain student ID, full name and section columns."
            }
            ErrorKind::JoinCodeTaken => "That join code is already used by another class.",
            ErrorKind::DuplicateRecord => "The roster already contains that student or sequence number.",
            ErrorKind::InvalidField => "Some required information is missing or invalid.",
            ErrorKind::FeatureService => "The captured image could not be processed. Please capture again.",
            ErrorKind::Store => "The roster could not be reached. Please try again.",
        }
    }
}
