//! Enrollment and verification — the per-student state machine.
//!
//! ```text
//! Unenrolled --enroll--> Enrolled --verify--> Present
//! ```
//!
//! Every transition follows the same shape: check the current record, ask the
//! feature service for a descriptor, then commit through
//! [`RosterStore::mutate_student`], re-checking the state against the fresh
//! record inside the update. Nothing is written before the feature service
//! has answered, so dropping a call while it waits leaves the roster as it was.

use chrono::{DateTime, Utc};
use rollcall_core::{
    AttendanceState, CapturedImage, Class, Descriptor, EnrollmentState, FeatureService, ImageRef,
    RosterError, Student,
};
use rollcall_store::{DocumentStore, RosterStore};
use serde::Serialize;

/// Default maximum descriptor distance accepted as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// A committed transition and the revision that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub student: Student,
    pub revision: u64,
}

/// A successful check-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub student: Student,
    pub revision: u64,
    pub distance: f32,
}

/// Confirmation shown to a student after checking in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceTicket {
    pub class_name: String,
    pub join_code: String,
    pub sequence_number: u32,
    pub external_id: String,
    pub full_name: String,
    pub section_label: String,
    pub marked_at: Option<DateTime<Utc>>,
    pub attendance_image: Option<ImageRef>,
}

pub struct AttendanceEngine<D, F> {
    store: RosterStore<D>,
    features: F,
    threshold: f32,
}

fn check_enrollable(student: &Student) -> Result<(), RosterError> {
    match student.enrollment_state() {
        EnrollmentState::Unenrolled => Ok(()),
        EnrollmentState::Enrolled | EnrollmentState::Present => Err(RosterError::AlreadyEnrolled),
    }
}

/// Reference descriptor of a student who may check in now.
fn check_verifiable(student: &Student) -> Result<&Descriptor, RosterError> {
    let reference = student
        .reference_descriptor
        .as_ref()
        .ok_or(RosterError::NotEnrolled)?;
    match student.attendance_state {
        AttendanceState::NotMarked => Ok(reference),
        AttendanceState::Present | AttendanceState::Absent => Err(RosterError::AlreadyMarked),
    }
}

fn find_student<'a>(class: &'a Class, student_id: &str) -> Result<&'a Student, RosterError> {
    class
        .student(student_id)
        .ok_or_else(|| RosterError::StudentNotFound(student_id.to_string()))
}

impl<D: DocumentStore, F: FeatureService> AttendanceEngine<D, F> {
    pub fn new(store: RosterStore<D>, features: F) -> Self {
        Self {
            store,
            features,
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &RosterStore<D> {
        &self.store
    }

    /// Open the class a student was given the join code for.
    pub async fn join(&self, join_code: &str) -> Result<Class, RosterError> {
        let class = self.store.find_by_join_code(join_code.trim()).await?;
        tracing::debug!(class_id = %class.id, join_code = %class.join_code, "joined class");
        Ok(class)
    }

    /// Locate a student's own record by their external id.
    pub async fn select_student(&self, class_id: &str, external_id: &str) -> Result<Student, RosterError> {
        let external_id = external_id.trim();
        let class = self.store.get(class_id).await?;
        class
            .student_by_external_id(external_id)
            .cloned()
            .ok_or_else(|| RosterError::StudentNotFound(external_id.to_string()))
    }

    async fn descriptor_for(
        &self,
        class_id: &str,
        student_id: &str,
        image: &CapturedImage,
    ) -> Result<Descriptor, RosterError> {
        self.features.extract_descriptor(image).await.map_err(|err| {
            let err = RosterError::from(err);
            tracing::warn!(class_id, student_id, error = %err, "capture rejected");
            err
        })
    }

    /// Register `image` as the student's reference face.
    pub async fn enroll(
        &self,
        class_id: &str,
        student_id: &str,
        image: &CapturedImage,
    ) -> Result<Transition, RosterError> {
        let class = self.store.get(class_id).await?;
        check_enrollable(find_student(&class, student_id)?)?;

        let descriptor = self.descriptor_for(class_id, student_id, image).await?;
        let image_ref = self.store.store_image(image).await?;

        let committed = self
            .store
            .mutate_student(class_id, student_id, |s| {
                check_enrollable(s)?;
                s.reference_descriptor = Some(descriptor.clone());
                s.reference_image = Some(image_ref.clone());
                Ok::<_, RosterError>(())
            })
            .await?;

        tracing::info!(
            class_id,
            student_id,
            external_id = %committed.value.external_id,
            revision = committed.revision,
            "student enrolled"
        );
        Ok(Transition {
            student: committed.value,
            revision: committed.revision,
        })
    }

    /// Check the student in if `image` matches their reference face.
    pub async fn verify(
        &self,
        class_id: &str,
        student_id: &str,
        image: &CapturedImage,
    ) -> Result<Verification, RosterError> {
        let class = self.store.get(class_id).await?;
        let reference = check_verifiable(find_student(&class, student_id)?)?.clone();

        let probe = self.descriptor_for(class_id, student_id, image).await?;
        let distance = self.features.distance(&reference, &probe);
        if distance > self.threshold {
            tracing::warn!(
                class_id,
                student_id,
                distance,
                threshold = self.threshold,
                "face mismatch"
            );
            return Err(RosterError::FaceMismatch {
                distance,
                threshold: self.threshold,
            });
        }

        let image_ref = self.store.store_image(image).await?;
        let marked_at = Utc::now();

        let committed = self
            .store
            .mutate_student(class_id, student_id, |s| {
                check_verifiable(s)?;
                s.attendance_state = AttendanceState::Present;
                s.attendance_image = Some(image_ref.clone());
                s.marked_at = Some(marked_at);
                Ok::<_, RosterError>(())
            })
            .await?;

        tracing::info!(
            class_id,
            student_id,
            external_id = %committed.value.external_id,
            distance,
            revision = committed.revision,
            "attendance marked"
        );
        Ok(Verification {
            student: committed.value,
            revision: committed.revision,
            distance,
        })
    }

    /// The check-in confirmation, or `None` while the student is not present.
    pub async fn ticket(&self, class_id: &str, student_id: &str) -> Result<Option<AttendanceTicket>, RosterError> {
        let class = self.store.get(class_id).await?;
        let student = find_student(&class, student_id)?;
        if student.attendance_state != AttendanceState::Present {
            return Ok(None);
        }
        Ok(Some(AttendanceTicket {
            class_name: class.display_name.clone(),
            join_code: class.join_code.clone(),
            sequence_number: student.sequence_number,
            external_id: student.external_id.clone(),
            full_name: student.full_name.clone(),
            section_label: student.section_label.clone(),
            marked_at: student.marked_at,
            attendance_image: student.attendance_image.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFeatures;
    use rollcall_core::{ErrorKind, FeatureError, NewStudent};
    use rollcall_store::{MemoryDocumentStore, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    const REFERENCE: &[u8] = b"reference";
    const CLOSE: &[u8] = b"close";
    const FAR: &[u8] = b"far";
    const EMPTY: &[u8] = b"empty";
    const CROWD: &[u8] = b"crowd";
    const STALLED: &[u8] = b"stalled";

    fn features() -> ScriptedFeatures {
        ScriptedFeatures::new()
            .face(REFERENCE, vec![0.0])
            .face(CLOSE, vec![0.3])
            .face(FAR, vec![0.7])
            .reject(EMPTY, FeatureError::NoFace)
            .reject(CROWD, FeatureError::MultipleFaces(2))
            .hang(STALLED)
    }

    async fn engine_with(n: usize) -> (AttendanceEngine<MemoryDocumentStore, ScriptedFeatures>, Class) {
        let store = RosterStore::new(MemoryDocumentStore::new());
        let mut class = Class::new("Web Programming", "WEB2024");
        class
            .add_students(
                (1..=n)
                    .map(|i| NewStudent::new(format!("A{i}"), format!("Student {i}"), "K1"))
                    .collect(),
            )
            .unwrap();
        let class = store.create_class(class).await.unwrap().value;
        (AttendanceEngine::new(store, features()), class)
    }

    fn img(bytes: &[u8]) -> CapturedImage {
        CapturedImage::new(bytes.to_vec())
    }

    #[tokio::test]
    async fn test_join_enroll_verify_scenario() {
        let (engine, _) = engine_with(2).await;

        let class = engine.join("WEB2024").await.unwrap();
        let student = engine.select_student(&class.id, "A1").await.unwrap();
        assert_eq!(student.enrollment_state(), EnrollmentState::Unenrolled);

        let enrolled = engine.enroll(&class.id, &student.id, &img(REFERENCE)).await.unwrap();
        assert_eq!(enrolled.student.enrollment_state(), EnrollmentState::Enrolled);
        assert_eq!(enrolled.revision, 2);

        let verified = engine.verify(&class.id, &student.id, &img(CLOSE)).await.unwrap();
        assert!((verified.distance - 0.3).abs() < 1e-6);
        assert_eq!(verified.student.enrollment_state(), EnrollmentState::Present);
        assert!(verified.student.marked_at.is_some());
        assert_eq!(verified.student.attendance_image, Some(img(CLOSE).to_ref()));

        let err = engine.verify(&class.id, &student.id, &img(CLOSE)).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyMarked));
        assert_eq!(engine.store().poll(&class.id).await.unwrap().revision, 3);
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let (engine, _) = engine_with(1).await;
        let err = engine.join("NOPE").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_select_unknown_student() {
        let (engine, class) = engine_with(1).await;
        let err = engine.select_student(&class.id, "Z9").await.unwrap_err();
        assert!(matches!(err, RosterError::StudentNotFound(id) if id == "Z9"));
    }

    #[tokio::test]
    async fn test_enroll_twice_keeps_first_reference() {
        let (engine, class) = engine_with(1).await;
        let sid = class.roster[0].id.clone();
        engine.enroll(&class.id, &sid, &img(REFERENCE)).await.unwrap();

        let err = engine.enroll(&class.id, &sid, &img(FAR)).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyEnrolled));

        let stored = engine.select_student(&class.id, "A1").await.unwrap();
        assert_eq!(stored.reference_descriptor, Some(Descriptor::new(vec![0.0])));
        assert_eq!(stored.reference_image, Some(img(REFERENCE).to_ref()));
    }

    #[tokio::test]
    async fn test_enroll_rejects_unusable_captures() {
        let (engine, class) = engine_with(1).await;
        let sid = class.roster[0].id.clone();

        let err = engine.enroll(&class.id, &sid, &img(EMPTY)).await.unwrap_err();
        assert!(matches!(err, RosterError::NoFaceDetected));
        let err = engine.enroll(&class.id, &sid, &img(CROWD)).await.unwrap_err();
        assert!(matches!(err, RosterError::MultipleFacesDetected));
        assert!(err.is_capture_rejection());

        let snap = engine.store().poll(&class.id).await.unwrap();
        assert_eq!(snap.revision, 1);
        assert_eq!(snap.class.roster[0].enrollment_state(), EnrollmentState::Unenrolled);
    }

    #[tokio::test]
    async fn test_verify_requires_enrollment() {
        let (engine, class) = engine_with(1).await;
        let err = engine
            .verify(&class.id, &class.roster[0].id, &img(CLOSE))
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::NotEnrolled));
    }

    #[tokio::test]
    async fn test_verify_mismatch_leaves_student_enrolled() {
        let (engine, class) = engine_with(1).await;
        let sid = class.roster[0].id.clone();
        engine.enroll(&class.id, &sid, &img(REFERENCE)).await.unwrap();

        let err = engine.verify(&class.id, &sid, &img(FAR)).await.unwrap_err();
        match err {
            RosterError::FaceMismatch { distance, threshold } => {
                assert!((distance - 0.7).abs() < 1e-6);
                assert_eq!(threshold, DEFAULT_MATCH_THRESHOLD);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = engine.verify(&class.id, &sid, &img(EMPTY)).await.unwrap_err();
        assert!(matches!(err, RosterError::NoFaceDetected));

        let stored = engine.select_student(&class.id, "A1").await.unwrap();
        assert_eq!(stored.enrollment_state(), EnrollmentState::Enrolled);
        assert!(stored.marked_at.is_none());
    }

    #[tokio::test]
    async fn test_distance_equal_to_threshold_is_a_match() {
        let store = RosterStore::new(MemoryDocumentStore::new());
        let mut class = Class::new("c", "C1");
        class.add_students(vec![NewStudent::new("A1", "a", "K1")]).unwrap();
        let class = store.create_class(class).await.unwrap().value;
        let engine = AttendanceEngine::new(
            store,
            ScriptedFeatures::new()
                .face(REFERENCE, vec![0.0])
                .face(CLOSE, vec![0.5]),
        )
        .with_threshold(0.5);

        let sid = class.roster[0].id.clone();
        engine.enroll(&class.id, &sid, &img(REFERENCE)).await.unwrap();
        let verified = engine.verify(&class.id, &sid, &img(CLOSE)).await.unwrap();
        assert_eq!(verified.distance, 0.5);
    }

    #[tokio::test]
    async fn test_state_checked_before_capture() {
        let (engine, class) = engine_with(2).await;
        let (a1, a2) = (class.roster[0].id.clone(), class.roster[1].id.clone());

        // A stalled capture would hang if the feature service were consulted.
        let err = engine.verify(&class.id, &a1, &img(STALLED)).await.unwrap_err();
        assert!(matches!(err, RosterError::NotEnrolled));

        engine.enroll(&class.id, &a2, &img(REFERENCE)).await.unwrap();
        engine.verify(&class.id, &a2, &img(CLOSE)).await.unwrap();
        let err = engine.verify(&class.id, &a2, &img(EMPTY)).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyMarked));
        let err = engine.verify(&class.id, &a2, &img(FAR)).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyMarked));
        let err = engine.enroll(&class.id, &a2, &img(STALLED)).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyEnrolled));
    }

    #[tokio::test]
    async fn test_absent_student_cannot_check_in() {
        let (engine, class) = engine_with(1).await;
        let sid = class.roster[0].id.clone();
        engine.enroll(&class.id, &sid, &img(REFERENCE)).await.unwrap();
        engine
            .store()
            .mutate_student(&class.id, &sid, |s| {
                s.attendance_state = AttendanceState::Absent;
                Ok::<_, RosterError>(())
            })
            .await
            .unwrap();

        let err = engine.verify(&class.id, &sid, &img(CLOSE)).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyMarked));
    }

    #[tokio::test]
    async fn test_abandoned_enroll_writes_nothing() {
        let (engine, class) = engine_with(1).await;
        let sid = class.roster[0].id.clone();

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            engine.enroll(&class.id, &sid, &img(STALLED)),
        )
        .await;
        assert!(result.is_err());

        let snap = engine.store().poll(&class.id).await.unwrap();
        assert_eq!(snap.revision, 1);
        assert_eq!(engine.store().documents().write_count(), 1);
        assert!(!snap.class.roster[0].is_enrolled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_check_ins_all_land() {
        const N: usize = 6;
        let (engine, class) = engine_with(N).await;
        let engine = Arc::new(AttendanceEngine {
            store: engine.store.with_retry(RetryPolicy {
                max_attempts: 2 * N as u32,
                backoff: Duration::from_millis(2),
            }),
            features: engine.features,
            threshold: engine.threshold,
        });
        for student in &class.roster {
            engine.enroll(&class.id, &student.id, &img(REFERENCE)).await.unwrap();
        }

        let mut tasks = Vec::new();
        for student in class.roster.clone() {
            let engine = Arc::clone(&engine);
            let class_id = class.id.clone();
            tasks.push(tokio::spawn(async move {
                engine.verify(&class_id, &student.id, &img(CLOSE)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = engine.store().get(&class.id).await.unwrap().stats();
        assert_eq!(stats.present, N);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_student_race_marks_once() {
        let (engine, class) = engine_with(1).await;
        let engine = Arc::new(engine);
        let sid = class.roster[0].id.clone();
        engine.enroll(&class.id, &sid, &img(REFERENCE)).await.unwrap();

        let spawn_verify = || {
            let engine = Arc::clone(&engine);
            let (class_id, sid) = (class.id.clone(), sid.clone());
            tokio::spawn(async move { engine.verify(&class_id, &sid, &img(CLOSE)).await })
        };
        let (a, b) = (spawn_verify(), spawn_verify());
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(RosterError::AlreadyMarked))));
        assert_eq!(engine.store().poll(&class.id).await.unwrap().revision, 3);
    }

    #[tokio::test]
    async fn test_ticket_after_check_in() {
        let (engine, class) = engine_with(2).await;
        let sid = class.roster[1].id.clone();
        assert_eq!(engine.ticket(&class.id, &sid).await.unwrap(), None);

        engine.enroll(&class.id, &sid, &img(REFERENCE)).await.unwrap();
        let verified = engine.verify(&class.id, &sid, &img(CLOSE)).await.unwrap();

        let ticket = engine.ticket(&class.id, &sid).await.unwrap().unwrap();
        assert_eq!(ticket.class_name, "Web Programming");
        assert_eq!(ticket.join_code, "WEB2024");
        assert_eq!(ticket.sequence_number, 2);
        assert_eq!(ticket.external_id, "A2");
        assert_eq!(ticket.marked_at, verified.student.marked_at);
        assert_eq!(
            engine.store().load_image(ticket.attendance_image.as_ref().unwrap()).await.unwrap(),
            CLOSE
        );
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_store_error() {
        let (engine, class) = engine_with(1).await;
        engine.store().documents().set_offline(true);
        let err = engine
            .enroll(&class.id, &class.roster[0].id, &img(REFERENCE))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
