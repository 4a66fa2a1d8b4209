//! The roster store — the single write path for class and student records.

use crate::document::{DocumentStore, WriteOutcome};
use rand::Rng;
use rollcall_core::{CapturedImage, Class, ClassSnapshot, ImageRef, RosterError, Student};
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry for revision conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Upper bound of the random pause before a retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    async fn pause(&self) {
        if self.backoff.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let max_ms = self.backoff.as_millis() as u64;
        let ms = rand::thread_rng().gen_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// A value written to the store together with the revision that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub value: T,
    pub revision: u64,
}

pub struct RosterStore<D> {
    docs: Arc<D>,
    retry: RetryPolicy,
}

impl<D> Clone for RosterStore<D> {
    fn clone(&self) -> Self {
        Self {
            docs: Arc::clone(&self.docs),
            retry: self.retry,
        }
    }
}

impl<D: DocumentStore> RosterStore<D> {
    pub fn new(docs: D) -> Self {
        Self::from_shared(Arc::new(docs))
    }

    pub fn from_shared(docs: Arc<D>) -> Self {
        Self {
            docs,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn documents(&self) -> &D {
        &self.docs
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn create_class(&self, class: Class) -> Result<Committed<Class>, RosterError> {
        let revision = self.docs.insert(&class).await?;
        tracing::info!(
            class_id = %class.id,
            join_code = %class.join_code,
            students = class.roster.len(),
            "class created"
        );
        Ok(Committed {
            value: class,
            revision,
        })
    }

    pub async fn get(&self, class_id: &str) -> Result<Class, RosterError> {
        Ok(self.poll(class_id).await?.class)
    }

    /// Case-sensitive exact match on the join code.
    pub async fn find_by_join_code(&self, join_code: &str) -> Result<Class, RosterError> {
        self.docs
            .fetch_by_join_code(join_code)
            .await?
            .map(|snap| snap.class)
            .ok_or_else(|| RosterError::ClassNotFound(join_code.to_string()))
    }

    /// Read the class together with its revision.
    pub async fn poll(&self, class_id: &str) -> Result<ClassSnapshot, RosterError> {
        self.docs
            .fetch(class_id)
            .await?
            .ok_or_else(|| RosterError::ClassNotFound(class_id.to_string()))
    }

    pub async fn list_classes(&self) -> Result<Vec<Class>, RosterError> {
        Ok(self.docs.list().await?.into_iter().map(|s| s.class).collect())
    }

    /// Apply `update` to the current authoritative student record and commit
    /// the whole class document.
    ///
    /// Every attempt re-reads the document; a write that finds a newer
    /// revision is retried against the fresh read, up to
    /// [`RetryPolicy::max_attempts`], then fails with `Conflict`. An error
    /// from `update` aborts without writing. Identity fields are restored
    /// if `update` touched them.
    pub async fn mutate_student<F, E>(
        &self,
        class_id: &str,
        student_id: &str,
        mut update: F,
    ) -> Result<Committed<Student>, E>
    where
        F: FnMut(&mut Student) -> Result<(), E>,
        E: From<RosterError>,
    {
        self.mutate_class::<_, Student, E>(class_id, |class| {
            let student = class
                .student_mut(student_id)
                .ok_or_else(|| RosterError::StudentNotFound(student_id.to_string()))?;
            let before = student.clone();
            update(student)?;
            if !student.same_identity(&before) {
                tracing::warn!(student_id, "update touched identity fields; restoring");
                student.id = before.id;
                student.sequence_number = before.sequence_number;
                student.external_id = before.external_id;
                student.full_name = before.full_name;
                student.section_label = before.section_label;
            }
            Ok(student.clone())
        })
        .await
    }

    /// Apply `update` to a fresh read of the class and commit it as a whole.
    ///
    /// Used for roster-structure changes (adding students, status); student
    /// fields go through [`mutate_student`](Self::mutate_student).
    pub async fn mutate_class<F, T, E>(&self, class_id: &str, mut update: F) -> Result<Committed<T>, E>
    where
        F: FnMut(&mut Class) -> Result<T, E>,
        E: From<RosterError>,
    {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let snapshot = self.poll(class_id).await?;
            let mut class = snapshot.class;
            let value = update(&mut class)?;

            match self.docs.replace(&class, snapshot.revision).await? {
                WriteOutcome::Committed { revision } => {
                    tracing::debug!(class_id, attempt, revision, "class document committed");
                    return Ok(Committed { value, revision });
                }
                WriteOutcome::Stale { current } => {
                    tracing::debug!(
                        class_id,
                        attempt,
                        read = snapshot.revision,
                        current,
                        "class document diverged; retrying"
                    );
                    if attempt < attempts {
                        self.retry.pause().await;
                    }
                }
                WriteOutcome::Missing => {
                    return Err(RosterError::ClassNotFound(class_id.to_string()).into());
                }
            }
        }

        tracing::warn!(class_id, attempts, "class write not reconciled");
        Err(RosterError::Conflict { attempts }.into())
    }

    pub async fn store_image(&self, image: &CapturedImage) -> Result<ImageRef, RosterError> {
        let image_ref = image.to_ref();
        self.docs.put_image(&image_ref.digest, &image.bytes).await?;
        Ok(image_ref)
    }

    pub async fn load_image(&self, image_ref: &ImageRef) -> Result<Vec<u8>, RosterError> {
        self.docs
            .fetch_image(&image_ref.digest)
            .await?
            .ok_or_else(|| RosterError::ImageNotFound(image_ref.digest.clone()))
    }
}
