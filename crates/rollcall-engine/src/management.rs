//! Teacher-side roster management: classes, students, bulk import and export.

use crate::import::{self, Table};
use rollcall_core::{Class, ClassStatus, ImageRef, NewStudent, RosterError, RosterStats, Student};
use rollcall_store::{Committed, DocumentStore, RosterStore};

/// Outcome of a bulk import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub added: Vec<Student>,
    /// Rows skipped for a blank required cell.
    pub dropped: usize,
    pub revision: u64,
}

pub struct RosterManager<D> {
    store: RosterStore<D>,
}

impl<D: DocumentStore> RosterManager<D> {
    pub fn new(store: RosterStore<D>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RosterStore<D> {
        &self.store
    }

    pub async fn create_class(
        &self,
        display_name: &str,
        join_code: &str,
        students: Vec<NewStudent>,
    ) -> Result<Committed<Class>, RosterError> {
        let (display_name, join_code) = (display_name.trim(), join_code.trim());
        if display_name.is_empty() {
            return Err(RosterError::InvalidField {
                field: "display_name",
                reason: "must not be blank".into(),
            });
        }
        if join_code.is_empty() {
            return Err(RosterError::InvalidField {
                field: "join_code",
                reason: "must not be blank".into(),
            });
        }

        let mut class = Class::new(display_name, join_code);
        class.add_students(students)?;
        self.store.create_class(class).await
    }

    /// Add one student by hand. Without a sequence number it goes after the
    /// current last one.
    pub async fn add_student(&self, class_id: &str, student: NewStudent) -> Result<Committed<Student>, RosterError> {
        let external_id = student.external_id.trim().to_string();
        let committed = self
            .store
            .mutate_class(class_id, |class| {
                class
                    .add_students(vec![student.clone()])?
                    .pop()
                    .ok_or_else(|| RosterError::StudentNotFound(external_id.clone()))
            })
            .await?;
        tracing::info!(
            class_id,
            external_id = %committed.value.external_id,
            sequence_number = committed.value.sequence_number,
            revision = committed.revision,
            "student added"
        );
        Ok(committed)
    }

    /// Append every usable row of `table` to the roster in one write.
    ///
    /// A missing column or a duplicate student rejects the whole import.
    pub async fn import_students(&self, class_id: &str, table: &Table) -> Result<ImportReport, RosterError> {
        let parsed = import::parse_students(table)?;

        if parsed.students.is_empty() {
            let revision = self.store.poll(class_id).await?.revision;
            tracing::info!(class_id, dropped = parsed.dropped, "import had no usable rows");
            return Ok(ImportReport {
                added: Vec::new(),
                dropped: parsed.dropped,
                revision,
            });
        }

        let committed = self
            .store
            .mutate_class(class_id, |class| class.add_students(parsed.students.clone()))
            .await?;
        tracing::info!(
            class_id,
            added = committed.value.len(),
            dropped = parsed.dropped,
            revision = committed.revision,
            "roster imported"
        );
        Ok(ImportReport {
            added: committed.value,
            dropped: parsed.dropped,
            revision: committed.revision,
        })
    }

    /// Newest first.
    pub async fn list_classes(&self) -> Result<Vec<Class>, RosterError> {
        self.store.list_classes().await
    }

    pub async fn get(&self, class_id: &str) -> Result<Class, RosterError> {
        self.store.get(class_id).await
    }

    pub async fn find(&self, join_code: &str) -> Result<Class, RosterError> {
        self.store.find_by_join_code(join_code.trim()).await
    }

    pub async fn complete_class(&self, class_id: &str) -> Result<Committed<ClassStatus>, RosterError> {
        let committed = self
            .store
            .mutate_class(class_id, |class| {
                class.status = ClassStatus::Completed;
                Ok::<_, RosterError>(class.status)
            })
            .await?;
        tracing::info!(class_id, revision = committed.revision, "class completed");
        Ok(committed)
    }

    pub async fn stats(&self, class_id: &str) -> Result<RosterStats, RosterError> {
        Ok(self.store.get(class_id).await?.stats())
    }

    pub async fn export_rows(&self, class_id: &str) -> Result<Table, RosterError> {
        Ok(import::export_table(&self.store.get(class_id).await?))
    }

    pub async fn load_image(&self, image_ref: &ImageRef) -> Result<Vec<u8>, RosterError> {
        self.store.load_image(image_ref).await
    }
}
