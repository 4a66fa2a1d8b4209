//! Class and student records — the canonical document shape persisted by the store.

use crate::error::RosterError;
use crate::types::{Descriptor, ImageRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttendanceState {
    #[default]
    NotMarked,
    Present,
    /// Assigned by the teacher out-of-band; never written by the engine.
    Absent,
}

/// Per-student state machine position, derived from the stored fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Unenrolled,
    Enrolled,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassStatus {
    #[default]
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub sequence_number: u32,
    pub external_id: String,
    pub full_name: String,
    pub section_label: String,
    #[serde(default)]
    pub attendance_state: AttendanceState,
    /// Presence of the reference descriptor is the enrollment flag.
    #[serde(default)]
    pub reference_descriptor: Option<Descriptor>,
    #[serde(default)]
    pub reference_image: Option<ImageRef>,
    #[serde(default)]
    pub attendance_image: Option<ImageRef>,
    #[serde(default)]
    pub marked_at: Option<DateTime<Utc>>,
}

impl Student {
    pub fn enrollment_state(&self) -> EnrollmentState {
        if self.attendance_state == AttendanceState::Present {
            EnrollmentState::Present
        } else if self.reference_descriptor.is_some() {
            EnrollmentState::Enrolled
        } else {
            EnrollmentState::Unenrolled
        }
    }

    pub fn is_enrolled(&self) -> bool {
        self.reference_descriptor.is_some()
    }

    /// True if the identity fields of `self` and `other` match.
    pub fn same_identity(&self, other: &Student) -> bool {
        self.id == other.id
            && self.sequence_number == other.sequence_number
            && self.external_id == other.external_id
            && self.full_name == other.full_name
            && self.section_label == other.section_label
    }
}

/// A student record before it is assigned an id and placed in a roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    /// `None` appends after the roster's current maximum.
    pub sequence_number: Option<u32>,
    pub external_id: String,
    pub full_name: String,
    pub section_label: String,
}

impl NewStudent {
    pub fn new(
        external_id: impl Into<String>,
        full_name: impl Into<String>,
        section_label: impl Into<String>,
    ) -> Self {
        Self {
            sequence_number: None,
            external_id: external_id.into(),
            full_name: full_name.into(),
            section_label: section_label.into(),
        }
    }

    pub fn with_sequence(mut self, sequence_number: u32) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    pub join_code: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ClassStatus,
    /// Ordered by `sequence_number`.
    #[serde(default)]
    pub roster: Vec<Student>,
}

impl Class {
    pub fn new(display_name: impl Into<String>, join_code: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            join_code: join_code.into(),
            display_name: display_name.into(),
            created_at: Utc::now(),
            status: ClassStatus::Active,
            roster: Vec::new(),
        }
    }

    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.roster.iter().find(|s| s.id == student_id)
    }

    pub fn student_mut(&mut self, student_id: &str) -> Option<&mut Student> {
        self.roster.iter_mut().find(|s| s.id == student_id)
    }

    pub fn student_by_external_id(&self, external_id: &str) -> Option<&Student> {
        self.roster.iter().find(|s| s.external_id == external_id)
    }

    fn next_sequence_number(&self) -> u32 {
        self.roster
            .iter()
            .map(|s| s.sequence_number)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Append a batch of students, assigning ids and defaulted sequence numbers.
    ///
    /// The batch is all-or-nothing: any duplicate `external_id` or
    /// `sequence_number` (within the batch or against the roster) leaves the
    /// roster untouched. Defaulted numbers continue after the roster's
    /// maximum and skip every number given explicitly in the batch.
    pub fn add_students(&mut self, batch: Vec<NewStudent>) -> Result<Vec<Student>, RosterError> {
        let mut next_seq = self.next_sequence_number();
        let mut staged: Vec<Student> = Vec::with_capacity(batch.len());
        // Explicit numbers win over defaults regardless of row order.
        let reserved: HashSet<u32> = batch.iter().filter_map(|s| s.sequence_number).collect();

        for new in batch {
            let external_id = new.external_id.trim().to_string();
            let full_name = new.full_name.trim().to_string();
            let section_label = new.section_label.trim().to_string();
            for (field, value) in [
                ("external_id", &external_id),
                ("full_name", &full_name),
                ("section_label", &section_label),
            ] {
                if value.is_empty() {
                    return Err(RosterError::InvalidField {
                        field,
                        reason: "must not be blank".into(),
                    });
                }
            }

            let taken = |s: &Student| s.external_id == external_id;
            if self.roster.iter().any(taken) || staged.iter().any(taken) {
                return Err(RosterError::DuplicateExternalId(external_id));
            }

            let sequence_number = match new.sequence_number {
                Some(n) => n,
                None => {
                    while reserved.contains(&next_seq) {
                        next_seq += 1;
                    }
                    let assigned = next_seq;
                    next_seq += 1;
                    assigned
                }
            };
            let seq_taken = |s: &Student| s.sequence_number == sequence_number;
            if self.roster.iter().any(seq_taken) || staged.iter().any(seq_taken) {
                return Err(RosterError::DuplicateSequenceNumber(sequence_number));
            }

            staged.push(Student {
                id: uuid::Uuid::new_v4().to_string(),
                sequence_number,
                external_id,
                full_name,
                section_label,
                attendance_state: AttendanceState::NotMarked,
                reference_descriptor: None,
                reference_image: None,
                attendance_image: None,
                marked_at: None,
            });
        }

        self.roster.extend(staged.iter().cloned());
        self.roster.sort_by_key(|s| s.sequence_number);
        Ok(staged)
    }

    pub fn stats(&self) -> RosterStats {
        let mut stats = RosterStats {
            total: self.roster.len(),
            ..RosterStats::default()
        };
        for s in &self.roster {
            if s.is_enrolled() {
                stats.enrolled += 1;
            }
            match s.attendance_state {
                AttendanceState::Present => stats.present += 1,
                AttendanceState::Absent => stats.absent += 1,
                AttendanceState::NotMarked => stats.not_marked += 1,
            }
        }
        stats
    }
}

/// Aggregate counts shown on the teacher dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterStats {
    pub total: usize,
    pub enrolled: usize,
    pub present: usize,
    pub absent: usize,
    pub not_marked: usize,
}

/// A class document together with the store revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSnapshot {
    pub class: Class,
    pub revision: u64,
}
