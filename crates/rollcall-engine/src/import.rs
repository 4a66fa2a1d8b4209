//! Tabular roster import and export.
//!
//! Column discovery is header-driven: headers are trimmed, lower-cased and
//! matched against a small synonym set per logical column. File encodings
//! (spreadsheets, JSON) are the caller's concern; this module only sees rows
//! of cells.

use rollcall_core::{AttendanceState, Class, NewStudent, RosterError};

/// A header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Split raw rows into header and data. An empty input has no headers,
    /// which fails column discovery downstream.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let mut rows = rows.into_iter();
        let headers = rows.next().unwrap_or_default();
        Self {
            headers,
            rows: rows.collect(),
        }
    }

    /// Header row followed by data rows.
    pub fn into_rows(self) -> Vec<Vec<String>> {
        std::iter::once(self.headers).chain(self.rows).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    ExternalId,
    FullName,
    Section,
    Sequence,
}

impl Column {
    /// Resolution order: earlier columns claim a header first.
    const ALL: [Column; 4] = [
        Column::ExternalId,
        Column::FullName,
        Column::Section,
        Column::Sequence,
    ];

    fn name(self) -> &'static str {
        match self {
            Column::ExternalId => "external_id",
            Column::FullName => "full_name",
            Column::Section => "section_label",
            Column::Sequence => "sequence_number",
        }
    }

    fn synonyms(self) -> &'static [&'static str] {
        match self {
            Column::ExternalId => &["mssv", "mã số", "ma so", "student id", "external id", "externalid"],
            Column::FullName => &["họ tên", "ho ten", "tên", "ten", "full name", "fullname", "name"],
            Column::Section => &["lớp", "lop", "section", "class"],
            Column::Sequence => &["stt", "số thứ tự", "seq", "#", "no"],
        }
    }

    fn required(self) -> bool {
        !matches!(self, Column::Sequence)
    }
}

/// Short synonyms must match the whole header; longer ones may appear inside it.
fn header_matches(header: &str, synonym: &str) -> bool {
    header == synonym || (synonym.chars().count() >= 4 && header.contains(synonym))
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    external_id: usize,
    full_name: usize,
    section: usize,
    sequence: Option<usize>,
}

fn discover_columns(headers: &[String]) -> Result<ColumnMap, RosterError> {
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let mut claimed = vec![false; normalized.len()];
    let mut found = [None; 4];

    for (slot, column) in Column::ALL.iter().enumerate() {
        let hit = normalized.iter().enumerate().position(|(i, header)| {
            !claimed[i]
                && column
                    .synonyms()
                    .iter()
                    .any(|syn| header_matches(header, syn))
        });
        if let Some(i) = hit {
            claimed[i] = true;
            found[slot] = Some(i);
        }
    }

    let missing: Vec<String> = Column::ALL
        .iter()
        .zip(found.iter())
        .filter(|(column, idx)| column.required() && idx.is_none())
        .map(|(column, _)| column.name().to_string())
        .collect();

    match found {
        [Some(external_id), Some(full_name), Some(section), sequence] if missing.is_empty() => {
            Ok(ColumnMap {
                external_id,
                full_name,
                section,
                sequence,
            })
        }
        _ => Err(RosterError::ImportSchemaInvalid { missing }),
    }
}

/// Students read from a table, plus the count of rows dropped for a blank
/// required cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedImport {
    pub students: Vec<NewStudent>,
    pub dropped: usize,
}

/// Build student records from `table`.
///
/// A missing required column fails the whole import. Rows with a blank
/// required cell are dropped. Sequence numbers that are absent or not
/// positive integers are left for the roster to assign in import order.
pub fn parse_students(table: &Table) -> Result<ParsedImport, RosterError> {
    let columns = discover_columns(&table.headers)?;
    let mut parsed = ParsedImport::default();

    for row in &table.rows {
        let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or("");
        let (external_id, full_name, section) = (
            cell(columns.external_id),
            cell(columns.full_name),
            cell(columns.section),
        );
        if external_id.is_empty() || full_name.is_empty() || section.is_empty() {
            parsed.dropped += 1;
            continue;
        }

        let sequence_number = columns
            .sequence
            .and_then(|i| cell(i).parse::<u32>().ok())
            .filter(|n| *n > 0);

        parsed.students.push(NewStudent {
            sequence_number,
            external_id: external_id.to_string(),
            full_name: full_name.to_string(),
            section_label: section.to_string(),
        });
    }

    tracing::debug!(
        kept = parsed.students.len(),
        dropped = parsed.dropped,
        "parsed roster table"
    );
    Ok(parsed)
}

pub const EXPORT_HEADERS: [&str; 5] = ["Seq", "Student ID", "Full name", "Section", "Status"];

/// Attendance sheet for `class`. Students never marked are exported as absent.
pub fn export_table(class: &Class) -> Table {
    let rows = class
        .roster
        .iter()
        .map(|s| {
            let status = match s.attendance_state {
                AttendanceState::Present => "Present",
                AttendanceState::Absent | AttendanceState::NotMarked => "Absent",
            };
            vec![
                s.sequence_number.to_string(),
                s.external_id.clone(),
                s.full_name.clone(),
                s.section_label.clone(),
                status.to_string(),
            ]
        })
        .collect();

    Table {
        headers: EXPORT_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
    }
}
