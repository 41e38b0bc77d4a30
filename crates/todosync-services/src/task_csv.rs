//! CSV import and export of task records.
//!
//! One header row, then one row per task, rows ending with `\r`. Timestamps
//! are epoch seconds (fractional up to milliseconds), normal importance is an
//! empty cell and an empty category name means "No category". On import,
//! rows that don't describe a valid task are skipped with a warning.

use std::io;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{validate_text, Category, Importance, Task, TaskId};

/// Header row, in column order.
pub const COLUMNS: [&str; 10] = [
    "id",
    "text",
    "importance",
    "deadline",
    "is_done",
    "created_at",
    "changed_at",
    "color",
    "category_name",
    "category_color",
];

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("CSV I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    id: String,
    text: String,
    importance: Option<String>,
    deadline: Option<f64>,
    is_done: bool,
    created_at: f64,
    changed_at: Option<f64>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    category_color: Option<String>,
}

impl Row {
    fn from_task(task: &Task) -> Self {
        let importance = match task.importance {
            Importance::Normal => None,
            other => Some(other.as_wire().to_string()),
        };
        let (category_name, category_color) = if task.category == Category::uncategorized() {
            (None, None)
        } else {
            (Some(task.category.name.clone()), task.category.color.clone())
        };

        Self {
            id: task.id.to_string(),
            text: task.text.clone(),
            importance,
            deadline: task.deadline.map(to_epoch),
            is_done: task.done,
            created_at: to_epoch(task.created_at),
            changed_at: task.changed_at.map(to_epoch),
            color: task.color.clone(),
            category_name,
            category_color,
        }
    }

    fn into_task(self) -> Result<Task, CsvError> {
        let id: TaskId =
            self.id.parse().map_err(|_| CsvError::InvalidRow(format!("bad id {:?}", self.id)))?;
        validate_text(&self.text).map_err(|e| CsvError::InvalidRow(e.to_string()))?;

        let importance = match self.importance.as_deref() {
            None | Some("") => Importance::Normal,
            Some(name) => Importance::from_wire(name)
                .ok_or_else(|| CsvError::InvalidRow(format!("unknown importance {:?}", name)))?,
        };

        let category = match self.category_name {
            Some(name) if !name.is_empty() => Category { name, color: self.category_color },
            _ => Category::uncategorized(),
        };

        Ok(Task {
            id,
            text: self.text,
            importance,
            deadline: self.deadline.map(from_epoch).transpose()?,
            done: self.is_done,
            created_at: from_epoch(self.created_at)?,
            changed_at: self.changed_at.map(from_epoch).transpose()?,
            color: self.color.filter(|c| !c.is_empty()),
            category,
        })
    }
}

fn to_epoch(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

fn from_epoch(secs: f64) -> Result<DateTime<Utc>, CsvError> {
    if !secs.is_finite() {
        return Err(CsvError::InvalidRow(format!("bad timestamp {}", secs)));
    }
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64)
        .single()
        .ok_or_else(|| CsvError::InvalidRow(format!("timestamp out of range {}", secs)))
}

/// Write `tasks` as CSV, header first.
///
/// # Errors
/// Returns `CsvError` if writing to `writer` fails.
pub fn write_tasks<W: io::Write>(writer: W, tasks: &[Task]) -> Result<(), CsvError> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\r'))
        .from_writer(writer);

    out.write_record(COLUMNS)?;
    for task in tasks {
        out.serialize(Row::from_task(task))?;
    }
    out.flush()?;

    tracing::debug!("Wrote {} tasks as CSV", tasks.len());
    Ok(())
}

/// Read tasks from CSV. Columns are matched by header name; rows with the
/// wrong number of cells or invalid values are skipped.
///
/// # Errors
/// Returns `CsvError` only if reading from `reader` fails.
pub fn read_tasks<R: io::Read>(reader: R) -> Result<Vec<Task>, CsvError> {
    let mut input = csv::ReaderBuilder::new().from_reader(reader);
    let mut tasks = Vec::new();

    for (index, record) in input.deserialize::<Row>().enumerate() {
        let row = match record {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Skipping CSV row {}: {}", index + 1, e);
                continue;
            }
        };
        match row.into_task() {
            Ok(task) => tasks.push(task),
            Err(e) => tracing::warn!("Skipping CSV row {}: {}", index + 1, e),
        }
    }

    tracing::debug!("Read {} tasks from CSV", tasks.len());
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn full_task() -> Task {
        let mut task = Task::new("Call mom, then dad", Importance::High)
            .unwrap()
            .with_deadline(at(1_718_500_000))
            .with_color("#FF00FF")
            .with_category(Category::new("Work", Some("#FB5E5E")));
        task.created_at = at(1_718_444_400);
        task.changed_at = Some(at(1_718_444_500));
        task
    }

    fn to_csv(tasks: &[Task]) -> String {
        let mut buf = Vec::new();
        write_tasks(&mut buf, tasks).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_round_trip_with_commas_and_quotes() {
        let mut plain = Task::new("Plain \"quoted\" text", Importance::Normal).unwrap();
        plain.created_at = at(1_700_000_000);
        let tasks = vec![full_task(), plain];

        let csv = to_csv(&tasks);
        assert_eq!(read_tasks(csv.as_bytes()).unwrap(), tasks);
    }

    #[test]
    fn test_layout() {
        let csv = to_csv(&[full_task()]);
        let rows: Vec<&str> = csv.split('\r').filter(|r| !r.is_empty()).collect();

        assert_eq!(rows[0], COLUMNS.join(","));
        assert_eq!(rows.len(), 2);
        assert!(rows[1].contains("\"Call mom, then dad\""));
        assert!(rows[1].contains(",important,"));
        assert!(rows[1].contains(",false,1718444400.0,1718444500.0,#FF00FF,Work,#FB5E5E"));
    }

    #[test]
    fn test_header_written_for_empty_list() {
        assert_eq!(to_csv(&[]), format!("{}\r", COLUMNS.join(",")));
    }

    #[test]
    fn test_optional_cells_are_empty() {
        let mut task = Task::new("Bare", Importance::Normal).unwrap();
        task.created_at = at(1_700_000_000);
        let task_id = task.id;

        let csv = to_csv(&[task]);
        let row = csv.split('\r').nth(1).unwrap();
        assert_eq!(row, format!("{},Bare,,,false,1700000000.0,,,,", task_id));
    }

    #[test]
    fn test_reads_fractional_timestamps() {
        let id = TaskId::new();
        let csv = format!(
            "{}\r{},Fraction,low,,false,1718444400.25,,,,\r",
            COLUMNS.join(","),
            id
        );

        let tasks = read_tasks(csv.as_bytes()).unwrap();
        assert_eq!(tasks[0].importance, Importance::Low);
        assert_eq!(tasks[0].created_at.timestamp_millis(), 1_718_444_400_250);
        assert_eq!(tasks[0].category, Category::uncategorized());
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let good = TaskId::new();
        let csv = format!(
            "{header}\r\
             not-a-uuid,Bad id,,,false,1700000000,,,,\r\
             {id},,,,false,1700000000,,,,\r\
             {id},Odd importance,urgent,,false,1700000000,,,,\r\
             {id},Too few cells,,,false\r\
             {id},Kept,,,true,1700000000,,,,\r",
            header = COLUMNS.join(","),
            id = good
        );

        let tasks = read_tasks(csv.as_bytes()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "Kept");
        assert!(tasks[0].done);
    }

    #[test]
    fn test_reads_files_without_category_columns() {
        let id = TaskId::new();
        let csv = format!(
            "id,text,importance,deadline,is_done,created_at,changed_at\r\
             {},Older export,important,1718500000.0,false,1718444400.0,\r",
            id
        );

        let tasks = read_tasks(csv.as_bytes()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].deadline, Some(at(1_718_500_000)));
        assert!(tasks[0].changed_at.is_none());
        assert_eq!(tasks[0].category, Category::uncategorized());
    }
}
