use crate::domain::commitment::LearningCommitment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct CommitmentRow {
    commitment: String,
    status: String,
    completed: u32,
    total: u32,
    student_absent: u32,
    tutor_absent: u32,
    mutual_absent: u32,
    paid: String,
    money_transferred: bool,
}

impl From<&LearningCommitment> for CommitmentRow {
    fn from(c: &LearningCommitment) -> Self {
        Self {
            commitment: c.id.to_string(),
            status: c.status().to_string(),
            completed: c.completed_sessions,
            total: c.total_sessions,
            student_absent: c.absence_stats.student_absences,
            tutor_absent: c.absence_stats.tutor_absences,
            mutual_absent: c.absence_stats.mutual_absences,
            paid: c.student_paid_amount.to_string(),
            money_transferred: c.is_money_transferred,
        }
    }
}

/// Writes one summary row per commitment.
pub struct CommitmentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CommitmentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header followed by `commitments` in the given order.
    pub fn write_commitments<'a>(
        &mut self,
        commitments: impl IntoIterator<Item = &'a LearningCommitment>,
    ) -> Result<()> {
        let mut wrote_any = false;
        for commitment in commitments {
            self.writer.serialize(CommitmentRow::from(commitment))?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record([
                "commitment",
                "status",
                "completed",
                "total",
                "student_absent",
                "tutor_absent",
                "mutual_absent",
                "paid",
                "money_transferred",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
