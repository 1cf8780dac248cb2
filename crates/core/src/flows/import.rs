//! Bulk lead import from CSV exports.

use std::io::Read;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome};
use crate::capability::Capability;
use crate::domain::lead::{LeadId, NewLead};
use crate::errors::ApplicationError;
use crate::flows::orchestrator::DealOrchestrator;
use crate::tenant::TenantContext;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub total_rows: usize,
    pub imported: Vec<LeadId>,
    pub failures: Vec<ImportFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// 1-based line number in the source file, header included.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct LeadRow {
    #[serde(default, alias = "name")]
    full_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    estimated_value: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl LeadRow {
    fn into_new_lead(self, default_source: Option<&str>) -> Result<NewLead, String> {
        let estimated_value = match non_empty(self.estimated_value) {
            Some(raw) => Some(
                Decimal::from_str(&raw.replace(',', ""))
                    .map_err(|_| format!("estimated_value `{raw}` is not a number"))?,
            ),
            None => None,
        };
        Ok(NewLead {
            full_name: non_empty(self.full_name).unwrap_or_default(),
            phone: non_empty(self.phone),
            email: non_empty(self.email),
            address: non_empty(self.address),
            source: non_empty(self.source).or_else(|| default_source.map(str::to_owned)),
            estimated_value,
            notes: non_empty(self.notes),
            ..NewLead::default()
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

fn parse_rows<R: Read>(reader: R, default_source: Option<&str>) -> Result<Vec<(usize, Result<NewLead, String>)>, ApplicationError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(reader);
    let headers = csv
        .headers()
        .map_err(|error| ApplicationError::ValidationFailed(format!("unreadable CSV header: {error}")))?
        .iter()
        .map(|header| header.trim().trim_start_matches('\u{feff}').to_ascii_lowercase().replace(' ', "_"))
        .collect::<csv::StringRecord>();
    if !headers.iter().any(|header| matches!(header, "full_name" | "name" | "phone")) {
        return Err(ApplicationError::ValidationFailed(
            "the CSV needs a `full_name`, `name` or `phone` column".to_owned(),
        ));
    }

    let mut rows = Vec::new();
    for (index, record) in csv.records().enumerate() {
        // Quoted fields may span lines, so the reader's position is authoritative.
        let fallback = index + 2;
        let row = match record {
            Ok(record) => (
                record.position().map_or(fallback, |position| position.line() as usize),
                record
                    .deserialize::<LeadRow>(Some(&headers))
                    .map_err(|error| error.to_string())
                    .and_then(|row| row.into_new_lead(default_source)),
            ),
            Err(error) => (
                error.position().map_or(fallback, |position| position.line() as usize),
                Err(error.to_string()),
            ),
        };
        rows.push(row);
    }
    Ok(rows)
}

impl DealOrchestrator {
    /// Imports leads row by row. A failing row is recorded and the import continues;
    /// the monthly quota applies to every created lead.
    pub async fn import_leads<R: Read>(
        &self,
        ctx: &TenantContext,
        reader: R,
        default_source: Option<&str>,
    ) -> Result<ImportSummary, ApplicationError> {
        self.require(ctx, Capability::LeadsImport)?;
        ctx.require_org()?;
        let rows = parse_rows(reader, default_source)?;
        let import_ctx = ctx.escalate("import_leads", &[Capability::LeadsCreate]);

        let mut summary = ImportSummary { total_rows: rows.len(), ..ImportSummary::default() };
        for (line, parsed) in rows {
            let result = match parsed {
                Ok(draft) => self.create_lead(&import_ctx, draft).await.map_err(|error| error.to_string()),
                Err(message) => Err(message),
            };
            match result {
                Ok(lead) => summary.imported.push(lead.id),
                Err(message) => summary.failures.push(ImportFailure { line, message }),
            }
        }

        info!(
            event_name = "lifecycle.leads_imported",
            correlation_id = %ctx.correlation_id(),
            total_rows = summary.total_rows,
            imported = summary.imported.len(),
            failed = summary.failures.len(),
            "lead import finished"
        );
        self.audit.emit(
            AuditContext::from_tenant(ctx)
                .event(None, "lifecycle.leads_imported", AuditCategory::Lifecycle, AuditOutcome::Success)
                .with_metadata("imported", summary.imported.len().to_string())
                .with_metadata("failed", summary.failures.len().to_string()),
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_rows;

    #[test]
    fn headers_are_normalized_and_rows_keep_line_numbers() {
        let csv = "Name,Phone,Estimated Value\nDana,050-1,\"12,500\"\n,,\nEli,,abc\n";
        let rows = parse_rows(csv.as_bytes(), Some("expo")).expect("parse");

        assert_eq!(rows.len(), 3);
        let (line, first) = &rows[0];
        assert_eq!(*line, 2);
        let first = first.as_ref().expect("valid row");
        assert_eq!(first.full_name, "Dana");
        assert_eq!(first.source.as_deref(), Some("expo"));
        assert_eq!(first.estimated_value, Some(rust_decimal::Decimal::from(12_500)));

        let (line, bad) = &rows[2];
        assert_eq!(*line, 4);
        assert!(bad.as_ref().expect_err("bad number").contains("abc"));
    }

    #[test]
    fn multi_line_notes_do_not_shift_later_line_numbers() {
        let csv = "name,phone,notes\nDana,050-1,\"gate code 12\nring twice\"\n,,\n";
        let rows = parse_rows(csv.as_bytes(), None).expect("parse");

        assert_eq!(rows.len(), 2);
        let (line, first) = &rows[0];
        assert_eq!(*line, 2);
        assert_eq!(first.as_ref().expect("valid row").notes.as_deref(), Some("gate code 12\nring twice"));
        assert_eq!(rows[1].0, 4);
    }

    #[test]
    fn files_without_identifying_columns_are_rejected() {
        assert!(parse_rows("email\nx@example.com\n".as_bytes(), None).is_err());
    }
}
