use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::contact_from_value;
use tracing::{info, warn};

use crate::ingest::Ingestor;
use crate::models::ContactData;

/// Only the first few failures are echoed back to the caller.
pub const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub records: Vec<Value>,
    #[serde(default)]
    pub skip_existing: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportError {
    pub index: usize,
    pub email: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

impl ImportReport {
    fn record_failure(&mut self, error: ImportError) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error);
        }
    }
}

/// Imports contacts one by one; a bad record is reported and the batch goes on.
pub async fn import_contacts(ingestor: &Ingestor, request: &ImportRequest) -> ImportReport {
    let mut report = ImportReport {
        total: request.records.len(),
        ..Default::default()
    };

    for (index, raw) in request.records.iter().enumerate() {
        let record = contact_from_value(raw);
        let Some(email) = record.email.clone() else {
            report.record_failure(ImportError {
                index,
                email: None,
                error: "missing email".to_string(),
            });
            continue;
        };

        if request.skip_existing {
            match ingestor.store().find_contact_by_email(&email).await {
                Ok(Some(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    report.record_failure(ImportError {
                        index,
                        email: Some(email),
                        error: format!("{:#}", e),
                    });
                    continue;
                }
            }
        }

        match ingestor.upsert_contact(ContactData::from_local(record)).await {
            Ok(_) => report.successful += 1,
            Err(e) => {
                warn!("Import of record {} ({}) failed: {:#}", index, email, e);
                report.record_failure(ImportError {
                    index,
                    email: Some(email),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    info!(
        "Contact import finished: {} of {} imported, {} failed, {} skipped",
        report.successful, report.total, report.failed, report.skipped
    );
    report
}
