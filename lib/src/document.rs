// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

use chrono::{DateTime, Utc};
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// How a document's classification was determined.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Adopted from the search parameters of the producing query.
    SearchParams,
    /// Matched from the extracted court name.
    Extracted,
    #[default]
    None,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::SearchParams => "search_params",
            ClassificationSource::Extracted => "extracted",
            ClassificationSource::None => "none",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "search_params" => ClassificationSource::SearchParams,
            "extracted" => ClassificationSource::Extracted,
            _ => ClassificationSource::None,
        }
    }
}

/// The (court region, instance type) pair with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Classification {
    pub court_region: String,
    pub instance_type: String,
    pub source: ClassificationSource,
}

/// Metadata supplied by a worker when registering a downloaded document.
/// Only `external_id` is mandatory; everything else enriches the stored row
/// under the null-filling merge policy.
#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DocumentMeta {
    pub external_id: String,
    pub reg_number: Option<String>,
    pub url_path: Option<String>,
    pub decision_type: Option<String>,
    pub decision_date: Option<String>,
    pub law_date: Option<String>,
    pub case_type: Option<String>,
    pub case_number: Option<String>,
    pub court_name: Option<String>,
    pub judge_name: Option<String>,
}

/// A registered registry document. `system_id` is assigned on first
/// registration of an `external_id` and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub system_id: Uuid,
    pub external_id: String,
    pub reg_number: Option<String>,
    pub url_path: Option<String>,
    pub decision_type: Option<String>,
    pub decision_date: Option<String>,
    pub law_date: Option<String>,
    pub case_type: Option<String>,
    pub case_number: Option<String>,
    pub court_name: Option<String>,
    pub judge_name: Option<String>,
    pub court_region: Option<String>,
    pub instance_type: Option<String>,
    pub classification_source: ClassificationSource,
    pub classification_date: Option<DateTime<Utc>>,
    /// Worker that first registered the document.
    pub client_id: Option<Uuid>,
    /// Task the document was downloaded for.
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Start a fresh row from registration metadata.
    pub fn from_meta(
        system_id: Uuid,
        meta: &DocumentMeta,
        client_id: Option<Uuid>,
        task_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Document {
            system_id,
            external_id: meta.external_id.clone(),
            reg_number: meta.reg_number.clone(),
            url_path: meta.url_path.clone(),
            decision_type: meta.decision_type.clone(),
            decision_date: meta.decision_date.clone(),
            law_date: meta.law_date.clone(),
            case_type: meta.case_type.clone(),
            case_number: meta.case_number.clone(),
            court_name: meta.court_name.clone(),
            judge_name: meta.judge_name.clone(),
            court_region: None,
            instance_type: None,
            classification_source: ClassificationSource::None,
            classification_date: None,
            client_id,
            task_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill fields that are still null from `meta`. Stored non-null values
    /// always win. Returns true when anything changed.
    pub fn merge_missing(&mut self, meta: &DocumentMeta) -> bool {
        fn fill(slot: &mut Option<String>, value: &Option<String>) -> bool {
            if slot.is_none() && value.is_some() {
                slot.clone_from(value);
                true
            } else {
                false
            }
        }

        let mut changed = false;
        changed |= fill(&mut self.reg_number, &meta.reg_number);
        changed |= fill(&mut self.url_path, &meta.url_path);
        changed |= fill(&mut self.decision_type, &meta.decision_type);
        changed |= fill(&mut self.decision_date, &meta.decision_date);
        changed |= fill(&mut self.law_date, &meta.law_date);
        changed |= fill(&mut self.case_type, &meta.case_type);
        changed |= fill(&mut self.case_number, &meta.case_number);
        changed |= fill(&mut self.court_name, &meta.court_name);
        changed |= fill(&mut self.judge_name, &meta.judge_name);
        changed
    }

    pub fn classification(&self) -> Option<Classification> {
        match (&self.court_region, &self.instance_type) {
            (Some(region), Some(instance)) => Some(Classification {
                court_region: region.clone(),
                instance_type: instance.clone(),
                source: self.classification_source,
            }),
            _ => None,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.classification_source != ClassificationSource::None
            && self.court_region.is_some()
            && self.instance_type.is_some()
    }
}

/// Outcome of a single download attempt within a task.
#[rustfmt::skip]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, IntoPrimitive, FromPrimitive, Serialize, Deserialize, ToSchema)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Completed  =     0,
    InProgress =  1000,
    #[num_enum(default)]
    Failed     = -1000,
}

/// One row per (task, document) pair, timing a single download attempt.
/// These records feed the throughput and ETA figures of the live activity
/// view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentProgress {
    pub task_id: Uuid,
    pub external_id: String,
    pub reg_number: Option<String>,
    pub client_id: Option<Uuid>,
    pub status: ProgressStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(external_id: &str) -> DocumentMeta {
        DocumentMeta {
            external_id: external_id.to_owned(),
            reg_number: Some("101476997".to_owned()),
            court_name: Some("Львівський апеляційний суд".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn merge_fills_only_missing_fields() {
        let now = Utc::now();
        let mut doc = Document::from_meta(Uuid::nil(), &meta("101476997"), None, None, now);
        doc.case_type = None;

        let incoming = DocumentMeta {
            external_id: "101476997".to_owned(),
            reg_number: Some("OVERWRITE".to_owned()),
            case_type: Some("Цивільні справи".to_owned()),
            ..Default::default()
        };
        let changed = doc.merge_missing(&incoming);

        assert!(changed);
        // Stored values win, missing ones get filled.
        assert_eq!(doc.reg_number.as_deref(), Some("101476997"));
        assert_eq!(doc.case_type.as_deref(), Some("Цивільні справи"));
    }

    #[test]
    fn identical_merge_changes_nothing() {
        let now = Utc::now();
        let m = meta("101476997");
        let mut doc = Document::from_meta(Uuid::nil(), &m, None, None, now);
        assert!(!doc.merge_missing(&m));
    }
}
