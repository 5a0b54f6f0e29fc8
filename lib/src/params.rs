// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Date format used by the registry search form.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Search parameters recognized by the upstream registry's search form.
///
/// Field names mirror the wire keys exactly. Unrecognized keys are dropped
/// during deserialization and empty strings are treated as absent (the
/// registry form posts empty values for unset fields).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SearchParams {
    #[serde(rename = "CourtRegion", skip_serializing_if = "Option::is_none")]
    pub court_region: Option<String>,
    #[serde(rename = "INSType", skip_serializing_if = "Option::is_none")]
    pub ins_type: Option<String>,
    #[serde(rename = "ChairmenName", skip_serializing_if = "Option::is_none")]
    pub chairmen_name: Option<String>,
    #[serde(rename = "SearchExpression", skip_serializing_if = "Option::is_none")]
    pub search_expression: Option<String>,
    #[serde(rename = "RegDateBegin", skip_serializing_if = "Option::is_none")]
    pub reg_date_begin: Option<String>,
    #[serde(rename = "RegDateEnd", skip_serializing_if = "Option::is_none")]
    pub reg_date_end: Option<String>,
    #[serde(rename = "DateFrom", skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(rename = "DateTo", skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
}

impl SearchParams {
    /// Drop empty-string values.
    pub fn normalize(mut self) -> Self {
        for field in [
            &mut self.court_region,
            &mut self.ins_type,
            &mut self.chairmen_name,
            &mut self.search_expression,
            &mut self.reg_date_begin,
            &mut self.reg_date_end,
            &mut self.date_from,
            &mut self.date_to,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.court_region.is_none()
            && self.ins_type.is_none()
            && self.chairmen_name.is_none()
            && self.search_expression.is_none()
            && self.reg_date_begin.is_none()
            && self.reg_date_end.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    pub fn parse_date(value: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
    }

    /// The date window the task searches over. Registration dates take
    /// precedence over decision dates when both are present.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let begin = self.reg_date_begin.as_deref().or(self.date_from.as_deref());
        let end = self.reg_date_end.as_deref().or(self.date_to.as_deref());
        match (
            begin.and_then(Self::parse_date),
            end.and_then(Self::parse_date),
        ) {
            (Some(begin), Some(end)) if begin <= end => Some((begin, end)),
            _ => None,
        }
    }

    /// Validate all date-typed fields, returning the wire key of the first
    /// malformed one.
    pub fn check_dates(&self) -> Result<(), &'static str> {
        for (key, value) in [
            ("RegDateBegin", &self.reg_date_begin),
            ("RegDateEnd", &self.reg_date_end),
            ("DateFrom", &self.date_from),
            ("DateTo", &self.date_to),
        ] {
            if let Some(value) = value {
                if Self::parse_date(value).is_none() {
                    return Err(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored() {
        let params: SearchParams = serde_json::from_value(serde_json::json!({
            "CourtRegion": "14",
            "INSType": "2",
            "PageSize": "50",
        }))
        .unwrap();
        assert_eq!(params.court_region.as_deref(), Some("14"));
        assert_eq!(params.ins_type.as_deref(), Some("2"));
    }

    #[test]
    fn empty_strings_are_absent() {
        let params: SearchParams = serde_json::from_value(serde_json::json!({
            "CourtRegion": "",
            "SearchExpression": "  ",
            "ChairmenName": "Іваненко",
        }))
        .unwrap();
        let params = params.normalize();
        assert!(params.court_region.is_none());
        assert!(params.search_expression.is_none());
        assert_eq!(params.chairmen_name.as_deref(), Some("Іваненко"));
    }

    #[test]
    fn registration_dates_take_precedence() {
        let params = SearchParams {
            reg_date_begin: Some("01.02.2023".to_owned()),
            reg_date_end: Some("28.02.2023".to_owned()),
            date_from: Some("01.01.2020".to_owned()),
            date_to: Some("31.12.2020".to_owned()),
            ..Default::default()
        };
        let (begin, end) = params.date_range().unwrap();
        assert_eq!(begin, NaiveDate::from_ymd_opt(2023, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let params = SearchParams {
            date_from: Some("31.12.2020".to_owned()),
            date_to: Some("01.01.2020".to_owned()),
            ..Default::default()
        };
        assert!(params.date_range().is_none());
    }

    #[test]
    fn malformed_date_is_reported_by_key() {
        let params = SearchParams {
            reg_date_begin: Some("2023-02-01".to_owned()),
            ..Default::default()
        };
        assert_eq!(params.check_dates(), Err("RegDateBegin"));
    }
}
