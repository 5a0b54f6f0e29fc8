// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

//! Document classification.
//!
//! Two stages, first successful one wins: the search parameters of the query
//! that produced the document are authoritative; failing that, the court
//! name is matched against a fixed dictionary of region name stems and
//! instance keywords. A classification is only recorded when both the
//! region and the instance type resolve.

use crate::document::{Classification, ClassificationSource};
use crate::params::SearchParams;

/// Region codes as used by the registry search form, keyed by name stems
/// found in court names. Stems are matched by substring on the lowercased
/// court name; the first matching entry wins, so the more specific stems
/// come first within the Kyiv pair.
#[rustfmt::skip]
const REGIONS: &[(&str, &[&str])] = &[
    ("1",  &["автономної республіки крим", "ар крим", "сімферопол"]),
    ("2",  &["вінниц"]),
    ("3",  &["волин", "луцьк"]),
    ("4",  &["дніпропетровськ", "дніпровськ"]),
    ("5",  &["донецьк"]),
    ("6",  &["житомир"]),
    ("7",  &["закарпатськ", "ужгород"]),
    ("8",  &["запорізьк", "запоріж"]),
    ("9",  &["івано-франківськ"]),
    ("10", &["київської області", "київщин"]),
    ("11", &["міста києва", "м. києва", "києва"]),
    ("12", &["кіровоградськ", "кропивницьк"]),
    ("13", &["луганськ"]),
    ("14", &["львів"]),
    ("15", &["миколаївськ", "миколаєв"]),
    ("16", &["одеськ", "одес"]),
    ("17", &["полтавськ"]),
    ("18", &["рівненськ"]),
    ("19", &["сумськ"]),
    ("20", &["тернопіл"]),
    ("21", &["харків"]),
    ("22", &["херсон"]),
    ("23", &["хмельницьк"]),
    ("24", &["черкас"]),
    ("25", &["чернівецьк", "чернівц"]),
    ("26", &["чернігівськ", "чернігів"]),
    ("27", &["севастопол"]),
];

const CASSATION_STEMS: &[&str] = &["касаційн", "верховн"];
const APPELLATE_STEMS: &[&str] = &["апеляційн"];
const FIRST_INSTANCE_STEMS: &[&str] = &["районн", "міськрайонн", "міський суд", "окружн"];

/// Match a court name against the region dictionary.
pub fn region_from_court_name(name: &str) -> Option<&'static str> {
    let name = name.to_lowercase();
    REGIONS
        .iter()
        .find(|(_, stems)| stems.iter().any(|stem| name.contains(stem)))
        .map(|(code, _)| *code)
}

/// Derive the instance type from a court name: cassation and appellate
/// courts name themselves; district, city and circuit courts are first
/// instance.
pub fn instance_from_court_name(name: &str) -> Option<&'static str> {
    let name = name.to_lowercase();
    if CASSATION_STEMS.iter().any(|stem| name.contains(stem)) {
        return Some("3");
    }
    if APPELLATE_STEMS.iter().any(|stem| name.contains(stem)) {
        return Some("2");
    }
    if FIRST_INSTANCE_STEMS.iter().any(|stem| name.contains(stem)) {
        return Some("1");
    }
    None
}

pub fn known_region_code(code: &str) -> bool {
    REGIONS.iter().any(|(known, _)| *known == code)
}

pub fn known_instance_code(code: &str) -> bool {
    matches!(code, "1" | "2" | "3")
}

/// Classify a document from its producing query and/or extracted court name.
///
/// Returns `None` when either field cannot be determined; the document is
/// then registered unclassified.
pub fn classify(
    params: Option<&SearchParams>,
    court_name: Option<&str>,
) -> Option<Classification> {
    let param_region = params
        .and_then(|p| p.court_region.as_deref())
        .filter(|code| known_region_code(code));
    let param_instance = params
        .and_then(|p| p.ins_type.as_deref())
        .filter(|code| known_instance_code(code));

    if let (Some(region), Some(instance)) = (param_region, param_instance) {
        return Some(Classification {
            court_region: region.to_owned(),
            instance_type: instance.to_owned(),
            source: ClassificationSource::SearchParams,
        });
    }

    let region = param_region
        .or_else(|| court_name.and_then(region_from_court_name))?
        .to_owned();
    let instance = param_instance
        .or_else(|| court_name.and_then(instance_from_court_name))?
        .to_owned();

    Some(Classification {
        court_region: region,
        instance_type: instance,
        source: ClassificationSource::Extracted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_params_are_authoritative() {
        let params = SearchParams {
            court_region: Some("11".to_owned()),
            ins_type: Some("1".to_owned()),
            ..Default::default()
        };
        let classification =
            classify(Some(&params), Some("Київський районний суд")).unwrap();
        assert_eq!(classification.court_region, "11");
        assert_eq!(classification.instance_type, "1");
        assert_eq!(classification.source, ClassificationSource::SearchParams);
    }

    #[test]
    fn extraction_from_court_name() {
        let classification = classify(None, Some("Львівський апеляційний суд")).unwrap();
        assert_eq!(classification.court_region, "14");
        assert_eq!(classification.instance_type, "2");
        assert_eq!(classification.source, ClassificationSource::Extracted);
    }

    #[test]
    fn cassation_courts_are_third_instance() {
        assert_eq!(
            instance_from_court_name("Касаційний цивільний суд у складі Верховного Суду"),
            Some("3")
        );
    }

    #[test]
    fn district_courts_are_first_instance() {
        assert_eq!(
            instance_from_court_name("Шевченківський районний суд міста Києва"),
            Some("1")
        );
        assert_eq!(
            instance_from_court_name("Окружний адміністративний суд міста Києва"),
            Some("1")
        );
    }

    #[test]
    fn kyiv_city_and_oblast_are_distinct() {
        assert_eq!(
            region_from_court_name("Шевченківський районний суд міста Києва"),
            Some("11")
        );
        assert_eq!(
            region_from_court_name("Києво-Святошинський районний суд Київської області"),
            Some("10")
        );
    }

    #[test]
    fn partial_params_fall_back_to_extraction() {
        let params = SearchParams {
            court_region: Some("21".to_owned()),
            ..Default::default()
        };
        let classification =
            classify(Some(&params), Some("Харківський апеляційний суд")).unwrap();
        assert_eq!(classification.court_region, "21");
        assert_eq!(classification.instance_type, "2");
        assert_eq!(classification.source, ClassificationSource::Extracted);
    }

    #[test]
    fn unrecognized_codes_are_discarded() {
        let params = SearchParams {
            court_region: Some("99".to_owned()),
            ins_type: Some("7".to_owned()),
            ..Default::default()
        };
        assert!(classify(Some(&params), None).is_none());
    }

    #[test]
    fn unknown_court_stays_unclassified() {
        assert!(classify(None, Some("Трибунал")).is_none());
    }
}
