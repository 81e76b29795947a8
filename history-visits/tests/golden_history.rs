use std::fs;

use history_core::VisitConfig;
use history_visits::group_visits_str;
use serde_json::Value;

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn three_admission_history_matches_golden() {
    let payload = fs::read_to_string(fixture_path("three_admissions_history.json"))
        .expect("Không đọc được payload mẫu");

    let visits =
        group_visits_str(&payload, &VisitConfig::default()).expect("Không dựng được visit");

    let actual = serde_json::to_value(visits).expect("Không serialize visit");

    let expected = fs::read_to_string(fixture_path("three_admissions_visits.json"))
        .expect("Không đọc được golden visits");
    let expected_value: Value = serde_json::from_str(&expected).expect("Golden không hợp lệ");

    assert_eq!(actual, expected_value);
}
