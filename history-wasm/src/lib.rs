//! Bridge WASM <-> JavaScript cho việc dựng lại các visit của bệnh nhân.

use history_core::{DateField, HistoryError, Visit, VisitConfig};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::prelude::*;

#[derive(Deserialize, Default)]
struct JsVisitConfig {
    #[serde(default)]
    event_time_fields: Option<Vec<DateField>>,
    #[serde(default)]
    admission_time_fields: Option<Vec<DateField>>,
}

impl From<JsVisitConfig> for VisitConfig {
    fn from(cfg: JsVisitConfig) -> Self {
        let mut base = VisitConfig::default();
        if let Some(fields) = cfg.event_time_fields {
            base.event_time_fields = fields;
        }
        if let Some(fields) = cfg.admission_time_fields {
            base.admission_time_fields = fields;
        }
        base
    }
}

/// Nhóm toàn bộ lịch sử của một bệnh nhân thành danh sách visit.
#[wasm_bindgen(js_name = groupHistoryIntoVisits)]
pub fn group_history_into_visits(
    payload: JsValue,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    let (visits, _) = build_visits(payload, config)?;
    to_js(&visits, "visit")
}

/// Dựng visit rồi trải phẳng thành các dòng để xuất bảng tính.
#[wasm_bindgen(js_name = exportVisitRows)]
pub fn export_visit_rows(payload: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    let (visits, cfg) = build_visits(payload, config)?;
    to_js(&history_visits::export_rows(&visits, &cfg), "dòng xuất")
}

fn build_visits(
    payload: JsValue,
    config: Option<JsValue>,
) -> Result<(Vec<Visit>, VisitConfig), JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let payload_value = from_value::<serde_json::Value>(payload)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được JSON payload: {err}")))?;

    let cfg = match config {
        Some(js_cfg) if !js_cfg.is_undefined() && !js_cfg.is_null() => {
            let cfg: JsVisitConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Không đọc được config: {err}")))?;
            VisitConfig::from(cfg)
        }
        _ => VisitConfig::default(),
    };

    let visits = history_visits::group_visits_value(&payload_value, &cfg)
        .map_err(|err| JsValue::from_str(&format_history_error(err)))?;

    Ok((visits, cfg))
}

// Map/None phải thành object/null thuần cho phía JS.
fn to_js<T: Serialize>(value: &T, what: &str) -> Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|err| JsValue::from_str(&format!("Không serialize {what}: {err}")))
}

fn format_history_error(err: HistoryError) -> String {
    format!("History error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_config_overrides_only_present_fields() {
        let cfg: JsVisitConfig =
            serde_json::from_str(r#"{ "event_time_fields": ["loan_date", "created_at"] }"#)
                .expect("config hợp lệ");
        let merged = VisitConfig::from(cfg);

        assert_eq!(
            merged.event_time_fields,
            vec![DateField::LoanDate, DateField::CreatedAt]
        );
        assert_eq!(
            merged.admission_time_fields,
            VisitConfig::default().admission_time_fields
        );
    }

    #[test]
    fn empty_js_config_keeps_defaults() {
        assert_eq!(
            VisitConfig::from(JsVisitConfig::default()),
            VisitConfig::default()
        );
    }

    #[test]
    fn history_error_is_prefixed() {
        assert_eq!(
            format_history_error(HistoryError::MissingData),
            "History error: Dữ liệu đầu vào thiếu thông tin tối thiểu"
        );
    }
}
