//! Mô hình dữ liệu lõi cho lịch sử bệnh nhân và các đợt điều trị (visit).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Các trường ngày tháng đã biết trong một bản ghi.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    DischargeDate,
    ProcedureDate,
    VisitDate,
    LoanDate,
    AdmissionDate,
    CreatedAt,
    UpdatedAt,
}

impl DateField {
    /// Tên cột tương ứng trong bản ghi.
    pub fn as_str(self) -> &'static str {
        match self {
            DateField::DischargeDate => "discharge_date",
            DateField::ProcedureDate => "procedure_date",
            DateField::VisitDate => "visit_date",
            DateField::LoanDate => "loan_date",
            DateField::AdmissionDate => "admission_date",
            DateField::CreatedAt => "created_at",
            DateField::UpdatedAt => "updated_at",
        }
    }
}

/// Nhóm bản ghi trong lịch sử bệnh nhân.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Admission,
    Discharge,
    Emergency,
    Endoscopy,
    Procedure,
    Loan,
}

impl Category {
    /// Các nhóm không phải nhập viện, theo thứ tự phân bổ.
    pub const EVENTS: [Category; 5] = [
        Category::Discharge,
        Category::Emergency,
        Category::Endoscopy,
        Category::Procedure,
        Category::Loan,
    ];

    /// Tên khóa danh sách trong payload (`admissions`, `loans`...).
    pub fn collection_key(self) -> &'static str {
        match self {
            Category::Admission => "admissions",
            Category::Discharge => "discharges",
            Category::Emergency => "emergencies",
            Category::Endoscopy => "endoscopies",
            Category::Procedure => "procedures",
            Category::Loan => "loans",
        }
    }
}

/// Một bản ghi sự kiện: ánh xạ tên trường sang giá trị vô hướng.
///
/// Chỉ các trường ngày và `id` được đọc, phần còn lại giữ nguyên khi xuất.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Giá trị thô của một trường ngày, nếu có.
    pub fn date_value(&self, field: DateField) -> Option<&Value> {
        self.0.get(field.as_str())
    }

    /// Mã định danh dạng chuỗi (chấp nhận cả số).
    pub fn id(&self) -> Option<String> {
        scalar_text(self.0.get("id")?)
    }

    /// Khóa ngoại tới bản ghi nhập viện (chỉ có ở bản ghi xuất viện).
    pub fn admission_id(&self) -> Option<String> {
        scalar_text(self.0.get("admission_id")?)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Toàn bộ lịch sử của một bệnh nhân (theo `unified_number`).
///
/// Việc đọc payload là dễ dãi: trường không phải mảng được coi là rỗng.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientHistory {
    #[serde(default, deserialize_with = "lenient::unified_number")]
    pub unified_number: String,
    #[serde(default, deserialize_with = "lenient::records")]
    pub admissions: Vec<Record>,
    #[serde(default, deserialize_with = "lenient::records")]
    pub discharges: Vec<Record>,
    #[serde(default, deserialize_with = "lenient::records")]
    pub emergencies: Vec<Record>,
    #[serde(default, deserialize_with = "lenient::records")]
    pub endoscopies: Vec<Record>,
    #[serde(default, deserialize_with = "lenient::records")]
    pub procedures: Vec<Record>,
    #[serde(default, deserialize_with = "lenient::records")]
    pub loans: Vec<Record>,
}

impl PatientHistory {
    /// Danh sách bản ghi của một nhóm.
    pub fn records(&self, category: Category) -> &[Record] {
        match category {
            Category::Admission => &self.admissions,
            Category::Discharge => &self.discharges,
            Category::Emergency => &self.emergencies,
            Category::Endoscopy => &self.endoscopies,
            Category::Procedure => &self.procedures,
            Category::Loan => &self.loans,
        }
    }

    /// Tổng số bản ghi thuộc mọi nhóm.
    pub fn total_records(&self) -> usize {
        self.admissions.len()
            + Category::EVENTS
                .iter()
                .map(|category| self.records(*category).len())
                .sum::<usize>()
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use crate::Record;

    pub(crate) fn unified_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            _ => String::new(),
        })
    }

    pub(crate) fn records<'de, D>(deserializer: D) -> Result<Vec<Record>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Value::Array(items) = Value::deserialize(deserializer)? else {
            return Ok(Vec::new());
        };

        let total = items.len();
        let records: Vec<Record> = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(fields) => Some(Record::new(fields)),
                _ => None,
            })
            .collect();

        if records.len() < total {
            tracing::warn!(
                dropped = total - records.len(),
                "Bỏ qua phần tử không phải object trong danh sách bản ghi"
            );
        }

        Ok(records)
    }
}

/// Một đợt điều trị được dựng lại, neo theo một lần nhập viện.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub key: String,
    #[serde(rename = "startAt")]
    pub start_at: Option<DateTime<Utc>>,
    pub admission: Option<Record>,
    pub admissions: Vec<Record>,
    pub discharges: Vec<Record>,
    pub emergencies: Vec<Record>,
    pub endoscopies: Vec<Record>,
    pub procedures: Vec<Record>,
    pub loans: Vec<Record>,
}

impl Visit {
    /// Visit rỗng với khóa cho trước (dùng khi dựng hoặc cho testing).
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Visit neo theo một bản ghi nhập viện.
    pub fn anchored(
        key: impl Into<String>,
        start_at: Option<DateTime<Utc>>,
        admission: Record,
    ) -> Self {
        Self {
            key: key.into(),
            start_at,
            admissions: vec![admission.clone()],
            admission: Some(admission),
            ..Self::default()
        }
    }

    pub fn records(&self, category: Category) -> &[Record] {
        match category {
            Category::Admission => &self.admissions,
            Category::Discharge => &self.discharges,
            Category::Emergency => &self.emergencies,
            Category::Endoscopy => &self.endoscopies,
            Category::Procedure => &self.procedures,
            Category::Loan => &self.loans,
        }
    }

    pub fn records_mut(&mut self, category: Category) -> &mut Vec<Record> {
        match category {
            Category::Admission => &mut self.admissions,
            Category::Discharge => &mut self.discharges,
            Category::Emergency => &mut self.emergencies,
            Category::Endoscopy => &mut self.endoscopies,
            Category::Procedure => &mut self.procedures,
            Category::Loan => &mut self.loans,
        }
    }

    /// Đếm số bản ghi theo từng nhóm.
    pub fn counts(&self) -> VisitCounts {
        VisitCounts {
            admissions: self.admissions.len(),
            discharges: self.discharges.len(),
            emergencies: self.emergencies.len(),
            endoscopies: self.endoscopies.len(),
            procedures: self.procedures.len(),
            loans: self.loans.len(),
        }
    }

    /// Tổng số bản ghi trong visit, kể cả bản ghi nhập viện.
    pub fn event_count(&self) -> usize {
        self.counts().total()
    }
}

/// Số lượng bản ghi theo nhóm trong một visit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitCounts {
    pub admissions: usize,
    pub discharges: usize,
    pub emergencies: usize,
    pub endoscopies: usize,
    pub procedures: usize,
    pub loans: usize,
}

impl VisitCounts {
    pub fn total(&self) -> usize {
        self.admissions
            + self.discharges
            + self.emergencies
            + self.endoscopies
            + self.procedures
            + self.loans
    }
}

/// Cấu hình thứ tự ưu tiên các trường ngày khi xác định thời điểm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisitConfig {
    /// Thứ tự trường ngày cho bản ghi không phải nhập viện.
    pub event_time_fields: Vec<DateField>,
    /// Thứ tự trường ngày cho bản ghi nhập viện.
    pub admission_time_fields: Vec<DateField>,
}

impl Default for VisitConfig {
    fn default() -> Self {
        Self {
            event_time_fields: vec![
                DateField::DischargeDate,
                DateField::ProcedureDate,
                DateField::VisitDate,
                DateField::LoanDate,
                DateField::AdmissionDate,
                DateField::CreatedAt,
                DateField::UpdatedAt,
            ],
            admission_time_fields: vec![DateField::AdmissionDate, DateField::CreatedAt],
        }
    }
}

impl VisitConfig {
    /// Kiểm tra cấu hình: mỗi danh sách ưu tiên phải có ít nhất một trường.
    pub fn validate(&self) -> Result<(), HistoryError> {
        if self.event_time_fields.is_empty() {
            return Err(HistoryError::InvalidConfig(
                "event_time_fields không được rỗng".to_string(),
            ));
        }
        if self.admission_time_fields.is_empty() {
            return Err(HistoryError::InvalidConfig(
                "admission_time_fields không được rỗng".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lỗi chung khi đọc lịch sử bệnh nhân.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Dữ liệu đầu vào thiếu thông tin tối thiểu")]
    MissingData,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error("Cấu hình không hợp lệ: {0}")]
    InvalidConfig(String),
}
