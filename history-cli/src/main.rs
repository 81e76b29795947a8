use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use history_core::{PatientHistory, Visit, VisitConfig};
use history_visits::{
    export_rows, group_visits, history_from_value, linkage_mismatches, LinkageMismatch,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "history-cli",
    about = "Dựng lại các đợt điều trị (visit) từ lịch sử bệnh nhân dạng JSON."
)]
struct Args {
    /// Đường dẫn tới file JSON lịch sử bệnh nhân.
    #[arg(short, long)]
    input: PathBuf,

    /// File TOML cấu hình thứ tự trường ngày.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Định dạng đầu ra.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
    format: OutputFormat,

    /// Bật log debug (RUST_LOG vẫn được ưu tiên).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
    Rows,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Không đọc được file {:?}", args.input))?;
    let payload: serde_json::Value = serde_json::from_str(&data)
        .with_context(|| format!("JSON không hợp lệ: {:?}", args.input))?;

    let history = history_from_value(&payload)?;
    let visits = group_visits(&history, &config);

    let output = match args.format {
        OutputFormat::Summary => {
            render_summary(&history, &visits, &linkage_mismatches(&visits))?
        }
        OutputFormat::Json => serde_json::to_string_pretty(&visits)?,
        OutputFormat::Rows => serde_json::to_string_pretty(&export_rows(&visits, &config))?,
    };
    println!("{output}");

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VisitConfig> {
    let Some(path) = path else {
        return Ok(VisitConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Không đọc được file cấu hình {path:?}"))?;
    let config = parse_config(&text).with_context(|| format!("Cấu hình lỗi: {path:?}"))?;
    tracing::debug!(?config, "Loaded visit config");
    Ok(config)
}

fn parse_config(text: &str) -> anyhow::Result<VisitConfig> {
    let config: VisitConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

fn render_summary(
    history: &PatientHistory,
    visits: &[Visit],
    mismatches: &[LinkageMismatch],
) -> Result<String, std::fmt::Error> {
    let records: usize = visits.iter().map(Visit::event_count).sum();
    let mut out = String::new();

    writeln!(out, "Patient: {}", history.unified_number)?;
    writeln!(out, "Visits: {} | Records: {records}", visits.len())?;

    for visit in visits {
        let counts = visit.counts();
        let start = visit
            .start_at
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "- {} | {start} | admissions={} discharges={} emergencies={} endoscopies={} procedures={} loans={}",
            visit.key,
            counts.admissions,
            counts.discharges,
            counts.emergencies,
            counts.endoscopies,
            counts.procedures,
            counts.loans,
        )?;
    }

    write!(out, "Linkage warnings: {}", mismatches.len())?;
    for mismatch in mismatches {
        write!(
            out,
            "\n  discharge {} (admission {}) grouped into {}, linked to {}",
            mismatch.discharge_id.as_deref().unwrap_or("?"),
            mismatch.admission_id,
            mismatch.grouped_visit,
            mismatch.linked_visit,
        )?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_core::DateField;
    use serde_json::json;

    #[test]
    fn toml_config_overrides_event_fields() {
        let config = parse_config(r#"event_time_fields = ["visit_date", "created_at"]"#)
            .expect("cấu hình hợp lệ");
        assert_eq!(
            config.event_time_fields,
            vec![DateField::VisitDate, DateField::CreatedAt]
        );
        assert_eq!(
            config.admission_time_fields,
            VisitConfig::default().admission_time_fields
        );
    }

    #[test]
    fn empty_toml_uses_defaults() {
        assert_eq!(parse_config("").expect("rỗng"), VisitConfig::default());
    }

    #[test]
    fn unknown_field_name_is_rejected() {
        assert!(parse_config(r#"admission_time_fields = ["birthday"]"#).is_err());
        assert!(parse_config("admission_time_fields = []").is_err());
    }

    #[test]
    fn summary_lists_visits_and_linkage() {
        let history = history_from_value(&json!({
            "unified_number": "UN-9",
            "admissions": [
                { "id": "A1", "admission_date": "2024-01-01T00:00:00Z" },
                { "id": "A2", "admission_date": "2024-03-01T00:00:00Z" }
            ],
            "discharges": [{ "id": "D1", "admission_id": "A1", "discharge_date": "2024-03-02" }]
        }))
        .expect("payload");
        let visits = group_visits(&history, &VisitConfig::default());
        let summary = render_summary(&history, &visits, &linkage_mismatches(&visits))
            .expect("ghi summary");

        let expected = "Patient: UN-9\n\
Visits: 2 | Records: 3\n\
- visit-0-A1 | 2024-01-01T00:00:00+00:00 | admissions=1 discharges=0 emergencies=0 endoscopies=0 procedures=0 loans=0\n\
- visit-1-A2 | 2024-03-01T00:00:00+00:00 | admissions=1 discharges=1 emergencies=0 endoscopies=0 procedures=0 loans=0\n\
Linkage warnings: 1\n  discharge D1 (admission A1) grouped into visit-1-A2, linked to visit-0-A1";
        assert_eq!(summary, expected);
    }
}
