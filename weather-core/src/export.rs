//! CSV and Excel snapshots of a payload.
//!
//! Both exports take the serialized payload, flatten it to one row for the
//! current reading plus one row per day, and write a new timestamped file.
//! Failures are logged and reported as `None`.

use chrono::Local;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::{
    fmt::Debug,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{config::ExportConfig, model::WeatherPayload};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("Styling failed: {0}")]
    Style(String),
}

pub const COLUMNS: [&str; 11] = [
    "Type",
    "City",
    "Date/Time",
    "Temperature (°C)",
    "Apparent Temperature (°C)",
    "Humidity (%)",
    "UV Index",
    "Weather",
    "Precipitation (%)",
    "Max Temp (°C)",
    "Min Temp (°C)",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    pub fn render(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

pub type Row = Vec<Cell>;

/// Current reading first, then each day in payload order. Columns that do
/// not apply to a row are left empty.
pub fn flatten(payload: &WeatherPayload) -> Vec<Row> {
    let city = Cell::Text(payload.location.city.clone());
    let current = &payload.current;

    let mut rows = Vec::with_capacity(payload.daily.len() + 1);
    rows.push(vec![
        Cell::Text("Current".into()),
        city.clone(),
        Cell::Text(current.time.format(crate::model::TIME_FORMAT).to_string()),
        Cell::Number(current.temperature),
        Cell::Number(current.apparent_temperature),
        Cell::Number(current.relative_humidity),
        Cell::Number(current.uv),
        Cell::Text(current.weather_code.clone()),
        Cell::Number(f64::from(current.precipitation_probability)),
        Cell::Empty,
        Cell::Empty,
    ]);

    for day in &payload.daily {
        rows.push(vec![
            Cell::Text("Forecast".into()),
            city.clone(),
            Cell::Text(day.date.format(crate::model::DATE_FORMAT).to_string()),
            Cell::Empty,
            Cell::Empty,
            Cell::Empty,
            Cell::Number(day.uv_index_max),
            Cell::Text(day.weather_code.clone()),
            Cell::Number(f64::from(day.precipitation_probability)),
            Cell::Number(day.temperature_max),
            Cell::Number(day.temperature_min),
        ]);
    }

    rows
}

/// Cosmetic pass over a fully written worksheet.
pub trait SheetStyler: Send + Sync + Debug {
    fn style(&self, sheet: &mut Worksheet, rows: &[Row]) -> Result<(), ExportError>;
}

/// Filled bold header and content-sized columns.
#[derive(Debug, Clone)]
pub struct HeaderStyler {
    pub header_color: u32,
    pub max_width: usize,
}

impl Default for HeaderStyler {
    fn default() -> Self {
        Self { header_color: 0x4472C4, max_width: 50 }
    }
}

impl SheetStyler for HeaderStyler {
    fn style(&self, sheet: &mut Worksheet, rows: &[Row]) -> Result<(), ExportError> {
        let header = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(self.header_color))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);

        for (col, name) in COLUMNS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *name, &header)?;

            let longest = rows
                .iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.render().chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0);
            let width = (longest + 2).min(self.max_width);
            sheet.set_column_width(col as u16, width as f64)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    csv_dir: PathBuf,
    excel_dir: PathBuf,
    styler: Arc<dyn SheetStyler>,
}

impl SnapshotExporter {
    pub fn new(config: &ExportConfig) -> Self {
        let exporter = Self {
            csv_dir: config.csv_dir.clone(),
            excel_dir: config.excel_dir.clone(),
            styler: Arc::new(HeaderStyler::default()),
        };
        for dir in [&exporter.csv_dir, &exporter.excel_dir] {
            if let Err(err) = fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %err, "Cannot create export directory");
            }
        }
        info!("Export service initialized");
        exporter
    }

    pub fn with_styler(mut self, styler: Arc<dyn SheetStyler>) -> Self {
        self.styler = styler;
        self
    }

    pub fn export_csv(&self, payload_json: &str) -> Option<PathBuf> {
        info!("Generating CSV export");
        match self.write_csv(payload_json) {
            Ok(path) => {
                info!(path = %path.display(), "CSV exported");
                Some(path)
            }
            Err(err) => {
                error!(error = %err, "Error exporting CSV");
                None
            }
        }
    }

    pub fn export_excel(&self, payload_json: &str) -> Option<PathBuf> {
        info!("Generating Excel export");
        match self.write_excel(payload_json) {
            Ok(path) => {
                info!(path = %path.display(), "Excel exported");
                Some(path)
            }
            Err(err) => {
                error!(error = %err, "Error exporting Excel");
                None
            }
        }
    }

    fn write_csv(&self, payload_json: &str) -> Result<PathBuf, ExportError> {
        let payload = WeatherPayload::from_json(payload_json)?;
        let rows = flatten(&payload);

        fs::create_dir_all(&self.csv_dir)?;
        let path = unique_path(&self.csv_dir, "csv");
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        // BOM so spreadsheet tools pick up UTF-8
        file.write_all("\u{FEFF}".as_bytes())?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(COLUMNS)?;
        for row in &rows {
            writer.write_record(row.iter().map(Cell::render))?;
        }
        writer.flush()?;

        Ok(path)
    }

    fn write_excel(&self, payload_json: &str) -> Result<PathBuf, ExportError> {
        let payload = WeatherPayload::from_json(payload_json)?;
        let rows = flatten(&payload);

        fs::create_dir_all(&self.excel_dir)?;
        let path = unique_path(&self.excel_dir, "xlsx");

        let mut workbook = Workbook::new();
        write_rows(workbook.add_worksheet(), &rows)?;
        workbook.save(&path)?;

        if let Err(err) = self.restyle(&path, &rows) {
            warn!(error = %err, "Could not apply Excel styling");
        }

        Ok(path)
    }

    /// Rewrites `path` with styling applied. The unstyled file stays in place
    /// unless the styled one was written completely.
    fn restyle(&self, path: &Path, rows: &[Row]) -> Result<(), ExportError> {
        let staged = path.with_extension("styled.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        write_rows(sheet, rows)?;
        self.styler.style(sheet, rows)?;

        if let Err(err) = workbook.save(&staged) {
            let _ = fs::remove_file(&staged);
            return Err(err.into());
        }
        fs::rename(&staged, path)?;
        Ok(())
    }
}

fn write_rows(sheet: &mut Worksheet, rows: &[Row]) -> Result<(), ExportError> {
    for (col, name) in COLUMNS.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let line = r as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            match cell {
                Cell::Text(text) => {
                    sheet.write_string(line, col as u16, text)?;
                }
                Cell::Number(n) => {
                    sheet.write_number(line, col as u16, *n)?;
                }
                Cell::Empty => {}
            }
        }
    }

    Ok(())
}

/// `weather_data_<timestamp>.<ext>`, suffixed `_<n>` if that name is taken.
fn unique_path(dir: &Path, ext: &str) -> PathBuf {
    let stem = format!("weather_data_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_payload;

    #[derive(Debug)]
    struct BrokenStyler;

    impl SheetStyler for BrokenStyler {
        fn style(&self, _sheet: &mut Worksheet, _rows: &[Row]) -> Result<(), ExportError> {
            Err(ExportError::Style("font table unavailable".into()))
        }
    }

    fn exporter(dir: &Path) -> SnapshotExporter {
        SnapshotExporter::new(&ExportConfig {
            csv_dir: dir.join("csv"),
            excel_dir: dir.join("excel"),
        })
    }

    fn payload_json() -> String {
        sample_payload().to_json().unwrap()
    }

    #[test]
    fn flatten_puts_current_first_then_days() {
        let rows = flatten(&sample_payload());

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == COLUMNS.len()));
        assert_eq!(rows[0][0], Cell::Text("Current".into()));
        assert_eq!(rows[0][3], Cell::Number(29.5));
        assert_eq!(rows[0][9], Cell::Empty);
        assert_eq!(rows[1][0], Cell::Text("Forecast".into()));
        assert_eq!(rows[1][2], Cell::Text("14/03/2025".into()));
        assert_eq!(rows[1][3], Cell::Empty);
        assert_eq!(rows[2][9], Cell::Number(30.0));
    }

    #[test]
    fn csv_has_bom_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = exporter(dir.path()).export_csv(&payload_json()).expect("csv path");

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with('\u{FEFF}'));

        let mut reader = csv::Reader::from_reader(raw.trim_start_matches('\u{FEFF}').as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), COLUMNS.to_vec());

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][7], "Chuva");
        assert_eq!(&records[0][9], "");
        assert_eq!(&records[2][2], "15/03/2025");
    }

    #[test]
    fn exports_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter(dir.path());

        let first = exporter.export_csv(&payload_json()).unwrap();
        let second = exporter.export_csv(&payload_json()).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    /// First sheet as text, header row included.
    fn read_sheet(path: &Path) -> Vec<Vec<String>> {
        use calamine::{Reader, Xlsx, open_workbook};

        let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
        let range = workbook.worksheet_range("Sheet1").unwrap();
        range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn excel_export_writes_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = exporter(dir.path())
            .export_excel(&payload_json())
            .expect("xlsx path");

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("xlsx"));
        assert!(!path.with_extension("styled.xlsx").exists());

        let rows = read_sheet(&path);
        assert_eq!(rows[0], COLUMNS.to_vec());
        assert_eq!(rows[1][0], "Current");
        assert_eq!(rows[1][7], "Chuva");
        assert_eq!(rows[3][2], "15/03/2025");
    }

    #[test]
    fn excel_export_survives_styling_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter(dir.path()).with_styler(Arc::new(BrokenStyler));
        let payload = sample_payload();

        let path = exporter
            .export_excel(&payload_json())
            .expect("unstyled file is still a result");
        assert!(!path.with_extension("styled.xlsx").exists());

        let rows = read_sheet(&path);
        assert_eq!(rows[0], COLUMNS.to_vec());
        assert_eq!(rows.len() - 1, 1 + payload.daily.len());
        assert_eq!(rows[2][0], "Forecast");
    }

    #[test]
    fn invalid_payload_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter(dir.path());

        assert!(exporter.export_csv("{not json").is_none());
        assert!(exporter.export_excel("{\"location\": 1}").is_none());
    }

    #[test]
    fn unwritable_directory_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "file, not a directory").unwrap();

        let exporter = SnapshotExporter::new(&ExportConfig {
            csv_dir: blocker.join("csv"),
            excel_dir: blocker.join("excel"),
        });
        assert!(exporter.export_csv(&payload_json()).is_none());
        assert!(exporter.export_excel(&payload_json()).is_none());
    }
}
