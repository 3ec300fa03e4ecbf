//! CSV ingest for measurement and systematic-source tables.
//!
//! Measurement table, one row per point:
//!
//! ```text
//! channel,pt,response,response_err,ref_fraction[,ref_pt]
//! ```
//!
//! `ref_pt` is the momentum the fraction was measured at; it defaults to `pt`.
//! Channels appear in order of first occurrence, which fixes their indices.
//!
//! Source table, one row per bin:
//!
//! ```text
//! source,pt,value
//! ```
//!
//! Source names are tagged `bm<mask>_<label>`; the rows of one source fill a
//! step function over the template binning.
//!
//! Missing columns are fatal. Rows that fail to parse are skipped and
//! reported, never silently dropped.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::warn;

use crate::domain::{
    Binning, ChannelInput, MeasurementPoint, ReferenceFractionPoint, StepFunction,
    SystematicSource,
};
use crate::error::CalibError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MeasurementTable {
    pub channels: Vec<ChannelInput>,
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
}

#[derive(Debug, Clone)]
pub struct SourceTable {
    pub sources: Vec<SystematicSource>,
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
}

fn open(path: &Path) -> Result<File, CalibError> {
    File::open(path).map_err(|e| {
        CalibError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open '{}': {e}", path.display()),
        ))
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader)
}

pub fn load_measurements(path: &Path) -> Result<MeasurementTable, CalibError> {
    read_measurements(open(path)?)
}

pub fn read_measurements<R: Read>(reader: R) -> Result<MeasurementTable, CalibError> {
    let mut reader = csv_reader(reader);
    let header_map = build_header_map(reader.headers()?);
    for col in ["channel", "pt", "response", "response_err", "ref_fraction"] {
        ensure_column(&header_map, col)?;
    }

    let mut channels: Vec<ChannelInput> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse_measurement_row(&record, &header_map));
        let (name, m, f) = match parsed {
            Ok(row) => row,
            Err(message) => {
                row_errors.push(RowError { line, message });
                continue;
            }
        };

        let c = *index.entry(name.clone()).or_insert_with(|| {
            channels.push(ChannelInput::new(name, Vec::new(), Vec::new()));
            channels.len() - 1
        });
        channels[c].measurements.push(m);
        channels[c].fractions.push(f);
    }

    report_row_errors("measurement", &row_errors);
    if channels.is_empty() {
        return Err(CalibError::EmptyInput(
            "measurement table has no usable rows".to_string(),
        ));
    }
    Ok(MeasurementTable {
        channels,
        rows_read,
        row_errors,
    })
}

pub fn load_sources(path: &Path, binning: &Binning) -> Result<SourceTable, CalibError> {
    read_sources(open(path)?, binning)
}

pub fn read_sources<R: Read>(reader: R, binning: &Binning) -> Result<SourceTable, CalibError> {
    let mut reader = csv_reader(reader);
    let header_map = build_header_map(reader.headers()?);
    for col in ["source", "pt", "value"] {
        ensure_column(&header_map, col)?;
    }

    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Vec<(f64, f64)>> = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| {
                let name = get_required(&record, &header_map, "source")?.to_string();
                let pt = parse_f64(get_required(&record, &header_map, "pt")?, "pt")?;
                let value = parse_f64(get_required(&record, &header_map, "value")?, "value")?;
                Ok((name, pt, value))
            });
        match parsed {
            Ok((name, pt, value)) => {
                if !rows.contains_key(&name) {
                    order.push(name.clone());
                }
                rows.entry(name).or_default().push((pt, value));
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    report_row_errors("source", &row_errors);
    let sources = order
        .iter()
        .map(|name| {
            let points = rows.get(name).map(Vec::as_slice).unwrap_or_default();
            SystematicSource::from_tagged(name, StepFunction::from_points(binning.clone(), points))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceTable {
        sources,
        rows_read,
        row_errors,
    })
}

fn report_row_errors(table: &str, errors: &[RowError]) {
    if errors.is_empty() {
        return;
    }
    warn!("{} {table} rows skipped", errors.len());
    for e in errors.iter().take(5) {
        warn!("  line {}: {}", e.line, e.message);
    }
}

fn parse_measurement_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
) -> Result<(String, MeasurementPoint, ReferenceFractionPoint), String> {
    let name = get_required(record, header_map, "channel")?.to_string();
    let pt = parse_f64(get_required(record, header_map, "pt")?, "pt")?;
    let response = parse_f64(get_required(record, header_map, "response")?, "response")?;
    let err = parse_f64(get_required(record, header_map, "response_err")?, "response_err")?;
    let frac = parse_f64(get_required(record, header_map, "ref_fraction")?, "ref_fraction")?;
    let ref_pt = match get_optional(record, header_map, "ref_pt") {
        Some(s) => parse_f64(s, "ref_pt")?,
        None => pt,
    };
    Ok((
        name,
        MeasurementPoint::new(pt, response, err),
        ReferenceFractionPoint::new(ref_pt, frac),
    ))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_column(header_map: &HashMap<String, usize>, name: &str) -> Result<(), CalibError> {
    if header_map.contains_key(name) {
        Ok(())
    } else {
        Err(CalibError::MissingColumn(name.to_string()))
    }
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    get_optional(record, header_map, name).ok_or_else(|| format!("missing value for `{name}`"))
}

fn get_optional<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let idx = *header_map.get(name)?;
    record.get(idx).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .map_err(|_| format!("invalid number for `{name}`: '{s}'"))
}
