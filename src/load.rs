use crate::error::{PipelineError, Result};
use crate::structs::{CleanedDataset, Metric};
use crate::transform::{AggregateRow, Report};
use arrow_array::{Float64Array, Int32Array, RecordBatch, UInt32Array};
use arrow_schema::{DataType, Field, Schema};
use csv::Writer;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::{fs, fs::File, path::Path, sync::Arc};

/// Serializes a cleaned dataset back to CSV text with its canonical header.
///
/// Values are written with full precision, so cleaning the output again
/// yields the same dataset.
pub fn dataset_to_csv(dataset: &CleanedDataset) -> Result<String> {
    let mut writer = Writer::from_writer(Vec::new());
    write_dataset(dataset, &mut writer)?;
    finish_to_string(writer)
}

/// Writes a cleaned dataset to a CSV file.
///
/// # Errors
/// Returns error if file cannot be created or written to.
pub fn write_dataset_csv(dataset: &CleanedDataset, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);
    write_dataset(dataset, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn write_dataset<W: Write>(dataset: &CleanedDataset, writer: &mut Writer<W>) -> Result<()> {
    writer.write_record(dataset.columns())?;
    let metrics = dataset.metrics();
    for record in dataset.records() {
        let mut row = vec![record.year.to_string(), record.month.to_string()];
        row.extend(
            metrics
                .iter()
                .map(|m| m.value(record).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }
    Ok(())
}

/// Header of an aggregate export, derived from the rows themselves.
fn aggregate_columns(results: &[AggregateRow]) -> Vec<&'static str> {
    let first = results.first();
    let mut columns = vec!["Year"];
    if first.is_some_and(|r| r.bucket.month.is_some()) {
        columns.push("Month");
    }
    columns.extend([
        "Count",
        Metric::Temperature.column(),
        Metric::Rainfall.column(),
        Metric::Co2.column(),
    ]);
    if first.is_some_and(|r| r.humidity.is_some()) {
        columns.push(Metric::Humidity.column());
    }
    if first.is_some_and(|r| r.wind_speed.is_some()) {
        columns.push(Metric::WindSpeed.column());
    }
    columns
}

fn write_aggregate<W: Write>(results: &[AggregateRow], writer: &mut Writer<W>) -> Result<()> {
    writer.write_record(aggregate_columns(results))?;
    for row in results {
        let mut fields = vec![row.bucket.year.to_string()];
        if let Some(month) = row.bucket.month {
            fields.push(month.to_string());
        }
        fields.push(row.count.to_string());
        fields.push(format!("{:.2}", row.temperature));
        fields.push(format!("{:.2}", row.rainfall));
        fields.push(format!("{:.2}", row.co2));
        if let Some(humidity) = row.humidity {
            fields.push(format!("{:.2}", humidity));
        }
        if let Some(wind_speed) = row.wind_speed {
            fields.push(format!("{:.2}", wind_speed));
        }
        writer.write_record(&fields)?;
    }
    Ok(())
}

/// Renders bucketed means as CSV text with formatted numeric values.
pub fn report_to_csv(results: &[AggregateRow]) -> Result<String> {
    let mut writer = Writer::from_writer(Vec::new());
    write_aggregate(results, &mut writer)?;
    finish_to_string(writer)
}

/// Writes bucketed means to a CSV file with formatted numeric values.
///
/// # Arguments
/// * `results` - Aggregate rows, already sorted by bucket
/// * `output_path` - Path where the CSV file will be created
///
/// # Errors
/// Returns error if file cannot be created or written to.
pub fn write_csv(results: &[AggregateRow], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);
    write_aggregate(results, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Writes the full report (summary and buckets) to a pretty-formatted JSON file.
///
/// # Errors
/// Returns error if file cannot be created or serialization fails.
pub fn write_json(report: &Report, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

/// Writes the plain-text summary report.
pub fn write_summary(report: &Report, output_path: &Path) -> Result<()> {
    fs::write(output_path, report.summary_text())?;
    Ok(())
}

/// Writes bucketed means to a columnar Parquet file using Arrow format.
///
/// `month`, `humidity` and `wind_speed` are nullable columns.
///
/// # Errors
/// Returns error if file cannot be created, schema is invalid, or Arrow operations fail.
pub fn write_parquet(results: &[AggregateRow], output_path: &Path) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::UInt32, true),
        Field::new("count", DataType::UInt32, false),
        Field::new("temperature", DataType::Float64, false),
        Field::new("rainfall", DataType::Float64, false),
        Field::new("co2", DataType::Float64, false),
        Field::new("humidity", DataType::Float64, true),
        Field::new("wind_speed", DataType::Float64, true),
    ]));

    let years: Int32Array = results.iter().map(|r| r.bucket.year).collect();
    let months: UInt32Array = results.iter().map(|r| r.bucket.month).collect();
    let counts: UInt32Array = results.iter().map(|r| r.count).collect();
    let temperatures: Float64Array = results.iter().map(|r| r.temperature).collect();
    let rainfalls: Float64Array = results.iter().map(|r| r.rainfall).collect();
    let co2s: Float64Array = results.iter().map(|r| r.co2).collect();
    let humidities: Float64Array = results.iter().map(|r| r.humidity).collect();
    let wind_speeds: Float64Array = results.iter().map(|r| r.wind_speed).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(years),
            Arc::new(months),
            Arc::new(counts),
            Arc::new(temperatures),
            Arc::new(rainfalls),
            Arc::new(co2s),
            Arc::new(humidities),
            Arc::new(wind_speeds),
        ],
    )?;

    let file = File::create(output_path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

fn finish_to_string(writer: Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| PipelineError::Data(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::{RawTable, clean};
    use crate::structs::Granularity;
    use crate::transform::{aggregate, build_report};
    use tempfile::tempdir;

    fn dataset() -> CleanedDataset {
        let raw = RawTable::from_csv_str(
            "Year,Month,Temperature,Rainfall,CO2,Humidity\n\
             2020,1,10.5,3,400,60\n2020,2,11.5,4,401,62\n2021,1,12,5,402,64\n",
        )
        .unwrap();
        clean(&raw).unwrap()
    }

    #[test]
    fn dataset_csv_has_canonical_header() {
        let text = dataset_to_csv(&dataset()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Year,Month,Temperature,Rainfall,CO2,Humidity"));
        assert_eq!(lines.next(), Some("2020,1,10.5,3,400,60"));
    }

    #[test]
    fn report_csv_follows_granularity() {
        let data = dataset();
        let yearly = report_to_csv(&aggregate(&data, Granularity::Year)).unwrap();
        assert!(yearly.starts_with("Year,Count,Temperature,Rainfall,CO2,Humidity\n2020,2,11.00,3.50,400.50,61.00\n"));

        let monthly = report_to_csv(&aggregate(&data, Granularity::YearMonth)).unwrap();
        assert!(monthly.starts_with("Year,Month,Count,Temperature"));
        assert_eq!(monthly.lines().count(), 4);
    }

    #[test]
    fn writes_every_export_format() {
        let dir = tempdir().unwrap();
        let data = dataset();
        let report = build_report("coast", &data, Granularity::YearMonth);

        let csv_path = dir.path().join("report.csv");
        let json_path = dir.path().join("report.json");
        let parquet_path = dir.path().join("report.parquet");
        let summary_path = dir.path().join("summary.txt");
        let dataset_path = dir.path().join("cleaned.csv");

        write_csv(&report.rows, &csv_path).unwrap();
        write_json(&report, &json_path).unwrap();
        write_parquet(&report.rows, &parquet_path).unwrap();
        write_summary(&report, &summary_path).unwrap();
        write_dataset_csv(&data, &dataset_path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["dataset_name"], "coast");
        assert_eq!(json["rows"].as_array().unwrap().len(), 3);
        assert!(fs::metadata(&parquet_path).unwrap().len() > 0);
        assert!(fs::read_to_string(&summary_path).unwrap().starts_with("Dataset: coast"));

        let reloaded = clean(&RawTable::from_path(&dataset_path).unwrap()).unwrap();
        assert_eq!(reloaded, data);
    }
}
