use crate::error::AppError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::Args;
use hydro_rating::{
    is_undefined, LookupTable, Rate, RatingContext, RatingMetadata, RatingMethod, RatingMethodSet,
    RatingSeries, SeriesRecord, ShiftCurve, TableRating, UsgsShiftedRating, UNDEFINED_VALUE,
};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub(crate) struct RateArgs {
    /// Rating series record (JSON)
    #[arg(long)]
    pub(crate) record: PathBuf,
    /// CSV input with a `time` column followed by one column per independent parameter
    #[arg(long)]
    pub(crate) input: PathBuf,
    /// Treat the value column as dependent values and rate back to the independent parameter
    #[arg(long)]
    pub(crate) reverse: bool,
    /// Write results here instead of stdout
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct InspectArgs {
    /// Rating series record (JSON)
    #[arg(long)]
    pub(crate) record: PathBuf,
    /// Report extents of the rating in force at this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_time)]
    pub(crate) at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Stages to rate. Defaults to a spread across the demo table.
    #[arg(long, value_delimiter = ',')]
    pub(crate) stages: Vec<f64>,
    /// Print the demo series as a JSON record instead of rating it
    #[arg(long)]
    pub(crate) emit_record: bool,
}

#[derive(Debug, Serialize)]
struct RatedRow {
    time: DateTime<Utc>,
    result: Option<f64>,
}

/// Accepts RFC 3339 timestamps or bare dates (midnight UTC).
pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| format!("'{trimmed}' is not an RFC 3339 time or YYYY-MM-DD date"))
}

fn parse_value(value: &str, line: u64) -> Result<f64, AppError> {
    if value.is_empty() {
        return Ok(UNDEFINED_VALUE);
    }
    value.parse::<f64>().map_err(|_| AppError::Input {
        line,
        message: format!("'{value}' is not a number"),
    })
}

fn load_series(path: &PathBuf, ctx: &RatingContext) -> Result<RatingSeries, AppError> {
    let text = fs::read_to_string(path)?;
    let record = SeriesRecord::from_json(&text)?;
    Ok(RatingSeries::from_record(record, ctx)?)
}

struct InputSeries {
    times: Vec<DateTime<Utc>>,
    columns: Vec<Vec<f64>>,
}

fn read_input(path: &PathBuf) -> Result<InputSeries, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let width = reader.headers()?.len();
    if width < 2 {
        return Err(AppError::Input {
            line: 1,
            message: "expected a time column and at least one value column".to_string(),
        });
    }

    let mut input = InputSeries {
        times: Vec::new(),
        columns: vec![Vec::new(); width - 1],
    };
    for row in reader.records() {
        let row = row?;
        let line = row.position().map_or(0, |position| position.line());
        let time = parse_time(row.get(0).unwrap_or_default())
            .map_err(|message| AppError::Input { line, message })?;
        input.times.push(time);
        for (column, value) in input.columns.iter_mut().zip(row.iter().skip(1)) {
            column.push(parse_value(value, line)?);
        }
    }
    Ok(input)
}

pub(crate) fn run_rate(args: RateArgs, ctx: &RatingContext, out: &mut impl Write) -> Result<(), AppError> {
    let RateArgs {
        record,
        input,
        reverse,
        output,
    } = args;

    let series = load_series(&record, ctx)?;
    let InputSeries { times, columns } = read_input(&input)?;

    let results = if reverse {
        let [deps] = columns.as_slice() else {
            return Err(AppError::Input {
                line: 1,
                message: format!("reverse rating takes one value column, found {}", columns.len()),
            });
        };
        series.reverse_rate_many(&times, deps)?
    } else {
        series.rate_many(&times, &columns)?
    };

    let sink: Box<dyn Write + '_> = match &output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(out),
    };
    let mut writer = csv::Writer::from_writer(sink);
    for (&time, &value) in times.iter().zip(&results) {
        writer.serialize(RatedRow {
            time,
            result: (!is_undefined(value)).then_some(value),
        })?;
    }
    writer.flush()?;

    info!(
        spec_id = %series.spec_id(),
        rows = results.len(),
        reverse,
        "rated input series"
    );
    Ok(())
}

pub(crate) fn run_inspect(
    args: InspectArgs,
    ctx: &RatingContext,
    out: &mut impl Write,
) -> Result<(), AppError> {
    let series = load_series(&args.record, ctx)?;
    let methods = series.methods();

    writeln!(out, "{} {} ({})", series.office_id(), series.spec_id(), series.units_id())?;
    writeln!(
        out,
        "time methods: in-range {}, before first {}, after last {}",
        methods.in_range, methods.out_range_low, methods.out_range_high
    )?;
    writeln!(out, "ratings:")?;
    for rating in series.ratings() {
        let meta = rating.metadata();
        writeln!(
            out,
            "  {} {:<12} {}",
            meta.effective_date.to_rfc3339(),
            rating.kind(),
            if meta.active { "active" } else { "inactive" }
        )?;
    }

    if let Some(at) = args.at {
        let spec = series.spec_id();
        let names = spec
            .independent_parameters()
            .iter()
            .map(String::as_str)
            .chain([spec.dependent_parameter()]);
        let units = series.data_units();
        writeln!(out, "extents at {}:", at.to_rfc3339())?;
        for ((name, unit), (lo, hi)) in names.zip(&units).zip(series.extents(at)?) {
            writeln!(out, "  {name}: {lo} .. {hi} {unit}")?;
        }
    }
    Ok(())
}

fn demo_date(year: i32, month: u32, day: u32) -> Result<DateTime<Utc>, AppError> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::Input {
            line: 0,
            message: format!("invalid demo date {year}-{month}-{day}"),
        })
}

const DEMO_SPEC: &str = "DEMO.Stage;Flow.USGS-EXSA.Production";
const DEMO_POINTS: [(f64, f64); 5] = [
    (1.0, 0.0),
    (2.0, 45.0),
    (4.0, 310.0),
    (7.0, 1_250.0),
    (12.0, 4_800.0),
];

/// Table rating superseded by a shifted stream rating.
fn demo_series(ctx: &RatingContext) -> Result<RatingSeries, AppError> {
    let methods = RatingMethodSet::new(RatingMethod::Linear, RatingMethod::Null, RatingMethod::Linear);

    let original = TableRating::from_pairs(
        RatingMetadata::parse("DEMO", DEMO_SPEC, "ft;cfs", demo_date(2024, 1, 1)?)?
            .with_description("original channel survey"),
        ctx.clone(),
        &DEMO_POINTS,
        methods,
    )?;

    let resurveyed: Vec<(f64, f64)> = DEMO_POINTS
        .iter()
        .map(|&(stage, flow)| (stage, flow * 1.08))
        .collect();
    let current = UsgsShiftedRating::new(
        RatingMetadata::parse("DEMO", DEMO_SPEC, "ft;cfs", demo_date(2024, 7, 1)?)?
            .with_description("post-flood resurvey"),
        ctx.clone(),
        LookupTable::from_pairs(&resurveyed, methods)?,
    )?
    .with_shifts([ShiftCurve::new(demo_date(2024, 9, 1)?, &[(1.0, 0.3), (12.0, 0.1)])?])?;

    Ok(RatingSeries::from_ratings(vec![original.into(), current.into()])?)
}

pub(crate) fn run_demo(args: DemoArgs, ctx: &RatingContext, out: &mut impl Write) -> Result<(), AppError> {
    let series = demo_series(ctx)?;
    if args.emit_record {
        writeln!(out, "{}", series.to_record().to_json()?)?;
        return Ok(());
    }

    let stages = if args.stages.is_empty() {
        vec![1.5, 3.0, 5.5, 9.0]
    } else {
        args.stages
    };
    let times = [
        demo_date(2024, 3, 1)?,
        demo_date(2024, 5, 1)?,
        demo_date(2024, 8, 1)?,
        demo_date(2024, 10, 1)?,
    ];

    writeln!(out, "Stage/flow rating demo: {} ({})", series.spec_id(), series.units_id())?;
    write!(out, "{:>8}", "stage")?;
    for time in &times {
        write!(out, "{:>14}", time.format("%Y-%m-%d"))?;
    }
    writeln!(out)?;

    for &stage in &stages {
        write!(out, "{stage:>8.2}")?;
        for &time in &times {
            let flow = series.rate(time, &[stage])?;
            if is_undefined(flow) {
                write!(out, "{:>14}", "-")?;
            } else {
                write!(out, "{flow:>14.1}")?;
            }
        }
        writeln!(out)?;
    }

    let check_time = times[times.len() - 1];
    let flow = series.rate(check_time, &[stages[0]])?;
    if !is_undefined(flow) {
        let stage = series.reverse_rate(check_time, flow)?;
        writeln!(
            out,
            "reverse check at {}: {flow:.1} cfs -> {stage:.3} ft",
            check_time.format("%Y-%m-%d")
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SERIES_JSON: &str = r#"{
        "office_id": "SWT",
        "spec_id": "COLU.Stage;Flow.Linear.Production",
        "units_id": "ft;cfs",
        "ratings": [
            {
                "kind": "table",
                "office_id": "SWT",
                "spec_id": "COLU.Stage;Flow.Linear.Production",
                "units_id": "ft;cfs",
                "effective_date": "2020-01-01T00:00:00Z",
                "methods": [{"in_range": "LINEAR", "out_range_low": "NULL", "out_range_high": "ERROR"}],
                "points": [{"values": [0.0, 0.0]}, {"values": [10.0, 100.0]}]
            },
            {
                "kind": "table",
                "office_id": "SWT",
                "spec_id": "COLU.Stage;Flow.Linear.Production",
                "units_id": "ft;cfs",
                "effective_date": "2020-01-11T00:00:00Z",
                "methods": [{"in_range": "LINEAR", "out_range_low": "NULL", "out_range_high": "ERROR"}],
                "points": [{"values": [0.0, 0.0]}, {"values": [10.0, 200.0]}]
            }
        ]
    }"#;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).expect("create file");
        file.write_all(contents.as_bytes()).expect("write file");
        path
    }

    fn rate_to_string(args: RateArgs) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        run_rate(args, &RatingContext::standard(), &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("utf-8 output"))
    }

    #[test]
    fn parse_time_supports_rfc3339_and_dates() {
        let rfc = parse_time("2024-05-01T06:30:00-05:00").expect("rfc3339");
        assert_eq!(rfc, Utc.with_ymd_and_hms(2024, 5, 1, 11, 30, 0).unwrap());
        let date = parse_time(" 2024-05-01 ").expect("date");
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(parse_time("May 1").is_err());
    }

    #[test]
    fn rate_writes_one_row_per_input_row() {
        let dir = TempDir::new().expect("temp dir");
        let record = write_file(&dir, "series.json", SERIES_JSON);
        let input = write_file(
            &dir,
            "stages.csv",
            "time,stage\n2020-01-01T00:00:00Z,5\n2020-01-06,5\n2020-01-06,-1\n2020-01-06,\n",
        );

        let output = rate_to_string(RateArgs {
            record,
            input,
            reverse: false,
            output: None,
        })
        .expect("rates");

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "time,result");
        assert_eq!(lines[1], "2020-01-01T00:00:00Z,50.0");
        assert_eq!(lines[2], "2020-01-06T00:00:00Z,75.0");
        assert_eq!(lines[3], "2020-01-06T00:00:00Z,");
        assert_eq!(lines[4], "2020-01-06T00:00:00Z,");
    }

    #[test]
    fn reverse_rating_writes_to_the_output_file() {
        let dir = TempDir::new().expect("temp dir");
        let record = write_file(&dir, "series.json", SERIES_JSON);
        let input = write_file(&dir, "flows.csv", "time,flow\n2020-01-11,150\n");
        let output = dir.path().join("stages.csv");

        let stdout = rate_to_string(RateArgs {
            record,
            input,
            reverse: true,
            output: Some(output.clone()),
        })
        .expect("reverses");

        assert!(stdout.is_empty());
        let written = fs::read_to_string(output).expect("output written");
        assert_eq!(written, "time,result\n2020-01-11T00:00:00Z,7.5\n");
    }

    #[test]
    fn malformed_input_reports_the_line() {
        let dir = TempDir::new().expect("temp dir");
        let record = write_file(&dir, "series.json", SERIES_JSON);

        let input = write_file(&dir, "bad.csv", "time,stage\n2020-01-02,1\n2020-01-03,high\n");
        match rate_to_string(RateArgs {
            record: record.clone(),
            input,
            reverse: false,
            output: None,
        }) {
            Err(AppError::Input { line: 3, .. }) => {}
            other => panic!("expected input error on line 3, got {other:?}"),
        }

        let input = write_file(&dir, "wide.csv", "time,a,b\n2020-01-02,1,2\n");
        match rate_to_string(RateArgs {
            record: record.clone(),
            input: input.clone(),
            reverse: true,
            output: None,
        }) {
            Err(AppError::Input { .. }) => {}
            other => panic!("expected input error, got {other:?}"),
        }
        match rate_to_string(RateArgs {
            record,
            input,
            reverse: false,
            output: None,
        }) {
            Err(AppError::Rating(_)) => {}
            other => panic!("expected rating error, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_values_fail_the_run() {
        let dir = TempDir::new().expect("temp dir");
        let record = write_file(&dir, "series.json", SERIES_JSON);
        let input = write_file(&dir, "high.csv", "time,stage\n2020-01-02,11\n");
        match rate_to_string(RateArgs {
            record,
            input,
            reverse: false,
            output: None,
        }) {
            Err(AppError::Rating(err)) => assert!(err.to_string().contains("11")),
            other => panic!("expected rating error, got {other:?}"),
        }
    }

    #[test]
    fn inspect_lists_ratings_and_extents() {
        let dir = TempDir::new().expect("temp dir");
        let record = write_file(&dir, "series.json", SERIES_JSON);
        let mut buffer = Vec::new();
        run_inspect(
            InspectArgs {
                record,
                at: Some(Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap()),
            },
            &RatingContext::standard(),
            &mut buffer,
        )
        .expect("inspects");

        let text = String::from_utf8(buffer).expect("utf-8 output");
        assert!(text.starts_with("SWT COLU.Stage;Flow.Linear.Production (ft;cfs)"));
        assert!(text.contains("2020-01-11T00:00:00+00:00 table"));
        assert!(text.contains("Stage: 0 .. 10 ft"));
        assert!(text.contains("Flow: 0 .. 200 cfs"));
    }

    #[test]
    fn missing_record_is_an_io_error() {
        let dir = TempDir::new().expect("temp dir");
        let mut buffer = Vec::new();
        match run_inspect(
            InspectArgs {
                record: dir.path().join("absent.json"),
                at: None,
            },
            &RatingContext::standard(),
            &mut buffer,
        ) {
            Err(AppError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn demo_rates_across_the_rating_change() {
        let mut buffer = Vec::new();
        run_demo(DemoArgs::default(), &RatingContext::standard(), &mut buffer).expect("demo runs");
        let text = String::from_utf8(buffer).expect("utf-8 output");
        assert!(text.starts_with("Stage/flow rating demo: DEMO.Stage;Flow.USGS-EXSA.Production"));
        assert!(text.contains("reverse check at 2024-10-01"));
        assert_eq!(text.lines().count(), 7);
    }

    #[test]
    fn demo_record_loads_back_as_a_series() {
        let mut buffer = Vec::new();
        run_demo(
            DemoArgs {
                stages: Vec::new(),
                emit_record: true,
            },
            &RatingContext::standard(),
            &mut buffer,
        )
        .expect("demo runs");

        let record = SeriesRecord::from_json(&String::from_utf8(buffer).expect("utf-8 output"))
            .expect("valid record");
        let ctx = RatingContext::standard();
        let series = RatingSeries::from_record(record, &ctx).expect("valid series");
        assert_eq!(series.len(), 2);
        assert_eq!(series.ratings()[1].kind(), "usgs");
    }
}
