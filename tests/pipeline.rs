use approx::assert_abs_diff_eq;
use lib::{
    Granularity, ModelManager, ModelStatus, PipelineConfig, PipelineError, RawTable, Session,
    Thresholds, aggregate, clean, dataset_to_csv, detect_anomalies,
};
use std::sync::Arc;

fn extended_csv(rows: usize, bump: f64) -> String {
    let mut text = String::from("Year,Month,Temperature,Rainfall,CO2,Humidity,WindSpeed\n");
    for i in 0..rows {
        let year = 2000 + (i / 12) as i32;
        let month = 1 + i % 12;
        let rainfall = ((i * 13) % 29) as f64;
        let co2 = 370.0 + i as f64 * 0.5;
        let humidity = 40.0 + ((i * 7) % 31) as f64;
        let wind = ((i * 5) % 11) as f64 / 2.0;
        let temperature =
            8.0 + 0.6 * month as f64 + 0.1 * rainfall - 0.05 * humidity + 0.2 * wind + bump * i as f64;
        text.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            year, month, temperature, rainfall, co2, humidity, wind
        ));
    }
    text
}

fn cleaned(text: &str) -> lib::CleanedDataset {
    clean(&RawTable::from_csv_str(text).unwrap()).unwrap()
}

#[test]
fn scenario_a_month_filter_and_mean_imputation() {
    let data = cleaned("Year,Month,Temperature,Rainfall,CO2\n2020,13,10,5,400\n2020,1,,5,400\n2020,2,20,6,410\n");
    assert_eq!(data.len(), 2);
    assert!(data.records().iter().all(|r| r.temperature == 20.0));
    assert!(data.records().iter().all(|r| (1..=12).contains(&r.month)));
}

#[test]
fn scenario_b_z_score_threshold() {
    let data = cleaned(
        "Year,Month,Temperature,Rainfall,CO2\n\
         2020,1,10,5,400\n2020,2,10,5,400\n2020,3,10,5,400\n2020,4,10,5,400\n2020,5,100,5,400\n",
    );
    let at = |t: f64| Thresholds {
        temperature: t,
        ..Thresholds::default()
    };
    let flagged = detect_anomalies(&data, &at(1.9));
    assert_eq!(flagged.len(), 1);
    assert_abs_diff_eq!(flagged[0].temperature_z, 2.0, epsilon = 1e-9);
    assert_eq!(flagged[0].rainfall_z, 0.0);
    assert!(detect_anomalies(&data, &at(2.1)).is_empty());
}

#[test]
fn scenario_c_single_row_is_unavailable() {
    let data = cleaned(&extended_csv(1, 0.0));
    let mut manager = ModelManager::default();
    let status = manager.ensure_trained(&data, false).unwrap();
    assert!(matches!(status, ModelStatus::Unavailable { .. }));
    assert!(status.model().is_none());
}

#[test]
fn scenario_d_identical_dataset_trains_once() {
    let data = cleaned(&extended_csv(50, 0.0));
    assert_eq!(data.len(), 50);
    let mut manager = ModelManager::default();
    let first = manager.ensure_trained(&data, false).unwrap();
    let again = cleaned(&extended_csv(50, 0.0));
    let second = manager.ensure_trained(&again, false).unwrap();
    assert_eq!(manager.training_runs(), 1);
    let (a, b) = (first.model().unwrap(), second.model().unwrap());
    assert!(Arc::ptr_eq(a, b));
    assert_eq!(a.metrics().test_rows, 10);
    assert_eq!(a.metrics().train_rows, 40);
}

#[test]
fn changing_one_value_retrains() {
    let mut manager = ModelManager::default();
    manager
        .ensure_trained(&cleaned(&extended_csv(50, 0.0)), false)
        .unwrap();
    manager
        .ensure_trained(&cleaned(&extended_csv(50, 0.001)), false)
        .unwrap();
    assert_eq!(manager.training_runs(), 2);
}

#[test]
fn scenario_e_yearly_buckets() {
    let data = cleaned(
        "Year,Month,Temperature,Rainfall,CO2\n\
         2021,1,14,4,410\n2019,1,10,2,400\n2020,6,12,3,405\n2019,6,12,4,402\n2021,6,16,6,412\n",
    );
    let rows = aggregate(&data, Granularity::Year);
    assert_eq!(rows.len(), 3);
    let years: Vec<i32> = rows.iter().map(|r| r.bucket.year).collect();
    assert_eq!(years, vec![2019, 2020, 2021]);
    assert_abs_diff_eq!(rows[0].temperature, 11.0);
    assert_abs_diff_eq!(rows[0].rainfall, 3.0);
    assert_abs_diff_eq!(rows[0].co2, 401.0);
    assert_abs_diff_eq!(rows[1].temperature, 12.0);
    assert_abs_diff_eq!(rows[2].temperature, 15.0);
    assert_abs_diff_eq!(rows[2].co2, 411.0);
}

#[test]
fn cleaning_round_trip_is_stable() {
    let raw = "Year,Month,Temperature,Rainfall,CO2,Humidity\n\
               2020,1,10.1,,400,55\n2020,1,10.1,,400,55\n2020,2,x,3.3,401.7,\n2021,3,9.9,2.2,,60\n";
    let once = cleaned(raw);
    let twice = cleaned(&dataset_to_csv(&once).unwrap());
    assert_eq!(once, twice);
    assert_eq!(once.fingerprint(), twice.fingerprint());
    assert_eq!(
        dataset_to_csv(&once).unwrap(),
        dataset_to_csv(&cleaned(raw)).unwrap()
    );
}

#[test]
fn training_is_reproducible_across_managers() {
    let data = cleaned(&extended_csv(60, 0.01));
    let a = lib::train_model(&data, 42, 0.2).unwrap().unwrap();
    let b = lib::train_model(&data, 42, 0.2).unwrap().unwrap();
    assert_eq!(a.metrics(), b.metrics());
    assert_eq!(a.coefficients(), b.coefficients());
}

#[test]
fn thresholds_are_monotonic() {
    let data = cleaned(&extended_csv(80, 0.05));
    let mut last = usize::MAX;
    for step in 10..=40 {
        let t = step as f64 / 10.0;
        let count = detect_anomalies(
            &data,
            &Thresholds {
                temperature: t,
                rainfall: t,
                co2: 2.0,
            },
        )
        .len();
        assert!(count <= last);
        last = count;
    }
}

#[test]
fn session_end_to_end() {
    let mut session = Session::new(5, PipelineConfig::default());
    session.upload("station.csv", &extended_csv(36, 0.0)).unwrap();

    let dashboard = session.dashboard(Some((2001, 2002))).unwrap();
    assert_eq!(dashboard.summary.rows, 24);
    assert_eq!(dashboard.yearly.len(), 2);

    let status = session.train(false).unwrap();
    let model = status.model().unwrap().clone();
    session.train(false).unwrap();
    assert_eq!(session.models().training_runs(), 1);

    let prediction = session.predict(model.feature_defaults()).unwrap();
    assert!(prediction.is_finite());

    let report = session.report().unwrap();
    assert_eq!(report.rows.len(), 36);
    assert_eq!(report.summary.year_min, 2000);
    assert_eq!(report.summary.year_max, 2002);

    let err = session
        .upload("broken.csv", "Year,Month,Temperature\n2020,1,3\n")
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumns(ref cols) if cols.len() == 2));
    assert_eq!(session.active().unwrap().name, "station.csv");
}

#[test]
fn constant_fractional_columns_never_flag() {
    let zero = Thresholds {
        temperature: 0.0,
        rainfall: 0.0,
        co2: 0.0,
    };
    for value in [0.1, 0.3, 1e-7, 123.456] {
        for rows in [2, 5, 12, 25] {
            let mut text = String::from("Year,Month,Temperature,Rainfall,CO2\n");
            for i in 0..rows {
                text.push_str(&format!("{},{},{},{},{}\n", 2000 + i / 12, 1 + i % 12, value, value, value));
            }
            let data = cleaned(&text);
            assert_eq!(data.len(), rows);
            let flagged = detect_anomalies(&data, &zero);
            assert!(flagged.is_empty(), "{value} x {rows}: {} flagged", flagged.len());
        }
    }
}
