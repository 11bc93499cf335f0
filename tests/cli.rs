use std::fs;
use std::process::Command;

use tempfile::tempdir;

/// Forty subjects, two outcomes; the second has a few missing cells.
fn write_scores(path: &std::path::Path) {
    let mut text = String::from("id,age,sex,education,group,site,mmse,naming\n");
    for i in 0..40 {
        let age = 58 + (i * 7) % 25;
        let sex = if i % 3 == 0 { "M" } else { "F" };
        let education = 8 + (i * 5) % 11;
        let group = if i % 2 == 0 { "nappa" } else { "dpa" };
        let mmse = 20 + (i * 3) % 9 + if group == "nappa" { 2 } else { 0 };
        let naming = if i % 8 == 5 {
            String::new()
        } else {
            format!("{}", 40 + (i * 11) % 17)
        };
        text.push_str(&format!(
            "s{i},{age},{sex},{education},{group},north,{mmse},{naming}\n"
        ));
    }
    fs::write(path, text).expect("write scores");
}

fn small_run_args() -> [&'static str; 9] {
    [
        "--no-plots",
        "--draws",
        "200",
        "--tune",
        "200",
        "--chains",
        "2",
        "--seed",
        "5",
    ]
}

#[test]
fn cli_prints_summary_and_sign_probabilities_per_outcome() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("scores.csv");
    write_scores(&data_path);

    let output = Command::new(env!("CARGO_BIN_EXE_cogreg"))
        .arg(&data_path)
        .args(small_run_args())
        .output()
        .expect("run cogreg");

    assert!(
        output.status.success(),
        "cogreg failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let rule = "=".repeat(44);
    assert!(stdout.contains(&format!("{rule}mmse{rule}")));
    assert!(stdout.contains(&format!("{rule}naming{rule}")));
    assert_eq!(stdout.matches("Posterior probabilities:").count(), 2);
    assert!(stdout.contains("hdi_2.5%"));
    assert!(stdout.contains("beta_group: P(β > 0) = "));
    assert!(stdout.contains("beta_sex[M]: P(β > 0) = "));
    assert!(stdout.find("mmse").unwrap() < stdout.find("naming").unwrap());
}

#[test]
fn cli_outcome_filter_runs_only_selected_columns() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("scores.csv");
    write_scores(&data_path);

    let output = Command::new(env!("CARGO_BIN_EXE_cogreg"))
        .arg(&data_path)
        .args(small_run_args())
        .args(["--outcome", "naming"])
        .output()
        .expect("run cogreg");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("Posterior probabilities:").count(), 1);
    assert!(!stdout.contains("mmse"));
}

#[test]
fn cli_reports_errors_with_exit_status_one() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("scores.csv");
    write_scores(&data_path);

    let missing = Command::new(env!("CARGO_BIN_EXE_cogreg"))
        .arg(tmp.path().join("absent.tsv"))
        .arg("--no-plots")
        .output()
        .expect("run cogreg");
    assert_eq!(missing.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&missing.stderr).contains("Error: "));

    let unknown = Command::new(env!("CARGO_BIN_EXE_cogreg"))
        .arg(&data_path)
        .args(["--no-plots", "--outcome", "fluency"])
        .output()
        .expect("run cogreg");
    assert_eq!(unknown.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("fluency"));

    let bad_config = tmp.path().join("bad.toml");
    fs::write(&bad_config, "[report]\nhdi_prob = 1.5\n").expect("write config");
    let invalid = Command::new(env!("CARGO_BIN_EXE_cogreg"))
        .arg(&data_path)
        .arg("--config")
        .arg(&bad_config)
        .output()
        .expect("run cogreg");
    assert_eq!(invalid.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&invalid.stderr).contains("hdi_prob"));
}
