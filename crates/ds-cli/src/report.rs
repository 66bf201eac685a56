//! CSV and JSON result writers.
//!
//! One grid CSV and one cross-section CSV per extraction level, plus a JSON
//! summary of the whole report. Rows are order-preserved: one per grid
//! point, one per process.

use anyhow::{Context, Result};
use ds_comb::vecops::xi_to_delta_y;
use ds_inference::pipeline::AnalysisReport;
use ds_inference::scan::LevelScan;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write the (delta, xi_max) fit-metric surface of one level.
pub fn write_grid_csv(path: &Path, scan: &LevelScan) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    writeln!(
        w,
        "# fit point, mass re-weight delta, min rapidity gap, mean neg log L, mean KL, mean KS, \
         mean chi2"
    )?;
    for (n, point) in scan.grid.iter().enumerate() {
        writeln!(
            w,
            "{}, {:.5}, {:.5}, {:.2}, {:.9}, {:.9}, {:.2}",
            n,
            point.delta,
            point.delta_y,
            point.mean_neg_log_l,
            point.mean_kl,
            point.mean_ks,
            point.mean_chi2
        )?;
    }
    Ok(())
}

/// Write the per-process cross sections of every grid point of one level.
pub fn write_cross_sections_csv(path: &Path, scan: &LevelScan) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    let quantity = match scan.level.number() {
        1 => "visible",
        2 => "fiducial",
        _ => "total",
    };
    writeln!(
        w,
        "# process, {quantity} xs [mb], stat uncert, lumi uncert, efficiency, neg log L, KL, KS, \
         chi2, delta, min rapidity gap"
    )?;
    for point in &scan.grid {
        for xs in &point.cross_sections {
            writeln!(
                w,
                "{}, {:.5}, {:.5}, {:.5}, {:.5}, {:.5}, {:.5}, {:.5}, {:.5}, {:.4}, {:.4}",
                xs.process.label(),
                xs.value,
                xs.stat,
                xs.lumi,
                xs.eff,
                xs.neg_log_l,
                xs.kl,
                xs.ks,
                xs.chi2,
                xs.delta,
                xi_to_delta_y(xs.xi_max)
            )?;
        }
    }
    Ok(())
}

/// Write the full report as pretty JSON.
pub fn write_summary_json(path: &Path, report: &AnalysisReport) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

/// Write every output of a finished run into `output_dir`.
pub fn write_all(output_dir: &Path, report: &AnalysisReport) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    for scan in &report.levels {
        let level = scan.level.number();
        write_grid_csv(&output_dir.join(format!("fit_level_{level}.csv")), scan)?;
        write_cross_sections_csv(
            &output_dir.join(format!("cross_sections_level_{level}.csv")),
            scan,
        )?;
    }
    write_summary_json(&output_dir.join("summary.json"), report)?;
    Ok(())
}
