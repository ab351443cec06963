//! Kinematic CSV tables.
//!
//! One row per processed frame, one column group per object in declaration
//! order. Values are calibrated and, with `flip_y`, the Y axis points up.
//! Missing values (untrackable objects, failed differentiation) are empty
//! cells.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::calibration::Calibration;
use crate::differentiation::AxisDerivatives;
use crate::models::{KinematicSample, Point, Trajectory};
use crate::tracking::SectionRun;

use super::types::ObjectDerivatives;

/// Output path for a video: `<stem>.csv`, or `<stem>.incomplete.csv` for
/// cancelled runs.
pub fn csv_path(video: &Path, incomplete: bool) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = if incomplete {
        format!("{}.incomplete.csv", stem)
    } else {
        format!("{}.csv", stem)
    };
    video.with_file_name(name)
}

/// Calibrated samples of one object.
pub fn kinematic_samples(
    trajectory: &Trajectory,
    derivatives: &AxisDerivatives,
    calibration: &Calibration,
    flip_y: bool,
) -> Vec<KinematicSample> {
    let sign = if flip_y { -1.0 } else { 1.0 };
    let scaled = |x: f64, y: f64| Point::new(calibration.apply(x), sign * calibration.apply(y));
    trajectory
        .samples
        .iter()
        .enumerate()
        .filter_map(|(i, sample)| {
            Some(KinematicSample {
                time_secs: sample.time_secs,
                position: scaled(sample.x, sample.y),
                velocity: scaled(*derivatives.x.velocity.get(i)?, *derivatives.y.velocity.get(i)?),
                acceleration: scaled(
                    *derivatives.x.acceleration.get(i)?,
                    *derivatives.y.acceleration.get(i)?,
                ),
            })
        })
        .collect()
}

/// A table ready to be written as CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicTable {
    header: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl KinematicTable {
    /// Assemble the table of one tracked section.
    pub fn build(
        run: &SectionRun,
        derivatives: &[ObjectDerivatives],
        calibration: &Calibration,
        fps: f64,
        flip_y: bool,
        size_tracking: bool,
    ) -> Self {
        let unit = calibration.unit().as_str();
        let sign = if flip_y { -1.0 } else { 1.0 };
        let row_count = run.frames_processed;

        let mut header = vec!["Time (s)".to_string()];
        let mut rows: Vec<Vec<Option<f64>>> = (0..row_count)
            .map(|i| vec![Some(i as f64 / fps)])
            .collect();

        for trajectory in &run.trajectories {
            let name = &trajectory.object_name;
            header.push(format!("{} X pos ({})", name, unit));
            header.push(format!("{} Y pos ({})", name, unit));
            header.push(format!("{} X vel ({}/s)", name, unit));
            header.push(format!("{} Y vel ({}/s)", name, unit));
            header.push(format!("{} X acc ({}/s^2)", name, unit));
            header.push(format!("{} Y acc ({}/s^2)", name, unit));
            if size_tracking {
                header.push(format!("{} width ({})", name, unit));
                header.push(format!("{} height ({})", name, unit));
            }

            let kinematics = derivatives
                .iter()
                .find(|d| &d.object_name == name)
                .and_then(|d| d.result.as_ref().ok())
                .map(|d| kinematic_samples(trajectory, d, calibration, flip_y))
                .unwrap_or_default();

            for (i, row) in rows.iter_mut().enumerate() {
                let sample = trajectory.samples.get(i);
                let position = sample.map(|s| (calibration.apply(s.x), sign * calibration.apply(s.y)));
                row.push(position.map(|p| p.0));
                row.push(position.map(|p| p.1));

                let k = kinematics.get(i);
                row.push(k.map(|k| k.velocity.x));
                row.push(k.map(|k| k.velocity.y));
                row.push(k.map(|k| k.acceleration.x));
                row.push(k.map(|k| k.acceleration.y));

                if size_tracking {
                    let size = sample.and_then(|s| s.size);
                    row.push(size.map(|(w, _)| calibration.apply(w)));
                    row.push(size.map(|(_, h)| calibration.apply(h)));
                }
            }
        }

        Self { header, rows }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Write to `path` via a temp file in the same directory and a rename.
    pub fn write_atomic(&self, path: &Path) -> io::Result<()> {
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let result = self.write_to(&temp_path).and_then(|_| fs::rename(&temp_path, path));
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn write_to(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| match cell {
                Some(v) => v.to_string(),
                None => String::new(),
            }))?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}
