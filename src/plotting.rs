use crate::error::{PipelineError, Result};
use log::debug;
use plotters::prelude::*;
use std::path::Path;

const DPI: f64 = 300.0;
const PALETTE: [RGBColor; 5] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
];

/// One labelled trace. Non-finite samples split the line into separate runs.
#[derive(Debug, Clone)]
pub struct Series {
    pub label: String,
    pub runs: Vec<Vec<(f64, f64)>>,
    pub width: u32,
}

impl Series {
    pub fn new(label: impl Into<String>, x: &[f64], y: &[f64]) -> Self {
        let mut runs = Vec::new();
        let mut current = Vec::new();
        for (&xi, &yi) in x.iter().zip(y) {
            if xi.is_finite() && yi.is_finite() {
                current.push((xi, yi));
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        Self {
            label: label.into(),
            runs,
            width: 1,
        }
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    fn points(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.runs.iter().flatten()
    }
}

#[derive(Debug, Clone)]
pub struct LineChart {
    pub title: String,
    pub subtitle: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
    /// Fixed y limits; otherwise fitted to the data
    pub y_range: Option<(f64, f64)>,
    pub y_tick_step: Option<f64>,
    /// Text placed in the upper left corner of the plot area
    pub annotation: Option<String>,
    pub size_inches: (f64, f64),
}

/// Span of the data, widened when empty or degenerate.
fn data_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        (0.0, 1.0)
    } else if (hi - lo).abs() < f64::EPSILON {
        (lo - 0.5, hi + 0.5)
    } else {
        let pad = (hi - lo) * 0.05;
        (lo - pad, hi + pad)
    }
}

fn tick_count(range: (f64, f64), step: f64) -> usize {
    if step <= 0.0 || !step.is_finite() {
        return 10;
    }
    ((range.1 - range.0) / step).round() as usize + 1
}

fn pixel_size(size_inches: (f64, f64)) -> (u32, u32) {
    (
        (size_inches.0 * DPI).round() as u32,
        (size_inches.1 * DPI).round() as u32,
    )
}

pub fn render_line_chart(path: &Path, chart: &LineChart) -> Result<()> {
    let (width, height) = pixel_size(chart.size_inches);
    // Font sizes are given in points
    let pt = DPI / 72.0;

    let x_range = data_range(chart.series.iter().flat_map(|s| s.points().map(|p| p.0)));
    let y_range = match chart.y_range {
        Some((lo, hi)) if hi > lo => (lo, hi),
        Some(_) | None => data_range(chart.series.iter().flat_map(|s| s.points().map(|p| p.1))),
    };
    debug!(
        "Rendering {} ({}x{} px), x {:?}, y {:?}",
        path.display(),
        width,
        height,
        x_range,
        y_range
    );

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(&chart.title, ("sans-serif", 16.0 * pt))?;
    let root = root.titled(&chart.subtitle, ("sans-serif", 11.0 * pt))?;

    let mut ctx = ChartBuilder::on(&root)
        .margin((10.0 * pt) as u32)
        .x_label_area_size((30.0 * pt) as u32)
        .y_label_area_size((45.0 * pt) as u32)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;

    let y_labels = chart
        .y_tick_step
        .map(|step| tick_count(y_range, step))
        .unwrap_or(10);
    ctx.configure_mesh()
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .y_labels(y_labels)
        .y_label_formatter(&|v| format!("{:.2}", v))
        .label_style(("sans-serif", 9.0 * pt))
        .axis_desc_style(("sans-serif", 11.0 * pt))
        .light_line_style(BLACK.mix(0.05))
        .draw()?;

    for (idx, series) in chart.series.iter().enumerate() {
        let color = PALETTE[idx % PALETTE.len()];
        let stroke = (series.width as f64 * pt).round() as u32;
        for (run_idx, run) in series.runs.iter().enumerate() {
            let drawn = ctx.draw_series(LineSeries::new(
                run.iter().copied(),
                color.stroke_width(stroke),
            ))?;
            if run_idx == 0 {
                drawn
                    .label(series.label.as_str())
                    .legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(stroke))
                    });
            }
        }
    }

    if let Some(text) = &chart.annotation {
        let anchor = (
            x_range.0 + (x_range.1 - x_range.0) * 0.02,
            y_range.1 - (y_range.1 - y_range.0) * 0.04,
        );
        ctx.draw_series(std::iter::once(Text::new(
            text.clone(),
            anchor,
            ("sans-serif", 10.0 * pt),
        )))?;
    }

    if chart.series.iter().any(|s| !s.runs.is_empty()) {
        ctx.configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .label_font(("sans-serif", 9.0 * pt))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()
        .map_err(|e| PipelineError::Plot(format!("{}: {e:?}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_splits_series_into_runs() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [1.0, f64::NAN, 2.0, 3.0, f64::NAN];
        let series = Series::new("HF", &x, &y).width(2);
        assert_eq!(series.runs, vec![vec![(0.0, 1.0)], vec![(2.0, 2.0), (3.0, 3.0)]]);
        assert_eq!(series.width, 2);
    }

    #[test]
    fn ranges_fall_back_when_degenerate() {
        assert_eq!(data_range(std::iter::empty()), (0.0, 1.0));
        assert_eq!(data_range([2.0, 2.0].into_iter()), (1.5, 2.5));
        let (lo, hi) = data_range([0.0, 10.0].into_iter());
        assert!(lo < 0.0 && hi > 10.0);
    }

    #[test]
    fn quarter_ticks_cover_the_axis() {
        assert_eq!(tick_count((-1.0, 4.0), 0.25), 21);
        assert_eq!(pixel_size((12.0, 6.0)), (3600, 1800));
    }
}
