use std::path::{Path, PathBuf};

use log::{info, warn};
use plotters::prelude::*;

use crate::config::{short_name, GraphSpec};
use crate::diagnostics::CollectionDiagnostics;
use crate::error::GraphError;
use crate::sample_table::SampleTable;

/// A validated graph with its rows sorted by x ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub x: Vec<f64>,
    /// `(label, y values)`; NaN marks a row where this series has no value.
    pub series: Vec<(String, Vec<f64>)>,
}

pub trait ChartSink {
    /// Renders one chart and returns where it went.
    fn render(&mut self, chart: &ChartData) -> Result<PathBuf, GraphError>;
}

/// Resolves a graph's fields against the collected table.
pub fn prepare_chart(spec: &GraphSpec, table: &SampleTable) -> Result<ChartData, GraphError> {
    let title = required(&spec.title, "title")?;
    let xlabel = required(&spec.xlabel, "xlabel")?;
    let ylabel = required(&spec.ylabel, "ylabel")?;
    let x_field = required(&spec.x_field, "dataX")?;
    let y_fields = match &spec.y_fields {
        Some(fields) if !fields.is_empty() => fields,
        _ => return Err(GraphError::MissingKey("dataY")),
    };

    let x_column = table
        .column(short_name(&x_field))
        .ok_or_else(|| GraphError::UnknownField(x_field.clone()))?;
    let y_columns = y_fields
        .iter()
        .map(|path| {
            let name = short_name(path);
            table
                .column(name)
                .map(|column| (name.to_string(), column))
                .ok_or_else(|| GraphError::UnknownField(path.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut order: Vec<(usize, f64)> = x_column
        .iter()
        .enumerate()
        .filter_map(|(row, value)| value.as_f64().map(|x| (row, x)))
        .filter(|(_, x)| x.is_finite())
        .collect();
    if order.is_empty() {
        return Err(GraphError::NoData);
    }
    order.sort_by(|a, b| a.1.total_cmp(&b.1));

    let series = y_columns
        .into_iter()
        .map(|(label, column)| {
            let ys = order
                .iter()
                .map(|&(row, _)| {
                    column
                        .get(row)
                        .and_then(|value| value.as_f64())
                        .unwrap_or(f64::NAN)
                })
                .collect();
            (label, ys)
        })
        .collect();

    Ok(ChartData {
        title,
        xlabel,
        ylabel,
        x: order.into_iter().map(|(_, x)| x).collect(),
        series,
    })
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, GraphError> {
    value
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .cloned()
        .ok_or(GraphError::MissingKey(key))
}

#[derive(Debug, Default)]
pub struct RenderReport {
    pub rendered: Vec<PathBuf>,
    pub skipped: Vec<(usize, GraphError)>,
}

/// Renders every graph it can; a bad graph is logged and skipped.
pub fn render_graphs(
    graphs: &[GraphSpec],
    table: &SampleTable,
    sink: &mut dyn ChartSink,
    diagnostics: Option<&CollectionDiagnostics>,
) -> RenderReport {
    let mut report = RenderReport::default();
    for (index, spec) in graphs.iter().enumerate() {
        match prepare_chart(spec, table).and_then(|chart| sink.render(&chart)) {
            Ok(path) => {
                info!("Saved graph #{} to {}", index, path.display());
                report.rendered.push(path);
            }
            Err(err) => {
                warn!("Skipping graph #{}: {}", index, err);
                if let Some(diagnostics) = diagnostics {
                    diagnostics.record_skipped_graph();
                }
                report.skipped.push((index, err));
            }
        }
    }
    report
}

/// Writes one SVG per chart: `<dir>/<stem>_<title slug>.svg`.
pub struct SvgChartSink {
    dir: PathBuf,
    stem: String,
    size: (u32, u32),
}

impl SvgChartSink {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            size: (1200, 700),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn path_for(&self, title: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.svg", self.stem, slug(title)))
    }
}

impl ChartSink for SvgChartSink {
    fn render(&mut self, chart: &ChartData) -> Result<PathBuf, GraphError> {
        let path = self.path_for(&chart.title);
        draw_svg(&path, self.size, chart).map_err(|e| GraphError::Render(e.to_string()))?;
        Ok(path)
    }
}

fn draw_svg(
    path: &Path,
    size: (u32, u32),
    data: &ChartData,
) -> Result<(), Box<dyn std::error::Error>> {
    let (x_min, x_max) = padded_range(data.x.iter().copied());
    let (y_min, y_max) = padded_range(
        data.series
            .iter()
            .flat_map(|(_, ys)| ys.iter().copied()),
    );

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(&data.title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(data.xlabel.as_str())
        .y_desc(data.ylabel.as_str())
        .draw()?;

    for (index, (label, ys)) in data.series.iter().enumerate() {
        let color = Palette99::pick(index).to_rgba();
        let points: Vec<(f64, f64)> = data
            .x
            .iter()
            .zip(ys)
            .filter(|(_, y)| y.is_finite())
            .map(|(x, y)| (*x, *y))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() {
        return (-1.0, 1.0);
    }
    if (max - min).abs() < 1e-9 {
        return (min - 1.0, max + 1.0);
    }
    let pad = 0.05 * (max - min);
    (min - pad, max + pad)
}

fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "graph".to_string()
    } else {
        trimmed.to_string()
    }
}
