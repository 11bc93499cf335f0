//! Interactive terminal figures for one fitted outcome.
//!
//! Two figures are drawn with ratatui: a trace figure (per-chain density on
//! the left, value over iteration on the right, one row per parameter) and a
//! posterior figure (density, HDI and mean, one panel per parameter). Each
//! figure stays on screen until a key is pressed.

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::prelude::*;
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType};
use std::io::{self, IsTerminal, Stdout};

use crate::report::diagnostics::quantile_sorted;
use crate::report::summary::PosteriorSummary;
use crate::sampler::PosteriorTrace;

const CHAIN_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightRed,
    Color::LightBlue,
];

/// Points per density curve.
const DENSITY_POINTS: usize = 128;
/// Upper bound on points per trace line.
const MAX_TRACE_POINTS: usize = 600;

/// Alternate-screen session; the terminal is restored on drop.
struct FigureWindow {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl FigureWindow {
    fn open() -> io::Result<Self> {
        if !io::stdout().is_terminal() {
            return Err(io::Error::other("stdout is not a terminal"));
        }
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }
}

impl Drop for FigureWindow {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

fn wait_for_key() -> io::Result<()> {
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(());
            }
        }
    }
}

/// True when figures can be shown on this process's stdout.
pub fn can_display() -> bool {
    io::stdout().is_terminal()
}

/// Shows the trace figure, then the posterior figure, each until a key press.
pub fn show_figures(
    outcome: &str,
    trace: &PosteriorTrace,
    summary: &PosteriorSummary,
) -> io::Result<()> {
    let mut window = FigureWindow::open()?;

    let trace_panels = trace_panels(trace);
    window.terminal.draw(|f| draw_trace_figure(f, outcome, &trace_panels))?;
    wait_for_key()?;

    let posterior_panels = posterior_panels(trace, summary);
    window
        .terminal
        .draw(|f| draw_posterior_figure(f, outcome, summary.hdi_prob, &posterior_panels))?;
    wait_for_key()?;

    Ok(())
}

// =============================================================================
// Data preparation (pure)
// =============================================================================

/// Gaussian kernel density estimate with Silverman's bandwidth, evaluated on
/// `n_points` evenly spaced points spanning the data plus three bandwidths.
pub fn density_curve(values: &[f64], n_points: usize) -> Vec<(f64, f64)> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || n_points < 2 {
        return Vec::new();
    }
    let mut sorted = finite.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let sd = (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let iqr = quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25);
    let spread = if iqr > 0.0 { sd.min(iqr / 1.34) } else { sd };
    let mut bandwidth = 0.9 * spread * n.powf(-0.2);
    if !(bandwidth > 0.0) {
        bandwidth = 1e-3 * mean.abs().max(1.0);
    }

    let lo = sorted[0] - 3.0 * bandwidth;
    let hi = sorted[sorted.len() - 1] + 3.0 * bandwidth;
    let step = (hi - lo) / (n_points - 1) as f64;
    let norm = 1.0 / (n * bandwidth * (2.0 * std::f64::consts::PI).sqrt());

    (0..n_points)
        .map(|i| {
            let x = lo + i as f64 * step;
            let density = sorted
                .iter()
                .map(|v| {
                    let z = (x - v) / bandwidth;
                    (-0.5 * z * z).exp()
                })
                .sum::<f64>()
                * norm;
            (x, density)
        })
        .collect()
}

/// `(iteration, value)` pairs, keeping every k-th draw so at most `max_points` remain.
pub fn thinned_series(values: &[f64], max_points: usize) -> Vec<(f64, f64)> {
    let stride = values.len().div_ceil(max_points.max(1)).max(1);
    values
        .iter()
        .enumerate()
        .step_by(stride)
        .map(|(i, v)| (i as f64, *v))
        .collect()
}

struct TracePanel {
    name: String,
    densities: Vec<Vec<(f64, f64)>>,
    series: Vec<Vec<(f64, f64)>>,
}

fn trace_panels(trace: &PosteriorTrace) -> Vec<TracePanel> {
    trace
        .parameter_names()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let draws = trace.parameter_at(idx);
            let chains: Vec<Vec<f64>> = draws.outer_iter().map(|c| c.to_vec()).collect();
            TracePanel {
                name: name.clone(),
                densities: chains
                    .iter()
                    .map(|c| density_curve(c, DENSITY_POINTS))
                    .collect(),
                series: chains
                    .iter()
                    .map(|c| thinned_series(c, MAX_TRACE_POINTS))
                    .collect(),
            }
        })
        .collect()
}

struct PosteriorPanel {
    name: String,
    density: Vec<(f64, f64)>,
    hdi: [(f64, f64); 2],
    mean_line: [(f64, f64); 2],
    mean: f64,
}

fn posterior_panels(trace: &PosteriorTrace, summary: &PosteriorSummary) -> Vec<PosteriorPanel> {
    summary
        .rows
        .iter()
        .filter_map(|row| {
            let values = trace.flat_samples(&row.name)?;
            let density = density_curve(&values, DENSITY_POINTS);
            let peak = density.iter().map(|(_, y)| *y).fold(0.0, f64::max);
            Some(PosteriorPanel {
                name: row.name.clone(),
                density,
                hdi: [(row.hdi_lower, 0.0), (row.hdi_upper, 0.0)],
                mean_line: [(row.mean, 0.0), (row.mean, peak)],
                mean: row.mean,
            })
        })
        .collect()
}

// =============================================================================
// Drawing
// =============================================================================

fn bounds(points: impl Iterator<Item = (f64, f64)>) -> ([f64; 2], [f64; 2]) {
    let (mut x0, mut x1, mut y0, mut y1) = (
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::INFINITY,
        f64::NEG_INFINITY,
    );
    for (x, y) in points {
        x0 = x0.min(x);
        x1 = x1.max(x);
        y0 = y0.min(y);
        y1 = y1.max(y);
    }
    if !(x0 < x1) {
        (x0, x1) = (x0 - 1.0, x0 + 1.0);
    }
    if !(y0 < y1) {
        (y0, y1) = (y0 - 1.0, y0 + 1.0);
    }
    ([x0, x1], [y0, y1])
}

fn axis_labels(range: [f64; 2]) -> Vec<Line<'static>> {
    vec![
        Line::from(format!("{:.2}", range[0])),
        Line::from(format!("{:.2}", range[1])),
    ]
}

fn chain_color(chain: usize) -> Color {
    CHAIN_COLORS[chain % CHAIN_COLORS.len()]
}

fn draw_trace_figure(f: &mut Frame, outcome: &str, panels: &[TracePanel]) {
    let outer = Block::default()
        .title(format!("Trace: {outcome}  (press any key)"))
        .borders(Borders::ALL);
    let area = outer.inner(f.area());
    f.render_widget(outer, f.area());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, panels.len().max(1) as u32); panels.len()])
        .split(area);

    for (panel, row) in panels.iter().zip(rows.iter()) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(*row);

        let (x_range, y_range) = bounds(panel.densities.iter().flatten().copied());
        let densities: Vec<Dataset> = panel
            .densities
            .iter()
            .enumerate()
            .map(|(chain, points)| {
                Dataset::default()
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(chain_color(chain)))
                    .data(points)
            })
            .collect();
        let density_chart = Chart::new(densities)
            .block(Block::default().title(panel.name.as_str()).borders(Borders::ALL))
            .x_axis(Axis::default().bounds(x_range).labels(axis_labels(x_range)))
            .y_axis(Axis::default().bounds(y_range));
        f.render_widget(density_chart, cols[0]);

        let (x_range, y_range) = bounds(panel.series.iter().flatten().copied());
        let series: Vec<Dataset> = panel
            .series
            .iter()
            .enumerate()
            .map(|(chain, points)| {
                Dataset::default()
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(chain_color(chain)))
                    .data(points)
            })
            .collect();
        let series_chart = Chart::new(series)
            .block(Block::default().borders(Borders::ALL))
            .x_axis(Axis::default().bounds(x_range).labels(axis_labels(x_range)))
            .y_axis(Axis::default().bounds(y_range).labels(axis_labels(y_range)));
        f.render_widget(series_chart, cols[1]);
    }
}

fn draw_posterior_figure(f: &mut Frame, outcome: &str, hdi_prob: f64, panels: &[PosteriorPanel]) {
    let outer = Block::default()
        .title(format!("Posterior: {outcome}  (press any key)"))
        .borders(Borders::ALL);
    let area = outer.inner(f.area());
    f.render_widget(outer, f.area());

    let n_rows = panels.len().div_ceil(2).max(1);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, n_rows as u32); n_rows])
        .split(area);

    for (idx, panel) in panels.iter().enumerate() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[idx / 2]);

        let (x_range, y_range) = bounds(
            panel
                .density
                .iter()
                .chain(panel.hdi.iter())
                .copied(),
        );
        let datasets = vec![
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Cyan))
                .data(&panel.density),
            Dataset::default()
                .name(format!("{:.0}% HDI", hdi_prob * 100.0))
                .marker(symbols::Marker::Block)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Yellow))
                .data(&panel.hdi),
            Dataset::default()
                .name("mean")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::White))
                .data(&panel.mean_line),
        ];
        let title = format!(
            "{}  mean={:.3}  HDI [{:.3}, {:.3}]",
            panel.name, panel.mean, panel.hdi[0].0, panel.hdi[1].0
        );
        let chart = Chart::new(datasets)
            .block(Block::default().title(title).borders(Borders::ALL))
            .x_axis(Axis::default().bounds(x_range).labels(axis_labels(x_range)))
            .y_axis(Axis::default().bounds(y_range));
        f.render_widget(chart, cols[idx % 2]);
    }
}
