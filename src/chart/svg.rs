//! Standalone SVG export for a [`Chart`].

use super::{Chart, ChartData, ChartFamily};
use crate::table::Value;
use std::f64::consts::PI;
use std::fmt::Write;

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 440.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 70.0;
const HISTOGRAM_BINS: usize = 10;
const PALETTE: &[&str] = &[
    "#4c78a8", "#f58518", "#e45756", "#72b7b2", "#54a24b", "#eeca3b", "#b279a2", "#ff9da6",
    "#9d755d", "#bab0ac",
];

/// Plot area in pixel coordinates.
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Frame {
    fn new() -> Self {
        Self {
            left: MARGIN_LEFT,
            top: MARGIN_TOP,
            width: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
            height: HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
        }
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Linear mapping from a data range onto a pixel range.
#[derive(Clone, Copy)]
struct Scale {
    min: f64,
    max: f64,
}

impl Scale {
    fn from_values(values: impl Iterator<Item = f64>, include_zero: bool) -> Self {
        let (mut min, mut max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if !min.is_finite() || !max.is_finite() {
            min = 0.0;
            max = 1.0;
        }
        if include_zero {
            min = min.min(0.0);
            max = max.max(0.0);
        }
        if (max - min).abs() < f64::EPSILON {
            max = min + 1.0;
        }
        Self { min, max }
    }

    fn fraction(&self, v: f64) -> f64 {
        (v - self.min) / (self.max - self.min)
    }
}

pub fn render(chart: &Chart) -> String {
    let mut svg = String::new();
    let frame = Frame::new();

    let _ = writeln!(
        &mut svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = WIDTH,
        h = HEIGHT
    );
    let _ = writeln!(
        &mut svg,
        r#"<style>
  .title {{ font-family: sans-serif; font-size: 16px; font-weight: bold; }}
  .label {{ font-family: sans-serif; font-size: 12px; fill: #333; }}
  .tick {{ font-family: sans-serif; font-size: 10px; fill: #555; }}
  .axis {{ stroke: #333; stroke-width: 1; }}
</style>"#
    );
    let _ = writeln!(&mut svg, r##"<rect width="100%" height="100%" fill="#fff"/>"##);
    let _ = writeln!(
        &mut svg,
        r#"<text class="title" x="{}" y="28" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        escape_xml(&chart.title)
    );

    match (&chart.family, &chart.data) {
        (ChartFamily::Pie, ChartData::Slices { labels, values }) => {
            render_pie(&mut svg, &frame, labels, values);
        }
        (ChartFamily::Histogram, ChartData::Distribution { values }) => {
            render_axes(&mut svg, &frame, chart);
            render_histogram(&mut svg, &frame, values);
        }
        (family, ChartData::Xy { x, y }) => {
            render_axes(&mut svg, &frame, chart);
            match family {
                ChartFamily::Line => render_line(&mut svg, &frame, x, y),
                ChartFamily::Scatter => render_scatter(&mut svg, &frame, x, y),
                _ => {
                    let labels: Vec<String> = x.iter().map(|v| v.to_string()).collect();
                    render_bars(&mut svg, &frame, &labels, y)
                }
            }
        }
        _ => {}
    }

    let _ = writeln!(&mut svg, "</svg>");
    svg
}

fn render_axes(svg: &mut String, frame: &Frame, chart: &Chart) {
    let _ = writeln!(
        svg,
        r#"<line class="axis" x1="{l}" y1="{b}" x2="{r}" y2="{b}"/>"#,
        l = frame.left,
        r = frame.left + frame.width,
        b = frame.bottom()
    );
    let _ = writeln!(
        svg,
        r#"<line class="axis" x1="{l}" y1="{t}" x2="{l}" y2="{b}"/>"#,
        l = frame.left,
        t = frame.top,
        b = frame.bottom()
    );
    let _ = writeln!(
        svg,
        r#"<text class="label" x="{}" y="{}" text-anchor="middle">{}</text>"#,
        frame.left + frame.width / 2.0,
        HEIGHT - 15.0,
        escape_xml(&chart.x_label)
    );
    let _ = writeln!(
        svg,
        r#"<text class="label" x="18" y="{y}" text-anchor="middle" transform="rotate(-90 18 {y})">{}</text>"#,
        escape_xml(&chart.y_label),
        y = frame.top + frame.height / 2.0
    );
}

fn y_ticks(svg: &mut String, frame: &Frame, scale: Scale) {
    for i in 0..=4 {
        let v = scale.min + (scale.max - scale.min) * i as f64 / 4.0;
        let py = frame.bottom() - frame.height * scale.fraction(v);
        let _ = writeln!(
            svg,
            r#"<text class="tick" x="{}" y="{:.1}" text-anchor="end">{}</text>"#,
            frame.left - 6.0,
            py + 3.0,
            format_number(v)
        );
    }
}

fn render_bars(svg: &mut String, frame: &Frame, labels: &[String], y: &[Option<f64>]) {
    let scale = Scale::from_values(y.iter().flatten().copied(), true);
    y_ticks(svg, frame, scale);

    let slot = frame.width / labels.len().max(1) as f64;
    let zero = frame.bottom() - frame.height * scale.fraction(0.0);
    for (i, (label, value)) in labels.iter().zip(y).enumerate() {
        let v = value.unwrap_or(0.0);
        let top = frame.bottom() - frame.height * scale.fraction(v);
        let x = frame.left + slot * i as f64 + slot * 0.1;
        let _ = writeln!(
            svg,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{}: {}</title></rect>"#,
            x,
            top.min(zero),
            slot * 0.8,
            (zero - top).abs(),
            PALETTE[0],
            escape_xml(label),
            format_number(v)
        );
        let _ = writeln!(
            svg,
            r#"<text class="tick" x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            x + slot * 0.4,
            frame.bottom() + 14.0,
            escape_xml(&truncate(label, 10))
        );
    }
}

fn points(frame: &Frame, x: &[Value], y: &[Option<f64>]) -> (Vec<(f64, f64)>, Scale) {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(x, y)| Some((x.as_f64()?, (*y)?)))
        .collect();
    let xs = Scale::from_values(pairs.iter().map(|p| p.0), false);
    let ys = Scale::from_values(pairs.iter().map(|p| p.1), false);
    let mapped = pairs
        .iter()
        .map(|(px, py)| {
            (
                frame.left + frame.width * xs.fraction(*px),
                frame.bottom() - frame.height * ys.fraction(*py),
            )
        })
        .collect();
    (mapped, ys)
}

fn render_line(svg: &mut String, frame: &Frame, x: &[Value], y: &[Option<f64>]) {
    let (mapped, ys) = points(frame, x, y);
    y_ticks(svg, frame, ys);
    let path = mapped
        .iter()
        .map(|(px, py)| format!("{:.1},{:.1}", px, py))
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(
        svg,
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
        path, PALETTE[0]
    );
}

fn render_scatter(svg: &mut String, frame: &Frame, x: &[Value], y: &[Option<f64>]) {
    let (mapped, ys) = points(frame, x, y);
    y_ticks(svg, frame, ys);
    for (px, py) in mapped {
        let _ = writeln!(
            svg,
            r#"<circle cx="{:.1}" cy="{:.1}" r="4" fill="{}" fill-opacity="0.7"/>"#,
            px, py, PALETTE[0]
        );
    }
}

/// Equal-width bin counts over the value range.
fn bin_counts(values: &[f64], bins: usize) -> (Scale, Vec<usize>) {
    let scale = Scale::from_values(values.iter().copied(), false);
    let mut counts = vec![0usize; bins];
    for v in values {
        let idx = ((scale.fraction(*v) * bins as f64) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    (scale, counts)
}

fn render_histogram(svg: &mut String, frame: &Frame, values: &[f64]) {
    let (range, counts) = bin_counts(values, HISTOGRAM_BINS);
    let max_count = counts.iter().copied().max().unwrap_or(0);
    let scale = Scale::from_values([0.0, max_count as f64].into_iter(), true);
    y_ticks(svg, frame, scale);

    let slot = frame.width / HISTOGRAM_BINS as f64;
    for (i, count) in counts.iter().enumerate() {
        let h = frame.height * scale.fraction(*count as f64);
        let _ = writeln!(
            svg,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" stroke="#fff"/>"##,
            frame.left + slot * i as f64,
            frame.bottom() - h,
            slot,
            h,
            PALETTE[0]
        );
    }
    for i in [0, HISTOGRAM_BINS] {
        let v = range.min + (range.max - range.min) * i as f64 / HISTOGRAM_BINS as f64;
        let _ = writeln!(
            svg,
            r#"<text class="tick" x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            frame.left + slot * i as f64,
            frame.bottom() + 14.0,
            format_number(v)
        );
    }
}

fn render_pie(svg: &mut String, frame: &Frame, labels: &[String], values: &[f64]) {
    let total: f64 = values.iter().filter(|v| **v > 0.0).sum();
    let radius = frame.height / 2.0;
    let (cx, cy) = (frame.left + radius + 20.0, frame.top + radius);

    let mut angle = -PI / 2.0;
    for (i, (label, value)) in labels.iter().zip(values).enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        if total > 0.0 && *value > 0.0 {
            let sweep = value / total * 2.0 * PI;
            if (sweep - 2.0 * PI).abs() < 1e-9 {
                let _ = writeln!(svg, r#"<circle cx="{}" cy="{}" r="{}" fill="{}"/>"#, cx, cy, radius, color);
            } else {
                let (x1, y1) = (cx + radius * angle.cos(), cy + radius * angle.sin());
                let end = angle + sweep;
                let (x2, y2) = (cx + radius * end.cos(), cy + radius * end.sin());
                let large = if sweep > PI { 1 } else { 0 };
                let _ = writeln!(
                    svg,
                    r##"<path d="M{cx:.1},{cy:.1} L{x1:.1},{y1:.1} A{r:.1},{r:.1} 0 {large} 1 {x2:.1},{y2:.1} Z" fill="{color}" stroke="#fff"/>"##,
                    cx = cx,
                    cy = cy,
                    x1 = x1,
                    y1 = y1,
                    r = radius,
                    large = large,
                    x2 = x2,
                    y2 = y2,
                    color = color
                );
            }
            angle += sweep;
        }

        let ly = frame.top + 10.0 + i as f64 * 20.0;
        let lx = cx + radius + 40.0;
        let share = if total > 0.0 { value / total * 100.0 } else { 0.0 };
        let _ = writeln!(svg, r#"<rect x="{}" y="{}" width="12" height="12" fill="{}"/>"#, lx, ly, color);
        let _ = writeln!(
            svg,
            r#"<text class="label" x="{}" y="{}">{} ({:.1}%)</text>"#,
            lx + 18.0,
            ly + 10.0,
            escape_xml(&truncate(label, 24)),
            share
        );
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart(family: ChartFamily, data: ChartData) -> Chart {
        Chart {
            family,
            title: "Sales <by> item".to_string(),
            x_label: "item_id".to_string(),
            y_label: "sales".to_string(),
            data,
        }
    }

    #[test]
    fn test_render_bar() {
        let svg = render(&chart(
            ChartFamily::Bar,
            ChartData::Xy {
                x: vec![Value::from("A1"), Value::from("A2")],
                y: vec![Some(10.0), Some(25.0)],
            },
        ));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<rect x=").count(), 2);
        assert!(svg.contains("Sales &lt;by&gt; item"));
    }

    #[test]
    fn test_render_line_and_scatter() {
        let data = ChartData::Xy {
            x: vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
            y: vec![Some(1.0), None, Some(3.0)],
        };
        let line = render(&chart(ChartFamily::Line, data.clone()));
        assert!(line.contains("<polyline"));

        let scatter = render(&chart(ChartFamily::Scatter, data));
        assert_eq!(scatter.matches("<circle").count(), 2);
    }

    #[test]
    fn test_render_pie_single_slice_is_full_circle() {
        let svg = render(&chart(
            ChartFamily::Pie,
            ChartData::Slices {
                labels: vec!["A1".to_string()],
                values: vec![5.0],
            },
        ));
        assert!(svg.contains("<circle"));
        assert!(svg.contains("A1 (100.0%)"));
    }

    #[test]
    fn test_histogram_bins_cover_all_values() {
        let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
        let (_, counts) = bin_counts(&values, HISTOGRAM_BINS);
        assert_eq!(counts.iter().sum::<usize>(), 100);
        assert_eq!(counts[9], 10);

        let svg = render(&chart(ChartFamily::Histogram, ChartData::Distribution { values }));
        assert!(svg.contains("<rect x="));
    }
}
