// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Table extraction from ruling lines and positioned text.
//
// Ruled tables only: segments are split into horizontal and vertical rules,
// grouped into connected grids, and each grid's snapped boundaries define the
// cells. A grid qualifies only when at least two row gaps and two column gaps
// sit within the spacing tolerance of their median. Text runs land in the cell containing their centre. Tables that
// continue across a page break are stitched back together afterwards.

use std::collections::BTreeSet;

use lesewerk_core::config::TableConfig;
use lesewerk_core::types::{Axis, BoundingBox, LineSegment, Table, TextRun};
use tracing::{debug, instrument};

use crate::source::PageContent;

/// Minimum share of gaps per axis that must match the median spacing.
const MIN_SPACING_SHARE: f32 = 0.5;

/// A ruling line reduced to its axis position and span.
#[derive(Debug, Clone, Copy)]
struct Rule {
    axis: Axis,
    /// y for horizontal rules, x for vertical ones.
    position: f32,
    start: f32,
    end: f32,
}

impl Rule {
    fn classify(segment: &LineSegment, tolerance: f32) -> Option<Self> {
        match segment.axis(tolerance)? {
            Axis::Horizontal => Some(Rule {
                axis: Axis::Horizontal,
                position: (segment.y0 + segment.y1) / 2.0,
                start: segment.x0.min(segment.x1),
                end: segment.x0.max(segment.x1),
            }),
            Axis::Vertical => Some(Rule {
                axis: Axis::Vertical,
                position: (segment.x0 + segment.x1) / 2.0,
                start: segment.y0.min(segment.y1),
                end: segment.y0.max(segment.y1),
            }),
        }
    }

    /// Whether two perpendicular rules touch, within `slack`.
    fn crosses(&self, other: &Rule, slack: f32) -> bool {
        self.axis != other.axis
            && other.position >= self.start - slack
            && other.position <= self.end + slack
            && self.position >= other.start - slack
            && self.position <= other.end + slack
    }
}

/// Detects ruled tables on a single page.
#[derive(Debug, Clone)]
pub struct TableExtractor {
    config: TableConfig,
}

impl TableExtractor {
    pub fn new(config: TableConfig) -> Self {
        Self { config }
    }

    /// Every qualifying table on the page, top to bottom.
    #[instrument(skip_all, fields(page = page.number))]
    pub fn extract(&self, page: &PageContent) -> Vec<Table> {
        let rules: Vec<Rule> = page
            .segments
            .iter()
            .filter_map(|s| Rule::classify(s, self.config.axis_tolerance))
            .collect();
        if rules.len() < 6 {
            return Vec::new();
        }

        let mut tables: Vec<Table> = grids(&rules, self.config.snap_tolerance)
            .into_iter()
            .filter_map(|grid| self.build(page, &grid))
            .collect();
        tables.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0));

        debug!(rules = rules.len(), tables = tables.len(), "Table detection complete");
        tables
    }

    fn build(&self, page: &PageContent, grid: &[Rule]) -> Option<Table> {
        let rows = self.boundaries(grid, Axis::Horizontal);
        let cols = self.boundaries(grid, Axis::Vertical);
        if rows.len() < 3 || cols.len() < 3 {
            return None;
        }
        let tolerance = self.config.spacing_tolerance;
        let (row_spacing, col_spacing) = (spacing(&rows, tolerance), spacing(&cols, tolerance));
        if !row_spacing.qualifies() || !col_spacing.qualifies() {
            debug!(
                page = page.number,
                row_share = row_spacing.share(),
                col_share = col_spacing.share(),
                "Grid spacing irregular; not a table"
            );
            return None;
        }

        let bbox = BoundingBox::new(cols[0], rows[0], cols[cols.len() - 1], rows[rows.len() - 1]);
        let mut cells = vec![vec![Vec::<&str>::new(); cols.len() - 1]; rows.len() - 1];

        let mut runs: Vec<&TextRun> = page.text_runs.iter().collect();
        runs.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0).then(a.bbox.x0.total_cmp(&b.bbox.x0)));
        for run in runs {
            let (cx, cy) = run.bbox.center();
            if !bbox.contains_point(cx, cy) {
                continue;
            }
            if let (Some(r), Some(c)) = (band(&rows, cy), band(&cols, cx)) {
                let text = run.text.trim();
                if !text.is_empty() {
                    cells[r][c].push(text);
                }
            }
        }

        let mut grid_rows: Vec<Vec<String>> = cells
            .into_iter()
            .map(|row| row.into_iter().map(|parts| parts.join(" ")).collect())
            .collect();

        let total = grid_rows.iter().map(Vec::len).sum::<usize>() as f32;
        let filled = grid_rows.iter().flatten().filter(|c| !c.is_empty()).count() as f32;
        let consistency = row_spacing.share().min(col_spacing.share());
        let confidence = 0.5 + 0.25 * consistency + 0.25 * (filled / total);

        let header = grid_rows.remove(0);
        debug!(
            page = page.number,
            rows = grid_rows.len(),
            cols = header.len(),
            confidence,
            "Table built"
        );

        Some(Table {
            page: page.number,
            bbox,
            header,
            rows: grid_rows,
            confidence,
            pages: vec![page.number],
            merge_confidence: None,
        })
    }

    /// Snapped boundary positions along one axis, thin gaps removed.
    fn boundaries(&self, grid: &[Rule], axis: Axis) -> Vec<f32> {
        let positions: Vec<f32> = grid
            .iter()
            .filter(|r| r.axis == axis)
            .map(|r| r.position)
            .collect();
        let snapped = cluster(positions, self.config.snap_tolerance);

        let mut kept: Vec<f32> = Vec::with_capacity(snapped.len());
        for position in snapped {
            match kept.last() {
                Some(&last) if position - last < self.config.min_cell_size => {}
                _ => kept.push(position),
            }
        }
        kept
    }
}

/// Group rules into connected components of crossing rules.
fn grids(rules: &[Rule], slack: f32) -> Vec<Vec<Rule>> {
    let mut parent: Vec<usize> = (0..rules.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rules.len() {
        for j in i + 1..rules.len() {
            if rules[i].crosses(&rules[j], slack) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let roots: BTreeSet<usize> = (0..rules.len()).map(|i| find(&mut parent, i)).collect();
    roots
        .into_iter()
        .map(|root| {
            (0..rules.len())
                .filter(|&i| find(&mut parent, i) == root)
                .map(|i| rules[i])
                .collect::<Vec<_>>()
        })
        .filter(|grid| grid.len() >= 6)
        .collect()
}

/// Collapse sorted positions closer than `tolerance` into their mean.
fn cluster(mut positions: Vec<f32>, tolerance: f32) -> Vec<f32> {
    positions.sort_by(f32::total_cmp);
    let mut groups: Vec<Vec<f32>> = Vec::new();
    for p in positions {
        match groups.last_mut() {
            Some(group) if p - group[group.len() - 1] <= tolerance => group.push(p),
            _ => groups.push(vec![p]),
        }
    }
    groups
        .into_iter()
        .map(|g| g.iter().sum::<f32>() / g.len() as f32)
        .collect()
}

/// Index of the band `[bounds[i], bounds[i + 1])` holding `v`.
fn band(bounds: &[f32], v: f32) -> Option<usize> {
    bounds.windows(2).position(|w| v >= w[0] && v < w[1])
}

/// Gaps along one axis that sit near the median gap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Spacing {
    consistent: usize,
    gaps: usize,
}

impl Spacing {
    fn share(&self) -> f32 {
        if self.gaps == 0 {
            return 0.0;
        }
        self.consistent as f32 / self.gaps as f32
    }

    fn qualifies(&self) -> bool {
        self.consistent >= 2 && self.share() >= MIN_SPACING_SHARE
    }
}

/// Count gaps within `tolerance` (relative) of the median gap.
fn spacing(bounds: &[f32], tolerance: f32) -> Spacing {
    let gaps: Vec<f32> = bounds.windows(2).map(|w| w[1] - w[0]).collect();
    if gaps.is_empty() {
        return Spacing { consistent: 0, gaps: 0 };
    }
    let mut sorted = gaps.clone();
    sorted.sort_by(f32::total_cmp);
    let median = sorted[sorted.len() / 2];
    let consistent = gaps
        .iter()
        .filter(|&&g| (g - median).abs() <= median * tolerance)
        .count();
    Spacing { consistent, gaps: gaps.len() }
}

// ---------------------------------------------------------------------------
// Continuation merging
// ---------------------------------------------------------------------------

/// Mean per-column token overlap between two header rows.
///
/// Returns 0.0 when the column counts differ.
pub fn header_similarity(a: &[String], b: &[String]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let total: f32 = a.iter().zip(b).map(|(x, y)| jaccard(x, y)).sum();
    total / a.len() as f32
}

fn jaccard(a: &str, b: &str) -> f32 {
    let tokens = |s: &str| -> BTreeSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let shared = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    shared / union
}

/// Stitch tables continued on the next page.
///
/// `tables` must be in page order. The first table of page `p` joins the
/// last table of page `p - 1` when the column counts match and the headers
/// are at least `threshold` similar; the repeated header row is dropped.
pub fn merge_continuations(tables: Vec<Table>, threshold: f32) -> Vec<Table> {
    let mut merged: Vec<Table> = Vec::with_capacity(tables.len());
    let mut last_page_seen: Option<u32> = None;

    for table in tables {
        let first_on_page = last_page_seen != Some(table.page);
        last_page_seen = Some(table.page);

        let continues = first_on_page
            && merged.last().is_some_and(|prev| {
                prev.pages.last().copied() == table.page.checked_sub(1)
                    && prev.column_count() == table.column_count()
            });

        if let (true, Some(prev)) = (continues, merged.last_mut()) {
            let similarity = header_similarity(&prev.header, &table.header);
            if similarity >= threshold {
                let (prev_rows, next_rows) = (prev.rows.len() as f32, table.rows.len() as f32);
                let weight = (prev_rows + next_rows).max(1.0);
                let min_confidence = prev.confidence.min(table.confidence);

                prev.confidence =
                    (prev.confidence * prev_rows + table.confidence * next_rows) / weight;
                let step = similarity * min_confidence;
                prev.merge_confidence = Some(prev.merge_confidence.map_or(step, |c| c.min(step)));
                prev.rows.extend(table.rows);
                prev.pages.push(table.page);
                debug!(pages = ?prev.pages, similarity, "Merged table continuation");
                continue;
            }
        }
        merged.push(table);
    }
    merged
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// GitHub-flavoured Markdown table.
pub fn to_markdown(table: &Table) -> String {
    let cell = |s: &str| s.replace('|', "\\|").replace('\n', " ");
    let line = |cells: &[String]| {
        let inner: Vec<String> = cells.iter().map(|c| cell(c)).collect();
        format!("| {} |", inner.join(" | "))
    };

    let mut out = Vec::with_capacity(table.rows.len() + 2);
    out.push(line(&table.header));
    out.push(format!("|{}|", vec![" --- "; table.column_count()].join("|")));
    for row in &table.rows {
        out.push(line(row));
    }
    out.join("\n")
}

/// HTML `<table>` with a header row.
pub fn to_html(table: &Table) -> String {
    let mut html = String::from("<table>\n<thead>\n<tr>");
    for h in &table.header {
        html.push_str(&format!("<th>{}</th>", escape_html(h)));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in &table.rows {
        html.push_str("<tr>");
        for c in row {
            html.push_str(&format!("<td>{}</td>", escape_html(c)));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>");
    html
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
