// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content-stream interpreter.
//
// Walks decoded page operations and collects positioned text runs, straight
// ruling segments, and image placements. Strings are decoded through the
// selected font's encoding (ToUnicode maps included) where lopdf understands
// it. Glyph metrics are not loaded, so run widths are estimated from
// character counts; this is enough for reading order and cell assignment.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::types::{BoundingBox, LineSegment, TextRun};
use tracing::{debug, trace};

use super::reader::ObjectStore;

/// Average glyph advance as a fraction of the font size.
const GLYPH_ADVANCE_EM: f32 = 0.5;
/// A `TJ` adjustment at least this negative (thousandths of an em) is a word gap.
const TJ_SPACE_THRESHOLD: f32 = -250.0;
/// Rectangles thinner than this are treated as a single rule.
const RULE_THICKNESS: f32 = 2.0;
/// Nested form XObjects deeper than this are ignored.
const MAX_FORM_DEPTH: usize = 8;

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix([f32; 6]);

impl Matrix {
    pub(crate) const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_operands(ops: &[Object]) -> Option<Self> {
        if ops.len() < 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, op) in m.iter_mut().zip(ops) {
            *slot = number(op)?;
        }
        Some(Matrix(m))
    }

    /// `self` applied first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    /// Length of the transformed unit vertical vector.
    fn vertical_scale(&self) -> f32 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }
}

/// Everything collected from one page's content.
#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub text_runs: Vec<TextRun>,
    pub segments: Vec<LineSegment>,
    pub image_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    matrix: Matrix,
    line_matrix: Matrix,
    /// Index into the interpreter's decoded encodings.
    font: Option<usize>,
    font_size: f32,
    leading: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font: None,
            font_size: 12.0,
            leading: 0.0,
        }
    }
}

/// Interprets content streams for one page.
///
/// Output coordinates are flipped into a top-left origin relative to the
/// page's media box.
pub(crate) struct Interpreter<'a> {
    store: &'a ObjectStore,
    /// Media box `[x0, y0, x1, y1]` in user space.
    media_box: [f32; 4],
    encodings: Vec<Encoding<'a>>,
    /// Font objects already decoded, by object id.
    font_index: HashMap<ObjectId, usize>,
    out: Collected,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(store: &'a ObjectStore, media_box: [f32; 4]) -> Self {
        Self {
            store,
            media_box,
            encodings: Vec::new(),
            font_index: HashMap::new(),
            out: Collected::default(),
        }
    }

    pub(crate) fn finish(self) -> Collected {
        debug!(
            runs = self.out.text_runs.len(),
            segments = self.out.segments.len(),
            images = self.out.image_count,
            "Content interpreted"
        );
        self.out
    }

    /// Decode and walk one content stream.
    pub(crate) fn run(
        &mut self,
        data: &[u8],
        resources: Option<&'a Dictionary>,
        ctm: Matrix,
        depth: usize,
    ) -> Result<()> {
        let content = Content::decode(data)
            .map_err(|err| LesewerkError::Pdf(format!("content stream: {err}")))?;

        let mut gs = GraphicsState { ctm };
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut ts = TextState::default();

        let mut path: Vec<LineSegment> = Vec::new();
        let mut current: Option<(f32, f32)> = None;
        let mut subpath_start: Option<(f32, f32)> = None;

        for op in &content.operations {
            let operands = op.operands.as_slice();
            match op.operator.as_str() {
                // -- Graphics state --
                "q" => stack.push(gs),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        gs.ctm = m.then(&gs.ctm);
                    }
                }

                // -- Text objects and positioning --
                "BT" => {
                    ts.matrix = Matrix::IDENTITY;
                    ts.line_matrix = Matrix::IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        ts.font = self.font(resources, name);
                    }
                    if let Some(size) = operands.get(1).and_then(number) {
                        ts.font_size = size;
                    }
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(number) {
                        ts.leading = leading;
                    }
                }
                "Td" | "TD" => {
                    let (Some(tx), Some(ty)) = (
                        operands.first().and_then(number),
                        operands.get(1).and_then(number),
                    ) else {
                        continue;
                    };
                    if op.operator == "TD" {
                        ts.leading = -ty;
                    }
                    ts.line_matrix = Matrix::translate(tx, ty).then(&ts.line_matrix);
                    ts.matrix = ts.line_matrix;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        ts.matrix = m;
                        ts.line_matrix = m;
                    }
                }
                "T*" => next_line(&mut ts),

                // -- Text showing --
                "Tj" => {
                    if let Some(text) = operands.first().and_then(|obj| self.decode(&ts, obj)) {
                        self.show(&mut ts, &gs, &text);
                    }
                }
                "'" => {
                    next_line(&mut ts);
                    if let Some(text) = operands.first().and_then(|obj| self.decode(&ts, obj)) {
                        self.show(&mut ts, &gs, &text);
                    }
                }
                "\"" => {
                    next_line(&mut ts);
                    if let Some(text) = operands.get(2).and_then(|obj| self.decode(&ts, obj)) {
                        self.show(&mut ts, &gs, &text);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        let text = join_tj(items, |obj| self.decode(&ts, obj));
                        self.show(&mut ts, &gs, &text);
                    }
                }

                // -- Path construction --
                "m" => {
                    if let Some(p) = point(operands) {
                        current = Some(p);
                        subpath_start = Some(p);
                    }
                }
                "l" => {
                    if let (Some(from), Some(to)) = (current, point(operands)) {
                        path.push(self.segment(&gs, from, to));
                        current = Some(to);
                    }
                }
                "c" => current = operands.get(4..6).and_then(point).or(current),
                "v" | "y" => current = operands.get(2..4).and_then(point).or(current),
                "h" => close_subpath(self, &gs, &mut path, current, subpath_start),
                "re" => {
                    if let Some(rect) = rect(operands) {
                        self.push_rect(&gs, rect, &mut path);
                        current = Some((rect[0], rect[1]));
                        subpath_start = current;
                    }
                }

                // -- Path painting --
                "s" | "b" | "b*" => {
                    close_subpath(self, &gs, &mut path, current, subpath_start);
                    self.out.segments.append(&mut path);
                    current = None;
                }
                "S" | "f" | "F" | "f*" | "B" | "B*" => {
                    self.out.segments.append(&mut path);
                    current = None;
                }
                "n" => {
                    path.clear();
                    current = None;
                }

                // -- XObjects --
                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.invoke_xobject(name, resources, &gs, depth)?;
                    }
                }

                other => trace!(operator = other, "Ignored operator"),
            }
        }

        Ok(())
    }

    /// Resolve font `name` in `resources` and decode its encoding once.
    fn font(&mut self, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<usize> {
        let store = self.store;
        let entry = resources
            .and_then(|res| store.dict_entry(res, b"Font"))
            .and_then(|fonts| fonts.get(name).ok())?;
        let id = match entry {
            Object::Reference(id) => Some(*id),
            _ => None,
        };
        if let Some(&index) = id.and_then(|id| self.font_index.get(&id)) {
            return Some(index);
        }

        let font = store.dict(entry)?;
        match font.get_font_encoding(store.document()) {
            Ok(encoding) => {
                self.encodings.push(encoding);
                let index = self.encodings.len() - 1;
                if let Some(id) = id {
                    self.font_index.insert(id, index);
                }
                Some(index)
            }
            Err(err) => {
                debug!(font = %String::from_utf8_lossy(name), %err, "No usable font encoding");
                None
            }
        }
    }

    /// Decode a string operand with the current font, falling back to
    /// [`decode_string`].
    fn decode(&self, ts: &TextState, obj: &Object) -> Option<String> {
        let Object::String(bytes, _) = obj else {
            return None;
        };
        if let Some(encoding) = ts.font.and_then(|index| self.encodings.get(index)) {
            match Document::decode_text(encoding, bytes) {
                Ok(text) => return Some(text.chars().filter(|c| !c.is_control()).collect()),
                Err(err) => trace!(%err, "Font encoding could not decode string"),
            }
        }
        decode_string(obj)
    }

    fn show(&mut self, ts: &mut TextState, gs: &GraphicsState, text: &str) {
        let glyphs = text.chars().count() as f32;
        let advance = glyphs * ts.font_size * GLYPH_ADVANCE_EM;

        let render = ts.matrix.then(&gs.ctm);
        let (x0, y0) = render.apply(0.0, 0.0);
        let (x1, _) = render.apply(advance, 0.0);
        let size = ts.font_size * render.vertical_scale();

        ts.matrix = Matrix::translate(advance, 0.0).then(&ts.matrix);

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let (left, baseline) = self.flip(x0, y0);
        let (right, _) = self.flip(x1, y0);
        self.out.text_runs.push(TextRun {
            text: text.to_string(),
            bbox: BoundingBox::new(left, baseline - size, right, baseline),
            font_size: size,
        });
    }

    fn segment(&self, gs: &GraphicsState, from: (f32, f32), to: (f32, f32)) -> LineSegment {
        let (ax, ay) = gs.ctm.apply(from.0, from.1);
        let (bx, by) = gs.ctm.apply(to.0, to.1);
        let (ax, ay) = self.flip(ax, ay);
        let (bx, by) = self.flip(bx, by);
        LineSegment::new(ax, ay, bx, by)
    }

    fn push_rect(&self, gs: &GraphicsState, [x, y, w, h]: [f32; 4], path: &mut Vec<LineSegment>) {
        if h.abs() <= RULE_THICKNESS && w.abs() > RULE_THICKNESS {
            let mid = y + h / 2.0;
            path.push(self.segment(gs, (x, mid), (x + w, mid)));
        } else if w.abs() <= RULE_THICKNESS && h.abs() > RULE_THICKNESS {
            let mid = x + w / 2.0;
            path.push(self.segment(gs, (mid, y), (mid, y + h)));
        } else {
            let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)];
            for i in 0..4 {
                path.push(self.segment(gs, corners[i], corners[(i + 1) % 4]));
            }
        }
    }

    fn invoke_xobject(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        gs: &GraphicsState,
        depth: usize,
    ) -> Result<()> {
        let store = self.store;
        let Some(stream) = resources
            .and_then(|res| store.dict_entry(res, b"XObject"))
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|obj| store.stream(obj))
        else {
            return Ok(());
        };

        match stream.dict.get(b"Subtype").ok() {
            Some(Object::Name(kind)) if kind.as_slice() == b"Image" => {
                self.out.image_count += 1;
            }
            Some(Object::Name(kind)) if kind.as_slice() == b"Form" => {
                if depth >= MAX_FORM_DEPTH {
                    debug!(depth, "Form XObject nesting too deep, skipped");
                    return Ok(());
                }
                let form_matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| match store.resolve(m) {
                        Object::Array(items) => Matrix::from_operands(items),
                        _ => None,
                    })
                    .unwrap_or(Matrix::IDENTITY);
                let form_resources = store.dict_entry(&stream.dict, b"Resources").or(resources);
                let data = store.stream_data(stream)?;
                self.run(&data, form_resources, form_matrix.then(&gs.ctm), depth + 1)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// User space to top-left page space.
    fn flip(&self, x: f32, y: f32) -> (f32, f32) {
        let [x0, _, _, y1] = self.media_box;
        (x - x0, y1 - y)
    }
}

fn next_line(ts: &mut TextState) {
    ts.line_matrix = Matrix::translate(0.0, -ts.leading).then(&ts.line_matrix);
    ts.matrix = ts.line_matrix;
}

fn close_subpath(
    interp: &Interpreter<'_>,
    gs: &GraphicsState,
    path: &mut Vec<LineSegment>,
    current: Option<(f32, f32)>,
    start: Option<(f32, f32)>,
) {
    if let (Some(from), Some(to)) = (current, start) {
        if from != to {
            path.push(interp.segment(gs, from, to));
        }
    }
}

fn point(ops: &[Object]) -> Option<(f32, f32)> {
    Some((number(ops.first()?)?, number(ops.get(1)?)?))
}

fn rect(ops: &[Object]) -> Option<[f32; 4]> {
    Some([
        number(ops.first()?)?,
        number(ops.get(1)?)?,
        number(ops.get(2)?)?,
        number(ops.get(3)?)?,
    ])
}

/// Integer or real operand as `f32`.
pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Decode a string operand: UTF-16BE with a byte-order mark, Latin-1 otherwise.
pub(crate) fn decode_string(obj: &Object) -> Option<String> {
    let Object::String(bytes, _) = obj else {
        return None;
    };
    let text = if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };
    Some(text.chars().filter(|c| !c.is_control()).collect())
}

/// Flatten a `TJ` array, turning wide negative kerning into spaces.
fn join_tj(items: &[Object], decode: impl Fn(&Object) -> Option<String>) -> String {
    let mut text = String::new();
    for item in items {
        if let Some(part) = decode(item) {
            text.push_str(&part);
            continue;
        }
        let wide_gap = number(item).is_some_and(|adjust| adjust <= TJ_SPACE_THRESHOLD);
        if wide_gap && !text.ends_with(' ') {
            text.push(' ');
        }
    }
    text
}
