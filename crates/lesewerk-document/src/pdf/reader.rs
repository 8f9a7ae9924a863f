// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader — opens a PDF with `lopdf` and serves pages on demand.
//
// Parsing happens once on open; the parsed document and page index are kept
// and every page load interprets only that page's content streams.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use lesewerk_core::error::{LesewerkError, Result};
use tracing::{debug, info, instrument, warn};

use super::content::{Interpreter, Matrix, number};
use crate::source::{DocumentSource, PageContent};

/// US Letter, used when a page has no usable `/MediaBox`.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
/// Bound on `/Parent` chains when resolving inherited attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;

static NULL_OBJECT: Object = Object::Null;

/// Parsed PDF document with bounded reference resolution.
#[derive(Debug, Default)]
pub(crate) struct ObjectStore {
    document: Document,
}

impl ObjectStore {
    /// The underlying document, for font encoding lookups.
    pub(crate) fn document(&self) -> &Document {
        &self.document
    }

    /// Follow references (bounded) to a direct object.
    pub(crate) fn resolve<'a>(&'a self, mut obj: &'a Object) -> &'a Object {
        for _ in 0..MAX_INHERITANCE_DEPTH {
            match obj {
                Object::Reference(id) => match self.document.objects.get(id) {
                    Some(target) => obj = target,
                    None => return &NULL_OBJECT,
                },
                _ => return obj,
            }
        }
        &NULL_OBJECT
    }

    pub(crate) fn dict<'a>(&'a self, obj: &'a Object) -> Option<&'a Dictionary> {
        match self.resolve(obj) {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(&stream.dict),
            _ => None,
        }
    }

    pub(crate) fn stream<'a>(&'a self, obj: &'a Object) -> Option<&'a Stream> {
        match self.resolve(obj) {
            Object::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Resolve `dict[key]` to a dictionary.
    pub(crate) fn dict_entry<'a>(&'a self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
        dict.get(key).ok().and_then(|obj| self.dict(obj))
    }

    /// Stream payload with its filters applied.
    pub(crate) fn stream_data(&self, stream: &Stream) -> Result<Vec<u8>> {
        if stream.dict.get(b"Filter").is_err() {
            return Ok(stream.content.clone());
        }
        stream
            .decompressed_content()
            .map_err(|err| LesewerkError::Pdf(format!("cannot decode stream: {err}")))
    }
}

/// A parsed PDF serving pages to the extraction engine.
#[derive(Debug)]
pub struct PdfReader {
    bytes: Arc<[u8]>,
    store: ObjectStore,
    /// Page object ids, index 0 = page 1.
    pages: Vec<ObjectId>,
    /// Source path, if opened from a file (useful for diagnostics).
    source_path: Option<String>,
}

impl PdfReader {
    // -- Construction ---------------------------------------------------------

    /// Open a PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        info!("Opening PDF: {}", path_ref.display());

        let data = std::fs::read(path_ref).map_err(|err| {
            LesewerkError::FatalDocument(format!("failed to read {}: {err}", path_ref.display()))
        })?;
        let mut reader = Self::from_bytes(data)?;
        reader.source_path = Some(path_ref.display().to_string());
        Ok(reader)
    }

    /// Parse a PDF already in memory.
    #[instrument(skip_all)]
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let document = Document::load_mem(&bytes).map_err(|err| {
            LesewerkError::FatalDocument(format!("failed to parse PDF: {err}"))
        })?;

        let pages: Vec<ObjectId> = document.get_pages().into_values().collect();

        debug!(
            pages = pages.len(),
            objects = document.objects.len(),
            bytes_len = bytes.len(),
            "PDF loaded"
        );

        Ok(Self {
            bytes,
            store: ObjectStore { document },
            pages,
            source_path: None,
        })
    }

    // -- Inspection -----------------------------------------------------------

    /// Return the source path if the reader was created via [`PdfReader::open`].
    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    /// Media box of a page (1-indexed), inherited through the page tree.
    pub fn media_box(&self, page: u32) -> Result<[f32; 4]> {
        let dict = self.page_dict(page)?;
        Ok(self
            .inherited(dict, b"MediaBox")
            .and_then(|obj| match self.store.resolve(obj) {
                Object::Array(items) if items.len() == 4 => {
                    let mut bounds = [0.0; 4];
                    for (slot, item) in bounds.iter_mut().zip(items) {
                        *slot = number(self.store.resolve(item))?;
                    }
                    Some(bounds)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_MEDIA_BOX))
    }

    // -- Helpers --------------------------------------------------------------

    fn page_dict(&self, page: u32) -> Result<&Dictionary> {
        let id = page
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
            .ok_or_else(|| {
                LesewerkError::Pdf(format!(
                    "page {page} out of range (document has {} pages)",
                    self.pages.len()
                ))
            })?;
        self.store
            .document
            .objects
            .get(id)
            .and_then(|obj| self.store.dict(obj))
            .ok_or_else(|| LesewerkError::Pdf(format!("page object {id:?} is missing")))
    }

    /// Look up `key` on the page, walking `/Parent` for inheritable attributes.
    fn inherited<'a>(&'a self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
        let mut current = dict;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = current.get(key) {
                return Some(value);
            }
            current = self.store.dict_entry(current, b"Parent")?;
        }
        None
    }

    fn resources<'a>(&'a self, dict: &'a Dictionary) -> Option<&'a Dictionary> {
        self.inherited(dict, b"Resources")
            .and_then(|obj| self.store.dict(obj))
    }

    /// Concatenated, decoded content streams of a page.
    fn content_data(&self, dict: &Dictionary) -> Result<Vec<u8>> {
        let Ok(contents) = dict.get(b"Contents") else {
            return Ok(Vec::new());
        };
        let streams: Vec<&Object> = match self.store.resolve(contents) {
            Object::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        let mut data = Vec::new();
        for obj in streams {
            let Some(stream) = self.store.stream(obj) else {
                warn!("Content entry is not a stream, skipped");
                continue;
            };
            data.extend(self.store.stream_data(stream)?);
            data.push(b'\n');
        }
        Ok(data)
    }

    /// The largest image XObject placed directly on the page.
    fn largest_image<'a>(&'a self, dict: &'a Dictionary) -> Option<&'a Stream> {
        let xobjects = self
            .resources(dict)
            .and_then(|res| self.store.dict_entry(res, b"XObject"))?;
        xobjects
            .iter()
            .filter_map(|(_, obj)| self.store.stream(obj))
            .filter(|stream| {
                matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(kind)) if kind.as_slice() == b"Image")
            })
            .max_by_key(|stream| {
                let dim = |key: &[u8]| {
                    stream
                        .dict
                        .get(key)
                        .ok()
                        .and_then(|obj| number(self.store.resolve(obj)))
                        .unwrap_or(0.0) as u64
                };
                dim(b"Width") * dim(b"Height")
            })
    }

    fn decode_image(&self, stream: &Stream) -> Result<Option<DynamicImage>> {
        let filters: Vec<&[u8]> = match stream.dict.get(b"Filter").map(|f| self.store.resolve(f)) {
            Ok(Object::Name(name)) => vec![name.as_slice()],
            Ok(Object::Array(items)) => items
                .iter()
                .filter_map(|item| match self.store.resolve(item) {
                    Object::Name(name) => Some(name.as_slice()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        if filters.as_slice() == [b"DCTDecode".as_slice()] {
            return image::load_from_memory(&stream.content)
                .map(Some)
                .map_err(|err| LesewerkError::Image(format!("JPEG page image: {err}")));
        }
        if filters.iter().any(|f| *f != b"FlateDecode".as_slice()) {
            debug!(?filters, "Unsupported image filter, no page image");
            return Ok(None);
        }

        let get = |key: &[u8]| {
            stream
                .dict
                .get(key)
                .ok()
                .and_then(|obj| number(self.store.resolve(obj)))
        };
        let (Some(width), Some(height)) = (get(b"Width"), get(b"Height")) else {
            return Err(LesewerkError::Image("image without dimensions".into()));
        };
        if get(b"BitsPerComponent").unwrap_or(8.0) != 8.0 {
            debug!("Non 8-bit page image, no page image");
            return Ok(None);
        }
        let (width, height) = (width as u32, height as u32);
        let colour_space = stream.dict.get(b"ColorSpace").map(|c| self.store.resolve(c));
        let samples = self.store.stream_data(stream)?;

        let image = match colour_space {
            Ok(Object::Name(name)) if name.as_slice() == b"DeviceGray" => {
                GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8)
            }
            Ok(Object::Name(name)) if name.as_slice() == b"DeviceRGB" => {
                RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8)
            }
            _ => {
                debug!("Unsupported image colour space, no page image");
                return Ok(None);
            }
        };

        image.map(Some).ok_or_else(|| {
            LesewerkError::Image(format!("image data does not fill {width}x{height}"))
        })
    }
}

impl DocumentSource for PdfReader {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[instrument(skip(self))]
    fn load_page(&self, page: u32) -> Result<PageContent> {
        let dict = self.page_dict(page)?;
        let media_box = self.media_box(page)?;
        let data = self.content_data(dict)?;

        let mut interpreter = Interpreter::new(&self.store, media_box);
        interpreter.run(&data, self.resources(dict), Matrix::IDENTITY, 0)?;
        let collected = interpreter.finish();

        Ok(PageContent {
            number: page,
            width: media_box[2] - media_box[0],
            height: media_box[3] - media_box[1],
            text_runs: collected.text_runs,
            segments: collected.segments,
            image_count: collected.image_count,
        })
    }

    #[instrument(skip(self))]
    fn render_page(&self, page: u32) -> Result<Option<DynamicImage>> {
        let dict = self.page_dict(page)?;
        match self.largest_image(dict) {
            Some(stream) => self.decode_image(stream),
            None => Ok(None),
        }
    }
}
