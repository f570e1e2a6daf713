//! PDF export of a single job request.
//!
//! Rendering is split in two steps: [`layout`] places every element on an A4
//! page in millimetres (top-left origin, like a printed form), and
//! [`encode_pdf`] turns that layout into PDF bytes with `lopdf`. The only
//! suspension point is the image fetch in [`ReportRenderer::render`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use image::GenericImageView;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use thiserror::Error;

use crate::models::JobRequest;

pub const PAGE_WIDTH_MM: f32 = 210.0;
pub const PAGE_HEIGHT_MM: f32 = 297.0;
pub const MARGIN_MM: f32 = 15.0;
/// Horizontal offset of a detail value from the margin.
pub const VALUE_OFFSET_MM: f32 = 50.0;
pub const FOOTER_OFFSET_MM: f32 = 10.0;
/// Assumed pixel density of fetched images.
pub const IMAGE_DPI: f32 = 96.0;
pub const IMAGE_PLACEHOLDER: &str = "(Image could not be loaded)";
pub const NOT_AVAILABLE: &str = "N/A";

const MM_PER_INCH: f32 = 25.4;
const PT_PER_MM: f32 = 72.0 / MM_PER_INCH;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pdf encoding failed: {0}")]
    Pdf(String),
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }
}

/// A positioned drawing primitive. All coordinates are millimetres from the
/// top-left corner; text `y` is the baseline, image `y` the top edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text { x: f32, y: f32, size: f32, font: Font, text: String },
    Line { x1: f32, y1: f32, x2: f32, y2: f32, width: f32 },
    Image { x: f32, y: f32, width: f32, height: f32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub elements: Vec<Element>,
}

impl PageLayout {
    fn text(&mut self, x: f32, y: f32, size: f32, font: Font, text: impl Into<String>) {
        self.elements.push(Element::Text { x, y, size, font, text: text.into() });
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            Element::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.texts().any(|t| t == needle)
    }

    /// Value drawn on the same line as `label`, if any.
    pub fn value_of(&self, label: &str) -> Option<&str> {
        let row_y = self.elements.iter().find_map(|e| match e {
            Element::Text { text, y, .. } if text == label => Some(*y),
            _ => None,
        })?;
        self.elements.iter().find_map(|e| match e {
            Element::Text { text, x, y, .. }
                if *y == row_y && *x == MARGIN_MM + VALUE_OFFSET_MM => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn image(&self) -> Option<(f32, f32, f32, f32)> {
        self.elements.iter().find_map(|e| match e {
            Element::Image { x, y, width, height } => Some((*x, *y, *width, *height)),
            _ => None,
        })
    }
}

/// A fetched and decoded image, flattened to 8-bit RGB.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width_px: u32,
    pub height_px: u32,
    pub rgb: Vec<u8>,
}

impl DecodedImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        let img = image::load_from_memory(bytes).map_err(|e| ImageError::Decode(e.to_string()))?;
        let (width_px, height_px) = img.dimensions();
        Ok(Self { width_px, height_px, rgb: img.to_rgb8().into_raw() })
    }
}

fn mm_to_px(mm: f32) -> f32 {
    mm * IMAGE_DPI / MM_PER_INCH
}

fn px_to_mm(px: f32) -> f32 {
    px * MM_PER_INCH / IMAGE_DPI
}

/// Scale a `width_px` × `height_px` image down into a `max_width_mm` ×
/// `max_height_mm` box, returning the drawn size in millimetres.
///
/// Width is fitted first, then height; each step keeps the aspect ratio.
/// Images that already fit keep their natural size.
pub fn fit_image(width_px: f32, height_px: f32, max_width_mm: f32, max_height_mm: f32) -> (f32, f32) {
    let max_width = mm_to_px(max_width_mm);
    let max_height = mm_to_px(max_height_mm.max(0.0));
    let (mut w, mut h) = (width_px, height_px);
    if w > max_width {
        let ratio = max_width / w;
        w = max_width;
        h *= ratio;
    }
    if h > max_height {
        let ratio = max_height / h;
        h = max_height;
        w *= ratio;
    }
    (px_to_mm(w), px_to_mm(h))
}

/// Short en-US date, e.g. `1/15/2024`.
pub fn short_date(d: NaiveDate) -> String {
    d.format("%-m/%-d/%Y").to_string()
}

/// en-US date and time, e.g. `1/15/2024, 3:04:05 PM`.
pub fn long_timestamp(t: DateTime<Utc>) -> String {
    t.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

fn or_na(v: Option<&str>) -> String {
    match v.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Download name of the exported report.
pub fn report_file_name(request_number: &str) -> String {
    let safe: String = request_number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    format!("Job_Request_{safe}.pdf")
}

fn has_image_url(req: &JobRequest) -> bool {
    req.image_url.as_deref().map(|u| !u.trim().is_empty()).unwrap_or(false)
}

/// Place every element of the report. `image` is the decoded part image;
/// `None` while the request has an image URL means loading failed.
pub fn layout(req: &JobRequest, image: Option<&DecodedImage>, generated_at: DateTime<Utc>) -> PageLayout {
    let mut page = PageLayout::default();
    let mut y = MARGIN_MM;

    page.text(MARGIN_MM, y, 20.0, Font::Bold, "Job Request Report");
    y += 10.0;
    page.text(MARGIN_MM, y, 14.0, Font::Bold, format!("Request #{}", req.request_number));
    y += 10.0;
    page.elements.push(Element::Line { x1: MARGIN_MM, y1: y, x2: PAGE_WIDTH_MM - MARGIN_MM, y2: y, width: 0.5 });
    y += 8.0;
    page.text(MARGIN_MM, y, 12.0, Font::Bold, "Request Details");
    y += 7.0;

    let details = [
        ("Requesting Person:", or_na(Some(&req.requesting_person))),
        ("Request Date:", short_date(req.request_date)),
        ("Status:", req.status.as_str().to_string()),
        ("Date Completed:", req.date_completed.map(short_date).unwrap_or_else(|| NOT_AVAILABLE.into())),
        ("File Path:", or_na(req.file_path.as_deref())),
        ("File Name:", or_na(req.file_name.as_deref())),
        ("Material Type:", or_na(req.material_type.as_deref())),
        ("Quantity:", req.quantity.map(|q| q.to_string()).unwrap_or_else(|| NOT_AVAILABLE.into())),
        ("Assigned To:", or_na(req.assigned_to.as_deref())),
    ];
    for (label, value) in details {
        page.text(MARGIN_MM, y, 10.0, Font::Bold, label);
        page.text(MARGIN_MM + VALUE_OFFSET_MM, y, 10.0, Font::Regular, value);
        y += 6.0;
    }

    if has_image_url(req) {
        y += 5.0;
        page.text(MARGIN_MM, y, 10.0, Font::Bold, "Part Image:");
        y += 7.0;
        match image {
            Some(img) => {
                let max_width = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;
                let max_height = PAGE_HEIGHT_MM - y - MARGIN_MM;
                let (width, height) = fit_image(img.width_px as f32, img.height_px as f32, max_width, max_height);
                page.elements.push(Element::Image { x: MARGIN_MM, y, width, height });
            }
            None => page.text(MARGIN_MM, y, 10.0, Font::Regular, IMAGE_PLACEHOLDER),
        }
    }

    page.text(
        MARGIN_MM,
        PAGE_HEIGHT_MM - FOOTER_OFFSET_MM,
        8.0,
        Font::Italic,
        format!("Generated on {}", long_timestamp(generated_at)),
    );
    page
}

/// WinAnsiEncoding byte for `c`, or `?` when the standard fonts cannot show it.
fn win_ansi(c: char) -> u8 {
    match c as u32 {
        0x00..=0x7F | 0xA0..=0xFF => c as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        // C1 controls have no glyph in WinAnsi
        _ => b'?',
    }
}

fn pdf_text(s: &str) -> Object {
    Object::String(s.chars().map(win_ansi).collect(), StringFormat::Literal)
}

fn pt(mm: f32) -> f32 {
    mm * PT_PER_MM
}

/// Encode a laid-out page. `image` must be present when the layout holds an
/// [`Element::Image`].
pub fn encode_pdf(page: &PageLayout, image: Option<&DecodedImage>) -> Result<Vec<u8>, RenderError> {
    let page_h = pt(PAGE_HEIGHT_MM);
    let mut ops = Vec::new();
    for el in &page.elements {
        match el {
            Element::Text { x, y, size, font, text } => {
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new("Tf", vec![font.resource_name().into(), (*size).into()]));
                ops.push(Operation::new("Td", vec![pt(*x).into(), (page_h - pt(*y)).into()]));
                ops.push(Operation::new("Tj", vec![pdf_text(text)]));
                ops.push(Operation::new("ET", vec![]));
            }
            Element::Line { x1, y1, x2, y2, width } => {
                ops.push(Operation::new("w", vec![pt(*width).into()]));
                ops.push(Operation::new("m", vec![pt(*x1).into(), (page_h - pt(*y1)).into()]));
                ops.push(Operation::new("l", vec![pt(*x2).into(), (page_h - pt(*y2)).into()]));
                ops.push(Operation::new("S", vec![]));
            }
            Element::Image { x, y, width, height } => {
                if image.is_none() {
                    return Err(RenderError::Pdf("layout references an image that was not supplied".into()));
                }
                let bottom = page_h - pt(*y) - pt(*height);
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new(
                    "cm",
                    vec![pt(*width).into(), 0.into(), 0.into(), pt(*height).into(), pt(*x).into(), bottom.into()],
                ));
                ops.push(Operation::new("Do", vec!["Im1".into()]));
                ops.push(Operation::new("Q", vec![]));
            }
        }
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font = |base: &str| dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    };
    let regular_id = doc.add_object(font("Helvetica"));
    let bold_id = doc.add_object(font("Helvetica-Bold"));
    let italic_id = doc.add_object(font("Helvetica-Oblique"));

    let mut resources = dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
            "F3" => italic_id,
        },
    };
    if let Some(img) = image {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => img.width_px as i64,
                "Height" => img.height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            img.rgb.clone(),
        ));
        resources.set("XObject", dictionary! { "Im1" => image_id });
    }
    let resources_id = doc.add_object(resources);

    let content = Content { operations: ops };
    let content_bytes = content.encode().map_err(|e| RenderError::Pdf(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), pt(PAGE_WIDTH_MM).into(), page_h.into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(buffer)
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

/// Fetches images over HTTP(S).
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ImageError::Fetch(e.to_string()))?;
        let bytes = resp.bytes().await.map_err(|e| ImageError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub layout: PageLayout,
}

pub struct ReportRenderer {
    images: Arc<dyn ImageSource>,
}

impl ReportRenderer {
    pub fn new(images: Arc<dyn ImageSource>) -> Self {
        Self { images }
    }

    async fn load_image(&self, url: &str) -> Result<DecodedImage, ImageError> {
        let bytes = self.images.fetch(url).await?;
        DecodedImage::decode(&bytes)
    }

    pub async fn render(&self, req: &JobRequest) -> Result<RenderedReport, RenderError> {
        let image = match req.image_url.as_deref().filter(|_| has_image_url(req)) {
            Some(url) => match self.load_image(url).await {
                Ok(img) => Some(img),
                Err(e) => {
                    tracing::warn!(request_id = req.id, %url, "report image unavailable: {e}");
                    None
                }
            },
            None => None,
        };
        let page = layout(req, image.as_ref(), Utc::now());
        let bytes = encode_pdf(&page, image.as_ref())?;
        Ok(RenderedReport { file_name: report_file_name(&req.request_number), bytes, layout: page })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    const EPS: f32 = 1e-3;

    fn request() -> JobRequest {
        let t = Utc::now();
        JobRequest {
            id: 7,
            request_number: "JR-100".into(),
            requesting_person: "A. Lee".into(),
            request_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            file_path: None,
            file_name: Some("".into()),
            material_type: Some("Aluminium 6061".into()),
            quantity: None,
            assigned_to: Some("Sam".into()),
            status: JobStatus::InProcess,
            date_completed: None,
            image_url: None,
            image_filename: None,
            created_at: t,
            updated_at: t,
            created_by: None,
        }
    }

    fn image(w: u32, h: u32) -> DecodedImage {
        DecodedImage { width_px: w, height_px: h, rgb: vec![200; (w * h * 3) as usize] }
    }

    // cursor below the "Part Image:" label: 15+10+10+8+7 + 9*6 + 5 + 7
    const IMAGE_TOP: f32 = 116.0;
    const MAX_W: f32 = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;
    const MAX_H: f32 = PAGE_HEIGHT_MM - IMAGE_TOP - MARGIN_MM;

    #[test]
    fn fitting_image_keeps_natural_size() {
        let (w, h) = fit_image(300.0, 200.0, MAX_W, MAX_H);
        assert!((w - 300.0 * 25.4 / 96.0).abs() < EPS);
        assert!((h - 200.0 * 25.4 / 96.0).abs() < EPS);
    }

    #[test]
    fn wide_image_is_width_bound() {
        let (w, h) = fit_image(2000.0, 100.0, MAX_W, MAX_H);
        assert!((w - MAX_W).abs() < EPS);
        assert!((w / h - 20.0).abs() < 1e-2);
        assert!(h < MAX_H);
    }

    #[test]
    fn tall_narrow_image_is_height_bound() {
        let (w, h) = fit_image(100.0, 2000.0, MAX_W, MAX_H);
        assert!((h - MAX_H).abs() < EPS);
        assert!((h / w - 20.0).abs() < 1e-2);
    }

    #[test]
    fn large_square_image_hits_both_bounds_in_order() {
        let (w, h) = fit_image(3000.0, 3000.0, MAX_W, MAX_H);
        // width fit leaves it taller than the remaining space, height fit wins
        assert!((h - MAX_H).abs() < EPS);
        assert!((w - MAX_H).abs() < EPS);
    }

    #[test]
    fn missing_fields_render_as_na() {
        let page = layout(&request(), None, Utc::now());
        assert_eq!(page.value_of("Date Completed:"), Some("N/A"));
        assert_eq!(page.value_of("File Path:"), Some("N/A"));
        assert_eq!(page.value_of("File Name:"), Some("N/A"));
        assert_eq!(page.value_of("Quantity:"), Some("N/A"));
        assert_eq!(page.value_of("Material Type:"), Some("Aluminium 6061"));
        assert_eq!(page.value_of("Request Date:"), Some("1/10/2024"));
        assert_eq!(page.value_of("Status:"), Some("In Process"));
        assert!(page.contains_text("Request #JR-100"));
        assert!(!page.contains_text("Part Image:"));
    }

    #[test]
    fn completed_date_uses_short_format() {
        let mut req = request();
        req.status = JobStatus::Complete;
        req.date_completed = NaiveDate::from_ymd_opt(2024, 1, 15);
        req.quantity = Some(12);
        let page = layout(&req, None, Utc::now());
        assert_eq!(page.value_of("Date Completed:"), Some("1/15/2024"));
        assert_eq!(page.value_of("Quantity:"), Some("12"));
    }

    #[test]
    fn failed_image_draws_placeholder() {
        let mut req = request();
        req.image_url = Some("http://example.invalid/a.png".into());
        let page = layout(&req, None, Utc::now());
        assert!(page.contains_text("Part Image:"));
        assert!(page.contains_text(IMAGE_PLACEHOLDER));
        assert!(page.image().is_none());
    }

    #[test]
    fn loaded_image_is_placed_below_label() {
        let mut req = request();
        req.image_url = Some("http://example.invalid/a.png".into());
        let img = image(96, 48);
        let page = layout(&req, Some(&img), Utc::now());
        let (x, y, w, h) = page.image().unwrap();
        assert_eq!(x, MARGIN_MM);
        assert!((y - IMAGE_TOP).abs() < EPS);
        assert!((w - 25.4).abs() < EPS);
        assert!((h - 12.7).abs() < EPS);
    }

    #[test]
    fn footer_sits_above_bottom_edge() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 15, 15, 4, 5).unwrap();
        let page = layout(&request(), None, at);
        let footer = page.elements.iter().find_map(|e| match e {
            Element::Text { text, y, font: Font::Italic, .. } => Some((text.clone(), *y)),
            _ => None,
        });
        assert_eq!(footer, Some(("Generated on 1/15/2024, 3:04:05 PM".to_string(), PAGE_HEIGHT_MM - 10.0)));
    }

    #[test]
    fn encoded_pdf_has_one_page() {
        let mut req = request();
        req.image_url = Some("http://example.invalid/a.png".into());
        let img = image(4, 3);
        let page = layout(&req, Some(&img), Utc::now());
        let bytes = encode_pdf(&page, Some(&img)).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn image_element_without_pixels_is_an_error() {
        let mut req = request();
        req.image_url = Some("http://example.invalid/a.png".into());
        let page = layout(&req, Some(&image(2, 2)), Utc::now());
        assert!(encode_pdf(&page, None).is_err());
    }

    #[test]
    fn file_name_is_header_safe() {
        assert_eq!(report_file_name("JR-100"), "Job_Request_JR-100.pdf");
        assert_eq!(report_file_name("A/B \"7\""), "Job_Request_A_B__7_.pdf");
    }

    #[test]
    fn text_uses_win_ansi_bytes() {
        let Object::String(bytes, _) = pdf_text("O\u{2019}Brien \u{20AC}5 \u{2013} caf\u{E9}") else {
            panic!("expected a string object");
        };
        assert_eq!(bytes, b"O\x92Brien \x805 \x96 caf\xE9".to_vec());

        let Object::String(bytes, _) = pdf_text("\u{85}\u{9F}\u{4E2D}") else {
            panic!("expected a string object");
        };
        assert_eq!(bytes, b"???".to_vec());
    }
}
