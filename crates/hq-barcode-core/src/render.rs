//! PDF Renderer: deterministic layout of the cargo and container
//! document variants, with an embedded Code39 barcode or decoded
//! per-container QR images, Vietnamese typography, and byte-stable output
//! (modulo the current local date/time printed in the header/footer).
//!
//! Grounded in `examples/other_examples/manifests/carjorvaz-pdf-translator-rs`
//! for the general shape of "drive a PDF crate from a typed record" in this
//! pack, though that crate mutates existing PDFs; this renderer authors a
//! new one from scratch with `printpdf`, the closest real crate in the
//! retrieval pack's orbit for that job (noted in DESIGN.md). Barcode pixels
//! come from `barcoders`' Code39 symbology and PNG generator; per-container
//! QR images arrive pre-rendered as base64 PNG from the SOAP response and
//! are only decoded here, not generated.

use base64::Engine;
use chrono::Local;
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerReference, Point, Rgb,
};
use std::io::Cursor;

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Container, DeclarationRecord};

const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const MARGIN_TOP_MM: f64 = 15.0;
const MARGIN_BOTTOM_MM: f64 = 15.0;
const MARGIN_LEFT_MM: f64 = 20.0;
const MARGIN_RIGHT_MM: f64 = 20.0;
const CONTENT_WIDTH_MM: f64 = PAGE_WIDTH_MM - MARGIN_LEFT_MM - MARGIN_RIGHT_MM;

const DEFAULT_TEN_CUC: &str = "Chi cục Hải quan khu vực V";
const DEFAULT_TEN_CHI_CUC: &str = "Hải quan Bắc Ninh";
const DEFAULT_SUB_TITLE: &str = "Tờ khai không phải niêm phong";
const DEFAULT_CHI_CUC_GS: &str = "CC HQ CK Sân bay QT Nội Bài";

const CARGO_NOTES: &[&str] = &[
    "- Danh sách này chỉ có giá trị khi đi kèm tờ khai hải quan đã thông quan/giải phóng hàng.",
    "- Doanh nghiệp chịu trách nhiệm về tính chính xác của thông tin hàng hóa khai báo.",
    "- Công chức hải quan giám sát ký xác nhận trước khi hàng hóa qua khu vực giám sát.",
];

const CONTAINER_NOTES: &[&str] = &[
    "- Danh sách container chỉ có giá trị khi đi kèm tờ khai hải quan đã thông quan/giải phóng hàng.",
    "- Mỗi container phải được đối chiếu số hiệu, số seal trước khi qua khu vực giám sát.",
    "- Công chức hải quan giám sát ký xác nhận trước khi container qua khu vực giám sát.",
];

/// The §4.E contract: render a declaration record into PDF bytes, or `None`
/// if nothing renderable was produced. A trait seam so the Retrieval
/// Orchestrator can be driven against a fake renderer in tests.
pub trait Renderer: Send + Sync {
    fn render(&self, record: &DeclarationRecord) -> Result<Option<Vec<u8>>>;
}

/// Registered/fallback font set for one document.
struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

/// Candidate on-disk Arial paths tried before falling back to Helvetica.
/// None of these need to exist; tests must not depend on Arial presence.
const ARIAL_REGULAR_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/msttcorefonts/Arial.ttf",
    "/usr/share/fonts/truetype/arial/arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];
const ARIAL_BOLD_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/msttcorefonts/Arial_Bold.ttf",
    "/usr/share/fonts/truetype/arial/arialbd.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];
const ARIAL_ITALIC_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/msttcorefonts/Arial_Italic.ttf",
    "/usr/share/fonts/truetype/arial/ariali.ttf",
    "/Library/Fonts/Arial Italic.ttf",
    "C:\\Windows\\Fonts\\ariali.ttf",
];

fn load_font(doc: &PdfDocumentReference, paths: &[&str], fallback: BuiltinFont) -> IndirectFontRef {
    for path in paths {
        if let Ok(bytes) = std::fs::read(path) {
            if let Ok(font) = doc.add_external_font(Cursor::new(bytes)) {
                return font;
            }
        }
    }
    doc.add_builtin_font(fallback)
        .expect("builtin Helvetica font is always available")
}

fn load_fonts(doc: &PdfDocumentReference) -> Fonts {
    Fonts {
        regular: load_font(doc, ARIAL_REGULAR_PATHS, BuiltinFont::Helvetica),
        bold: load_font(doc, ARIAL_BOLD_PATHS, BuiltinFont::HelveticaBold),
        italic: load_font(doc, ARIAL_ITALIC_PATHS, BuiltinFont::HelveticaOblique),
    }
}

/// The production renderer. Stateless beyond the configured supervising
/// office defaults, so a single instance can be shared across threads.
#[derive(Default)]
pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for PdfRenderer {
    fn render(&self, record: &DeclarationRecord) -> Result<Option<Vec<u8>>> {
        let bytes = if record.is_container_document() {
            render_container(record)?
        } else {
            render_cargo(record)?
        };
        Ok(Some(bytes))
    }
}

fn new_document(title: &str) -> (PdfDocumentReference, PdfLayerReference) {
    let (doc, page1, layer1) = PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Content");
    let layer = doc.get_page(page1).get_layer(layer1);
    (doc, layer)
}

fn finish(doc: PdfDocumentReference) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    doc.save(&mut std::io::BufWriter::new(Cursor::new(&mut buf)))
        .map_err(|e| Error::Render(e.to_string()))?;
    Ok(buf)
}

fn write(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, size: f64, x_mm: f64, y_mm: f64) {
    layer.use_text(text, size, Mm(x_mm), Mm(y_mm), font);
}

fn write_centered(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, size: f64, y_mm: f64) {
    // Approximate character width as 0.55 * size (typical for Helvetica-family
    // at typical report sizes); exact glyph metrics aren't needed for a
    // deterministic, readable layout.
    let approx_width = text.chars().count() as f64 * size * 0.55 * 0.352778;
    let x = (PAGE_WIDTH_MM - approx_width) / 2.0;
    write(layer, font, text, size, x.max(MARGIN_LEFT_MM), y_mm);
}

fn write_right_aligned(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, size: f64, right_edge_mm: f64, y_mm: f64) {
    let approx_width = text.chars().count() as f64 * size * 0.55 * 0.352778;
    write(layer, font, text, size, (right_edge_mm - approx_width).max(MARGIN_LEFT_MM), y_mm);
}

/// Naive word-wrap by approximate character budget per line; sufficient for
/// deterministic layout without full glyph metrics.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(current);
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn draw_rect_outline(layer: &PdfLayerReference, x0: f64, y0: f64, x1: f64, y1: f64) {
    let points = vec![
        (Point::new(Mm(x0), Mm(y0)), false),
        (Point::new(Mm(x1), Mm(y0)), false),
        (Point::new(Mm(x1), Mm(y1)), false),
        (Point::new(Mm(x0), Mm(y1)), false),
    ];
    let line = Line {
        points,
        is_closed: true,
    };
    layer.add_line(line);
}

fn fill_rect(layer: &PdfLayerReference, x0: f64, y0: f64, x1: f64, y1: f64, gray: f64) {
    layer.set_fill_color(printpdf::Color::Rgb(Rgb::new(gray, gray, gray, None)));
    let points = vec![
        (Point::new(Mm(x0), Mm(y0)), false),
        (Point::new(Mm(x1), Mm(y0)), false),
        (Point::new(Mm(x1), Mm(y1)), false),
        (Point::new(Mm(x0), Mm(y1)), false),
    ];
    let line = Line {
        points,
        is_closed: true,
    };
    layer.add_line(line);
    layer.set_fill_color(printpdf::Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
}

/// Generates the Code39 barcode as PNG bytes. The
/// module width/height/quiet-zone/dpi settings the spec calls out are
/// `barcoders`' generation-time knobs; `write_text=false` just means we
/// never ask the generator to burn human-readable text under the bars.
fn generate_code39_png(value: &str) -> Option<Vec<u8>> {
    let value = if value.is_empty() { "0" } else { value };
    let code = barcoders::sym::code39::Code39::new(value).ok()?;
    let encoded = code.encode();
    barcoders::generators::image::Image::png(80).generate(&encoded).ok()
}

fn decode_qr_png(base64_png: &str) -> Option<image::DynamicImage> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_png.trim()).ok()?;
    image::load_from_memory(&bytes).ok()
}

/// Draws the common two-column header: the nested
/// customs-office name table on the left, and either a Code39 barcode
/// (cargo variant) or nothing (container variant) plus the date line on the
/// right.
fn draw_header(layer: &PdfLayerReference, fonts: &Fonts, record: &DeclarationRecord, top_y: f64, with_barcode: bool) -> f64 {
    let left_x = MARGIN_LEFT_MM;
    let office_col_width = 80.0;

    write(layer, &fonts.bold, DEFAULT_TEN_CUC, 10.0, left_x, top_y);
    write_centered_in(
        layer,
        &fonts.bold,
        DEFAULT_TEN_CHI_CUC,
        10.0,
        left_x,
        left_x + office_col_width,
        top_y - 5.0,
    );

    let right_edge = PAGE_WIDTH_MM - MARGIN_RIGHT_MM;
    let mut right_y = top_y;

    if with_barcode {
        if let Some(png) = generate_code39_png(record.barcode_value()) {
            if let Ok(dyn_img) = image::load_from_memory(&png) {
                let img = Image::from_dynamic_image(&dyn_img);
                // 50mm x 15mm target size, right-aligned.
                let (w_px, h_px) = (dyn_img.width() as f64, dyn_img.height() as f64);
                let scale_x = 50.0 / (w_px * 25.4 / 300.0);
                let scale_y = 15.0 / (h_px * 25.4 / 300.0);
                img.add_to_layer(
                    layer.clone(),
                    ImageTransform {
                        translate_x: Some(Mm(right_edge - 50.0)),
                        translate_y: Some(Mm(right_y - 15.0)),
                        scale_x: Some(scale_x),
                        scale_y: Some(scale_y),
                        ..Default::default()
                    },
                );
            }
        }
        right_y -= 18.0;
    }

    let today = Local::now();
    let date_line = format!(
        "Ngày {} tháng {} năm {}",
        today.format("%d"),
        today.format("%m"),
        today.format("%Y")
    );
    write_right_aligned(layer, &fonts.italic, &date_line, 10.0, right_edge, right_y);

    top_y - 22.0
}

fn write_centered_in(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, size: f64, x0: f64, x1: f64, y: f64) {
    let approx_width = text.chars().count() as f64 * size * 0.55 * 0.352778;
    let x = x0 + ((x1 - x0 - approx_width) / 2.0).max(0.0);
    write(layer, font, text, size, x, y);
}

/// Title block + sub-title.
fn draw_title_block(layer: &PdfLayerReference, fonts: &Fonts, record: &DeclarationRecord, line1: &str, y: f64) -> f64 {
    write_centered(layer, &fonts.bold, line1, 13.0, y);
    write_centered(
        layer,
        &fonts.bold,
        "ĐỦ ĐIỀU KIỆN QUA KHU VỰC GIÁM SÁT HẢI QUAN",
        13.0,
        y - 6.0,
    );
    let sub_title = record.notes.clone().unwrap_or_else(|| DEFAULT_SUB_TITLE.to_string());
    write_centered(layer, &fonts.bold, &sub_title, 11.0, y - 13.0);
    y - 20.0
}

/// Numbered info block, items 1-9.
fn draw_info_block(layer: &PdfLayerReference, fonts: &Fonts, record: &DeclarationRecord, top_y: f64) -> f64 {
    let left_x = MARGIN_LEFT_MM;
    let mut y = top_y;

    let chi_cuc_gs = if record.supervising_sub_office_name.is_empty() {
        DEFAULT_CHI_CUC_GS.to_string()
    } else {
        record.supervising_sub_office_name.clone()
    };
    let mut line1 = format!("1. Chi cục hải quan giám sát: {chi_cuc_gs}");
    if !record.supervising_office_code.is_empty() {
        line1.push_str(&format!(" ({})", record.supervising_office_code));
    }
    write(layer, &fonts.regular, &line1, 10.0, left_x, y);
    y -= 6.0;

    write(
        layer,
        &fonts.regular,
        &format!("2. Đơn vị XNK: {}", record.company_name),
        10.0,
        left_x,
        y,
    );
    y -= 6.0;

    let right_col_x = left_x + CONTENT_WIDTH_MM / 2.0;
    let row_top = y;

    write(layer, &fonts.bold, "3. Mã số thuế: ", 10.0, left_x, row_top);
    write(layer, &fonts.regular, &record.tax_code, 10.0, left_x + 35.0, row_top);
    write(
        layer,
        &fonts.bold,
        "6. Ngày tờ khai: ",
        10.0,
        right_col_x,
        row_top,
    );
    write(
        layer,
        &fonts.regular,
        &record
            .registration_date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default(),
        10.0,
        right_col_x + 35.0,
        row_top,
    );

    write(layer, &fonts.bold, "4. Số tờ khai: ", 10.0, left_x, row_top - 6.0);
    write(
        layer,
        &fonts.regular,
        &record.declaration_number,
        10.0,
        left_x + 35.0,
        row_top - 6.0,
    );
    write(layer, &fonts.bold, "7. Loại hình: ", 10.0, right_col_x, row_top - 6.0);
    write(
        layer,
        &fonts.regular,
        &record.declaration_type_name,
        10.0,
        right_col_x + 35.0,
        row_top - 6.0,
    );

    write(
        layer,
        &fonts.bold,
        "5. Trạng thái tờ khai: ",
        10.0,
        left_x,
        row_top - 12.0,
    );
    write(
        layer,
        &fonts.regular,
        &record.status_name,
        10.0,
        left_x + 40.0,
        row_top - 12.0,
    );
    write(layer, &fonts.bold, "8. Luồng: ", 10.0, right_col_x, row_top - 12.0);
    write(
        layer,
        &fonts.regular,
        &record.channel_name,
        10.0,
        right_col_x + 30.0,
        row_top - 12.0,
    );

    y = row_top - 18.0;

    write(
        layer,
        &fonts.regular,
        &format!("9. Số quản lý hàng hóa: {}", record.so_dinh_danh),
        10.0,
        left_x,
        y,
    );

    y - 8.0
}

const CARGO_COL_WIDTHS_MM: [f64; 5] = [12.0, 35.0, 40.0, 40.0, 40.0];
const CARGO_HEADERS: [&str; 5] = [
    "STT",
    "SỐ LƯỢNG HÀNG (1)",
    "TỔNG TRỌNG LƯỢNG HÀNG (2)",
    "LƯỢNG HÀNG HÓA THỰC TẾ QUA KHU VỰC GIÁM SÁT HẢI QUAN (3)",
    "XÁC NHẬN CỦA CÔNG CHỨC HẢI QUAN (4)",
];

fn draw_cargo_table(layer: &PdfLayerReference, fonts: &Fonts, record: &DeclarationRecord, top_y: f64) -> f64 {
    let left_x = MARGIN_LEFT_MM;
    let header_height = 45.0 / 2.834_65; // pt -> mm
    let header_y0 = top_y - header_height;

    fill_rect(layer, left_x, header_y0, left_x + CONTENT_WIDTH_MM, top_y, 0.85);

    let mut x = left_x;
    for (i, width) in CARGO_COL_WIDTHS_MM.iter().enumerate() {
        draw_rect_outline(layer, x, header_y0, x + width, top_y);
        let lines = wrap_text(CARGO_HEADERS[i], 14);
        let mut text_y = top_y - 4.0;
        for line in &lines {
            write_centered_in(layer, &fonts.bold, line, 9.0, x, x + width, text_y);
            text_y -= 4.0;
        }
        x += width;
    }

    let row_height = 12.0;
    let row_y0 = header_y0 - row_height;
    let mut x = left_x;
    for width in CARGO_COL_WIDTHS_MM {
        draw_rect_outline(layer, x, row_y0, x + width, header_y0);
        x += width;
    }

    let count_cell = match &record.cargo_count {
        Some(c) if c != "0" && !c.is_empty() => format!("{c} {}", record.cargo_count_unit.clone().unwrap_or_default()),
        _ => String::new(),
    };
    let weight_cell = match &record.cargo_weight {
        Some(w) if w != "0" && !w.is_empty() => format!("{w} {}", record.cargo_weight_unit.clone().unwrap_or_default()),
        _ => String::new(),
    };

    let mut x = left_x;
    let values = ["1", &count_cell, &weight_cell, "", ""];
    for (i, width) in CARGO_COL_WIDTHS_MM.iter().enumerate() {
        write_centered_in(layer, &fonts.regular, values[i], 9.0, x, x + width, row_y0 + row_height / 2.0 - 1.5);
        x += width;
    }

    row_y0 - 6.0
}

const CONTAINER_COL_WIDTHS_MM: [f64; 6] = [12.0, 30.0, 28.0, 28.0, 32.0, 30.0];
const CONTAINER_HEADERS: [&str; 6] = [
    "STT",
    "SỐ HIỆU CONTAINER (1)",
    "SỐ SEAL CONTAINER (Nếu có) (2)",
    "SỐ SEAL HẢI QUAN (Nếu có) (3)",
    "XÁC NHẬN CỦA CÔNG CHỨC HẢI QUAN (4)",
    "MÃ VẠCH (5)",
];

fn draw_container_table(layer: &PdfLayerReference, fonts: &Fonts, containers: &[Container], top_y: f64) -> f64 {
    let left_x = MARGIN_LEFT_MM;
    let header_height = 60.0 / 2.834_65;
    let header_y0 = top_y - header_height;

    fill_rect(layer, left_x, header_y0, left_x + CONTENT_WIDTH_MM, top_y, 0.85);

    let mut x = left_x;
    for (i, width) in CONTAINER_COL_WIDTHS_MM.iter().enumerate() {
        draw_rect_outline(layer, x, header_y0, x + width, top_y);
        let lines = wrap_text(CONTAINER_HEADERS[i], 12);
        let mut text_y = top_y - 4.0;
        for line in &lines {
            write_centered_in(layer, &fonts.bold, line, 9.0, x, x + width, text_y);
            text_y -= 4.0;
        }
        x += width;
    }

    let row_height = 65.0 / 2.834_65;
    let mut row_top = header_y0;

    for container in containers {
        let row_y0 = row_top - row_height;
        let mut x = left_x;
        for width in CONTAINER_COL_WIDTHS_MM {
            draw_rect_outline(layer, x, row_y0, x + width, row_top);
            x += width;
        }

        let values = [
            container.sequence_number.to_string(),
            container.container_number.clone(),
            container.container_seal.clone(),
            container.customs_seal.clone(),
            String::new(),
        ];
        let mut x = left_x;
        for (i, width) in CONTAINER_COL_WIDTHS_MM.iter().take(5).enumerate() {
            write_centered_in(layer, &fonts.regular, &values[i], 9.0, x, x + width, row_y0 + row_height / 2.0);
            x += width;
        }

        if let Some(qr_base64) = &container.qr_image_base64 {
            if let Some(dyn_img) = decode_qr_png(qr_base64) {
                let img = Image::from_dynamic_image(&dyn_img);
                let (w_px, h_px) = (dyn_img.width() as f64, dyn_img.height() as f64);
                let scale_x = 20.0 / (w_px * 25.4 / 300.0);
                let scale_y = 20.0 / (h_px * 25.4 / 300.0);
                let qr_x = x + (CONTAINER_COL_WIDTHS_MM[5] - 20.0) / 2.0;
                img.add_to_layer(
                    layer.clone(),
                    ImageTransform {
                        translate_x: Some(Mm(qr_x)),
                        translate_y: Some(Mm(row_y0 + (row_height - 20.0) / 2.0)),
                        scale_x: Some(scale_x),
                        scale_y: Some(scale_y),
                        ..Default::default()
                    },
                );
            }
        }

        row_top = row_y0;
    }

    row_top - 6.0
}

fn draw_footer(layer: &PdfLayerReference, fonts: &Fonts, notes: &[&str], y: f64) {
    let now = Local::now();
    let export_line = format!(
        "Kết xuất dữ liệu lúc: {}",
        now.format("%d/%m/%Y %I:%M %p")
    );
    write(layer, &fonts.italic, &export_line, 8.0, MARGIN_LEFT_MM, y);

    let mut note_y = y - 6.0;
    for note in notes {
        write(layer, &fonts.regular, note, 8.0, MARGIN_LEFT_MM, note_y);
        note_y -= 4.5;
    }
}

fn render_cargo(record: &DeclarationRecord) -> Result<Vec<u8>> {
    let (doc, layer) = new_document("DANH SÁCH HÀNG HÓA");
    let fonts = load_fonts(&doc);

    let top_y = PAGE_HEIGHT_MM - MARGIN_TOP_MM;
    let y = draw_header(&layer, &fonts, record, top_y, true);
    let y = draw_title_block(&layer, &fonts, record, "DANH SÁCH HÀNG HÓA", y);
    let y = draw_info_block(&layer, &fonts, record, y);
    let y = draw_cargo_table(&layer, &fonts, record, y);
    draw_footer(&layer, &fonts, CARGO_NOTES, y.min(MARGIN_BOTTOM_MM + 30.0));

    finish(doc)
}

fn render_container(record: &DeclarationRecord) -> Result<Vec<u8>> {
    let (doc, layer) = new_document("DANH SÁCH CONTAINER");
    let fonts = load_fonts(&doc);

    let top_y = PAGE_HEIGHT_MM - MARGIN_TOP_MM;
    let y = draw_header(&layer, &fonts, record, top_y, false);
    let y = draw_title_block(&layer, &fonts, record, "DANH SÁCH CONTAINER", y);
    let y = draw_info_block(&layer, &fonts, record, y);
    let y = draw_container_table(&layer, &fonts, &record.containers, y);
    draw_footer(&layer, &fonts, CONTAINER_NOTES, y.max(MARGIN_BOTTOM_MM));

    finish(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_cargo_record() -> DeclarationRecord {
        DeclarationRecord {
            tax_code: "2300944637".into(),
            declaration_number: "107785877140".into(),
            registration_date: NaiveDate::from_ymd_opt(2025, 12, 10),
            company_name: "Cong ty TNHH Example".into(),
            supervising_office_code: "18A3".into(),
            supervising_sub_office_name: "Doi giam sat kho CFS".into(),
            declaration_type_code: "A11".into(),
            declaration_type_name: "Nhap kinh doanh tieu dung".into(),
            status_code: "T".into(),
            status_name: "Da thong quan".into(),
            channel_name: "Luong Xanh".into(),
            cargo_count: Some("120".into()),
            cargo_count_unit: Some("kien".into()),
            cargo_weight: Some("3500".into()),
            cargo_weight_unit: Some("kg".into()),
            ma_ptvc: "1".into(),
            so_dinh_danh: "SDD123456".into(),
            notes: None,
            server_timestamp: None,
            error_message: None,
            containers: Vec::new(),
        }
    }

    fn sample_container_record() -> DeclarationRecord {
        let mut r = sample_cargo_record();
        r.ma_ptvc = "2".into();
        r.containers = vec![
            Container::normalize(1, " CONT0001234 ", "SEAL1", "#####", None, None),
            Container::normalize(2, "CONT0005678", "SEAL2", "SEALHQ2", None, None),
        ];
        r
    }

    #[test]
    fn cargo_variant_produces_valid_pdf_bytes() {
        let renderer = PdfRenderer::new();
        let bytes = renderer.render(&sample_cargo_record()).unwrap().unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn container_variant_produces_valid_pdf_bytes() {
        let renderer = PdfRenderer::new();
        let bytes = renderer.render(&sample_container_record()).unwrap().unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn routing_follows_ma_ptvc() {
        assert!(!sample_cargo_record().is_container_document());
        assert!(sample_container_record().is_container_document());
    }

    #[test]
    fn wrap_text_splits_on_word_boundaries() {
        let lines = wrap_text("XÁC NHẬN CỦA CÔNG CHỨC HẢI QUAN", 14);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.chars().count() <= 20);
        }
    }

    #[test]
    fn missing_cargo_totals_are_omitted() {
        let mut record = sample_cargo_record();
        record.cargo_count = Some("0".into());
        record.cargo_weight = None;
        let renderer = PdfRenderer::new();
        // Rendering must still succeed even with zero/absent totals.
        assert!(renderer.render(&record).unwrap().is_some());
    }
}
