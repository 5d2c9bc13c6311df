use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use tracing::info;

use crate::errors::{Result, SamAreaError};

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const TITLE_FONT_SIZE: f32 = 12.0;
const BODY_FONT_SIZE: f32 = 9.0;
const TOP_MARGIN: Mm = Mm(20.0);

pub fn report_title(filename: &str) -> String {
    format!("Detection Report for {filename}")
}

/// Render the single-page detection report for `filename`.
pub fn generate_report(filename: &str, generated_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let report_error = |e: printpdf::Error| SamAreaError::Report {
        filename: filename.to_string(),
        source: e.to_string().into(),
    };

    if let Some(c) = filename.chars().find(|&c| !helvetica_can_render(c)) {
        return Err(SamAreaError::Report {
            filename: filename.to_string(),
            source: format!("character {c:?} is outside the Helvetica character set").into(),
        });
    }

    let title = report_title(filename);
    let (doc, page, layer) = PdfDocument::new(title.as_str(), PAGE_WIDTH, PAGE_HEIGHT, "Report");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(report_error)?;
    let layer = doc.get_page(page).get_layer(layer);

    let title_y = Mm(PAGE_HEIGHT.0 - TOP_MARGIN.0);
    write_centered(&layer, &font, &title, TITLE_FONT_SIZE, title_y);
    write_centered(
        &layer,
        &font,
        &format!("Generated at {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        BODY_FONT_SIZE,
        Mm(title_y.0 - 8.0),
    );

    doc.save_to_bytes().map_err(report_error)
}

/// Builtin PDF fonts only cover WinAnsi; anything else is silently dropped
/// from the page. Printable ASCII and the Latin-1 supplement are accepted.
fn helvetica_can_render(c: char) -> bool {
    matches!(c, ' '..='~' | '\u{a0}'..='\u{ff}')
}

/// Builtin fonts carry no metrics here, so centring uses Helvetica's average
/// glyph width.
fn write_centered(
    layer: &PdfLayerReference,
    font: &IndirectFontRef,
    text: &str,
    font_size: f32,
    y: Mm,
) {
    const AVG_GLYPH_WIDTH_EM: f32 = 0.5;
    const PT_TO_MM: f32 = 0.352_778;

    let text_width = text.chars().count() as f32 * font_size * AVG_GLYPH_WIDTH_EM * PT_TO_MM;
    let x = ((PAGE_WIDTH.0 - text_width) / 2.0).max(10.0);
    layer.use_text(text, font_size, Mm(x), y, font);
}

/// Path the report for `filename` is written to.
pub fn report_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.pdf"))
}

/// Render the report and write it to `<dir>/<filename>.pdf`, returning both
/// the path and the bytes.
pub async fn write_report(dir: &Path, filename: &str) -> Result<(PathBuf, Vec<u8>)> {
    let name = filename.to_string();
    let bytes = tokio::task::spawn_blocking(move || generate_report(&name, Utc::now()))
        .await
        .map_err(|e| SamAreaError::Report {
            filename: filename.to_string(),
            source: Box::new(e),
        })??;

    let path = report_path(dir, filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| SamAreaError::filesystem(&path, "report write", e))?;
    info!(path = %path.display(), bytes = bytes.len(), "report written");

    Ok((path, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_is_a_pdf() -> Result<()> {
        let bytes = generate_report("leaf.png", Utc::now())?;
        assert!(bytes.starts_with(b"%PDF"));
        Ok(())
    }

    #[test]
    fn test_report_text_contains_latin_filename() -> Result<()> {
        let bytes = generate_report("café leaf.png", Utc::now())?;
        let text = pdf_extract::extract_text_from_mem(&bytes).unwrap();
        assert!(text.contains("café leaf.png"), "report text was {text:?}");
        Ok(())
    }

    #[test]
    fn test_unrenderable_filename_is_an_error() {
        for name in ["葉っぱ.png", "leaf\u{1f33f}.png", "tab\there.png"] {
            assert!(
                matches!(generate_report(name, Utc::now()), Err(SamAreaError::Report { .. })),
                "rendered {name:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_report_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        assert!(write_report(temp_dir.path(), "葉っぱ.png").await.is_err());
        assert!(!report_path(temp_dir.path(), "葉っぱ.png").exists());
    }

    #[test]
    fn test_report_path_appends_extension() {
        assert_eq!(
            report_path(Path::new("uploads"), "leaf.png"),
            PathBuf::from("uploads/leaf.png.pdf")
        );
    }

    #[tokio::test]
    async fn test_write_report_persists_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (path, bytes) = write_report(temp_dir.path(), "leaf.png").await?;

        assert_eq!(path, temp_dir.path().join("leaf.png.pdf"));
        assert_eq!(std::fs::read(&path)?, bytes);
        Ok(())
    }
}
