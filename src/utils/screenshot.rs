use crate::core::Page;
use crate::errors::Result;
use base64::Engine;

/// Width and height from a PNG's IHDR chunk.
pub fn png_dimensions(png: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if png.len() < 24 || png[..8] != SIGNATURE || &png[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
    let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
    Some((width, height))
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub async fn take_base64(page: &dyn Page, full_page: bool) -> Result<String> {
    let screenshot_bytes = page.screenshot(full_page).await?;
    Ok(to_base64(&screenshot_bytes))
}

pub async fn save_to_file(page: &dyn Page, file_path: &str, full_page: bool) -> Result<()> {
    let screenshot_bytes = page.screenshot(full_page).await?;
    tokio::fs::write(file_path, screenshot_bytes).await?;
    Ok(())
}

/// Signature plus IHDR chunk of an RGBA image. Enough for anything that
/// only reads dimensions.
pub fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    png.extend_from_slice(&13u32.to_be_bytes());
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&width.to_be_bytes());
    png.extend_from_slice(&height.to_be_bytes());
    png.extend_from_slice(&[8, 6, 0, 0, 0]);
    png.extend_from_slice(&[0, 0, 0, 0]);
    png
}
