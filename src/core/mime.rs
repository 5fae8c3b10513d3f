//! 上传时的 Content-Type 识别
//!
//! 先根据文件头魔数识别，识别不出时再按扩展名查表，两者都失败则报错。

use crate::error::{SyncError, SyncResult};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// 识别魔数需要读取的字节数
const SNIFF_LEN: usize = 32;

/// BMP 信息头可能的长度（BITMAPCOREHEADER .. BITMAPV5HEADER）
const BMP_DIB_HEADER_SIZES: &[u32] = &[12, 40, 52, 56, 64, 108, 124];

/// 文件头魔数 -> Content-Type
const MAGIC_RULES: &[(usize, &[u8], &str)] = &[
    (0, b"\x89PNG\r\n\x1a\n", "image/png"),
    (0, b"\xff\xd8\xff", "image/jpeg"),
    (0, b"GIF87a", "image/gif"),
    (0, b"GIF89a", "image/gif"),
    (8, b"WEBP", "image/webp"),
    (0, b"\x00\x00\x01\x00", "image/x-icon"),
    (0, b"%PDF-", "application/pdf"),
    (0, b"wOFF", "font/woff"),
    (0, b"wOF2", "font/woff2"),
    (0, b"PK\x03\x04", "application/zip"),
];

/// 扩展名 -> Content-Type
const EXTENSION_RULES: &[(&str, &str)] = &[
    ("svg", "image/svg+xml"),
    ("json", "application/json"),
    ("css", "text/css"),
    ("txt", "text/plain"),
    ("xml", "application/xml"),
    ("html", "text/html"),
    ("js", "application/javascript"),
    ("md", "text/markdown"),
    ("yml", "application/yaml"),
    ("yaml", "application/yaml"),
    ("properties", "text/plain"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
];

/// 根据文件头识别
pub fn sniff(header: &[u8]) -> Option<&'static str> {
    MAGIC_RULES
        .iter()
        .find_map(|(offset, magic, mime)| {
            header
                .get(*offset..*offset + magic.len())
                .filter(|bytes| bytes == magic)
                .map(|_| *mime)
        })
        .or_else(|| is_bmp(header).then_some("image/bmp"))
}

/// "BM" 只有两个字节，还要求保留字段为 0 且信息头长度合法
fn is_bmp(header: &[u8]) -> bool {
    let (Some(reserved), Some(dib)) = (header.get(6..10), header.get(14..18)) else {
        return false;
    };
    let dib = u32::from_le_bytes([dib[0], dib[1], dib[2], dib[3]]);

    header.starts_with(b"BM") && reserved == [0, 0, 0, 0] && BMP_DIB_HEADER_SIZES.contains(&dib)
}

/// 根据扩展名识别
pub fn from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    EXTENSION_RULES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// 识别文件的 Content-Type
pub fn content_type_for(path: &Path, header: &[u8]) -> SyncResult<&'static str> {
    sniff(header)
        .or_else(|| from_extension(path))
        .ok_or_else(|| SyncError::UnknownContentType(path.to_path_buf()))
}

/// 读取文件头并识别 Content-Type
pub async fn resolve_content_type(path: &Path) -> SyncResult<&'static str> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut header).await?;

    content_type_for(path, &header)
}
