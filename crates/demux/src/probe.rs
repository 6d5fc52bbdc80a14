//! Container probing: detect the format of a source and pick the output
//! extension a remux of it should use.

use std::io::Read;
use std::path::Path;

use vela_common::{ContainerFormat, DemuxError, MediaSource};

/// Magic bytes for Matroska/WebM files (EBML header element ID).
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// MPEG-TS sync byte, repeated every 188-byte packet.
const TS_SYNC: u8 = 0x47;
const TS_PACKET_SIZE: usize = 188;

/// Top-level ISO BMFF boxes a QuickTime/MP4 file may start with.
const MP4_LEADING_BOXES: [&[u8; 4]; 5] = [b"moov", b"mdat", b"wide", b"free", b"skip"];

/// Detect container format from the file extension.
pub fn detect_format(path: &Path) -> Result<ContainerFormat, DemuxError> {
    ContainerFormat::from_path(path).ok_or_else(|| {
        DemuxError::UnsupportedContainer(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("<none>")
                .to_string(),
        )
    })
}

/// Detect the format of any source. URLs are judged by the extension of
/// their path component; HLS playlists map to MPEG-TS segments.
pub fn detect_source_format(source: &MediaSource) -> Result<ContainerFormat, DemuxError> {
    match source {
        MediaSource::Path(path) => detect_format(path),
        MediaSource::Url(url) => {
            let path = url
                .split(['?', '#'])
                .next()
                .unwrap_or(url.as_str());
            let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
            if ext.eq_ignore_ascii_case("m3u8") {
                return Ok(ContainerFormat::MpegTs);
            }
            ContainerFormat::from_extension(ext)
                .ok_or_else(|| DemuxError::UnsupportedContainer(url.clone()))
        }
    }
}

/// Detect container format from magic bytes.
///
/// This probes the content rather than relying on the extension, which is
/// more reliable for files with incorrect or missing extensions.
pub fn detect_format_from_magic<R: Read>(reader: &mut R) -> Result<ContainerFormat, DemuxError> {
    let mut header = vec![0u8; TS_PACKET_SIZE * 2 + 1];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let header = &header[..filled];

    if header.len() < 4 {
        return Err(DemuxError::UnsupportedContainer("too short to probe".into()));
    }

    if header[..4] == EBML_MAGIC {
        // DocType lives in the first few dozen bytes of the EBML header.
        let doc = &header[..header.len().min(64)];
        if doc.windows(4).any(|w| w == b"webm") {
            return Ok(ContainerFormat::WebM);
        }
        return Ok(ContainerFormat::Mkv);
    }

    if header.len() >= 8 {
        let kind = &header[4..8];
        if kind == b"ftyp" {
            let brand = header.get(8..12).unwrap_or_default();
            return Ok(if brand == b"qt  " {
                ContainerFormat::Mov
            } else {
                ContainerFormat::Mp4
            });
        }
        if MP4_LEADING_BOXES.iter().any(|b| kind == &b[..]) {
            return Ok(ContainerFormat::Mp4);
        }
    }

    if header.starts_with(b"FLV") {
        return Ok(ContainerFormat::Flv);
    }

    // Two consecutive sync bytes at packet boundaries.
    if header[0] == TS_SYNC && header.get(TS_PACKET_SIZE) == Some(&TS_SYNC) {
        return Ok(ContainerFormat::MpegTs);
    }

    Err(DemuxError::UnsupportedContainer("unrecognized magic".into()))
}

/// Extension a remux of an input with this format name should use.
pub fn recommended_extension(input_format_name: &str) -> Option<&'static str> {
    ContainerFormat::from_input_format_name(input_format_name).map(ContainerFormat::recommended_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    #[test]
    fn test_detect_format_mp4() {
        let path = PathBuf::from("video.mp4");
        assert_eq!(detect_format(&path).unwrap(), ContainerFormat::Mp4);
    }

    #[test]
    fn test_detect_format_mov() {
        let path = PathBuf::from("video.mov");
        assert_eq!(detect_format(&path).unwrap(), ContainerFormat::Mov);
    }

    #[test]
    fn test_detect_format_unsupported() {
        let err = detect_format(&PathBuf::from("video.avi")).unwrap_err();
        assert!(matches!(err, DemuxError::UnsupportedContainer(ext) if ext == "avi"));
    }

    #[test]
    fn test_detect_source_format_urls() {
        let hls = MediaSource::parse("https://cdn.example.com/live/index.m3u8?token=abc");
        assert_eq!(detect_source_format(&hls).unwrap(), ContainerFormat::MpegTs);
        let mkv = MediaSource::parse("http://host/movie.mkv");
        assert_eq!(detect_source_format(&mkv).unwrap(), ContainerFormat::Mkv);
        assert!(detect_source_format(&MediaSource::parse("rtsp://cam/stream")).is_err());
    }

    #[test]
    fn test_detect_format_from_magic_ebml() {
        let data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x00, 0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(data);
        assert_eq!(
            detect_format_from_magic(&mut cursor).unwrap(),
            ContainerFormat::Mkv
        );
    }

    #[test]
    fn test_detect_format_from_magic_webm_doctype() {
        let mut data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x84];
        data.extend_from_slice(b"webm");
        let mut cursor = Cursor::new(data);
        assert_eq!(
            detect_format_from_magic(&mut cursor).unwrap(),
            ContainerFormat::WebM
        );
    }

    #[test]
    fn test_detect_format_from_magic_mp4_ftyp() {
        // [size=20][ftyp]
        let data = vec![
            0x00, 0x00, 0x00, 0x14, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm',
        ];
        let mut cursor = Cursor::new(data);
        assert_eq!(
            detect_format_from_magic(&mut cursor).unwrap(),
            ContainerFormat::Mp4
        );
    }

    #[test]
    fn test_detect_format_from_magic_ts() {
        let mut data = vec![0u8; TS_PACKET_SIZE * 2];
        data[0] = TS_SYNC;
        data[TS_PACKET_SIZE] = TS_SYNC;
        let mut cursor = Cursor::new(data);
        assert_eq!(
            detect_format_from_magic(&mut cursor).unwrap(),
            ContainerFormat::MpegTs
        );
    }

    #[test]
    fn test_detect_format_from_magic_flv() {
        let mut cursor = Cursor::new(b"FLV\x01\x05\x00\x00\x00\x09".to_vec());
        assert_eq!(
            detect_format_from_magic(&mut cursor).unwrap(),
            ContainerFormat::Flv
        );
    }

    #[test]
    fn test_detect_format_from_magic_too_short() {
        let mut cursor = Cursor::new(vec![0x00, 0x01]);
        assert!(detect_format_from_magic(&mut cursor).is_err());
    }

    #[test]
    fn test_detect_format_from_magic_unknown() {
        let data = vec![0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00]; // RIFF (AVI)
        let mut cursor = Cursor::new(data);
        assert!(detect_format_from_magic(&mut cursor).is_err());
    }

    #[test]
    fn test_recommended_extension() {
        assert_eq!(recommended_extension("mov,mp4,m4a,3gp,3g2,mj2"), Some("mp4"));
        assert_eq!(recommended_extension("matroska,webm"), Some("mkv"));
        assert_eq!(recommended_extension("hls"), Some("ts"));
        assert_eq!(recommended_extension("avi"), None);
    }
}
