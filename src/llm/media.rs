use once_cell::sync::Lazy;
use regex::Regex;

static DATA_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^data:(?P<mime>[a-z0-9.+-]+/[a-z0-9.+-]+);base64,(?P<data>[A-Za-z0-9+/]+={0,2})$")
        .expect("valid data uri regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: String,
}

pub fn parse_data_uri(value: &str) -> Option<DataUri> {
    let captures = DATA_URI_RE.captures(value.trim())?;
    let mime_type = captures.name("mime")?.as_str().to_lowercase();
    let data = captures.name("data")?.as_str().to_string();
    if data.is_empty() {
        return None;
    }
    Some(DataUri { mime_type, data })
}

pub fn format_data_uri(mime_type: &str, data: &str) -> String {
    format!("data:{};base64,{}", mime_type, data)
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_data_uri() {
        let parsed = parse_data_uri("data:image/png;base64,iVBORw0KGgo=").expect("should parse");
        assert_eq!(parsed.mime_type, "image/png");
        assert_eq!(parsed.data, "iVBORw0KGgo=");
    }

    #[test]
    fn normalizes_mime_type_case() {
        let parsed = parse_data_uri("data:IMAGE/JPEG;base64,AAAA").expect("should parse");
        assert_eq!(parsed.mime_type, "image/jpeg");
    }

    #[test]
    fn rejects_missing_payload_and_malformed_input() {
        assert!(parse_data_uri("").is_none());
        assert!(parse_data_uri("data:image/png;base64,").is_none());
        assert!(parse_data_uri("data:image/png,AAAA").is_none());
        assert!(parse_data_uri("http://example.com/cat.png").is_none());
        assert!(parse_data_uri("just some text").is_none());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let uri = format_data_uri("image/png", "AAA");
        assert_eq!(uri, "data:image/png;base64,AAA");
        let parsed = parse_data_uri(&uri).expect("should parse");
        assert_eq!(parsed.mime_type, "image/png");
        assert_eq!(parsed.data, "AAA");
    }

    #[test]
    fn sniffs_png_magic_bytes() {
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime_type(&png).as_deref(), Some("image/png"));
    }
}
