//! Safe filename generation for Content-Disposition headers

use regex::Regex;

/// Convert a media title to a filesystem- and header-safe filename
pub fn to_safe_filename(title: &str, extension: &str) -> String {
    let invalid_chars = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap();
    let mut safe = invalid_chars.replace_all(title, "_").to_string();

    safe = safe
        .trim_matches(|c: char| c == '.' || c == ' ')
        .to_string();

    // Stay well under the 255-byte filesystem limit
    if safe.len() > 200 {
        let mut cut = 200;
        while !safe.is_char_boundary(cut) {
            cut -= 1;
        }
        safe.truncate(cut);
        safe = safe.trim_end().to_string();
    }

    if safe.is_empty() {
        safe = "download".to_string();
    }

    if extension.is_empty() {
        safe
    } else {
        format!("{}.{}", safe, extension.trim_start_matches('.'))
    }
}
