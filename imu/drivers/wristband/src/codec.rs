//! Decoding of the firmware's text lines.
//!
//! Every line is `<keyword> <field> <field> ...`. Both command responses and
//! streamed telemetry go through [`tokenize`] / [`decode`].

/// A protocol line split into its keyword and numeric fields.
///
/// An empty `keyword` marks a blank or comment line that callers skip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLine {
    pub keyword: String,
    pub values: Vec<f32>,
}

impl DecodedLine {
    pub fn is_empty(&self) -> bool {
        self.keyword.is_empty()
    }
}

/// Splits a line into its lower-cased keyword and the raw remaining fields.
///
/// Returns `None` for blank lines and `#` comments.
pub fn tokenize(line: &str) -> Option<(String, Vec<&str>)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let keyword = fields.next()?.to_lowercase();
    Some((keyword, fields.collect()))
}

/// Decodes a line. Fields that are not numbers become NaN in place, so a
/// garbled sample never aborts the read loop.
pub fn decode(line: &str) -> DecodedLine {
    match tokenize(line) {
        Some((keyword, fields)) => DecodedLine {
            keyword,
            values: fields
                .iter()
                .map(|field| field.parse::<f32>().unwrap_or(f32::NAN))
                .collect(),
        },
        None => DecodedLine::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_is_lowercased() {
        let line = decode("WXYZ 0.5 -1 2e-3 4");
        assert_eq!(line.keyword, "wxyz");
        assert_eq!(line.values, vec![0.5, -1.0, 0.002, 4.0]);
    }

    #[test]
    fn test_bad_field_becomes_nan_in_place() {
        let line = decode("force 1.0 abc 3.0 4.0");
        assert_eq!(line.values.len(), 4);
        assert_eq!(line.values[0], 1.0);
        assert!(line.values[1].is_nan());
        assert_eq!(line.values[2], 3.0);
        assert_eq!(line.values[3], 4.0);
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        for input in ["", "   ", "\r\n", "# comment", "#wxyz 1 2 3 4"] {
            let line = decode(input);
            assert!(line.is_empty(), "{:?}", input);
            assert!(line.values.is_empty());
        }
    }

    #[test]
    fn test_surrounding_whitespace_and_crlf() {
        let line = decode("  raw_adc 1  2\t3 4 5 6\r\n");
        assert_eq!(line.keyword, "raw_adc");
        assert_eq!(line.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_keyword_only() {
        let line = decode("Ready");
        assert_eq!(line.keyword, "ready");
        assert!(line.values.is_empty());
    }

    #[test]
    fn test_tokenize_keeps_text_fields() {
        let (keyword, fields) = tokenize("UID 0A1B2C3D").unwrap();
        assert_eq!(keyword, "uid");
        assert_eq!(fields, vec!["0A1B2C3D"]);
        assert!(decode("uid 0A1B2C3D").values[0].is_nan());
    }
}
