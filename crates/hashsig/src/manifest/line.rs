//! Single manifest line: `{short_name}: {hash_hex} {size}`.

/// Encode one manifest line.
pub fn encode_line(short_name: &str, hash_hex: &str, size: u64) -> String {
    format!("{}: {} {}", short_name, hash_hex, size)
}

/// Decode one manifest line into `(short_name, hash_hex, size)`.
///
/// The name ends at the first `:`; the hash starts two bytes later and ends
/// at the next space. Returns `None` for lines without a name, without the
/// separator, or without a space after the hash. Callers skip such lines.
pub fn decode_line(line: &str) -> Option<(&str, &str, &str)> {
    let i = line.find(':')?;
    if i == 0 {
        return None;
    }
    let hash_start = i + 2;
    if hash_start > line.len() || !line.is_char_boundary(hash_start) {
        return None;
    }
    let j = hash_start + line[hash_start..].find(' ')?;
    if j == hash_start {
        return None;
    }
    Some((&line[..i], &line[hash_start..j], &line[j + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_encoded_line() {
        let line = encode_line("dir/a.txt", "e3b0c442", 0);
        assert_eq!(line, "dir/a.txt: e3b0c442 0");
        assert_eq!(decode_line(&line), Some(("dir/a.txt", "e3b0c442", "0")));
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert_eq!(decode_line("no separator here"), None);
        assert_eq!(decode_line(": abc 1"), None);
        assert_eq!(decode_line("a.txt: abc"), None);
        assert_eq!(decode_line("a.txt:"), None);
        assert_eq!(decode_line(""), None);
    }

    #[test]
    fn test_size_keeps_trailing_text() {
        assert_eq!(
            decode_line("a.txt: abc 12 extra"),
            Some(("a.txt", "abc", "12 extra"))
        );
    }
}
