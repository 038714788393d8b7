//! Scientific pitch notation.

/// Decode a note name such as `C4`, `Db-1` or `-F#3` into a note number.
///
/// The value is `sign * ((octave + 1) * 12 + note + accidental)` with
/// C=0 D=2 E=4 F=5 G=7 A=9 B=11, `#` raising and `b` lowering by one.
/// The octave is a single digit, optionally negative. A leading `-` flips
/// the sign, which lets note names act as offsets in affine ranges.
pub fn parse_note_name(name: &str) -> Option<i32> {
    let name = name.trim();
    let mut chars = name.chars().peekable();

    let sign = match chars.peek() {
        Some('-') => {
            chars.next();
            -1
        }
        Some('+') => {
            chars.next();
            1
        }
        _ => 1,
    };

    // Parse note letter (C, D, E, F, G, A, B)
    let base = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    // Parse accidental (# or b)
    let accidental = match chars.peek() {
        Some('#') => {
            chars.next();
            1
        }
        Some('b') => {
            chars.next();
            -1
        }
        _ => 0,
    };

    // Parse octave
    let octave_str: String = chars.collect();
    let octave = match octave_str.as_bytes() {
        [d] if d.is_ascii_digit() => (d - b'0') as i32,
        [b'-', d] if d.is_ascii_digit() => -((d - b'0') as i32),
        _ => return None,
    };

    Some(sign * ((octave + 1) * 12 + base + accidental))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(octave: i32, note: i32, acc: i32) -> i32 {
        (octave + 1) * 12 + note + acc
    }

    #[test]
    fn test_naturals_follow_formula() {
        assert_eq!(parse_note_name("C-1"), Some(formula(-1, 0, 0)));
        assert_eq!(parse_note_name("C4"), Some(formula(4, 0, 0)));
        assert_eq!(parse_note_name("A4"), Some(formula(4, 9, 0)));
        assert_eq!(parse_note_name("B9"), Some(formula(9, 11, 0)));
    }

    #[test]
    fn test_accidentals() {
        assert_eq!(parse_note_name("Db-1"), Some(formula(-1, 2, -1)));
        assert_eq!(parse_note_name("F#3"), Some(formula(3, 5, 1)));
        assert_eq!(parse_note_name("Cb4"), Some(formula(4, 0, -1)));
    }

    #[test]
    fn test_sign() {
        assert_eq!(parse_note_name("-C4"), Some(-formula(4, 0, 0)));
        assert_eq!(parse_note_name("+E2"), Some(formula(2, 4, 0)));
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(parse_note_name("H4"), None);
        assert_eq!(parse_note_name("C"), None);
        assert_eq!(parse_note_name("C10"), None);
        assert_eq!(parse_note_name("c4"), None);
        assert_eq!(parse_note_name(""), None);
    }
}
