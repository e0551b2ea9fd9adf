//! Export naming: musical key and tempo hints embedded in track names
//!
//! Producers label groups like `"Amin - 143bpm"` or `"Song Cmaj 120"`. The
//! first two-or-three digit run is the BPM candidate (kept only inside
//! [`BPM_MIN`]..=[`BPM_MAX`]); the first word-bounded note letter with an
//! optional accidental and mode is the key.

/// Lowest tempo accepted from a name
pub const BPM_MIN: u32 = 60;
/// Highest tempo accepted from a name
pub const BPM_MAX: u32 = 200;

/// Characters that are unsafe in file names on at least one platform
pub const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Mode spellings in matching priority order
const MODES: &[(&str, &str)] = &[
    ("min", "min"),
    ("maj", "maj"),
    ("minor", "min"),
    ("major", "maj"),
    ("m", "min"),
];

/// Parse `(key, bpm)` hints from a track or group name
pub fn parse_key_and_bpm(name: &str) -> (Option<String>, Option<u32>) {
    let chars: Vec<char> = name.chars().collect();
    (find_key(&chars), find_bpm(&chars))
}

/// Replace path-hostile characters with `_` and trim surrounding whitespace
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<track>_<key>_<bpm>bpm`, skipping the parts that are unknown
pub fn suggested_filename(track_name: &str, key: Option<&str>, bpm: Option<u32>) -> String {
    let mut parts = vec![sanitize_filename(track_name)];
    if let Some(key) = key {
        parts.push(key.to_string());
    }
    if let Some(bpm) = bpm {
        parts.push(format!("{}bpm", bpm));
    }
    parts.join("_")
}

/// Only the first digit run is considered; an out-of-range value is no BPM
fn find_bpm(chars: &[char]) -> Option<u32> {
    let start = chars
        .windows(2)
        .position(|w| w[0].is_ascii_digit() && w[1].is_ascii_digit())?;
    let digits: String = chars[start..]
        .iter()
        .take(3)
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let bpm: u32 = digits.parse().ok()?;
    (BPM_MIN..=BPM_MAX).contains(&bpm).then_some(bpm)
}

fn find_key(chars: &[char]) -> Option<String> {
    (0..chars.len()).find_map(|i| key_at(chars, i))
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn word_at(chars: &[char], i: usize) -> bool {
    chars.get(i).copied().is_some_and(is_word)
}

fn boundary(chars: &[char], i: usize) -> bool {
    let before = i > 0 && word_at(chars, i - 1);
    before != word_at(chars, i)
}

fn spelled_at(chars: &[char], i: usize, word: &str) -> bool {
    let mut pos = i;
    for expected in word.chars() {
        match chars.get(pos) {
            Some(c) if c.to_ascii_lowercase() == expected => pos += 1,
            _ => return false,
        }
    }
    true
}

/// Try a key starting at `i`. A longer note (with accidental) is preferred,
/// then the most whitespace before the mode, then modes in [`MODES`] order,
/// then no mode at all.
fn key_at(chars: &[char], i: usize) -> Option<String> {
    let letter = chars[i].to_ascii_uppercase();
    if !('A'..='G').contains(&letter) || (i > 0 && word_at(chars, i - 1)) {
        return None;
    }

    // Only the letter is uppercased; a flat stays `b` so "BB" reads as `Bb`, not `BB`
    let accidental = match chars.get(i + 1) {
        Some('#') => Some('#'),
        Some('b') | Some('B') => Some('b'),
        _ => None,
    };
    let candidates = accidental
        .map(|acc| (format!("{}{}", letter, acc), i + 2))
        .into_iter()
        .chain(std::iter::once((letter.to_string(), i + 1)));

    for (note, note_end) in candidates {
        let spaces = chars[note_end.min(chars.len())..]
            .iter()
            .take_while(|c| c.is_whitespace())
            .count();
        for skipped in (0..=spaces).rev() {
            let pos = note_end + skipped;
            for (spelling, mode) in MODES {
                if spelled_at(chars, pos, spelling) && boundary(chars, pos + spelling.len()) {
                    return Some(format!("{}{}", note, mode));
                }
            }
            if boundary(chars, pos) {
                return Some(note);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_parsed(name: &str, key: Option<&str>, bpm: Option<u32>) {
        let (k, b) = parse_key_and_bpm(name);
        assert_eq!((k.as_deref(), b), (key, bpm), "parsing {:?}", name);
    }

    fn bpm(name: &str) -> Option<u32> {
        parse_key_and_bpm(name).1
    }

    fn key(name: &str) -> Option<String> {
        parse_key_and_bpm(name).0
    }

    #[test]
    fn test_common_group_names() {
        assert_parsed("Amin - 143bpm", Some("Amin"), Some(143));
        assert_parsed("Song Cmaj 120", Some("Cmaj"), Some(120));
        assert_parsed("Track 140bpm Fmin", Some("Fmin"), Some(140));
        assert_parsed("F# minor 128 BPM", Some("F#min"), Some(128));
        assert_parsed("Bb major 90", Some("Bbmaj"), Some(90));
        assert_parsed("Dm 100", Some("Dmin"), Some(100));
    }

    #[test]
    fn test_key_requires_word_boundaries() {
        // "Bass" and "Lead" start with note letters but are words
        assert_parsed("Bass 1", None, None);
        assert_parsed("Lead", None, None);
        assert_parsed("Amaj7", None, None);
        assert_parsed("vox e", Some("E"), None);
    }

    #[test]
    fn test_letter_case_is_normalized() {
        assert_parsed("g MINOR", Some("Gmin"), None);
        assert_parsed("eb", Some("Eb"), None);
        assert_parsed("EB maj", Some("Ebmaj"), None);
    }

    #[test]
    fn test_bpm_takes_only_the_first_number() {
        assert_eq!(bpm("Take 05 128bpm"), None);
        assert_eq!(bpm("Loop 45 then 120"), None);
        assert_eq!(bpm("1234"), Some(123));
        assert_eq!(bpm("200"), Some(200));
        assert_eq!(bpm("201"), None);
        assert_eq!(bpm("60bpm"), Some(60));
    }

    #[test]
    fn test_sharp_without_mode_at_end_keeps_letter_only() {
        // A trailing '#' is not followed by a word boundary
        assert_eq!(key("Pad C#").as_deref(), Some("C"));
        assert_eq!(key("Pad C#m").as_deref(), Some("C#min"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("  Kick/Snare: take *2*? "), "Kick_Snare_ take _2__");
        assert_eq!(sanitize_filename(r#"a<b>c"d\e|f"#), "a_b_c_d_e_f");
        assert_eq!(sanitize_filename("Bass 1"), "Bass 1");
    }

    #[test]
    fn test_suggested_filename() {
        assert_eq!(
            suggested_filename("Bass 1", Some("Amin"), Some(143)),
            "Bass 1_Amin_143bpm"
        );
        assert_eq!(suggested_filename("Lead", None, Some(120)), "Lead_120bpm");
        assert_eq!(suggested_filename("FX/Riser", None, None), "FX_Riser");
    }
}
