//! GSM 03.38 7-bit default alphabet.
//!
//! Septets are packed little-endian into octets. A user data header in front
//! of 7-bit text is padded with fill bits up to the next septet boundary, so
//! callers unpack the whole user data and skip the header septets.

/// Escape to the extension table.
pub const ESCAPE: u8 = 0x1B;

#[rustfmt::skip]
const DEFAULT_ALPHABET: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

fn extension(septet: u8) -> Option<char> {
    Some(match septet {
        0x0A => '\u{0C}',
        0x14 => '^',
        0x28 => '{',
        0x29 => '}',
        0x2F => '\\',
        0x3C => '[',
        0x3D => '~',
        0x3E => ']',
        0x40 => '|',
        0x65 => '€',
        _ => return None,
    })
}

/// Unpack `count` septets from packed octets. Missing trailing octets read as zero.
pub fn unpack_septets(data: &[u8], count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bit = i * 7;
        let idx = bit / 8;
        let off = bit % 8;
        let lo = *data.get(idx).unwrap_or(&0) as u16;
        let mut v = lo >> off;
        if off > 1 {
            let hi = *data.get(idx + 1).unwrap_or(&0) as u16;
            v |= hi << (8 - off);
        }
        out.push((v & 0x7F) as u8);
    }
    out
}

/// Pack septets into octets (inverse of [`unpack_septets`]).
pub fn pack_septets(septets: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; (septets.len() * 7).div_ceil(8)];
    for (i, &s) in septets.iter().enumerate() {
        let bit = i * 7;
        let idx = bit / 8;
        let off = bit % 8;
        let v = ((s & 0x7F) as u16) << off;
        out[idx] |= (v & 0xFF) as u8;
        if off > 1 {
            out[idx + 1] |= (v >> 8) as u8;
        }
    }
    out
}

/// Decode septets to UTF-16 code units.
///
/// An escape followed by a code without an extension mapping renders the
/// default-alphabet character for that code, as receivers are expected to.
/// A trailing lone escape is dropped.
pub fn decode(septets: &[u8]) -> Vec<u16> {
    let mut out = Vec::with_capacity(septets.len());
    let mut iter = septets.iter().copied();
    let mut buf = [0u16; 2];
    while let Some(s) = iter.next() {
        let ch = if s == ESCAPE {
            match iter.next() {
                Some(next) => extension(next).unwrap_or(DEFAULT_ALPHABET[(next & 0x7F) as usize]),
                None => break,
            }
        } else {
            DEFAULT_ALPHABET[(s & 0x7F) as usize]
        };
        out.extend_from_slice(ch.encode_utf16(&mut buf));
    }
    out
}

/// Decode septets straight to a `String`.
pub fn decode_to_string(septets: &[u8]) -> String {
    String::from_utf16_lossy(&decode(septets))
}

/// Encode text in the default alphabet, escaping extension characters.
/// Returns `None` when a character has no 7-bit representation.
pub fn encode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if let Some(pos) = DEFAULT_ALPHABET.iter().position(|&c| c == ch) {
            if pos as u8 == ESCAPE {
                return None;
            }
            out.push(pos as u8);
        } else if let Some(code) = (0u8..0x80).find(|&c| extension(c) == Some(ch)) {
            out.push(ESCAPE);
            out.push(code);
        } else {
            return None;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_classic_hello() {
        // "hellohello" packed: E8329BFD4697D9EC37
        let packed = [0xE8, 0x32, 0x9B, 0xFD, 0x46, 0x97, 0xD9, 0xEC, 0x37];
        let septets = unpack_septets(&packed, 10);
        assert_eq!(decode_to_string(&septets), "hellohello");
    }

    #[test]
    fn pack_matches_known_vector() {
        let septets = encode("hellohello").unwrap();
        assert_eq!(
            pack_septets(&septets),
            vec![0xE8, 0x32, 0x9B, 0xFD, 0x46, 0x97, 0xD9, 0xEC, 0x37]
        );
    }

    #[test]
    fn extension_table_and_national_characters() {
        let septets = encode("€[x]ÄÖ@").unwrap();
        assert_eq!(septets[0], ESCAPE);
        assert_eq!(decode_to_string(&septets), "€[x]ÄÖ@");
    }

    #[test]
    fn unknown_escape_falls_back_to_default_character() {
        assert_eq!(decode_to_string(&[ESCAPE, 0x41]), "A");
        assert_eq!(decode_to_string(&[0x41, ESCAPE]), "A");
    }

    #[test]
    fn characters_outside_alphabet_are_not_encodable() {
        assert!(encode("日本").is_none());
        assert!(encode("plain text").is_some());
    }
}
