use core::fmt;

/// Padded 11-byte 8.3 name exactly as stored in a directory slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName([u8; 11]);

impl ShortName {
    pub const fn from_raw(raw: [u8; 11]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    pub fn base(&self) -> &[u8] {
        trim_padding(&self.0[..8])
    }

    pub fn ext(&self) -> &[u8] {
        trim_padding(&self.0[8..])
    }

    /// Same base with the 3-byte extension replaced.
    pub fn with_ext(mut self, ext: &[u8; 3]) -> Self {
        self.0[8..].copy_from_slice(ext);
        self
    }

    /// The "." self-reference of a subdirectory.
    pub fn is_dot(&self) -> bool {
        self.0[0] == b'.' && self.0[1] != b'.'
    }

    pub fn is_dotdot(&self) -> bool {
        self.0[0] == b'.' && self.0[1] == b'.'
    }

    /// Writes `BASE.EXT`, or just `BASE` for directories and empty extensions.
    pub fn write_display<const N: usize>(&self, is_dir: bool, out: &mut heapless::String<N>) {
        out.clear();
        for &byte in self.base() {
            if out.push(display_char(byte)).is_err() {
                return;
            }
        }
        if is_dir || self.ext().is_empty() {
            return;
        }
        if out.push('.').is_err() {
            return;
        }
        for &byte in self.ext() {
            if out.push(display_char(byte)).is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName(\"{}\")", self)
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.base() {
            write!(f, "{}", display_char(byte))?;
        }
        if !self.ext().is_empty() {
            f.write_str(".")?;
            for &byte in self.ext() {
                write!(f, "{}", display_char(byte))?;
            }
        }
        Ok(())
    }
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |idx| idx + 1);
    &field[..end]
}

fn display_char(byte: u8) -> char {
    if byte.is_ascii() && !byte.is_ascii_control() {
        byte as char
    } else {
        '?'
    }
}

fn is_short_name_char(byte: u8) -> bool {
    matches!(
        byte,
        b'A'..=b'Z'
            | b'0'..=b'9'
            | b'#'..=b')'
            | b'^'..=b'`'
            | b'!'
            | b'-'
            | b'@'
            | b'{'
            | b'}'
            | b'~'
            | b' '
    )
}

fn normalize_char(byte: u8) -> u8 {
    let upper = byte.to_ascii_uppercase();
    if is_short_name_char(upper) {
        upper
    } else {
        b'X'
    }
}

/// Normalizes the 8-character base of an already padded name in place:
/// lowercase letters are upper-cased and anything outside the 8.3 character
/// set becomes `'X'`. The extension bytes are left untouched.
pub fn sanitize_short_name(name: &mut ShortName) {
    for byte in name.0[..8].iter_mut() {
        *byte = normalize_char(*byte);
    }
}

/// Builds a padded 8.3 name from free-form text such as `report!.a`.
///
/// The text is split at its last dot; the base keeps at most 8 characters
/// and the extension at most 3, both normalized like
/// [`sanitize_short_name`]. Non-ASCII characters count as one `'X'`.
pub fn to_short_name(name: &str) -> ShortName {
    let (base, ext) = match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(dot) => (&name[..dot], &name[dot + 1..]),
    };

    let mut raw = [b' '; 11];
    fill_field(&mut raw[..8], base);
    fill_field(&mut raw[8..], ext);
    if raw[0] == b' ' {
        raw[0] = b'X';
    }
    ShortName(raw)
}

fn fill_field(field: &mut [u8], text: &str) {
    let mut chars = text.chars();
    for slot in field.iter_mut() {
        match chars.next() {
            Some(ch) if ch.is_ascii() => *slot = normalize_char(ch as u8),
            Some(_) => *slot = b'X',
            None => break,
        }
    }
}

/// Advances the collision suffix held in the 8th character: a digit below
/// `'9'` is incremented, `'9'` wraps to `'0'`, anything else becomes `'0'`.
pub fn next_collision_name(name: &mut ShortName) {
    let slot = &mut name.0[7];
    *slot = match *slot {
        b'9' => b'0',
        digit @ b'0'..=b'8' => digit + 1,
        _ => b'0',
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collide(raw: &[u8; 11]) -> [u8; 11] {
        let mut name = ShortName::from_raw(*raw);
        next_collision_name(&mut name);
        *name.as_bytes()
    }

    #[test]
    fn collision_suffix_increments_wraps_and_seeds() {
        assert_eq!(&collide(b"FILE0000CAS"), b"FILE0001CAS");
        assert_eq!(&collide(b"FILE0009CAS"), b"FILE0000CAS");
        assert_eq!(&collide(b"FILE000XCAS"), b"FILE0000CAS");
    }

    #[test]
    fn to_short_name_uppercases_and_keeps_allowed_punctuation() {
        assert_eq!(to_short_name("report!.a").as_bytes(), b"REPORT! A  ");
        assert_eq!(to_short_name("a-b@c~.txt").as_bytes(), b"A-B@C~  TXT");
        assert_eq!(to_short_name("my*file?.t+t").as_bytes(), b"MYXFILEXTXT");
    }

    #[test]
    fn to_short_name_truncates_fields_and_handles_missing_extension() {
        assert_eq!(to_short_name("toolongname.text").as_bytes(), b"TOOLONGNTEX");
        assert_eq!(to_short_name("makefile").as_bytes(), b"MAKEFILE   ");
        assert_eq!(to_short_name(".profile").as_bytes(), b"XPROFILE   ");
        assert_eq!(to_short_name("ßeta.bin").as_bytes(), b"XETA    BIN");
    }

    #[test]
    fn sanitize_touches_only_the_base() {
        let mut name = ShortName::from_raw(*b"report!.a  ");
        sanitize_short_name(&mut name);
        assert_eq!(name.as_bytes(), b"REPORT!Xa  ");
    }

    #[test]
    fn display_trims_padding_and_omits_directory_extension() {
        let mut out = heapless::String::<16>::new();
        let file = ShortName::from_raw(*b"README  TXT");
        file.write_display(false, &mut out);
        assert_eq!(out.as_str(), "README.TXT");

        let dir = ShortName::from_raw(*b"DUMPS   DIR");
        dir.write_display(true, &mut out);
        assert_eq!(out.as_str(), "DUMPS");

        let bare = ShortName::from_raw(*b"NOEXT      ");
        bare.write_display(false, &mut out);
        assert_eq!(out.as_str(), "NOEXT");
        assert_eq!(format!("{}", file), "README.TXT");
    }

    #[test]
    fn extension_swap_keeps_base() {
        let name = to_short_name("tape side a.wav").with_ext(b"CAS");
        assert_eq!(name.as_bytes(), b"TAPE SIDCAS");
    }

    #[test]
    fn dot_entries_are_recognized() {
        assert!(ShortName::from_raw(*b".          ").is_dot());
        assert!(!ShortName::from_raw(*b"..         ").is_dot());
        assert!(ShortName::from_raw(*b"..         ").is_dotdot());
    }
}
