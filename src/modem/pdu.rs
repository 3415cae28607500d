//! SMS PDU codec
//!
//! Encodes SMS-SUBMIT PDUs for `AT+CMGS` and decodes the SMS-DELIVER and
//! stored SMS-SUBMIT PDUs returned by `AT+CMGL` (3GPP TS 23.040). Text is
//! carried either in the GSM 03.38 default alphabet packed into septets or
//! as UCS-2.

use super::Smsc;
use thiserror::Error;

/// Single-part capacity and per-part capacity once a concatenation header is added
const GSM7_SINGLE_SEPTETS: usize = 160;
const GSM7_PART_SEPTETS: usize = 153;
const UCS2_SINGLE_UNITS: usize = 70;
const UCS2_PART_UNITS: usize = 67;

const ESCAPE: u8 = 0x1B;
const IEI_CONCAT_8BIT: u8 = 0x00;
const IEI_CONCAT_16BIT: u8 = 0x08;

/// Relative validity period of one day
const VALIDITY_ONE_DAY: u8 = 0xA7;

/// GSM 03.38 default alphabet; index is the septet value. 0x1B is the escape
/// to the extension table and never maps to a character.
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', //
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É', //
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§', //
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à', //
];

/// Extension table entries reached through the escape septet
const GSM7_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0C}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// PDU encoding and decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    #[error("invalid phone number: {0:?}")]
    InvalidNumber(String),
    #[error("message needs {0} parts, at most 255 are allowed")]
    TooManyParts(usize),
    #[error("invalid hex in PDU")]
    InvalidHex,
    #[error("PDU truncated")]
    Truncated,
    #[error("unsupported PDU type {0:#04x}")]
    UnsupportedType(u8),
}

/// Whether the text needs UCS-2 rather than the 7-bit alphabet
///
/// Anything outside ASCII switches the message to UCS-2.
pub fn needs_unicode(text: &str) -> bool {
    !text.is_ascii()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCoding {
    Gsm7,
    Ucs2,
}

impl DataCoding {
    fn dcs(&self) -> u8 {
        match self {
            DataCoding::Gsm7 => 0x00,
            DataCoding::Ucs2 => 0x08,
        }
    }
}

/// Position of one part within a concatenated message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatInfo {
    pub reference: u16,
    pub total: u8,
    pub sequence: u8,
}

/// An outgoing text message before it is split into PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSms {
    pub number: String,
    pub text: String,
    pub coding: DataCoding,
}

impl OutgoingSms {
    pub fn new(number: impl Into<String>, text: impl Into<String>, unicode: bool) -> Self {
        Self {
            number: number.into(),
            text: text.into(),
            coding: if unicode {
                DataCoding::Ucs2
            } else {
                DataCoding::Gsm7
            },
        }
    }

    /// Split into SMS-SUBMIT parts; `reference` tags every part of a
    /// concatenated message and is ignored for single-part messages
    pub fn encode(&self, smsc: &Smsc, reference: u8) -> Result<Vec<SmsSubmit>, PduError> {
        let destination = normalize_number(&self.number)?;
        let smsc = match smsc {
            Smsc::Number(number) => Smsc::Number(normalize_number(number)?),
            Smsc::Location(location) => Smsc::Location(*location),
        };
        let chunks = match self.coding {
            DataCoding::Gsm7 => split_septets(&gsm7_encode(&self.text)),
            DataCoding::Ucs2 => split_ucs2(&self.text),
        };

        if chunks.len() > 255 {
            return Err(PduError::TooManyParts(chunks.len()));
        }

        let total = chunks.len() as u8;
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, body)| SmsSubmit {
                smsc: smsc.clone(),
                destination: destination.clone(),
                coding: self.coding,
                concat: (total > 1).then_some(ConcatInfo {
                    reference: reference as u16,
                    total,
                    sequence: index as u8 + 1,
                }),
                body,
            })
            .collect())
    }
}

/// One SMS-SUBMIT ready to hand to the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsSubmit {
    pub smsc: Smsc,
    pub destination: String,
    pub coding: DataCoding,
    pub concat: Option<ConcatInfo>,
    /// Septets for GSM 7-bit, big-endian code units for UCS-2
    body: Vec<u8>,
}

/// Hex PDU plus the TPDU length `AT+CMGS` expects (SMSC field excluded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPdu {
    pub hex: String,
    pub tpdu_length: usize,
}

impl SmsSubmit {
    /// Text carried by this part
    pub fn text(&self) -> String {
        match self.coding {
            DataCoding::Gsm7 => gsm7_decode(&self.body),
            DataCoding::Ucs2 => ucs2_decode(&self.body),
        }
    }

    pub fn to_pdu(&self) -> EncodedPdu {
        let smsc = match &self.smsc {
            Smsc::Number(number) => {
                let digits = encode_semi_octets(number.trim_start_matches('+'));
                let mut field = vec![digits.len() as u8 + 1, type_of_address(number)];
                field.extend(digits);
                field
            }
            Smsc::Location(_) => vec![0x00],
        };

        let mut tpdu = Vec::with_capacity(32 + self.body.len());
        let mut first_octet = 0x01 | 0x10; // SMS-SUBMIT, relative validity period
        if self.concat.is_some() {
            first_octet |= 0x40;
        }
        tpdu.push(first_octet);
        tpdu.push(0x00); // message reference assigned by the modem

        let digits = self.destination.trim_start_matches('+');
        tpdu.push(digits.len() as u8);
        tpdu.push(type_of_address(&self.destination));
        tpdu.extend(encode_semi_octets(digits));

        tpdu.push(0x00); // protocol identifier
        tpdu.push(self.coding.dcs());
        tpdu.push(VALIDITY_ONE_DAY);

        let header = self.concat.map(|concat| {
            vec![
                0x05,
                IEI_CONCAT_8BIT,
                0x03,
                concat.reference as u8,
                concat.total,
                concat.sequence,
            ]
        });

        match self.coding {
            DataCoding::Gsm7 => {
                let header_len = header.as_ref().map_or(0, Vec::len);
                let fill_bits = (7 - (header_len * 8) % 7) % 7;
                let header_septets = (header_len * 8 + fill_bits) / 7;
                tpdu.push((header_septets + self.body.len()) as u8);
                if let Some(header) = header {
                    tpdu.extend(header);
                }
                tpdu.extend(pack_septets(&self.body, fill_bits));
            }
            DataCoding::Ucs2 => {
                let header_len = header.as_ref().map_or(0, Vec::len);
                tpdu.push((header_len + self.body.len()) as u8);
                if let Some(header) = header {
                    tpdu.extend(header);
                }
                tpdu.extend_from_slice(&self.body);
            }
        }

        let tpdu_length = tpdu.len();
        let mut pdu = smsc;
        pdu.extend(tpdu);

        EncodedPdu {
            hex: to_hex(&pdu),
            tpdu_length,
        }
    }
}

/// A message decoded from a stored PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPdu {
    /// Originator for received messages, destination for stored outgoing ones
    pub number: String,
    pub smsc: Option<String>,
    pub text: String,
    /// Service center timestamp, received messages only
    pub timestamp: Option<String>,
    pub concat: Option<ConcatInfo>,
}

/// Decode an SMS-DELIVER or stored SMS-SUBMIT PDU
pub fn decode_stored(hex: &str) -> Result<StoredPdu, PduError> {
    let bytes = from_hex(hex.trim())?;
    let mut reader = Reader::new(&bytes);

    let smsc_len = reader.byte()? as usize;
    let smsc = if smsc_len > 1 {
        let toa = reader.byte()?;
        let digits = decode_semi_octets(reader.take(smsc_len - 1)?);
        Some(with_international_prefix(toa, digits))
    } else {
        reader.take(smsc_len)?;
        None
    };

    let first_octet = reader.byte()?;
    let udhi = first_octet & 0x40 != 0;
    let is_deliver = match first_octet & 0x03 {
        0x00 => true,
        0x01 => false,
        other => return Err(PduError::UnsupportedType(other)),
    };

    if !is_deliver {
        reader.byte()?; // message reference
    }
    let number = read_address(&mut reader)?;
    reader.byte()?; // protocol identifier
    let dcs = reader.byte()?;

    let timestamp = if is_deliver {
        Some(decode_timestamp(reader.take(7)?))
    } else {
        match (first_octet >> 3) & 0x03 {
            0x00 => {}
            0x02 => {
                reader.byte()?;
            }
            _ => {
                reader.take(7)?;
            }
        }
        None
    };

    let udl = reader.byte()? as usize;
    let user_data = reader.rest();
    let (text, concat) = decode_user_data(dcs, udhi, udl, user_data)?;

    Ok(StoredPdu {
        number,
        smsc,
        text,
        timestamp,
        concat,
    })
}

fn decode_user_data(
    dcs: u8,
    udhi: bool,
    udl: usize,
    data: &[u8],
) -> Result<(String, Option<ConcatInfo>), PduError> {
    let (header_len, concat) = if udhi {
        let udhl = *data.first().ok_or(PduError::Truncated)? as usize;
        let header = data.get(1..1 + udhl).ok_or(PduError::Truncated)?;
        (udhl + 1, parse_concat_header(header))
    } else {
        (0, None)
    };

    let text = match alphabet(dcs) {
        Alphabet::Gsm7 => {
            let available = data.len() * 8 / 7;
            let septets = unpack_septets(data, 0, udl.min(available));
            let skip = (header_len * 8 + 6) / 7;
            gsm7_decode(septets.get(skip..).unwrap_or_default())
        }
        Alphabet::Ucs2 => {
            let end = udl.min(data.len());
            ucs2_decode(data.get(header_len..end).unwrap_or_default())
        }
        Alphabet::EightBit => {
            let end = udl.min(data.len());
            data.get(header_len..end)
                .unwrap_or_default()
                .iter()
                .map(|&b| b as char)
                .collect()
        }
    };

    Ok((text, concat))
}

fn parse_concat_header(mut header: &[u8]) -> Option<ConcatInfo> {
    while header.len() >= 2 {
        let iei = header[0];
        let len = header[1] as usize;
        let value = header.get(2..2 + len)?;
        match (iei, value) {
            (IEI_CONCAT_8BIT, [reference, total, sequence]) => {
                return Some(ConcatInfo {
                    reference: *reference as u16,
                    total: *total,
                    sequence: *sequence,
                })
            }
            (IEI_CONCAT_16BIT, [high, low, total, sequence]) => {
                return Some(ConcatInfo {
                    reference: u16::from_be_bytes([*high, *low]),
                    total: *total,
                    sequence: *sequence,
                })
            }
            _ => header = &header[2 + len..],
        }
    }
    None
}

enum Alphabet {
    Gsm7,
    EightBit,
    Ucs2,
}

fn alphabet(dcs: u8) -> Alphabet {
    match dcs & 0xF0 {
        0x00..=0x30 => match (dcs >> 2) & 0x03 {
            0x01 => Alphabet::EightBit,
            0x02 => Alphabet::Ucs2,
            _ => Alphabet::Gsm7,
        },
        0xE0 => Alphabet::Ucs2,
        0xF0 if dcs & 0x04 != 0 => Alphabet::EightBit,
        _ => Alphabet::Gsm7,
    }
}

fn read_address(reader: &mut Reader<'_>) -> Result<String, PduError> {
    let digit_count = reader.byte()? as usize;
    let toa = reader.byte()?;
    let octets = reader.take(digit_count.div_ceil(2))?;

    if toa & 0x70 == 0x50 {
        let septets = unpack_septets(octets, 0, digit_count * 4 / 7);
        return Ok(gsm7_decode(&septets));
    }

    let mut digits = decode_semi_octets(octets);
    digits.truncate(digit_count);
    Ok(with_international_prefix(toa, digits))
}

fn with_international_prefix(toa: u8, digits: String) -> String {
    if toa & 0x70 == 0x10 {
        format!("+{digits}")
    } else {
        digits
    }
}

/// `YY-MM-DD HH:MM:SS` from the service center timestamp, zone dropped
fn decode_timestamp(octets: &[u8]) -> String {
    let field = |i: usize| {
        let octet = octets[i];
        (octet & 0x0F) * 10 + (octet >> 4)
    };
    format!(
        "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
        field(0),
        field(1),
        field(2),
        field(3),
        field(4),
        field(5)
    )
}

/// Keep a leading `+` and the digits; spaces, dashes and brackets are dropped
fn normalize_number(number: &str) -> Result<String, PduError> {
    let trimmed = number.trim();
    let international = trimmed.starts_with('+');
    let mut digits = String::with_capacity(trimmed.len());
    for c in trimmed.trim_start_matches('+').chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' => {}
            _ => return Err(PduError::InvalidNumber(number.to_string())),
        }
    }
    if digits.is_empty() || digits.len() > 20 {
        return Err(PduError::InvalidNumber(number.to_string()));
    }
    Ok(if international {
        format!("+{digits}")
    } else {
        digits
    })
}

fn type_of_address(number: &str) -> u8 {
    if number.starts_with('+') {
        0x91
    } else {
        0x81
    }
}

fn encode_semi_octets(digits: &str) -> Vec<u8> {
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let low = pair[0] - b'0';
            let high = pair.get(1).map_or(0x0F, |d| d - b'0');
            (high << 4) | low
        })
        .collect()
}

fn decode_semi_octets(octets: &[u8]) -> String {
    let mut digits = String::with_capacity(octets.len() * 2);
    for octet in octets {
        for nibble in [octet & 0x0F, octet >> 4] {
            match nibble {
                0..=9 => digits.push((b'0' + nibble) as char),
                0x0A => digits.push('*'),
                0x0B => digits.push('#'),
                _ => {}
            }
        }
    }
    digits
}

/// Map text to GSM 03.38 septets; unmappable characters become `?`
fn gsm7_encode(text: &str) -> Vec<u8> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        if let Some(index) = GSM7_BASIC
            .iter()
            .position(|&entry| entry == c && c != '\u{1B}')
        {
            septets.push(index as u8);
        } else if let Some((code, _)) = GSM7_EXTENSION.iter().find(|(_, entry)| *entry == c) {
            septets.push(ESCAPE);
            septets.push(*code);
        } else {
            septets.push(b'?');
        }
    }
    septets
}

fn gsm7_decode(septets: &[u8]) -> String {
    let mut text = String::with_capacity(septets.len());
    let mut iter = septets.iter();
    while let Some(&septet) = iter.next() {
        if septet == ESCAPE {
            if let Some(&code) = iter.next() {
                match GSM7_EXTENSION.iter().find(|(entry, _)| *entry == code) {
                    Some((_, c)) => text.push(*c),
                    None => text.push(GSM7_BASIC[(code & 0x7F) as usize]),
                }
            }
        } else {
            text.push(GSM7_BASIC[(septet & 0x7F) as usize]);
        }
    }
    text
}

fn pack_septets(septets: &[u8], fill_bits: usize) -> Vec<u8> {
    let total_bits = fill_bits + septets.len() * 7;
    let mut packed = vec![0u8; total_bits.div_ceil(8)];
    for (i, septet) in septets.iter().enumerate() {
        let bit = fill_bits + i * 7;
        let shifted = ((*septet & 0x7F) as u16) << (bit % 8);
        packed[bit / 8] |= shifted as u8;
        if shifted > 0xFF {
            packed[bit / 8 + 1] |= (shifted >> 8) as u8;
        }
    }
    packed
}

fn unpack_septets(data: &[u8], fill_bits: usize, count: usize) -> Vec<u8> {
    (0..count)
        .map(|i| {
            let bit = fill_bits + i * 7;
            let low = data.get(bit / 8).copied().unwrap_or(0) as u16;
            let high = data.get(bit / 8 + 1).copied().unwrap_or(0) as u16;
            (((high << 8 | low) >> (bit % 8)) & 0x7F) as u8
        })
        .collect()
}

fn ucs2_decode(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Split septets into parts without separating an escape from its code
fn split_septets(septets: &[u8]) -> Vec<Vec<u8>> {
    if septets.len() <= GSM7_SINGLE_SEPTETS {
        return vec![septets.to_vec()];
    }
    let mut parts = Vec::new();
    let mut start = 0;
    while start < septets.len() {
        let mut end = (start + GSM7_PART_SEPTETS).min(septets.len());
        if end < septets.len() && septets[end - 1] == ESCAPE {
            end -= 1;
        }
        parts.push(septets[start..end].to_vec());
        start = end;
    }
    parts
}

/// Split text into UCS-2 parts without separating a surrogate pair
fn split_ucs2(text: &str) -> Vec<Vec<u8>> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let to_bytes = |units: &[u16]| units.iter().flat_map(|u| u.to_be_bytes()).collect();

    if units.len() <= UCS2_SINGLE_UNITS {
        return vec![to_bytes(&units)];
    }
    let mut parts = Vec::new();
    let mut start = 0;
    while start < units.len() {
        let mut end = (start + UCS2_PART_UNITS).min(units.len());
        if end < units.len() && (0xD800..0xDC00).contains(&units[end - 1]) {
            end -= 1;
        }
        parts.push(to_bytes(&units[start..end]));
        start = end;
    }
    parts
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn from_hex(hex: &str) -> Result<Vec<u8>, PduError> {
    if hex.len() % 2 != 0 {
        return Err(PduError::InvalidHex);
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(PduError::InvalidHex)
        })
        .collect()
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn byte(&mut self) -> Result<u8, PduError> {
        let byte = *self.bytes.get(self.position).ok_or(PduError::Truncated)?;
        self.position += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PduError> {
        let slice = self
            .bytes
            .get(self.position..self.position + len)
            .ok_or(PduError::Truncated)?;
        self.position += len;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.bytes.get(self.position..).unwrap_or_default();
        self.position = self.bytes.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_needs_unicode() {
        assert!(!needs_unicode("hello"));
        assert!(needs_unicode("héllo"));
        assert!(!needs_unicode(""));
        assert!(needs_unicode("Příliš žluťoučký kůň"));
    }

    #[test]
    fn test_pack_hellohello() {
        let septets = gsm7_encode("hellohello");
        assert_eq!(to_hex(&pack_septets(&septets, 0)), "E8329BFD4697D9EC37");
    }

    #[test]
    fn test_decode_deliver_pdu() {
        let stored = decode_stored(
            "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37",
        )
        .unwrap();

        assert_eq!(stored.smsc.as_deref(), Some("+27381000015"));
        assert_eq!(stored.number, "27838890001");
        assert_eq!(stored.text, "hellohello");
        assert_eq!(stored.timestamp.as_deref(), Some("2099-03-29 15:16:59"));
        assert_eq!(stored.concat, None);
    }

    #[test]
    fn test_encode_single_part_with_sim_smsc() {
        let sms = OutgoingSms::new("+420123456789", "hellohello", false);
        let parts = sms.encode(&Smsc::Location(1), 7).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].concat, None);

        let pdu = parts[0].to_pdu();
        assert!(pdu.hex.starts_with("0011000C912410325476980000A70A"));
        assert!(pdu.hex.ends_with("E8329BFD4697D9EC37"));
        assert_eq!(pdu.tpdu_length, pdu.hex.len() / 2 - 1);
    }

    #[test]
    fn test_encode_with_explicit_smsc() {
        let sms = OutgoingSms::new("123", "a", false);
        let parts = sms.encode(&Smsc::Number("+420603052000".into()), 0).unwrap();
        let pdu = parts[0].to_pdu();
        assert!(pdu.hex.starts_with("0791246030500200"));
        assert_eq!(pdu.tpdu_length, pdu.hex.len() / 2 - 8);
    }

    #[test]
    fn test_extension_characters_use_escape() {
        let septets = gsm7_encode("€[x]");
        assert_eq!(septets, vec![0x1B, 0x65, 0x1B, 0x3C, b'x', 0x1B, 0x3E]);
        assert_eq!(gsm7_decode(&septets), "€[x]");
    }

    #[test]
    fn test_unmappable_character_becomes_question_mark() {
        assert_eq!(gsm7_decode(&gsm7_encode("a`b")), "a?b");
    }

    #[test]
    fn test_long_gsm_message_splits_at_153() {
        let text = "x".repeat(161);
        let parts = OutgoingSms::new("123", &text, false)
            .encode(&Smsc::Location(1), 42)
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text().len(), 153);
        assert_eq!(parts[1].text().len(), 8);
        assert_eq!(
            parts[1].concat,
            Some(ConcatInfo {
                reference: 42,
                total: 2,
                sequence: 2
            })
        );
    }

    #[test]
    fn test_exact_single_part_limits() {
        let gsm = OutgoingSms::new("123", "x".repeat(160), false)
            .encode(&Smsc::Location(1), 0)
            .unwrap();
        assert_eq!(gsm.len(), 1);

        let ucs2 = OutgoingSms::new("123", "ž".repeat(70), true)
            .encode(&Smsc::Location(1), 0)
            .unwrap();
        assert_eq!(ucs2.len(), 1);

        let ucs2_long = OutgoingSms::new("123", "ž".repeat(71), true)
            .encode(&Smsc::Location(1), 0)
            .unwrap();
        assert_eq!(ucs2_long.len(), 2);
        assert_eq!(ucs2_long[0].text().chars().count(), 67);
    }

    #[test]
    fn test_split_keeps_escape_pairs_together() {
        let text = format!("{}€", "x".repeat(152));
        let text = format!("{text}{}", "y".repeat(10));
        let parts = OutgoingSms::new("123", &text, false)
            .encode(&Smsc::Location(1), 0)
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text(), "x".repeat(152));
        assert!(parts[1].text().starts_with('€'));
    }

    #[test]
    fn test_concatenated_submit_round_trips_through_decoder() {
        // 164 septets is past the single-message limit
        let text = format!("{}tail", "z".repeat(160));
        let parts = OutgoingSms::new("+420777000111", &text, false)
            .encode(&Smsc::Location(1), 9)
            .unwrap();

        let decoded: Vec<StoredPdu> = parts
            .iter()
            .map(|part| decode_stored(&part.to_pdu().hex).unwrap())
            .collect();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].number, "+420777000111");
        assert_eq!(decoded[0].text, "z".repeat(153));
        assert_eq!(decoded[0].concat.map(|c| (c.reference, c.total)), Some((9, 2)));
        assert_eq!(decoded[1].text, format!("{}tail", "z".repeat(7)));
        assert_eq!(decoded[1].concat.map(|c| c.sequence), Some(2));
        assert_eq!(decoded[1].timestamp, None);
    }

    #[test]
    fn test_ucs2_message_decodes() {
        let parts = OutgoingSms::new("123", "Dobrý den", true)
            .encode(&Smsc::Location(1), 0)
            .unwrap();
        let decoded = decode_stored(&parts[0].to_pdu().hex).unwrap();
        assert_eq!(decoded.text, "Dobrý den");
    }

    #[test]
    fn test_alphanumeric_originator() {
        // eight septets pack into seven octets, announced as 14 semi-octets
        let mut bytes = vec![0x00, 0x04, 14, 0xD0];
        bytes.extend(pack_septets(&gsm7_encode("Vodafone"), 0));
        bytes.extend([0x00, 0x00]);
        bytes.extend(from_hex("99309251619580").unwrap());
        bytes.push(5);
        bytes.extend(pack_septets(&gsm7_encode("hello"), 0));

        let decoded = decode_stored(&to_hex(&bytes)).unwrap();
        assert_eq!(decoded.number, "Vodafone");
        assert_eq!(decoded.text, "hello");
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result = OutgoingSms::new("call me", "hi", false).encode(&Smsc::Location(1), 0);
        assert!(matches!(result, Err(PduError::InvalidNumber(_))));
    }

    #[test]
    fn test_number_formatting_is_stripped() {
        let parts = OutgoingSms::new("+420 (123) 456-789", "hi", false)
            .encode(&Smsc::Location(1), 0)
            .unwrap();
        assert_eq!(parts[0].destination, "+420123456789");
    }

    #[test]
    fn test_truncated_pdu() {
        assert_eq!(decode_stored("0791"), Err(PduError::Truncated));
        assert_eq!(decode_stored("0G"), Err(PduError::InvalidHex));
    }

    proptest! {
        #[test]
        fn test_septet_packing_is_reversible(
            septets in prop::collection::vec(0u8..128, 0..200),
            fill_bits in 0usize..7,
        ) {
            let packed = pack_septets(&septets, fill_bits);
            prop_assert_eq!(unpack_septets(&packed, fill_bits, septets.len()), septets);
        }

        #[test]
        fn test_gsm_parts_never_exceed_capacity(text in "[ -~]{0,600}") {
            let parts = OutgoingSms::new("123", &text, false)
                .encode(&Smsc::Location(1), 1)
                .unwrap();
            let rejoined: String = parts.iter().map(SmsSubmit::text).collect();
            prop_assert_eq!(rejoined, gsm7_decode(&gsm7_encode(&text)));
            for part in &parts {
                let limit = if parts.len() == 1 { 160 } else { 153 };
                prop_assert!(part.body.len() <= limit);
            }
        }
    }
}
