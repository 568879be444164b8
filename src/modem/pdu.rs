//! SMS transfer-layer PDUs (3GPP TS 23.040) as exchanged with a modem in PDU mode.
//!
//! Inbound messages arrive as SMS-DELIVER, outbound copies leave as one or
//! more SMS-SUBMIT. Both are carried as uppercase hex on the AT link with the
//! service-centre address in front; we always send `00` (use the SIM default).

use chrono::{DateTime, FixedOffset, NaiveDate};
use thiserror::Error;

use super::gsm7;
use crate::transport::RawContent;

/// Relative validity period: 4 days.
const VALIDITY_4_DAYS: u8 = 0xAA;
const DCS_GSM7: u8 = 0x00;
const DCS_UCS2: u8 = 0x08;

const GSM7_SINGLE: usize = 160;
const GSM7_PART: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_PART: usize = 67;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("invalid hex in PDU")]
    InvalidHex,
    #[error("PDU truncated while reading {0}")]
    Truncated(&'static str),
    #[error("unsupported message type indicator {0}")]
    UnsupportedType(u8),
    #[error("compressed user data is not supported")]
    Compressed,
    #[error("invalid destination address {0:?}")]
    InvalidAddress(String),
    #[error("message needs {0} parts (max 255)")]
    TooLong(usize),
}

/// Concatenation information from a user data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatInfo {
    pub reference: u16,
    pub total: u8,
    pub sequence: u8,
}

/// A decoded SMS-DELIVER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverPdu {
    pub sender: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub dcs: u8,
    pub content: RawContent,
    pub concat: Option<ConcatInfo>,
}

/// One SMS-SUBMIT ready for `AT+CMGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    /// Hex including the leading `00` service-centre octet.
    pub hex: String,
    /// TPDU length in octets, excluding the service-centre part.
    pub tpdu_len: usize,
}

pub fn decode_hex(hex: &str) -> Result<Vec<u8>, PduError> {
    let hex = hex.trim();
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

pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, PduError> {
        let b = *self.data.get(self.pos).ok_or(PduError::Truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], PduError> {
        let end = self.pos + n;
        let slice = self.data.get(self.pos..end).ok_or(PduError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Gsm7,
    Eight,
    Ucs2,
}

impl Alphabet {
    fn from_dcs(dcs: u8) -> Result<Self, PduError> {
        match dcs >> 4 {
            0x0..=0x7 => {
                if dcs & 0x20 != 0 {
                    return Err(PduError::Compressed);
                }
                Ok(match (dcs >> 2) & 0x03 {
                    1 => Alphabet::Eight,
                    2 => Alphabet::Ucs2,
                    _ => Alphabet::Gsm7,
                })
            }
            0xC | 0xD => Ok(Alphabet::Gsm7),
            0xE => Ok(Alphabet::Ucs2),
            0xF if dcs & 0x04 != 0 => Ok(Alphabet::Eight),
            0xF => Ok(Alphabet::Gsm7),
            _ => Ok(Alphabet::Eight),
        }
    }
}

fn semi_octet_char(nibble: u8) -> Option<char> {
    match nibble {
        0..=9 => Some((b'0' + nibble) as char),
        0xA => Some('*'),
        0xB => Some('#'),
        0xC => Some('a'),
        0xD => Some('b'),
        0xE => Some('c'),
        _ => None,
    }
}

fn decode_address(semi_octets: usize, toa: u8, octets: &[u8]) -> String {
    if toa & 0x70 == 0x50 {
        let septets = gsm7::unpack_septets(octets, semi_octets * 4 / 7);
        return gsm7::decode_to_string(&septets);
    }
    let mut out = String::with_capacity(semi_octets + 1);
    if toa & 0x70 == 0x10 {
        out.push('+');
    }
    let nibbles = octets.iter().flat_map(|b| [b & 0x0F, b >> 4]).take(semi_octets);
    for n in nibbles {
        match semi_octet_char(n) {
            Some(c) => out.push(c),
            None => break,
        }
    }
    out
}

fn swapped_bcd(b: u8) -> u32 {
    ((b & 0x0F) as u32) * 10 + (b >> 4) as u32
}

fn decode_timestamp(scts: &[u8]) -> Option<DateTime<FixedOffset>> {
    let [yy, mo, dd, hh, mi, ss, tz] = <[u8; 7]>::try_from(scts).ok()?;
    let quarters = ((tz & 0x07) as i32) * 10 + (tz >> 4) as i32;
    let seconds = quarters * 15 * 60;
    let offset = if tz & 0x08 != 0 {
        FixedOffset::west_opt(seconds)?
    } else {
        FixedOffset::east_opt(seconds)?
    };
    NaiveDate::from_ymd_opt(2000 + swapped_bcd(yy) as i32, swapped_bcd(mo), swapped_bcd(dd))?
        .and_hms_opt(swapped_bcd(hh), swapped_bcd(mi), swapped_bcd(ss))?
        .and_local_timezone(offset)
        .single()
}

fn parse_concat(header: &[u8]) -> Option<ConcatInfo> {
    let mut i = 0;
    while i + 1 < header.len() {
        let iei = header[i];
        let len = header[i + 1] as usize;
        let data = header.get(i + 2..i + 2 + len)?;
        match (iei, data) {
            (0x00, [r, total, seq]) => {
                return Some(ConcatInfo {
                    reference: *r as u16,
                    total: *total,
                    sequence: *seq,
                })
            }
            (0x08, [hi, lo, total, seq]) => {
                return Some(ConcatInfo {
                    reference: u16::from_be_bytes([*hi, *lo]),
                    total: *total,
                    sequence: *seq,
                })
            }
            _ => {}
        }
        i += 2 + len;
    }
    None
}

/// Decode an SMS-DELIVER as listed by `AT+CMGL` in PDU mode.
pub fn decode_deliver(hex: &str) -> Result<DeliverPdu, PduError> {
    let bytes = decode_hex(hex)?;
    let mut r = Reader::new(&bytes);

    let smsc_len = r.u8("service centre length")? as usize;
    r.take(smsc_len, "service centre address")?;

    let first = r.u8("first octet")?;
    if first & 0x03 != 0 {
        return Err(PduError::UnsupportedType(first & 0x03));
    }
    let udhi = first & 0x40 != 0;

    let oa_len = r.u8("originating address length")? as usize;
    let toa = r.u8("type of address")?;
    let oa = r.take(oa_len.div_ceil(2), "originating address")?;
    let sender = decode_address(oa_len, toa, oa);

    let _pid = r.u8("protocol identifier")?;
    let dcs = r.u8("data coding scheme")?;
    let timestamp = decode_timestamp(r.take(7, "timestamp")?);
    let udl = r.u8("user data length")? as usize;
    let ud = r.rest();

    let (units, concat) = match Alphabet::from_dcs(dcs)? {
        Alphabet::Gsm7 => {
            if ud.len() < (udl * 7).div_ceil(8) {
                return Err(PduError::Truncated("user data"));
            }
            let septets = gsm7::unpack_septets(ud, udl);
            let (skip, concat) = if udhi {
                let udhl = *ud.first().ok_or(PduError::Truncated("user data header"))? as usize;
                let header = ud.get(1..1 + udhl).ok_or(PduError::Truncated("user data header"))?;
                (((udhl + 1) * 8).div_ceil(7), parse_concat(header))
            } else {
                (0, None)
            };
            let body = septets.get(skip..).ok_or(PduError::Truncated("user data"))?;
            (gsm7::decode(body), concat)
        }
        alphabet => {
            let payload = ud.get(..udl).ok_or(PduError::Truncated("user data"))?;
            let (body, concat) = if udhi {
                let udhl = *payload.first().ok_or(PduError::Truncated("user data header"))? as usize;
                let header = payload
                    .get(1..1 + udhl)
                    .ok_or(PduError::Truncated("user data header"))?;
                (&payload[1 + udhl..], parse_concat(header))
            } else {
                (payload, None)
            };
            let units = if alphabet == Alphabet::Ucs2 {
                body.chunks_exact(2)
                    .map(|p| u16::from_be_bytes([p[0], p[1]]))
                    .collect()
            } else {
                body.iter().map(|&b| b as u16).collect()
            };
            (units, concat)
        }
    };

    Ok(DeliverPdu {
        sender,
        timestamp,
        dcs,
        content: RawContent::from_units(units),
        concat,
    })
}

fn encode_address(destination: &str) -> Result<(u8, u8, Vec<u8>), PduError> {
    let (toa, digits) = match destination.strip_prefix('+') {
        Some(rest) => (0x91, rest),
        None => (0x81, destination),
    };
    if digits.is_empty() || digits.len() > 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PduError::InvalidAddress(destination.to_string()));
    }
    let octets = digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let lo = pair[0] - b'0';
            let hi = pair.get(1).map(|d| d - b'0').unwrap_or(0x0F);
            (hi << 4) | lo
        })
        .collect();
    Ok((digits.len() as u8, toa, octets))
}

/// Pack 7-bit text behind a user data header, inserting fill bits so the text
/// starts on a septet boundary. Returns the user data and its length in septets.
pub(crate) fn pack_with_header(udh: &[u8], septets: &[u8]) -> (Vec<u8>, usize) {
    let header_septets = (udh.len() * 8).div_ceil(7);
    let mut stream = vec![0u8; header_septets];
    stream.extend_from_slice(septets);
    let mut packed = gsm7::pack_septets(&stream);
    packed[..udh.len()].copy_from_slice(udh);
    (packed, stream.len())
}

enum Payload {
    Gsm7(Vec<u8>),
    Ucs2(Vec<u16>),
}

impl Payload {
    /// 7-bit when the content is valid text made only of GSM characters,
    /// UCS-2 otherwise. Both decode back to the same code units.
    fn choose(content: &RawContent) -> Self {
        String::from_utf16(content.units())
            .ok()
            .and_then(|s| gsm7::encode(&s))
            .map(Payload::Gsm7)
            .unwrap_or_else(|| Payload::Ucs2(content.units().to_vec()))
    }

    fn split(&self) -> Vec<Payload> {
        match self {
            Payload::Gsm7(s) if s.len() <= GSM7_SINGLE => vec![Payload::Gsm7(s.clone())],
            Payload::Ucs2(u) if u.len() <= UCS2_SINGLE => vec![Payload::Ucs2(u.clone())],
            // an escape and its code stay in one part
            Payload::Gsm7(s) => chunk(s, GSM7_PART, |c| *c == gsm7::ESCAPE)
                .into_iter()
                .map(|c| Payload::Gsm7(c.to_vec()))
                .collect(),
            // a surrogate pair stays in one part
            Payload::Ucs2(u) => chunk(u, UCS2_PART, |c| (0xD800..=0xDBFF).contains(c))
                .into_iter()
                .map(|c| Payload::Ucs2(c.to_vec()))
                .collect(),
        }
    }
}

fn chunk<T>(items: &[T], size: usize, opens_pair: impl Fn(&T) -> bool) -> Vec<&[T]> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let mut end = (start + size).min(items.len());
        if end < items.len() && end - start > 1 && opens_pair(&items[end - 1]) {
            end -= 1;
        }
        parts.push(&items[start..end]);
        start = end;
    }
    parts
}

/// Encode `content` for `destination` as one SMS-SUBMIT, or several
/// concatenated ones sharing `reference` when it does not fit a single message.
pub fn encode_submit(
    destination: &str,
    content: &RawContent,
    reference: u8,
) -> Result<Vec<SubmitPdu>, PduError> {
    let (da_len, toa, da) = encode_address(destination)?;
    let parts = Payload::choose(content).split();
    if parts.len() > 255 {
        return Err(PduError::TooLong(parts.len()));
    }
    let total = parts.len() as u8;
    let concat = total > 1;

    let mut out = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let mut tpdu = Vec::with_capacity(160);
        tpdu.push(0x11 | if concat { 0x40 } else { 0 });
        tpdu.push(0x00); // message reference, assigned by the modem
        tpdu.push(da_len);
        tpdu.push(toa);
        tpdu.extend_from_slice(&da);
        tpdu.push(0x00);
        let udh: Vec<u8> = if concat {
            vec![0x05, 0x00, 0x03, reference, total, i as u8 + 1]
        } else {
            Vec::new()
        };
        match part {
            Payload::Gsm7(septets) => {
                tpdu.push(DCS_GSM7);
                tpdu.push(VALIDITY_4_DAYS);
                let (ud, udl) = if concat {
                    pack_with_header(&udh, septets)
                } else {
                    (gsm7::pack_septets(septets), septets.len())
                };
                tpdu.push(udl as u8);
                tpdu.extend_from_slice(&ud);
            }
            Payload::Ucs2(units) => {
                tpdu.push(DCS_UCS2);
                tpdu.push(VALIDITY_4_DAYS);
                let mut ud = udh;
                ud.extend(units.iter().flat_map(|u| u.to_be_bytes()));
                tpdu.push(ud.len() as u8);
                tpdu.extend_from_slice(&ud);
            }
        }
        out.push(SubmitPdu {
            hex: format!("00{}", encode_hex(&tpdu)),
            tpdu_len: tpdu.len(),
        });
    }
    Ok(out)
}
