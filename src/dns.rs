//! DNS wire-format handling: question parsing, TTL extraction, and
//! synthetic responses for blocked domains.

use crate::error::{DnsError, Result};

const HEADER_LEN: usize = 12;

/// Label bytes at or above this value are compression pointers.
const POINTER_MASK: u8 = 0xC0;

/// TTL used when a response is too short to carry a header.
const MALFORMED_TTL: u32 = 300;

/// TTL used when a response has no readable answer records.
const NO_ANSWER_TTL: u32 = 3600;

/// TTL stamped on synthetic null (0.0.0.0) answers, in seconds.
const NULL_RESPONSE_TTL: u32 = 600;

/// A parsed DNS question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub id: u16,
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
    pub cache_key: String,
}

impl QueryInfo {
    /// Parse the header and first question of a DNS query.
    ///
    /// The domain is lowercased; the cache key is `<domain>:<qtype>`.
    /// Compression pointers in the name are tolerated (queries normally
    /// do not contain them): the first pointer byte ends the name.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(DnsError::TooShort {
                need: HEADER_LEN,
                have: data.len(),
            });
        }

        let id = u16::from_be_bytes([data[0], data[1]]);

        let mut domain = String::with_capacity(64);
        let mut pos = HEADER_LEN;

        loop {
            let len = match data.get(pos) {
                Some(&b) => b,
                None => return Err(DnsError::MalformedLabel(pos)),
            };

            if len == 0 {
                pos += 1;
                break;
            }

            if len >= POINTER_MASK {
                // Compression pointer: two bytes, and the name ends here.
                if pos + 2 > data.len() {
                    return Err(DnsError::MalformedLabel(pos));
                }
                pos += 2;
                break;
            }

            let start = pos + 1;
            let end = start + len as usize;
            if end > data.len() {
                return Err(DnsError::MalformedLabel(pos));
            }

            let label =
                std::str::from_utf8(&data[start..end]).map_err(|_| DnsError::MalformedLabel(pos))?;
            if !domain.is_empty() {
                domain.push('.');
            }
            domain.push_str(label);
            pos = end;
        }

        if pos + 4 > data.len() {
            return Err(DnsError::TooShort {
                need: pos + 4,
                have: data.len(),
            });
        }

        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        domain.make_ascii_lowercase();
        let cache_key = format!("{}:{}", domain, qtype);

        Ok(Self {
            id,
            domain,
            qtype,
            qclass,
            cache_key,
        })
    }
}

/// Skip a wire-format name starting at `pos`, returning the offset just
/// past it. The first compression pointer ends the name.
fn skip_name(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() {
        let b = data[pos];
        if b == 0 {
            return pos + 1;
        }
        if b >= POINTER_MASK {
            return pos + 2;
        }
        pos += 1 + b as usize;
    }
    pos
}

/// Extract the minimum TTL across all answer records of a response.
///
/// Returns 300 when the buffer cannot hold a header, and 3600 when no
/// answer record can be read.
pub fn extract_ttl(response: &[u8]) -> u32 {
    if response.len() < HEADER_LEN {
        return MALFORMED_TTL;
    }

    let qdcount = u16::from_be_bytes([response[4], response[5]]) as usize;
    let ancount = u16::from_be_bytes([response[6], response[7]]) as usize;

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        pos = skip_name(response, pos);
        pos += 4; // QTYPE + QCLASS
    }

    let mut min_ttl = NO_ANSWER_TTL;

    for _ in 0..ancount {
        if pos >= response.len() {
            break;
        }
        pos = skip_name(response, pos);

        // name | type(2) | class(2) | ttl(4) | rdlength(2) | rdata
        if pos + 10 > response.len() {
            break;
        }

        let ttl = u32::from_be_bytes([
            response[pos + 4],
            response[pos + 5],
            response[pos + 6],
            response[pos + 7],
        ]);
        min_ttl = min_ttl.min(ttl);

        let rdlength = u16::from_be_bytes([response[pos + 8], response[pos + 9]]) as usize;
        pos += 10 + rdlength;
    }

    min_ttl
}

/// Build an NXDOMAIN response by flipping the query's flags word to
/// 0x8183 (QR=1, RD=1, RA=1, RCODE=3). Counts and the question section
/// are left untouched; short input is returned unchanged.
pub fn create_nxdomain_response(query: &[u8]) -> Vec<u8> {
    let mut response = query.to_vec();
    if response.len() < HEADER_LEN {
        return response;
    }
    response[2] = 0x81;
    response[3] = 0x83;
    response
}

/// Build a null response: the query with flags 0x8180, ancount 1, and an
/// appended A record answering 0.0.0.0 via a name pointer to offset 12.
/// Short input is returned unchanged.
pub fn create_null_response(query: &[u8]) -> Vec<u8> {
    if query.len() < HEADER_LEN {
        return query.to_vec();
    }

    let mut response = Vec::with_capacity(query.len() + 16);
    response.extend_from_slice(query);

    response[2] = 0x81;
    response[3] = 0x80;

    // ANCOUNT = 1
    response[6] = 0x00;
    response[7] = 0x01;

    response.extend_from_slice(&[0xC0, 0x0C]); // name: pointer to offset 12
    response.extend_from_slice(&[0x00, 0x01]); // type A
    response.extend_from_slice(&[0x00, 0x01]); // class IN
    response.extend_from_slice(&NULL_RESPONSE_TTL.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x04]); // rdlength
    response.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // 0.0.0.0

    response
}

/// Stamp a client's transaction id onto a cached response before emit.
pub fn rewrite_transaction_id(response: &mut [u8], id: u16) {
    if response.len() >= 2 {
        let bytes = id.to_be_bytes();
        response[0] = bytes[0];
        response[1] = bytes[1];
    }
}
