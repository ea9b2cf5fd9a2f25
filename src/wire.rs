//! Hand-rolled construction of outgoing queries and inspection of incoming
//! replies.
//!
//! The validator (see [`crate::transfer::validate`]) only ever needs to
//! read the header, skip the question section, and parse a single SOA out
//! of the first answer RR — it never needs to resolve compressed names or
//! understand any other record type, so a full message-parsing dependency
//! is unnecessary here; a handful of cursor-advancing helpers suffice.

use bytes::{BufMut, Bytes, BytesMut};
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::{Name, Serial};

use crate::soa::SoaSnapshot;
use crate::zone::StoredName;

/// Build an AXFR query for `zone`.
pub fn build_axfr_query(zone: &StoredName, query_id: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    write_header(&mut buf, query_id, 1, 0, 0, 0);
    write_question(&mut buf, zone, Rtype::AXFR);
    buf.freeze()
}

/// Build an IXFR query for `zone`, carrying the client's current SOA as
/// the query's sole authority record (the "IXFR cookie").
pub fn build_ixfr_query(zone: &StoredName, query_id: u16, soa: &SoaSnapshot) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    write_header(&mut buf, query_id, 1, 0, 1, 0);
    write_question(&mut buf, zone, Rtype::IXFR);
    write_soa_rr(&mut buf, zone, soa);
    buf.freeze()
}

fn write_header(
    buf: &mut BytesMut,
    id: u16,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
) {
    buf.put_u16(id);
    // QR=0 (query), Opcode=0 (QUERY), AA=0, TC=0, RD=0.
    buf.put_u8(0x00);
    // RA=0, Z=0, RCODE=0.
    buf.put_u8(0x00);
    buf.put_u16(qdcount);
    buf.put_u16(ancount);
    buf.put_u16(nscount);
    buf.put_u16(arcount);
}

fn write_name(buf: &mut BytesMut, name: &StoredName) {
    // `Name<Bytes>` already stores its labels in wire form, uncompressed;
    // no encoding work is needed beyond copying it out. This is an
    // outgoing query sent just once, so no compression is applied either.
    buf.put_slice(name.as_slice());
}

fn write_question(buf: &mut BytesMut, name: &StoredName, rtype: Rtype) {
    write_name(buf, name);
    buf.put_u16(rtype.to_int());
    buf.put_u16(Class::IN.to_int());
}

fn write_soa_rr(buf: &mut BytesMut, owner: &StoredName, soa: &SoaSnapshot) {
    write_name(buf, owner);
    buf.put_u16(soa.rtype.to_int());
    buf.put_u16(soa.class.to_int());
    buf.put_u32(soa.ttl);

    // Reserve space for RDLENGTH, then backfill once the rdata is written.
    let rdlength_at = buf.len();
    buf.put_u16(0);
    let rdata_start = buf.len();

    // MNAME/RNAME carry forward whatever was last learned from the master;
    // before anything has ever been learned, `soa` holds the root name for
    // both, matching `xfrd_write_soa_buffer`'s null-pointer-means-root
    // fallback.
    write_name(buf, &soa.primary_ns);
    write_name(buf, &soa.responsible_email);
    buf.put_u32(soa.serial.0);
    buf.put_u32(soa.refresh);
    buf.put_u32(soa.retry);
    buf.put_u32(soa.expire);
    buf.put_u32(soa.minimum);

    let rdlength = (buf.len() - rdata_start) as u16;
    buf[rdlength_at..rdlength_at + 2].copy_from_slice(&rdlength.to_be_bytes());
}

//----------- Header ---------------------------------------------------------

/// The fixed 12-byte DNS message header.
#[derive(Clone, Copy, Debug)]
pub struct Header {
    pub id: u16,
    pub tc: bool,
    pub rcode: Rcode,
    pub qdcount: u16,
    pub ancount: u16,
}

/// Parse the fixed header out of `msg`.
pub fn parse_header(msg: &[u8]) -> Option<Header> {
    if msg.len() < 12 {
        return None;
    }
    let id = u16::from_be_bytes([msg[0], msg[1]]);
    let flags2 = msg[3];
    let tc = msg[2] & 0x02 != 0;
    let rcode = Rcode::from_int(flags2 & 0x0F);
    let qdcount = u16::from_be_bytes([msg[4], msg[5]]);
    let ancount = u16::from_be_bytes([msg[6], msg[7]]);
    Some(Header {
        id,
        tc,
        rcode,
        qdcount,
        ancount,
    })
}

/// Advance `offset` past one (possibly compressed) domain name, per RFC
/// 1035 §4.1.4. Returns the offset just past the name, without attempting
/// to resolve what a compression pointer refers to — the validator never
/// needs the decoded name, only to skip over it.
pub fn skip_name(msg: &[u8], mut offset: usize) -> Option<usize> {
    loop {
        let len = *msg.get(offset)?;
        if len == 0 {
            return Some(offset + 1);
        }
        if len & 0xC0 == 0xC0 {
            // A compression pointer is always exactly 2 bytes and always
            // terminates the name.
            msg.get(offset + 1)?;
            return Some(offset + 2);
        }
        if len & 0xC0 != 0 {
            return None; // Reserved label type.
        }
        offset += 1 + len as usize;
        if offset > msg.len() {
            return None;
        }
    }
}

/// Decode one (possibly compressed) domain name starting at `offset`,
/// returning the name and the offset just past its encoding in `msg` (the
/// two bytes of a compression pointer, not whatever it points at).
///
/// Unlike [`skip_name`], this resolves pointers by following them and
/// copying out the labels they lead to, producing a single uncompressed
/// `Name`. A pointer is only ever allowed to point strictly backwards, both
/// to bound the work done and to rule out pointer loops.
fn decode_name(msg: &[u8], start: usize) -> Option<(Name<Bytes>, usize)> {
    let mut out = Vec::with_capacity(16);
    let mut cursor = start;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *msg.get(cursor)?;
        if len == 0 {
            out.push(0);
            if end.is_none() {
                end = Some(cursor + 1);
            }
            break;
        }
        if len & 0xC0 == 0xC0 {
            let hi = (len & 0x3F) as usize;
            let lo = *msg.get(cursor + 1)? as usize;
            if end.is_none() {
                end = Some(cursor + 2);
            }
            let pointer = (hi << 8) | lo;
            if pointer >= cursor {
                return None; // pointers must point strictly backwards
            }
            jumps += 1;
            if jumps > 32 {
                return None;
            }
            cursor = pointer;
            continue;
        }
        if len & 0xC0 != 0 {
            return None; // reserved label type
        }
        let label_end = cursor + 1 + len as usize;
        if label_end > msg.len() {
            return None;
        }
        out.extend_from_slice(&msg[cursor..label_end]);
        cursor = label_end;
    }

    let name = Name::from_octets(Bytes::from(out)).ok()?;
    Some((name, end?))
}

/// Skip `count` questions starting at `offset`, returning the offset just
/// past the last one.
pub fn skip_questions(msg: &[u8], mut offset: usize, count: u16) -> Option<usize> {
    for _ in 0..count {
        offset = skip_name(msg, offset)?;
        offset += 4; // QTYPE + QCLASS
        if offset > msg.len() {
            return None;
        }
    }
    Some(offset)
}

/// The first answer resource record, parsed just enough to validate it is
/// an SOA and extract its serial.
#[derive(Clone, Debug)]
pub struct FirstAnswerSoa {
    pub soa: SoaSnapshot,
    /// Offset in `msg` just past this record, for callers that need to
    /// continue parsing (none currently do, but it mirrors the original
    /// per-RR cursor rather than silently discarding it).
    pub end: usize,
}

/// Parse the first answer RR at `offset`, requiring it to be a SOA record
/// of class IN. Any other RR there is a validation failure, not a type to
/// skip past — the whole point of reading it is to assert it's the SOA
/// every AXFR/IXFR response starts with.
pub fn parse_first_answer_soa(msg: &[u8], offset: usize) -> Option<FirstAnswerSoa> {
    let mut cursor = skip_name(msg, offset)?;

    let rtype = Rtype::from_int(u16::from_be_bytes([
        *msg.get(cursor)?,
        *msg.get(cursor + 1)?,
    ]));
    let rclass = Class::from_int(u16::from_be_bytes([
        *msg.get(cursor + 2)?,
        *msg.get(cursor + 3)?,
    ]));
    cursor += 4;
    let ttl = u32::from_be_bytes(msg.get(cursor..cursor + 4)?.try_into().ok()?);
    cursor += 4;
    let rdlength = u16::from_be_bytes([*msg.get(cursor)?, *msg.get(cursor + 1)?]) as usize;
    cursor += 2;

    if rtype != Rtype::SOA || rclass != Class::IN {
        return None;
    }

    let rdata_start = cursor;
    let rdata_end = rdata_start.checked_add(rdlength)?;
    if rdata_end > msg.len() {
        return None;
    }

    // Within the rdata: MNAME, RNAME (both possibly compressed), then the
    // five 32-bit timers.
    let (primary_ns, after_mname) = decode_name(msg, rdata_start)?;
    let (responsible_email, rd_cursor) = decode_name(msg, after_mname)?;

    let read_u32 = |at: usize| -> Option<u32> {
        let bytes = msg.get(at..at + 4)?;
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    };

    let serial = read_u32(rd_cursor)?;
    let refresh = read_u32(rd_cursor + 4)?;
    let retry = read_u32(rd_cursor + 8)?;
    let expire = read_u32(rd_cursor + 12)?;
    let minimum = read_u32(rd_cursor + 16)?;

    Some(FirstAnswerSoa {
        soa: SoaSnapshot {
            rtype,
            class: rclass,
            ttl,
            rdata_count: rdlength as u16,
            primary_ns,
            responsible_email,
            serial: Serial(serial),
            refresh,
            retry,
            expire,
            minimum,
        },
        end: rdata_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn zone() -> StoredName {
        StoredName::from_str("example.com.").unwrap()
    }

    #[test]
    fn axfr_query_has_expected_shape() {
        let msg = build_axfr_query(&zone(), 0x1234);
        let header = parse_header(&msg).unwrap();
        assert_eq!(header.id, 0x1234);
        assert_eq!(header.qdcount, 1);
        assert_eq!(header.ancount, 0);

        let after_q = skip_questions(&msg, 12, 1).unwrap();
        assert_eq!(after_q, msg.len());
    }

    fn soa(serial: u32) -> SoaSnapshot {
        SoaSnapshot {
            rtype: Rtype::SOA,
            class: Class::IN,
            ttl: 3600,
            rdata_count: 22,
            primary_ns: Name::from_str("ns1.example.com.").unwrap(),
            responsible_email: Name::from_str("hostmaster.example.com.").unwrap(),
            serial: Serial(serial),
            refresh: 3600,
            retry: 900,
            expire: 1_209_600,
            minimum: 300,
        }
    }

    #[test]
    fn ixfr_query_carries_soa_in_authority() {
        let msg = build_ixfr_query(&zone(), 7, &soa(100));
        let after_q = skip_questions(&msg, 12, 1).unwrap();

        let parsed = parse_first_answer_soa(&msg, after_q).unwrap();
        assert_eq!(parsed.soa.serial, Serial(100));
        assert_eq!(parsed.soa.refresh, 3600);
        assert_eq!(parsed.end, msg.len());
    }

    #[test]
    fn primary_ns_and_email_round_trip_uncompressed() {
        let msg = build_ixfr_query(&zone(), 7, &soa(100));
        let after_q = skip_questions(&msg, 12, 1).unwrap();
        let parsed = parse_first_answer_soa(&msg, after_q).unwrap();

        assert_eq!(parsed.soa.primary_ns, Name::from_str("ns1.example.com.").unwrap());
        assert_eq!(
            parsed.soa.responsible_email,
            Name::from_str("hostmaster.example.com.").unwrap()
        );
    }

    #[test]
    fn truncated_message_fails_to_parse_header() {
        assert!(parse_header(&[0u8; 4]).is_none());
    }

    #[test]
    fn compression_pointer_is_skipped_not_followed() {
        // name at offset 0: a pointer straight to itself (an edge case,
        // but it should still just consume 2 bytes rather than loop).
        let msg = [0xC0, 0x00];
        assert_eq!(skip_name(&msg, 0), Some(2));
    }

    #[test]
    fn decode_name_follows_a_compression_pointer() {
        // "a" at offset 0, then at offset 3 a name made of a pointer back
        // to it.
        let mut msg = vec![1, b'a', 0];
        let ptr_at = msg.len();
        msg.extend_from_slice(&[0xC0, 0x00]);

        let (name, end) = decode_name(&msg, ptr_at).unwrap();
        assert_eq!(name, Name::from_str("a.").unwrap());
        assert_eq!(end, ptr_at + 2);
    }

    #[test]
    fn decode_name_rejects_forward_pointers() {
        let msg = [0xC0, 0x05, 0, 0, 0, 0];
        assert!(decode_name(&msg, 0).is_none());
    }
}
