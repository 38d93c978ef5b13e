//! UUID and IP address encodings.

use std::net::{Ipv4Addr, Ipv6Addr};

use uuid::Uuid;

use crate::binary::{ByteSink, ByteSource};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::formats::ReadFormat;
use crate::value::Value;

/// The 12-byte prefix that embeds an IPv4 address in an IPv6 column.
const IPV4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

/// UUIDs travel as two little-endian u64 words, high half first, which
/// deliberately swaps the canonical byte order.
pub fn read_uuid(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    let as_string = ctx.read_format("UUID") == ReadFormat::String;
    let mut out = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let high = src.read_u64()?;
        let low = src.read_u64()?;
        let uuid = Uuid::from_u128((u128::from(high) << 64) | u128::from(low));
        if as_string {
            out.push(Value::String(uuid.to_string()));
        } else {
            out.push(Value::Uuid(uuid));
        }
    }
    Ok(out)
}

pub fn write_uuid(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        let raw = match v {
            Value::Null => 0u128,
            Value::Uuid(u) => u.as_u128(),
            Value::String(s) => Uuid::parse_str(s)
                .map_err(|_| {
                    Error::Data(format!(
                        "cannot parse '{s}' as a UUID for column '{}'",
                        ctx.column_name
                    ))
                })?
                .as_u128(),
            other => {
                return Err(Error::Data(format!(
                    "expected a UUID for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        };
        sink.write_u64((raw >> 64) as u64);
        sink.write_u64(raw as u64);
    }
    Ok(())
}

pub fn read_ipv4(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    let as_string = ctx.read_format("IPv4") == ReadFormat::String;
    Ok(src
        .read_u32s(num_rows)?
        .into_iter()
        .map(|raw| {
            let addr = Ipv4Addr::from(raw);
            if as_string {
                Value::String(addr.to_string())
            } else {
                Value::Ipv4(addr)
            }
        })
        .collect())
}

pub fn write_ipv4(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        let raw = match v {
            Value::Null => 0,
            Value::Ipv4(addr) => u32::from(*addr),
            Value::String(s) => s
                .parse::<Ipv4Addr>()
                .map(u32::from)
                .map_err(|_| bad_ip(s, "IPv4", ctx))?,
            Value::UInt32(raw) => *raw,
            other => {
                return Err(Error::Data(format!(
                    "expected an IPv4 address for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        };
        sink.write_u32(raw);
    }
    Ok(())
}

/// IPv6 columns hold 16 big-endian bytes; IPv4-mapped values decode back
/// to plain IPv4 addresses.
pub fn read_ipv6(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    let as_string = ctx.read_format("IPv6") == ReadFormat::String;
    let mut out = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let raw = src.read_bytes(16)?;
        let octets: [u8; 16] = raw.as_ref().try_into().expect("16 bytes");
        if octets[..12] == IPV4_MAPPED_PREFIX {
            let v4 = Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]);
            out.push(if as_string {
                Value::String(v4.to_string())
            } else {
                Value::Ipv4(v4)
            });
        } else {
            let v6 = Ipv6Addr::from(octets);
            out.push(if as_string {
                Value::String(v6.to_string())
            } else {
                Value::Ipv6(v6)
            });
        }
    }
    Ok(out)
}

pub fn write_ipv6(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        match v {
            Value::Null => sink.write_slice(&[0u8; 16]),
            Value::Ipv6(addr) => sink.write_slice(&addr.octets()),
            Value::Ipv4(addr) => write_mapped_v4(*addr, sink),
            Value::UInt32(raw) => write_mapped_v4(Ipv4Addr::from(*raw), sink),
            Value::String(s) => {
                if let Ok(v4) = s.parse::<Ipv4Addr>() {
                    write_mapped_v4(v4, sink);
                } else {
                    let v6 = s.parse::<Ipv6Addr>().map_err(|_| bad_ip(s, "IPv6", ctx))?;
                    sink.write_slice(&v6.octets());
                }
            }
            Value::Bytes(raw) if raw.len() == 16 => sink.write_slice(raw),
            Value::Bytes(raw) if raw.len() == 4 => {
                sink.write_slice(&IPV4_MAPPED_PREFIX);
                sink.write_slice(raw);
            }
            other => {
                return Err(Error::Data(format!(
                    "expected an IPv6 address for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        }
    }
    Ok(())
}

fn write_mapped_v4(addr: Ipv4Addr, sink: &mut ByteSink) {
    sink.write_slice(&IPV4_MAPPED_PREFIX);
    sink.write_slice(&addr.octets());
}

fn bad_ip(text: &str, family: &str, ctx: &WriteContext) -> Error {
    Error::Data(format!(
        "cannot parse '{text}' as {family} for column '{}'",
        ctx.column_name
    ))
}
