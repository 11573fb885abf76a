//! OSM PBF ingest path: unwraps the `BlobHeader`/`Blob` framing and the
//! `PrimitiveBlock` dense-node/way encoding using the wire decoder, as an
//! alternative to the XML ingest path. Deliberately narrow: it reads the
//! fields this pipeline needs and nothing else.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::IngestError;
use crate::osm::{OsmNode, OsmWay};
use crate::wire::{Reader, WireType};

/// Parses every `OSMData` blob in a `.osm.pbf` byte stream, returning all
/// nodes (tagged or not) and all ways (regardless of routability — filtering
/// happens in the `osm` module, shared with the XML path).
pub fn decode_pbf(data: &[u8]) -> Result<(HashMap<i64, OsmNode>, Vec<OsmWay>), IngestError> {
    let mut nodes = HashMap::new();
    let mut ways = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let (header_len, header_bytes) = read_length_prefixed(data, pos)
            .ok_or_else(|| IngestError::Wire("truncated blob header length".into()))?;
        pos += header_len;

        let blob_header = parse_blob_header(header_bytes)?;
        let blob_bytes = data
            .get(pos..pos + blob_header.datasize)
            .ok_or_else(|| IngestError::Wire("truncated blob body".into()))?;
        pos += blob_header.datasize;

        if blob_header.blob_type != "OSMData" {
            continue;
        }

        let raw = decode_blob(blob_bytes)?;
        decode_primitive_block(&raw, &mut nodes, &mut ways)?;
    }

    Ok((nodes, ways))
}

struct BlobHeader {
    blob_type: String,
    datasize: usize,
}

fn read_length_prefixed(data: &[u8], pos: usize) -> Option<(usize, &[u8])> {
    let len_bytes = data.get(pos..pos + 4)?;
    let len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
    let body = data.get(pos + 4..pos + 4 + len)?;
    Some((4 + len, body))
}

fn parse_blob_header(bytes: &[u8]) -> Result<BlobHeader, IngestError> {
    let mut reader = Reader::new(bytes);
    let mut blob_type = String::new();
    let mut datasize = 0usize;

    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed BlobHeader field".into()))?;
        match field.number {
            1 if field.wire_type == WireType::LengthDelimited => {
                blob_type = String::from_utf8_lossy(field.bytes).into_owned();
            }
            3 => {
                datasize = crate::wire::field_uvarint(field.bytes).unwrap_or(0) as usize;
            }
            _ => {}
        }
    }

    Ok(BlobHeader { blob_type, datasize })
}

fn decode_blob(bytes: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut reader = Reader::new(bytes);
    let mut raw = None;
    let mut zlib_data = None;

    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed Blob field".into()))?;
        match field.number {
            1 => raw = Some(field.bytes.to_vec()),
            3 => zlib_data = Some(field.bytes.to_vec()),
            _ => {}
        }
    }

    if let Some(z) = zlib_data {
        let mut decoder = ZlibDecoder::new(&z[..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| IngestError::Wire(format!("zlib inflate failed: {e}")))?;
        Ok(out)
    } else if let Some(r) = raw {
        Ok(r)
    } else {
        Err(IngestError::Wire("Blob had neither raw nor zlib_data".into()))
    }
}

#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    fn get(&self, index: usize) -> &str {
        self.strings.get(index).map(String::as_str).unwrap_or("")
    }
}

fn decode_primitive_block(
    data: &[u8],
    nodes: &mut HashMap<i64, OsmNode>,
    ways: &mut Vec<OsmWay>,
) -> Result<(), IngestError> {
    let mut reader = Reader::new(data);
    let mut stringtable = StringTable::default();
    let mut granularity = 100i64;
    let mut lat_offset = 0i64;
    let mut lon_offset = 0i64;
    let mut groups: Vec<Vec<u8>> = Vec::new();

    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed PrimitiveBlock field".into()))?;
        match field.number {
            1 => stringtable = decode_stringtable(field.bytes)?,
            2 => groups.push(field.bytes.to_vec()),
            17 => granularity = crate::wire::field_uvarint(field.bytes).unwrap_or(100) as i64,
            19 => lat_offset = zigzag_from_bytes(field.bytes),
            20 => lon_offset = zigzag_from_bytes(field.bytes),
            _ => {}
        }
    }

    for group in groups {
        decode_primitive_group(&group, &stringtable, granularity, lat_offset, lon_offset, nodes, ways)?;
    }
    Ok(())
}

fn zigzag_from_bytes(bytes: &[u8]) -> i64 {
    let zigzag = crate::wire::field_uvarint(bytes).unwrap_or(0);
    ((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64)
}

fn decode_stringtable(bytes: &[u8]) -> Result<StringTable, IngestError> {
    let mut reader = Reader::new(bytes);
    let mut strings = Vec::new();
    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed StringTable field".into()))?;
        if field.number == 1 {
            strings.push(String::from_utf8_lossy(field.bytes).into_owned());
        }
    }
    Ok(StringTable { strings })
}

fn decode_primitive_group(
    bytes: &[u8],
    stringtable: &StringTable,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    nodes: &mut HashMap<i64, OsmNode>,
    ways: &mut Vec<OsmWay>,
) -> Result<(), IngestError> {
    let mut reader = Reader::new(bytes);
    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed PrimitiveGroup field".into()))?;
        match field.number {
            2 => decode_dense_nodes(field.bytes, stringtable, granularity, lat_offset, lon_offset, nodes)?,
            3 => ways.push(decode_way(field.bytes, stringtable)?),
            _ => {}
        }
    }
    Ok(())
}

fn decode_dense_nodes(
    bytes: &[u8],
    stringtable: &StringTable,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    nodes: &mut HashMap<i64, OsmNode>,
) -> Result<(), IngestError> {
    let mut reader = Reader::new(bytes);
    let mut ids = Vec::new();
    let mut lats = Vec::new();
    let mut lons = Vec::new();
    let mut keys_vals = Vec::new();

    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed DenseNodes field".into()))?;
        match field.number {
            1 => ids = read_packed_svarint(field.bytes),
            8 => lats = read_packed_svarint(field.bytes),
            9 => lons = read_packed_svarint(field.bytes),
            10 => keys_vals = read_packed_uvarint(field.bytes),
            _ => {}
        }
    }

    let mut id = 0i64;
    let mut lat = 0i64;
    let mut lon = 0i64;
    let mut kv_iter = keys_vals.into_iter();

    for i in 0..ids.len() {
        id += ids[i];
        lat += lats.get(i).copied().unwrap_or(0);
        lon += lons.get(i).copied().unwrap_or(0);

        let mut tags = HashMap::new();
        loop {
            match kv_iter.next() {
                Some(0) | None => break,
                Some(k) => {
                    let v = kv_iter.next().unwrap_or(0);
                    tags.insert(
                        stringtable.get(k as usize).to_string(),
                        stringtable.get(v as usize).to_string(),
                    );
                }
            }
        }

        let lat_f = 1e-9 * (lat_offset + granularity * lat) as f64;
        let lon_f = 1e-9 * (lon_offset + granularity * lon) as f64;
        nodes.insert(
            id,
            OsmNode {
                id,
                lat: lat_f,
                lon: lon_f,
                tags,
            },
        );
    }
    Ok(())
}

fn decode_way(bytes: &[u8], stringtable: &StringTable) -> Result<OsmWay, IngestError> {
    let mut reader = Reader::new(bytes);
    let mut id = 0i64;
    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut refs = Vec::new();

    while !reader.is_empty() {
        let field = reader
            .read_field()
            .ok_or_else(|| IngestError::Wire("malformed Way field".into()))?;
        match field.number {
            1 => id = crate::wire::field_uvarint(field.bytes).unwrap_or(0) as i64,
            2 => keys = read_packed_uvarint(field.bytes),
            3 => vals = read_packed_uvarint(field.bytes),
            8 => refs = read_packed_svarint(field.bytes),
            _ => {}
        }
    }

    let mut tags = HashMap::new();
    for (k, v) in keys.into_iter().zip(vals) {
        tags.insert(
            stringtable.get(k as usize).to_string(),
            stringtable.get(v as usize).to_string(),
        );
    }

    let mut node_ref = 0i64;
    let node_refs = refs
        .into_iter()
        .map(|delta| {
            node_ref += delta;
            node_ref
        })
        .collect();

    Ok(OsmWay {
        id,
        node_refs,
        tags,
    })
}

fn read_packed_uvarint(bytes: &[u8]) -> Vec<u64> {
    let mut reader = Reader::new(bytes);
    let mut out = Vec::new();
    while !reader.is_empty() {
        match reader.read_uvarint() {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}

fn read_packed_svarint(bytes: &[u8]) -> Vec<i64> {
    let mut reader = Reader::new(bytes);
    let mut out = Vec::new();
    while !reader.is_empty() {
        match reader.read_svarint() {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}
