//! ESRI shapefile export (`.shp`, `.shx`, `.dbf`, optional `.prj`).
//!
//! Stations become `PointZ` records with an `id` column, shots become
//! two-vertex `PolyLineZ` records with `source` and `target` columns.

use crate::error::{CaveGraphError, Result, io_err};
use crate::graph::NodeKey;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use chrono::Datelike;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_BYTES: usize = 100;
const RECORD_HEADER_BYTES: usize = 8;
const SHAPE_POINT_Z: i32 = 11;
const SHAPE_POLYLINE_Z: i32 = 13;
/// Width of the numeric key columns in the attribute table
const KEY_FIELD_WIDTH: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Nodes,
    Edges,
}

impl ShapeKind {
    fn suffix(self) -> &'static str {
        match self {
            ShapeKind::Nodes => "nodes",
            ShapeKind::Edges => "edges",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: [f64; 3],
    max: [f64; 3],
}

impl Bounds {
    fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    fn extend(&mut self, p: [f64; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    fn merge(&mut self, other: &Bounds) {
        self.extend(other.min);
        self.extend(other.max);
    }

    /// Empty bounds are written as zeros.
    fn finite(&self) -> Bounds {
        if self.min[0].is_finite() {
            *self
        } else {
            Bounds {
                min: [0.0; 3],
                max: [0.0; 3],
            }
        }
    }
}

/// One shape record: geometry bytes plus the key columns of its table row.
struct ShapeRecord {
    content: Vec<u8>,
    bounds: Bounds,
    row: Vec<u64>,
}

fn point_z(key: NodeKey, p: [f64; 3]) -> io::Result<ShapeRecord> {
    let mut content = Vec::with_capacity(36);
    content.write_i32::<LittleEndian>(SHAPE_POINT_Z)?;
    for v in p {
        content.write_f64::<LittleEndian>(v)?;
    }
    // measure
    content.write_f64::<LittleEndian>(0.0)?;

    let mut bounds = Bounds::empty();
    bounds.extend(p);
    Ok(ShapeRecord {
        content,
        bounds,
        row: vec![key.0],
    })
}

fn polyline_z(from: NodeKey, to: NodeKey, a: [f64; 3], b: [f64; 3]) -> io::Result<ShapeRecord> {
    let mut bounds = Bounds::empty();
    bounds.extend(a);
    bounds.extend(b);

    let mut content = Vec::with_capacity(112);
    content.write_i32::<LittleEndian>(SHAPE_POLYLINE_Z)?;
    for v in [bounds.min[0], bounds.min[1], bounds.max[0], bounds.max[1]] {
        content.write_f64::<LittleEndian>(v)?;
    }
    // one part of two points, starting at point 0
    content.write_i32::<LittleEndian>(1)?;
    content.write_i32::<LittleEndian>(2)?;
    content.write_i32::<LittleEndian>(0)?;
    for p in [a, b] {
        content.write_f64::<LittleEndian>(p[0])?;
        content.write_f64::<LittleEndian>(p[1])?;
    }
    content.write_f64::<LittleEndian>(bounds.min[2])?;
    content.write_f64::<LittleEndian>(bounds.max[2])?;
    content.write_f64::<LittleEndian>(a[2])?;
    content.write_f64::<LittleEndian>(b[2])?;

    Ok(ShapeRecord {
        content,
        bounds,
        row: vec![from.0, to.0],
    })
}

fn write_main_header<W: Write>(
    w: &mut W,
    shape_type: i32,
    file_bytes: usize,
    bounds: &Bounds,
) -> io::Result<()> {
    w.write_i32::<BigEndian>(FILE_CODE)?;
    for _ in 0..5 {
        w.write_i32::<BigEndian>(0)?;
    }
    w.write_i32::<BigEndian>((file_bytes / 2) as i32)?;
    w.write_i32::<LittleEndian>(VERSION)?;
    w.write_i32::<LittleEndian>(shape_type)?;
    let b = bounds.finite();
    for v in [b.min[0], b.min[1], b.max[0], b.max[1], b.min[2], b.max[2], 0.0, 0.0] {
        w.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}

fn write_shp<W: Write>(
    w: &mut W,
    shape_type: i32,
    records: &[ShapeRecord],
    bounds: &Bounds,
) -> io::Result<()> {
    let file_bytes = HEADER_BYTES
        + records
            .iter()
            .map(|r| RECORD_HEADER_BYTES + r.content.len())
            .sum::<usize>();
    write_main_header(w, shape_type, file_bytes, bounds)?;
    for (i, record) in records.iter().enumerate() {
        w.write_i32::<BigEndian>(i as i32 + 1)?;
        w.write_i32::<BigEndian>((record.content.len() / 2) as i32)?;
        w.write_all(&record.content)?;
    }
    Ok(())
}

fn write_shx<W: Write>(
    w: &mut W,
    shape_type: i32,
    records: &[ShapeRecord],
    bounds: &Bounds,
) -> io::Result<()> {
    let file_bytes = HEADER_BYTES + records.len() * RECORD_HEADER_BYTES;
    write_main_header(w, shape_type, file_bytes, bounds)?;
    let mut offset = HEADER_BYTES;
    for record in records {
        w.write_i32::<BigEndian>((offset / 2) as i32)?;
        w.write_i32::<BigEndian>((record.content.len() / 2) as i32)?;
        offset += RECORD_HEADER_BYTES + record.content.len();
    }
    Ok(())
}

/// dBase III table with unsigned integer columns only.
fn write_dbf<W: Write>(w: &mut W, fields: &[&str], records: &[ShapeRecord]) -> io::Result<()> {
    let today = chrono::Utc::now().date_naive();
    let header_len = 32 + 32 * fields.len() + 1;
    let record_len = 1 + fields.len() * KEY_FIELD_WIDTH as usize;

    w.write_u8(0x03)?;
    w.write_u8((today.year() - 1900) as u8)?;
    w.write_u8(today.month() as u8)?;
    w.write_u8(today.day() as u8)?;
    w.write_u32::<LittleEndian>(records.len() as u32)?;
    w.write_u16::<LittleEndian>(header_len as u16)?;
    w.write_u16::<LittleEndian>(record_len as u16)?;
    w.write_all(&[0u8; 20])?;

    for name in fields {
        let mut field_name = [0u8; 11];
        let bytes = name.as_bytes();
        let n = bytes.len().min(10);
        field_name[..n].copy_from_slice(&bytes[..n]);
        w.write_all(&field_name)?;
        w.write_u8(b'N')?;
        w.write_all(&[0u8; 4])?;
        w.write_u8(KEY_FIELD_WIDTH)?;
        // decimals
        w.write_u8(0)?;
        w.write_all(&[0u8; 14])?;
    }
    w.write_u8(0x0D)?;

    for record in records {
        w.write_u8(b' ')?;
        for value in &record.row {
            write!(w, "{:>width$}", value, width = KEY_FIELD_WIDTH as usize)?;
        }
    }
    w.write_u8(0x1A)?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| io_err!(path, e))
}

fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> Result<()> {
    let mut w = create(path)?;
    body(&mut w).and_then(|_| w.flush()).map_err(|e| io_err!(path, e))
}

/// Writes `<name>nodes.*` or `<name>edges.*` into `output_dir` and returns the `.shp` path.
///
/// `positions` gives the coordinates of every station referenced; `links`
/// is only read for [`ShapeKind::Edges`] and may contain pairs that are not
/// shots of any graph (proposed connections, for instance). `crs_wkt`, when
/// given, is written verbatim as the `.prj` file.
pub fn to_shapefile(
    positions: &BTreeMap<NodeKey, [f64; 3]>,
    links: &[(NodeKey, NodeKey)],
    kind: ShapeKind,
    crs_wkt: Option<&str>,
    output_dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    let position = |k: &NodeKey| {
        positions
            .get(k)
            .copied()
            .ok_or(CaveGraphError::MissingNode(*k))
    };

    let (shape_type, fields, records) = match kind {
        ShapeKind::Nodes => {
            let records = positions
                .iter()
                .map(|(k, p)| point_z(*k, *p))
                .collect::<io::Result<Vec<_>>>()
                .map_err(|e| CaveGraphError::Export(e.to_string()))?;
            (SHAPE_POINT_Z, vec!["id"], records)
        }
        ShapeKind::Edges => {
            let mut records = Vec::with_capacity(links.len());
            for (u, v) in links {
                let record = polyline_z(*u, *v, position(u)?, position(v)?)
                    .map_err(|e| CaveGraphError::Export(e.to_string()))?;
                records.push(record);
            }
            (SHAPE_POLYLINE_Z, vec!["source", "target"], records)
        }
    };

    let mut bounds = Bounds::empty();
    for record in &records {
        bounds.merge(&record.bounds);
    }

    let stem = format!("{}{}", name, kind.suffix());
    let sibling = |ext: &str| output_dir.join(format!("{}.{}", stem, ext));
    let shp = sibling("shp");
    write_file(&shp, |w| write_shp(w, shape_type, &records, &bounds))?;
    write_file(&sibling("shx"), |w| write_shx(w, shape_type, &records, &bounds))?;
    write_file(&sibling("dbf"), |w| write_dbf(w, &fields, &records))?;
    if let Some(wkt) = crs_wkt {
        write_file(&sibling("prj"), |w| w.write_all(wkt.as_bytes()))?;
    }

    info!("wrote {} {} to {}", records.len(), kind.suffix(), shp.display());
    Ok(shp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn positions() -> BTreeMap<NodeKey, [f64; 3]> {
        let mut p = BTreeMap::new();
        p.insert(NodeKey(1), [10.0, 20.0, -5.0]);
        p.insert(NodeKey(2), [12.0, 18.0, -7.5]);
        p
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_nodes_shapefile_layout() {
        let dir = scratch_dir("cavegraph_shp_nodes");
        let shp = to_shapefile(
            &positions(),
            &[],
            ShapeKind::Nodes,
            Some("WKT"),
            &dir,
            "cave_",
        )
        .unwrap();
        assert!(shp.ends_with("cave_nodes.shp"));

        let bytes = std::fs::read(&shp).unwrap();
        assert_eq!(bytes.len(), 100 + 2 * (8 + 36));
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.read_i32::<BigEndian>().unwrap(), 9994);
        c.set_position(24);
        assert_eq!(c.read_i32::<BigEndian>().unwrap() as usize * 2, bytes.len());
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), 1000);
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), SHAPE_POINT_Z);
        let bbox: Vec<f64> = (0..6).map(|_| c.read_f64::<LittleEndian>().unwrap()).collect();
        assert_eq!(bbox, vec![10.0, 18.0, 12.0, 20.0, -7.5, -5.0]);

        // second record starts after the header and the first 44-byte record
        c.set_position(100 + 44);
        assert_eq!(c.read_i32::<BigEndian>().unwrap(), 2);
        assert_eq!(c.read_i32::<BigEndian>().unwrap(), 18);
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), SHAPE_POINT_Z);
        assert_eq!(c.read_f64::<LittleEndian>().unwrap(), 12.0);

        let shx = std::fs::read(dir.join("cave_nodes.shx")).unwrap();
        assert_eq!(shx.len(), 116);
        let mut c = Cursor::new(&shx);
        c.set_position(108);
        assert_eq!(c.read_i32::<BigEndian>().unwrap(), (100 + 44) / 2);

        let dbf = std::fs::read(dir.join("cave_nodes.dbf")).unwrap();
        assert_eq!(dbf.len(), 65 + 2 * 21 + 1);
        assert_eq!(&dbf[32..34], b"id");
        assert_eq!(dbf[64], 0x0D);
        assert_eq!(std::str::from_utf8(&dbf[66..86]).unwrap().trim(), "1");
        assert_eq!(*dbf.last().unwrap(), 0x1A);

        assert_eq!(std::fs::read_to_string(dir.join("cave_nodes.prj")).unwrap(), "WKT");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_edges_shapefile_layout() {
        let dir = scratch_dir("cavegraph_shp_edges");
        let links = [(NodeKey(1), NodeKey(2))];
        let shp = to_shapefile(&positions(), &links, ShapeKind::Edges, None, &dir, "").unwrap();

        let bytes = std::fs::read(&shp).unwrap();
        assert_eq!(bytes.len(), 100 + 8 + 112);
        let mut c = Cursor::new(&bytes);
        c.set_position(108);
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), SHAPE_POLYLINE_Z);
        c.set_position(108 + 4 + 32);
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), 1);
        assert_eq!(c.read_i32::<LittleEndian>().unwrap(), 2);

        let dbf = std::fs::read(dir.join("edges.dbf")).unwrap();
        let row = std::str::from_utf8(&dbf[97..138]).unwrap();
        assert_eq!(row.split_whitespace().collect::<Vec<_>>(), vec!["1", "2"]);
        assert!(!dir.join("edges.prj").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_edges_need_positions() {
        let dir = scratch_dir("cavegraph_shp_missing");
        let links = [(NodeKey(1), NodeKey(99))];
        let err = to_shapefile(&positions(), &links, ShapeKind::Edges, None, &dir, "").unwrap_err();
        assert!(matches!(err, CaveGraphError::MissingNode(NodeKey(99))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
