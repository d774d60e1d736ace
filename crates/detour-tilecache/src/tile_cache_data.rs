//! Compressed tile cache layers
//!
//! A layer blob is an uncompressed [`TileCacheLayerHeader`] ('DTLR',
//! version 1) followed by the compressed heights, areas and connections of
//! the layer grid. All values are little-endian.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use detour::{Result, Status};
use recast::HeightfieldLayer;

const fn four_cc(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | tag[3] as u32
}

/// Layer data magic, 'DTLR'
pub const DT_TILECACHE_MAGIC: u32 = four_cc(b"DTLR");
pub const DT_TILECACHE_VERSION: i32 = 1;

/// Height of an empty layer cell
pub const DT_TILECACHE_NULL_HEIGHT: u8 = 0xff;
/// Area id of cells without walkable surface
pub const DT_TILECACHE_NULL_AREA: u8 = 0;
/// Area id of walkable cells before the mesh process assigns areas
pub const DT_TILECACHE_WALKABLE_AREA: u8 = 63;

/// Size in bytes of a serialized [`TileCacheLayerHeader`]
pub const LAYER_HEADER_SIZE: usize = 54;

/// Compression of the layer grids
pub trait TileCacheCompressor {
    fn compress(&self, buffer: &[u8]) -> Vec<u8>;
    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compression with the uncompressed size prepended
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl TileCacheCompressor for Lz4Compressor {
    fn compress(&self, buffer: &[u8]) -> Vec<u8> {
        lz4_flex::compress_prepend_size(buffer)
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(compressed).map_err(|e| {
            log::error!("tile cache layer decompression failed: {}", e);
            Status::FAILURE
        })
    }
}

/// Placement and extent of a layer
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheLayerHeader {
    /// Tile grid position
    pub tx: i32,
    pub ty: i32,
    pub tlayer: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Height range of the layer, in voxels
    pub hmin: u16,
    pub hmax: u16,
    /// Grid size in cells
    pub width: u8,
    pub height: u8,
    /// Usable rectangle of the grid
    pub minx: u8,
    pub maxx: u8,
    pub miny: u8,
    pub maxy: u8,
}

impl TileCacheLayerHeader {
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(DT_TILECACHE_MAGIC)?;
        w.write_i32::<LittleEndian>(DT_TILECACHE_VERSION)?;
        w.write_i32::<LittleEndian>(self.tx)?;
        w.write_i32::<LittleEndian>(self.ty)?;
        w.write_i32::<LittleEndian>(self.tlayer)?;
        for &v in self.bmin.iter().chain(self.bmax.iter()) {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_u16::<LittleEndian>(self.hmin)?;
        w.write_u16::<LittleEndian>(self.hmax)?;
        w.write_all(&[self.width, self.height, self.minx, self.maxx, self.miny, self.maxy])
    }

    fn read<R: Read>(r: &mut R) -> Result<Self> {
        if r.read_u32::<LittleEndian>()? != DT_TILECACHE_MAGIC {
            return Err(Status::FAILURE | Status::WRONG_MAGIC);
        }
        if r.read_i32::<LittleEndian>()? != DT_TILECACHE_VERSION {
            return Err(Status::FAILURE | Status::WRONG_VERSION);
        }
        let tx = r.read_i32::<LittleEndian>()?;
        let ty = r.read_i32::<LittleEndian>()?;
        let tlayer = r.read_i32::<LittleEndian>()?;
        let mut bounds = [0.0f32; 6];
        for v in bounds.iter_mut() {
            *v = r.read_f32::<LittleEndian>()?;
        }
        let hmin = r.read_u16::<LittleEndian>()?;
        let hmax = r.read_u16::<LittleEndian>()?;
        let mut dims = [0u8; 6];
        r.read_exact(&mut dims)?;
        Ok(Self {
            tx,
            ty,
            tlayer,
            bmin: [bounds[0], bounds[1], bounds[2]],
            bmax: [bounds[3], bounds[4], bounds[5]],
            hmin,
            hmax,
            width: dims[0],
            height: dims[1],
            minx: dims[2],
            maxx: dims[3],
            miny: dims[4],
            maxy: dims[5],
        })
    }
}

/// Decompressed layer grid
///
/// `heights` are relative to `hmin` with [`DT_TILECACHE_NULL_HEIGHT`] for
/// empty cells. `cons` holds the walkable connection mask in the low nibble
/// and the portal mask in the high nibble, one bit per direction
/// (0: -x, 1: +z, 2: +x, 3: -z).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileCacheLayer {
    pub header: TileCacheLayerHeader,
    pub heights: Vec<u8>,
    pub areas: Vec<u8>,
    pub cons: Vec<u8>,
}

impl TileCacheLayer {
    /// Wraps a Recast heightfield layer for tile `(tx, ty, tlayer)`
    pub fn from_heightfield_layer(layer: &HeightfieldLayer, tx: i32, ty: i32, tlayer: i32) -> Result<Self> {
        let fits = |v: i32| (0..=255).contains(&v);
        if !fits(layer.width) || !fits(layer.height) || !(0..=0xffff).contains(&layer.hmax) {
            log::warn!(
                "layer {}x{} with height {} does not fit the tile cache format",
                layer.width,
                layer.height,
                layer.hmax
            );
            return Err(Status::invalid_param());
        }
        let header = TileCacheLayerHeader {
            tx,
            ty,
            tlayer,
            bmin: layer.bmin.to_array(),
            bmax: layer.bmax.to_array(),
            hmin: layer.hmin.clamp(0, 0xffff) as u16,
            hmax: layer.hmax as u16,
            width: layer.width as u8,
            height: layer.height as u8,
            minx: layer.minx.clamp(0, 255) as u8,
            maxx: layer.maxx.clamp(0, 255) as u8,
            miny: layer.miny.clamp(0, 255) as u8,
            maxy: layer.maxy.clamp(0, 255) as u8,
        };
        Ok(Self {
            header,
            heights: layer.heights.clone(),
            areas: layer.areas.clone(),
            cons: layer.cons.clone(),
        })
    }

    #[inline]
    pub fn index(&self, x: i32, y: i32) -> usize {
        (x + y * self.header.width as i32) as usize
    }

    pub fn is_walkable(&self, idx: usize) -> bool {
        self.heights[idx] != DT_TILECACHE_NULL_HEIGHT && self.areas[idx] != DT_TILECACHE_NULL_AREA
    }
}

/// Reads the header of a compressed layer blob
pub fn read_layer_header(data: &[u8]) -> Result<TileCacheLayerHeader> {
    TileCacheLayerHeader::read(&mut Cursor::new(data))
}

/// Serializes and compresses a layer
pub fn build_tile_cache_layer(comp: &dyn TileCacheCompressor, layer: &TileCacheLayer) -> Result<Vec<u8>> {
    let n = layer.header.cell_count();
    if layer.heights.len() != n || layer.areas.len() != n || layer.cons.len() != n {
        return Err(Status::invalid_param());
    }

    let mut grids = Vec::with_capacity(n * 3);
    grids.extend_from_slice(&layer.heights);
    grids.extend_from_slice(&layer.areas);
    grids.extend_from_slice(&layer.cons);

    let mut w = Cursor::new(Vec::with_capacity(LAYER_HEADER_SIZE + n));
    layer.header.write(&mut w)?;
    w.write_all(&comp.compress(&grids))?;
    Ok(w.into_inner())
}

/// Decompresses a blob written by [`build_tile_cache_layer`]
pub fn decompress_tile_cache_layer(comp: &dyn TileCacheCompressor, data: &[u8]) -> Result<TileCacheLayer> {
    let header = read_layer_header(data)?;
    let payload = data.get(LAYER_HEADER_SIZE..).ok_or(Status::invalid_param())?;
    let mut grids = comp.decompress(payload)?;

    let n = header.cell_count();
    if grids.len() != n * 3 {
        log::error!(
            "layer ({}, {}, {}) holds {} bytes, expected {}",
            header.tx,
            header.ty,
            header.tlayer,
            grids.len(),
            n * 3
        );
        return Err(Status::FAILURE);
    }
    let cons = grids.split_off(n * 2);
    let areas = grids.split_off(n);
    Ok(TileCacheLayer {
        header,
        heights: grids,
        areas,
        cons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::flat_layer;

    #[test]
    fn test_layer_blob_keeps_grids() {
        let mut layer = flat_layer(8, 0, 1, 0);
        layer.heights[3] = DT_TILECACHE_NULL_HEIGHT;
        layer.areas[5] = 7;

        let data = build_tile_cache_layer(&Lz4Compressor, &layer).unwrap();
        let header = read_layer_header(&data).unwrap();
        assert_eq!((header.tx, header.ty, header.tlayer), (0, 1, 0));

        let back = decompress_tile_cache_layer(&Lz4Compressor, &data).unwrap();
        assert_eq!(back, layer);
        assert!(!back.is_walkable(3));
        assert!(back.is_walkable(5));
    }

    #[test]
    fn test_flat_layer_compresses() {
        let layer = flat_layer(32, 0, 0, 0);
        let data = build_tile_cache_layer(&Lz4Compressor, &layer).unwrap();
        assert!(data.len() < LAYER_HEADER_SIZE + layer.header.cell_count());
    }

    #[test]
    fn test_rejects_bad_data() {
        let layer = flat_layer(4, 0, 0, 0);
        let mut data = build_tile_cache_layer(&Lz4Compressor, &layer).unwrap();

        let truncated = &data[..LAYER_HEADER_SIZE + 2];
        assert!(decompress_tile_cache_layer(&Lz4Compressor, truncated).is_err());

        data[0] ^= 0xff;
        let err = read_layer_header(&data).unwrap_err();
        assert!(err.has_detail(Status::WRONG_MAGIC));

        let mut short = layer.clone();
        short.cons.pop();
        assert!(build_tile_cache_layer(&Lz4Compressor, &short).is_err());
    }
}
