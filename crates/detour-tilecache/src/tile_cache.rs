//! Tile cache for Detour
//!
//! The [`TileCache`] stores compressed layers per tile and a pool of
//! temporary obstacles. Adding or removing an obstacle only queues a
//! request; [`TileCache::update`] turns requests into a list of touched
//! tiles and rebuilds one of them into the navigation mesh per call.

use std::collections::HashMap;
use std::fmt;

use detour::{NavMesh, PolyRef, Result, Status};
use recast_common::{ilog2, next_pow2, overlap_bounds};

use crate::tile_cache_builder::{build_nav_mesh_tile_data, mark_obstacle, DefaultMeshProcess, TileCacheMeshProcess};
use crate::tile_cache_data::{
    decompress_tile_cache_layer, read_layer_header, Lz4Compressor, TileCacheCompressor, TileCacheLayer,
    TileCacheLayerHeader,
};

/// Obstacle requests queued between updates
const MAX_REQUESTS: usize = 64;
/// Tiles waiting for a rebuild
const MAX_UPDATE: usize = 64;
/// Tiles a single obstacle may touch
const MAX_TOUCHED_TILES: usize = 8;

/// Tile cache configuration
///
/// `width` and `height` are the tile size in cells. The walkable values
/// are in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheParams {
    pub origin: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub max_simplification_error: f32,
    pub max_tiles: i32,
    pub max_obstacles: i32,
}

impl Default for TileCacheParams {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            cs: 0.3,
            ch: 0.2,
            width: 48,
            height: 48,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            max_simplification_error: 1.3,
            max_tiles: 256,
            max_obstacles: 128,
        }
    }
}

impl TileCacheParams {
    fn is_valid(&self) -> bool {
        self.origin.iter().all(|v| v.is_finite())
            && self.cs > 0.0
            && self.ch > 0.0
            && (1..=255).contains(&self.width)
            && (1..=255).contains(&self.height)
            && self.max_tiles > 0
            && self.max_obstacles > 0
            && self.max_obstacles <= 0xffff
    }

    /// World size of a tile along x and z
    pub fn tile_size(&self) -> (f32, f32) {
        (self.width as f32 * self.cs, self.height as f32 * self.cs)
    }
}

/// Reference to a compressed tile, `(salt << tile_bits) | index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressedTileRef(u32);

impl CompressedTileRef {
    pub const NULL: CompressedTileRef = CompressedTileRef(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CompressedTileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reference to an obstacle, `(salt << 16) | index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleRef(u32);

impl ObstacleRef {
    pub const NULL: ObstacleRef = ObstacleRef(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn salt(self) -> u16 {
        (self.0 >> 16) as u16
    }

    fn index(self) -> usize {
        (self.0 & 0xffff) as usize
    }
}

impl fmt::Display for ObstacleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Shape of a temporary obstacle
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum ObstacleShape {
    /// Upright cylinder standing on `pos`
    Cylinder { pos: [f32; 3], radius: f32, height: f32 },
    /// Axis aligned box
    Box { bmin: [f32; 3], bmax: [f32; 3] },
    /// Box rotated around the y axis
    OrientedBox {
        center: [f32; 3],
        half_extents: [f32; 3],
        y_radians: f32,
    },
}

impl ObstacleShape {
    /// Conservative axis aligned bounds
    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        match *self {
            ObstacleShape::Cylinder { pos, radius, height } => (
                [pos[0] - radius, pos[1], pos[2] - radius],
                [pos[0] + radius, pos[1] + height, pos[2] + radius],
            ),
            ObstacleShape::Box { bmin, bmax } => (bmin, bmax),
            ObstacleShape::OrientedBox {
                center, half_extents, ..
            } => {
                let r = half_extents[0].max(half_extents[2]) * 1.41;
                (
                    [center[0] - r, center[1] - half_extents[1], center[2] - r],
                    [center[0] + r, center[1] + half_extents[1], center[2] + r],
                )
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObstacleState {
    #[default]
    Empty,
    /// Waiting for its tiles to be rebuilt with it
    Processing,
    /// Carved into all the tiles it touches
    Processed,
    /// Waiting for its tiles to be rebuilt without it
    Removing,
}

/// Obstacle slot
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub shape: ObstacleShape,
    pub state: ObstacleState,
    pub salt: u16,
    touched: Vec<CompressedTileRef>,
    pending: Vec<CompressedTileRef>,
    next: Option<usize>,
}

impl Obstacle {
    /// Tiles the obstacle is carved into
    pub fn touched(&self) -> &[CompressedTileRef] {
        &self.touched
    }

    /// Tiles still waiting for a rebuild on behalf of this obstacle
    pub fn pending(&self) -> &[CompressedTileRef] {
        &self.pending
    }

    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        self.shape.bounds()
    }
}

/// Compressed tile slot
#[derive(Debug, Clone, Default)]
pub struct CompressedTile {
    pub salt: u32,
    pub header: Option<TileCacheLayerHeader>,
    pub data: Vec<u8>,
    index: usize,
    next: Option<usize>,
}

impl CompressedTile {
    pub fn is_loaded(&self) -> bool {
        self.header.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObstacleAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct ObstacleRequest {
    action: ObstacleAction,
    reference: ObstacleRef,
}

/// Compressed tile layers plus temporary obstacles
pub struct TileCache {
    params: TileCacheParams,
    tile_bits: u32,
    salt_bits: u32,
    tiles: Vec<CompressedTile>,
    next_free_tile: Option<usize>,
    pos_lookup: HashMap<(i32, i32), Vec<usize>>,
    obstacles: Vec<Obstacle>,
    next_free_obstacle: Option<usize>,
    requests: Vec<ObstacleRequest>,
    update: Vec<CompressedTileRef>,
    compressor: Box<dyn TileCacheCompressor>,
    mesh_process: Box<dyn TileCacheMeshProcess>,
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("params", &self.params)
            .field("tiles", &self.tiles().count())
            .field("obstacles", &self.obstacles().count())
            .field("requests", &self.requests.len())
            .field("update", &self.update.len())
            .finish()
    }
}

impl TileCache {
    /// Creates a tile cache with LZ4 compression and the
    /// [`DefaultMeshProcess`]
    pub fn new(params: TileCacheParams) -> Result<Self> {
        Self::with_parts(params, Box::new(Lz4Compressor), Box::new(DefaultMeshProcess::new()))
    }

    pub fn with_parts(
        params: TileCacheParams,
        compressor: Box<dyn TileCacheCompressor>,
        mesh_process: Box<dyn TileCacheMeshProcess>,
    ) -> Result<Self> {
        if !params.is_valid() {
            log::warn!("invalid tile cache parameters: {:?}", params);
            return Err(Status::invalid_param());
        }

        let tile_bits = ilog2(next_pow2(params.max_tiles as u32));
        let salt_bits = 32u32.saturating_sub(tile_bits).min(31);

        let max_tiles = params.max_tiles as usize;
        let tiles = (0..max_tiles)
            .map(|i| CompressedTile {
                salt: 1,
                index: i,
                next: (i + 1 < max_tiles).then_some(i + 1),
                ..Default::default()
            })
            .collect();

        let max_obstacles = params.max_obstacles as usize;
        let obstacles = (0..max_obstacles)
            .map(|i| Obstacle {
                shape: ObstacleShape::Box {
                    bmin: [0.0; 3],
                    bmax: [0.0; 3],
                },
                state: ObstacleState::Empty,
                salt: 1,
                touched: Vec::new(),
                pending: Vec::new(),
                next: (i + 1 < max_obstacles).then_some(i + 1),
            })
            .collect();

        log::debug!(
            "tile cache with {} tiles of {}x{} cells and {} obstacles",
            max_tiles,
            params.width,
            params.height,
            max_obstacles
        );

        Ok(Self {
            params,
            tile_bits,
            salt_bits,
            tiles,
            next_free_tile: Some(0),
            pos_lookup: HashMap::new(),
            obstacles,
            next_free_obstacle: Some(0),
            requests: Vec::with_capacity(MAX_REQUESTS),
            update: Vec::with_capacity(MAX_UPDATE),
            compressor,
            mesh_process,
        })
    }

    /// Replaces the hook that assigns polygon areas and flags
    pub fn set_mesh_process(&mut self, mesh_process: Box<dyn TileCacheMeshProcess>) {
        self.mesh_process = mesh_process;
    }

    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    pub fn compressor(&self) -> &dyn TileCacheCompressor {
        self.compressor.as_ref()
    }

    // Tiles

    pub fn encode_tile_id(&self, salt: u32, it: u32) -> CompressedTileRef {
        CompressedTileRef::new((salt << self.tile_bits) | it)
    }

    pub fn decode_tile_id_salt(&self, r: CompressedTileRef) -> u32 {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        (r.id() >> self.tile_bits) & salt_mask
    }

    pub fn decode_tile_id_tile(&self, r: CompressedTileRef) -> u32 {
        let tile_mask = (1u32 << self.tile_bits) - 1;
        r.id() & tile_mask
    }

    /// Number of tile slots
    pub fn get_tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Tile slot `i`, loaded or not
    pub fn get_tile(&self, i: usize) -> Option<&CompressedTile> {
        self.tiles.get(i)
    }

    /// Loaded tiles
    pub fn tiles(&self) -> impl Iterator<Item = &CompressedTile> {
        self.tiles.iter().filter(|t| t.is_loaded())
    }

    pub fn get_tile_ref(&self, tile: &CompressedTile) -> CompressedTileRef {
        if !tile.is_loaded() {
            return CompressedTileRef::NULL;
        }
        self.encode_tile_id(tile.salt, tile.index as u32)
    }

    fn tile_index(&self, r: CompressedTileRef) -> Option<usize> {
        if r.is_null() {
            return None;
        }
        let idx = self.decode_tile_id_tile(r) as usize;
        let tile = self.tiles.get(idx)?;
        (tile.is_loaded() && tile.salt == self.decode_tile_id_salt(r)).then_some(idx)
    }

    pub fn get_tile_by_ref(&self, r: CompressedTileRef) -> Option<&CompressedTile> {
        self.tile_index(r).map(|i| &self.tiles[i])
    }

    /// All layers stored for tile column `(tx, ty)`
    pub fn get_tiles_at(&self, tx: i32, ty: i32) -> Vec<CompressedTileRef> {
        self.pos_lookup
            .get(&(tx, ty))
            .map(|cell| cell.iter().map(|&i| self.get_tile_ref(&self.tiles[i])).collect())
            .unwrap_or_default()
    }

    pub fn get_tile_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<CompressedTileRef> {
        self.pos_lookup.get(&(tx, ty))?.iter().find_map(|&i| {
            let tile = &self.tiles[i];
            let header = tile.header.as_ref()?;
            (header.tlayer == tlayer).then(|| self.get_tile_ref(tile))
        })
    }

    /// Stores a compressed layer blob
    pub fn add_tile(&mut self, data: Vec<u8>) -> Result<CompressedTileRef> {
        let header = read_layer_header(&data)?;
        if self.get_tile_at(header.tx, header.ty, header.tlayer).is_some() {
            return Err(Status::FAILURE | Status::ALREADY_OCCUPIED);
        }

        let idx = self.next_free_tile.ok_or(Status::FAILURE | Status::OUT_OF_MEMORY)?;
        self.next_free_tile = self.tiles[idx].next;

        let (tx, ty, tlayer) = (header.tx, header.ty, header.tlayer);
        let tile = &mut self.tiles[idx];
        tile.header = Some(header);
        tile.data = data;
        tile.next = None;
        self.pos_lookup.entry((tx, ty)).or_default().push(idx);

        let r = self.get_tile_ref(&self.tiles[idx]);
        log::debug!("cached layer ({}, {}, {}) as {}", tx, ty, tlayer, r);
        Ok(r)
    }

    /// Removes a tile, returning its compressed data
    pub fn remove_tile(&mut self, r: CompressedTileRef) -> Result<Vec<u8>> {
        let idx = self.tile_index(r).ok_or(Status::invalid_param())?;

        let tile = &mut self.tiles[idx];
        if let Some(header) = tile.header.take() {
            if let Some(cell) = self.pos_lookup.get_mut(&(header.tx, header.ty)) {
                cell.retain(|&i| i != idx);
                if cell.is_empty() {
                    self.pos_lookup.remove(&(header.tx, header.ty));
                }
            }
        }

        let salt_mask = (1u32 << self.salt_bits) - 1;
        tile.salt = (tile.salt + 1) & salt_mask;
        if tile.salt == 0 {
            tile.salt = 1;
        }
        let data = std::mem::take(&mut tile.data);
        tile.next = self.next_free_tile;
        self.next_free_tile = Some(idx);
        Ok(data)
    }

    /// Decompresses the layer of a stored tile
    pub fn decompress_tile(&self, r: CompressedTileRef) -> Result<TileCacheLayer> {
        let tile = self.get_tile_by_ref(r).ok_or(Status::invalid_param())?;
        decompress_tile_cache_layer(self.compressor.as_ref(), &tile.data)
    }

    /// Bounds of the usable rectangle of a layer
    pub fn calc_tight_tile_bounds(&self, header: &TileCacheLayerHeader) -> ([f32; 3], [f32; 3]) {
        let cs = self.params.cs;
        (
            [
                header.bmin[0] + header.minx as f32 * cs,
                header.bmin[1],
                header.bmin[2] + header.miny as f32 * cs,
            ],
            [
                header.bmin[0] + (header.maxx as f32 + 1.0) * cs,
                header.bmax[1],
                header.bmin[2] + (header.maxy as f32 + 1.0) * cs,
            ],
        )
    }

    /// Tiles whose tight bounds overlap the box
    pub fn query_tiles(&self, bmin: &[f32; 3], bmax: &[f32; 3]) -> Vec<CompressedTileRef> {
        let (tw, th) = self.params.tile_size();
        let orig = &self.params.origin;
        let tx0 = ((bmin[0] - orig[0]) / tw).floor() as i32;
        let tx1 = ((bmax[0] - orig[0]) / tw).floor() as i32;
        let ty0 = ((bmin[2] - orig[2]) / th).floor() as i32;
        let ty1 = ((bmax[2] - orig[2]) / th).floor() as i32;

        let mut result = Vec::new();
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                let Some(cell) = self.pos_lookup.get(&(tx, ty)) else {
                    continue;
                };
                for &i in cell {
                    let tile = &self.tiles[i];
                    let Some(header) = tile.header.as_ref() else {
                        continue;
                    };
                    let (tbmin, tbmax) = self.calc_tight_tile_bounds(header);
                    if overlap_bounds(bmin, bmax, &tbmin, &tbmax) {
                        result.push(self.get_tile_ref(tile));
                    }
                }
            }
        }
        result
    }

    // Obstacles

    pub fn encode_obstacle_ref(&self, salt: u16, idx: usize) -> ObstacleRef {
        ObstacleRef::new(((salt as u32) << 16) | idx as u32)
    }

    /// Number of obstacle slots
    pub fn get_obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    /// Obstacle slot `i`, in use or not
    pub fn get_obstacle(&self, i: usize) -> Option<&Obstacle> {
        self.obstacles.get(i)
    }

    /// Obstacles in use with their references
    pub fn obstacles(&self) -> impl Iterator<Item = (ObstacleRef, &Obstacle)> {
        self.obstacles
            .iter()
            .enumerate()
            .filter(|(_, ob)| ob.state != ObstacleState::Empty)
            .map(|(i, ob)| (self.encode_obstacle_ref(ob.salt, i), ob))
    }

    pub fn get_obstacle_ref(&self, i: usize) -> Option<ObstacleRef> {
        let ob = self.obstacles.get(i)?;
        (ob.state != ObstacleState::Empty).then(|| self.encode_obstacle_ref(ob.salt, i))
    }

    fn obstacle_index(&self, r: ObstacleRef) -> Option<usize> {
        if r.is_null() {
            return None;
        }
        let idx = r.index();
        let ob = self.obstacles.get(idx)?;
        (ob.salt == r.salt() && ob.state != ObstacleState::Empty).then_some(idx)
    }

    pub fn get_obstacle_by_ref(&self, r: ObstacleRef) -> Option<&Obstacle> {
        self.obstacle_index(r).map(|i| &self.obstacles[i])
    }

    pub fn get_obstacle_bounds(&self, obstacle: &Obstacle) -> ([f32; 3], [f32; 3]) {
        obstacle.bounds()
    }

    /// Queues a cylinder obstacle standing on `pos`
    pub fn add_obstacle(&mut self, pos: &[f32; 3], radius: f32, height: f32) -> Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::Cylinder {
            pos: *pos,
            radius,
            height,
        })
    }

    /// Queues an axis aligned box obstacle
    pub fn add_box_obstacle(&mut self, bmin: &[f32; 3], bmax: &[f32; 3]) -> Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::Box {
            bmin: *bmin,
            bmax: *bmax,
        })
    }

    /// Queues a box obstacle rotated by `y_radians` around the y axis
    pub fn add_oriented_box_obstacle(
        &mut self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        y_radians: f32,
    ) -> Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::OrientedBox {
            center: *center,
            half_extents: *half_extents,
            y_radians,
        })
    }

    /// Queues an obstacle of any shape
    ///
    /// Fails with [`Status::BUFFER_TOO_SMALL`] while the request queue is
    /// full; calling [`TileCache::update`] drains it.
    pub fn add_obstacle_shape(&mut self, shape: ObstacleShape) -> Result<ObstacleRef> {
        if self.requests.len() >= MAX_REQUESTS {
            return Err(Status::FAILURE | Status::BUFFER_TOO_SMALL);
        }

        let idx = self
            .next_free_obstacle
            .ok_or(Status::FAILURE | Status::OUT_OF_MEMORY)?;
        let ob = &mut self.obstacles[idx];
        self.next_free_obstacle = ob.next;

        ob.shape = shape;
        ob.state = ObstacleState::Processing;
        ob.touched.clear();
        ob.pending.clear();
        ob.next = None;

        let r = self.encode_obstacle_ref(self.obstacles[idx].salt, idx);
        self.requests.push(ObstacleRequest {
            action: ObstacleAction::Add,
            reference: r,
        });
        log::trace!("queued obstacle {} {:?}", r, shape);
        Ok(r)
    }

    /// Queues the removal of an obstacle
    pub fn remove_obstacle(&mut self, r: ObstacleRef) -> Result<()> {
        if r.is_null() {
            return Ok(());
        }
        if self.requests.len() >= MAX_REQUESTS {
            return Err(Status::FAILURE | Status::BUFFER_TOO_SMALL);
        }
        if self.obstacle_index(r).is_none() {
            return Err(Status::invalid_param());
        }

        self.requests.push(ObstacleRequest {
            action: ObstacleAction::Remove,
            reference: r,
        });
        log::trace!("queued removal of obstacle {}", r);
        Ok(())
    }

    /// No queued requests and no tiles waiting for a rebuild
    pub fn is_up_to_date(&self) -> bool {
        self.update.is_empty() && self.requests.is_empty()
    }

    /// Processes queued obstacle requests and rebuilds at most one tile.
    ///
    /// Returns `true` once nothing is left to do. Obstacle bookkeeping
    /// advances even when the tile rebuild fails.
    pub fn update(&mut self, nav: &mut NavMesh) -> Result<bool> {
        if self.update.is_empty() {
            self.process_requests();
        }

        let mut result = Ok(());
        if !self.update.is_empty() {
            let r = self.update.remove(0);
            result = self.build_nav_mesh_tile(r, nav);

            for i in 0..self.obstacles.len() {
                let ob = &mut self.obstacles[i];
                if matches!(ob.state, ObstacleState::Processing | ObstacleState::Removing) {
                    ob.pending.retain(|&t| t != r);
                    self.settle_obstacle(i);
                }
            }
        }

        result.map(|_| self.is_up_to_date())
    }

    fn process_requests(&mut self) {
        let requests = std::mem::take(&mut self.requests);
        for req in requests {
            let Some(idx) = self.obstacle_index(req.reference) else {
                continue;
            };

            let (bmin, bmax) = self.obstacles[idx].bounds();
            let mut touched = self.query_tiles(&bmin, &bmax);
            if touched.len() > MAX_TOUCHED_TILES {
                log::warn!(
                    "obstacle {} touches {} tiles, carving only {}",
                    req.reference,
                    touched.len(),
                    MAX_TOUCHED_TILES
                );
                touched.truncate(MAX_TOUCHED_TILES);
            }

            let ob = &mut self.obstacles[idx];
            match req.action {
                ObstacleAction::Add => ob.touched = touched,
                ObstacleAction::Remove => ob.state = ObstacleState::Removing,
            }

            ob.pending.clear();
            for &t in &ob.touched {
                if self.update.len() >= MAX_UPDATE {
                    break;
                }
                if !self.update.contains(&t) {
                    self.update.push(t);
                }
                ob.pending.push(t);
            }
            self.settle_obstacle(idx);
        }
    }

    /// Advances an obstacle whose pending tiles have all been rebuilt
    fn settle_obstacle(&mut self, idx: usize) {
        let ob = &mut self.obstacles[idx];
        if !ob.pending.is_empty() {
            return;
        }
        match ob.state {
            ObstacleState::Processing => ob.state = ObstacleState::Processed,
            ObstacleState::Removing => {
                ob.state = ObstacleState::Empty;
                ob.salt = ob.salt.wrapping_add(1);
                if ob.salt == 0 {
                    ob.salt = 1;
                }
                ob.touched.clear();
                ob.next = self.next_free_obstacle;
                self.next_free_obstacle = Some(idx);
            }
            ObstacleState::Empty | ObstacleState::Processed => {}
        }
    }

    // Navmesh

    /// Rebuilds the navmesh tile of a cached layer with the current
    /// obstacles carved in
    ///
    /// The previous navmesh tile at the same location is replaced. When
    /// obstacles block the whole layer the location is left empty.
    pub fn build_nav_mesh_tile(&mut self, r: CompressedTileRef, nav: &mut NavMesh) -> Result<()> {
        let mut layer = self.decompress_tile(r)?;

        let (cs, ch) = (self.params.cs, self.params.ch);
        let mut carved = 0;
        for ob in &self.obstacles {
            if matches!(ob.state, ObstacleState::Processing | ObstacleState::Processed) && ob.touched.contains(&r) {
                carved += mark_obstacle(&mut layer, cs, ch, &ob.shape);
            }
        }

        let data = build_nav_mesh_tile_data(&layer, &self.params, self.mesh_process.as_mut()).map_err(|e| {
            log::error!("rebuilding tile {} failed: {}", r, e);
            Status::FAILURE
        })?;

        let header = &layer.header;
        if let Some(old) = nav.get_tile_ref_at(header.tx, header.ty, header.tlayer) {
            nav.remove_tile(old)?;
        }
        match data {
            Some(data) => {
                nav.add_tile(data, PolyRef::NULL)?;
            }
            None => log::debug!(
                "layer ({}, {}, {}) is fully blocked",
                header.tx,
                header.ty,
                header.tlayer
            ),
        }

        log::debug!(
            "rebuilt tile ({}, {}, {}) with {} carved cells",
            header.tx,
            header.ty,
            header.tlayer,
            carved
        );
        Ok(())
    }

    /// Rebuilds every layer of tile column `(tx, ty)`
    pub fn build_nav_mesh_tiles_at(&mut self, tx: i32, ty: i32, nav: &mut NavMesh) -> Result<()> {
        for r in self.get_tiles_at(tx, ty) {
            self.build_nav_mesh_tile(r, nav)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::{cache_params, flat_layer, tiled_nav_mesh, TILE_CELLS};
    use crate::tile_cache_data::build_tile_cache_layer;
    use detour::{NavMeshQuery, QueryFilter};

    fn cache_with_tiles(columns: &[(i32, i32)]) -> TileCache {
        let mut tc = TileCache::new(cache_params(16)).unwrap();
        for &(tx, ty) in columns {
            let data = build_tile_cache_layer(&Lz4Compressor, &flat_layer(TILE_CELLS, tx, ty, 0)).unwrap();
            tc.add_tile(data).unwrap();
        }
        tc
    }

    fn run_updates(tc: &mut TileCache, nav: &mut NavMesh) {
        for _ in 0..16 {
            if tc.update(nav).unwrap() {
                return;
            }
        }
        panic!("tile cache did not settle");
    }

    fn over_poly_at(nav: &NavMesh, pos: &[f32; 3]) -> bool {
        let query = NavMeshQuery::new(nav);
        let filter = QueryFilter::default();
        query
            .find_nearest_poly(pos, &[2.0, 1.0, 2.0], &filter)
            .unwrap()
            .map_or(false, |n| n.over_poly)
    }

    fn poly_count(nav: &NavMesh) -> usize {
        nav.tiles().map(|t| t.polys.len()).sum()
    }

    #[test]
    fn test_rejects_invalid_params() {
        let mut params = cache_params(16);
        params.cs = 0.0;
        assert!(TileCache::new(params).is_err());

        let mut params = cache_params(16);
        params.width = 300;
        assert!(TileCache::new(params).is_err());
    }

    #[test]
    fn test_add_and_remove_tiles() {
        let mut tc = TileCache::new(cache_params(16)).unwrap();
        let layer = flat_layer(TILE_CELLS, 2, 3, 0);
        let data = build_tile_cache_layer(&Lz4Compressor, &layer).unwrap();

        let r = tc.add_tile(data.clone()).unwrap();
        assert!(!r.is_null());
        assert_eq!(tc.get_tile_at(2, 3, 0), Some(r));
        assert_eq!(tc.get_tile_at(2, 3, 1), None);
        assert_eq!(tc.get_tiles_at(2, 3), vec![r]);

        let err = tc.add_tile(data.clone()).unwrap_err();
        assert!(err.has_detail(Status::ALREADY_OCCUPIED));

        assert_eq!(tc.decompress_tile(r).unwrap(), layer);
        assert_eq!(tc.remove_tile(r).unwrap(), data);
        assert!(tc.get_tile_by_ref(r).is_none());
        assert!(tc.get_tiles_at(2, 3).is_empty());
        assert!(tc.remove_tile(r).is_err());

        // The slot is reused with a new salt.
        let r2 = tc.add_tile(data).unwrap();
        assert_ne!(r, r2);
        assert_eq!(tc.decode_tile_id_tile(r), tc.decode_tile_id_tile(r2));
    }

    #[test]
    fn test_tiles_run_out() {
        let mut tc = TileCache::new(cache_params(2)).unwrap();
        for tx in 0..2 {
            let data = build_tile_cache_layer(&Lz4Compressor, &flat_layer(4, tx, 0, 0)).unwrap();
            tc.add_tile(data).unwrap();
        }
        let data = build_tile_cache_layer(&Lz4Compressor, &flat_layer(4, 5, 0, 0)).unwrap();
        let err = tc.add_tile(data).unwrap_err();
        assert!(err.has_detail(Status::OUT_OF_MEMORY));
    }

    #[test]
    fn test_query_tiles_uses_tight_bounds() {
        let tc = cache_with_tiles(&[(0, 0), (1, 0)]);
        let first = tc.get_tile_at(0, 0, 0).unwrap();
        let second = tc.get_tile_at(1, 0, 0).unwrap();

        assert_eq!(tc.query_tiles(&[1.0, 0.0, 1.0], &[2.0, 1.0, 2.0]), vec![first]);
        assert_eq!(tc.query_tiles(&[9.0, 0.0, 1.0], &[10.0, 1.0, 2.0]), vec![second]);

        let both = tc.query_tiles(&[7.0, 0.0, 1.0], &[9.0, 1.0, 2.0]);
        assert_eq!(both.len(), 2);

        assert!(tc.query_tiles(&[1.0, 5.0, 1.0], &[2.0, 6.0, 2.0]).is_empty());
    }

    #[test]
    fn test_obstacle_bounds() {
        let cyl = ObstacleShape::Cylinder {
            pos: [1.0, 2.0, 3.0],
            radius: 0.5,
            height: 2.0,
        };
        assert_eq!(cyl.bounds(), ([0.5, 2.0, 2.5], [1.5, 4.0, 3.5]));

        let obb = ObstacleShape::OrientedBox {
            center: [0.0, 1.0, 0.0],
            half_extents: [1.0, 0.5, 2.0],
            y_radians: 0.3,
        };
        let (bmin, bmax) = obb.bounds();
        assert!((bmax[0] - 2.82).abs() < 1e-5);
        assert!((bmin[2] + 2.82).abs() < 1e-5);
        assert_eq!((bmin[1], bmax[1]), (0.5, 1.5));
    }

    #[test]
    fn test_cached_tiles_build_connected_navmesh() {
        let mut tc = cache_with_tiles(&[(0, 0), (1, 0)]);
        let mut nav = tiled_nav_mesh();
        tc.build_nav_mesh_tiles_at(0, 0, &mut nav).unwrap();
        tc.build_nav_mesh_tiles_at(1, 0, &mut nav).unwrap();
        assert_eq!(nav.tile_count(), 2);

        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&nav);
        let start = [1.0, 0.0, 4.0];
        let end = [15.0, 0.0, 4.0];
        let start_ref = query.find_nearest_poly(&start, &[1.0; 3], &filter).unwrap().unwrap().reference;
        let end_ref = query.find_nearest_poly(&end, &[1.0; 3], &filter).unwrap().unwrap().reference;
        let (path, status) = query.find_path(start_ref, end_ref, &start, &end, &filter, 64).unwrap();
        assert!(!status.has_detail(Status::PARTIAL_RESULT));
        assert_eq!(path.last(), Some(&end_ref));
    }

    #[test]
    fn test_obstacle_lifecycle() {
        let mut tc = cache_with_tiles(&[(0, 0)]);
        let mut nav = tiled_nav_mesh();
        tc.build_nav_mesh_tiles_at(0, 0, &mut nav).unwrap();
        let center = [4.0, 0.0, 4.0];
        assert!(over_poly_at(&nav, &center));
        let polys_before = poly_count(&nav);

        let ob = tc.add_obstacle(&center, 1.0, 2.0).unwrap();
        assert_eq!(tc.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processing);
        assert!(!tc.is_up_to_date());

        run_updates(&mut tc, &mut nav);
        let obstacle = tc.get_obstacle_by_ref(ob).unwrap();
        assert_eq!(obstacle.state, ObstacleState::Processed);
        assert_eq!(obstacle.touched(), &[tc.get_tile_at(0, 0, 0).unwrap()]);
        assert!(obstacle.pending().is_empty());
        assert!(!over_poly_at(&nav, &center));
        assert!(over_poly_at(&nav, &[1.0, 0.0, 1.0]));

        tc.remove_obstacle(ob).unwrap();
        assert_eq!(tc.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processed);
        run_updates(&mut tc, &mut nav);
        assert!(tc.get_obstacle_by_ref(ob).is_none());
        assert_eq!(tc.obstacles().count(), 0);

        assert!(over_poly_at(&nav, &center));
        assert_eq!(poly_count(&nav), polys_before);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut tc = cache_with_tiles(&[(0, 0)]);
        let mut nav = tiled_nav_mesh();
        tc.add_box_obstacle(&[3.0, 0.0, 3.0], &[5.0, 1.0, 5.0]).unwrap();
        run_updates(&mut tc, &mut nav);
        let polys = poly_count(&nav);

        let r = tc.get_tile_at(0, 0, 0).unwrap();
        tc.build_nav_mesh_tile(r, &mut nav).unwrap();
        tc.build_nav_mesh_tile(r, &mut nav).unwrap();
        assert_eq!(nav.tile_count(), 1);
        assert_eq!(poly_count(&nav), polys);
    }

    #[test]
    fn test_fully_blocked_tile_leaves_hole() {
        let mut tc = cache_with_tiles(&[(0, 0)]);
        let mut nav = tiled_nav_mesh();
        tc.build_nav_mesh_tiles_at(0, 0, &mut nav).unwrap();
        assert_eq!(nav.tile_count(), 1);

        tc.add_box_obstacle(&[-1.0, -1.0, -1.0], &[9.0, 1.0, 9.0]).unwrap();
        run_updates(&mut tc, &mut nav);
        assert_eq!(nav.tile_count(), 0);
    }

    #[test]
    fn test_request_queue_full() {
        let mut params = cache_params(16);
        params.max_obstacles = 100;
        let mut tc = TileCache::new(params).unwrap();
        let mut nav = tiled_nav_mesh();

        // No tiles under these, so they settle without rebuilds.
        for i in 0..MAX_REQUESTS {
            tc.add_obstacle(&[100.0 + i as f32, 0.0, 100.0], 0.5, 1.0).unwrap();
        }
        let err = tc.add_obstacle(&[0.0; 3], 0.5, 1.0).unwrap_err();
        assert!(err.has_detail(Status::BUFFER_TOO_SMALL));
        let (first, _) = tc.obstacles().next().unwrap();
        assert!(tc.remove_obstacle(first).unwrap_err().has_detail(Status::BUFFER_TOO_SMALL));

        assert!(tc.update(&mut nav).unwrap());
        assert!(tc
            .obstacles()
            .all(|(_, ob)| ob.state == ObstacleState::Processed));
        assert!(tc.add_obstacle(&[0.0; 3], 0.5, 1.0).is_ok());
    }

    #[test]
    fn test_obstacle_pool_exhausted() {
        let mut tc = TileCache::new(cache_params(16)).unwrap();
        for i in 0..8 {
            tc.add_obstacle(&[i as f32, 0.0, 0.0], 0.5, 1.0).unwrap();
        }
        let err = tc.add_obstacle(&[0.0; 3], 0.5, 1.0).unwrap_err();
        assert!(err.has_detail(Status::OUT_OF_MEMORY));
        assert_eq!(tc.get_obstacle_count(), 8);
    }

    #[test]
    fn test_stale_obstacle_refs() {
        let mut tc = TileCache::new(cache_params(16)).unwrap();
        let mut nav = tiled_nav_mesh();
        assert!(tc.remove_obstacle(ObstacleRef::NULL).is_ok());

        let ob = tc.add_obstacle(&[50.0, 0.0, 50.0], 0.5, 1.0).unwrap();
        run_updates(&mut tc, &mut nav);
        tc.remove_obstacle(ob).unwrap();
        run_updates(&mut tc, &mut nav);

        let err = tc.remove_obstacle(ob).unwrap_err();
        assert!(err.has_detail(Status::INVALID_PARAM));

        // The freed slot comes back under a new salt.
        let again = tc.add_obstacle(&[50.0, 0.0, 50.0], 0.5, 1.0).unwrap();
        assert_ne!(again, ob);
        assert!(tc.get_obstacle_by_ref(ob).is_none());
        assert!(tc.get_obstacle_by_ref(again).is_some());
    }

    #[test]
    fn test_custom_mesh_process() {
        let mut tc = cache_with_tiles(&[(0, 0)]);
        tc.set_mesh_process(Box::new(|params: &mut detour::NavMeshCreateParams| {
            for area in params.poly_areas.iter_mut() {
                *area = 7;
            }
        }));
        let mut nav = tiled_nav_mesh();
        tc.build_nav_mesh_tiles_at(0, 0, &mut nav).unwrap();
        let tile = nav.tiles().next().unwrap();
        assert!(tile.polys.iter().all(|p| p.area == 7));
    }
}
