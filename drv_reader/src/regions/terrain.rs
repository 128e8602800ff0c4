use std::{f64::consts::TAU, io::Result};
use byteorder::{ByteOrder, LE};
use glam::IVec3;
use crate::{invalid_data, read_boxed_slice, Readable};

/// Surface tiles per region side.
pub const SURFACE_DIM: usize = 64;
/// World units per surface tile, as a shift.
pub const SURFACE_TILE_SHIFT: i32 = 10;
const SURFACE_TABLE_OFFSET: usize = 8;

pub const SURFACE_SEA: i16 = -1;
pub const SURFACE_BSP: i16 = 0x4000;
pub const SURFACE_INDEX_MASK: i16 = 0x1fff;

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Plane {
	pub surface: u16,
	pub a: i16,
	pub b: i16,
	pub c: i16,
	pub d: i32,
}

impl Plane {
	pub fn height_at(&self, x: i32, z: i32) -> i32 {
		let d = self.d;
		if ((d >> 1) ^ d) & 0x40000000 != 0 {
			return d ^ 0x40000000;
		}
		if self.b == 0 {
			return 0;
		}
		let (a, b, c) = (self.a as i64, self.b as i64, self.c as i64);
		(-(a * x as i64 + c * z as i64) / b - d as i64) as i32
	}
}

/// BSP node split by a line through the tile. Leaves carry a plane index in the low bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Node(pub u32);

impl Node {
	/// 4096 steps per turn, 11 bits used.
	pub fn angle(self) -> u32 {
		self.0 & 0x7ff
	}

	/// Signed 12 bits.
	pub fn dist(self) -> i32 {
		((self.0 << 9) as i32) >> 20
	}

	/// Relative index of the far child.
	pub fn offset(self) -> usize {
		((self.0 >> 23) & 0xff) as usize
	}

	pub fn is_node(self) -> bool {
		self.0 & 0x80000000 != 0
	}

	pub fn leaf_surface(self) -> i16 {
		self.0 as u16 as i16
	}
}

/// Sine and cosine in 1/4096 units for an angle in 1/4096 turns.
fn rcossin(angle: u32) -> (i64, i64) {
	let radians = angle as f64 / 4096.0 * TAU;
	((radians.sin() * 4096.0).round() as i64, (radians.cos() * 4096.0).round() as i64)
}

/// Height data of one region: a surface per tile, resolved through BSP nodes to planes.
#[derive(Clone, Debug, Default)]
pub struct Terrain {
	pub surfaces: Box<[i16]>,
	pub planes: Box<[Plane]>,
	pub bsp: Box<[i16]>,
	pub nodes: Box<[Node]>,
}

fn section(block: &[u8], start: usize, end: usize) -> Result<&[u8]> {
	block
		.get(start..end)
		.ok_or_else(|| invalid_data(format!("terrain section {}..{} outside block of {} bytes", start, end, block.len())))
}

impl Terrain {
	/// Parses a road heights block: four i16 header words, the surface table, then planes, bsp lists and nodes.
	pub fn parse(block: &[u8]) -> Result<Self> {
		let header = section(block, 0, SURFACE_TABLE_OFFSET)?;
		let offset = |word: usize| LE::read_u16(&header[word * 2..]) as usize;
		let (planes_ofs, bsp_ofs, nodes_ofs) = (offset(1), offset(2), offset(3));
		let surface_end = SURFACE_TABLE_OFFSET + SURFACE_DIM * SURFACE_DIM * 2;
		let mut surfaces = section(block, SURFACE_TABLE_OFFSET, surface_end)?;
		let mut planes = section(block, planes_ofs, bsp_ofs.max(planes_ofs))?;
		let num_planes = planes.len() / 12;
		let mut bsp = section(block, bsp_ofs, nodes_ofs.max(bsp_ofs))?;
		let bsp_len = bsp.len() / 2;
		let nodes = section(block, nodes_ofs, block.len().max(nodes_ofs))?;
		Ok(Self {
			surfaces: read_boxed_slice(&mut surfaces, SURFACE_DIM * SURFACE_DIM)?,
			planes: read_boxed_slice(&mut planes, num_planes)?,
			bsp: read_boxed_slice(&mut bsp, bsp_len)?,
			nodes: nodes.chunks_exact(4).map(|chunk| Node(LE::read_u32(chunk))).collect(),
		})
	}

	fn descend(&self, start: usize, x: i32, z: i32) -> Option<i16> {
		let mut index = start;
		loop {
			let node = *self.nodes.get(index)?;
			if !node.is_node() {
				return Some(node.leaf_surface());
			}
			let (sin, cos) = rcossin(node.angle());
			let dot = x as i64 * sin + z as i64 * cos;
			index += match dot < node.dist() as i64 * 4096 {
				true => 1,
				false => node.offset().max(1),
			};
		}
	}

	/// Plane under a position, `tile` being the surface table coordinate.
	pub fn plane_at(&self, tile: (usize, usize), x: i32, z: i32) -> Option<&Plane> {
		let mut surface = *self.surfaces.get(tile.1 * SURFACE_DIM + tile.0)?;
		if surface == SURFACE_SEA {
			return None;
		}
		//several levels stacked on one tile, use the first
		if surface < 0 {
			surface = *self.bsp.get((surface & SURFACE_INDEX_MASK) as usize)?;
		}
		if surface & SURFACE_BSP != 0 {
			surface = self.descend((surface & SURFACE_INDEX_MASK) as usize, x, z)?;
		}
		if surface < 0 {
			return None;
		}
		self.planes.get(surface as usize)
	}

	/// Height at a world position, `local` being the position relative to the region corner.
	pub fn height(&self, pos: IVec3, local: (i32, i32)) -> i32 {
		let tile = |v: i32| ((v >> SURFACE_TILE_SHIFT) as usize).min(SURFACE_DIM - 1);
		match self.plane_at((tile(local.0), tile(local.1)), pos.x, pos.z) {
			Some(plane) => plane.height_at(pos.x, pos.z),
			None => 0,
		}
	}
}
