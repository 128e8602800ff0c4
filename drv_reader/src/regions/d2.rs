use std::io::{Read, Result};
use bitfield::bitfield;
use byteorder::{ReadBytesExt, LE};
use glam::{IVec2, IVec3, U16Vec3};
use log::{debug, warn};
use crate::{read_counted, LevelFormat, LoadContext, ReadSeek, Readable};
use super::{read_block, terrain::Terrain, CellObject, LevelMap, MapBase, MapHeader};

pub const EMPTY_CELL: u16 = 0xFFFF;

/// Cell object with its position stored relative to the near cell of the cell it is listed in.
#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedCellObject {
	/// y holds the 11th model bit in bit 0, the height in the rest
	pub pos: U16Vec3,
	/// yaw in bits 0-5, low model bits in 6-15
	pub value: u16,
}

impl PackedCellObject {
	/// Slot of a removed object, skipped while iterating.
	pub fn is_removed(&self) -> bool {
		self.value == 0xFFFF && self.pos.y & 1 != 0
	}
}

bitfield! {
	#[derive(Clone, Copy, PartialEq, Eq)]
	pub struct CellData(u16);
	impl Debug;
	/// Straddlers first, then region objects
	pub u16, object_index, _: 13, 0;
	/// Entry belongs to a level the iteration does not surface
	pub level_entry, _: 14;
	pub is_last, _: 15;
}

impl Readable for CellData {
	fn read<R: Read>(reader: &mut R) -> Result<Self> {
		Ok(Self(reader.read_u16::<LE>()?))
	}
}

/// Absolute position, yaw and model of a packed object, relative to `near_cell` in world units.
pub fn unpack_cell_object(packed: &PackedCellObject, near_cell: IVec2) -> CellObject {
	let wrap = |stored: u16, near: i32| near.wrapping_add((stored as i32).wrapping_sub(near) as i16 as i32);
	CellObject {
		pos: IVec3::new(
			wrap(packed.pos.x, near_cell.x),
			(packed.pos.y as i16 as i32) >> 1,
			wrap(packed.pos.z, near_cell.y),
		),
		yaw: (packed.value & 63) as u8,
		model_index: (packed.value >> 6) | ((packed.pos.y & 1) << 10),
	}
}

/// Spooled cell data of one region. The object pool is the whole sector-padded block,
/// so an index into the padding resolves to a zero record and only indices past the block end a list.
pub struct Driver2Region {
	pub cell_ptrs: Box<[u16]>,
	pub cell_data: Box<[CellData]>,
	pub cell_objects: Box<[PackedCellObject]>,
	pub pvs: Box<[u8]>,
	pub terrain: Option<Terrain>,
}

pub struct Driver2Map {
	base: MapBase,
	straddlers: Box<[PackedCellObject]>,
	regions: Vec<Option<Driver2Region>>,
}

/// Walks the object list of one cell. Holds the near cell its objects unpack against.
pub struct PackedCellIter<'a> {
	region: &'a Driver2Region,
	straddlers: &'a [PackedCellObject],
	cell_data: Option<usize>,
	near_cell: IVec2,
}

impl<'a> PackedCellIter<'a> {
	pub fn near_cell(&self) -> IVec2 {
		self.near_cell
	}

	fn object(&self, data: CellData) -> Option<&'a PackedCellObject> {
		let index = data.object_index() as usize;
		match index.checked_sub(self.straddlers.len()) {
			None => self.straddlers.get(index),
			Some(index) => self.region.cell_objects.get(index),
		}
	}
}

impl<'a> Iterator for PackedCellIter<'a> {
	type Item = &'a PackedCellObject;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let pos = self.cell_data?;
			let Some(&data) = self.region.cell_data.get(pos) else {
				warn!("cell data index {} out of range", pos);
				self.cell_data = None;
				return None;
			};
			self.cell_data = match data.is_last() {
				true => None,
				false => Some(pos + 1),
			};
			if data.level_entry() {
				continue;
			}
			match self.object(data) {
				Some(object) if object.is_removed() => continue,
				Some(object) => return Some(object),
				None => {
					warn!("cell object index {} out of range", data.object_index());
					self.cell_data = None;
					return None;
				},
			}
		}
	}
}

impl Driver2Map {
	pub fn read<R: Read>(reader: &mut R, header: MapHeader) -> Result<Self> {
		let straddlers = read_counted(reader)?;
		let num_regions = header.regions_across() * header.regions_down();
		Ok(Self {
			base: MapBase { header, ..Default::default() },
			straddlers,
			regions: (0..num_regions).map(|_| None).collect(),
		})
	}

	pub fn straddlers(&self) -> &[PackedCellObject] {
		&self.straddlers
	}

	pub fn region(&self, region: usize) -> Option<&Driver2Region> {
		self.regions.get(region)?.as_ref()
	}

	/// World position of a cell's lower corner, against which its objects unpack.
	pub fn near_cell(&self, cell: IVec2) -> IVec2 {
		let header = &self.base.header;
		cell.wrapping_sub(IVec2::new(header.cells_across / 2, header.cells_down / 2))
			.wrapping_mul(IVec2::splat(header.cell_size))
	}

	/// Iterator over the packed objects of a cell, `None` when the region is not loaded or the cell is empty.
	pub fn start_iterator(&self, region: usize, cell: usize) -> Option<PackedCellIter<'_>> {
		let loaded = self.region(region)?;
		let ptr = *loaded.cell_ptrs.get(cell)?;
		if ptr == EMPTY_CELL {
			return None;
		}
		Some(PackedCellIter {
			region: loaded,
			straddlers: &self.straddlers,
			cell_data: Some(ptr as usize),
			near_cell: self.near_cell(self.base.header.region_cell(region, cell)),
		})
	}
}

impl LevelMap for Driver2Map {
	fn base(&self) -> &MapBase {
		&self.base
	}

	fn base_mut(&mut self) -> &mut MapBase {
		&mut self.base
	}

	fn format(&self) -> LevelFormat {
		LevelFormat::Driver2
	}

	fn num_straddlers(&self) -> usize {
		self.straddlers.len()
	}

	fn is_region_loaded(&self, region: usize) -> bool {
		self.region(region).is_some()
	}

	fn spool_region(&mut self, reader: &mut dyn ReadSeek, ctx: &LoadContext, region: usize) -> Result<()> {
		if region >= self.regions.len() || self.is_region_loaded(region) {
			return Ok(());
		}
		let Some(spool) = self.base.spool_info.spool(region) else {
			return Ok(());
		};
		let start = ctx.spool_offset(spool.offset as u64);
		let layout = spool.layout();
		let cells = self.base.header.cells_per_region();
		let mut cell_ptrs = read_block::<u16>(reader, start, layout.cell_ptrs, 2)?.into_vec();
		cell_ptrs.resize(cells, EMPTY_CELL);
		let cell_data = read_block(reader, start, layout.cell_data, 2)?;
		let cell_objects = read_block(reader, start, layout.cell_objects, 8)?;
		let pvs = read_block(reader, start, layout.pvs, 1)?;
		let terrain = match layout.roadh.1 {
			0 => None,
			_ => {
				let block = read_block::<u8>(reader, start, layout.roadh, 1)?;
				Terrain::parse(&block).map_err(|e| warn!("region {} terrain: {}", region, e)).ok()
			},
		};
		debug!(
			"region {}: {} cell data, {} objects, pvs {} bytes",
			region,
			cell_data.len(),
			cell_objects.len(),
			pvs.len(),
		);
		self.regions[region] = Some(Driver2Region {
			cell_ptrs: cell_ptrs.into_boxed_slice(),
			cell_data,
			cell_objects,
			pvs,
			terrain,
		});
		Ok(())
	}

	fn free_region(&mut self, region: usize) {
		if let Some(slot) = self.regions.get_mut(region) {
			*slot = None;
		}
	}

	fn cell_objects(&self, region: usize, cell: usize) -> Box<dyn Iterator<Item = CellObject> + '_> {
		match self.start_iterator(region, cell) {
			Some(iter) => {
				let near_cell = iter.near_cell();
				Box::new(iter.map(move |packed| unpack_cell_object(packed, near_cell)))
			},
			None => Box::new(std::iter::empty()),
		}
	}

	fn map_height(&self, pos: IVec3) -> i32 {
		let header = &self.base.header;
		let cell = header.world_to_cell(pos);
		let Some(region) = self.region_index(cell) else {
			return 0;
		};
		let Some(terrain) = self.region(region).and_then(|region| region.terrain.as_ref()) else {
			return 0;
		};
		let corner = self.near_cell(header.region_cell(region, 0));
		terrain.height(pos, (pos.x.wrapping_sub(corner.x), pos.z.wrapping_sub(corner.y)))
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;
	use byteorder::{WriteBytesExt, LE};
	use super::*;
	use crate::regions::{terrain::tests::{flat, terrain_block}, tests::{header, spool_info_lump, write_header}, Spool};
	use crate::SECTOR_SIZE;

	fn packed(x: u16, y: u16, z: u16, value: u16) -> PackedCellObject {
		PackedCellObject { pos: U16Vec3::new(x, y, z), value }
	}

	fn write_packed(out: &mut Vec<u8>, object: &PackedCellObject) {
		for value in [object.pos.x, object.pos.y, object.pos.z, object.value] {
			out.write_u16::<LE>(value).unwrap();
		}
	}

	fn pad_sector(out: &mut Vec<u8>) -> u8 {
		let sectors = (out.len() as u64).div_ceil(SECTOR_SIZE).max(1);
		out.resize((sectors * SECTOR_SIZE) as usize, 0);
		sectors as u8
	}

	/// 2x2 regions of 2x2 cells, 1024 units per cell. Region 3 has data.
	fn test_map(
		straddlers: &[PackedCellObject],
		cell_ptrs: &[u16],
		cell_data: &[u16],
		objects: &[PackedCellObject],
		roadh: Option<Vec<u8>>,
	) -> (Driver2Map, Cursor<Vec<u8>>, LoadContext) {
		let header = header(4, 2, 1024);
		let mut lump = vec![];
		write_header(&mut lump, &header);
		lump.write_i32::<LE>(straddlers.len() as i32).unwrap();
		for straddler in straddlers {
			write_packed(&mut lump, straddler);
		}
		let mut reader = &lump[40..];
		let mut map = Driver2Map::read(&mut reader, header).unwrap();

		let mut spooled = vec![];
		let roadh_size = match roadh {
			Some(mut block) => {
				let sectors = pad_sector(&mut block);
				spooled.extend_from_slice(&block);
				sectors
			},
			None => 0,
		};
		let mut block = vec![];
		for &ptr in cell_ptrs {
			block.write_u16::<LE>(ptr).unwrap();
		}
		let ptrs_size = pad_sector(&mut block);
		spooled.extend_from_slice(&block);
		let mut block = vec![];
		for &data in cell_data {
			block.write_u16::<LE>(data).unwrap();
		}
		let data_size = pad_sector(&mut block);
		spooled.extend_from_slice(&block);
		let mut block = vec![];
		for object in objects {
			write_packed(&mut block, object);
		}
		let objects_size = pad_sector(&mut block);
		spooled.extend_from_slice(&block);

		let spool = Spool {
			offset: 1,
			cell_data_size: [data_size, ptrs_size, objects_size],
			roadh_size,
			super_region: 0xFF,
			..Default::default()
		};
		let info = spool_info_lump(&[None, None, None, Some(spool)], None);
		map.read_spool_info(&mut Cursor::new(info)).unwrap();

		let mut file = vec![0; SECTOR_SIZE as usize];
		file.extend_from_slice(&spooled);
		let mut ctx = LoadContext::new(LevelFormat::Driver2);
		ctx.lump_info.spooldata_offset = 0;
		(map, Cursor::new(file), ctx)
	}

	#[test]
	fn unpack_wraps_around_near_cell() {
		let object = packed(100, 0x0203, 0xFF00, (5 << 6) | 17);
		let near = IVec2::new(-2048, -2048);
		let unpacked = unpack_cell_object(&object, near);
		assert_eq!(unpacked.pos, IVec3::new(100, 0x101, -256));
		assert_eq!(unpacked.yaw, 17);
		assert_eq!(unpacked.model_index, 5 | (1 << 10));
	}

	#[test]
	fn unpack_depends_on_near_cell() {
		let object = packed(1000, 0, 2000, 1 << 6);
		let a = unpack_cell_object(&object, IVec2::ZERO);
		let b = unpack_cell_object(&object, IVec2::new(65536, -65536));
		assert_ne!(a, b);
		assert_eq!(b.pos, IVec3::new(66536, 0, -63536));
		assert_eq!(a.model_index, b.model_index);
	}

	#[test]
	fn negative_height() {
		let object = packed(0, (-200i16 << 1) as u16, 0, 0);
		assert_eq!(unpack_cell_object(&object, IVec2::ZERO).pos.y, -200);
	}

	#[test]
	fn near_cell_from_grid() {
		let (map, _, _) = test_map(&[], &[], &[], &[], None);
		assert_eq!(map.near_cell(IVec2::new(2, 2)), IVec2::ZERO);
		assert_eq!(map.near_cell(IVec2::new(0, 3)), IVec2::new(-2048, 1024));
	}

	#[test]
	fn unloaded_and_empty_regions() {
		let (mut map, mut file, ctx) = test_map(&[], &[0xFFFF; 4], &[], &[], None);
		assert!(map.is_region_empty(0));
		assert!(!map.is_region_empty(3));
		assert_eq!(map.cell_objects(3, 0).count(), 0);
		map.spool_region(&mut file, &ctx, 0).unwrap();
		assert!(!map.is_region_loaded(0));
		map.spool_region(&mut file, &ctx, 3).unwrap();
		assert!(map.is_region_loaded(3));
		assert_eq!(map.total_cell_objects(3), 0);
		assert_eq!(map.region_map(), "..\n.O\n");
	}

	#[test]
	fn iterates_straddlers_and_region_objects() {
		let straddlers = [packed(10, 0, 10, 7 << 6)];
		let objects = [packed(20, 0, 20, 8 << 6), packed(0, 1, 0, 0xFFFF), packed(30, 0, 30, 9 << 6)];
		//cell 0: level entry, straddler, region object 0. cell 1: removed slot, region object 2
		let cell_data = [0x4000 | 2, 0, 0x8000 | 1, 2, 0x8000 | 3];
		let (mut map, mut file, ctx) = test_map(&straddlers, &[0, 3, 0xFFFF, 0xFFFF], &cell_data, &objects, None);
		map.spool_region(&mut file, &ctx, 3).unwrap();
		let models = |cell| map.cell_objects(3, cell).map(|o| o.model_index).collect::<Vec<_>>();
		assert_eq!(models(0), vec![7, 8]);
		assert_eq!(models(1), vec![9]);
		assert!(models(2).is_empty());
		assert_eq!(map.total_cell_objects(3), 3);
		let iter = map.start_iterator(3, 1).unwrap();
		assert_eq!(iter.near_cell(), IVec2::new(1024, 0));
		assert_eq!(map.cell_objects(3, 1).next().unwrap().pos, IVec3::new(30, 0, 30));
		map.free_region(3);
		assert!(map.cell_objects(3, 0).next().is_none());
	}

	#[test]
	fn object_index_past_pool_ends_list() {
		//40 lands in the sector padding, 300 past the 256 record block
		let cell_data = [0, 40, 0x8000 | 300];
		let (mut map, mut file, ctx) = test_map(&[], &[0, 0xFFFF, 0xFFFF, 0xFFFF], &cell_data, &[packed(0, 0, 0, 1 << 6)], None);
		map.spool_region(&mut file, &ctx, 3).unwrap();
		assert_eq!(map.region(3).unwrap().cell_objects.len(), 256);
		let models = map.cell_objects(3, 0).map(|o| o.model_index).collect::<Vec<_>>();
		assert_eq!(models, vec![1, 0]);
	}

	#[test]
	fn height_from_spooled_terrain() {
		let roadh = terrain_block(0, &[], &[flat(-512)], &[], &[]);
		let (mut map, mut file, ctx) = test_map(&[], &[0xFFFF; 4], &[], &[], Some(roadh));
		let pos = IVec3::new(100, 0, 100);
		assert_eq!(map.map_height(pos), 0);
		map.spool_region(&mut file, &ctx, 3).unwrap();
		assert_eq!(map.map_height(pos), -512);
		assert_eq!(map.map_height(IVec3::new(-100, 0, -100)), 0);
	}
}
