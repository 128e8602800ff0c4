pub mod d1;
pub mod d2;
pub mod terrain;

use std::io::{Read, Result};
use byteorder::{ReadBytesExt, LE};
use glam::{IVec2, IVec3};
use log::{debug, info};
use nonmax::NonMaxU16;
use crate::{read_boxed_slice, read_count, LevelFormat, LoadContext, ReadSeek, Readable, SECTOR_SIZE};

pub const AREA_PAGE_LIST: usize = 16;
/// `Spool.super_region` when a region loads no area data.
pub const SUPER_REGION_NONE: u8 = 0xFF;

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapHeader {
	pub cells_across: i32,
	pub cells_down: i32,
	/// World units per cell
	pub cell_size: i32,
	pub num_regions: i32,
	/// Cells per region side
	pub region_size: i32,
	pub num_cell_objects: i32,
	pub num_cell_data: i32,
	pub ambient_light_level: i32,
	pub light_source: [i16; 4],
}

impl MapHeader {
	/// The grid is usable: positive dimensions, at least one whole region each way,
	/// and world coordinates of every cell fit in an i32.
	pub fn is_valid(&self) -> bool {
		self.cell_size > 0
			&& self.region_size > 0
			&& self.cells_across >= self.region_size
			&& self.cells_down >= self.region_size
			&& (self.cells_across.max(self.cells_down) as i64 * self.cell_size as i64) <= (i32::MAX as i64)
	}

	pub fn regions_across(&self) -> usize {
		(self.cells_across / self.region_size.max(1)).max(0) as usize
	}

	pub fn regions_down(&self) -> usize {
		(self.cells_down / self.region_size.max(1)).max(0) as usize
	}

	pub fn cells_per_region(&self) -> usize {
		(self.region_size * self.region_size).max(0) as usize
	}

	/// Absolute cell coordinate of a cell inside a region.
	pub fn region_cell(&self, region: usize, cell: usize) -> IVec2 {
		let across = self.regions_across().max(1);
		let size = self.region_size;
		let region = IVec2::new((region % across) as i32, (region / across) as i32);
		region * size + IVec2::new(cell as i32 % size, cell as i32 / size)
	}

	/// Cell containing a world position. Positions far outside the grid give cells outside it.
	pub fn world_to_cell(&self, pos: IVec3) -> IVec2 {
		let size = self.cell_size.max(1) as i64;
		let cell = |v: i32, cells: i32| {
			let shifted = v as i64 + (cells / 2) as i64 * size;
			shifted.div_euclid(size).clamp(i32::MIN as i64, i32::MAX as i64) as i32
		};
		IVec2::new(cell(pos.x, self.cells_across), cell(pos.z, self.cells_down))
	}
}

/// A placed model instance with absolute world position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellObject {
	pub pos: IVec3,
	/// 64 steps per turn
	pub yaw: u8,
	pub model_index: u16,
}

/// Per-region spool record, sizes in sectors.
#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Spool {
	/// Sector offset into the spooled section
	pub offset: u16,
	pub connected_areas: [u8; 2],
	pub pvs_size: u8,
	/// Cell data, cell pointers, cell objects
	pub cell_data_size: [u8; 3],
	pub super_region: u8,
	pub num_connected_areas: u8,
	pub roadm_size: u8,
	pub roadh_size: u8,
}

/// Byte ranges of one spooled region, relative to the start of its spool data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionLayout {
	pub roadm: (u64, u64),
	pub roadh: (u64, u64),
	pub cell_ptrs: (u64, u64),
	pub cell_data: (u64, u64),
	pub cell_objects: (u64, u64),
	pub pvs: (u64, u64),
}

impl Spool {
	pub fn layout(&self) -> RegionLayout {
		let sizes = [
			self.roadm_size,
			self.roadh_size,
			self.cell_data_size[1],
			self.cell_data_size[0],
			self.cell_data_size[2],
			self.pvs_size,
		];
		let mut ranges = [(0, 0); 6];
		let mut pos = 0;
		for (range, size) in ranges.iter_mut().zip(sizes) {
			let len = size as u64 * SECTOR_SIZE;
			*range = (pos, len);
			pos += len;
		}
		let [roadm, roadh, cell_ptrs, cell_data, cell_objects, pvs] = ranges;
		RegionLayout { roadm, roadh, cell_ptrs, cell_data, cell_objects, pvs }
	}
}

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AreaData {
	/// Sector offset of the area's spooled texture pages
	pub gfx_offset: u16,
	pub model_offset: u16,
	pub music_offset: u16,
	pub ambient_offset: u16,
	pub model_size: u8,
	pub pad: u8,
	pub num_tpages: u8,
	pub ambient_size: u8,
	pub music_size: u8,
	pub music_samples_size: u8,
	pub music_id: u8,
	pub ambient_id: u8,
}

#[derive(Clone, Debug, Default)]
pub struct SpoolInfo {
	pub model_spool_buffer_size: i32,
	pub areas: Box<[AreaData]>,
	pub area_pages: Box<[[u8; AREA_PAGE_LIST]]>,
	/// Byte offset of each region's record in `spool_data`, `None` for regions without data
	pub region_offsets: Box<[Option<NonMaxU16>]>,
	spool_data: Box<[u8]>,
}

impl SpoolInfo {
	pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
		let model_spool_buffer_size = reader.read_i32::<LE>()?;
		let music_block_size = read_count(reader)?;
		crate::skip(reader, music_block_size)?;
		let num_areas = read_count(reader)?;
		let areas = read_boxed_slice(reader, num_areas)?;
		let area_pages = read_boxed_slice(reader, num_areas)?;
		let num_offsets = read_count(reader)?;
		let region_offsets = read_boxed_slice(reader, num_offsets)?;
		let spool_info_size = read_count(reader)?;
		let spool_data = read_boxed_slice(reader, spool_info_size)?;
		info!("spool info: {} areas, {} regions, {} bytes of records", num_areas, num_offsets, spool_info_size);
		Ok(Self { model_spool_buffer_size, areas, area_pages, region_offsets, spool_data })
	}

	pub fn spool(&self, region: usize) -> Option<Spool> {
		let offset = self.region_offsets.get(region).copied().flatten()?.get() as usize;
		let mut bytes = self.spool_data.get(offset..)?;
		Spool::read(&mut bytes).ok()
	}

	pub fn has_data(&self, region: usize) -> bool {
		self.spool(region).is_some()
	}

	/// Page indices of an area, limited by its page count.
	pub fn area_pages(&self, area: usize) -> Option<&[u8]> {
		let count = self.areas.get(area)?.num_tpages as usize;
		let pages = self.area_pages.get(area)?;
		Some(&pages[..count.min(AREA_PAGE_LIST)])
	}
}

/// State common to both map formats.
#[derive(Clone, Debug, Default)]
pub struct MapBase {
	pub header: MapHeader,
	pub spool_info: SpoolInfo,
}

/// Region grid of a level, one implementation per game.
pub trait LevelMap {
	fn base(&self) -> &MapBase;
	fn base_mut(&mut self) -> &mut MapBase;
	fn format(&self) -> LevelFormat;
	fn num_straddlers(&self) -> usize;
	fn is_region_loaded(&self, region: usize) -> bool;
	/// Loads the cell data of a region from the spooled section. Regions without data are left empty.
	fn spool_region(&mut self, reader: &mut dyn ReadSeek, ctx: &LoadContext, region: usize) -> Result<()>;
	fn free_region(&mut self, region: usize);
	/// Objects of one cell of a loaded region, in list order. Empty for unloaded regions.
	fn cell_objects(&self, region: usize, cell: usize) -> Box<dyn Iterator<Item = CellObject> + '_>;
	/// Ground height under a world position, 0 where nothing is known.
	fn map_height(&self, pos: IVec3) -> i32;

	fn header(&self) -> &MapHeader {
		&self.base().header
	}

	fn spool_info(&self) -> &SpoolInfo {
		&self.base().spool_info
	}

	fn read_spool_info(&mut self, reader: &mut dyn ReadSeek) -> Result<()> {
		self.base_mut().spool_info = SpoolInfo::read(&mut &mut *reader)?;
		Ok(())
	}

	fn regions_across(&self) -> usize {
		self.header().regions_across()
	}

	fn regions_down(&self) -> usize {
		self.header().regions_down()
	}

	fn region_count(&self) -> usize {
		self.regions_across() * self.regions_down()
	}

	fn region_index(&self, cell: IVec2) -> Option<usize> {
		let size = self.header().region_size;
		if cell.x < 0 || cell.y < 0 || size <= 0 {
			return None;
		}
		let (x, z) = ((cell.x / size) as usize, (cell.y / size) as usize);
		(x < self.regions_across() && z < self.regions_down()).then(|| z * self.regions_across() + x)
	}

	/// A region the spool info has no record for.
	fn is_region_empty(&self, region: usize) -> bool {
		!self.spool_info().has_data(region)
	}

	/// Area whose pages and models a region needs.
	fn region_area(&self, region: usize) -> Option<usize> {
		let spool = self.spool_info().spool(region)?;
		if spool.super_region == SUPER_REGION_NONE {
			return None;
		}
		let area = spool.super_region as usize;
		(area < self.spool_info().areas.len()).then_some(area)
	}

	fn free_all(&mut self) {
		for region in 0..self.region_count() {
			self.free_region(region);
		}
	}

	/// Row per region line, `O` for regions with data and `.` for empty ones.
	fn region_map(&self) -> String {
		let mut map = String::new();
		for z in 0..self.regions_down() {
			for x in 0..self.regions_across() {
				map.push(if self.is_region_empty(z * self.regions_across() + x) { '.' } else { 'O' });
			}
			map.push('\n');
		}
		map
	}

	fn total_cell_objects(&self, region: usize) -> usize {
		(0..self.header().cells_per_region()).map(|cell| self.cell_objects(region, cell).count()).sum()
	}
}

/// Reads the rest of the map lump after its header and picks the map implementation for the format.
pub fn read_map<R: Read>(reader: &mut R, header: MapHeader, format: LevelFormat) -> Result<Box<dyn LevelMap>> {
	debug!("map header: {:?}", header);
	let map: Box<dyn LevelMap> = match format {
		LevelFormat::Driver1 => Box::new(d1::Driver1Map::read(reader, header)?),
		LevelFormat::Driver2 => Box::new(d2::Driver2Map::read(reader, header)?),
	};
	info!(
		"map {}x{} cells, {}x{} regions, {} straddlers",
		header.cells_across,
		header.cells_down,
		map.regions_across(),
		map.regions_down(),
		map.num_straddlers(),
	);
	Ok(map)
}

/// Region block read from the spooled section at a layout range.
pub(crate) fn read_block<T: Readable>(
	reader: &mut dyn ReadSeek,
	start: u64,
	(offset, len): (u64, u64),
	item_size: u64,
) -> Result<Box<[T]>> {
	crate::seek_to(reader, start + offset)?;
	read_boxed_slice(&mut &mut *reader, (len / item_size) as usize)
}
