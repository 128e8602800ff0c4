use std::io::{Read, Result};
use glam::IVec3;
use log::{debug, warn};
use nonmax::NonMaxU16;
use crate::{read_counted, LevelFormat, LoadContext, ReadSeek, Readable};
use super::{read_block, CellObject, LevelMap, MapBase, MapHeader};

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawCellObject {
	pub pos: IVec3,
	pub pad: u8,
	pub yaw: u8,
	pub model_index: u16,
}

impl From<RawCellObject> for CellObject {
	fn from(raw: RawCellObject) -> Self {
		CellObject { pos: raw.pos, yaw: raw.yaw, model_index: raw.model_index }
	}
}

/// Linked list entry of a cell's objects.
#[derive(Readable, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellData {
	pub num: u16,
	pub next: Option<NonMaxU16>,
}

pub struct Driver1Region {
	pub cell_ptrs: Box<[Option<NonMaxU16>]>,
	pub cell_data: Box<[CellData]>,
	pub cell_objects: Box<[RawCellObject]>,
}

pub struct Driver1Map {
	base: MapBase,
	straddlers: Box<[RawCellObject]>,
	regions: Vec<Option<Driver1Region>>,
}

pub struct CellIter<'a> {
	region: &'a Driver1Region,
	straddlers: &'a [RawCellObject],
	cell_data: Option<usize>,
	/// Guards against lists that loop back on themselves
	remaining: usize,
}

impl<'a> Iterator for CellIter<'a> {
	type Item = CellObject;

	fn next(&mut self) -> Option<Self::Item> {
		let pos = self.cell_data?;
		self.remaining = self.remaining.checked_sub(1)?;
		let Some(data) = self.region.cell_data.get(pos) else {
			warn!("cell data index {} out of range", pos);
			self.cell_data = None;
			return None;
		};
		self.cell_data = data.next.map(|next| next.get() as usize);
		let index = data.num as usize;
		let object = match index.checked_sub(self.straddlers.len()) {
			None => self.straddlers.get(index),
			Some(index) => self.region.cell_objects.get(index),
		};
		match object {
			Some(&object) => Some(object.into()),
			None => {
				warn!("cell object index {} out of range", index);
				self.cell_data = None;
				None
			},
		}
	}
}

impl Driver1Map {
	pub fn read<R: Read>(reader: &mut R, header: MapHeader) -> Result<Self> {
		let straddlers = read_counted(reader)?;
		let num_regions = header.regions_across() * header.regions_down();
		Ok(Self {
			base: MapBase { header, ..Default::default() },
			straddlers,
			regions: (0..num_regions).map(|_| None).collect(),
		})
	}

	pub fn straddlers(&self) -> &[RawCellObject] {
		&self.straddlers
	}

	pub fn region(&self, region: usize) -> Option<&Driver1Region> {
		self.regions.get(region)?.as_ref()
	}

	pub fn start_iterator(&self, region: usize, cell: usize) -> Option<CellIter<'_>> {
		let loaded = self.region(region)?;
		let ptr = (*loaded.cell_ptrs.get(cell)?)?;
		Some(CellIter {
			region: loaded,
			straddlers: &self.straddlers,
			cell_data: Some(ptr.get() as usize),
			remaining: loaded.cell_data.len(),
		})
	}
}

impl LevelMap for Driver1Map {
	fn base(&self) -> &MapBase {
		&self.base
	}

	fn base_mut(&mut self) -> &mut MapBase {
		&mut self.base
	}

	fn format(&self) -> LevelFormat {
		LevelFormat::Driver1
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
		let mut cell_ptrs = read_block::<Option<NonMaxU16>>(reader, start, layout.cell_ptrs, 2)?.into_vec();
		cell_ptrs.resize(self.base.header.cells_per_region(), None);
		let cell_data = read_block(reader, start, layout.cell_data, 4)?;
		let cell_objects = read_block(reader, start, layout.cell_objects, 16)?;
		debug!("region {}: {} cell data, {} objects", region, cell_data.len(), cell_objects.len());
		self.regions[region] = Some(Driver1Region {
			cell_ptrs: cell_ptrs.into_boxed_slice(),
			cell_data,
			cell_objects,
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
			Some(iter) => Box::new(iter),
			None => Box::new(std::iter::empty()),
		}
	}

	/// No terrain data is kept for Driver 1 regions.
	fn map_height(&self, _pos: IVec3) -> i32 {
		0
	}
}
