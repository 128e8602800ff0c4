use std::io::{self, Read, Seek, SeekFrom};
use byteorder::{ReadBytesExt, LE};
use log::{debug, error, info, warn};
use thiserror::Error;
use crate::{
	align_up,
	models::{ModelObserver, ModelRegistry, NoObserver},
	regions::{self, LevelMap, MapHeader},
	seek_to,
	textures::TextureStore,
	LevelFormat, LevelLumpInfo, LoadContext, Readable, SECTOR_SIZE,
};

pub const LUMP_MODELS: i32 = 1;
pub const LUMP_MAP: i32 = 2;
pub const LUMP_TEXTURENAMES: i32 = 5;
pub const LUMP_ROADMAP: i32 = 7;
pub const LUMP_ROADS: i32 = 9;
pub const LUMP_JUNCTIONS: i32 = 10;
pub const LUMP_MODELNAMES: i32 = 12;
pub const LUMP_LOWDETAILTABLE: i32 = 21;
pub const LUMP_PALLET: i32 = 25;
pub const LUMP_SPOOLINFO: i32 = 26;
pub const LUMP_CAR_MODELS: i32 = 28;
pub const LUMP_STRAIGHTS2: i32 = 29;
pub const LUMP_CURVES2: i32 = 30;
pub const LUMP_JUNCTIONS2: i32 = 31;
pub const LUMP_JUNCTIONS2_NEW: i32 = 32;
pub const LUMP_TEXTUREINFO: i32 = 35;
pub const LUMP_END: i32 = -1;

const DRIVER1_ROAD_LUMPS: [i32; 3] = [LUMP_ROADMAP, LUMP_ROADS, LUMP_JUNCTIONS];
const DRIVER2_ROAD_LUMPS: [i32; 4] = [LUMP_STRAIGHTS2, LUMP_CURVES2, LUMP_JUNCTIONS2, LUMP_JUNCTIONS2_NEW];

#[derive(Error, Debug)]
pub enum LevelError {
	#[error("IO error: {0}")]
	Io(#[from] io::Error),
	#[error("not a level file: {0}")]
	NotALevel(String),
	#[error("bad map header: {0:?}")]
	BadMapHeader(MapHeader),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lump {
	pub id: i32,
	/// Absolute payload offset
	pub offset: u64,
	pub size: usize,
}

/// Reads the four top-level sections: lump directory, texture data, level data, spooled data.
fn read_sections<R: Read + Seek>(reader: &mut R) -> Result<LevelLumpInfo, LevelError> {
	let file_size = reader.seek(SeekFrom::End(0))?;
	let mut sections = [(0u64, 0u64); 4];
	let mut pos = 0;
	for (index, section) in sections.iter_mut().enumerate() {
		if pos + 8 > file_size {
			return Err(LevelError::NotALevel(format!("section {} header past end of file", index)));
		}
		seek_to(reader, pos)?;
		let kind = reader.read_i32::<LE>()?;
		let size = reader.read_i32::<LE>()?;
		let size = u64::try_from(size)
			.ok()
			.filter(|size| pos + 8 + size <= file_size)
			.ok_or_else(|| LevelError::NotALevel(format!("section {} (type {}) has size {}", index, kind, size)))?;
		debug!("section {} type {} at {} size {}", index, kind, pos + 8, size);
		*section = (pos + 8, size);
		pos = align_up(pos + 8 + size, SECTOR_SIZE);
	}
	let [(lumps_offset, lumps_size), (texdata_offset, texdata_size), (levdata_offset, levdata_size), (spooldata_offset, spooldata_size)] = sections;
	Ok(LevelLumpInfo {
		lumps_offset,
		lumps_size,
		texdata_offset,
		texdata_size,
		levdata_offset,
		levdata_size,
		spooldata_offset,
		spooldata_size,
	})
}

/// Lump entries of the directory section, in file order.
fn read_lumps<R: Read + Seek>(reader: &mut R, info: &LevelLumpInfo) -> io::Result<Vec<Lump>> {
	let end = info.lumps_offset + info.lumps_size;
	let mut pos = info.lumps_offset;
	let mut lumps = vec![];
	while pos + 8 <= end {
		seek_to(reader, pos)?;
		let id = reader.read_i32::<LE>()?;
		if id == LUMP_END {
			break;
		}
		let Ok(size) = usize::try_from(reader.read_i32::<LE>()?) else {
			warn!("lump {} at {} has a negative size, directory ends here", id, pos);
			break;
		};
		debug!("lump {} at {} size {}", id, pos + 8, size);
		lumps.push(Lump { id, offset: pos + 8, size });
		pos += 8 + align_up(size as u64, 4);
	}
	Ok(lumps)
}

/// Seeks to a lump and runs its reader. A lump that fails to decode is logged and the level loads without it.
fn load_lump<R: Read + Seek>(reader: &mut R, lump: Option<Lump>, read: impl FnOnce(&mut R, Lump) -> io::Result<()>) {
	let Some(lump) = lump else {
		return;
	};
	if let Err(e) = seek_to(reader, lump.offset).and_then(|_| read(reader, lump)) {
		error!("lump {} at {}: {}", lump.id, lump.offset, e);
	}
}

/// Driver 2 road lumps win, then Driver 1 road lumps, otherwise Driver 2.
pub fn detect_format(lumps: &[Lump]) -> LevelFormat {
	let has_any = |ids: &[i32]| lumps.iter().any(|lump| ids.contains(&lump.id));
	if has_any(&DRIVER2_ROAD_LUMPS) {
		LevelFormat::Driver2
	} else if has_any(&DRIVER1_ROAD_LUMPS) {
		LevelFormat::Driver1
	} else {
		LevelFormat::Driver2
	}
}

pub struct Level {
	pub ctx: LoadContext,
	pub lumps: Vec<Lump>,
	pub textures: TextureStore,
	pub models: ModelRegistry,
	pub map: Box<dyn LevelMap>,
}

impl Level {
	pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, LevelError> {
		Self::read_with(reader, None, Box::new(NoObserver))
	}

	pub fn read_with_format<R: Read + Seek>(reader: &mut R, format: LevelFormat) -> Result<Self, LevelError> {
		Self::read_with(reader, Some(format), Box::new(NoObserver))
	}

	/// Opens a level. Lumps are processed in dependency order, then the permanent texture pages are loaded.
	/// Only the section table, the lump directory and the map lump are required, anything else that fails
	/// to decode is logged and left out.
	pub fn read_with<R: Read + Seek>(
		reader: &mut R,
		format: Option<LevelFormat>,
		observer: Box<dyn ModelObserver>,
	) -> Result<Self, LevelError> {
		let lump_info = read_sections(reader)?;
		let lumps = read_lumps(reader, &lump_info)?;
		let format = format.unwrap_or_else(|| detect_format(&lumps));
		info!("level format: {:?}, {} lumps", format, lumps.len());
		let ctx = LoadContext { format, lump_info };
		let find = |id: i32| lumps.iter().find(|lump| lump.id == id).copied();

		let mut textures = TextureStore::default();
		load_lump(reader, find(LUMP_TEXTUREINFO), |reader, _| {
			textures = TextureStore::read_info(reader)?;
			Ok(())
		});
		load_lump(reader, find(LUMP_TEXTURENAMES), |reader, lump| textures.read_names(reader, lump.size));
		load_lump(reader, find(LUMP_PALLET), |reader, _| textures.read_palette_lump(reader, &ctx));

		let mut models = ModelRegistry::new(observer);
		load_lump(reader, find(LUMP_MODELNAMES), |reader, lump| models.read_names(reader, lump.size));
		load_lump(reader, find(LUMP_MODELS), |reader, _| models.read_models(reader));
		load_lump(reader, find(LUMP_LOWDETAILTABLE), |reader, lump| models.read_low_detail_table(reader, lump.size));
		load_lump(reader, find(LUMP_CAR_MODELS), |reader, _| models.read_car_models(reader));

		let Some(map_lump) = find(LUMP_MAP) else {
			return Err(LevelError::NotALevel("no map lump".into()));
		};
		seek_to(reader, map_lump.offset)?;
		let header = MapHeader::read(reader)?;
		if !header.is_valid() {
			return Err(LevelError::BadMapHeader(header));
		}
		let mut map = regions::read_map(reader, header, format)?;
		load_lump(reader, find(LUMP_SPOOLINFO), |reader, _| map.read_spool_info(reader));

		if let Err(e) = textures.load_permanent_pages(reader, &ctx) {
			error!("permanent pages: {}", e);
		}
		Ok(Self { ctx, lumps, textures, models, map })
	}

	/// Loads a region's cells, then the spooled texture pages and models of its area.
	pub fn spool_region<R: Read + Seek>(&mut self, reader: &mut R, region: usize) -> io::Result<()> {
		self.map.spool_region(reader, &self.ctx, region)?;
		let Some(area) = self.map.region_area(region) else {
			return Ok(());
		};
		let spool_info = self.map.spool_info();
		let data = spool_info.areas[area];
		if let Some(pages) = spool_info.area_pages(area) {
			seek_to(reader, self.ctx.spool_offset(data.gfx_offset as u64))?;
			self.textures.load_spooled_pages(reader, pages)?;
		}
		if data.model_size > 0 {
			seek_to(reader, self.ctx.spool_offset(data.model_offset as u64))?;
			let added = self.models.read_area_models(reader, data.model_size as usize * SECTOR_SIZE as usize)?;
			debug!("area {}: {} models", area, added);
		}
		Ok(())
	}

	/// Spools every region that has data, returning how many were loaded. A region that fails is logged and skipped.
	pub fn spool_all_regions<R: Read + Seek>(&mut self, reader: &mut R) -> usize {
		let mut loaded = 0;
		for region in 0..self.map.region_count() {
			if self.map.is_region_empty(region) {
				continue;
			}
			match self.spool_region(reader, region) {
				Ok(()) => loaded += 1,
				Err(e) => error!("region {}: {}", region, e),
			}
		}
		loaded
	}

	pub fn free_all(&mut self) {
		self.map.free_all();
		self.models.free_all();
		self.textures.free_all();
	}
}
