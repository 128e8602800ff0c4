use std::io::{Read, Result, Seek, SeekFrom};
use arrayvec::ArrayVec;
use byteorder::{ReadBytesExt, LE};
use glam::IVec2;
use log::{debug, error, info, warn};
use crate::{
	align_up, codec::{self, ChannelOrder, TEXPAGE_4BIT_SIZE, TEXPAGE_DIM, TEXPAGE_NUM_PIXELS, TEXPAGE_ROW_BYTES},
	invalid_data, read_bytes, read_boxed_slice, read_count, seek_to, LevelFormat, LoadContext, NameTable,
	Readable, SECTOR_SIZE,
};

/// Palettes stored in a spooled page record.
pub const MAX_PAGE_CLUTS: usize = 63;
/// Extra palette slots per detail, indexed by palette number.
pub const MAX_EXTRA_CLUTS: usize = 32;
/// Texture ids one extra palette can be shared by.
pub const MAX_CLUT_TEXTURES: usize = 32;
pub const MAX_PAGE_LIST: usize = 16;
pub const SPOOLED_PAGE_PADDING: usize = 28;
/// Worst case for a page of literals: one control byte per 128 texel bytes.
const MAX_COMPRESSED_PAGE_SIZE: usize = TEXPAGE_4BIT_SIZE + TEXPAGE_4BIT_SIZE / 128;
/// Fixed size of a spooled page, a multiple of 512.
pub const SPOOLED_PAGE_SIZE: usize = 4 + MAX_PAGE_CLUTS * 32 + SPOOLED_PAGE_PADDING + TEXPAGE_4BIT_SIZE;

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Clut {
	pub colors: [u16; 16],
}

#[derive(Readable, Clone, Copy, Debug, Default)]
pub struct PagePos {
	pub x: u16,
	pub y: u16,
}

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TexInfo {
	pub id: u16,
	/// Offset into the texture names lump
	pub name_offset: u16,
	pub x: u8,
	pub y: u8,
	/// 0 means 256
	pub width: u8,
	/// 0 means 256
	pub height: u8,
}

impl TexInfo {
	pub fn width(&self) -> usize {
		match self.width {
			0 => TEXPAGE_DIM,
			w => w as usize,
		}
	}

	pub fn height(&self) -> usize {
		match self.height {
			0 => TEXPAGE_DIM,
			h => h as usize,
		}
	}
}

#[derive(Clone, Debug)]
pub struct TextureDetail {
	pub info: TexInfo,
	/// Index into TextureStore.extra_palettes, by palette number
	pub extra_palettes: [Option<usize>; MAX_EXTRA_CLUTS],
}

impl TextureDetail {
	fn new(info: TexInfo) -> Self {
		Self { info, extra_palettes: [None; MAX_EXTRA_CLUTS] }
	}
}

pub struct PageBitmap {
	/// 4-bit texel indices, low nibble is the left texel
	pub data: Box<[u8; TEXPAGE_4BIT_SIZE]>,
	pub palettes: Box<[Clut]>,
	/// Bytes the page record took in the stream
	pub stream_size: u64,
}

impl PageBitmap {
	pub fn texel(&self, x: usize, y: usize) -> u8 {
		let byte = self.data[y * TEXPAGE_ROW_BYTES + x / 2];
		match x & 1 {
			0 => byte & 0xF,
			_ => byte >> 4,
		}
	}
}

pub struct TexturePage {
	pub id: usize,
	pub pos: PagePos,
	pub details: Box<[TextureDetail]>,
	bitmap: Option<PageBitmap>,
}

fn read_palettes<R: Read>(reader: &mut R) -> Result<Box<[Clut]>> {
	let num_palettes = read_count(reader)?;
	read_boxed_slice(reader, num_palettes)
}

impl TexturePage {
	pub fn new(id: usize, pos: PagePos, details: Vec<TexInfo>) -> Self {
		let details = details.into_iter().map(TextureDetail::new).collect();
		Self { id, pos, details, bitmap: None }
	}

	/// Reads the detail count and detail rectangles of one page.
	pub fn read_header<R: Read>(reader: &mut R, id: usize, pos: PagePos) -> Result<Self> {
		let num_details = read_count(reader)?;
		let details = read_boxed_slice::<_, TexInfo>(reader, num_details)?;
		Ok(Self::new(id, pos, details.into_vec()))
	}

	/// Loads texels and palettes. A page that is already loaded is skipped over in the stream.
	pub fn load_bitmap<R: Read + Seek>(&mut self, reader: &mut R, spooled: bool) -> Result<()> {
		if let Some(bitmap) = &self.bitmap {
			reader.seek(SeekFrom::Current(bitmap.stream_size as i64))?;
			return Ok(());
		}
		let start = reader.stream_position()?;
		let (data, palettes) = match spooled {
			true => {
				let num_palettes = read_count(reader)?;
				let palettes = <[Clut; MAX_PAGE_CLUTS]>::read(reader)?;
				crate::skip(reader, SPOOLED_PAGE_PADDING)?;
				let data = read_bytes::<_, TEXPAGE_4BIT_SIZE>(reader)?;
				if num_palettes > MAX_PAGE_CLUTS {
					warn!("page {} claims {} palettes, keeping {}", self.id, num_palettes, MAX_PAGE_CLUTS);
				}
				(data, palettes[..num_palettes.min(MAX_PAGE_CLUTS)].into())
			},
			false => {
				let palettes = read_palettes(reader)?;
				let image_start = reader.stream_position()?;
				let mut compressed = Vec::with_capacity(MAX_COMPRESSED_PAGE_SIZE);
				reader.by_ref().take(MAX_COMPRESSED_PAGE_SIZE as u64).read_to_end(&mut compressed)?;
				let mut data = Box::new([0u8; TEXPAGE_4BIT_SIZE]);
				let consumed = codec::unpack(&compressed, &mut data[..])
					.ok_or_else(|| invalid_data(format!("page {}: compressed texels end early", self.id)))?;
				//compressed block is padded to the sector size, continue right after the used bytes
				seek_to(reader, image_start + consumed as u64)?;
				(data, palettes)
			},
		};
		let stream_size = reader.stream_position()? - start;
		debug!("page {} ({}) datasize={}", self.id, if spooled { "spooled" } else { "compressed" }, stream_size);
		self.bitmap = Some(PageBitmap { data, palettes, stream_size });
		Ok(())
	}

	pub fn bitmap(&self) -> Option<&PageBitmap> {
		self.bitmap.as_ref()
	}

	pub fn is_loaded(&self) -> bool {
		self.bitmap.is_some()
	}

	pub fn detail_count(&self) -> usize {
		self.details.len()
	}

	pub fn detail(&self, index: usize) -> Option<&TextureDetail> {
		self.details.get(index)
	}

	pub fn find_detail(&self, names: &NameTable, name: &str) -> Option<usize> {
		self.details.iter().position(|detail| names.name_at(detail.info.name_offset as usize) == Some(name))
	}

	/// Writes one detail into a full-page RGBA buffer, flipped vertically.
	/// Without `palette`, the page palette at the detail's index is used.
	/// Returns false without writing anything if the detail, bitmap or palette is missing.
	pub fn convert_detail_to_rgba(
		&self,
		dest: &mut [[u8; 4]],
		detail: usize,
		palette: Option<&Clut>,
		order: ChannelOrder,
		restore_transparency_key: bool,
	) -> bool {
		let Some(info) = self.details.get(detail).map(|detail| detail.info) else {
			error!("page {}: cannot apply palette to non-existent detail {}", self.id, detail);
			return false;
		};
		let Some(bitmap) = &self.bitmap else {
			error!("page {}: bitmap not loaded", self.id);
			return false;
		};
		let Some(palette) = palette.or_else(|| bitmap.palettes.get(detail)) else {
			error!("page {}: no palette for detail {}", self.id, detail);
			return false;
		};
		if dest.len() < TEXPAGE_NUM_PIXELS {
			error!("page {}: destination holds {} pixels, need {}", self.id, dest.len(), TEXPAGE_NUM_PIXELS);
			return false;
		}
		let x_end = (info.x as usize + info.width()).min(TEXPAGE_DIM);
		let y_end = (info.y as usize + info.height()).min(TEXPAGE_DIM);
		for y in info.y as usize..y_end {
			let row = (TEXPAGE_DIM - y - 1) * TEXPAGE_DIM;
			for x in info.x as usize..x_end {
				let color = palette.colors[bitmap.texel(x, y) as usize];
				dest[row + x] = codec::color_to_rgba(color, order, restore_transparency_key);
			}
		}
		true
	}
}

#[derive(Clone, Debug)]
pub struct ExtraPalette {
	pub palette: i32,
	/// Page as recorded, not necessarily an existing one
	pub page: i32,
	/// Texture ids sharing this palette
	pub textures: ArrayVec<i32, MAX_CLUT_TEXTURES>,
	pub clut: Clut,
}

/// Palette lump record. Driver 1 records have no `clut_number`.
#[derive(Clone, Copy, Debug)]
struct PaletteInfo {
	palette: i32,
	texnum: i32,
	tpage: i32,
	clut_number: i32,
}

impl PaletteInfo {
	fn read<R: Read>(reader: &mut R, format: LevelFormat) -> Result<Self> {
		let palette = reader.read_i32::<LE>()?;
		let texnum = reader.read_i32::<LE>()?;
		let tpage = reader.read_i32::<LE>()?;
		let clut_number = match format {
			LevelFormat::Driver1 => -1,
			LevelFormat::Driver2 => reader.read_i32::<LE>()?,
		};
		Ok(Self { palette, texnum, tpage, clut_number })
	}
}

/// `x` is a page index, `y` the byte size of its record.
pub type PageListEntry = IVec2;

#[derive(Default)]
pub struct TextureStore {
	pub pages: Box<[TexturePage]>,
	pub num_textures: i32,
	pub permanent_pages: ArrayVec<PageListEntry, MAX_PAGE_LIST>,
	pub special_pages: ArrayVec<PageListEntry, MAX_PAGE_LIST>,
	pub names: NameTable,
	/// Entries are only ever appended, details refer to them by index
	pub extra_palettes: Vec<ExtraPalette>,
}

fn read_page_list<R: Read>(reader: &mut R) -> Result<ArrayVec<PageListEntry, MAX_PAGE_LIST>> {
	let count = read_count(reader)?.min(MAX_PAGE_LIST);
	let list = <[IVec2; MAX_PAGE_LIST]>::read(reader)?;
	Ok(list[..count].iter().copied().collect())
}

impl TextureStore {
	/// Reads the texture info lump: page positions, page details and the permanent/special page lists.
	pub fn read_info<R: Read>(reader: &mut R) -> Result<Self> {
		let num_pages = read_count(reader)?;
		let num_textures = reader.read_i32::<LE>()?;
		info!("texture pages: {}, textures: {}", num_pages, num_textures);
		let positions = read_boxed_slice::<_, PagePos>(reader, num_pages + 1)?;
		let pages = (0..num_pages)
			.map(|id| TexturePage::read_header(reader, id, positions[id]))
			.collect::<Result<Vec<_>>>()?
			.into_boxed_slice();
		let permanent_pages = read_page_list(reader)?;
		let special_pages = read_page_list(reader)?;
		info!("permanent pages: {}, special pages: {}", permanent_pages.len(), special_pages.len());
		Ok(TextureStore {
			pages,
			num_textures,
			permanent_pages,
			special_pages,
			names: NameTable::default(),
			extra_palettes: vec![],
		})
	}

	pub fn read_names<R: Read>(&mut self, reader: &mut R, size: usize) -> Result<()> {
		self.names = NameTable::read(reader, size)?;
		Ok(())
	}

	/// A page that fails to load is logged and left unloaded, the next one starts at its own sector.
	fn load_page_list<R: Read + Seek>(&mut self, reader: &mut R, list: &[PageListEntry]) -> Result<()> {
		for entry in list {
			let start = reader.stream_position()?;
			match self.pages.get_mut(entry.x as usize) {
				Some(page) => {
					if let Err(e) = page.load_bitmap(reader, false) {
						error!("page {}: {}", entry.x, e);
					}
				},
				None => error!("page list refers to missing page {}", entry.x),
			}
			seek_to(reader, start + align_up(entry.y.max(0) as u64, SECTOR_SIZE))?;
		}
		Ok(())
	}

	/// Loads the compressed permanent pages, then the special (car) pages from the next free sector.
	pub fn load_permanent_pages<R: Read + Seek>(&mut self, reader: &mut R, ctx: &LoadContext) -> Result<()> {
		let start = ctx.lump_info.texdata_offset;
		seek_to(reader, start)?;
		info!("loading permanent pages ({})", self.permanent_pages.len());
		let permanent = self.permanent_pages.clone();
		self.load_page_list(reader, &permanent)?;
		let sectors = permanent.iter().map(|entry| align_up(entry.y.max(0) as u64, SECTOR_SIZE) / SECTOR_SIZE).sum::<u64>();
		seek_to(reader, (start / SECTOR_SIZE + sectors) * SECTOR_SIZE)?;
		info!("loading special pages ({})", self.special_pages.len());
		let special = self.special_pages.clone();
		self.load_page_list(reader, &special)
	}

	fn detail_mut(&mut self, page: i32, texnum: i32) -> Option<&mut TextureDetail> {
		let page = self.pages.get_mut(usize::try_from(page).ok()?)?;
		page.details.get_mut(usize::try_from(texnum).ok()?)
	}

	fn link_extra_palette(&mut self, entry: usize, texnum: i32) {
		let ExtraPalette { palette, page, .. } = self.extra_palettes[entry];
		let Some(slot) = usize::try_from(palette).ok().filter(|&slot| slot < MAX_EXTRA_CLUTS) else {
			warn!("palette number {} out of range", palette);
			return;
		};
		match self.detail_mut(page, texnum) {
			Some(detail) => detail.extra_palettes[slot] = Some(entry),
			None => warn!("palette {} refers to missing detail {} of page {}", palette, texnum, page),
		}
	}

	/// Reads the palette lump, adding extra palettes and linking them to details.
	pub fn read_palette_lump<R: Read>(&mut self, reader: &mut R, ctx: &LoadContext) -> Result<()> {
		let total = read_count(reader)?;
		if total == 0 {
			return Ok(());
		}
		info!("total cluts: {}", total);
		let mut added = 0;
		loop {
			let record = PaletteInfo::read(reader, ctx.format)?;
			if record.palette == -1 {
				break;
			}
			if record.clut_number == -1 {
				//always appended, later records address entries by position
				let clut = Clut::read(reader)?;
				let mut textures = ArrayVec::new();
				textures.push(record.texnum);
				self.extra_palettes.push(ExtraPalette { palette: record.palette, page: record.tpage, textures, clut });
				self.link_extra_palette(self.extra_palettes.len() - 1, record.texnum);
				added += 1;
				if ctx.format == LevelFormat::Driver1 && added >= total {
					break;
				}
			} else {
				let entry = record.clut_number as usize;
				let Some(extra) = self.extra_palettes.get_mut(entry) else {
					warn!("palette record refers to missing clut {}", record.clut_number);
					continue;
				};
				if extra.textures.try_push(record.texnum).is_err() {
					warn!("clut {} is shared by too many textures", record.clut_number);
				}
				self.link_extra_palette(entry, record.texnum);
			}
		}
		info!("added cluts: {}", added);
		Ok(())
	}

	pub fn page_count(&self) -> usize {
		self.pages.len()
	}

	pub fn page(&self, index: usize) -> Option<&TexturePage> {
		self.pages.get(index)
	}

	pub fn page_mut(&mut self, index: usize) -> Option<&mut TexturePage> {
		self.pages.get_mut(index)
	}

	/// First detail with this name across all pages, as (page, detail).
	pub fn find_detail(&self, name: &str) -> Option<(usize, usize)> {
		self.pages
			.iter()
			.enumerate()
			.find_map(|(page_index, page)| Some((page_index, page.find_detail(&self.names, name)?)))
	}

	pub fn detail_name(&self, info: &TexInfo) -> Option<&str> {
		self.names.name_at(info.name_offset as usize)
	}

	pub fn extra_palette(&self, page: usize, detail: usize, palette: usize) -> Option<&Clut> {
		let entry = (*self.page(page)?.detail(detail)?.extra_palettes.get(palette)?)?;
		Some(&self.extra_palettes.get(entry)?.clut)
	}

	/// The page palette for a detail followed by its assigned extra palettes.
	pub fn detail_palettes(&self, page: usize, detail: usize) -> Vec<&Clut> {
		let Some(tpage) = self.page(page) else {
			return vec![];
		};
		let base = tpage.bitmap().and_then(|bitmap| bitmap.palettes.get(detail));
		let extra = tpage
			.detail(detail)
			.into_iter()
			.flat_map(|detail| detail.extra_palettes.iter().flatten())
			.filter_map(|&entry| self.extra_palettes.get(entry).map(|extra| &extra.clut));
		base.into_iter().chain(extra).collect()
	}

	/// Spooled pages, as listed for an area. Records have a fixed size, so a bad one is skipped over.
	pub fn load_spooled_pages<R: Read + Seek>(&mut self, reader: &mut R, pages: &[u8]) -> Result<()> {
		for &page in pages {
			let start = reader.stream_position()?;
			match self.pages.get_mut(page as usize) {
				Some(tpage) => {
					if let Err(e) = tpage.load_bitmap(reader, true) {
						error!("spooled page {}: {}", page, e);
					}
				},
				None => error!("area refers to missing page {}", page),
			}
			seek_to(reader, start + SPOOLED_PAGE_SIZE as u64)?;
		}
		Ok(())
	}

	pub fn free_all(&mut self) {
		*self = TextureStore::default();
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;
	use byteorder::WriteBytesExt;
	use super::*;
	use crate::codec::tests::pack;

	fn write_clut(out: &mut Vec<u8>, clut: &Clut) {
		for &color in &clut.colors {
			out.write_u16::<LE>(color).unwrap();
		}
	}

	fn full_page_detail() -> TexInfo {
		TexInfo { id: 0, name_offset: 0, x: 0, y: 0, width: 0, height: 0 }
	}

	fn gradient_clut() -> Clut {
		let mut clut = Clut::default();
		for (index, color) in clut.colors.iter_mut().enumerate() {
			*color = index as u16 * 0x421;
		}
		clut
	}

	fn spooled_record(num_palettes: i32, palette: &Clut, texels: &[u8; TEXPAGE_4BIT_SIZE]) -> Vec<u8> {
		let mut out = vec![];
		out.write_i32::<LE>(num_palettes).unwrap();
		for _ in 0..MAX_PAGE_CLUTS {
			write_clut(&mut out, palette);
		}
		out.extend_from_slice(&[0; SPOOLED_PAGE_PADDING]);
		out.extend_from_slice(texels);
		out
	}

	#[test]
	fn spooled_record_size() {
		assert_eq!(SPOOLED_PAGE_SIZE, 34816);
		assert_eq!(SPOOLED_PAGE_SIZE % 512, 0);
	}

	#[test]
	fn uniform_page_converts_flipped() {
		let clut = gradient_clut();
		let texels = [0x55; TEXPAGE_4BIT_SIZE];
		let record = spooled_record(1, &clut, &texels);
		let mut page = TexturePage::new(0, PagePos::default(), vec![full_page_detail()]);
		page.load_bitmap(&mut Cursor::new(record), true).unwrap();
		assert_eq!(page.bitmap().unwrap().palettes.len(), 1);
		let mut dest = vec![[0u8; 4]; TEXPAGE_NUM_PIXELS];
		assert!(page.convert_detail_to_rgba(&mut dest, 0, None, ChannelOrder::Rgba, true));
		let expected = codec::color_to_rgba(clut.colors[5], ChannelOrder::Rgba, true);
		assert!(dest.iter().all(|&pixel| pixel == expected));
	}

	#[test]
	fn first_row_lands_on_last_output_row() {
		let clut = gradient_clut();
		let mut texels = [0x11; TEXPAGE_4BIT_SIZE];
		texels[..TEXPAGE_ROW_BYTES].fill(0x33);
		let record = spooled_record(1, &clut, &texels);
		let mut page = TexturePage::new(0, PagePos::default(), vec![full_page_detail()]);
		page.load_bitmap(&mut Cursor::new(record), true).unwrap();
		let mut dest = vec![[0u8; 4]; TEXPAGE_NUM_PIXELS];
		page.convert_detail_to_rgba(&mut dest, 0, None, ChannelOrder::Bgra, false);
		let row_color = codec::color_to_rgba(clut.colors[3], ChannelOrder::Bgra, false);
		let other = codec::color_to_rgba(clut.colors[1], ChannelOrder::Bgra, false);
		let last_row = (TEXPAGE_DIM - 1) * TEXPAGE_DIM;
		assert!(dest[last_row..].iter().all(|&pixel| pixel == row_color));
		assert!(dest[..last_row].iter().all(|&pixel| pixel == other));
	}

	#[test]
	fn missing_detail_writes_nothing() {
		let record = spooled_record(1, &gradient_clut(), &[0x22; TEXPAGE_4BIT_SIZE]);
		let mut page = TexturePage::new(0, PagePos::default(), vec![full_page_detail()]);
		page.load_bitmap(&mut Cursor::new(record), true).unwrap();
		let mut dest = vec![[7u8; 4]; TEXPAGE_NUM_PIXELS];
		assert!(!page.convert_detail_to_rgba(&mut dest, 1, None, ChannelOrder::Rgba, true));
		assert!(dest.iter().all(|&pixel| pixel == [7; 4]));
	}

	#[test]
	fn compressed_page_seeks_past_used_bytes() {
		let mut texels = [0u8; TEXPAGE_4BIT_SIZE];
		for (index, byte) in texels.iter_mut().enumerate() {
			*byte = (index / 300) as u8;
		}
		let packed = pack(&texels);
		let mut record = vec![];
		record.write_i32::<LE>(2).unwrap();
		write_clut(&mut record, &gradient_clut());
		write_clut(&mut record, &Clut::default());
		record.extend_from_slice(&packed);
		let used = record.len() as u64;
		record.extend_from_slice(&[0xAB; 100]);
		let mut reader = Cursor::new(record);
		let mut page = TexturePage::new(3, PagePos::default(), vec![]);
		page.load_bitmap(&mut reader, false).unwrap();
		assert_eq!(reader.position(), used);
		let bitmap = page.bitmap().unwrap();
		assert_eq!(bitmap.palettes.len(), 2);
		assert_eq!(&bitmap.data[..], &texels[..]);
		assert_eq!(bitmap.stream_size, used);
	}

	#[test]
	fn reloading_only_advances() {
		let record = spooled_record(1, &gradient_clut(), &[0x44; TEXPAGE_4BIT_SIZE]);
		let mut twice = record.clone();
		twice.extend_from_slice(&spooled_record(1, &Clut::default(), &[0x99; TEXPAGE_4BIT_SIZE]));
		let mut reader = Cursor::new(twice);
		let mut page = TexturePage::new(0, PagePos::default(), vec![full_page_detail()]);
		page.load_bitmap(&mut reader, true).unwrap();
		page.load_bitmap(&mut reader, true).unwrap();
		assert_eq!(reader.position(), 2 * SPOOLED_PAGE_SIZE as u64);
		assert_eq!(page.bitmap().unwrap().data[0], 0x44);
	}

	#[test]
	fn bad_spooled_record_is_skipped() {
		let mut records = spooled_record(-1, &Clut::default(), &[0x11; TEXPAGE_4BIT_SIZE]);
		records.extend_from_slice(&spooled_record(1, &gradient_clut(), &[0x66; TEXPAGE_4BIT_SIZE]));
		let pages = (0..2).map(|id| TexturePage::new(id, PagePos::default(), vec![full_page_detail()]));
		let mut store = TextureStore { pages: pages.collect(), ..Default::default() };
		let mut reader = Cursor::new(records);
		store.load_spooled_pages(&mut reader, &[0, 1]).unwrap();
		assert!(!store.page(0).unwrap().is_loaded());
		assert_eq!(store.page(1).unwrap().bitmap().unwrap().data[0], 0x66);
		assert_eq!(reader.position(), 2 * SPOOLED_PAGE_SIZE as u64);
	}

	fn info_lump(pages: &[Vec<TexInfo>]) -> Vec<u8> {
		let mut out = vec![];
		out.write_i32::<LE>(pages.len() as i32).unwrap();
		out.write_i32::<LE>(pages.iter().map(Vec::len).sum::<usize>() as i32).unwrap();
		for _ in 0..=pages.len() {
			out.write_u32::<LE>(0).unwrap();
		}
		for details in pages {
			out.write_i32::<LE>(details.len() as i32).unwrap();
			for info in details {
				out.write_u16::<LE>(info.id).unwrap();
				out.write_u16::<LE>(info.name_offset).unwrap();
				out.extend_from_slice(&[info.x, info.y, info.width, info.height]);
			}
		}
		for _ in 0..2 {
			out.write_i32::<LE>(1).unwrap();
			out.write_i32::<LE>(0).unwrap();
			out.write_i32::<LE>(2048).unwrap();
			out.extend_from_slice(&[0; 8 * (MAX_PAGE_LIST - 1)]);
		}
		out
	}

	fn detail(name_offset: u16) -> TexInfo {
		TexInfo { id: name_offset, name_offset, x: 0, y: 0, width: 16, height: 16 }
	}

	#[test]
	fn reads_info_and_finds_names() {
		let lump = info_lump(&[vec![detail(0)], vec![], vec![detail(6), detail(11)]]);
		let mut store = TextureStore::read_info(&mut Cursor::new(lump)).unwrap();
		assert_eq!(store.page_count(), 3);
		assert_eq!(store.page(1).unwrap().detail_count(), 0);
		assert_eq!(store.permanent_pages.len(), 1);
		assert_eq!(store.special_pages[0], IVec2::new(0, 2048));
		store.read_names(&mut Cursor::new(b"ROAD\0\0SIGN\0ROAD\0".to_vec()), 16).unwrap();
		assert_eq!(store.find_detail("SIGN"), Some((2, 0)));
		assert_eq!(store.find_detail("ROAD"), Some((0, 0)));
		assert_eq!(store.find_detail("road"), None);
	}

	fn palette_record(out: &mut Vec<u8>, format: LevelFormat, palette: i32, texnum: i32, tpage: i32, clut_number: i32) {
		out.write_i32::<LE>(palette).unwrap();
		out.write_i32::<LE>(texnum).unwrap();
		out.write_i32::<LE>(tpage).unwrap();
		if format == LevelFormat::Driver2 {
			out.write_i32::<LE>(clut_number).unwrap();
		}
	}

	#[test]
	fn extra_palettes_are_shared() {
		let lump = info_lump(&[vec![detail(0), detail(0), detail(0)]]);
		let mut store = TextureStore::read_info(&mut Cursor::new(lump)).unwrap();
		let format = LevelFormat::Driver2;
		let mut pallet = vec![];
		pallet.write_i32::<LE>(1).unwrap();
		palette_record(&mut pallet, format, 2, 0, 0, -1);
		write_clut(&mut pallet, &gradient_clut());
		palette_record(&mut pallet, format, 2, 2, 0, 0);
		palette_record(&mut pallet, format, -1, 0, 0, 0);
		store.read_palette_lump(&mut Cursor::new(pallet), &LoadContext::new(format)).unwrap();
		assert_eq!(store.extra_palettes.len(), 1);
		assert_eq!(store.extra_palettes[0].textures.as_slice(), &[0, 2]);
		assert_eq!(store.extra_palette(0, 0, 2), Some(&gradient_clut()));
		assert_eq!(store.extra_palette(0, 2, 2), Some(&gradient_clut()));
		assert_eq!(store.extra_palette(0, 1, 2), None);
	}

	#[test]
	fn bad_page_keeps_palette_positions() {
		let lump = info_lump(&[vec![detail(0), detail(0)]]);
		let mut store = TextureStore::read_info(&mut Cursor::new(lump)).unwrap();
		let format = LevelFormat::Driver2;
		let mut pallet = vec![];
		pallet.write_i32::<LE>(2).unwrap();
		palette_record(&mut pallet, format, 1, 0, -1, -1);
		write_clut(&mut pallet, &Clut::default());
		palette_record(&mut pallet, format, 2, 0, 0, -1);
		write_clut(&mut pallet, &gradient_clut());
		palette_record(&mut pallet, format, 2, 1, 0, 1);
		palette_record(&mut pallet, format, -1, 0, 0, 0);
		store.read_palette_lump(&mut Cursor::new(pallet), &LoadContext::new(format)).unwrap();
		assert_eq!(store.extra_palettes.len(), 2);
		assert_eq!(store.extra_palettes[0].page, -1);
		assert_eq!(store.extra_palette(0, 0, 1), None);
		assert_eq!(store.extra_palette(0, 0, 2), Some(&gradient_clut()));
		assert_eq!(store.extra_palette(0, 1, 2), Some(&gradient_clut()));
	}

	#[test]
	fn driver1_palettes_stop_at_total() {
		let lump = info_lump(&[vec![detail(0), detail(0)]]);
		let mut store = TextureStore::read_info(&mut Cursor::new(lump)).unwrap();
		let format = LevelFormat::Driver1;
		let mut pallet = vec![];
		pallet.write_i32::<LE>(2).unwrap();
		palette_record(&mut pallet, format, 0, 0, 0, -1);
		write_clut(&mut pallet, &gradient_clut());
		palette_record(&mut pallet, format, 1, 1, 0, -1);
		write_clut(&mut pallet, &Clut::default());
		let mut reader = Cursor::new(pallet);
		store.read_palette_lump(&mut reader, &LoadContext::new(format)).unwrap();
		assert_eq!(reader.position(), 4 + 2 * (12 + 32));
		assert_eq!(store.extra_palettes.len(), 2);
		assert_eq!(store.extra_palette(0, 1, 1), Some(&Clut::default()));
	}
}
