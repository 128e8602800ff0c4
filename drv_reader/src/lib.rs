extern crate self as drv_reader;

pub mod codec;
pub mod level;
pub mod models;
pub mod poly;
pub mod regions;
pub mod textures;
pub(crate) mod impls;

use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom};
use byteorder::{ReadBytesExt, LE};
pub(crate) use drv_derive::Readable;

/// CD sector size, the alignment unit of spooled data.
pub const SECTOR_SIZE: u64 = 2048;

pub(crate) trait Readable: Sized {
	fn read<R: Read>(reader: &mut R) -> Result<Self>;
}

/// Object-safe stand-in for `Read + Seek`, used where a loader sits behind a trait object.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelFormat {
	Driver1,
	Driver2,
}

/// Offsets of the top-level sections of a level file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelLumpInfo {
	pub lumps_offset: u64,
	pub lumps_size: u64,
	pub texdata_offset: u64,
	pub texdata_size: u64,
	pub levdata_offset: u64,
	pub levdata_size: u64,
	pub spooldata_offset: u64,
	pub spooldata_size: u64,
}

/// Immutable load state passed to every decode step that depends on the file layout or version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadContext {
	pub format: LevelFormat,
	pub lump_info: LevelLumpInfo,
}

impl LoadContext {
	pub fn new(format: LevelFormat) -> Self {
		Self { format, lump_info: LevelLumpInfo::default() }
	}

	/// Absolute offset of a sector-addressed position inside the spooled section.
	/// Sectors count from the sector holding the section header.
	pub fn spool_offset(&self, sectors: u64) -> u64 {
		(self.lump_info.spooldata_offset / SECTOR_SIZE + sectors) * SECTOR_SIZE
	}
}

/// NUL-separated string blob, as used by the texture and model name lumps.
#[derive(Clone, Debug, Default)]
pub struct NameTable {
	data: Box<[u8]>,
}

impl NameTable {
	pub fn new(data: Box<[u8]>) -> Self {
		Self { data }
	}

	pub fn read<R: Read>(reader: &mut R, size: usize) -> Result<Self> {
		Ok(Self::new(read_boxed_slice(reader, size)?))
	}

	/// String starting at a byte offset, up to the next NUL.
	pub fn name_at(&self, offset: usize) -> Option<&str> {
		let bytes = self.data.get(offset..)?;
		let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
		std::str::from_utf8(&bytes[..end]).ok()
	}

	/// Every string in blob order.
	pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
		let data = match self.data.iter().rposition(|&b| b != 0) {
			Some(last) => &self.data[..=last],
			None => &[][..],
		};
		data.split(|&b| b == 0).map(|name| std::str::from_utf8(name).unwrap_or(""))
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

pub(crate) fn read_boxed_slice<R: Read, T: Readable>(reader: &mut R, len: usize) -> Result<Box<[T]>> {
	//counts come from the file, grow as items actually arrive
	let mut vec = Vec::with_capacity(len.min(0x10000));
	for _ in 0..len {
		vec.push(T::read(reader)?);
	}
	Ok(vec.into_boxed_slice())
}

/// Reads an i32 element count, rejecting negative values.
pub(crate) fn read_count<R: Read>(reader: &mut R) -> Result<usize> {
	let count = reader.read_i32::<LE>()?;
	usize::try_from(count).map_err(|_| Error::new(ErrorKind::InvalidData, format!("negative count: {}", count)))
}

pub(crate) fn read_counted<R: Read, T: Readable>(reader: &mut R) -> Result<Box<[T]>> {
	let len = read_count(reader)?;
	read_boxed_slice(reader, len)
}

pub(crate) fn read_bytes<R: Read, const N: usize>(reader: &mut R) -> Result<Box<[u8; N]>> {
	let mut data = Box::new([0u8; N]);
	reader.read_exact(&mut data[..])?;
	Ok(data)
}

pub(crate) fn skip<R: Read>(reader: &mut R, num: usize) -> Result<()> {
	let mut buf = [0];
	for _ in 0..num {
		reader.read_exact(&mut buf)?;
	}
	Ok(())
}

pub(crate) fn align_up(value: u64, align: u64) -> u64 {
	(value + align - 1) / align * align
}

pub(crate) fn seek_to<R: Seek + ?Sized>(reader: &mut R, pos: u64) -> Result<()> {
	reader.seek(SeekFrom::Start(pos))?;
	Ok(())
}

pub(crate) fn invalid_data(msg: String) -> Error {
	Error::new(ErrorKind::InvalidData, msg)
}
