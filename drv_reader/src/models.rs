use std::io::{Read, Result, Seek};
use byteorder::{ReadBytesExt, LE};
use glam::I16Vec3;
use log::{debug, error, info, warn};
use nonmax::NonMaxU16;
use crate::{align_up, invalid_data, read_boxed_slice, read_count, seek_to, NameTable, Readable};

/// Model slots, bounded by the 11-bit model index of packed cell objects.
pub const MAX_MODELS: usize = 1536;
pub const MAX_CAR_MODELS: usize = 13;
pub const MODEL_HEADER_SIZE: usize = 36;

#[derive(Readable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelHeader {
	pub shape_flags: u16,
	pub flags2: u16,
	/// Index of the model whose vertices this one shares, or negative
	pub instance_number: i16,
	pub tri_verts: u8,
	pub z_bias: u8,
	pub bounding_sphere: i16,
	pub num_point_normals: u16,
	pub num_vertices: u16,
	pub num_polys: u16,
	/// Byte offsets into the model blob
	pub vertices: i32,
	pub poly_block: i32,
	pub normals: i32,
	pub point_normals: i32,
	pub collision_block: i32,
}

/// A model blob with its parsed header. Offsets in the header are relative to the blob start.
#[derive(Clone, Debug)]
pub struct Model {
	pub header: ModelHeader,
	data: Box<[u8]>,
}

fn read_svector(data: &[u8], block: i32, index: usize) -> Option<I16Vec3> {
	let start = usize::try_from(block).ok()? + index * 8;
	let mut bytes = data.get(start..start + 8)?;
	I16Vec3::read(&mut bytes).ok()
}

impl Model {
	pub fn parse(data: Box<[u8]>) -> Result<Self> {
		let header = ModelHeader::read(&mut &data[..])?;
		for (name, offset) in [("vertices", header.vertices), ("polys", header.poly_block), ("point normals", header.point_normals)] {
			if offset < 0 || offset as usize > data.len() {
				return Err(invalid_data(format!("model {} offset {} outside blob of {} bytes", name, offset, data.len())));
			}
		}
		Ok(Self { header, data })
	}

	pub fn size(&self) -> usize {
		self.data.len()
	}

	pub fn bytes(&self) -> &[u8] {
		&self.data
	}

	/// Base instance index, if this model shares another model's vertices.
	pub fn instance_of(&self) -> Option<usize> {
		usize::try_from(self.header.instance_number).ok()
	}

	pub fn vertex(&self, index: usize) -> Option<I16Vec3> {
		if index >= self.header.num_vertices as usize {
			return None;
		}
		read_svector(&self.data, self.header.vertices, index)
	}

	pub fn point_normal(&self, index: usize) -> Option<I16Vec3> {
		if index >= self.header.num_point_normals as usize {
			return None;
		}
		read_svector(&self.data, self.header.point_normals, index)
	}

	/// Polygon stream from a byte offset inside the poly block, empty past the blob end.
	pub fn poly_data(&self, offset: usize) -> &[u8] {
		let start = self.header.poly_block as usize + offset;
		self.data.get(start..).unwrap_or(&[])
	}
}

/// A `size:i32` prefixed blob, `None` for size 0.
fn read_sized_blob<R: Read>(reader: &mut R) -> Result<Option<Box<[u8]>>> {
	let size = read_count(reader)?;
	if size == 0 {
		return Ok(None);
	}
	Ok(Some(read_boxed_slice(reader, size)?))
}

/// One registry slot.
#[derive(Debug)]
pub struct ModelRef {
	pub index: usize,
	pub name: Option<String>,
	pub model: Option<Model>,
	/// Slot supplying vertices and point normals
	pub base_instance: Option<usize>,
	pub high_detail_id: Option<NonMaxU16>,
	pub low_detail_id: Option<NonMaxU16>,
}

impl ModelRef {
	fn empty(index: usize) -> Self {
		Self { index, name: None, model: None, base_instance: None, high_detail_id: None, low_detail_id: None }
	}

	pub fn size(&self) -> usize {
		self.model.as_ref().map_or(0, Model::size)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CarModelKind {
	Clean,
	Damaged,
	Low,
}

#[derive(Debug, Default)]
pub struct CarModelData {
	pub clean: Option<Model>,
	pub damaged: Option<Model>,
	pub low: Option<Model>,
}

impl CarModelData {
	pub fn get(&self, kind: CarModelKind) -> Option<&Model> {
		match kind {
			CarModelKind::Clean => self.clean.as_ref(),
			CarModelKind::Damaged => self.damaged.as_ref(),
			CarModelKind::Low => self.low.as_ref(),
		}
	}

	fn slot(&mut self, kind: CarModelKind) -> &mut Option<Model> {
		match kind {
			CarModelKind::Clean => &mut self.clean,
			CarModelKind::Damaged => &mut self.damaged,
			CarModelKind::Low => &mut self.low,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.clean.is_none() && self.damaged.is_none() && self.low.is_none()
	}
}

/// Load/free notifications for whoever keeps resources per model, such as a renderer.
pub trait ModelObserver {
	fn on_model_loaded(&mut self, _model: &ModelRef) {}
	fn on_model_freed(&mut self, _model: &ModelRef) {}
	fn on_car_model_loaded(&mut self, _index: usize, _car: &CarModelData) {}
	fn on_car_model_freed(&mut self, _index: usize, _car: &CarModelData) {}
}

pub struct NoObserver;

impl ModelObserver for NoObserver {}

/// A model together with the model whose vertex and normal buffers its polygons index.
#[derive(Clone, Copy, Debug)]
pub struct ModelSource<'a> {
	pub model: &'a Model,
	pub vertex_ref: &'a Model,
}

impl<'a> ModelSource<'a> {
	pub fn standalone(model: &'a Model) -> Self {
		Self { model, vertex_ref: model }
	}
}

pub struct ModelRegistry {
	models: Box<[ModelRef]>,
	car_models: [CarModelData; MAX_CAR_MODELS],
	names: Vec<String>,
	num_models_in_pack: usize,
	observer: Box<dyn ModelObserver>,
}

impl Default for ModelRegistry {
	fn default() -> Self {
		Self::new(Box::new(NoObserver))
	}
}

impl ModelRegistry {
	pub fn new(observer: Box<dyn ModelObserver>) -> Self {
		Self {
			models: (0..MAX_MODELS).map(ModelRef::empty).collect(),
			car_models: Default::default(),
			names: vec![],
			num_models_in_pack: 0,
			observer,
		}
	}

	pub fn read_names<R: Read>(&mut self, reader: &mut R, size: usize) -> Result<()> {
		let table = NameTable::read(reader, size)?;
		self.names = table.names().map(String::from).collect();
		info!("model names: {}", self.names.len());
		Ok(())
	}

	/// Reads the model lump. Each model is a `size:i32` followed by its blob, size 0 leaves the slot empty.
	pub fn read_models<R: Read>(&mut self, reader: &mut R) -> Result<()> {
		let count = read_count(reader)?;
		if count > MAX_MODELS {
			return Err(invalid_data(format!("{} models, at most {} supported", count, MAX_MODELS)));
		}
		self.num_models_in_pack = count;
		info!("models in pack: {}", count);
		for (index, slot) in self.models[..count].iter_mut().enumerate() {
			slot.name = self.names.get(index).cloned();
		}
		for index in 0..count {
			let blob = match read_sized_blob(reader) {
				Ok(Some(blob)) => blob,
				Ok(None) => continue,
				Err(e) => {
					error!("model {}: {}, models after it are not loaded", index, e);
					break;
				},
			};
			let slot = &mut self.models[index];
			match Model::parse(blob) {
				Ok(model) => slot.model = Some(model),
				Err(e) => warn!("model {} ({:?}): {}", index, slot.name, e),
			}
		}
		for index in 0..count {
			self.link_base_instance(index);
		}
		for slot in self.models[..count].iter().filter(|slot| slot.model.is_some()) {
			self.observer.on_model_loaded(slot);
		}
		Ok(())
	}

	fn link_base_instance(&mut self, index: usize) {
		let Some(base) = self.models[index].model.as_ref().and_then(Model::instance_of) else {
			return;
		};
		match self.models.get(base).is_some_and(|base| base.model.is_some()) {
			true => self.models[index].base_instance = Some(base),
			false => warn!("model {} refers to missing base instance {}", index, base),
		}
	}

	/// Reads the spooled models of an area into their slots: a u16 count, the u16 slot numbers padded to
	/// 4 bytes, then a `size:i32` prefixed blob per slot. Slots that already hold a model keep it.
	/// Returns the number of models added.
	pub fn read_area_models<R: Read>(&mut self, reader: &mut R, size: usize) -> Result<usize> {
		let buffer = read_boxed_slice::<_, u8>(reader, size)?;
		let mut data = &buffer[..];
		let count = data.read_u16::<LE>()? as usize;
		let numbers = read_boxed_slice::<_, u16>(&mut data, count)?;
		let header_size = align_up(2 + count as u64 * 2, 4) as usize;
		let mut data = buffer.get(header_size..).unwrap_or(&[]);
		let mut added = vec![];
		for &number in numbers.iter() {
			let number = number as usize;
			let blob = match read_sized_blob(&mut data) {
				Ok(Some(blob)) => blob,
				Ok(None) => continue,
				Err(e) => {
					error!("area model {}: {}, models after it are not loaded", number, e);
					break;
				},
			};
			let Some(slot) = self.models.get_mut(number) else {
				warn!("area model number {} out of range", number);
				continue;
			};
			if slot.model.is_some() {
				debug!("area model {} already loaded", number);
				continue;
			}
			match Model::parse(blob) {
				Ok(model) => {
					slot.name = self.names.get(number).cloned();
					slot.model = Some(model);
					added.push(number);
				},
				Err(e) => warn!("area model {}: {}", number, e),
			}
		}
		for &number in &added {
			self.link_base_instance(number);
		}
		for &number in &added {
			self.observer.on_model_loaded(&self.models[number]);
		}
		debug!("area models: {} of {} added", added.len(), count);
		Ok(added.len())
	}

	/// One u16 per model naming its low detail counterpart.
	pub fn read_low_detail_table<R: Read>(&mut self, reader: &mut R, size: usize) -> Result<()> {
		let count = (size / 2).min(self.num_models_in_pack);
		for index in 0..count {
			let low = reader.read_u16::<LE>()?;
			if low as usize == index || low as usize >= MAX_MODELS {
				continue;
			}
			self.models[index].low_detail_id = NonMaxU16::new(low);
			self.models[low as usize].high_detail_id = NonMaxU16::new(index as u16);
		}
		Ok(())
	}

	/// Reads the car model lump: a count, 13 offset triples, then size-prefixed blobs.
	pub fn read_car_models<R: Read + Seek>(&mut self, reader: &mut R) -> Result<()> {
		let start = reader.stream_position()?;
		let count = read_count(reader)?;
		let offsets = <[[i32; 3]; MAX_CAR_MODELS]>::read(reader)?;
		let blobs_start = start + 4 + (MAX_CAR_MODELS * 12) as u64;
		info!("car models: {}", count);
		for (index, car_offsets) in offsets.iter().enumerate() {
			let kinds = [CarModelKind::Clean, CarModelKind::Damaged, CarModelKind::Low];
			for (kind, &offset) in kinds.into_iter().zip(car_offsets) {
				if offset == -1 {
					continue;
				}
				let blob = match seek_to(reader, blobs_start + offset as u64).and_then(|_| read_sized_blob(reader)) {
					Ok(Some(blob)) => blob,
					Ok(None) => continue,
					Err(e) => {
						error!("car {} {:?}: {}", index, kind, e);
						continue;
					},
				};
				let size = blob.len();
				match Model::parse(blob) {
					Ok(model) => {
						debug!("car {} {:?}: {} bytes", index, kind, size);
						*self.car_models[index].slot(kind) = Some(model);
					},
					Err(e) => warn!("car {} {:?}: {}", index, kind, e),
				}
			}
			if !self.car_models[index].is_empty() {
				self.observer.on_car_model_loaded(index, &self.car_models[index]);
			}
		}
		Ok(())
	}

	pub fn model_count(&self) -> usize {
		self.num_models_in_pack
	}

	pub fn get_by_index(&self, index: usize) -> Option<&ModelRef> {
		self.models.get(index)
	}

	pub fn find_by_name(&self, name: &str) -> Option<usize> {
		self.names.iter().position(|n| n == name)
	}

	pub fn name_by_index(&self, index: usize) -> Option<&str> {
		self.names.get(index).map(String::as_str)
	}

	pub fn car_model(&self, index: usize) -> Option<&CarModelData> {
		self.car_models.get(index)
	}

	/// The model in a slot, paired with its base instance when it has one.
	pub fn model_source(&self, index: usize) -> Option<ModelSource<'_>> {
		let slot = self.models.get(index)?;
		let model = slot.model.as_ref()?;
		let vertex_ref = slot
			.base_instance
			.and_then(|base| self.models[base].model.as_ref())
			.unwrap_or(model);
		Some(ModelSource { model, vertex_ref })
	}

	pub fn car_model_source(&self, index: usize, kind: CarModelKind) -> Option<ModelSource<'_>> {
		self.car_models.get(index)?.get(kind).map(ModelSource::standalone)
	}

	pub fn loaded_models(&self) -> impl Iterator<Item = &ModelRef> + '_ {
		self.models.iter().filter(|slot| slot.model.is_some())
	}

	pub fn free_all(&mut self) {
		for slot in self.models.iter_mut() {
			if slot.model.is_some() {
				self.observer.on_model_freed(slot);
			}
			*slot = ModelRef::empty(slot.index);
		}
		for (index, car) in self.car_models.iter_mut().enumerate() {
			if !car.is_empty() {
				self.observer.on_car_model_freed(index, car);
			}
			*car = CarModelData::default();
		}
		self.names.clear();
		self.num_models_in_pack = 0;
	}
}

impl Drop for ModelRegistry {
	fn drop(&mut self) {
		self.free_all();
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use std::{cell::RefCell, io::Cursor, rc::Rc};
	use byteorder::WriteBytesExt;
	use super::*;

	/// Model blob with the given vertices, no point normals and a raw poly block.
	pub(crate) fn model_blob(instance_number: i16, vertices: &[[i16; 3]], num_polys: u16, polys: &[u8]) -> Vec<u8> {
		let vertices_ofs = MODEL_HEADER_SIZE as i32;
		let polys_ofs = vertices_ofs + vertices.len() as i32 * 8;
		let mut out = vec![];
		out.write_u16::<LE>(0).unwrap();
		out.write_u16::<LE>(0).unwrap();
		out.write_i16::<LE>(instance_number).unwrap();
		out.write_u8(0).unwrap();
		out.write_u8(0).unwrap();
		out.write_i16::<LE>(100).unwrap();
		out.write_u16::<LE>(0).unwrap();
		out.write_u16::<LE>(vertices.len() as u16).unwrap();
		out.write_u16::<LE>(num_polys).unwrap();
		for offset in [vertices_ofs, polys_ofs, polys_ofs, polys_ofs, 0] {
			out.write_i32::<LE>(offset).unwrap();
		}
		for v in vertices {
			for c in v {
				out.write_i16::<LE>(*c).unwrap();
			}
			out.write_i16::<LE>(0).unwrap();
		}
		out.extend_from_slice(polys);
		out
	}

	fn model_lump(blobs: &[Vec<u8>]) -> Vec<u8> {
		let mut out = vec![];
		out.write_i32::<LE>(blobs.len() as i32).unwrap();
		for blob in blobs {
			out.write_i32::<LE>(blob.len() as i32).unwrap();
			out.extend_from_slice(blob);
		}
		out
	}

	#[derive(Default)]
	struct Events(Rc<RefCell<Vec<String>>>);

	impl ModelObserver for Events {
		fn on_model_loaded(&mut self, model: &ModelRef) {
			self.0.borrow_mut().push(format!("load {}", model.index));
		}

		fn on_model_freed(&mut self, model: &ModelRef) {
			self.0.borrow_mut().push(format!("free {}", model.index));
		}

		fn on_car_model_loaded(&mut self, index: usize, _car: &CarModelData) {
			self.0.borrow_mut().push(format!("load car {}", index));
		}

		fn on_car_model_freed(&mut self, index: usize, _car: &CarModelData) {
			self.0.borrow_mut().push(format!("free car {}", index));
		}
	}

	#[test]
	fn header_is_36_bytes() {
		let blob = model_blob(-1, &[], 0, &[]);
		assert_eq!(blob.len(), MODEL_HEADER_SIZE);
		let model = Model::parse(blob.into_boxed_slice()).unwrap();
		assert_eq!(model.header.vertices, 36);
		assert_eq!(model.instance_of(), None);
	}

	#[test]
	fn vertices_are_bounds_checked() {
		let blob = model_blob(-1, &[[1, 2, 3], [-4, 5, -6]], 0, &[]);
		let model = Model::parse(blob.into_boxed_slice()).unwrap();
		assert_eq!(model.vertex(1), Some(I16Vec3::new(-4, 5, -6)));
		assert_eq!(model.vertex(2), None);
		assert_eq!(model.point_normal(0), None);
	}

	#[test]
	fn truncated_header() {
		assert!(Model::parse(vec![0; 20].into_boxed_slice()).is_err());
	}

	#[test]
	fn loads_models_and_base_instances() {
		let lump = model_lump(&[
			model_blob(-1, &[[0, 0, 0]], 0, &[]),
			vec![],
			model_blob(0, &[], 0, &[]),
		]);
		let mut registry = ModelRegistry::default();
		registry.read_names(&mut Cursor::new(b"BOX\0EMPTY\0BOX_COPY\0".to_vec()), 19).unwrap();
		registry.read_models(&mut Cursor::new(lump)).unwrap();
		assert_eq!(registry.model_count(), 3);
		assert_eq!(registry.loaded_models().count(), 2);
		assert!(registry.get_by_index(1).unwrap().model.is_none());
		assert_eq!(registry.find_by_name("BOX_COPY"), Some(2));
		assert_eq!(registry.name_by_index(0), Some("BOX"));
		assert_eq!(registry.get_by_index(2).unwrap().base_instance, Some(0));
		let source = registry.model_source(2).unwrap();
		assert_eq!(source.vertex_ref.header.num_vertices, 1);
		assert_eq!(source.model.header.num_vertices, 0);
	}

	#[test]
	fn low_detail_links_both_ways() {
		let blob = model_blob(-1, &[], 0, &[]);
		let lump = model_lump(&[blob.clone(), blob.clone(), blob]);
		let mut registry = ModelRegistry::default();
		registry.read_models(&mut Cursor::new(lump)).unwrap();
		let mut table = vec![];
		for low in [2u16, 1, 2] {
			table.write_u16::<LE>(low).unwrap();
		}
		registry.read_low_detail_table(&mut Cursor::new(table), 6).unwrap();
		assert_eq!(registry.get_by_index(0).unwrap().low_detail_id.map(|id| id.get()), Some(2));
		assert_eq!(registry.get_by_index(2).unwrap().high_detail_id.map(|id| id.get()), Some(0));
		assert_eq!(registry.get_by_index(1).unwrap().low_detail_id, None);
	}

	#[test]
	fn car_models_resolve_offsets() {
		let clean = model_blob(-1, &[[1, 1, 1], [2, 2, 2]], 0, &[]);
		let low = model_blob(-1, &[[3, 3, 3]], 0, &[]);
		let mut lump = vec![];
		lump.write_i32::<LE>(1).unwrap();
		for car in 0..MAX_CAR_MODELS {
			let triple = match car {
				0 => [0, -1, 4 + clean.len() as i32],
				_ => [-1; 3],
			};
			for offset in triple {
				lump.write_i32::<LE>(offset).unwrap();
			}
		}
		lump.write_i32::<LE>(clean.len() as i32).unwrap();
		lump.extend_from_slice(&clean);
		lump.write_i32::<LE>(low.len() as i32).unwrap();
		lump.extend_from_slice(&low);
		let mut registry = ModelRegistry::default();
		registry.read_car_models(&mut Cursor::new(lump)).unwrap();
		let car = registry.car_model(0).unwrap();
		assert_eq!(car.clean.as_ref().unwrap().header.num_vertices, 2);
		assert!(car.damaged.is_none());
		let source = registry.car_model_source(0, CarModelKind::Low).unwrap();
		assert_eq!(source.vertex_ref.vertex(0), Some(I16Vec3::splat(3)));
		assert!(registry.car_model(1).unwrap().is_empty());
	}

	#[test]
	fn truncated_lump_keeps_earlier_models() {
		let mut lump = model_lump(&[model_blob(-1, &[[1, 1, 1]], 0, &[])]);
		lump[..4].copy_from_slice(&3i32.to_le_bytes());
		lump.write_i32::<LE>(500).unwrap();
		lump.extend_from_slice(&[0; 10]);
		let mut registry = ModelRegistry::default();
		registry.read_names(&mut Cursor::new(b"A\0B\0C\0".to_vec()), 6).unwrap();
		registry.read_models(&mut Cursor::new(lump)).unwrap();
		assert_eq!(registry.model_count(), 3);
		assert_eq!(registry.loaded_models().count(), 1);
		assert!(registry.model_source(0).is_some());
		assert_eq!(registry.get_by_index(2).unwrap().name.as_deref(), Some("C"));
	}

	/// Area model buffer in its spooled layout, padded to whole sectors.
	pub(crate) fn area_models(models: &[(u16, Vec<u8>)]) -> Vec<u8> {
		let mut out = vec![];
		out.write_u16::<LE>(models.len() as u16).unwrap();
		for (number, _) in models {
			out.write_u16::<LE>(*number).unwrap();
		}
		out.resize(out.len().next_multiple_of(4), 0);
		for (_, blob) in models {
			out.write_i32::<LE>(blob.len() as i32).unwrap();
			out.extend_from_slice(blob);
		}
		out.resize(out.len().next_multiple_of(2048), 0);
		out
	}

	#[test]
	fn area_models_fill_empty_slots() {
		let events = Events::default();
		let log = events.0.clone();
		let mut registry = ModelRegistry::new(Box::new(events));
		registry.read_names(&mut Cursor::new(b"BASE\0\0\0TREE\0".to_vec()), 12).unwrap();
		registry.read_models(&mut Cursor::new(model_lump(&[model_blob(-1, &[[2, 2, 2]], 0, &[])]))).unwrap();
		let buffer = area_models(&[
			(3, model_blob(0, &[], 0, &[])),
			(0, model_blob(-1, &[[9, 9, 9]], 0, &[])),
			(5000, model_blob(-1, &[], 0, &[])),
		]);
		let size = buffer.len();
		assert_eq!(registry.read_area_models(&mut Cursor::new(buffer), size).unwrap(), 1);
		let slot = registry.get_by_index(3).unwrap();
		assert_eq!(slot.name.as_deref(), Some("TREE"));
		assert_eq!(slot.base_instance, Some(0));
		assert_eq!(registry.model_source(3).unwrap().vertex_ref.vertex(0), Some(I16Vec3::splat(2)));
		assert_eq!(*log.borrow(), vec!["load 0".to_string(), "load 3".to_string()]);
	}

	#[test]
	fn observer_sees_load_and_free() {
		let events = Events::default();
		let log = events.0.clone();
		let mut registry = ModelRegistry::new(Box::new(events));
		let lump = model_lump(&[vec![], model_blob(-1, &[], 0, &[])]);
		registry.read_models(&mut Cursor::new(lump)).unwrap();
		drop(registry);
		assert_eq!(*log.borrow(), vec!["load 1".to_string(), "free 1".to_string()]);
	}
}
