use std::ops::Range;
use drv_reader::{
	models::{Model, ModelSource},
	poly::{decode_poly, Face, FaceFlags, POLY_TAG_MASK},
};
use glam::{vec2, I16Vec3, Vec2, Vec3};
use log::{error, warn};
use shared::min_max::{MinMax, VecMinMax};

/// Fixed-point model units to render units.
pub const RENDER_SCALE: f32 = 1.0 / 4096.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderVertex {
	pub pos: Vec3,
	pub normal: Vec3,
	/// 0..1 across the texture page
	pub tex: Vec2,
}

/// Triangles sharing one texture page, `None` for untextured faces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
	pub page: Option<u8>,
	pub indices: Range<u32>,
}

/// Identity of an output vertex.
#[derive(Clone, Copy, PartialEq, Eq)]
struct WeldKey {
	flags: FaceFlags,
	vertex: u8,
	normal: Option<u8>,
	uv: Option<[u8; 2]>,
}

/// Y is flipped.
fn to_render_space(v: I16Vec3) -> Vec3 {
	v.as_vec3() * Vec3::new(RENDER_SCALE, -RENDER_SCALE, RENDER_SCALE)
}

/// Vertex positions and point normals of a face, `None` if any index is outside the buffers.
fn resolve(face: &Face, vertex_ref: &Model) -> Option<([I16Vec3; 4], [I16Vec3; 4])> {
	let mut positions = [I16Vec3::ZERO; 4];
	let mut normals = [I16Vec3::ZERO; 4];
	for v in 0..face.flags.num_verts() {
		positions[v] = vertex_ref.vertex(face.vindices[v] as usize)?;
		if face.flags.vert_normal() {
			normals[v] = vertex_ref.point_normal(face.nindices[v] as usize)?;
		}
	}
	Some((positions, normals))
}

#[derive(Default)]
struct Builder {
	keys: Vec<WeldKey>,
	vertices: Vec<RenderVertex>,
	groups: Vec<(Option<u8>, Vec<u32>)>,
	extents: Option<MinMax<Vec3>>,
}

impl Builder {
	fn group(&mut self, page: Option<u8>) -> &mut Vec<u32> {
		let index = match self.groups.iter().position(|(p, _)| *p == page) {
			Some(index) => index,
			None => {
				self.groups.push((page, vec![]));
				self.groups.len() - 1
			},
		};
		&mut self.groups[index].1
	}

	fn vertex(&mut self, key: WeldKey, pos: I16Vec3, normal: I16Vec3) -> u32 {
		if let Some(index) = self.keys.iter().position(|k| *k == key) {
			return index as u32;
		}
		let pos = to_render_space(pos);
		match &mut self.extents {
			Some(extents) => extents.update(pos),
			None => self.extents = Some(MinMax::new(pos)),
		}
		let tex = match key.uv {
			Some([u, v]) => (vec2(u as f32, v as f32) + 0.5) / 256.0,
			None => Vec2::ZERO,
		};
		self.keys.push(key);
		self.vertices.push(RenderVertex { pos, normal: to_render_space(normal), tex });
		(self.vertices.len() - 1) as u32
	}

	fn add_face(&mut self, face: &Face, positions: &[I16Vec3; 4], normals: &[I16Vec3; 4]) {
		let num_verts = face.flags.num_verts();
		let smooth = face.flags.vert_normal();
		let mut face_indices = [0u32; 4];
		for v in 0..num_verts {
			let key = WeldKey {
				flags: face.flags.weld_flags(),
				vertex: face.vindices[v],
				normal: smooth.then_some(face.nindices[v]),
				uv: face.flags.textured().then_some(face.uv[v]),
			};
			face_indices[v] = self.vertex(key, positions[v], normals[v]);
		}
		if !smooth {
			let [v0, v1, v2] = [0, 1, 2].map(|v| self.vertices[face_indices[v] as usize].pos);
			let normal = (v2 - v1).cross(v0 - v1).normalize_or_zero();
			for &index in &face_indices[..num_verts] {
				self.vertices[index as usize].normal = normal;
			}
		}
		let [a, b, c, d] = face_indices;
		let group = self.group(face.texture_page());
		match num_verts {
			4 => group.extend_from_slice(&[a, b, c, c, d, a]),
			_ => group.extend_from_slice(&[a, b, c]),
		}
	}
}

/// Indexed triangles of one model, batched by texture page.
#[derive(Clone, Debug, Default)]
pub struct RenderModel {
	vertices: Vec<RenderVertex>,
	indices: Vec<u32>,
	batches: Vec<Batch>,
	extents: Option<MinMax<Vec3>>,
}

impl RenderModel {
	/// Welds the model's faces into a vertex buffer and groups their triangles by texture page.
	/// A bad polygon record ends the scan, keeping the faces built so far.
	pub fn new(source: ModelSource) -> Self {
		let model = source.model;
		let poly_block = model.header.poly_block as usize;
		let mut builder = Builder::default();
		let mut offset = 0;
		for poly in 0..model.header.num_polys as usize {
			let bytes = model.poly_data(offset);
			let at = poly_block + offset;
			let Some(&tag) = bytes.first() else {
				error!("poly {} ofs {}: past the end of the model ({} bytes)", poly, at, model.size());
				break;
			};
			let Some((face, size)) = decode_poly(bytes) else {
				error!("poly {} type {} ofs {}: unknown encoding", poly, tag & POLY_TAG_MASK, at);
				break;
			};
			offset += size;
			let Some((positions, normals)) = resolve(&face, source.vertex_ref) else {
				warn!("poly {} type {} ofs {}: invalid indices", poly, tag & POLY_TAG_MASK, at);
				continue;
			};
			builder.add_face(&face, &positions, &normals);
		}
		let mut indices = vec![];
		let mut batches = vec![];
		for (page, group) in builder.groups {
			let start = indices.len() as u32;
			indices.extend(group);
			batches.push(Batch { page, indices: start..indices.len() as u32 });
		}
		Self { vertices: builder.vertices, indices, batches, extents: builder.extents }
	}

	pub fn destroy(&mut self) {
		*self = Self::default();
	}

	pub fn vertices(&self) -> &[RenderVertex] {
		&self.vertices
	}

	pub fn indices(&self) -> &[u32] {
		&self.indices
	}

	pub fn batches(&self) -> &[Batch] {
		&self.batches
	}

	pub fn batch_indices(&self, batch: &Batch) -> &[u32] {
		&self.indices[batch.indices.start as usize..batch.indices.end as usize]
	}

	/// Bounds of every vertex, `None` for a model without faces.
	pub fn extents(&self) -> Option<&MinMax<Vec3>> {
		self.extents.as_ref()
	}

	pub fn triangle_count(&self) -> usize {
		self.indices.len() / 3
	}
}
