use bitfield::bitfield;
use crate::Readable;

bitfield! {
	#[derive(Clone, Copy, Default, PartialEq, Eq)]
	pub struct FaceFlags(u8);
	impl Debug;
	pub quad, set_quad: 0;
	/// Face carries a flat color
	pub rgb, set_rgb: 1;
	pub textured, set_textured: 2;
	/// Face carries per-vertex point normal indices
	pub vert_normal, set_vert_normal: 3;
}

impl FaceFlags {
	/// Flags that take part in vertex welding.
	pub fn weld_flags(self) -> FaceFlags {
		let mut flags = self;
		flags.set_quad(false);
		flags.set_rgb(false);
		flags
	}

	pub fn num_verts(self) -> usize {
		match self.quad() {
			true => 4,
			false => 3,
		}
	}
}

/// Decoded polygon, common to every encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Face {
	pub flags: FaceFlags,
	pub page: u8,
	pub detail: u8,
	pub vindices: [u8; 4],
	pub uv: [[u8; 2]; 4],
	pub nindices: [u8; 4],
	pub color: [u8; 4],
}

impl Face {
	pub fn vertices(&self) -> &[u8] {
		&self.vindices[..self.flags.num_verts()]
	}

	pub fn normals(&self) -> &[u8] {
		&self.nindices[..self.flags.num_verts()]
	}

	/// Texture page, or `None` for untextured faces and the invalid page 255.
	pub fn texture_page(&self) -> Option<u8> {
		match (self.flags.textured(), self.page) {
			(false, _) | (true, 255) => None,
			(true, page) => Some(page),
		}
	}
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyQuadLegacy {
	#[skip_2]
	pub vindices: [u8; 4],
	pub spare: u8,
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyF3 {
	pub vindices: [u8; 3],
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyF4 {
	#[skip_2]
	pub spare: u8,
	pub vindices: [u8; 4],
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyFT3 {
	pub page: u8,
	pub detail: u8,
	pub spare: u8,
	pub vindices: [u8; 4],
	pub uv: [[u8; 2]; 3],
	#[skip_2]
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyFT4 {
	pub page: u8,
	pub detail: u8,
	pub spare: u8,
	pub vindices: [u8; 4],
	pub uv: [[u8; 2]; 4],
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyG3 {
	#[skip_2]
	pub spare: u8,
	pub vindices: [u8; 4],
	pub nindices: [u8; 4],
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyG4 {
	#[skip_2]
	pub spare: u8,
	pub vindices: [u8; 4],
	pub nindices: [u8; 4],
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyGT3 {
	pub page: u8,
	pub detail: u8,
	pub spare: u8,
	pub vindices: [u8; 4],
	pub nindices: [u8; 4],
	pub uv: [[u8; 2]; 3],
	#[skip_2]
	pub color: [u8; 4],
}

#[derive(Readable, Clone, Copy, Debug)]
pub struct PolyGT4 {
	pub page: u8,
	pub detail: u8,
	pub spare: u8,
	pub vindices: [u8; 4],
	pub nindices: [u8; 4],
	pub uv: [[u8; 2]; 4],
	pub color: [u8; 4],
	pub spare2: [u8; 4],
}

/// Every known polygon encoding, selected by the low 5 bits of the first byte.
#[derive(Clone, Copy, Debug)]
pub enum PolyKind {
	QuadLegacy(PolyQuadLegacy),
	F3(PolyF3),
	F4(PolyF4),
	FT3(PolyFT3),
	FT4(PolyFT4),
	G3(PolyG3),
	G4(PolyG4),
	GT3(PolyGT3),
	GT4(PolyGT4),
}

pub const POLY_TAG_MASK: u8 = 31;

fn pad3(v: [u8; 3]) -> [u8; 4] {
	[v[0], v[1], v[2], 0]
}

fn pad_uv3(uv: [[u8; 2]; 3]) -> [[u8; 2]; 4] {
	[uv[0], uv[1], uv[2], [0; 2]]
}

fn flags(quad: bool, rgb: bool, textured: bool, vert_normal: bool) -> FaceFlags {
	let mut flags = FaceFlags(0);
	flags.set_quad(quad);
	flags.set_rgb(rgb);
	flags.set_textured(textured);
	flags.set_vert_normal(vert_normal);
	flags
}

impl PolyKind {
	/// Reads the record following the tag byte. `None` for unknown tags or truncated records.
	pub fn read(bytes: &[u8]) -> Option<(PolyKind, usize)> {
		let (&tag, mut body) = bytes.split_first()?;
		let kind = match tag & POLY_TAG_MASK {
			1 => PolyKind::QuadLegacy(Readable::read(&mut body).ok()?),
			2 => PolyKind::F3(Readable::read(&mut body).ok()?),
			3 => PolyKind::F4(Readable::read(&mut body).ok()?),
			4 => PolyKind::FT3(Readable::read(&mut body).ok()?),
			5 | 6 | 7 => PolyKind::FT4(Readable::read(&mut body).ok()?),
			8 => PolyKind::G3(Readable::read(&mut body).ok()?),
			9 => PolyKind::G4(Readable::read(&mut body).ok()?),
			10 => PolyKind::GT3(Readable::read(&mut body).ok()?),
			11 => PolyKind::GT4(Readable::read(&mut body).ok()?),
			_ => return None,
		};
		Some((kind, bytes.len() - body.len()))
	}

	pub fn to_face(&self) -> Face {
		let mut face = Face::default();
		match *self {
			PolyKind::QuadLegacy(p) => {
				face.flags = flags(true, false, false, false);
				face.vindices = p.vindices;
			},
			PolyKind::F3(p) => {
				face.flags = flags(false, true, false, false);
				face.vindices = pad3(p.vindices);
				face.color = p.color;
			},
			PolyKind::F4(p) => {
				face.flags = flags(true, true, false, false);
				face.vindices = p.vindices;
				face.color = p.color;
			},
			PolyKind::FT3(p) => {
				face.flags = flags(false, true, true, false);
				face.page = p.page;
				face.detail = p.detail;
				face.vindices = p.vindices;
				face.uv = pad_uv3(p.uv);
				face.color = p.color;
			},
			PolyKind::FT4(p) => {
				face.flags = flags(true, true, true, false);
				face.page = p.page;
				face.detail = p.detail;
				face.vindices = p.vindices;
				face.uv = p.uv;
				face.color = p.color;
			},
			PolyKind::G3(p) => {
				face.flags = flags(false, true, false, true);
				face.vindices = p.vindices;
				face.nindices = p.nindices;
				face.color = p.color;
			},
			PolyKind::G4(p) => {
				face.flags = flags(true, true, false, true);
				face.vindices = p.vindices;
				face.nindices = p.nindices;
				face.color = p.color;
			},
			PolyKind::GT3(p) => {
				face.flags = flags(false, true, true, true);
				face.page = p.page;
				face.detail = p.detail;
				face.vindices = p.vindices;
				face.nindices = p.nindices;
				face.uv = pad_uv3(p.uv);
				face.color = p.color;
			},
			PolyKind::GT4(p) => {
				face.flags = flags(true, true, true, true);
				face.page = p.page;
				face.detail = p.detail;
				face.vindices = p.vindices;
				face.nindices = p.nindices;
				face.uv = p.uv;
				face.color = p.color;
			},
		}
		face
	}
}

/// Decodes one polygon record. `None` stands for an unknown or truncated encoding,
/// which ends the scan of a polygon stream.
pub fn decode_poly(bytes: &[u8]) -> Option<(Face, usize)> {
	let (kind, size) = PolyKind::read(bytes)?;
	Some((kind.to_face(), size))
}
