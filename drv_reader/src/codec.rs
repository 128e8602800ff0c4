/// Texture pages are 256x256 texels.
pub const TEXPAGE_DIM: usize = 256;
/// Two 4-bit texels per byte.
pub const TEXPAGE_ROW_BYTES: usize = TEXPAGE_DIM / 2;
pub const TEXPAGE_4BIT_SIZE: usize = TEXPAGE_ROW_BYTES * TEXPAGE_DIM;
pub const TEXPAGE_NUM_PIXELS: usize = TEXPAGE_DIM * TEXPAGE_DIM;

/// Written in place of color 0 when the transparency key is restored.
pub const TRANSPARENCY_KEY: [u8; 4] = [255, 0, 255, 0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
	Rgba,
	Bgra,
}

fn next_byte(src: &[u8], pos: &mut usize) -> Option<u8> {
	let byte = *src.get(*pos)?;
	*pos += 1;
	Some(byte)
}

/// Decodes the page run-length scheme into `dest`, filling it from the last byte backwards.
///
/// A control byte with the high bit set repeats the following byte `2 - control` times (3 to 130),
/// otherwise `control + 1` literal bytes follow. Returns the number of source bytes consumed,
/// or `None` if `src` ends before `dest` is full.
pub fn unpack(src: &[u8], dest: &mut [u8]) -> Option<usize> {
	let mut pos = 0;
	let mut remaining = dest.len();
	while remaining > 0 {
		let control = next_byte(src, &mut pos)? as i8;
		if control < 0 {
			let value = next_byte(src, &mut pos)?;
			let run = (2 - control as isize) as usize;
			for _ in 0..run.min(remaining) {
				remaining -= 1;
				dest[remaining] = value;
			}
		} else {
			for _ in 0..=control {
				if remaining == 0 {
					break;
				}
				remaining -= 1;
				dest[remaining] = next_byte(src, &mut pos)?;
			}
		}
	}
	Some(pos)
}

/// Expands a 5-5-5-1 color (red in the low bits) to 8 bits per channel.
pub fn color_to_rgba(color: u16, order: ChannelOrder, restore_transparency_key: bool) -> [u8; 4] {
	if restore_transparency_key && color == 0 {
		return TRANSPARENCY_KEY;
	}
	let r = (color & 0x1F) as u8 * 8;
	let g = ((color >> 5) & 0x1F) as u8 * 8;
	let b = ((color >> 10) & 0x1F) as u8 * 8;
	let a = (color >> 15) as u8;
	match order {
		ChannelOrder::Rgba => [r, g, b, a],
		ChannelOrder::Bgra => [b, g, r, a],
	}
}
