use std::path::Path;
use anyhow::Result;
use drv_reader::{
	codec::{ChannelOrder, TEXPAGE_DIM, TEXPAGE_NUM_PIXELS, TRANSPARENCY_KEY},
	textures::{TexturePage, TextureStore, MAX_EXTRA_CLUTS},
};
use image::{Rgba, RgbaImage};
use log::info;

const IMG_DIM: u32 = TEXPAGE_DIM as u32;

/// Page texels as gray levels, bottom row first, under the converted details.
fn index_preview(page: &TexturePage) -> Option<Vec<[u8; 4]>> {
	let bitmap = page.bitmap()?;
	let mut pixels = vec![[0; 4]; TEXPAGE_NUM_PIXELS];
	for y in 0..TEXPAGE_DIM {
		let row = (TEXPAGE_DIM - y - 1) * TEXPAGE_DIM;
		for x in 0..TEXPAGE_DIM {
			let level = bitmap.texel(x, y) * 16;
			pixels[row + x] = [level, level, level, 255];
		}
	}
	Some(pixels)
}

/// Full-page conversions: the page palettes first, then one layer per extra palette slot in use.
/// Each layer is drawn over the previous one, so details without that palette keep their last colors.
pub fn page_layers(store: &TextureStore, page_index: usize) -> Vec<Vec<[u8; 4]>> {
	let Some(page) = store.page(page_index) else {
		return vec![];
	};
	let Some(mut pixels) = index_preview(page) else {
		return vec![];
	};
	for detail in 0..page.detail_count() {
		page.convert_detail_to_rgba(&mut pixels, detail, None, ChannelOrder::Rgba, true);
	}
	let mut layers = vec![pixels.clone()];
	for slot in 0..MAX_EXTRA_CLUTS {
		let mut matched = false;
		for detail in 0..page.detail_count() {
			if let Some(clut) = store.extra_palette(page_index, detail, slot) {
				matched |= page.convert_detail_to_rgba(&mut pixels, detail, Some(clut), ChannelOrder::Rgba, true);
			}
		}
		if matched {
			layers.push(pixels.clone());
		}
	}
	layers
}

/// Converted pixels are stored bottom row first. The transparency key stays transparent, everything else is opaque.
pub fn to_image(pixels: &[[u8; 4]]) -> RgbaImage {
	let mut img = RgbaImage::new(IMG_DIM, IMG_DIM);
	for (pos, &pixel) in pixels.iter().take(TEXPAGE_NUM_PIXELS).enumerate() {
		let x = pos as u32 % IMG_DIM;
		let y = IMG_DIM - 1 - pos as u32 / IMG_DIM;
		let [r, g, b, _] = pixel;
		let a = if pixel == TRANSPARENCY_KEY { 0 } else { 255 };
		img.put_pixel(x, y, Rgba([r, g, b, a]));
	}
	img
}

/// Writes `PAGE_<n>.png` and `PAGE_<n>_<k>.png` for every loaded page. Returns the number of files written.
pub fn save_pages(store: &TextureStore, dir: &Path) -> Result<usize> {
	let mut written = 0;
	for page_index in 0..store.page_count() {
		let layers = page_layers(store, page_index);
		for (layer, pixels) in layers.iter().enumerate() {
			let name = match layer {
				0 => format!("PAGE_{}.png", page_index),
				_ => format!("PAGE_{}_{}.png", page_index, layer - 1),
			};
			to_image(pixels).save(dir.join(&name))?;
			written += 1;
		}
		if !layers.is_empty() {
			info!("page {}: {} images", page_index, layers.len());
		}
	}
	Ok(written)
}
