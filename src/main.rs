use std::{env::args, fs::{self, File}, io::BufReader, path::PathBuf};
use anyhow::{bail, Context, Result};
use drv_reader::{
	level::Level,
	models::{CarModelKind, ModelSource, MAX_CAR_MODELS},
};
use drv_tool::{render_model::RenderModel, save_image};
use itertools::iproduct;
use log::{debug, info};

#[derive(Default)]
struct BuildStats {
	models: usize,
	vertices: usize,
	triangles: usize,
	batches: usize,
}

impl BuildStats {
	fn add(&mut self, name: &str, source: ModelSource) {
		let model = RenderModel::new(source);
		debug!(
			"{}: {} vertices, {} triangles, {} batches",
			name,
			model.vertices().len(),
			model.triangle_count(),
			model.batches().len(),
		);
		self.models += 1;
		self.vertices += model.vertices().len();
		self.triangles += model.triangle_count();
		self.batches += model.batches().len();
	}
}

fn main() -> Result<()> {
	env_logger::init();
	let mut args = args().skip(1);
	let Some(level_path) = args.next() else {
		bail!("usage: drv_tool <level file> [output dir]");
	};
	let out_dir = args.next().map(PathBuf::from);

	let file = File::open(&level_path).with_context(|| format!("failed to open {}", level_path))?;
	let mut reader = BufReader::new(file);
	let mut level = Level::read(&mut reader).with_context(|| format!("failed to read {}", level_path))?;
	info!("{}: {:?}", level_path, level.ctx.format);
	info!("region map:\n{}", level.map.region_map());

	let spooled = level.spool_all_regions(&mut reader);
	let objects = (0..level.map.region_count()).map(|region| level.map.total_cell_objects(region)).sum::<usize>();
	info!("{} regions spooled, {} cell objects", spooled, objects);

	let mut stats = BuildStats::default();
	for slot in level.models.loaded_models() {
		if let Some(source) = level.models.model_source(slot.index) {
			stats.add(slot.name.as_deref().unwrap_or("<unnamed>"), source);
		}
	}
	let kinds = [CarModelKind::Clean, CarModelKind::Damaged, CarModelKind::Low];
	for (index, kind) in iproduct!(0..MAX_CAR_MODELS, kinds) {
		if let Some(source) = level.models.car_model_source(index, kind) {
			stats.add(&format!("car {} {:?}", index, kind), source);
		}
	}
	info!(
		"{} render models: {} vertices, {} triangles, {} batches",
		stats.models,
		stats.vertices,
		stats.triangles,
		stats.batches,
	);

	if let Some(out_dir) = out_dir {
		fs::create_dir_all(&out_dir).with_context(|| format!("failed to create {}", out_dir.display()))?;
		let written = save_image::save_pages(&level.textures, &out_dir)?;
		info!("{} page images written to {}", written, out_dir.display());
	}
	Ok(())
}
