pub mod render_model;
pub mod save_image;
