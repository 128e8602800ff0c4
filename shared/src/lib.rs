pub mod min_max;
