use glam_traits::{GBVec, GVec};

/// Axis-aligned bounds defined by a minimum and maximum.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinMax<T> {
	pub min: T,
	pub max: T,
}

impl<T> MinMax<T> where T: Clone {
	pub fn new(a: T) -> Self {
		Self { min: a.clone(), max: a }
	}
}

pub trait VecMinMax<T> {
	fn update(&mut self, v: T);
	fn extend(&mut self, other: &Self);
	fn contains_point(&self, v: T) -> bool;
	fn contains(&self, other: &Self) -> bool;
}

impl<T> VecMinMax<T> for MinMax<T> where T: GVec {
	fn update(&mut self, a: T) {
		self.min = self.min.min(a);
		self.max = self.max.max(a);
	}

	fn extend(&mut self, other: &Self) {
		self.update(other.min);
		self.update(other.max);
	}

	fn contains_point(&self, v: T) -> bool {
		self.min.cmple(v).all() && self.max.cmpge(v).all()
	}

	fn contains(&self, other: &Self) -> bool {
		self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
	}
}

pub trait VecMinMaxFromIterator: Iterator {
	/// Bounds of every item, `None` for an empty iterator.
	fn min_max(self) -> Option<MinMax<Self::Item>>;
}

impl<T> VecMinMaxFromIterator for T where T: Iterator, T::Item: GVec {
	fn min_max(mut self) -> Option<MinMax<Self::Item>> {
		let mut min_max = MinMax::new(self.next()?);
		for a in self {
			min_max.update(a);
		}
		Some(min_max)
	}
}
