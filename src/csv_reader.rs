use crate::error::ImportError;
use crate::model::chunk::Chunk;
use crate::model::vector3::Vector3;
use csv::{DeserializeRecordsIntoIter, Reader};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Intensity {
	Int(u16),
	Float(f32),
}

impl Intensity {
	fn value(&self) -> i32 {
		match *self {
			Intensity::Int(i) => i as i32,
			Intensity::Float(f) => f.round() as i32,
		}
	}
}

#[derive(Debug, Deserialize)]
struct Point {
	x: f64,
	y: f64,
	z: f64,
	intensity: Option<Intensity>,
}

/// Chunks of up to `chunk_size` rows from a headed `x,y,z[,intensity]` CSV
/// stream. A chunk carries intensities when any of its rows has one; rows
/// without a value get 0.
pub struct CsvChunks<R: Read> {
	records: DeserializeRecordsIntoIter<R, Point>,
	chunk_size: usize,
	done: bool,
}

impl<R: Read> CsvChunks<R> {
	pub fn new(reader: R, chunk_size: Option<usize>) -> CsvChunks<R> {
		CsvChunks {
			records: Reader::from_reader(reader).into_deserialize(),
			chunk_size: chunk_size.unwrap_or(usize::MAX).max(1),
			done: false,
		}
	}

	fn next_chunk(&mut self) -> Result<Option<Chunk>, ImportError> {
		let mut positions = Vec::new();
		let mut intensities = Vec::new();
		let mut any_intensity = false;
		while positions.len() < self.chunk_size {
			let record = match self.records.next() {
				Some(record) => record?,
				None => {
					self.done = true;
					break;
				}
			};
			let Point { x, y, z, intensity } = record;
			positions.push(Vector3::new(x, y, z));
			any_intensity |= intensity.is_some();
			intensities.push(intensity.map_or(0, |i| i.value()));
		}
		if positions.is_empty() {
			return Ok(None);
		}
		let intensities = if any_intensity { Some(intensities) } else { None };
		Ok(Some(Chunk::new(positions, None, None, intensities, None)?))
	}
}

impl<R: Read> Iterator for CsvChunks<R> {
	type Item = Result<Chunk, ImportError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}
		match self.next_chunk() {
			Ok(chunk) => chunk.map(Ok),
			Err(e) => {
				self.done = true;
				Some(Err(e))
			}
		}
	}
}

pub fn from_csv(buf: &[u8]) -> Result<Chunk, ImportError> {
	match CsvChunks::new(buf, None).next() {
		Some(chunk) => chunk,
		None => Ok(Chunk::empty()),
	}
}
