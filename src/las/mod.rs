//! Streaming decoder for uncompressed LAS point records (versions 1.0 - 1.4,
//! point data formats 0 - 10).

pub mod format;
pub mod header;
pub mod reader;

#[cfg(test)]
pub(crate) mod fixture;

pub use format::{FormatCapabilities, WavePacket};
pub use header::LasHeader;
pub use reader::{ColorDepth, LasReader, PointBatch};

use crate::error::DecodeError;
use crate::model::bounds::Bounds;
use std::io::Read;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LasInfo {
	pub count: u64,
	pub bounds: Bounds,
}

pub fn read_info<R: Read>(reader: &mut R) -> Result<LasInfo, DecodeError> {
	let header = LasHeader::read(reader)?;
	Ok(LasInfo {
		count: header.point_count(),
		bounds: header.bounds,
	})
}
