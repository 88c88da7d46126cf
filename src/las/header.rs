use crate::error::DecodeError;
use crate::las::format::FormatCapabilities;
use crate::model::bounds::Bounds;
use crate::model::vector3::Vector3;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

/// Fields common to LAS 1.0 - 1.2.
const BASE_HEADER_SIZE: usize = 227;
/// LAS 1.4 adds EVLR pointers and the 64 bit counts.
const HEADER_SIZE_1_4: usize = 375;
const EXTENDED_COUNT_OFFSET: u64 = 247;

#[derive(Clone, Debug, PartialEq)]
pub struct LasHeader {
	pub version_major: u8,
	pub version_minor: u8,
	pub header_size: u16,
	pub offset_to_point_data: u32,
	pub number_of_vlrs: u32,
	pub point_format: u8,
	pub record_length: u16,
	pub legacy_point_count: u32,
	pub extended_point_count: Option<u64>,
	pub scale: Vector3,
	pub offset: Vector3,
	pub bounds: Bounds,
}

fn truncated_header(e: io::Error) -> DecodeError {
	if e.kind() == io::ErrorKind::UnexpectedEof {
		DecodeError::InvalidHeader("header truncated".to_string())
	} else {
		DecodeError::Io(e)
	}
}

fn read_vector(cursor: &mut Cursor<&[u8]>) -> io::Result<Vector3> {
	Ok(Vector3::new(
		cursor.read_f64::<LittleEndian>()?,
		cursor.read_f64::<LittleEndian>()?,
		cursor.read_f64::<LittleEndian>()?,
	))
}

impl LasHeader {
	/// Reads exactly `header_size` bytes. Variable length records are left
	/// in the stream.
	pub fn read<R: Read>(reader: &mut R) -> Result<LasHeader, DecodeError> {
		let mut buffer = vec![0u8; BASE_HEADER_SIZE];
		reader.read_exact(&mut buffer).map_err(truncated_header)?;
		if &buffer[0..4] != b"LASF" {
			return Err(DecodeError::InvalidHeader("missing LASF signature".to_string()));
		}

		let mut cursor = Cursor::new(&buffer[..]);
		cursor.set_position(24);
		let version_major = cursor.read_u8()?;
		let version_minor = cursor.read_u8()?;
		cursor.set_position(94);
		let header_size = cursor.read_u16::<LittleEndian>()?;
		let offset_to_point_data = cursor.read_u32::<LittleEndian>()?;
		let number_of_vlrs = cursor.read_u32::<LittleEndian>()?;
		let point_format_byte = cursor.read_u8()?;
		let record_length = cursor.read_u16::<LittleEndian>()?;
		let legacy_point_count = cursor.read_u32::<LittleEndian>()?;

		cursor.set_position(131);
		let scale = read_vector(&mut cursor)?;
		let offset = read_vector(&mut cursor)?;
		let mut extent = [0f64; 6];
		for value in extent.iter_mut() {
			*value = cursor.read_f64::<LittleEndian>()?;
		}
		// stored as max x, min x, max y, min y, max z, min z
		let bounds = Bounds::new(
			Vector3::new(extent[1], extent[3], extent[5]),
			Vector3::new(extent[0], extent[2], extent[4]),
		);

		if version_major != 1 {
			return Err(DecodeError::InvalidHeader(format!(
				"unsupported version {}.{}",
				version_major, version_minor
			)));
		}
		if (header_size as usize) < BASE_HEADER_SIZE {
			return Err(DecodeError::InvalidHeader(format!("header size {} too small", header_size)));
		}
		if offset_to_point_data < header_size as u32 {
			return Err(DecodeError::InvalidHeader(format!(
				"point data offset {} lies inside the header",
				offset_to_point_data
			)));
		}

		let mut rest = vec![0u8; header_size as usize - BASE_HEADER_SIZE];
		reader.read_exact(&mut rest).map_err(truncated_header)?;
		buffer.extend_from_slice(&rest);

		let extended_point_count = if version_minor >= 4 && buffer.len() >= HEADER_SIZE_1_4 {
			let mut cursor = Cursor::new(&buffer[..]);
			cursor.set_position(EXTENDED_COUNT_OFFSET);
			Some(cursor.read_u64::<LittleEndian>()?)
		} else {
			None
		};

		// bits 6 and 7 flag LAZ compressed point data
		if point_format_byte & 0xC0 != 0 {
			return Err(DecodeError::Unsupported(format!(
				"compressed point data (format byte {:#04x})",
				point_format_byte
			)));
		}
		let capabilities = FormatCapabilities::of(point_format_byte).ok_or_else(|| {
			DecodeError::InvalidHeader(format!("unknown point data format {}", point_format_byte))
		})?;
		if (record_length as usize) < capabilities.min_record_length() {
			return Err(DecodeError::InvalidHeader(format!(
				"record length {} is shorter than format {} needs ({})",
				record_length,
				point_format_byte,
				capabilities.min_record_length()
			)));
		}

		Ok(LasHeader {
			version_major,
			version_minor,
			header_size,
			offset_to_point_data,
			number_of_vlrs,
			point_format: point_format_byte,
			record_length,
			legacy_point_count,
			extended_point_count,
			scale,
			offset,
			bounds,
		})
	}

	/// The legacy 32 bit count, or the 64 bit one when the legacy field is
	/// zero in a 1.4 file.
	pub fn point_count(&self) -> u64 {
		match self.extended_point_count {
			Some(extended) if self.legacy_point_count == 0 => extended,
			_ => self.legacy_point_count as u64,
		}
	}

	pub fn capabilities(&self) -> FormatCapabilities {
		// validated in `read`
		FormatCapabilities::of(self.point_format).unwrap_or(FormatCapabilities {
			code: self.point_format,
			has_gps_time: false,
			has_color: false,
			has_wave_packet: false,
			has_nir: false,
			extended: false,
		})
	}

	pub fn dequantize(&self, x: i32, y: i32, z: i32) -> Vector3 {
		Vector3::new(
			x as f64 * self.scale.x + self.offset.x,
			y as f64 * self.scale.y + self.offset.y,
			z as f64 * self.scale.z + self.offset.z,
		)
	}
}
