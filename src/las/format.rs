use byteorder::{ByteOrder, LittleEndian};

const RECORD_LENGTHS: [usize; 11] = [20, 28, 26, 34, 57, 63, 30, 36, 38, 59, 67];

/// What the records of one point data format carry. Derived once per file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatCapabilities {
	pub code: u8,
	pub has_gps_time: bool,
	pub has_color: bool,
	pub has_wave_packet: bool,
	pub has_nir: bool,
	/// Formats 6-10: 4 bit return fields, 16 bit scan angle.
	pub extended: bool,
}

impl FormatCapabilities {
	pub fn of(code: u8) -> Option<FormatCapabilities> {
		if code > 10 {
			return None;
		}
		Some(FormatCapabilities {
			code,
			has_gps_time: matches!(code, 1 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 10),
			has_color: matches!(code, 2 | 3 | 5 | 7 | 8 | 10),
			has_wave_packet: matches!(code, 4 | 5 | 9 | 10),
			has_nir: matches!(code, 8 | 10),
			extended: code >= 6,
		})
	}

	pub fn min_record_length(&self) -> usize {
		RECORD_LENGTHS[self.code as usize]
	}

	pub fn gps_time_offset(&self) -> usize {
		if self.extended {
			22
		} else {
			20
		}
	}

	pub fn color_offset(&self) -> usize {
		if self.extended {
			30
		} else {
			20 + if self.has_gps_time { 8 } else { 0 }
		}
	}

	pub fn wave_packet_offset(&self) -> usize {
		self.color_offset() + if self.has_color { 6 } else { 0 } + if self.has_nir { 2 } else { 0 }
	}
}

pub const WAVE_PACKET_LENGTH: usize = 29;

/// Waveform packet sub-record of formats 4, 5, 9 and 10.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct WavePacket {
	pub descriptor_index: u8,
	pub byte_offset: u64,
	pub size: u32,
	pub return_point_location: f32,
	pub dx: f32,
	pub dy: f32,
	pub dz: f32,
}

impl WavePacket {
	pub fn parse(blob: &[u8]) -> WavePacket {
		WavePacket {
			descriptor_index: blob[0],
			byte_offset: LittleEndian::read_u64(&blob[1..9]),
			size: LittleEndian::read_u32(&blob[9..13]),
			return_point_location: LittleEndian::read_f32(&blob[13..17]),
			dx: LittleEndian::read_f32(&blob[17..21]),
			dy: LittleEndian::read_f32(&blob[21..25]),
			dz: LittleEndian::read_f32(&blob[25..29]),
		}
	}
}
