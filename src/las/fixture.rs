//! Writes small synthetic LAS files for the decoder tests.

use crate::las::format::{FormatCapabilities, WavePacket};
use byteorder::{LittleEndian, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone, Debug, Default)]
pub struct FixturePoint {
	pub position: [f64; 3],
	pub intensity: u16,
	pub return_number: u8,
	pub number_of_returns: u8,
	pub scan_direction: bool,
	pub edge: bool,
	pub classification: u8,
	/// Raw value: whole degrees for legacy formats, 0.006 degree steps for
	/// extended ones.
	pub scan_angle: i16,
	pub user_data: u8,
	pub point_source_id: u16,
	pub gps_time: f64,
	pub color: [u16; 3],
	pub wave: WavePacket,
}

pub fn random_points(n: usize, seed: u64) -> Vec<FixturePoint> {
	let mut rng = StdRng::seed_from_u64(seed);
	(0..n)
		.map(|_| FixturePoint {
			position: [
				rng.gen_range(-50.0..50.0),
				rng.gen_range(0.0..200.0),
				rng.gen_range(10.0..20.0),
			],
			intensity: rng.gen(),
			return_number: 1,
			number_of_returns: 1,
			classification: 2,
			gps_time: rng.gen_range(0.0..1000.0),
			color: [rng.gen_range(0..256), rng.gen_range(0..256), rng.gen_range(0..256)],
			..FixturePoint::default()
		})
		.collect()
}

pub struct FixtureFile {
	pub format: u8,
	pub minor: u8,
	pub scale: f64,
	pub offset: [f64; 3],
	pub extra_bytes: u16,
	pub vlr_bytes: usize,
	pub zero_legacy_count: bool,
	pub points: Vec<FixturePoint>,
}

impl FixtureFile {
	pub fn new(format: u8, minor: u8, points: Vec<FixturePoint>) -> FixtureFile {
		FixtureFile {
			format,
			minor,
			scale: 0.01,
			offset: [0.0, 0.0, 0.0],
			extra_bytes: 0,
			vlr_bytes: 0,
			zero_legacy_count: false,
			points,
		}
	}

	fn quantize(&self, p: &[f64; 3]) -> [i32; 3] {
		let mut q = [0i32; 3];
		for axis in 0..3 {
			q[axis] = ((p[axis] - self.offset[axis]) / self.scale).round() as i32;
		}
		q
	}

	fn dequantize(&self, q: &[i32; 3]) -> [f64; 3] {
		let mut p = [0f64; 3];
		for axis in 0..3 {
			p[axis] = q[axis] as f64 * self.scale + self.offset[axis];
		}
		p
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let caps = FormatCapabilities::of(self.format).unwrap();
		let header_size: usize = if self.minor >= 4 { 375 } else { 227 };
		let record_length = caps.min_record_length() + self.extra_bytes as usize;
		let offset_to_points = header_size + self.vlr_bytes;

		let mut min = [f64::INFINITY; 3];
		let mut max = [f64::NEG_INFINITY; 3];
		for point in &self.points {
			let p = self.dequantize(&self.quantize(&point.position));
			for axis in 0..3 {
				min[axis] = min[axis].min(p[axis]);
				max[axis] = max[axis].max(p[axis]);
			}
		}

		let mut header = vec![0u8; header_size];
		header[0..4].copy_from_slice(b"LASF");
		header[24] = 1;
		header[25] = self.minor;
		(&mut header[94..]).write_u16::<LittleEndian>(header_size as u16).unwrap();
		(&mut header[96..]).write_u32::<LittleEndian>(offset_to_points as u32).unwrap();
		(&mut header[100..]).write_u32::<LittleEndian>(if self.vlr_bytes > 0 { 1 } else { 0 }).unwrap();
		header[104] = self.format;
		(&mut header[105..]).write_u16::<LittleEndian>(record_length as u16).unwrap();
		let legacy_count = if self.zero_legacy_count { 0 } else { self.points.len() as u32 };
		(&mut header[107..]).write_u32::<LittleEndian>(legacy_count).unwrap();
		{
			let mut at = &mut header[131..];
			for _ in 0..3 {
				at.write_f64::<LittleEndian>(self.scale).unwrap();
			}
			for axis in 0..3 {
				at.write_f64::<LittleEndian>(self.offset[axis]).unwrap();
			}
			for axis in 0..3 {
				at.write_f64::<LittleEndian>(max[axis]).unwrap();
				at.write_f64::<LittleEndian>(min[axis]).unwrap();
			}
		}
		if self.minor >= 4 {
			(&mut header[247..]).write_u64::<LittleEndian>(self.points.len() as u64).unwrap();
		}

		let mut bytes = header;
		bytes.extend(std::iter::repeat(0xAB).take(self.vlr_bytes));
		for point in &self.points {
			bytes.extend_from_slice(&self.record(&caps, record_length, point));
		}
		bytes
	}

	fn record(&self, caps: &FormatCapabilities, length: usize, point: &FixturePoint) -> Vec<u8> {
		let mut r = vec![0u8; length];
		let q = self.quantize(&point.position);
		{
			let mut at = &mut r[..];
			for value in q.iter() {
				at.write_i32::<LittleEndian>(*value).unwrap();
			}
			at.write_u16::<LittleEndian>(point.intensity).unwrap();
		}
		let flags = (point.scan_direction as u8) << 6 | (point.edge as u8) << 7;
		if caps.extended {
			r[14] = (point.return_number & 0x0F) | (point.number_of_returns & 0x0F) << 4;
			r[15] = flags;
			r[16] = point.classification;
			r[17] = point.user_data;
			(&mut r[18..]).write_i16::<LittleEndian>(point.scan_angle).unwrap();
			(&mut r[20..]).write_u16::<LittleEndian>(point.point_source_id).unwrap();
		} else {
			r[14] = (point.return_number & 0x07) | (point.number_of_returns & 0x07) << 3 | flags;
			r[15] = point.classification & 0x1F;
			r[16] = point.scan_angle as i8 as u8;
			r[17] = point.user_data;
			(&mut r[18..]).write_u16::<LittleEndian>(point.point_source_id).unwrap();
		}
		if caps.has_gps_time {
			(&mut r[caps.gps_time_offset()..]).write_f64::<LittleEndian>(point.gps_time).unwrap();
		}
		if caps.has_color {
			let mut at = &mut r[caps.color_offset()..];
			for channel in point.color.iter() {
				at.write_u16::<LittleEndian>(*channel).unwrap();
			}
		}
		if caps.has_wave_packet {
			let wave = &point.wave;
			let mut at = &mut r[caps.wave_packet_offset()..];
			at.write_u8(wave.descriptor_index).unwrap();
			at.write_u64::<LittleEndian>(wave.byte_offset).unwrap();
			at.write_u32::<LittleEndian>(wave.size).unwrap();
			at.write_f32::<LittleEndian>(wave.return_point_location).unwrap();
			at.write_f32::<LittleEndian>(wave.dx).unwrap();
			at.write_f32::<LittleEndian>(wave.dy).unwrap();
			at.write_f32::<LittleEndian>(wave.dz).unwrap();
		}
		r
	}
}
