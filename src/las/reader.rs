use crate::error::DecodeError;
use crate::las::format::{FormatCapabilities, WavePacket, WAVE_PACKET_LENGTH};
use crate::las::header::LasHeader;
use crate::model::chunk::{Chunk, Rgb8};
use crate::model::vector3::Vector3;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use std::io::{self, Read};
use vob::Vob;

const PREALLOCATE_LIMIT: usize = 65_536;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorDepth {
	/// Every channel was already <= 255 and was kept as is.
	Narrowed,
	/// Channels were shifted right by 8.
	Shifted,
}

#[derive(Clone, Debug)]
pub struct PointBatch {
	pub positions: Vec<Vector3>,
	pub intensities: Vec<u16>,
	pub return_numbers: Vec<u8>,
	pub numbers_of_returns: Vec<u8>,
	pub scan_direction: Vob,
	pub edge_of_flight_line: Vob,
	pub classifications: Vec<u8>,
	/// Degrees.
	pub scan_angles: Vec<f32>,
	pub user_data: Vec<u8>,
	pub point_source_ids: Vec<u16>,
	pub gps_times: Option<Vec<f64>>,
	pub colors: Option<Vec<Rgb8>>,
	pub color_depth: Option<ColorDepth>,
	pub wave_packets: Option<Vec<WavePacket>>,
}

impl PointBatch {
	fn with_capacity(n: usize, caps: &FormatCapabilities) -> PointBatch {
		PointBatch {
			positions: Vec::with_capacity(n),
			intensities: Vec::with_capacity(n),
			return_numbers: Vec::with_capacity(n),
			numbers_of_returns: Vec::with_capacity(n),
			scan_direction: Vob::with_capacity(n),
			edge_of_flight_line: Vob::with_capacity(n),
			classifications: Vec::with_capacity(n),
			scan_angles: Vec::with_capacity(n),
			user_data: Vec::with_capacity(n),
			point_source_ids: Vec::with_capacity(n),
			gps_times: caps.has_gps_time.then(|| Vec::with_capacity(n)),
			colors: None,
			color_depth: None,
			wave_packets: caps.has_wave_packet.then(|| Vec::with_capacity(n)),
		}
	}

	pub fn len(&self) -> usize {
		self.positions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.positions.is_empty()
	}

	pub fn to_chunk(&self) -> Chunk {
		Chunk::from_parts(
			self.positions.clone(),
			self.colors.clone(),
			None,
			Some(self.intensities.iter().map(|&i| i as i32).collect()),
		)
	}
}

fn narrow_colors(raw: &[[u16; 3]]) -> (Vec<Rgb8>, ColorDepth) {
	let fits = raw.iter().all(|c| c.iter().all(|&v| v <= 255));
	if fits {
		let colors = raw.iter().map(|c| [c[0] as u8, c[1] as u8, c[2] as u8]).collect();
		(colors, ColorDepth::Narrowed)
	} else {
		let colors = raw
			.iter()
			.map(|c| [(c[0] >> 8) as u8, (c[1] >> 8) as u8, (c[2] >> 8) as u8])
			.collect();
		(colors, ColorDepth::Shifted)
	}
}

/// Streaming reader over uncompressed LAS point records.
pub struct LasReader<R> {
	reader: R,
	header: LasHeader,
	caps: FormatCapabilities,
	chunk_size: Option<usize>,
	next_index: u64,
	verbose: bool,
	record: Vec<u8>,
	failed: bool,
}

impl<R: Read> LasReader<R> {
	pub fn new(mut reader: R) -> Result<LasReader<R>, DecodeError> {
		let header = LasHeader::read(&mut reader)?;
		let skip = (header.offset_to_point_data - header.header_size as u32) as u64;
		let skipped = io::copy(&mut (&mut reader).take(skip), &mut io::sink())?;
		if skipped < skip {
			return Err(DecodeError::InvalidHeader(format!(
				"stream ends inside the variable length records ({} of {} bytes)",
				skipped, skip
			)));
		}
		let caps = header.capabilities();
		let record = vec![0u8; header.record_length as usize];
		Ok(LasReader {
			reader,
			header,
			caps,
			chunk_size: None,
			next_index: 0,
			verbose: false,
			record,
			failed: false,
		})
	}

	/// At most `n` points per batch. `None` or zero reads everything at once.
	pub fn with_chunk_size(mut self, n: Option<usize>) -> LasReader<R> {
		self.chunk_size = n.filter(|&n| n > 0);
		self
	}

	pub fn verbose(mut self, verbose: bool) -> LasReader<R> {
		self.verbose = verbose;
		self
	}

	pub fn header(&self) -> &LasHeader {
		&self.header
	}

	pub fn remaining(&self) -> u64 {
		self.header.point_count().saturating_sub(self.next_index)
	}

	pub fn read_batch(&mut self) -> Result<Option<PointBatch>, DecodeError> {
		let remaining = self.remaining();
		if remaining == 0 {
			return Ok(None);
		}
		let n = match self.chunk_size {
			Some(size) => remaining.min(size as u64),
			None => remaining,
		} as usize;

		if self.verbose && self.next_index == 0 {
			self.log_header_diagnostics();
		}

		// the header count is untrusted until the records are read
		let reserve = n.min(PREALLOCATE_LIMIT);
		let mut batch = PointBatch::with_capacity(reserve, &self.caps);
		let mut raw_colors: Vec<[u16; 3]> = Vec::with_capacity(if self.caps.has_color { reserve } else { 0 });
		let mut outside = 0;
		for _ in 0..n {
			if let Err(e) = self.reader.read_exact(&mut self.record) {
				return Err(if e.kind() == io::ErrorKind::UnexpectedEof {
					DecodeError::Truncated {
						point_index: self.next_index,
						expected: self.header.point_count(),
					}
				} else {
					DecodeError::Io(e)
				});
			}
			self.decode_record(&mut batch, &mut raw_colors);
			if self.verbose {
				if let Some(p) = batch.positions.last() {
					if !self.header.bounds.contains(p) {
						outside += 1;
					}
				}
			}
			self.next_index += 1;
		}

		if self.caps.has_color {
			let (colors, depth) = narrow_colors(&raw_colors);
			batch.colors = Some(colors);
			batch.color_depth = Some(depth);
		}
		if outside > 0 {
			debug!("{} points of this batch lie outside the header bounds", outside);
		}
		Ok(Some(batch))
	}

	fn decode_record(&self, batch: &mut PointBatch, raw_colors: &mut Vec<[u16; 3]>) {
		let r = &self.record[..];
		let caps = &self.caps;
		let position = self.header.dequantize(
			LittleEndian::read_i32(&r[0..4]),
			LittleEndian::read_i32(&r[4..8]),
			LittleEndian::read_i32(&r[8..12]),
		);
		batch.positions.push(position);
		batch.intensities.push(LittleEndian::read_u16(&r[12..14]));

		// a record carries either the 3 bit legacy or the 4 bit extended return fields
		let (returns, scan_direction, edge, classification, scan_angle, user_data, source_id) = if caps.extended {
			(
				(r[14] & 0x0F, r[14] >> 4),
				r[15] & 0x40 != 0,
				r[15] & 0x80 != 0,
				r[16],
				LittleEndian::read_i16(&r[18..20]) as f32 * 0.006,
				r[17],
				LittleEndian::read_u16(&r[20..22]),
			)
		} else {
			(
				(r[14] & 0x07, (r[14] >> 3) & 0x07),
				r[14] & 0x40 != 0,
				r[14] & 0x80 != 0,
				r[15] & 0x1F,
				r[16] as i8 as f32,
				r[17],
				LittleEndian::read_u16(&r[18..20]),
			)
		};
		batch.return_numbers.push(returns.0);
		batch.numbers_of_returns.push(returns.1);
		batch.scan_direction.push(scan_direction);
		batch.edge_of_flight_line.push(edge);
		batch.classifications.push(classification);
		batch.scan_angles.push(scan_angle);
		batch.user_data.push(user_data);
		batch.point_source_ids.push(source_id);

		if let Some(times) = batch.gps_times.as_mut() {
			let at = caps.gps_time_offset();
			times.push(LittleEndian::read_f64(&r[at..at + 8]));
		}
		if caps.has_color {
			let at = caps.color_offset();
			raw_colors.push([
				LittleEndian::read_u16(&r[at..at + 2]),
				LittleEndian::read_u16(&r[at + 2..at + 4]),
				LittleEndian::read_u16(&r[at + 4..at + 6]),
			]);
		}
		if let Some(packets) = batch.wave_packets.as_mut() {
			let at = caps.wave_packet_offset();
			packets.push(WavePacket::parse(&r[at..at + WAVE_PACKET_LENGTH]));
		}
	}

	fn log_header_diagnostics(&self) {
		let header = &self.header;
		debug!(
			"LAS {}.{} format {} record length {} points {}",
			header.version_major,
			header.version_minor,
			header.point_format,
			header.record_length,
			header.point_count()
		);
		let extra = header.record_length as usize - self.caps.min_record_length();
		if extra > 0 {
			debug!("skipping {} extra bytes per record", extra);
		}
		if let Some(extended) = header.extended_point_count {
			if header.legacy_point_count != 0 && extended != header.legacy_point_count as u64 {
				warn!(
					"legacy point count {} disagrees with extended count {}",
					header.legacy_point_count, extended
				);
			}
		}
	}

	pub fn chunks(self) -> impl Iterator<Item = Result<Chunk, DecodeError>> {
		self.map(|batch| batch.map(|b| b.to_chunk()))
	}
}

impl<R: Read> Iterator for LasReader<R> {
	type Item = Result<PointBatch, DecodeError>;

	/// A decode error is yielded once, then the iterator ends.
	fn next(&mut self) -> Option<Self::Item> {
		if self.failed {
			return None;
		}
		match self.read_batch() {
			Ok(batch) => batch.map(Ok),
			Err(e) => {
				self.failed = true;
				Some(Err(e))
			}
		}
	}
}
