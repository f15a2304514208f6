use crate::error::{Result, ShareError};
use crate::values::{ColorRgba, Pose, Quaternion, Vector3};
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

pub const BOOL_SIZE: usize = 1;
pub const SHORT_SIZE: usize = 2;
pub const INT_SIZE: usize = 4;
pub const LONG_SIZE: usize = 8;
pub const FLOAT_SIZE: usize = 4;
pub const GUID_SIZE: usize = 16;
pub const DATETIME_SIZE: usize = 8;
pub const TIMESPAN_SIZE: usize = 8;
pub const VECTOR3_SIZE: usize = 3 * FLOAT_SIZE;
pub const QUATERNION_SIZE: usize = 4 * FLOAT_SIZE;
pub const POSE_SIZE: usize = VECTOR3_SIZE + QUATERNION_SIZE;
pub const COLOR_SIZE: usize = 4 * FLOAT_SIZE;

pub fn string_size(value: &str) -> usize {
    INT_SIZE + value.len()
}

pub fn bytes_size(value: &[u8]) -> usize {
    INT_SIZE + value.len()
}

/// Bounds-checked writer over a caller-supplied buffer.
///
/// Every write verifies capacity up front; overrunning the buffer is a
/// contract violation reported as `BufferTooSmall`, never a panic.
pub struct ByteWriter<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    fn reserve(&mut self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(ShareError::BufferTooSmall {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.reserve(1)?;
        self.buffer[self.offset] = value;
        self.offset += 1;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(if value { 1 } else { 0 })
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.buffer[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.reserve(string_size(value))?;
        self.write_u32(value.len() as u32)?;
        self.write_raw(value.as_bytes())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.reserve(bytes_size(value))?;
        self.write_u32(value.len() as u32)?;
        self.write_raw(value)
    }

    pub fn write_vector3(&mut self, value: &Vector3) -> Result<()> {
        self.reserve(VECTOR3_SIZE)?;
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)
    }

    // Component order on the wire is w,x,y,z. This differs from the natural
    // in-memory order and must be preserved for wire compatibility.
    pub fn write_quaternion(&mut self, value: &Quaternion) -> Result<()> {
        self.reserve(QUATERNION_SIZE)?;
        self.write_f32(value.w)?;
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)
    }

    pub fn write_pose(&mut self, value: &Pose) -> Result<()> {
        self.reserve(POSE_SIZE)?;
        self.write_vector3(&value.position)?;
        self.write_quaternion(&value.rotation)
    }

    pub fn write_color(&mut self, value: &ColorRgba) -> Result<()> {
        self.reserve(COLOR_SIZE)?;
        self.write_f32(value.r)?;
        self.write_f32(value.g)?;
        self.write_f32(value.b)?;
        self.write_f32(value.a)
    }

    pub fn write_guid(&mut self, value: &Uuid) -> Result<()> {
        self.write_raw(value.as_bytes())
    }

    pub fn write_datetime(&mut self, value: &DateTime<Utc>) -> Result<()> {
        self.write_i64(value.timestamp_micros())
    }

    pub fn write_timespan(&mut self, value: &Duration) -> Result<()> {
        self.write_i64(value.num_microseconds().unwrap_or(i64::MAX))
    }
}

/// Bounds-checked reader; the mirror of `ByteWriter`.
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        if self.remaining() < needed {
            return Err(ShareError::BufferTooSmall {
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.take(SHORT_SIZE)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(INT_SIZE)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(INT_SIZE)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(LONG_SIZE)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.take(FLOAT_SIZE)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ShareError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_vector3(&mut self) -> Result<Vector3> {
        Ok(Vector3 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }

    pub fn read_quaternion(&mut self) -> Result<Quaternion> {
        let w = self.read_f32()?;
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        Ok(Quaternion { x, y, z, w })
    }

    pub fn read_pose(&mut self) -> Result<Pose> {
        Ok(Pose {
            position: self.read_vector3()?,
            rotation: self.read_quaternion()?,
        })
    }

    pub fn read_color(&mut self) -> Result<ColorRgba> {
        Ok(ColorRgba {
            r: self.read_f32()?,
            g: self.read_f32()?,
            b: self.read_f32()?,
            a: self.read_f32()?,
        })
    }

    pub fn read_guid(&mut self) -> Result<Uuid> {
        let bytes = self.take(GUID_SIZE)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }

    pub fn read_datetime(&mut self) -> Result<DateTime<Utc>> {
        let micros = self.read_i64()?;
        Utc.timestamp_micros(micros)
            .single()
            .ok_or_else(|| ShareError::InvalidValueString(format!("timestamp out of range: {}", micros)))
    }

    pub fn read_timespan(&mut self) -> Result<Duration> {
        Ok(Duration::microseconds(self.read_i64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut buffer = [0u8; 64];
        let mut writer = ByteWriter::new(&mut buffer);

        writer.write_bool(true).unwrap();
        writer.write_i16(-12345).unwrap();
        writer.write_i32(i32::MIN).unwrap();
        writer.write_i64(i64::MAX).unwrap();
        writer.write_f32(3.5).unwrap();
        let written = writer.offset();

        let mut reader = ByteReader::new(&buffer[..written]);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_i16().unwrap(), -12345);
        assert_eq!(reader.read_i32().unwrap(), i32::MIN);
        assert_eq!(reader.read_i64().unwrap(), i64::MAX);
        assert_eq!(reader.read_f32().unwrap(), 3.5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_string_round_trip() {
        let mut buffer = vec![0u8; 4096];

        for value in ["", "health", "日本語のラベル", &"x".repeat(1000)] {
            let mut writer = ByteWriter::new(&mut buffer);
            writer.write_string(value).unwrap();
            let written = writer.offset();
            assert_eq!(written, string_size(value));

            let mut reader = ByteReader::new(&buffer[..written]);
            assert_eq!(reader.read_string().unwrap(), value);
        }
    }

    #[test]
    fn test_quaternion_wire_order_is_wxyz() {
        let mut buffer = [0u8; QUATERNION_SIZE];
        let mut writer = ByteWriter::new(&mut buffer);
        writer
            .write_quaternion(&Quaternion::new(1.0, 2.0, 3.0, 4.0))
            .unwrap();

        // First component on the wire is w.
        assert_eq!(f32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]), 4.0);
        assert_eq!(f32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]), 1.0);

        let mut reader = ByteReader::new(&buffer);
        assert_eq!(reader.read_quaternion().unwrap(), Quaternion::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_pose_round_trip() {
        let pose = Pose::new(
            Vector3::new(-1.5, 0.0, 220.25),
            Quaternion::new(0.1, -0.2, 0.3, 0.9),
        );

        let mut buffer = [0u8; POSE_SIZE];
        let mut writer = ByteWriter::new(&mut buffer);
        writer.write_pose(&pose).unwrap();

        let mut reader = ByteReader::new(&buffer);
        assert_eq!(reader.read_pose().unwrap(), pose);
    }

    #[test]
    fn test_guid_datetime_timespan_round_trip() {
        let guid = Uuid::new_v4();
        let now = Utc.timestamp_micros(Utc::now().timestamp_micros()).unwrap();
        let span = Duration::microseconds(-987654321);

        let mut buffer = [0u8; GUID_SIZE + DATETIME_SIZE + TIMESPAN_SIZE];
        let mut writer = ByteWriter::new(&mut buffer);
        writer.write_guid(&guid).unwrap();
        writer.write_datetime(&now).unwrap();
        writer.write_timespan(&span).unwrap();

        let mut reader = ByteReader::new(&buffer);
        assert_eq!(reader.read_guid().unwrap(), guid);
        assert_eq!(reader.read_datetime().unwrap(), now);
        assert_eq!(reader.read_timespan().unwrap(), span);
    }

    #[test]
    fn test_write_past_capacity_fails() {
        let mut buffer = [0u8; 3];
        let mut writer = ByteWriter::new(&mut buffer);

        match writer.write_i32(7) {
            Err(ShareError::BufferTooSmall { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected BufferTooSmall, got {:?}", other),
        }

        // A failed write must not advance the offset.
        assert_eq!(writer.offset(), 0);
    }

    #[test]
    fn test_read_past_end_fails() {
        let buffer = [1u8, 2];
        let mut reader = ByteReader::new(&buffer);
        assert!(reader.read_i32().is_err());
    }

    #[test]
    fn test_truncated_string_fails() {
        let mut buffer = [0u8; 16];
        let mut writer = ByteWriter::new(&mut buffer);
        writer.write_string("hello world!").unwrap();

        // Drop the last payload byte.
        let mut reader = ByteReader::new(&buffer[..15]);
        assert!(reader.read_string().is_err());
    }
}
