use crate::error::{QuartzDBError, QuartzDBResult};
use crate::storage::codec::DecodedData;

pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_u8(data: u8) -> Vec<u8> {
        vec![data]
    }

    pub fn decode_u8(bytes: &[u8]) -> QuartzDBResult<DecodedData<u8>> {
        if bytes.is_empty() {
            return Err(QuartzDBError::Internal(
                "bytes exhausted decoding u8".to_string(),
            ));
        }
        Ok((bytes[0], 1))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> QuartzDBResult<DecodedData<u32>> {
        let slice = bytes.get(0..4).ok_or_else(|| {
            QuartzDBError::Internal(format!("bytes length {} too short for u32", bytes.len()))
        })?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(slice);
        Ok((u32::from_be_bytes(buf), 4))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> QuartzDBResult<DecodedData<i32>> {
        let slice = bytes.get(0..4).ok_or_else(|| {
            QuartzDBError::Internal(format!("bytes length {} too short for i32", bytes.len()))
        })?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(slice);
        Ok((i32::from_be_bytes(buf), 4))
    }

    pub fn encode_u64(data: u64) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u64(bytes: &[u8]) -> QuartzDBResult<DecodedData<u64>> {
        let slice = bytes.get(0..8).ok_or_else(|| {
            QuartzDBError::Internal(format!("bytes length {} too short for u64", bytes.len()))
        })?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        Ok((u64::from_be_bytes(buf), 8))
    }

    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + data.len());
        bytes.extend(Self::encode_u32(data.len() as u32));
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> QuartzDBResult<DecodedData<Vec<u8>>> {
        let (length, offset) = Self::decode_u32(bytes)?;
        let length = length as usize;
        let data = bytes.get(offset..offset + length).ok_or_else(|| {
            QuartzDBError::Internal(format!(
                "bytes length {} too short for {} payload bytes",
                bytes.len(),
                length
            ))
        })?;
        Ok((data.to_vec(), offset + length))
    }

    pub fn encode_string(data: &str) -> Vec<u8> {
        Self::encode_bytes(data.as_bytes())
    }

    pub fn decode_string(bytes: &[u8]) -> QuartzDBResult<DecodedData<String>> {
        let (data, offset) = Self::decode_bytes(bytes)?;
        let string = String::from_utf8(data)
            .map_err(|e| QuartzDBError::Internal(format!("invalid utf8 in string: {}", e)))?;
        Ok((string, offset))
    }
}
