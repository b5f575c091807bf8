use crate::error::QuartzDBResult;
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::HeaderPage;

pub struct HeaderPageCodec;

impl HeaderPageCodec {
    pub fn encode(page: &HeaderPage) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(CommonCodec::encode_u32(page.records.len() as u32));
        for (name, root_page_id) in &page.records {
            bytes.extend(CommonCodec::encode_string(name));
            bytes.extend(CommonCodec::encode_i32(*root_page_id));
        }
        bytes
    }

    /// A zeroed page decodes as an empty record table, which is what a fresh
    /// database file presents before the header page is first written.
    pub fn decode(bytes: &[u8]) -> QuartzDBResult<DecodedData<HeaderPage>> {
        let mut offset = 0;
        let (count, consumed) = CommonCodec::decode_u32(bytes)?;
        offset += consumed;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (name, consumed) = CommonCodec::decode_string(&bytes[offset..])?;
            offset += consumed;
            let (root_page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
            offset += consumed;
            records.push((name, root_page_id));
        }
        Ok((HeaderPage { records }, offset))
    }
}
