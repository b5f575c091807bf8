use crate::error::{QuartzDBError, QuartzDBResult};
use crate::index::KeyComparator;
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeInternalPageHeader, BPlusTreeLeafPage,
    BPlusTreeLeafPageHeader, BPlusTreePage, BPlusTreePageType, RecordId,
};

pub struct BPlusTreePageTypeCodec;

impl BPlusTreePageTypeCodec {
    pub fn encode(page_type: BPlusTreePageType) -> Vec<u8> {
        match page_type {
            BPlusTreePageType::LeafPage => CommonCodec::encode_u8(1),
            BPlusTreePageType::InternalPage => CommonCodec::encode_u8(2),
        }
    }

    pub fn decode(bytes: &[u8]) -> QuartzDBResult<DecodedData<BPlusTreePageType>> {
        let (tag, offset) = CommonCodec::decode_u8(bytes)?;
        let page_type = match tag {
            1 => BPlusTreePageType::LeafPage,
            2 => BPlusTreePageType::InternalPage,
            other => {
                return Err(QuartzDBError::Internal(format!(
                    "invalid tree page type tag {}",
                    other
                )))
            }
        };
        Ok((page_type, offset))
    }
}

pub struct BPlusTreeLeafPageCodec;

impl BPlusTreeLeafPageCodec {
    pub fn encode(page: &BPlusTreeLeafPage) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(BPlusTreePageTypeCodec::encode(page.header.page_type));
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_i32(page.header.parent_page_id));
        bytes.extend(CommonCodec::encode_i32(page.header.page_id));
        bytes.extend(CommonCodec::encode_u64(page.header.lsn));
        bytes.extend(CommonCodec::encode_i32(page.header.next_page_id));
        bytes.extend(CommonCodec::encode_u32(page.header.key_size));
        for (key, rid) in &page.array {
            debug_assert_eq!(key.len(), page.header.key_size as usize);
            bytes.extend_from_slice(key);
            bytes.extend(CommonCodec::encode_i32(rid.page_id));
            bytes.extend(CommonCodec::encode_u32(rid.slot_num));
        }
        bytes
    }

    pub fn decode(
        bytes: &[u8],
        comparator: KeyComparator,
    ) -> QuartzDBResult<DecodedData<BPlusTreeLeafPage>> {
        let mut offset = 0;
        let (page_type, consumed) = BPlusTreePageTypeCodec::decode(&bytes[offset..])?;
        offset += consumed;
        if page_type != BPlusTreePageType::LeafPage {
            return Err(QuartzDBError::Internal(
                "page bytes do not hold a leaf page".to_string(),
            ));
        }
        let (current_size, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += consumed;
        let (max_size, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += consumed;
        let (parent_page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += consumed;
        let (page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += consumed;
        let (lsn, consumed) = CommonCodec::decode_u64(&bytes[offset..])?;
        offset += consumed;
        let (next_page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += consumed;
        let (key_size, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += consumed;

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let key = bytes
                .get(offset..offset + key_size as usize)
                .ok_or_else(|| {
                    QuartzDBError::Internal("leaf page truncated mid-entry".to_string())
                })?
                .to_vec();
            offset += key_size as usize;
            let (rid_page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
            offset += consumed;
            let (rid_slot_num, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
            offset += consumed;
            array.push((key, RecordId::new(rid_page_id, rid_slot_num)));
        }

        Ok((
            BPlusTreeLeafPage {
                header: BPlusTreeLeafPageHeader {
                    page_type,
                    current_size,
                    max_size,
                    parent_page_id,
                    page_id,
                    lsn,
                    next_page_id,
                    key_size,
                },
                array,
                comparator,
            },
            offset,
        ))
    }
}

pub struct BPlusTreeInternalPageCodec;

impl BPlusTreeInternalPageCodec {
    pub fn encode(page: &BPlusTreeInternalPage) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(BPlusTreePageTypeCodec::encode(page.header.page_type));
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_i32(page.header.parent_page_id));
        bytes.extend(CommonCodec::encode_i32(page.header.page_id));
        bytes.extend(CommonCodec::encode_u64(page.header.lsn));
        bytes.extend(CommonCodec::encode_u32(page.header.key_size));
        for (key, child) in &page.array {
            debug_assert_eq!(key.len(), page.header.key_size as usize);
            bytes.extend_from_slice(key);
            bytes.extend(CommonCodec::encode_i32(*child));
        }
        bytes
    }

    pub fn decode(
        bytes: &[u8],
        comparator: KeyComparator,
    ) -> QuartzDBResult<DecodedData<BPlusTreeInternalPage>> {
        let mut offset = 0;
        let (page_type, consumed) = BPlusTreePageTypeCodec::decode(&bytes[offset..])?;
        offset += consumed;
        if page_type != BPlusTreePageType::InternalPage {
            return Err(QuartzDBError::Internal(
                "page bytes do not hold an internal page".to_string(),
            ));
        }
        let (current_size, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += consumed;
        let (max_size, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += consumed;
        let (parent_page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += consumed;
        let (page_id, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += consumed;
        let (lsn, consumed) = CommonCodec::decode_u64(&bytes[offset..])?;
        offset += consumed;
        let (key_size, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += consumed;

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let key = bytes
                .get(offset..offset + key_size as usize)
                .ok_or_else(|| {
                    QuartzDBError::Internal("internal page truncated mid-entry".to_string())
                })?
                .to_vec();
            offset += key_size as usize;
            let (child, consumed) = CommonCodec::decode_i32(&bytes[offset..])?;
            offset += consumed;
            array.push((key, child));
        }

        Ok((
            BPlusTreeInternalPage {
                header: BPlusTreeInternalPageHeader {
                    page_type,
                    current_size,
                    max_size,
                    parent_page_id,
                    page_id,
                    lsn,
                    key_size,
                },
                array,
                comparator,
            },
            offset,
        ))
    }
}

pub struct BPlusTreePageCodec;

impl BPlusTreePageCodec {
    pub fn encode(page: &BPlusTreePage) -> Vec<u8> {
        match page {
            BPlusTreePage::Leaf(leaf) => BPlusTreeLeafPageCodec::encode(leaf),
            BPlusTreePage::Internal(internal) => BPlusTreeInternalPageCodec::encode(internal),
        }
    }

    pub fn decode(
        bytes: &[u8],
        comparator: KeyComparator,
    ) -> QuartzDBResult<DecodedData<BPlusTreePage>> {
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        match page_type {
            BPlusTreePageType::LeafPage => {
                let (leaf, consumed) = BPlusTreeLeafPageCodec::decode(bytes, comparator)?;
                Ok((BPlusTreePage::Leaf(leaf), consumed))
            }
            BPlusTreePageType::InternalPage => {
                let (internal, consumed) = BPlusTreeInternalPageCodec::decode(bytes, comparator)?;
                Ok((BPlusTreePage::Internal(internal), consumed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::INVALID_PAGE_ID;
    use crate::index::default_key_comparator;
    use crate::storage::page::{
        BPLUS_INTERNAL_PAGE_HEADER_SIZE, BPLUS_LEAF_PAGE_HEADER_SIZE,
    };

    #[test]
    fn test_leaf_page_round_trip() {
        let mut page = BPlusTreeLeafPage::new(7, 3, 4, 8, default_key_comparator);
        page.header.next_page_id = 9;
        page.insert(vec![0, 0, 0, 1], RecordId::new(1, 1));
        page.insert(vec![0, 0, 0, 2], RecordId::new(2, 2));

        let encoded = BPlusTreeLeafPageCodec::encode(&page);
        assert_eq!(
            encoded.len(),
            BPLUS_LEAF_PAGE_HEADER_SIZE + 2 * (4 + 8)
        );
        let (decoded, consumed) =
            BPlusTreeLeafPageCodec::decode(&encoded, default_key_comparator).unwrap();
        assert_eq!(decoded, page);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_internal_page_round_trip() {
        let mut page = BPlusTreeInternalPage::new(5, INVALID_PAGE_ID, 4, 8, default_key_comparator);
        page.populate_new_root(10, vec![0, 0, 0, 9], 11);

        let encoded = BPlusTreeInternalPageCodec::encode(&page);
        assert_eq!(
            encoded.len(),
            BPLUS_INTERNAL_PAGE_HEADER_SIZE + 2 * (4 + 4)
        );
        let (decoded, consumed) =
            BPlusTreePageCodec::decode(&encoded, default_key_comparator).unwrap();
        assert_eq!(decoded, BPlusTreePage::Internal(page));
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_zeroed_bytes_are_rejected() {
        let zeroed = [0u8; 64];
        assert!(BPlusTreePageCodec::decode(&zeroed, default_key_comparator).is_err());
    }
}
