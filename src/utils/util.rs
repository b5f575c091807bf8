use comfy_table::Cell;
use std::collections::VecDeque;

use crate::buffer::{INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::QuartzDBResult;
use crate::index::BPlusTree;
use crate::storage::codec::BPlusTreePageCodec;
use crate::storage::page::BPlusTreePage;

const TABLE_PRESET: &str = "||--+-++|    ++++++";

pub fn page_bytes_to_array(bytes: &[u8]) -> [u8; PAGE_SIZE] {
    let mut data = [0u8; PAGE_SIZE];
    data[..bytes.len()].copy_from_slice(bytes);
    data
}

fn format_key(key: &[u8]) -> String {
    if key.len() == 8 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(key);
        return u64::from_be_bytes(buf).to_string();
    }
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Level-order rendering of the tree, one table per level.
pub fn pretty_format_btree(tree: &BPlusTree) -> QuartzDBResult<String> {
    let mut display = String::new();
    let root_page_id = tree.root_page_id();
    if root_page_id == INVALID_PAGE_ID {
        display.push_str("Empty tree.");
        return Ok(display);
    }

    let mut curr_queue = VecDeque::from([root_page_id]);
    let mut level_index = 1;
    while !curr_queue.is_empty() {
        let mut next_queue = VecDeque::new();
        display.push_str(&format!("B+ Tree Level No.{}:\n", level_index));

        let mut level_table = comfy_table::Table::new();
        level_table.load_preset(TABLE_PRESET);
        let mut level_row = Vec::new();

        while let Some(page_id) = curr_queue.pop_front() {
            let guard = tree.buffer_pool.fetch_page_read(page_id)?;
            let (page, _) = BPlusTreePageCodec::decode(guard.data(), tree.comparator)?;
            drop(guard);

            let mut page_table = comfy_table::Table::new();
            page_table.load_preset(TABLE_PRESET);
            match page {
                BPlusTreePage::Internal(internal) => {
                    let mut header = Vec::new();
                    let mut row = Vec::new();
                    for (index, (key, child)) in internal.array.iter().enumerate() {
                        if index == 0 {
                            header.push(Cell::new("NULL"));
                        } else {
                            header.push(Cell::new(format_key(key)));
                        }
                        row.push(Cell::new(child));
                        next_queue.push_back(*child);
                    }
                    page_table.set_header(header);
                    page_table.add_row(row);
                    level_row.push(Cell::new(format!(
                        "page_id={}, size: {}/{}\n{}",
                        internal.header.page_id,
                        internal.header.current_size,
                        internal.header.max_size,
                        page_table
                    )));
                }
                BPlusTreePage::Leaf(leaf) => {
                    let mut header = Vec::new();
                    let mut row = Vec::new();
                    for (key, rid) in leaf.array.iter() {
                        header.push(Cell::new(format_key(key)));
                        row.push(Cell::new(format!("{}-{}", rid.page_id, rid.slot_num)));
                    }
                    page_table.set_header(header);
                    page_table.add_row(row);
                    level_row.push(Cell::new(format!(
                        "page_id={}, size: {}/{}, next_page_id={}\n{}",
                        leaf.header.page_id,
                        leaf.header.current_size,
                        leaf.header.max_size,
                        leaf.header.next_page_id,
                        page_table
                    )));
                }
            }
        }

        level_table.add_row(level_row);
        display.push_str(&format!("{}\n", level_table));
        curr_queue = next_queue;
        level_index += 1;
    }
    Ok(display)
}
