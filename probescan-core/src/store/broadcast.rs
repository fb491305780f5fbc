//! Row alignment for fan-out tables.
//!
//! One identifier can produce several rows in a table. Each field yields
//! its own sequence; [`align`] stretches those sequences to a common row
//! count and transposes them into rows.

use thiserror::Error;

use crate::config::BroadcastPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("column {column} has {len} values, which does not divide {rows} rows")]
pub struct UnevenBroadcast {
    pub column: usize,
    pub len: usize,
    pub rows: usize,
}

/// Align `columns` into rows.
///
/// The target row count is the longest column. Empty columns become a
/// single `fill` value. A table whose columns are all empty yields no rows.
pub fn align<T: Clone>(
    columns: &[Vec<T>],
    fill: &T,
    policy: BroadcastPolicy,
) -> Result<Vec<Vec<T>>, UnevenBroadcast> {
    let max_len = columns.iter().map(Vec::len).max().unwrap_or(0);
    if max_len == 0 {
        return Ok(Vec::new());
    }

    let filled: Vec<&[T]> = columns
        .iter()
        .map(|column| {
            if column.is_empty() {
                std::slice::from_ref(fill)
            } else {
                column.as_slice()
            }
        })
        .collect();

    let rows = match policy {
        BroadcastPolicy::Cycle => max_len,
        BroadcastPolicy::Truncate => filled
            .iter()
            .map(|column| (max_len / column.len()) * column.len())
            .min()
            .unwrap_or(0),
        BroadcastPolicy::Strict => {
            if let Some((column, values)) = filled
                .iter()
                .enumerate()
                .find(|(_, values)| max_len % values.len() != 0)
            {
                return Err(UnevenBroadcast {
                    column,
                    len: values.len(),
                    rows: max_len,
                });
            }
            max_len
        }
    };

    Ok((0..rows)
        .map(|row| {
            filled
                .iter()
                .map(|column| column[row % column.len()].clone())
                .collect()
        })
        .collect())
}
