//! Row insertion and removal on list fields.
//!
//! Positions are zero-based from the front when non-negative and one-based
//! from the back when negative, so `-1` addresses the end of the list.

use crate::error::{HostingError, ListRangeError};
use crate::model::ListDef;
use crate::payload::{Field, FieldContent, Payload};

/// Absolute index a new row lands on; `None` appends.
pub fn insert_index(position: Option<i64>, count: usize) -> Result<usize, ListRangeError> {
    let out_of_range = ListRangeError::Insert { count };
    match position {
        None => Ok(count),
        Some(position) if position < 0 => {
            let index = count as i64 + 1 + position;
            usize::try_from(index).map_err(|_| out_of_range)
        }
        Some(position) => match usize::try_from(position) {
            Ok(index) if index <= count => Ok(index),
            _ => Err(out_of_range),
        },
    }
}

/// Absolute index of the row a removal addresses.
pub fn remove_index(position: i64, count: usize) -> Result<usize, ListRangeError> {
    let index = if position < 0 {
        count as i64 + position
    } else {
        position
    };
    match usize::try_from(index) {
        Ok(index) if index < count => Ok(index),
        _ => Err(ListRangeError::remove(count)),
    }
}

/// Inserts a new row into the list held by `field` and returns its index.
///
/// With a definition the row is built from the row schema and the declared
/// maximum is enforced; without one the row copies the shape of an existing
/// row.
pub fn insert_row(
    field: &mut Field,
    path: &str,
    position: Option<i64>,
    list_def: Option<&ListDef>,
) -> Result<usize, HostingError> {
    let count = match &field.content {
        FieldContent::Empty => 0,
        FieldContent::List(rows) => rows.len(),
        FieldContent::Value(_) => {
            return Err(HostingError::NotAList {
                path: path.to_string(),
            });
        }
    };

    let negative = position.is_some_and(|position| position < 0);
    if negative {
        insert_index(position, count)?;
    }
    if let Some(maximum) = list_def.and_then(|list| list.maximum_count) {
        if count >= maximum {
            return Err(HostingError::ListCapacity {
                path: path.to_string(),
                maximum,
            });
        }
    }
    let index = insert_index(position, count)?;

    let row = match list_def {
        Some(list) => list.new_row(),
        None => field
            .rows()
            .and_then(|rows| rows.first())
            .map(Payload::blank_copy)
            .unwrap_or_default(),
    };

    if !matches!(field.content, FieldContent::List(_)) {
        field.content = FieldContent::List(Vec::new());
    }
    if let Some(rows) = field.rows_mut() {
        rows.insert(index, row);
    }
    Ok(index)
}

/// Removes one row from the list held by `field`, keeping at least the
/// declared minimum.
pub fn remove_row(
    field: &mut Field,
    path: &str,
    position: i64,
    list_def: Option<&ListDef>,
) -> Result<(), HostingError> {
    let Some(rows) = field.rows_mut() else {
        return Err(HostingError::NotAList {
            path: path.to_string(),
        });
    };

    let count = rows.len();
    let index = remove_index(position, count)?;

    let minimum = list_def.map_or(0, ListDef::minimum);
    if minimum > 0 && count <= minimum {
        return Err(HostingError::ListMinimum {
            path: path.to_string(),
            minimum,
        });
    }

    rows.remove(index);
    Ok(())
}
